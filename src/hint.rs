//! Hint snapshot: a compact on-disk serialization of the live index plus the
//! last committed transaction id, used to skip full-segment replay at open.
//!
//! Format (big-endian, no framing):
//!
//! ```text
//! +--------------------------+
//! | last_committed_txn_id u32|
//! +--------------------------+   repeated per live key:
//! | key_len u32              |
//! | file_id u32              |
//! | offset  u32              |
//! | length  u32              |
//! | key bytes                |
//! +--------------------------+
//! ```

use std::fs::OpenOptions;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};
use crate::index::Index;
use crate::record::{Location, MAX_KEY_SIZE};

/// File name of the snapshot inside the hint directory.
pub const HINT_FILE: &str = "keys.hint";

/// A deserialized hint snapshot.
pub struct HintSnapshot {
    pub last_committed_txn_id: u32,
    pub entries: Vec<(Vec<u8>, Location)>,
}

/// Truncates and rewrites the snapshot from the live index, fsyncing before
/// returning. Returns the number of entries written.
pub fn write(path: &Path, last_committed_txn_id: u32, index: &Index) -> Result<u32> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    let mut writer = BufWriter::new(&file);

    writer.write_u32::<BigEndian>(last_committed_txn_id)?;

    let mut entries = 0u32;
    index.for_each(|key, location| {
        writer.write_u32::<BigEndian>(key.len() as u32)?;
        writer.write_u32::<BigEndian>(location.file_id)?;
        writer.write_u32::<BigEndian>(location.offset)?;
        writer.write_u32::<BigEndian>(location.length)?;
        writer.write_all(key)?;
        entries += 1;
        Ok(())
    })?;

    writer.flush()?;
    drop(writer);
    file.sync_all()?;

    Ok(entries)
}

/// Loads the snapshot if present. A missing file is a clean start
/// (`Ok(None)`); malformed or truncated content is a corruption error.
pub fn load(path: &Path) -> Result<Option<HintSnapshot>> {
    if !path.exists() {
        return Ok(None);
    }

    let file = std::fs::File::open(path)?;
    let mut reader = BufReader::new(file);

    let last_committed_txn_id = reader
        .read_u32::<BigEndian>()
        .map_err(|err| Error::Corruption(format!("hint file missing txn id preamble: {err}")))?;

    let mut entries = Vec::new();
    loop {
        let key_len = match reader.read_u32::<BigEndian>() {
            Ok(len) => len,
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(err) => return Err(err.into()),
        };
        if key_len > MAX_KEY_SIZE {
            return Err(Error::Corruption(format!(
                "hint entry key length {key_len} exceeds maximum {MAX_KEY_SIZE}"
            )));
        }

        let entry = || -> std::io::Result<(Vec<u8>, Location)> {
            let file_id = reader.read_u32::<BigEndian>()?;
            let offset = reader.read_u32::<BigEndian>()?;
            let length = reader.read_u32::<BigEndian>()?;
            let mut key = vec![0u8; key_len as usize];
            reader.read_exact(&mut key)?;
            Ok((
                key,
                Location {
                    file_id,
                    offset,
                    length,
                },
            ))
        }();

        match entry {
            Ok(pair) => entries.push(pair),
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(Error::Corruption(format!(
                    "hint file truncated mid-entry after {} entries",
                    entries.len()
                )));
            }
            Err(err) => return Err(err.into()),
        }
    }

    Ok(Some(HintSnapshot {
        last_committed_txn_id,
        entries,
    }))
}
