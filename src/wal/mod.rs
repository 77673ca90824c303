//! Append-only segment files.
//!
//! A segment is a numbered `wal-<id>.log` file holding a sequence of encoded
//! records. The engine owns exactly one mutable *active* segment at a time;
//! every other segment is *sealed* and read-only. Appends go through a single
//! writer; reads are positional and never disturb the append cursor.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::record::{Location, Record, CRC32, HEADER_SIZE, MAX_KEY_SIZE, MAX_VALUE_SIZE, TRAILER_SIZE};

/// Builds the on-disk path for a segment id inside the WAL directory.
pub fn segment_path(dir: &Path, file_id: u32) -> PathBuf {
    dir.join(format!("wal-{file_id}.log"))
}

/// Parses a segment id out of a `wal-<id>.log` file name.
pub fn parse_segment_id(name: &str) -> Option<u32> {
    name.strip_prefix("wal-")?
        .strip_suffix(".log")?
        .parse::<u32>()
        .ok()
}

/// A single segment file.
#[derive(Debug)]
pub struct Segment {
    file_id: u32,
    path: PathBuf,
    file: File,
    /// Append cursor. Reads are positional and do not touch it.
    offset: Mutex<u32>,
    auto_sync: bool,
}

impl Segment {
    /// Opens the segment for the given id, creating it if absent. The append
    /// cursor starts at the file's current physical size.
    pub fn open(dir: &Path, file_id: u32, auto_sync: bool) -> Result<Self> {
        let path = segment_path(dir, file_id);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        let size = file.metadata()?.len() as u32;

        Ok(Self {
            file_id,
            path,
            file,
            offset: Mutex::new(size),
            auto_sync,
        })
    }

    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current append offset, equal to the number of bytes written so far.
    pub fn size(&self) -> u32 {
        self.offset.lock().map(|offset| *offset).unwrap_or(0)
    }

    /// Encodes and appends a record, returning its location. When auto-sync
    /// is enabled the write is fsynced before returning.
    pub fn append(&self, record: &Record) -> Result<Location> {
        let encoded = record.encode()?;

        let mut offset = self.offset.lock()?;
        let pre_offset = *offset;

        (&self.file).write_all(&encoded)?;
        if self.auto_sync {
            self.file.sync_all()?;
        }
        *offset += encoded.len() as u32;

        Ok(Location {
            file_id: self.file_id,
            offset: pre_offset,
            length: encoded.len() as u32,
        })
    }

    /// Reads and decodes the record at the given location. Fails if the
    /// location lies outside the file, the read comes back short, or the
    /// record fails to decode.
    pub fn read_at(&self, location: &Location) -> Result<Record> {
        let file_size = self.file.metadata()?.len();
        let start = location.offset as u64;
        let end = start + location.length as u64;
        if start >= file_size || end > file_size {
            return Err(Error::InvalidState(format!(
                "read past end of segment {}: offset={}, length={}, size={}",
                self.file_id, location.offset, location.length, file_size
            )));
        }

        let mut buf = vec![0u8; location.length as usize];
        read_exact_at(&self.file, &mut buf, start).map_err(|err| {
            if err.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::Truncation(format!(
                    "short read in segment {} at offset {}: {err}",
                    self.file_id, location.offset
                ))
            } else {
                Error::Io(err.to_string())
            }
        })?;

        Record::decode(&buf)
    }

    /// Streams every record from offset 0, invoking `apply` with the decoded
    /// record and its location. Structural damage (implausible sizes, a
    /// truncated tail, an undecodable record) ends the scan cleanly, keeping
    /// the prefix; a record whose CRC mismatches is logged and stepped over.
    /// Errors from `apply` abort the scan and propagate.
    ///
    /// Returns the number of bytes consumed up to the last intact record.
    pub fn replay<F>(&self, mut apply: F) -> Result<u32>
    where
        F: FnMut(Record, Location) -> Result<()>,
    {
        let mut reader = self.file.try_clone()?;
        reader.seek(SeekFrom::Start(0))?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        let len = buf.len();

        let mut offset = 0usize;
        while offset + HEADER_SIZE <= len {
            let key_len =
                u32::from_be_bytes([buf[offset + 1], buf[offset + 2], buf[offset + 3], buf[offset + 4]]);
            let value_len =
                u32::from_be_bytes([buf[offset + 5], buf[offset + 6], buf[offset + 7], buf[offset + 8]]);

            if key_len > MAX_KEY_SIZE || value_len > MAX_VALUE_SIZE {
                tracing::warn!(
                    file_id = self.file_id,
                    offset,
                    key_len,
                    value_len,
                    "implausible record sizes, ending replay of segment"
                );
                break;
            }

            let total = HEADER_SIZE + key_len as usize + value_len as usize + TRAILER_SIZE;
            if offset + total > len {
                tracing::warn!(
                    file_id = self.file_id,
                    offset,
                    needed = total,
                    remaining = len - offset,
                    "truncated record at end of segment, keeping prefix"
                );
                break;
            }

            let payload_end = offset + total - TRAILER_SIZE;
            let stored_crc = u32::from_be_bytes([
                buf[payload_end],
                buf[payload_end + 1],
                buf[payload_end + 2],
                buf[payload_end + 3],
            ]);
            let computed_crc = CRC32.checksum(&buf[offset..payload_end]);
            if stored_crc != computed_crc {
                tracing::warn!(
                    file_id = self.file_id,
                    offset,
                    stored_crc,
                    computed_crc,
                    "crc mismatch during replay, skipping record"
                );
                offset += total;
                continue;
            }

            let record = match Record::decode(&buf[offset..offset + total]) {
                Ok(record) => record,
                Err(err) => {
                    tracing::warn!(
                        file_id = self.file_id,
                        offset,
                        %err,
                        "undecodable record, ending replay of segment"
                    );
                    break;
                }
            };

            let location = Location {
                file_id: self.file_id,
                offset: offset as u32,
                length: total as u32,
            };
            apply(record, location)?;
            offset += total;
        }

        Ok(offset as u32)
    }

    /// Flushes and fsyncs the segment.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Syncs the segment before the file handle is dropped.
    pub fn close(&self) -> Result<()> {
        self.sync()
    }

    /// Syncs and removes the segment file.
    pub fn delete(self) -> Result<()> {
        self.file.sync_all()?;
        std::fs::remove_file(&self.path)?;
        Ok(())
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    let mut read = 0usize;
    while read < buf.len() {
        let n = file.seek_read(&mut buf[read..], offset + read as u64)?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "failed to fill whole buffer",
            ));
        }
        read += n;
    }
    Ok(())
}
