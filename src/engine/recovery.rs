//! Two-phase startup recovery.
//!
//! Phase one seeds the index from the hint snapshot, if present and enabled.
//! Phase two replays every segment in ascending id order so post-snapshot
//! updates win. Transaction records buffer until their commit record is
//! seen; the buffer survives segment boundaries because rotation can happen
//! mid-commit. A transaction still open when every segment has been replayed
//! was never committed and is discarded.

use std::collections::BTreeMap;
use std::fs;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::hint::{self, HINT_FILE};
use crate::index::Index;
use crate::record::{Location, Record};
use crate::wal::{parse_segment_id, Segment};

/// Engine state rebuilt at open.
pub(super) struct Recovered {
    pub active: Segment,
    pub sealed: BTreeMap<u32, Segment>,
    pub next_file_id: u32,
    pub last_committed_txn_id: u32,
}

pub(super) fn recover(config: &Config, index: &Index) -> Result<Recovered> {
    let mut next_file_id = 0u32;
    let mut last_committed_txn_id = 0u32;

    if config.load_hint {
        let hint_path = config.hint_path().join(HINT_FILE);
        if let Some(snapshot) = hint::load(&hint_path)? {
            last_committed_txn_id = snapshot.last_committed_txn_id;
            let entries = snapshot.entries.len();
            for (key, location) in snapshot.entries {
                if location.file_id >= next_file_id {
                    next_file_id = location.file_id + 1;
                }
                index.put(&key, location)?;
            }
            tracing::info!(
                entries,
                last_committed_txn_id,
                "seeded index from hint snapshot"
            );
        }
    }

    let wal_dir = config.wal_path();
    let mut file_ids = Vec::new();
    for entry in fs::read_dir(&wal_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        match parse_segment_id(&name) {
            Some(file_id) => file_ids.push(file_id),
            None => {
                tracing::warn!(file = %name, "skipping non-segment file in wal directory");
            }
        }
    }
    file_ids.sort_unstable();

    let mut replay = TxnReplay::new(config.debug);
    let mut sealed = BTreeMap::new();
    let mut active = None;
    for (i, &file_id) in file_ids.iter().enumerate() {
        let segment = Segment::open(&wal_dir, file_id, config.auto_sync)?;
        let consumed = replay.apply_segment(&segment, index, &mut last_committed_txn_id)?;
        tracing::debug!(file_id, consumed, "replayed segment");

        if i == file_ids.len() - 1 {
            active = Some(segment);
        } else {
            sealed.insert(file_id, segment);
        }
    }
    replay.finish();

    if let Some(&last) = file_ids.last() {
        next_file_id = next_file_id.max(last + 1);
    }

    let active = match active {
        Some(segment) => segment,
        None => {
            let segment = Segment::open(&wal_dir, next_file_id, config.auto_sync)?;
            next_file_id += 1;
            segment
        }
    };

    tracing::info!(
        active_file_id = active.file_id(),
        sealed = sealed.len(),
        live_keys = index.len(),
        last_committed_txn_id,
        "recovery complete"
    );

    Ok(Recovered {
        active,
        sealed,
        next_file_id,
        last_committed_txn_id,
    })
}

/// A buffered transaction operation: a put at a location, or a delete.
enum TxnOp {
    Put(Location),
    Delete,
}

/// Replay state for the segment phase. The open-transaction buffer is kept
/// here rather than per segment: a commit's records may straddle a rotation.
struct TxnReplay {
    open_txn: Option<(u32, Vec<(Vec<u8>, TxnOp)>)>,
    debug: bool,
}

impl TxnReplay {
    fn new(debug: bool) -> Self {
        Self {
            open_txn: None,
            debug,
        }
    }

    /// Replays one segment into the index. Returns the bytes consumed.
    fn apply_segment(
        &mut self,
        segment: &Segment,
        index: &Index,
        last_committed_txn_id: &mut u32,
    ) -> Result<u32> {
        let debug = self.debug;
        let open_txn = &mut self.open_txn;

        segment.replay(|record, location| {
            if debug {
                tracing::debug!(
                    file_id = location.file_id,
                    offset = location.offset,
                    ?record,
                    "replaying record"
                );
            }
            match record {
                Record::Put { key, .. } => index.put(&key, location),
                Record::Delete { key } => index.delete(&key),
                Record::TxnBegin { txn_id } => {
                    if let Some((abandoned, ops)) = open_txn.replace((txn_id, Vec::new())) {
                        tracing::warn!(
                            txn_id = abandoned,
                            buffered_ops = ops.len(),
                            "new transaction begins before previous commit, discarding buffer"
                        );
                    }
                    Ok(())
                }
                Record::TxnPut { txn_id, key, .. } => match open_txn.as_mut() {
                    Some((open_id, ops)) if *open_id == txn_id => {
                        ops.push((key, TxnOp::Put(location)));
                        Ok(())
                    }
                    Some((open_id, _)) => Err(Error::InvalidState(format!(
                        "transaction id mismatch during replay: record has {txn_id}, open transaction is {open_id}"
                    ))),
                    None => {
                        tracing::warn!(txn_id, "txn put outside begin/commit window, ignoring");
                        Ok(())
                    }
                },
                Record::TxnDelete { txn_id, key } => match open_txn.as_mut() {
                    Some((open_id, ops)) if *open_id == txn_id => {
                        ops.push((key, TxnOp::Delete));
                        Ok(())
                    }
                    Some((open_id, _)) => Err(Error::InvalidState(format!(
                        "transaction id mismatch during replay: record has {txn_id}, open transaction is {open_id}"
                    ))),
                    None => {
                        tracing::warn!(txn_id, "txn delete outside begin/commit window, ignoring");
                        Ok(())
                    }
                },
                Record::TxnCommit { txn_id } => match open_txn.take() {
                    Some((open_id, ops)) if open_id == txn_id => {
                        for (key, op) in ops {
                            match op {
                                TxnOp::Put(location) => index.put(&key, location)?,
                                TxnOp::Delete => index.delete(&key)?,
                            }
                        }
                        *last_committed_txn_id = txn_id;
                        Ok(())
                    }
                    Some((open_id, _)) => Err(Error::InvalidState(format!(
                        "transaction id mismatch during replay: commit has {txn_id}, open transaction is {open_id}"
                    ))),
                    None => {
                        tracing::warn!(txn_id, "txn commit without begin, ignoring");
                        Ok(())
                    }
                },
            }
        })
    }

    /// Called once every segment has been replayed. Whatever transaction is
    /// still open never committed.
    fn finish(&mut self) {
        if let Some((txn_id, ops)) = self.open_txn.take() {
            tracing::warn!(
                txn_id,
                buffered_ops = ops.len(),
                "discarding incomplete transaction at end of log"
            );
        }
    }
}
