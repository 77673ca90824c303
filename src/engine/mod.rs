//! The storage engine: a single-writer, multi-reader embedded store over
//! append-only segments with an in-memory ordered index.
//!
//! Writes (`put`, `delete`, batch commit, merge) serialize behind one mutex;
//! reads take read locks only and fetch record bytes by offset from any
//! segment, sealed or active. Rotation seals the active segment once it
//! reaches the configured size and opens the next numbered segment.

mod recovery;

use std::collections::BTreeMap;
use std::fs;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, RwLock};

use crate::batch::Batch;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::flock::FileLock;
use crate::hint::{self, HINT_FILE};
use crate::index::Index;
use crate::record::{Location, Record};
use crate::wal::Segment;

/// Mutable segment bookkeeping, guarded by the engine's reader-writer lock.
#[derive(Debug)]
struct Shared {
    active: Segment,
    sealed: BTreeMap<u32, Segment>,
    /// Strictly greater than every sealed or active segment id.
    next_file_id: u32,
}

#[derive(Debug)]
pub struct Engine {
    config: Config,
    shared: RwLock<Shared>,
    index: Index,
    /// Serializes appends, rotations, batch commits, and merges.
    write_lock: Mutex<()>,
    /// Id of the most recently committed transaction; 0 means none yet.
    last_committed_txn_id: AtomicU32,
    /// Held for the engine's lifetime; released on drop.
    _lock: FileLock,
}

impl Engine {
    /// Opens an engine over the configured data directory, creating it if
    /// needed. Acquires the exclusive directory lock, seeds the index from
    /// the hint snapshot when enabled, then replays every segment in
    /// ascending id order so post-snapshot updates win.
    pub fn open(config: Config) -> Result<Engine> {
        fs::create_dir_all(config.dir())?;
        fs::create_dir_all(config.wal_path())?;
        fs::create_dir_all(config.hint_path())?;

        let lock = FileLock::lock(config.lock_path()).map_err(|err| {
            if err.kind() == std::io::ErrorKind::WouldBlock {
                Error::LockHeld(format!("{}", config.lock_path().display()))
            } else {
                Error::Io(err.to_string())
            }
        })?;

        let index = Index::new(config.index_order);
        let recovered = recovery::recover(&config, &index)?;

        let mut last_committed_txn_id = recovered.last_committed_txn_id;
        if last_committed_txn_id != 0 {
            // Keep post-restart transaction ids disjoint from pre-restart ones.
            last_committed_txn_id += 1;
        }

        Ok(Engine {
            config,
            shared: RwLock::new(Shared {
                active: recovered.active,
                sealed: recovered.sealed,
                next_file_id: recovered.next_file_id,
            }),
            index,
            write_lock: Mutex::new(()),
            last_committed_txn_id: AtomicU32::new(last_committed_txn_id),
            _lock: lock,
        })
    }

    /// Stores a key-value pair. The key must be non-empty; the value may be
    /// empty, which is distinct from deletion.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::InvalidArgument("key must not be empty".into()));
        }
        let _guard = self.write_lock.lock()?;
        let location = self.append(&Record::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        })?;
        self.index.put(key, location)
    }

    /// Fetches the value for a key, or `None` if the key is absent or
    /// deleted. IO and corruption errors propagate.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.lookup(key) {
            Ok(value) => Ok(Some(value)),
            Err(Error::KeyNotFound) | Err(Error::KeyDeleted) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn lookup(&self, key: &[u8]) -> Result<Vec<u8>> {
        let location = self.index.get(key)?.ok_or(Error::KeyNotFound)?;
        let shared = self.shared.read()?;
        match Self::read_location(&shared, &location)? {
            Record::Put { value, .. } | Record::TxnPut { value, .. } => Ok(value),
            record if record.is_tombstone() => Err(Error::KeyDeleted),
            _ => Err(Error::Corruption(format!(
                "index entry for key points at a non-data record in segment {}",
                location.file_id
            ))),
        }
    }

    /// Deletes a key by appending a tombstone. Deleting an absent key is a
    /// no-op.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if self.index.get(key)?.is_none() {
            return Ok(());
        }
        let _guard = self.write_lock.lock()?;
        self.append(&Record::Delete { key: key.to_vec() })?;
        self.index.delete(key)
    }

    /// Ordered traversal over every live key, reading each value from its
    /// segment. An error from the callback aborts the traversal.
    pub fn scan<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<()>,
    {
        let shared = self.shared.read()?;
        self.index.for_each(|key, location| {
            match Self::read_location(&shared, location)? {
                Record::Put { value, .. } | Record::TxnPut { value, .. } => f(key, &value),
                _ => Err(Error::Corruption(format!(
                    "index entry for key points at a non-data record in segment {}",
                    location.file_id
                ))),
            }
        })
    }

    /// Returns up to `limit` key-value pairs whose keys satisfy
    /// `start <= key <= end` under the engine comparator, in ascending
    /// order. A limit of 0 means unlimited. The traversal is bounded by the
    /// index's native range scan, so it never walks past `end`.
    pub fn scan_range(
        &self,
        start: &[u8],
        end: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut pairs = self.index.range(start, end)?;
        if limit > 0 && pairs.len() > limit {
            pairs.truncate(limit);
        }

        let shared = self.shared.read()?;
        let mut results = Vec::with_capacity(pairs.len());
        for (key, location) in pairs {
            match Self::read_location(&shared, &location)? {
                Record::Put { value, .. } | Record::TxnPut { value, .. } => {
                    results.push((key, value));
                }
                _ => {
                    return Err(Error::Corruption(format!(
                        "index entry for key points at a non-data record in segment {}",
                        location.file_id
                    )))
                }
            }
        }
        Ok(results)
    }

    /// Rewrites every live record into fresh segments and deletes the stale
    /// ones, reclaiming space held by overwritten and deleted records.
    /// Source segments are only deleted after the whole rewrite succeeds.
    pub fn merge(&self) -> Result<()> {
        let _guard = self.write_lock.lock()?;

        let old_ids: Vec<u32> = {
            let shared = self.shared.read()?;
            shared.sealed.keys().copied().collect()
        };

        // Seal the current tail so every pre-merge record lives in a
        // read-only segment while we rewrite.
        self.rotate()?;

        let entries = self.index.snapshot()?;
        tracing::info!(
            stale_segments = old_ids.len(),
            live_keys = entries.len(),
            "starting merge"
        );

        for (key, location) in entries {
            let value = {
                let shared = self.shared.read()?;
                match Self::read_location(&shared, &location)? {
                    Record::Put { value, .. } | Record::TxnPut { value, .. } => value,
                    _ => {
                        return Err(Error::Corruption(format!(
                            "index entry for key points at a non-data record in segment {}",
                            location.file_id
                        )))
                    }
                }
            };
            let new_location = self.append(&Record::Put {
                key: key.clone(),
                value,
            })?;
            self.index.put(&key, new_location)?;
        }

        let mut shared = self.shared.write()?;
        let mut removed = 0;
        for file_id in &old_ids {
            if let Some(segment) = shared.sealed.remove(file_id) {
                segment.delete()?;
                removed += 1;
            }
        }
        tracing::info!(removed, "merge complete");
        Ok(())
    }

    /// Writes a fresh hint snapshot of the live index and the last committed
    /// transaction id.
    pub fn hint(&self) -> Result<()> {
        fs::create_dir_all(self.config.hint_path())?;
        let path = self.config.hint_path().join(HINT_FILE);
        let entries = hint::write(
            &path,
            self.last_committed_txn_id.load(Ordering::SeqCst),
            &self.index,
        )?;
        tracing::info!(entries, path = %path.display(), "wrote hint snapshot");
        Ok(())
    }

    /// Flushes and fsyncs the active segment.
    pub fn sync(&self) -> Result<()> {
        let shared = self.shared.read()?;
        shared.active.sync()
    }

    /// Flushes a fresh hint snapshot, syncs and closes every segment, and
    /// releases the directory lock.
    pub fn close(self) -> Result<()> {
        self.hint()?;
        let shared = self.shared.read()?;
        shared.active.close()?;
        for segment in shared.sealed.values() {
            segment.close()?;
        }
        Ok(())
    }

    /// Starts a new batch whose operations commit atomically.
    pub fn batch(&self) -> Batch<'_> {
        Batch::new(self)
    }

    /// Id of the most recently committed transaction; 0 means none.
    pub fn last_committed_txn_id(&self) -> u32 {
        self.last_committed_txn_id.load(Ordering::SeqCst)
    }

    /// Number of live keys in the index.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    // ---------------------------------------------------------------------
    // Write path internals. All of these assume the write lock is held.
    // ---------------------------------------------------------------------

    /// Rotates if needed, then appends to the active segment.
    fn append(&self, record: &Record) -> Result<Location> {
        self.try_rotate()?;
        let shared = self.shared.read()?;
        shared.active.append(record)
    }

    /// Seals the active segment and opens the next one once the active
    /// segment has reached the configured size.
    fn try_rotate(&self) -> Result<()> {
        let needs_rotation = {
            let shared = self.shared.read()?;
            shared.active.size() >= self.config.max_file_size
        };
        if !needs_rotation {
            return Ok(());
        }
        self.rotate()
    }

    /// Unconditionally seals the active segment and opens a fresh one at the
    /// next file id.
    fn rotate(&self) -> Result<()> {
        let mut shared = self.shared.write()?;
        shared.active.sync()?;

        let file_id = shared.next_file_id;
        let segment = Segment::open(&self.config.wal_path(), file_id, self.config.auto_sync)?;
        shared.next_file_id += 1;

        let old = std::mem::replace(&mut shared.active, segment);
        tracing::debug!(
            sealed_file_id = old.file_id(),
            active_file_id = file_id,
            sealed_size = old.size(),
            "rotated active segment"
        );
        shared.sealed.insert(old.file_id(), old);
        Ok(())
    }

    /// Commits a batch: brackets its buffered operations between begin and
    /// commit records sharing the transaction id, updating the index as each
    /// operation is appended.
    pub(crate) fn commit_batch(
        &self,
        txn_id: u32,
        order: Vec<Vec<u8>>,
        mut ops: std::collections::HashMap<Vec<u8>, Option<Vec<u8>>>,
    ) -> Result<()> {
        let _guard = self.write_lock.lock()?;

        if self.config.debug {
            tracing::debug!(txn_id, ops = ops.len(), "committing batch");
        }

        self.append(&Record::TxnBegin { txn_id })?;
        for key in order {
            let Some(op) = ops.remove(&key) else {
                continue;
            };
            match op {
                Some(value) => {
                    let location = self.append(&Record::TxnPut {
                        txn_id,
                        key: key.clone(),
                        value,
                    })?;
                    self.index.put(&key, location)?;
                }
                None => {
                    // Deleting a key the store has never seen needs no
                    // tombstone.
                    if self.index.get(&key)?.is_none() {
                        continue;
                    }
                    self.append(&Record::TxnDelete {
                        txn_id,
                        key: key.clone(),
                    })?;
                    self.index.delete(&key)?;
                }
            }
        }
        self.append(&Record::TxnCommit { txn_id })?;

        self.last_committed_txn_id.store(txn_id, Ordering::SeqCst);
        Ok(())
    }

    pub(crate) fn batch_limit(&self) -> usize {
        self.config.batch_size
    }

    fn read_location(shared: &Shared, location: &Location) -> Result<Record> {
        if location.file_id == shared.active.file_id() {
            shared.active.read_at(location)
        } else if let Some(segment) = shared.sealed.get(&location.file_id) {
            segment.read_at(location)
        } else {
            Err(Error::InvalidState(format!(
                "no segment with id {}",
                location.file_id
            )))
        }
    }
}
