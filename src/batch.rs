//! Client-side batch producing one atomic transaction on commit.

use std::collections::HashMap;

use crate::engine::Engine;
use crate::error::{Error, Result};

/// A buffer of operations applied atomically by `commit`.
///
/// Operations only mutate the in-memory buffer until commit: the latest
/// operation per key wins, and the order keys were first added is the order
/// they are written to the log. On commit the operations are bracketed
/// between begin and commit records sharing this batch's transaction id;
/// recovery ignores the whole transaction unless the commit record is found.
pub struct Batch<'a> {
    engine: &'a Engine,
    txn_id: u32,
    /// Keys in first-insertion order.
    order: Vec<Vec<u8>>,
    /// Latest operation per key: `Some(value)` is a put, `None` a delete.
    ops: HashMap<Vec<u8>, Option<Vec<u8>>>,
}

impl<'a> Batch<'a> {
    pub(crate) fn new(engine: &'a Engine) -> Self {
        Self {
            engine,
            txn_id: engine.last_committed_txn_id() + 1,
            order: Vec::new(),
            ops: HashMap::new(),
        }
    }

    /// The transaction id this batch will commit under.
    pub fn txn_id(&self) -> u32 {
        self.txn_id
    }

    /// Buffers a put. The key must be non-empty.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::InvalidArgument("key must not be empty".into()));
        }
        self.insert(key, Some(value.to_vec()));
        Ok(())
    }

    /// Buffers a delete.
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::InvalidArgument("key must not be empty".into()));
        }
        self.insert(key, None);
        Ok(())
    }

    fn insert(&mut self, key: &[u8], op: Option<Vec<u8>>) {
        if !self.ops.contains_key(key) {
            self.order.push(key.to_vec());
        }
        self.ops.insert(key.to_vec(), op);
    }

    /// Number of distinct keys buffered.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Atomically applies every buffered operation. Committing an empty
    /// batch is a no-op; committing at or above the configured batch size
    /// fails without writing anything.
    pub fn commit(self) -> Result<()> {
        if self.ops.len() >= self.engine.batch_limit() {
            return Err(Error::InvalidState(format!(
                "batch holds {} operations, limit is {}",
                self.ops.len(),
                self.engine.batch_limit()
            )));
        }
        if self.ops.is_empty() {
            return Ok(());
        }
        self.engine.commit_batch(self.txn_id, self.order, self.ops)
    }
}
