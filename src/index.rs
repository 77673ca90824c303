//! In-memory ordered index from key to record location.
//!
//! One entry per live key, pointing at the key's most recent non-tombstone
//! record. Ordering follows the engine comparator (shorter-first, then
//! lexicographic), so range scans come back already sorted.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::comparator::{compare, OrderedKey};
use crate::error::Result;
use crate::record::Location;

#[derive(Debug)]
pub struct Index {
    tree: RwLock<BTreeMap<OrderedKey, Location>>,
    /// Advisory branching hint, recorded for configuration parity; the
    /// standard-library B-tree picks its own fanout.
    order: usize,
}

impl Index {
    pub fn new(order: usize) -> Self {
        Self {
            tree: RwLock::new(BTreeMap::new()),
            order,
        }
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// Inserts or replaces the location for a key.
    pub fn put(&self, key: &[u8], location: Location) -> Result<()> {
        self.tree.write()?.insert(OrderedKey::from_slice(key), location);
        Ok(())
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Location>> {
        Ok(self.tree.read()?.get(&OrderedKey::from_slice(key)).copied())
    }

    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.tree.write()?.remove(&OrderedKey::from_slice(key));
        Ok(())
    }

    /// All entries with `start <= key <= end` under the comparator, in
    /// ascending order. An inverted range is empty.
    pub fn range(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Vec<u8>, Location)>> {
        if compare(start, end) == std::cmp::Ordering::Greater {
            return Ok(Vec::new());
        }
        let tree = self.tree.read()?;
        Ok(tree
            .range(OrderedKey::from_slice(start)..=OrderedKey::from_slice(end))
            .map(|(key, location)| (key.as_slice().to_vec(), *location))
            .collect())
    }

    /// Ordered traversal. An error from the callback aborts the traversal
    /// and propagates.
    pub fn for_each<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], &Location) -> Result<()>,
    {
        let tree = self.tree.read()?;
        for (key, location) in tree.iter() {
            f(key.as_slice(), location)?;
        }
        Ok(())
    }

    /// Detached copy of every entry in order. Merge iterates this instead of
    /// the live tree so its own writes cannot perturb the traversal.
    pub fn snapshot(&self) -> Result<Vec<(Vec<u8>, Location)>> {
        let tree = self.tree.read()?;
        Ok(tree
            .iter()
            .map(|(key, location)| (key.as_slice().to_vec(), *location))
            .collect())
    }

    pub fn len(&self) -> usize {
        self.tree.read().map(|tree| tree.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
