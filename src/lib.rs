//! BarrelDB: a Bitcask-style log-structured key-value storage engine with
//! append-only segments, an in-memory ordered index, hint snapshots for fast
//! startup, atomic batches, and background compaction.

pub mod batch;
pub mod comparator;
pub mod config;
pub mod engine;
pub mod error;
pub mod flock;
pub mod hint;
pub mod index;
pub mod record;
pub mod wal;

pub use batch::Batch;
pub use config::Config;
pub use engine::Engine;
pub use error::{Error, Result};
