use std::path::{Path, PathBuf};

/// Configuration for a BarrelDB engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory for all engine files.
    pub data_dir: PathBuf,

    /// Name of the segment sub-directory under `data_dir` (default: "wal").
    pub wal_dir: String,

    /// Name of the hint-snapshot sub-directory under `data_dir` (default: "hint").
    pub hint_dir: String,

    /// Rotation threshold: the active segment is sealed once its size reaches
    /// this many bytes (default: 1 MiB).
    pub max_file_size: u32,

    /// Branching hint for the ordered index. The standard-library B-tree
    /// manages its own fanout, so this is advisory (default: 128).
    pub index_order: usize,

    /// fsync the active segment after every append (default: true).
    pub auto_sync: bool,

    /// Consult the hint snapshot at open (default: true).
    pub load_hint: bool,

    /// Maximum operations per atomic batch; commit fails at or above this
    /// count (default: 200).
    pub batch_size: usize,

    /// Enable per-record logging during replay and commit (default: false).
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./barreldb"),
            wal_dir: "wal".to_string(),
            hint_dir: "hint".to_string(),
            max_file_size: 1024 * 1024, // 1 MiB
            index_order: 128,
            auto_sync: true,
            load_hint: true,
            batch_size: 200,
            debug: false,
        }
    }
}

impl Config {
    /// Create a new config rooted at the given data directory.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Set the segment sub-directory name.
    pub fn wal_dir(mut self, name: impl Into<String>) -> Self {
        self.wal_dir = name.into();
        self
    }

    /// Set the hint sub-directory name.
    pub fn hint_dir(mut self, name: impl Into<String>) -> Self {
        self.hint_dir = name.into();
        self
    }

    /// Set the segment rotation threshold in bytes.
    pub fn max_file_size(mut self, size: u32) -> Self {
        self.max_file_size = size;
        self
    }

    /// Set the ordered-index branching hint.
    pub fn index_order(mut self, order: usize) -> Self {
        self.index_order = order;
        self
    }

    /// Enable or disable fsync-per-append.
    pub fn auto_sync(mut self, enabled: bool) -> Self {
        self.auto_sync = enabled;
        self
    }

    /// Enable or disable loading the hint snapshot at open.
    pub fn load_hint(mut self, enabled: bool) -> Self {
        self.load_hint = enabled;
        self
    }

    /// Set the maximum operations per atomic batch.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Enable or disable verbose per-record logging.
    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    /// Full path of the segment directory.
    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(&self.wal_dir)
    }

    /// Full path of the hint directory.
    pub fn hint_path(&self) -> PathBuf {
        self.data_dir.join(&self.hint_dir)
    }

    /// Full path of the directory lock file.
    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join("bitcask.lock")
    }

    /// Root data directory.
    pub fn dir(&self) -> &Path {
        &self.data_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.data_dir, PathBuf::from("./barreldb"));
        assert_eq!(config.wal_dir, "wal");
        assert_eq!(config.hint_dir, "hint");
        assert_eq!(config.max_file_size, 1024 * 1024);
        assert_eq!(config.batch_size, 200);
        assert!(config.auto_sync);
        assert!(config.load_hint);
        assert!(!config.debug);
    }

    #[test]
    fn test_config_builder() {
        let config = Config::new("/tmp/test")
            .max_file_size(4096)
            .auto_sync(false)
            .load_hint(false)
            .batch_size(50)
            .wal_dir("segments")
            .hint_dir("snapshots");

        assert_eq!(config.data_dir, PathBuf::from("/tmp/test"));
        assert_eq!(config.max_file_size, 4096);
        assert!(!config.auto_sync);
        assert!(!config.load_hint);
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.wal_path(), PathBuf::from("/tmp/test/segments"));
        assert_eq!(config.hint_path(), PathBuf::from("/tmp/test/snapshots"));
    }
}
