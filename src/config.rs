use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the store
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory path for the database
    pub dir: PathBuf,

    /// Maximum data file size before seal-and-rotate (default: 128MB)
    pub max_file_size: u64,

    /// Merge (compaction) configuration
    pub merge: MergeConfig,
}

#[derive(Debug, Clone)]
pub struct MergeConfig {
    /// How often the merge job wakes up (default: 10s)
    pub interval: Duration,

    /// Fraction of a file's size in stale bytes that elects it for merge
    /// (default: 0.75)
    pub threshold_per_file: f64,

    /// Minimum number of victim files before a merge round starts (default: 4)
    pub threshold_file_number: usize,

    /// Disables the merge job entirely (default: false)
    pub disabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./cinderkv"),
            max_file_size: 128 * 1024 * 1024, // 128MB
            merge: MergeConfig::default(),
        }
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            threshold_per_file: 0.75,
            threshold_file_number: 4,
            disabled: false,
        }
    }
}

impl Config {
    /// Create a new config with the given directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Set maximum data file size
    pub fn max_file_size(mut self, size: u64) -> Self {
        self.max_file_size = size;
        self
    }

    /// Configure merge settings
    pub fn merge(mut self, config: MergeConfig) -> Self {
        self.merge = config;
        self
    }
}

impl MergeConfig {
    /// Set the merge job interval
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the per-file stale-byte fraction that elects a victim
    pub fn threshold_per_file(mut self, fraction: f64) -> Self {
        self.threshold_per_file = fraction;
        self
    }

    /// Set the minimum victim count that starts a merge round
    pub fn threshold_file_number(mut self, count: usize) -> Self {
        self.threshold_file_number = count;
        self
    }

    /// Disable the merge job
    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }
}
