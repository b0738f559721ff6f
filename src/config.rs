use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the changed-page tracker.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Directory holding the bitmap files.
    pub dir: PathBuf,

    /// Rotate the output file once it reaches this size (default: 100MB).
    pub max_file_size: u64,

    /// How often the background task follows the redo log (default: 10s).
    /// Follows are checkpoint-driven, so a coarse interval is fine.
    pub follow_interval: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./pagemark"),
            max_file_size: 100 * 1024 * 1024, // 100MB
            follow_interval: Duration::from_secs(10),
        }
    }
}

impl TrackerConfig {
    /// Create a new config with the given bitmap directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Set the output file rotation threshold.
    pub fn max_file_size(mut self, size: u64) -> Self {
        self.max_file_size = size;
        self
    }

    /// Set the background follow interval.
    pub fn follow_interval(mut self, interval: Duration) -> Self {
        self.follow_interval = interval;
        self
    }
}
