pub mod bitmap;
pub mod checksum;
pub mod config;
pub mod error;
pub mod redo;
pub mod scheduler;
pub mod tracker;

pub use config::TrackerConfig;
pub use error::{Error, Result};
pub use tracker::tasks::RedoFollowTask;
pub use tracker::LogTracker;

/// Log sequence number: a monotonically increasing byte offset into the
/// logical redo log.
pub type Lsn = u64;

/// The greatest possible LSN.
pub const LSN_MAX: Lsn = u64::MAX;
