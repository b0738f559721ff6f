//! Background task wiring for the tracker.

use std::sync::Arc;
use std::time::Duration;

use super::LogTracker;
use crate::error::Result;
use crate::scheduler::BackgroundTask;

/// Periodically follows the redo log to the latest checkpoint. Register
/// it with a [`Scheduler`](crate::scheduler::Scheduler) after opening the
/// tracker.
pub struct RedoFollowTask {
    tracker: Arc<LogTracker>,
}

impl RedoFollowTask {
    pub fn new(tracker: Arc<LogTracker>) -> Self {
        Self { tracker }
    }
}

#[async_trait::async_trait]
impl BackgroundTask for RedoFollowTask {
    fn name(&self) -> &'static str {
        "redo-follow"
    }

    fn interval(&self) -> Duration {
        self.tracker.config().follow_interval
    }

    async fn execute(&self) -> Result<()> {
        // The follow cycle does blocking file IO under the tracker mutex.
        let tracker = self.tracker.clone();
        tokio::task::spawn_blocking(move || tracker.follow_redo_log()).await??;
        Ok(())
    }
}
