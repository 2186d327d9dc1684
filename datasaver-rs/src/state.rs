use crate::services::scheduler::BackupScheduler;
use datasaver_core::Engine;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct AppState {
    pub engine: Arc<Engine>,
    /// Absent when serving without a schedule
    pub scheduler: Option<Arc<BackupScheduler>>,
    /// Health degrades when the last success is older than this
    pub alert_after: chrono::Duration,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(engine: Arc<Engine>, alert_after: chrono::Duration, shutdown: CancellationToken) -> Self {
        Self {
            engine,
            scheduler: None,
            alert_after,
            shutdown,
        }
    }

    pub fn with_scheduler(mut self, scheduler: Arc<BackupScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }
}
