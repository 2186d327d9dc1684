use chrono::{DateTime, Utc};
use datasaver_core::Engine;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Runs backup + cleanup on a cron schedule, one run at a time.
pub struct BackupScheduler {
    scheduler: Mutex<JobScheduler>,
    engine: Arc<Engine>,
    cancel: CancellationToken,
    running: Arc<AtomicBool>,
    job_id: Mutex<Option<Uuid>>,
}

/// Clears the running flag when a run ends, even if it panics.
struct RunGuard(Arc<AtomicBool>);

impl RunGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        if flag.swap(true, Ordering::SeqCst) {
            None
        } else {
            Some(Self(flag.clone()))
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Five-field cron (minute precision) to the six-field form the scheduler
/// expects.
pub fn with_seconds(cron_expression: &str) -> String {
    format!("0 {}", cron_expression.trim())
}

impl BackupScheduler {
    pub async fn new(engine: Arc<Engine>, cancel: CancellationToken) -> anyhow::Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            engine,
            cancel,
            running: Arc::new(AtomicBool::new(false)),
            job_id: Mutex::new(None),
        })
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn schedule(&self, cron_expression: &str) -> anyhow::Result<()> {
        let engine = self.engine.clone();
        let cancel = self.cancel.clone();
        let running = self.running.clone();

        let job = Job::new_async(with_seconds(cron_expression).as_str(), move |_uuid, _lock| {
            let engine = engine.clone();
            let cancel = cancel.clone();
            let running = running.clone();
            Box::pin(async move {
                run_guarded(&engine, &cancel, &running).await;
            })
        })?;

        let id = self.scheduler.lock().await.add(job).await?;
        *self.job_id.lock().await = Some(id);
        tracing::info!(cron = %cron_expression, "Backup scheduled");
        Ok(())
    }

    /// Run immediately, outside the schedule. Returns false if a run is
    /// already in flight.
    pub async fn run_now(&self) -> bool {
        run_guarded(&self.engine, &self.cancel, &self.running).await
    }

    pub async fn next_run(&self) -> Option<DateTime<Utc>> {
        let id = (*self.job_id.lock().await)?;
        match self.scheduler.lock().await.next_tick_for_job(id).await {
            Ok(next) => next,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to compute next run");
                None
            }
        }
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.start().await?;
        if let Some(next) = self.next_run().await {
            tracing::info!(next_run = %next, "Scheduler started");
        }
        Ok(())
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.shutdown().await?;
        Ok(())
    }
}

/// One scheduled tick: backup then cleanup. Skipped when a run is already in
/// progress.
async fn run_guarded(engine: &Engine, cancel: &CancellationToken, running: &Arc<AtomicBool>) -> bool {
    let Some(_guard) = RunGuard::acquire(running) else {
        tracing::warn!("Skipping scheduled run: backup already running");
        return false;
    };

    tracing::info!("Scheduled backup starting");
    match engine.run(cancel).await {
        Ok(result) => tracing::info!(backup_id = %result.id, "Scheduled backup completed"),
        Err(e) => tracing::error!(error = %e, "Scheduled backup failed"),
    }

    if cancel.is_cancelled() {
        return true;
    }
    if let Err(e) = engine.cleanup(cancel).await {
        tracing::error!(error = %e, "Cleanup after backup failed");
    }
    true
}
