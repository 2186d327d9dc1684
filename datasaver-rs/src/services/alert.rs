use datasaver_core::{Engine, Notifier};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const CHECK_INTERVAL: Duration = Duration::from_secs(3600);

/// Message for an overdue backup, or `None` while backups are fresh.
pub fn overdue_message(engine: &Engine, alert_after: chrono::Duration) -> Option<String> {
    let last_run = engine.last_run()?;
    let age = chrono::Utc::now() - last_run;
    (age > alert_after).then(|| {
        format!(
            "No backup in {} hours. Last backup: {}",
            alert_after.num_hours(),
            last_run.format("%Y-%m-%d %H:%M:%S UTC")
        )
    })
}

/// Hourly check that raises `backup.alert` when backups stop succeeding.
pub async fn run_alert_monitor(
    engine: Arc<Engine>,
    notifier: Arc<dyn Notifier>,
    alert_after: chrono::Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(CHECK_INTERVAL);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {}
        }

        if let Some(message) = overdue_message(&engine, alert_after) {
            tracing::warn!(%message, "Backup overdue");
            notifier.notify_alert(&message).await;
        }
    }
}
