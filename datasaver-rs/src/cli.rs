//! Command-line interface.

use crate::routes::create_router;
use crate::services::alert::run_alert_monitor;
use crate::services::scheduler::BackupScheduler;
use crate::shutdown::ShutdownCoordinator;
use crate::state::AppState;
use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use datasaver_core::database::create_driver;
use datasaver_core::{Config, Engine, Notifier, RestoreOptions, WebhookNotifier};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Perform an immediate backup
    Backup,
    /// Delete backups the retention policy no longer protects
    Cleanup,
    /// List available backups
    List,
    /// Print the metadata of one backup
    Show { id: String },
    /// Check a backup's presence, size and checksum
    Validate {
        id: String,
        /// Also load the backup into a throwaway database
        #[arg(long)]
        restore: bool,
    },
    /// Restore a backup
    Restore {
        id: String,
        /// Restore into this database instead of the configured one
        #[arg(long)]
        target: Option<String>,
        /// Resolve the backup without changing anything
        #[arg(long)]
        dry_run: bool,
        /// Verify the stored checksum first
        #[arg(long)]
        verify_checksum: bool,
    },
    /// Summarize backup health
    Health,
    /// Run scheduled backups and serve the health endpoint
    Daemon,
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

fn build_engine(config: &Config) -> Result<(Arc<Engine>, Option<Arc<dyn Notifier>>)> {
    let storage = config.storage.open()?;
    let driver = create_driver(&config.database, config.backup.temp_dir.as_deref())?;
    let mut engine = Engine::new(config.engine_config()?, storage, driver);

    let notifier = WebhookNotifier::new(&config.monitoring.webhook_url)
        .map(|n| Arc::new(n) as Arc<dyn Notifier>);
    if let Some(notifier) = &notifier {
        engine = engine.with_notifier(notifier.clone());
    }

    Ok((Arc::new(engine), notifier))
}

pub async fn execute(command: Command, config: Config) -> Result<()> {
    let (engine, notifier) = build_engine(&config)?;

    let coordinator = ShutdownCoordinator::new();
    let cancel = coordinator.token();
    if command != Command::Daemon {
        // Ctrl+C cancels one-shot commands too.
        coordinator.listen();
    }

    match command {
        Command::Backup => {
            let result = engine.run(&cancel).await?;
            println!("Backup completed successfully");
            println!("  ID: {}", result.id);
            println!("  Size: {}", format_bytes(result.size));
            println!("  Compressed: {}", format_bytes(result.compressed_size));
            println!("  Duration: {}ms", result.duration.as_millis());
            if let Some(e) = &result.verify_error {
                println!("  Verification FAILED: {e}");
            } else if result.verified {
                println!("  Verified: yes");
            }
            if !result.metadata_persisted {
                println!("  Warning: metadata could not be written");
            }
        }
        Command::Cleanup => {
            let count = engine.cleanup(&cancel).await?;
            println!("Cleanup completed: {count} backups deleted");
        }
        Command::List => {
            let backups = engine.list_backups(&cancel).await?;
            if backups.is_empty() {
                println!("No backups found");
                return Ok(());
            }
            println!("{:<26} {:<20} {:<12} {:<8}", "ID", "DATE", "SIZE", "TYPE");
            for b in backups {
                println!(
                    "{:<26} {:<20} {:<12} {:<8}",
                    b.id,
                    b.timestamp.format("%Y-%m-%d %H:%M").to_string(),
                    format_bytes(b.artifact.stored_size_bytes),
                    b.tier.as_str()
                );
            }
        }
        Command::Show { id } => {
            let record = engine.get_backup(&cancel, &id).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::Validate { id, restore } => {
            let record = engine.get_backup(&cancel, &id).await?;
            let validator = engine.validator();
            let result = validator.validate(&record).await?;

            if !result.valid {
                println!("Backup {id} is INVALID");
                for e in &result.errors {
                    println!("  - {e}");
                }
                bail!("backup validation failed");
            }

            println!("Backup {id} is valid");
            println!("  File exists: {}", result.file_exists);
            println!("  Size match: {}", result.size_match);
            println!("  Checksum OK: {}", result.checksum_ok);

            if restore {
                validator.verify_restore_integrity(&record).await?;
                println!("  Restore test: passed");
            }
        }
        Command::Restore {
            id,
            target,
            dry_run,
            verify_checksum,
        } => {
            let opts = RestoreOptions {
                backup_id: id,
                target,
                dry_run,
                verify_checksum: verify_checksum || config.backup.verify_checksum,
            };
            let result = engine.restorer().restore(&cancel, &opts).await?;

            if result.dry_run {
                println!("Dry run completed - no changes made");
                println!("  Would restore: {}", result.artifact);
            } else {
                println!("Restore completed successfully");
                println!("  Backup: {}", result.backup_id);
                println!(
                    "  Target database: {}",
                    result.target.as_deref().unwrap_or("(configured)")
                );
                if let Some(valid) = result.checksum_valid {
                    println!("  Checksum valid: {valid}");
                }
            }
        }
        Command::Health => {
            let backups = engine.list_backups(&cancel).await?;
            let total: u64 = backups.iter().map(|b| b.artifact.stored_size_bytes).sum();
            let last = backups.first().map(|b| b.timestamp);

            let status = match last {
                None => "warning: no backups found",
                Some(t) if chrono::Utc::now() - t > config.alert_after() => "warning: backup overdue",
                Some(_) => "healthy",
            };

            println!("Status: {status}");
            if let Some(t) = last {
                println!("Last backup: {}", t.format("%Y-%m-%d %H:%M:%S"));
            }
            println!("Total backups: {}", backups.len());
            println!("Storage used: {}", format_bytes(total));
        }
        Command::Daemon => daemon(config, engine, notifier, coordinator).await?,
    }

    Ok(())
}

async fn daemon(
    config: Config,
    engine: Arc<Engine>,
    notifier: Option<Arc<dyn Notifier>>,
    coordinator: ShutdownCoordinator,
) -> Result<()> {
    tracing::info!("Starting datasaver daemon v{}", env!("CARGO_PKG_VERSION"));

    let shutdown = coordinator.token();

    let scheduler = Arc::new(BackupScheduler::new(engine.clone(), shutdown.clone()).await?);
    scheduler.schedule(&config.schedule).await?;
    scheduler.start().await?;

    if let Some(notifier) = notifier {
        tokio::spawn(run_alert_monitor(
            engine.clone(),
            notifier,
            config.alert_after(),
            shutdown.clone(),
        ));
    }

    let state = Arc::new(
        AppState::new(engine, config.alert_after(), shutdown.clone()).with_scheduler(scheduler.clone()),
    );
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.monitoring.health_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Health endpoint: http://{}/health", addr);

    let server_shutdown = shutdown.clone();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await
    });

    coordinator.wait_for_signal().await;

    if let Err(e) = scheduler.shutdown().await {
        tracing::warn!(error = %e, "Scheduler shutdown failed");
    }

    match tokio::time::timeout(Duration::from_secs(5), server_handle).await {
        Ok(Ok(Ok(()))) => tracing::info!("Server shutdown complete"),
        Ok(Ok(Err(e))) => tracing::error!("Server error during shutdown: {}", e),
        Ok(Err(e)) => tracing::error!("Server task panicked: {}", e),
        Err(_) => tracing::warn!("Server shutdown timeout, forcing exit"),
    }

    // The cancelled run unwinds at its next stage boundary.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    while scheduler.is_running() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    if scheduler.is_running() {
        tracing::warn!("Backup still running at exit");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1023), "1023.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MB");
    }

    #[test]
    fn test_parse_restore() {
        let args = Args::try_parse_from([
            "datasaver",
            "restore",
            "backup_20240101_020000",
            "--target",
            "/tmp/copy.db",
            "--dry-run",
            "--config",
            "/etc/datasaver.toml",
        ])
        .unwrap();

        assert_eq!(args.config, Some(PathBuf::from("/etc/datasaver.toml")));
        assert_eq!(
            args.command,
            Command::Restore {
                id: "backup_20240101_020000".into(),
                target: Some("/tmp/copy.db".into()),
                dry_run: true,
                verify_checksum: false,
            }
        );
    }

    #[test]
    fn test_parse_validate_and_globals() {
        let args = Args::try_parse_from(["datasaver", "-l", "debug", "validate", "x", "--restore"]).unwrap();
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert_eq!(
            args.command,
            Command::Validate {
                id: "x".into(),
                restore: true
            }
        );
        assert!(Args::try_parse_from(["datasaver", "show"]).is_err());
    }
}
