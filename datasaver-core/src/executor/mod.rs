//! Backup engine: drives one backup run end to end and the retention cleanup.
//!
//! A run is a sequential pipeline:
//! connect → dump → compress → checksum → persist → (verify) → done.
//! Every stage is raced against the caller's [`CancellationToken`], and the
//! scratch directory holding intermediate files is removed on every exit path.
//!
//! The engine does not serialize concurrent runs; callers (the scheduler, the
//! CLI) guarantee at most one `run` at a time per instance.

pub mod state;

pub use state::{EngineStatus, RunState};

use crate::database::Driver;
use crate::models::{backup_id, metadata_key, BackupRecord, SourceInfo, META_SUFFIX};
use crate::notify::Notifier;
use crate::restore::Restorer;
use crate::retry::{retry, RetryConfig};
use crate::rotation::{GfsRotator, RetentionPolicy};
use crate::storage::{read_to_vec, Storage};
use crate::transfer::{compress_file, sha256_file, Compression};
use crate::utils::errors::{Error, Result};
use crate::validator::{scratch_dir, Validator};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Immutable settings an [`Engine`] is built from.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub compression: Compression,
    pub verify_after_backup: bool,
    pub retention: RetentionPolicy,
    pub retry: RetryConfig,
    /// Parent of per-run scratch directories (default: system temp dir)
    pub temp_dir: Option<PathBuf>,
}

/// Outcome of one run, returned on success and inside [`RunError`] on failure.
#[derive(Debug, Clone, Default)]
pub struct BackupResult {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// Raw dump size in bytes
    pub size: u64,
    /// Size of the stored artifact in bytes
    pub compressed_size: u64,
    pub duration: Duration,
    /// Empty when the checksum could not be computed
    pub checksum: String,
    pub verified: bool,
    pub verify_error: Option<String>,
    /// False when the artifact was stored but its metadata write failed
    pub metadata_persisted: bool,
}

/// A failed run, with whatever progress was made before the failure.
#[derive(Debug, Error)]
#[error("backup {id} failed while {stage}: {source}", id = .result.id)]
pub struct RunError {
    pub result: BackupResult,
    pub stage: RunState,
    pub source: Error,
}

impl RunError {
    pub fn is_cancelled(&self) -> bool {
        self.source.is_cancelled()
    }
}

/// Race `fut` against `cancel`; a fired token wins.
async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = fut => result,
    }
}

pub struct Engine {
    config: EngineConfig,
    storage: Arc<dyn Storage>,
    driver: Arc<dyn Driver>,
    notifier: Option<Arc<dyn Notifier>>,
    rotator: GfsRotator,
    status: RwLock<EngineStatus>,
}

impl Engine {
    pub fn new(config: EngineConfig, storage: Arc<dyn Storage>, driver: Arc<dyn Driver>) -> Self {
        let rotator = GfsRotator::new(config.retention);
        Self {
            config,
            storage,
            driver,
            notifier: None,
            rotator,
            status: RwLock::new(EngineStatus::default()),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn validator(&self) -> Validator {
        Validator::new(self.storage.clone())
            .with_driver(self.driver.clone())
            .with_temp_dir(self.config.temp_dir.clone())
    }

    pub fn restorer(&self) -> Restorer {
        Restorer::new(self.storage.clone(), self.driver.clone())
            .with_temp_dir(self.config.temp_dir.clone())
    }

    pub fn status(&self) -> EngineStatus {
        self.status
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn state(&self) -> RunState {
        self.status().state
    }

    /// Start time of the last successful run.
    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.status().last_run
    }

    /// Error of the last failed run, cleared by the next success.
    pub fn last_error(&self) -> Option<String> {
        self.status().last_error
    }

    fn update_status(&self, f: impl FnOnce(&mut EngineStatus)) {
        let mut status = self
            .status
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut status);
    }

    fn enter(&self, state: RunState) {
        debug!(state = %state, "Entering stage");
        self.update_status(|s| s.state = state);
    }

    /// Run one backup.
    pub async fn run(&self, cancel: &CancellationToken) -> std::result::Result<BackupResult, RunError> {
        let started = Utc::now();
        let clock = Instant::now();
        let mut result = BackupResult {
            id: backup_id(started),
            timestamp: started,
            ..BackupResult::default()
        };

        info!(
            backup_id = %result.id,
            database = %self.driver.kind(),
            compression = %self.config.compression,
            "Starting backup"
        );

        match self.execute(cancel, &mut result, clock).await {
            Ok(()) => {
                self.update_status(|s| {
                    s.state = RunState::Done;
                    s.last_run = Some(started);
                    s.last_error = None;
                });
                info!(
                    backup_id = %result.id,
                    size = result.size,
                    compressed_size = result.compressed_size,
                    duration_ms = result.duration.as_millis() as u64,
                    verified = result.verified,
                    "Backup completed"
                );
                if let Some(notifier) = &self.notifier {
                    notifier
                        .notify_success(&result.id, result.size, result.duration)
                        .await;
                }
                Ok(result)
            }
            Err(source) => {
                let stage = self.state();
                result.duration = clock.elapsed();
                let cancelled = source.is_cancelled();
                self.update_status(|s| {
                    if cancelled {
                        s.state = RunState::Cancelled;
                    } else {
                        s.state = RunState::Failed;
                        s.last_error = Some(source.to_string());
                    }
                });

                if cancelled {
                    warn!(backup_id = %result.id, stage = %stage, "Backup cancelled");
                } else {
                    error!(backup_id = %result.id, stage = %stage, error = %source, "Backup failed");
                    if let Some(notifier) = &self.notifier {
                        notifier.notify_failure(&result.id, &source.to_string()).await;
                    }
                }
                Err(RunError { result, stage, source })
            }
        }
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        result: &mut BackupResult,
        clock: Instant,
    ) -> Result<()> {
        let id = result.id.clone();

        self.enter(RunState::Connecting);
        let mut session = retry(cancel, &self.config.retry, "connect", || {
            cancellable(cancel, self.driver.connect())
        })
        .await
        .map_err(|e| e.context("failed to connect to database"))?;

        let scratch = scratch_dir(self.config.temp_dir.as_deref(), "datasaver-")?;
        let dump_path = scratch
            .path()
            .join(format!("{id}.{}", self.driver.extension()));

        let dumped = async {
            let version = match cancellable(cancel, session.version()).await {
                Ok(version) => version,
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(backup_id = %id, error = %e, "Failed to get database version");
                    "unknown".to_string()
                }
            };

            self.enter(RunState::Dumping);
            let mut file = tokio::fs::File::create(&dump_path).await?;
            let dump = cancellable(cancel, session.dump(&mut file)).await;
            // Flush even on failure so the partial size can be measured.
            let flushed = file.flush().await;
            dump.map_err(|e| e.context("database dump failed"))?;
            flushed?;
            file.sync_all().await?;
            Ok::<_, Error>(version)
        }
        .await;

        if let Err(e) = session.close().await {
            warn!(backup_id = %id, error = %e, "Failed to close database session");
        }
        if let Ok(meta) = tokio::fs::metadata(&dump_path).await {
            result.size = meta.len();
        }
        let version = dumped?;

        self.enter(RunState::Compressing);
        let compression = self.config.compression;
        let artifact = self.compress(cancel, &dump_path, compression).await?;
        result.compressed_size = tokio::fs::metadata(&artifact).await?.len();

        self.enter(RunState::Checksumming);
        result.checksum = match cancellable(cancel, async { Ok::<_, Error>(sha256_file(&artifact).await?) }).await {
            Ok(checksum) => checksum,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(backup_id = %id, error = %e, "Failed to calculate checksum");
                String::new()
            }
        };

        self.enter(RunState::Persisting);
        let key = format!("{id}.{}{}", self.driver.extension(), compression.extension());
        self.upload(cancel, &key, &artifact)
            .await
            .map_err(|e| e.context("failed to write backup to storage"))?;

        let mut record = BackupRecord::new(
            id.clone(),
            result.timestamp,
            SourceInfo {
                name: self.driver.source_name(),
                host: self.driver.source_host(),
                version,
            },
        );
        record.artifact.method = self.driver.kind().as_str().to_string();
        record.artifact.format = self.driver.format().to_string();
        record.artifact.compression = compression.as_str().to_string();
        result.duration = clock.elapsed();
        record.set_artifact_sizes(result.size, result.compressed_size, result.duration, &result.checksum);
        let (keep_until, tier) = self.rotator.retention_info(result.timestamp);
        record.set_retention(keep_until, tier);
        record.add_file(key);
        record.add_file(metadata_key(&id));

        result.metadata_persisted = match self.persist_metadata(cancel, &record).await {
            Ok(()) => true,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(backup_id = %id, error = %e, "Failed to write metadata");
                false
            }
        };

        if self.config.verify_after_backup {
            self.enter(RunState::Verifying);
            info!(backup_id = %id, "Verifying backup integrity");
            match cancellable(cancel, self.validator().verify_restore_integrity(&record)).await {
                Ok(()) => {
                    result.verified = true;
                    info!(backup_id = %id, "Backup verified");
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    error!(backup_id = %id, error = %e, "Backup verification failed");
                    let message = format!("backup verification failed: {e}");
                    if let Some(notifier) = &self.notifier {
                        notifier.notify_failure(&id, &message).await;
                    }
                    result.verify_error = Some(message);
                }
            }
        }

        Ok(())
    }

    /// Compress the dump in place, returning the canonical artifact path.
    /// The uncompressed dump is removed once the compressed copy exists.
    async fn compress(
        &self,
        cancel: &CancellationToken,
        dump: &Path,
        compression: Compression,
    ) -> Result<PathBuf> {
        if compression == Compression::None {
            return Ok(dump.to_path_buf());
        }

        let mut target = dump.as_os_str().to_owned();
        target.push(compression.extension());
        let target = PathBuf::from(target);

        cancellable(cancel, compress_file(dump, &target, compression))
            .await
            .map_err(|e| e.context("compression failed"))?;
        tokio::fs::remove_file(dump).await?;
        Ok(target)
    }

    async fn upload(&self, cancel: &CancellationToken, key: &str, path: &Path) -> Result<u64> {
        retry(cancel, &self.config.retry, "upload", || {
            cancellable(cancel, async move {
                let file = tokio::fs::File::open(path).await?;
                Ok::<_, Error>(self.storage.write(key, Box::new(file)).await?)
            })
        })
        .await
    }

    async fn persist_metadata(&self, cancel: &CancellationToken, record: &BackupRecord) -> Result<()> {
        let json = record.to_json()?;
        let key = record.metadata_key();
        retry(cancel, &self.config.retry, "write metadata", || {
            let json = json.clone();
            let key = key.as_str();
            cancellable(cancel, async move {
                self.storage
                    .write(key, Box::new(std::io::Cursor::new(json)))
                    .await?;
                Ok::<_, Error>(())
            })
        })
        .await
    }

    /// Delete every backup the retention policy no longer protects.
    ///
    /// Returns the number of backups whose files were all deleted. A failed
    /// delete is logged and the pass continues with the remaining files.
    pub async fn cleanup(&self, cancel: &CancellationToken) -> Result<usize> {
        info!("Running backup cleanup");

        let records = self
            .list_backups(cancel)
            .await
            .map_err(|e| e.context("failed to list backups"))?;
        let plan = self.rotator.plan(records, Utc::now());
        info!(plan = %plan.summary(), "Retention plan computed");

        let mut deleted = 0;
        for record in &plan.delete {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            info!(backup_id = %record.id, "Deleting old backup");

            let mut failures = 0;
            for file in &record.files {
                let outcome = cancellable(cancel, async { Ok::<_, Error>(self.storage.delete(file).await?) }).await;
                match outcome {
                    Ok(()) => {}
                    Err(e) if e.is_cancelled() => return Err(e),
                    Err(e) => {
                        failures += 1;
                        warn!(backup_id = %record.id, file = %file, error = %e, "Failed to delete backup file");
                    }
                }
            }

            if failures == 0 {
                deleted += 1;
            } else {
                warn!(backup_id = %record.id, failures, "Backup only partially deleted");
            }
        }

        info!(deleted, "Cleanup completed");
        Ok(deleted)
    }

    /// All readable metadata records, newest first. Unreadable or malformed
    /// metadata objects are logged and skipped.
    pub async fn list_backups(&self, cancel: &CancellationToken) -> Result<Vec<BackupRecord>> {
        let objects = cancellable(cancel, async { Ok::<_, Error>(self.storage.list("").await?) }).await?;

        let mut records = Vec::new();
        for object in objects.iter().filter(|o| o.key.ends_with(META_SUFFIX)) {
            let data = match cancellable(cancel, async {
                Ok::<_, Error>(read_to_vec(self.storage.as_ref(), &object.key).await?)
            })
            .await
            {
                Ok(data) => data,
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(key = %object.key, error = %e, "Failed to read metadata file");
                    continue;
                }
            };

            match BackupRecord::from_json(&data) {
                Ok(record) => records.push(record),
                Err(e) => warn!(key = %object.key, error = %e, "Failed to parse metadata"),
            }
        }

        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
        Ok(records)
    }

    pub async fn get_backup(&self, cancel: &CancellationToken, id: &str) -> Result<BackupRecord> {
        load_record(self.storage.as_ref(), cancel, id).await
    }
}

/// Load the metadata record of backup `id`.
pub(crate) async fn load_record(
    storage: &dyn Storage,
    cancel: &CancellationToken,
    id: &str,
) -> Result<BackupRecord> {
    let key = metadata_key(id);
    let data = cancellable(cancel, async {
        read_to_vec(storage, &key).await.map_err(|e| {
            if e.is_not_found() {
                Error::NotFound(id.to_string())
            } else {
                Error::from(e).context("failed to read metadata")
            }
        })
    })
    .await?;
    Ok(BackupRecord::from_json(&data)?)
}
