//! Restore a stored backup into a database.

use crate::database::Driver;
use crate::executor::load_record;
use crate::storage::Storage;
use crate::transfer::sha256_file;
use crate::utils::errors::{Error, Result};
use crate::validator::{download, scratch_dir, unpack};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    pub backup_id: String,
    /// Target database (SQLite path or PostgreSQL database name); the
    /// configured source when `None`
    pub target: Option<String>,
    /// Resolve the backup and stop before downloading anything
    pub dry_run: bool,
    /// Compare the stored checksum before touching the target
    pub verify_checksum: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreResult {
    pub backup_id: String,
    pub target: Option<String>,
    pub artifact: String,
    pub dry_run: bool,
    /// `None` when no checksum was compared
    pub checksum_valid: Option<bool>,
}

pub struct Restorer {
    storage: Arc<dyn Storage>,
    driver: Arc<dyn Driver>,
    temp_dir: Option<PathBuf>,
}

impl Restorer {
    pub fn new(storage: Arc<dyn Storage>, driver: Arc<dyn Driver>) -> Self {
        Self {
            storage,
            driver,
            temp_dir: None,
        }
    }

    pub fn with_temp_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.temp_dir = dir;
        self
    }

    pub async fn restore(&self, cancel: &CancellationToken, opts: &RestoreOptions) -> Result<RestoreResult> {
        info!(backup_id = %opts.backup_id, target = ?opts.target, "Starting restore");

        let record = load_record(self.storage.as_ref(), cancel, &opts.backup_id).await?;
        let key = record
            .canonical_file()
            .ok_or_else(|| Error::Integrity(format!("backup {} lists no data file", record.id)))?
            .to_string();

        let mut result = RestoreResult {
            backup_id: record.id.clone(),
            target: opts.target.clone(),
            artifact: key.clone(),
            dry_run: opts.dry_run,
            checksum_valid: None,
        };

        if opts.dry_run {
            info!(backup_id = %record.id, artifact = %key, "Dry run, target left untouched");
            return Ok(result);
        }

        let scratch = scratch_dir(self.temp_dir.as_deref(), "datasaver-restore-")?;
        let work = async {
            let downloaded = download(self.storage.as_ref(), &key, scratch.path())
                .await
                .map_err(|e| e.context(format!("failed to download {key}")))?;

            if opts.verify_checksum {
                if record.artifact.checksum.is_empty() {
                    warn!(backup_id = %record.id, "No checksum recorded, skipping verification");
                } else {
                    let actual = sha256_file(&downloaded).await?;
                    if actual != record.artifact.checksum {
                        result.checksum_valid = Some(false);
                        return Err(Error::Integrity(format!(
                            "checksum mismatch for {key}: expected {}, got {actual}",
                            record.artifact.checksum
                        )));
                    }
                    result.checksum_valid = Some(true);
                    info!(backup_id = %record.id, "Checksum verified");
                }
            }

            let plain = unpack(&downloaded, &key, scratch.path()).await?;
            self.driver
                .restore(&plain, opts.target.as_deref())
                .await
                .map_err(|e| e.context("restore failed"))
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            outcome = work => outcome?,
        }

        info!(backup_id = %record.id, "Restore completed");
        Ok(result)
    }
}
