//! Integrity checks for stored backups.
//!
//! [`Validator::validate`] is the cheap check (presence, size, checksum) and
//! never short-circuits after the existence check: every finding is reported.
//! [`Validator::verify_restore_integrity`] is the expensive one and loads the
//! artifact into a throwaway database through the driver.

use crate::database::Driver;
use crate::models::BackupRecord;
use crate::storage::Storage;
use crate::transfer::{decompress_file, sha256_reader, Compression};
use crate::utils::errors::{Error, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub backup_id: String,
    pub valid: bool,
    pub file_exists: bool,
    pub size_match: bool,
    pub checksum_ok: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    fn fail(&mut self, error: impl Into<String>) {
        self.valid = false;
        self.errors.push(error.into());
    }
}

#[derive(Clone)]
pub struct Validator {
    storage: Arc<dyn Storage>,
    driver: Option<Arc<dyn Driver>>,
    temp_dir: Option<PathBuf>,
}

impl Validator {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            driver: None,
            temp_dir: None,
        }
    }

    /// Driver used to load artifacts during restore verification.
    pub fn with_driver(mut self, driver: Arc<dyn Driver>) -> Self {
        self.driver = Some(driver);
        self
    }

    pub fn with_temp_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.temp_dir = dir;
        self
    }

    /// Check presence, size and checksum of the record's data file.
    ///
    /// Findings land in the returned result; `Err` is reserved for storage
    /// failures that prevent a check from running at all.
    pub async fn validate(&self, record: &BackupRecord) -> Result<ValidationResult> {
        let mut result = ValidationResult {
            backup_id: record.id.clone(),
            valid: true,
            ..ValidationResult::default()
        };

        if record.files.is_empty() {
            result.fail("no files listed in metadata");
            return Ok(result);
        }

        let Some(key) = record.canonical_file() else {
            result.fail("backup file not found in metadata");
            return Ok(result);
        };

        result.file_exists = self
            .storage
            .exists(key)
            .await
            .map_err(|e| Error::from(e).context("failed to check file existence"))?;
        if !result.file_exists {
            result.fail(format!("backup file {key} does not exist"));
            return Ok(result);
        }

        let size = self
            .storage
            .size(key)
            .await
            .map_err(|e| Error::from(e).context("failed to get file size"))?;
        result.size_match = size == record.artifact.stored_size_bytes;
        if !result.size_match {
            result.fail(format!(
                "size mismatch: expected {}, got {size}",
                record.artifact.stored_size_bytes
            ));
        }

        if record.artifact.checksum.is_empty() {
            result.checksum_ok = true;
        } else {
            let mut reader = self
                .storage
                .read(key)
                .await
                .map_err(|e| Error::from(e).context("failed to read backup file"))?;
            match sha256_reader(&mut reader).await {
                Ok(actual) => {
                    result.checksum_ok = actual == record.artifact.checksum;
                    if !result.checksum_ok {
                        result.fail(format!(
                            "checksum mismatch: expected {}, got {actual}",
                            record.artifact.checksum
                        ));
                    }
                }
                Err(e) => {
                    warn!(backup_id = %record.id, error = %e, "Failed to calculate checksum");
                    result.fail(format!("failed to calculate checksum: {e}"));
                }
            }
        }

        debug!(
            backup_id = %record.id,
            valid = result.valid,
            errors = result.errors.len(),
            "Validation finished"
        );
        Ok(result)
    }

    /// Load the artifact into a disposable database and run the engine's
    /// consistency check. Every failure is reported as [`Error::Integrity`].
    pub async fn verify_restore_integrity(&self, record: &BackupRecord) -> Result<()> {
        let driver = self
            .driver
            .as_ref()
            .ok_or_else(|| Error::Config("restore verification requires a database driver".into()))?;
        let key = record
            .canonical_file()
            .ok_or_else(|| Error::Integrity("no backup file found in metadata".into()))?;

        let scratch = scratch_dir(self.temp_dir.as_deref(), "datasaver-verify-")?;
        let artifact = self
            .fetch(key, scratch.path())
            .await
            .map_err(|e| Error::Integrity(format!("failed to prepare {key}: {e}")))?;

        driver.verify_restore(&artifact).await.map_err(|e| match e {
            Error::Integrity(_) | Error::Cancelled => e,
            other => Error::Integrity(format!("restore verification of {key} failed: {other}")),
        })
    }

    async fn fetch(&self, key: &str, dir: &Path) -> Result<PathBuf> {
        let downloaded = download(self.storage.as_ref(), key, dir).await?;
        unpack(&downloaded, key, dir).await
    }
}

/// Copy object `key` into `dir`, returning the local path.
pub(crate) async fn download(storage: &dyn Storage, key: &str, dir: &Path) -> Result<PathBuf> {
    let path = dir.join(format!("download-{}", file_name(key)));
    let mut reader = storage.read(key).await?;
    let mut file = tokio::fs::File::create(&path).await?;
    tokio::io::copy(&mut reader, &mut file).await?;
    file.flush().await?;
    Ok(path)
}

/// Decompress a downloaded artifact according to its key and remove the
/// download. The result keeps the inner extension (`.db`, `.dump`) drivers
/// use to pick a loader.
pub(crate) async fn unpack(downloaded: &Path, key: &str, dir: &Path) -> Result<PathBuf> {
    let compression = Compression::from_key(key);
    let plain = dir.join(compression.strip_extension(file_name(key)));
    decompress_file(downloaded, &plain, compression).await?;
    tokio::fs::remove_file(downloaded).await?;
    Ok(plain)
}

fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// A temp directory removed on drop, under `base` when given.
pub(crate) fn scratch_dir(base: Option<&Path>, prefix: &str) -> Result<tempfile::TempDir> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(prefix);
    let dir = match base {
        Some(base) => builder.tempdir_in(base)?,
        None => builder.tempdir()?,
    };
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::SqliteDriver;
    use crate::models::SourceInfo;
    use crate::storage::LocalStorage;
    use crate::transfer::compress_file;
    use chrono::Utc;
    use tempfile::TempDir;

    fn record(files: &[&str], stored: u64, checksum: &str) -> BackupRecord {
        let mut record = BackupRecord::new(
            "backup_20240101_020000",
            Utc::now(),
            SourceInfo {
                name: "app".into(),
                host: "localhost".into(),
                version: "3.45".into(),
            },
        );
        for f in files {
            record.add_file(*f);
        }
        record.artifact.stored_size_bytes = stored;
        record.artifact.checksum = checksum.to_string();
        record
    }

    async fn store(dir: &TempDir, key: &str, data: &[u8]) -> Arc<dyn Storage> {
        let storage = LocalStorage::new(dir.path()).unwrap();
        storage
            .write(key, Box::new(std::io::Cursor::new(data.to_vec())))
            .await
            .unwrap();
        Arc::new(storage)
    }

    #[tokio::test]
    async fn test_valid_then_flipped_byte() {
        let dir = TempDir::new().unwrap();
        let data = b"backup payload bytes".to_vec();
        let mut slice: &[u8] = &data;
        let checksum = sha256_reader(&mut slice).await.unwrap();
        let storage = store(&dir, "backup.db.gz", &data).await;
        let validator = Validator::new(storage);

        let rec = record(
            &["backup.db.gz", "backup_20240101_020000.meta.json"],
            data.len() as u64,
            &checksum,
        );
        let result = validator.validate(&rec).await.unwrap();
        assert!(result.valid, "{:?}", result.errors);
        assert!(result.file_exists && result.size_match && result.checksum_ok);

        let mut flipped = data.clone();
        flipped[3] ^= 0xff;
        std::fs::write(dir.path().join("backup.db.gz"), &flipped).unwrap();

        let result = validator.validate(&rec).await.unwrap();
        assert!(!result.valid);
        assert!(result.size_match);
        assert!(!result.checksum_ok);
        assert_eq!(result.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_files_fails_closed() {
        struct Unreachable;

        #[async_trait::async_trait]
        impl Storage for Unreachable {
            async fn write(&self, _: &str, _: crate::storage::ByteSource) -> crate::storage::StorageResult<u64> {
                panic!("unexpected storage call")
            }
            async fn read(&self, _: &str) -> crate::storage::StorageResult<crate::storage::ByteSource> {
                panic!("unexpected storage call")
            }
            async fn delete(&self, _: &str) -> crate::storage::StorageResult<()> {
                panic!("unexpected storage call")
            }
            async fn list(&self, _: &str) -> crate::storage::StorageResult<Vec<crate::storage::ObjectInfo>> {
                panic!("unexpected storage call")
            }
            async fn exists(&self, _: &str) -> crate::storage::StorageResult<bool> {
                panic!("unexpected storage call")
            }
            async fn size(&self, _: &str) -> crate::storage::StorageResult<u64> {
                panic!("unexpected storage call")
            }
        }

        let validator = Validator::new(Arc::new(Unreachable));

        let result = validator.validate(&record(&[], 0, "")).await.unwrap();
        assert!(!result.valid);
        assert!(!result.errors.is_empty());

        let result = validator
            .validate(&record(&["backup_20240101_020000.meta.json"], 0, ""))
            .await
            .unwrap();
        assert!(!result.valid);
        assert!(!result.file_exists);
    }

    #[tokio::test]
    async fn test_missing_file_stops_early() {
        let dir = TempDir::new().unwrap();
        let storage = store(&dir, "other.db", b"x").await;
        let validator = Validator::new(storage);

        let result = validator
            .validate(&record(&["backup.db"], 1, "sha256:00"))
            .await
            .unwrap();
        assert!(!result.valid);
        assert!(!result.file_exists);
        assert!(!result.size_match);
        assert!(!result.checksum_ok);
        assert_eq!(result.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_size_mismatch_accumulates_with_vacuous_checksum() {
        let dir = TempDir::new().unwrap();
        let storage = store(&dir, "backup.db", &[]).await;
        let validator = Validator::new(storage);

        let result = validator.validate(&record(&["backup.db"], 1000, "")).await.unwrap();
        assert!(!result.valid);
        assert!(result.file_exists);
        assert!(!result.size_match);
        assert!(result.checksum_ok);
    }

    #[tokio::test]
    async fn test_verify_restore_sqlite_snapshot() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("source.db");
        {
            let conn = rusqlite::Connection::open(&db).unwrap();
            conn.execute_batch("CREATE TABLE t (v TEXT); INSERT INTO t VALUES ('a');")
                .unwrap();
        }
        let compressed = dir.path().join("source.db.gz");
        compress_file(&db, &compressed, Compression::Gzip).await.unwrap();

        let storage_dir = TempDir::new().unwrap();
        let storage = store(&storage_dir, "backup.db.gz", &std::fs::read(&compressed).unwrap()).await;
        let validator = Validator::new(storage).with_driver(Arc::new(SqliteDriver::new(&db)));

        validator
            .verify_restore_integrity(&record(&["backup.db.gz"], 0, ""))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_verify_restore_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let storage = store(&dir, "backup.db", b"definitely not a database file").await;
        let validator = Validator::new(storage).with_driver(Arc::new(SqliteDriver::new("unused.db")));

        let err = validator
            .verify_restore_integrity(&record(&["backup.db"], 0, ""))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Integrity(_)), "{err}");
    }
}
