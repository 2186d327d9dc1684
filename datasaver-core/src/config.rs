//! Configuration management.
//!
//! Loads configuration from a TOML file, then applies `DATASAVER_*`
//! environment overrides, then validates.

use crate::database::DatabaseKind;
use crate::executor::EngineConfig;
use crate::retry::RetryConfig;
use crate::rotation::RetentionPolicy;
use crate::storage::{LocalStorage, Storage};
use crate::transfer::Compression;
use crate::utils::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,

    /// Five-field cron expression
    pub schedule: String,

    pub storage: StorageConfig,
    pub retention: RetentionConfig,

    /// Compression algorithm (gzip, zstd, none)
    pub compression: String,

    pub monitoring: MonitoringConfig,
    pub backup: BackupConfig,
    pub retry: RetrySettings,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// postgres, postgresql, pg, sqlite, sqlite3
    #[serde(rename = "type")]
    pub db_type: String,
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    /// Full connection URL; takes precedence over host/port/name/user
    pub url: String,
    /// SQLite database file
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Only "local" is supported
    pub backend: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub daily: u32,
    pub weekly: u32,
    pub monthly: u32,
    pub max_age_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// POST target for backup events; empty disables notifications
    pub webhook_url: String,

    /// Health turns degraded when the last success is older than this
    pub alert_after_hours: u32,

    pub health_port: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Load every new backup into a scratch database before reporting success
    pub verify_after_backup: bool,

    /// Check the stored checksum before restoring
    pub verify_checksum: bool,

    /// Scratch directory for dumps (default: system temp dir)
    pub temp_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_wait_ms: u64,
    pub max_wait_ms: u64,
    pub multiplier: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            schedule: "0 2 * * *".to_string(),
            storage: StorageConfig::default(),
            retention: RetentionConfig::default(),
            compression: "gzip".to_string(),
            monitoring: MonitoringConfig::default(),
            backup: BackupConfig::default(),
            retry: RetrySettings::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            db_type: "postgres".to_string(),
            host: "localhost".to_string(),
            port: 5432,
            name: String::new(),
            user: String::new(),
            password: String::new(),
            url: String::new(),
            path: String::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "local".to_string(),
            path: PathBuf::from("/backups"),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            daily: 7,
            weekly: 4,
            monthly: 6,
            max_age_days: 90,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            alert_after_hours: 26,
            health_port: 8080,
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_wait_ms: 1000,
            max_wait_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl DatabaseConfig {
    pub fn kind(&self) -> Result<DatabaseKind> {
        self.db_type.parse()
    }

    pub fn is_sqlite(&self) -> bool {
        matches!(self.kind(), Ok(DatabaseKind::Sqlite))
    }
}

impl StorageConfig {
    pub fn open(&self) -> Result<Arc<dyn Storage>> {
        match self.backend.as_str() {
            "local" => Ok(Arc::new(LocalStorage::new(self.path.clone())?)),
            other => Err(Error::Config(format!(
                "storage backend must be 'local' (got '{other}')"
            ))),
        }
    }
}

impl Config {
    /// Defaults, then the TOML file (if any), then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read config file {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("failed to parse config: {e}")))
    }

    /// Apply `DATASAVER_*` overrides. Unparseable numbers are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let flag = |v: String| v.eq_ignore_ascii_case("true");

        if let Some(v) = get("DATASAVER_DB_TYPE") {
            self.database.db_type = v;
        }
        if let Some(v) = get("DATASAVER_DATABASE_URL") {
            self.database.url = v;
        }
        if let Some(v) = get("DATASAVER_DB_HOST") {
            self.database.host = v;
        }
        if let Some(v) = get("DATASAVER_DB_PATH") {
            self.database.path = v;
        }
        if let Some(v) = get("DATASAVER_DB_PORT").and_then(|v| v.parse().ok()) {
            self.database.port = v;
        }
        if let Some(v) = get("DATASAVER_DB_NAME") {
            self.database.name = v;
        }
        if let Some(v) = get("DATASAVER_DB_USER") {
            self.database.user = v;
        }
        if let Some(v) = get("DATASAVER_DB_PASSWORD") {
            self.database.password = v;
        }
        if let Some(v) = get("DATASAVER_SCHEDULE") {
            self.schedule = v;
        }
        if let Some(v) = get("DATASAVER_STORAGE_BACKEND") {
            self.storage.backend = v;
        }
        if let Some(v) = get("DATASAVER_STORAGE_PATH") {
            self.storage.path = PathBuf::from(v);
        }
        if let Some(v) = get("DATASAVER_KEEP_DAILY").and_then(|v| v.parse().ok()) {
            self.retention.daily = v;
        }
        if let Some(v) = get("DATASAVER_KEEP_WEEKLY").and_then(|v| v.parse().ok()) {
            self.retention.weekly = v;
        }
        if let Some(v) = get("DATASAVER_KEEP_MONTHLY").and_then(|v| v.parse().ok()) {
            self.retention.monthly = v;
        }
        if let Some(v) = get("DATASAVER_MAX_AGE_DAYS").and_then(|v| v.parse().ok()) {
            self.retention.max_age_days = v;
        }
        if let Some(v) = get("DATASAVER_COMPRESSION") {
            self.compression = v;
        }
        if let Some(v) = get("DATASAVER_WEBHOOK_URL") {
            self.monitoring.webhook_url = v;
        }
        if let Some(v) = get("DATASAVER_ALERT_AFTER_HOURS").and_then(|v| v.parse().ok()) {
            self.monitoring.alert_after_hours = v;
        }
        if let Some(v) = get("DATASAVER_HEALTH_PORT").and_then(|v| v.parse().ok()) {
            self.monitoring.health_port = v;
        }
        if let Some(v) = get("DATASAVER_VERIFY_BACKUP") {
            self.backup.verify_after_backup = flag(v);
        }
        if let Some(v) = get("DATASAVER_VERIFY_CHECKSUM") {
            self.backup.verify_checksum = flag(v);
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self.database.kind()? {
            DatabaseKind::Postgres => {
                if self.database.url.is_empty() && self.database.name.is_empty() {
                    return Err(Error::Config(
                        "database name or URL is required for PostgreSQL".into(),
                    ));
                }
            }
            DatabaseKind::Sqlite => {
                if self.database.path.is_empty() && self.database.name.is_empty() {
                    return Err(Error::Config("database path is required for SQLite".into()));
                }
            }
        }

        if self.storage.backend != "local" {
            return Err(Error::Config(format!(
                "storage backend must be 'local' (got '{}')",
                self.storage.backend
            )));
        }

        self.compression()?;

        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.retry.multiplier.is_nan() || self.retry.multiplier < 1.0 {
            return Err(Error::Config("retry.multiplier must be >= 1.0".into()));
        }

        Ok(())
    }

    pub fn compression(&self) -> Result<Compression> {
        self.compression.parse()
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy::new(
            self.retention.daily,
            self.retention.weekly,
            self.retention.monthly,
            self.retention.max_age_days,
        )
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.retry.max_attempts,
            initial_wait: Duration::from_millis(self.retry.initial_wait_ms),
            max_wait: Duration::from_millis(self.retry.max_wait_ms),
            multiplier: self.retry.multiplier,
        }
    }

    /// Immutable settings the engine is built from.
    pub fn engine_config(&self) -> Result<EngineConfig> {
        Ok(EngineConfig {
            compression: self.compression()?,
            verify_after_backup: self.backup.verify_after_backup,
            retention: self.retention_policy(),
            retry: self.retry_config(),
            temp_dir: self.backup.temp_dir.clone(),
        })
    }

    /// How long without a successful backup before health degrades.
    pub fn alert_after(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.monitoring.alert_after_hours))
    }
}
