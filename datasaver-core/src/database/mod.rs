//! Database driver contract and adapters.
//!
//! The engine only needs to connect, read a version string and stream a dump
//! into a sink. Restore verification and real restores reuse the same driver
//! so a verified artifact is loaded exactly the way a restore would load it.

pub mod postgres;
pub mod sqlite;

use crate::config::DatabaseConfig;
use crate::utils::errors::{Error, Result};
use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::AsyncWrite;

pub use postgres::PostgresDriver;
pub use sqlite::SqliteDriver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseKind {
    Postgres,
    Sqlite,
}

impl DatabaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseKind::Postgres => "postgres",
            DatabaseKind::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatabaseKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "" | "postgres" | "postgresql" | "pg" => Ok(DatabaseKind::Postgres),
            "sqlite" | "sqlite3" => Ok(DatabaseKind::Sqlite),
            other => Err(Error::Config(format!(
                "unsupported database type: {other} (supported: postgres, sqlite)"
            ))),
        }
    }
}

#[async_trait]
pub trait Driver: Send + Sync {
    fn kind(&self) -> DatabaseKind;

    /// Dump format recorded in metadata.
    fn format(&self) -> &'static str;

    /// Artifact extension without the dot, before any compression suffix.
    fn extension(&self) -> &'static str;

    /// Database name as recorded in metadata.
    fn source_name(&self) -> String;

    /// Database host as recorded in metadata.
    fn source_host(&self) -> String;

    async fn connect(&self) -> Result<Box<dyn Session>>;

    /// Load an uncompressed artifact into a throwaway database and run the
    /// engine's own consistency check.
    async fn verify_restore(&self, artifact: &Path) -> Result<()>;

    /// Restore an uncompressed artifact into `target`, or into the configured
    /// database when `target` is `None`.
    async fn restore(&self, artifact: &Path, target: Option<&str>) -> Result<()>;
}

/// An open connection to the source database.
#[async_trait]
pub trait Session: Send {
    async fn version(&mut self) -> Result<String>;

    async fn dump(&mut self, sink: &mut (dyn AsyncWrite + Send + Unpin)) -> Result<()>;

    async fn close(self: Box<Self>) -> Result<()>;
}

/// Build the driver named by the configuration. Scratch copies made while
/// dumping go under `temp_dir` when it is set.
pub fn create_driver(config: &DatabaseConfig, temp_dir: Option<&Path>) -> Result<Arc<dyn Driver>> {
    match config.kind()? {
        DatabaseKind::Postgres => Ok(Arc::new(PostgresDriver::new(config.clone())?)),
        DatabaseKind::Sqlite => {
            let mut driver = SqliteDriver::from_config(config)?;
            if let Some(dir) = temp_dir {
                driver = driver.with_temp_dir(dir);
            }
            Ok(Arc::new(driver))
        }
    }
}
