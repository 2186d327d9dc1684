//! PostgreSQL adapter driving the client tools (`psql`, `pg_dump`,
//! `pg_restore`) as child processes.

use super::{DatabaseKind, Driver, Session};
use crate::config::DatabaseConfig;
use crate::utils::errors::{Error, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct PostgresDriver {
    config: DatabaseConfig,
}

impl PostgresDriver {
    pub fn new(config: DatabaseConfig) -> Result<Self> {
        if config.url.is_empty() && config.name.is_empty() {
            return Err(Error::Config(
                "database name or URL is required for PostgreSQL".into(),
            ));
        }
        Ok(Self { config })
    }

    /// Connection arguments shared by every client tool.
    fn connection_args(&self, database: Option<&str>) -> Vec<String> {
        if !self.config.url.is_empty() && database.is_none() {
            return vec![format!("--dbname={}", self.config.url)];
        }
        let mut args = Vec::new();
        if !self.config.host.is_empty() {
            args.push(format!("--host={}", self.config.host));
        }
        if self.config.port != 0 {
            args.push(format!("--port={}", self.config.port));
        }
        if !self.config.user.is_empty() {
            args.push(format!("--username={}", self.config.user));
        }
        args.push(format!(
            "--dbname={}",
            database.unwrap_or(self.config.name.as_str())
        ));
        args
    }

    fn command(&self, program: &str) -> Command {
        let mut cmd = Command::new(program);
        cmd.kill_on_drop(true).stdin(Stdio::null());
        if !self.config.password.is_empty() {
            cmd.env("PGPASSWORD", &self.config.password);
        }
        cmd
    }

    async fn query(&self, sql: &str) -> Result<String> {
        let output = self
            .command("psql")
            .args(self.connection_args(None))
            .args(["--no-psqlrc", "--tuples-only", "--no-align", "--command", sql])
            .output()
            .await
            .map_err(|e| Error::Database(format!("failed to run psql: {e}")))?;
        if !output.status.success() {
            return Err(Error::Database(format!(
                "psql failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// `SHOW server_version` output such as `16.2 (Debian 16.2-1.pgdg120+2)`.
fn parse_version(raw: &str) -> String {
    raw.split_whitespace()
        .next()
        .unwrap_or(raw)
        .to_string()
}

#[async_trait]
impl Driver for PostgresDriver {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Postgres
    }

    fn format(&self) -> &'static str {
        "custom"
    }

    fn extension(&self) -> &'static str {
        "dump"
    }

    fn source_name(&self) -> String {
        self.config.name.clone()
    }

    fn source_host(&self) -> String {
        self.config.host.clone()
    }

    async fn connect(&self) -> Result<Box<dyn Session>> {
        self.query("SELECT 1")
            .await
            .map_err(|e| e.context("failed to connect to database"))?;
        Ok(Box::new(PostgresSession {
            driver: self.clone(),
        }))
    }

    async fn verify_restore(&self, artifact: &Path) -> Result<()> {
        let output = self
            .command("pg_restore")
            .arg("--list")
            .arg(artifact)
            .output()
            .await
            .map_err(|e| Error::Database(format!("failed to run pg_restore: {e}")))?;
        if !output.status.success() {
            return Err(Error::Integrity(format!(
                "pg_restore validation failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        if output.stdout.is_empty() {
            return Err(Error::Integrity("backup appears to be empty".into()));
        }
        let entries = output.stdout.iter().filter(|b| **b == b'\n').count();
        debug!(entries, "postgres backup verified");
        Ok(())
    }

    async fn restore(&self, artifact: &Path, target: Option<&str>) -> Result<()> {
        let output = self
            .command("pg_restore")
            .args(self.connection_args(target))
            .args(["--clean", "--if-exists", "--no-owner"])
            .arg(artifact)
            .output()
            .await
            .map_err(|e| Error::Database(format!("failed to run pg_restore: {e}")))?;
        if !output.status.success() {
            return Err(Error::Database(format!(
                "pg_restore failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

pub struct PostgresSession {
    driver: PostgresDriver,
}

#[async_trait]
impl Session for PostgresSession {
    async fn version(&mut self) -> Result<String> {
        let raw = self.driver.query("SHOW server_version").await?;
        Ok(parse_version(&raw))
    }

    async fn dump(&mut self, sink: &mut (dyn AsyncWrite + Send + Unpin)) -> Result<()> {
        let mut child = self
            .driver
            .command("pg_dump")
            .args(self.driver.connection_args(None))
            .args(["--format=custom", "--no-owner"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Database(format!("failed to run pg_dump: {e}")))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Database("pg_dump stdout unavailable".into()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Database("pg_dump stderr unavailable".into()))?;

        let mut errors = Vec::new();
        let (copied, _) = tokio::join!(
            tokio::io::copy(&mut stdout, &mut *sink),
            stderr.read_to_end(&mut errors)
        );
        let status = child.wait().await?;

        if !status.success() {
            return Err(Error::Database(format!(
                "pg_dump failed: {}",
                String::from_utf8_lossy(&errors).trim()
            )));
        }
        copied?;
        sink.flush().await?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DatabaseConfig {
        DatabaseConfig {
            db_type: "postgres".into(),
            host: "db.internal".into(),
            port: 5433,
            name: "app".into(),
            user: "backup".into(),
            password: "secret".into(),
            ..DatabaseConfig::default()
        }
    }

    #[test]
    fn test_requires_name_or_url() {
        let cfg = DatabaseConfig {
            name: String::new(),
            url: String::new(),
            ..config()
        };
        assert!(matches!(PostgresDriver::new(cfg), Err(Error::Config(_))));
    }

    #[test]
    fn test_connection_args() {
        let driver = PostgresDriver::new(config()).unwrap();
        assert_eq!(
            driver.connection_args(None),
            vec![
                "--host=db.internal",
                "--port=5433",
                "--username=backup",
                "--dbname=app"
            ]
        );
        assert_eq!(driver.connection_args(Some("scratch")).last().unwrap(), "--dbname=scratch");

        let driver = PostgresDriver::new(DatabaseConfig {
            url: "postgres://u:p@h/db".into(),
            ..config()
        })
        .unwrap();
        assert_eq!(driver.connection_args(None), vec!["--dbname=postgres://u:p@h/db"]);
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("16.2 (Debian 16.2-1.pgdg120+2)"), "16.2");
        assert_eq!(parse_version("15.4"), "15.4");
    }
}
