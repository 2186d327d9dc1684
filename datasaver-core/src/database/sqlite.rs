//! SQLite adapter built on rusqlite.
//!
//! Dumps are online snapshots taken with the SQLite backup API, so the artifact
//! is itself a database file. Plain `.sql` text dumps are still accepted for
//! verification and restore.

use super::{DatabaseKind, Driver, Session};
use crate::config::DatabaseConfig;
use crate::utils::errors::{Error, Result};
use crate::validator::scratch_dir;
use async_trait::async_trait;
use rusqlite::backup::Progress;
use rusqlite::{Connection, DatabaseName, OpenFlags};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct SqliteDriver {
    path: PathBuf,
    /// Parent of the snapshot scratch dir; the system temp dir when unset
    temp_dir: Option<PathBuf>,
}

impl SqliteDriver {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            temp_dir: None,
        }
    }

    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    pub fn from_config(config: &DatabaseConfig) -> Result<Self> {
        let path = if config.path.is_empty() {
            &config.name
        } else {
            &config.path
        };
        if path.is_empty() {
            return Err(Error::Config("database path is required for SQLite".into()));
        }
        Ok(Self::new(path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_only_flags() -> OpenFlags {
    OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX
}

fn is_sql_text(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("sql"))
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Database(format!("sqlite task failed: {e}")))?
}

fn integrity_check(conn: &Connection) -> Result<()> {
    let result: String = conn
        .query_row("PRAGMA integrity_check", [], |row| row.get(0))
        .map_err(|e| Error::Integrity(format!("integrity check failed: {e}")))?;
    if result != "ok" {
        return Err(Error::Integrity(format!("integrity check failed: {result}")));
    }
    let tables: i64 = conn
        .query_row("SELECT count(*) FROM sqlite_master", [], |row| row.get(0))
        .map_err(|e| Error::Integrity(format!("catalog unreadable: {e}")))?;
    debug!(tables, "sqlite backup verified");
    Ok(())
}

/// Load `artifact` into a fresh in-memory database and check it.
fn verify_artifact(artifact: &Path) -> Result<()> {
    let mut conn = Connection::open_in_memory()?;
    if is_sql_text(artifact) {
        let sql = std::fs::read_to_string(artifact)?;
        conn.execute_batch(&sql)
            .map_err(|e| Error::Integrity(format!("failed to execute SQL dump: {e}")))?;
    } else {
        conn.restore(DatabaseName::Main, artifact, None::<fn(Progress)>)
            .map_err(|e| Error::Integrity(format!("failed to load snapshot: {e}")))?;
    }
    integrity_check(&conn)
}

fn restore_artifact(artifact: &Path, target: &Path) -> Result<()> {
    if target.exists() {
        let mut backup = target.as_os_str().to_owned();
        backup.push(".bak");
        std::fs::rename(target, &backup)?;
        info!(target = %target.display(), "moved existing database aside");
    }

    let mut conn = Connection::open(target)?;
    if is_sql_text(artifact) {
        let sql = std::fs::read_to_string(artifact)?;
        conn.execute_batch(&sql)?;
    } else {
        conn.restore(DatabaseName::Main, artifact, None::<fn(Progress)>)?;
    }
    integrity_check(&conn)
}

#[async_trait]
impl Driver for SqliteDriver {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Sqlite
    }

    fn format(&self) -> &'static str {
        "sqlite"
    }

    fn extension(&self) -> &'static str {
        "db"
    }

    fn source_name(&self) -> String {
        self.path.display().to_string()
    }

    fn source_host(&self) -> String {
        "local".to_string()
    }

    async fn connect(&self) -> Result<Box<dyn Session>> {
        let path = self.path.clone();
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(Error::Database(format!(
                "sqlite database {} does not exist",
                path.display()
            )));
        }

        let conn = blocking(move || {
            let conn = Connection::open_with_flags(&path, read_only_flags())?;
            conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
                row.get::<_, i64>(0)
            })?;
            Ok(conn)
        })
        .await?;

        Ok(Box::new(SqliteSession {
            conn: Some(conn),
            temp_dir: self.temp_dir.clone(),
        }))
    }

    async fn verify_restore(&self, artifact: &Path) -> Result<()> {
        let artifact = artifact.to_path_buf();
        blocking(move || verify_artifact(&artifact)).await
    }

    async fn restore(&self, artifact: &Path, target: Option<&str>) -> Result<()> {
        let artifact = artifact.to_path_buf();
        let target = target.map(PathBuf::from).unwrap_or_else(|| self.path.clone());
        blocking(move || restore_artifact(&artifact, &target)).await
    }
}

pub struct SqliteSession {
    conn: Option<Connection>,
    temp_dir: Option<PathBuf>,
}

impl SqliteSession {
    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self
            .conn
            .take()
            .ok_or_else(|| Error::Database("sqlite session is closed".into()))?;
        let (conn, out) = tokio::task::spawn_blocking(move || {
            let out = f(&conn);
            (conn, out)
        })
        .await
        .map_err(|e| Error::Database(format!("sqlite task failed: {e}")))?;
        self.conn = Some(conn);
        out
    }
}

#[async_trait]
impl Session for SqliteSession {
    async fn version(&mut self) -> Result<String> {
        self.with_conn(|conn| {
            Ok(conn.query_row("SELECT sqlite_version()", [], |row| row.get(0))?)
        })
        .await
    }

    async fn dump(&mut self, sink: &mut (dyn AsyncWrite + Send + Unpin)) -> Result<()> {
        let scratch = scratch_dir(self.temp_dir.as_deref(), "datasaver-sqlite-")?;
        let snapshot = scratch.path().join("snapshot.db");

        let target = snapshot.clone();
        self.with_conn(move |conn| {
            conn.backup(DatabaseName::Main, &target, None)
                .map_err(|e| Error::Database(format!("sqlite backup failed: {e}")))
        })
        .await?;

        let mut file = tokio::fs::File::open(&snapshot).await?;
        tokio::io::copy(&mut file, &mut *sink).await?;
        sink.flush().await?;
        Ok(())
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| Error::from(e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn seed(path: &Path, rows: i64) -> rusqlite::Result<()> {
        let conn = Connection::open(path)?;
        conn.execute_batch("CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT NOT NULL);")?;
        for i in 0..rows {
            conn.execute("INSERT INTO items (name) VALUES (?1)", [format!("item-{i}")])?;
        }
        Ok(())
    }

    fn count(path: &Path) -> rusqlite::Result<i64> {
        Connection::open(path)?.query_row("SELECT count(*) FROM items", [], |r| r.get(0))
    }

    #[tokio::test]
    async fn test_dump_verify_restore() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let db = dir.path().join("app.db");
        seed(&db, 25)?;

        let driver = SqliteDriver::new(&db);
        let mut session = driver.connect().await?;
        assert!(!session.version().await?.is_empty());

        let mut dump = Vec::new();
        session.dump(&mut dump).await?;
        session.close().await?;
        assert!(dump.starts_with(b"SQLite format 3\0"));

        let artifact = dir.path().join("backup.db");
        std::fs::write(&artifact, &dump)?;
        driver.verify_restore(&artifact).await?;

        let target = dir.path().join("restored.db");
        driver
            .restore(&artifact, Some(target.to_str().unwrap()))
            .await?;
        assert_eq!(count(&target)?, 25);
        Ok(())
    }

    #[tokio::test]
    async fn test_snapshot_uses_configured_temp_dir() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let db = dir.path().join("app.db");
        seed(&db, 5)?;

        let scratch = dir.path().join("scratch");
        std::fs::create_dir(&scratch)?;
        let driver = SqliteDriver::new(&db).with_temp_dir(&scratch);
        let mut session = driver.connect().await?;
        let mut dump = Vec::new();
        session.dump(&mut dump).await?;
        session.close().await?;
        assert!(dump.starts_with(b"SQLite format 3\0"));
        assert!(std::fs::read_dir(&scratch)?.next().is_none());

        // A missing scratch parent fails the dump instead of falling back.
        let driver = SqliteDriver::new(&db).with_temp_dir(dir.path().join("missing"));
        let mut session = driver.connect().await?;
        let err = session.dump(&mut Vec::<u8>::new()).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)), "{err}");
        Ok(())
    }

    #[tokio::test]
    async fn test_restore_keeps_previous_copy() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let db = dir.path().join("app.db");
        seed(&db, 3)?;

        let artifact = dir.path().join("backup.db");
        Connection::open(&db)?.backup(DatabaseName::Main, &artifact, None)?;
        seed(&dir.path().join("other.db"), 0)?;

        let driver = SqliteDriver::new(dir.path().join("other.db"));
        driver.restore(&artifact, None).await?;

        assert_eq!(count(&dir.path().join("other.db"))?, 3);
        assert!(dir.path().join("other.db.bak").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_verify_sql_text() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let driver = SqliteDriver::new(dir.path().join("unused.db"));

        let good = dir.path().join("good.sql");
        std::fs::write(
            &good,
            "BEGIN;\nCREATE TABLE t (x INTEGER);\nINSERT INTO t VALUES (1);\nCOMMIT;\n",
        )?;
        driver.verify_restore(&good).await?;

        let bad = dir.path().join("bad.sql");
        std::fs::write(&bad, "CREATE TABLE t (x INTEGER;\n")?;
        let err = driver.verify_restore(&bad).await.unwrap_err();
        assert!(matches!(err, Error::Integrity(_)));
        Ok(())
    }

    #[tokio::test]
    async fn test_verify_rejects_garbage() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let artifact = dir.path().join("backup.db");
        std::fs::write(&artifact, vec![0x5au8; 4096])?;

        let driver = SqliteDriver::new(dir.path().join("unused.db"));
        let err = driver.verify_restore(&artifact).await.unwrap_err();
        assert!(matches!(err, Error::Integrity(_)), "{err}");
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_database_is_not_retryable() {
        let driver = SqliteDriver::new("/nonexistent/dir/app.db");
        let err = driver.connect().await.err().unwrap();
        assert!(err.to_string().contains("does not exist"));
        assert!(!err.is_retryable());
    }
}
