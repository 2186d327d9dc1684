use datasaver_core::database::SqliteDriver;
use datasaver_core::storage::LocalStorage;
use datasaver_core::{Engine, EngineConfig};
use std::sync::Arc;
use tempfile::TempDir;

pub struct EngineFixture {
    pub engine: Arc<Engine>,
    _dir: TempDir,
}

/// Engine over a small real SQLite database and local storage, all inside
/// one temp dir.
pub fn sqlite_engine() -> EngineFixture {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("app.db");
    let conn = rusqlite::Connection::open(&db).unwrap();
    conn.execute_batch(
        "CREATE TABLE orders (id INTEGER PRIMARY KEY, item TEXT NOT NULL);
         INSERT INTO orders (item) VALUES ('widget'), ('gadget');",
    )
    .unwrap();
    drop(conn);

    let scratch = dir.path().join("tmp");
    std::fs::create_dir_all(&scratch).unwrap();
    let config = EngineConfig {
        temp_dir: Some(scratch),
        ..EngineConfig::default()
    };
    let storage = LocalStorage::new(dir.path().join("backups")).unwrap();
    let engine = Engine::new(config, Arc::new(storage), Arc::new(SqliteDriver::new(db)));

    EngineFixture {
        engine: Arc::new(engine),
        _dir: dir,
    }
}
