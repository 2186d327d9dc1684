//! Datasaver core
//!
//! Point-in-time database backups with checksum verification, optional
//! restore verification and Grandfather-Father-Son retention.

pub mod config;
pub mod database;
pub mod executor;
pub mod models;
pub mod notify;
pub mod restore;
pub mod retry;
pub mod rotation;
pub mod storage;
pub mod transfer;
pub mod utils;
pub mod validator;

// Re-export commonly used types
pub use config::Config;
pub use executor::{BackupResult, Engine, EngineConfig, EngineStatus, RunError, RunState};
pub use models::record::BackupRecord;
pub use notify::{Notifier, WebhookNotifier};
pub use restore::{RestoreOptions, RestoreResult, Restorer};
pub use validator::{ValidationResult, Validator};
pub use utils::errors::{Error, StorageError};
pub type Result<T> = std::result::Result<T, Error>;
