//! Storage contract for backup artifacts and their metadata.

pub mod local;

use crate::utils::errors::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncReadExt};

pub use local::LocalStorage;

/// Byte stream handed to or returned from a backend.
pub type ByteSource = Box<dyn AsyncRead + Send + Unpin>;

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// A stored object as reported by [`Storage::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Durably store the full contents of `source` under `key`, replacing any
    /// existing object.
    async fn write(&self, key: &str, source: ByteSource) -> StorageResult<u64>;

    /// Open `key` for reading. Missing objects yield [`StorageError::NotFound`].
    async fn read(&self, key: &str) -> StorageResult<ByteSource>;

    /// Delete `key`. Deleting a missing object succeeds.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Objects whose key starts with `prefix`, newest first.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectInfo>>;

    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Size in bytes. Missing objects yield [`StorageError::NotFound`].
    async fn size(&self, key: &str) -> StorageResult<u64>;
}

/// Read a whole (small) object into memory.
pub async fn read_to_vec(storage: &dyn Storage, key: &str) -> StorageResult<Vec<u8>> {
    let mut reader = storage.read(key).await?;
    let mut data = Vec::new();
    reader
        .read_to_end(&mut data)
        .await
        .map_err(|e| StorageError::io("read", key, e))?;
    Ok(data)
}
