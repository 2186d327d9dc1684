//! Error types for the backup lifecycle.

use thiserror::Error;

/// Message fragments that mark a failure as misconfiguration rather than a
/// transient fault. Matched case-insensitively.
const NON_RETRYABLE_MESSAGES: &[&str] = &[
    "permission denied",
    "access denied",
    "authentication failed",
    "invalid password",
    "does not exist",
];

/// Failures reported by a storage backend.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("object not found: {key}")]
    NotFound { key: String },

    #[error("invalid storage key: {key}")]
    InvalidKey { key: String },

    #[error("storage {op} {key}: {source}")]
    Io {
        op: &'static str,
        key: String,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    pub fn io(op: &'static str, key: &str, source: std::io::Error) -> Self {
        StorageError::Io {
            op,
            key: key.to_string(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Backup not found: {0}")]
    NotFound(String),

    #[error("Notification error: {0}")]
    Notify(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Marker produced when a cancellation token fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl From<Cancelled> for Error {
    fn from(_: Cancelled) -> Self {
        Error::Cancelled
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Database(e.to_string())
    }
}

impl Error {
    /// Wrap this error with the name of the operation that produced it.
    pub fn context(self, context: impl Into<String>) -> Self {
        Error::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping context wrappers.
    pub fn root(&self) -> &Error {
        match self {
            Error::Context { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Error::Cancelled)
    }

    /// Whether retrying the same operation could plausibly succeed.
    ///
    /// Cancellation, configuration, integrity and lookup failures never are,
    /// and neither is anything whose message names a credential, permission
    /// or missing-object condition.
    pub fn is_retryable(&self) -> bool {
        match self.root() {
            Error::Cancelled
            | Error::Config(_)
            | Error::Integrity(_)
            | Error::NotFound(_)
            | Error::Storage(StorageError::NotFound { .. })
            | Error::Storage(StorageError::InvalidKey { .. }) => false,
            _ => is_retryable_message(&self.to_string()),
        }
    }
}

/// Case-insensitive check of an error message against the non-retryable list.
pub fn is_retryable_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    !NON_RETRYABLE_MESSAGES
        .iter()
        .any(|needle| lower.contains(needle))
}
