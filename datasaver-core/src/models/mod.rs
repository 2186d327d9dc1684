//! Persisted data model.

pub mod record;

pub use record::{
    backup_id, metadata_key, ArtifactInfo, BackupRecord, RetentionHint, SourceInfo, META_SUFFIX,
};
