//! Backup metadata record.
//!
//! Serialized as `<id>.meta.json` next to the data artifact. The JSON layout is
//! shared with other tools reading the same bucket, so field names are fixed.

use crate::rotation::Tier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Suffix of the metadata object stored beside every artifact.
pub const META_SUFFIX: &str = ".meta.json";

/// Derive a backup id from the run's start time: `backup_<YYYYMMDD>_<HHMMSS>`.
pub fn backup_id(started_at: DateTime<Utc>) -> String {
    format!("backup_{}", started_at.format("%Y%m%d_%H%M%S"))
}

/// Storage key of the metadata object for `id`.
pub fn metadata_key(id: &str) -> String {
    format!("{id}{META_SUFFIX}")
}

/// Backup record, one per completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// Primary tier assigned at creation. Informational only; cleanup
    /// reclassifies from `timestamp`.
    #[serde(rename = "type")]
    pub tier: Tier,
    #[serde(rename = "database")]
    pub source: SourceInfo,
    #[serde(rename = "backup")]
    pub artifact: ArtifactInfo,
    pub files: Vec<String>,
    #[serde(rename = "retention")]
    pub retention_hint: RetentionHint,
}

/// The database that was dumped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub name: String,
    pub host: String,
    pub version: String,
}

/// How the artifact was produced and what it cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactInfo {
    pub method: String,
    pub format: String,
    pub compression: String,
    pub size_bytes: u64,
    #[serde(rename = "compressed_size_bytes")]
    pub stored_size_bytes: u64,
    pub duration_seconds: f64,
    /// `sha256:<hex>`, empty when the checksum could not be computed.
    #[serde(default)]
    pub checksum: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionHint {
    pub keep_until: DateTime<Utc>,
    pub policy: String,
}

impl BackupRecord {
    pub fn new(id: impl Into<String>, timestamp: DateTime<Utc>, source: SourceInfo) -> Self {
        Self {
            id: id.into(),
            timestamp,
            tier: Tier::Daily,
            source,
            artifact: ArtifactInfo {
                method: String::new(),
                format: String::new(),
                compression: "none".to_string(),
                size_bytes: 0,
                stored_size_bytes: 0,
                duration_seconds: 0.0,
                checksum: String::new(),
            },
            files: Vec::new(),
            retention_hint: RetentionHint {
                keep_until: timestamp,
                policy: Tier::Daily.to_string(),
            },
        }
    }

    pub fn set_artifact_sizes(&mut self, raw: u64, stored: u64, duration: Duration, checksum: &str) {
        self.artifact.size_bytes = raw;
        self.artifact.stored_size_bytes = stored;
        self.artifact.duration_seconds = duration.as_secs_f64();
        self.artifact.checksum = checksum.to_string();
    }

    pub fn set_retention(&mut self, keep_until: DateTime<Utc>, tier: Tier) {
        self.tier = tier;
        self.retention_hint = RetentionHint {
            keep_until,
            policy: tier.to_string(),
        };
    }

    pub fn add_file(&mut self, key: impl Into<String>) {
        self.files.push(key.into());
    }

    pub fn metadata_key(&self) -> String {
        metadata_key(&self.id)
    }

    /// The first non-metadata file: the actual backup payload.
    pub fn canonical_file(&self) -> Option<&str> {
        self.files
            .iter()
            .map(String::as_str)
            .find(|f| !f.ends_with(META_SUFFIX))
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }

    pub fn from_json(data: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(data)
    }
}
