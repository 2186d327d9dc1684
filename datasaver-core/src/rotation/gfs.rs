use super::policy::{classify, primary_tier, RetentionPolicy, Tier};
use crate::models::BackupRecord;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;

/// Result of rotation analysis
#[derive(Debug, Clone, Default)]
pub struct RotationPlan {
    /// Records protected by at least one tier quota and within max age
    pub keep: Vec<BackupRecord>,
    /// Records to delete, newest first
    pub delete: Vec<BackupRecord>,
}

impl RotationPlan {
    pub fn has_deletions(&self) -> bool {
        !self.delete.is_empty()
    }

    pub fn bytes_freed(&self) -> u64 {
        self.delete
            .iter()
            .map(|r| r.artifact.stored_size_bytes)
            .sum()
    }

    pub fn summary(&self) -> String {
        format!(
            "Keep: {} backups, Delete: {} backups, Free: {} bytes ({:.2} MB)",
            self.keep.len(),
            self.delete.len(),
            self.bytes_freed(),
            self.bytes_freed() as f64 / (1024.0 * 1024.0)
        )
    }
}

/// Grandfather-Father-Son rotator over a fixed policy.
#[derive(Debug, Clone)]
pub struct GfsRotator {
    policy: RetentionPolicy,
}

impl GfsRotator {
    pub fn new(policy: RetentionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// Split `records` into keep and delete sets.
    ///
    /// Single walk newest to oldest with one counter per tier. A record
    /// carrying several tiers consumes a slot in each tier that still has
    /// room and is kept if any of them did. Records older than
    /// `max_age_days` are deleted regardless of tier protection.
    pub fn plan(&self, mut records: Vec<BackupRecord>, now: DateTime<Utc>) -> RotationPlan {
        if records.is_empty() {
            return RotationPlan::default();
        }

        // Ties on timestamp fall back to id so every tier sees the same order.
        records.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| b.id.cmp(&a.id))
        });

        let mut daily = 0u32;
        let mut weekly = 0u32;
        let mut monthly = 0u32;
        let mut kept: HashSet<usize> = HashSet::new();

        for (idx, record) in records.iter().enumerate() {
            for tier in classify(record.timestamp) {
                let counter = match tier {
                    Tier::Daily => &mut daily,
                    Tier::Weekly => &mut weekly,
                    Tier::Monthly => &mut monthly,
                };
                if *counter < self.policy.quota(tier) {
                    *counter += 1;
                    kept.insert(idx);
                }
            }
        }

        let max_age = Duration::days(i64::from(self.policy.max_age_days));
        let mut plan = RotationPlan::default();

        for (idx, record) in records.into_iter().enumerate() {
            let expired =
                self.policy.max_age_days > 0 && now.signed_duration_since(record.timestamp) > max_age;
            if kept.contains(&idx) && !expired {
                plan.keep.push(record);
            } else {
                plan.delete.push(record);
            }
        }

        plan
    }

    /// Records that the policy no longer protects, newest first.
    pub fn determine_backups_to_delete(
        &self,
        records: Vec<BackupRecord>,
        now: DateTime<Utc>,
    ) -> Vec<BackupRecord> {
        self.plan(records, now).delete
    }

    /// Informational expiry and tier label for a new backup.
    pub fn retention_info(&self, taken_at: DateTime<Utc>) -> (DateTime<Utc>, Tier) {
        let tier = primary_tier(taken_at);
        (self.policy.retention_date(taken_at, tier), tier)
    }
}
