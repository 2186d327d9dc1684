use chrono::{DateTime, Datelike, Duration, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Weekday that promotes a daily backup to the weekly tier.
pub const WEEK_BOUNDARY: Weekday = Weekday::Sun;

/// Retention tier of a backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Daily,
    Weekly,
    Monthly,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Daily => "daily",
            Tier::Weekly => "weekly",
            Tier::Monthly => "monthly",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "daily" => Ok(Tier::Daily),
            "weekly" => Ok(Tier::Weekly),
            "monthly" => Ok(Tier::Monthly),
            other => Err(format!("unknown tier: {other}")),
        }
    }
}

/// Retention policy configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Number of daily backups to keep
    pub keep_daily: u32,
    /// Number of weekly backups to keep
    pub keep_weekly: u32,
    /// Number of monthly backups to keep
    pub keep_monthly: u32,
    /// Delete anything older than this many days (0 = no ceiling)
    pub max_age_days: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            keep_daily: 7,
            keep_weekly: 4,
            keep_monthly: 6,
            max_age_days: 90,
        }
    }
}

impl RetentionPolicy {
    pub fn new(keep_daily: u32, keep_weekly: u32, keep_monthly: u32, max_age_days: u32) -> Self {
        Self {
            keep_daily,
            keep_weekly,
            keep_monthly,
            max_age_days,
        }
    }

    pub fn quota(&self, tier: Tier) -> u32 {
        match tier {
            Tier::Daily => self.keep_daily,
            Tier::Weekly => self.keep_weekly,
            Tier::Monthly => self.keep_monthly,
        }
    }

    /// Informational expiry for a backup of the given tier.
    ///
    /// Months are approximated as 30 days. The horizon is clamped to
    /// `max_age_days` when that is set and smaller.
    pub fn retention_date(&self, taken_at: DateTime<Utc>, tier: Tier) -> DateTime<Utc> {
        let mut days = match tier {
            Tier::Daily => i64::from(self.keep_daily),
            Tier::Weekly => i64::from(self.keep_weekly) * 7,
            Tier::Monthly => i64::from(self.keep_monthly) * 30,
        };
        if self.max_age_days > 0 && i64::from(self.max_age_days) < days {
            days = i64::from(self.max_age_days);
        }
        taken_at + Duration::days(days)
    }
}

/// All tiers a timestamp belongs to, daily first.
pub fn classify(taken_at: DateTime<Utc>) -> Vec<Tier> {
    let mut tiers = vec![Tier::Daily];
    if taken_at.weekday() == WEEK_BOUNDARY {
        tiers.push(Tier::Weekly);
    }
    if taken_at.day() == 1 {
        tiers.push(Tier::Monthly);
    }
    tiers
}

/// Label for a freshly created backup: monthly over weekly over daily.
pub fn primary_tier(taken_at: DateTime<Utc>) -> Tier {
    if taken_at.day() == 1 {
        Tier::Monthly
    } else if taken_at.weekday() == WEEK_BOUNDARY {
        Tier::Weekly
    } else {
        Tier::Daily
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_classify() {
        // Monday
        assert_eq!(classify(at(2024, 1, 15)), vec![Tier::Daily]);
        // Sunday
        assert_eq!(classify(at(2024, 1, 14)), vec![Tier::Daily, Tier::Weekly]);
        // Thursday, Feb 1
        assert_eq!(classify(at(2024, 2, 1)), vec![Tier::Daily, Tier::Monthly]);
        // Sunday, Sep 1
        assert_eq!(
            classify(at(2024, 9, 1)),
            vec![Tier::Daily, Tier::Weekly, Tier::Monthly]
        );
    }

    #[test]
    fn test_primary_tier_precedence() {
        assert_eq!(primary_tier(at(2024, 1, 15)), Tier::Daily);
        assert_eq!(primary_tier(at(2024, 1, 14)), Tier::Weekly);
        assert_eq!(primary_tier(at(2024, 2, 1)), Tier::Monthly);
        assert_eq!(primary_tier(at(2024, 9, 1)), Tier::Monthly);
    }

    #[test]
    fn test_retention_date() {
        let policy = RetentionPolicy::new(7, 4, 12, 365);
        let base = at(2024, 1, 15);

        assert_eq!(policy.retention_date(base, Tier::Daily), base + Duration::days(7));
        assert_eq!(policy.retention_date(base, Tier::Weekly), base + Duration::days(28));
        assert_eq!(policy.retention_date(base, Tier::Monthly), base + Duration::days(360));
    }

    #[test]
    fn test_retention_date_clamped_by_max_age() {
        let policy = RetentionPolicy::new(7, 4, 12, 30);
        let base = at(2024, 1, 15);
        assert_eq!(policy.retention_date(base, Tier::Monthly), base + Duration::days(30));

        let unbounded = RetentionPolicy::new(7, 4, 12, 0);
        assert_eq!(unbounded.retention_date(base, Tier::Monthly), base + Duration::days(360));
    }

    #[test]
    fn test_tier_serde_is_lowercase() {
        assert_eq!(serde_json::to_string(&Tier::Weekly).unwrap(), "\"weekly\"");
        let tier: Tier = serde_json::from_str("\"monthly\"").unwrap();
        assert_eq!(tier, Tier::Monthly);
        assert_eq!("Daily".parse::<Tier>().unwrap(), Tier::Daily);
    }
}
