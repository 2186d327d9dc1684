//! Grandfather-Father-Son retention.
//!
//! Every backup is a daily; a backup taken on the week-boundary day is also a
//! weekly, and one taken on the first of the month is also a monthly. Each tier
//! keeps its own quota of the newest members and a record survives if any tier
//! still has room for it. `max_age_days` is an absolute ceiling on top.

pub mod gfs;
pub mod policy;

pub use gfs::{GfsRotator, RotationPlan};
pub use policy::{classify, primary_tier, RetentionPolicy, Tier, WEEK_BOUNDARY};
