//! Per-user generation quota records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Generation counter for one user within the current window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub user_id: String,

    /// Generations performed since `last_reset`.
    pub generations: u32,

    /// Start of the current window.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_reset: DateTime<Utc>,
}

impl UsageRecord {
    /// A fresh record whose window starts at `now`.
    pub fn new(user_id: impl Into<String>, generations: u32, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            generations,
            last_reset: now,
        }
    }

    /// Time elapsed since the window started; zero if the clock moved backwards.
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_reset).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn window_expired(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.elapsed(now) >= window
    }

    pub fn time_until_reset(&self, now: DateTime<Utc>, window: Duration) -> Duration {
        window.saturating_sub(self.elapsed(now))
    }
}

/// Quota parameters applied to every user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsagePolicy {
    pub limit: u32,
    pub window: Duration,
}

pub const DEFAULT_GENERATION_LIMIT: u32 = 2;
pub const DEFAULT_USAGE_WINDOW: Duration = Duration::from_millis(3_600_000);

impl Default for UsagePolicy {
    fn default() -> Self {
        Self {
            limit: DEFAULT_GENERATION_LIMIT,
            window: DEFAULT_USAGE_WINDOW,
        }
    }
}

/// Answer to "may this user generate right now?".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageStatus {
    pub record: UsageRecord,
    pub can_generate: bool,
    pub remaining_generations: u32,
    pub time_until_reset: Duration,
    pub limit: u32,
}

impl UsageStatus {
    pub fn evaluate(record: UsageRecord, policy: &UsagePolicy, now: DateTime<Utc>) -> Self {
        let time_until_reset = record.time_until_reset(now, policy.window);
        Self {
            can_generate: record.generations < policy.limit,
            remaining_generations: policy.limit.saturating_sub(record.generations),
            time_until_reset,
            limit: policy.limit,
            record,
        }
    }
}

/// Result of an atomic check-and-increment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumeOutcome {
    pub accepted: bool,
    pub record: UsageRecord,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn window_expires_exactly_at_boundary() {
        let record = UsageRecord::new("alice", 2, at(0));
        assert!(!record.window_expired(at(3_599_999), DEFAULT_USAGE_WINDOW));
        assert!(record.window_expired(at(3_600_000), DEFAULT_USAGE_WINDOW));
    }

    #[test]
    fn time_until_reset_never_negative() {
        let record = UsageRecord::new("alice", 0, at(0));
        assert_eq!(
            record.time_until_reset(at(10_000_000), DEFAULT_USAGE_WINDOW),
            Duration::ZERO
        );
        assert_eq!(
            record.time_until_reset(at(600_000), DEFAULT_USAGE_WINDOW),
            Duration::from_millis(3_000_000)
        );
    }

    #[test]
    fn clock_skew_counts_as_no_elapsed_time() {
        let record = UsageRecord::new("alice", 0, at(5_000));
        assert_eq!(record.elapsed(at(1_000)), Duration::ZERO);
    }

    #[test]
    fn status_at_limit_blocks_generation() {
        let status = UsageStatus::evaluate(
            UsageRecord::new("alice", 3, at(0)),
            &UsagePolicy::default(),
            at(1_000),
        );
        assert!(!status.can_generate);
        assert_eq!(status.remaining_generations, 0);
        assert_eq!(status.limit, 2);
    }

    #[test]
    fn serializes_last_reset_as_millis() {
        let record = UsageRecord::new("alice", 1, at(1_700_000_000_123));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["userId"], "alice");
        assert_eq!(json["generations"], 1);
        assert_eq!(json["lastReset"], 1_700_000_000_123i64);
    }
}
