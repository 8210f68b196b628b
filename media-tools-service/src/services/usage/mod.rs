//! Per-user generation quota.
//!
//! The limiter owns the window arithmetic; persistence is behind the
//! [`UsageStore`] trait so the same policy runs against MongoDB, Redis or an
//! in-process map.
//!
//! Two update paths exist:
//!
//! - [`UsageLimiter::check_usage`] followed by [`UsageLimiter::record_usage`]:
//!   a read, then an unconditional increment. Concurrent callers for the same
//!   user can both pass the check and both increment, so the limit can be
//!   exceeded.
//! - [`UsageLimiter::try_consume`]: a single atomic check-and-increment in the
//!   store. It never lets the count pass the limit.
//!
//! After any window reset, `generations` equals the number of generations in
//! the new window: 0 when the reset happens during a check, 1 when it happens
//! while recording a generation.

pub mod memory;
pub mod mongo;
pub mod redis;

pub use memory::InMemoryUsageStore;
pub use mongo::MongoUsageStore;
pub use self::redis::RedisUsageStore;

use crate::models::{ConsumeOutcome, UsagePolicy, UsageRecord, UsageStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Failure talking to the backing store.
#[derive(Error, Debug)]
#[error("{backend} {operation} failed: {message}")]
pub struct StoreError {
    pub backend: &'static str,
    pub operation: &'static str,
    pub message: String,
}

impl StoreError {
    pub fn new(backend: &'static str, operation: &'static str, err: impl ToString) -> Self {
        Self {
            backend,
            operation,
            message: err.to_string(),
        }
    }
}

/// Persistence for usage records, one per user id.
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn get(&self, user_id: &str) -> Result<Option<UsageRecord>, StoreError>;

    /// Upsert `generations` and `last_reset`, leaving any other stored fields alone.
    async fn put(&self, record: &UsageRecord) -> Result<(), StoreError>;

    /// Check-and-increment in one step.
    ///
    /// An absent record or an expired window becomes `(1, now)` and is
    /// accepted. Otherwise the count is incremented only while it is below
    /// `limit`; a rejected call leaves the record untouched.
    async fn atomic_increment(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        window: Duration,
        limit: u32,
    ) -> Result<ConsumeOutcome, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

#[derive(Error, Debug)]
pub enum UsageError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Usage storage unavailable: {0}")]
    StorageUnavailable(#[from] StoreError),
}

impl UsageError {
    /// Map to an HTTP error, using `public_message` for storage failures.
    pub fn into_app_error(self, public_message: &str) -> AppError {
        match self {
            UsageError::InvalidArgument(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            UsageError::StorageUnavailable(err) => {
                AppError::DatabaseError(public_message.to_string(), anyhow::Error::new(err))
            }
        }
    }
}

fn validate_user_id(user_id: &str) -> Result<(), UsageError> {
    if user_id.is_empty() {
        return Err(UsageError::InvalidArgument(
            "userId is required and must be a non-empty string".to_string(),
        ));
    }
    Ok(())
}

#[derive(Clone)]
pub struct UsageLimiter {
    store: Arc<dyn UsageStore>,
    policy: UsagePolicy,
}

impl UsageLimiter {
    pub fn new(store: Arc<dyn UsageStore>, policy: UsagePolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &UsagePolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn UsageStore> {
        &self.store
    }

    pub async fn check_usage(&self, user_id: &str) -> Result<UsageStatus, UsageError> {
        self.check_usage_at(user_id, Utc::now()).await
    }

    /// Report the quota for `user_id`, creating the record on first sight and
    /// resetting it when its window has expired.
    #[tracing::instrument(skip(self), fields(limit = self.policy.limit))]
    pub async fn check_usage_at(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<UsageStatus, UsageError> {
        validate_user_id(user_id)?;

        let record = match self.store.get(user_id).await? {
            None => {
                let record = UsageRecord::new(user_id, 0, now);
                self.store.put(&record).await?;
                tracing::info!("Created usage record");
                record
            }
            Some(existing) if existing.window_expired(now, self.policy.window) => {
                let record = UsageRecord::new(user_id, 0, now);
                self.store.put(&record).await?;
                tracing::info!(
                    previous_generations = existing.generations,
                    "Usage window expired, counter reset"
                );
                record
            }
            Some(existing) => existing,
        };

        let status = UsageStatus::evaluate(record, &self.policy, now);
        tracing::debug!(
            generations = status.record.generations,
            can_generate = status.can_generate,
            "Usage checked"
        );
        Ok(status)
    }

    pub async fn record_usage(&self, user_id: &str) -> Result<UsageRecord, UsageError> {
        self.record_usage_at(user_id, Utc::now()).await
    }

    /// Count one generation. Does not enforce the limit: callers are expected
    /// to have seen `can_generate` from a prior check.
    #[tracing::instrument(skip(self))]
    pub async fn record_usage_at(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<UsageRecord, UsageError> {
        validate_user_id(user_id)?;

        let record = match self.store.get(user_id).await? {
            Some(existing) if !existing.window_expired(now, self.policy.window) => UsageRecord {
                generations: existing.generations.saturating_add(1),
                ..existing
            },
            _ => UsageRecord::new(user_id, 1, now),
        };

        self.store.put(&record).await?;
        tracing::info!(generations = record.generations, "Usage recorded");
        Ok(record)
    }

    pub async fn try_consume(&self, user_id: &str) -> Result<ConsumeOutcome, UsageError> {
        self.try_consume_at(user_id, Utc::now()).await
    }

    /// Atomically take one generation from the quota if any is left.
    #[tracing::instrument(skip(self), fields(limit = self.policy.limit))]
    pub async fn try_consume_at(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ConsumeOutcome, UsageError> {
        validate_user_id(user_id)?;

        if self.policy.limit == 0 {
            let record = self
                .store
                .get(user_id)
                .await?
                .unwrap_or_else(|| UsageRecord::new(user_id, 0, now));
            return Ok(ConsumeOutcome {
                accepted: false,
                record,
            });
        }

        let outcome = self
            .store
            .atomic_increment(user_id, now, self.policy.window, self.policy.limit)
            .await?;

        if outcome.accepted {
            tracing::info!(generations = outcome.record.generations, "Generation consumed");
        } else {
            tracing::info!(
                generations = outcome.record.generations,
                "Generation rejected, quota exhausted"
            );
        }
        Ok(outcome)
    }

    pub async fn health_check(&self) -> Result<(), StoreError> {
        self.store.health_check().await
    }
}
