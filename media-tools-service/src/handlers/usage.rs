use axum::{extract::rejection::JsonRejection, extract::State, Json};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::UsageRecord;
use crate::services::metrics;
use crate::startup::AppState;
use service_core::error::AppError;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UsageRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "userId is required and must be a non-empty string"))]
    pub user_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckUsageResponse {
    pub success: bool,
    pub usage: UsageRecord,
    pub can_generate: bool,
    pub remaining_generations: u32,
    /// Milliseconds until the window resets.
    pub time_until_reset: u64,
    pub limit: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUsageResponse {
    pub success: bool,
    pub usage: UsageRecord,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeUsageResponse {
    pub success: bool,
    pub usage: UsageRecord,
    pub remaining_generations: u32,
    pub time_until_reset: u64,
    pub limit: u32,
}

fn parse_request(
    payload: Result<Json<UsageRequest>, JsonRejection>,
) -> Result<UsageRequest, AppError> {
    let Json(request) = payload.map_err(|rejection| {
        AppError::BadRequest(anyhow::anyhow!("Invalid request body: {}", rejection.body_text()))
    })?;
    request.validate()?;
    Ok(request)
}

fn millis(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[tracing::instrument(skip(state, payload))]
pub async fn check_usage(
    State(state): State<AppState>,
    payload: Result<Json<UsageRequest>, JsonRejection>,
) -> Result<Json<CheckUsageResponse>, AppError> {
    let request = parse_request(payload)?;

    let status = state
        .limiter
        .check_usage(&request.user_id)
        .await
        .map_err(|e| e.into_app_error("Failed to check usage"))?;

    metrics::record_usage_check(status.can_generate);

    Ok(Json(CheckUsageResponse {
        success: true,
        can_generate: status.can_generate,
        remaining_generations: status.remaining_generations,
        time_until_reset: millis(status.time_until_reset),
        limit: status.limit,
        usage: status.record,
    }))
}

#[tracing::instrument(skip(state, payload))]
pub async fn update_usage(
    State(state): State<AppState>,
    payload: Result<Json<UsageRequest>, JsonRejection>,
) -> Result<Json<UpdateUsageResponse>, AppError> {
    let request = parse_request(payload)?;

    let usage = state
        .limiter
        .record_usage(&request.user_id)
        .await
        .map_err(|e| e.into_app_error("Failed to update usage"))?;

    Ok(Json(UpdateUsageResponse {
        success: true,
        usage,
        message: "Usage updated successfully".to_string(),
    }))
}

/// Atomic check-and-record; 429 with `Retry-After` once the quota is spent.
#[tracing::instrument(skip(state, payload))]
pub async fn consume_usage(
    State(state): State<AppState>,
    payload: Result<Json<UsageRequest>, JsonRejection>,
) -> Result<Json<ConsumeUsageResponse>, AppError> {
    let request = parse_request(payload)?;
    let policy = *state.limiter.policy();
    let now = chrono::Utc::now();

    let outcome = state
        .limiter
        .try_consume_at(&request.user_id, now)
        .await
        .map_err(|e| e.into_app_error("Failed to update usage"))?;

    metrics::record_consume(outcome.accepted);
    let time_until_reset = outcome.record.time_until_reset(now, policy.window);

    if !outcome.accepted {
        return Err(AppError::TooManyRequests(
            "Generation limit reached. Please try again later.".to_string(),
            Some(time_until_reset.as_secs().max(1)),
        ));
    }

    Ok(Json(ConsumeUsageResponse {
        success: true,
        remaining_generations: policy.limit.saturating_sub(outcome.record.generations),
        time_until_reset: millis(time_until_reset),
        limit: policy.limit,
        usage: outcome.record,
    }))
}
