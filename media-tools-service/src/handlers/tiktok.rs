//! Share-link resolution endpoints.
//!
//! Errors here use their own envelope with a `debug_info` block so callers
//! can see which URLs were tried.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::models::{ResolutionTrace, ResolvedVideo};
use crate::services::ResolveError;
use crate::startup::AppState;

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ResolveResponse {
    pub success: bool,
    pub data: ResolvedVideo,
}

#[derive(Debug, Serialize)]
pub struct DebugInfo {
    pub original_url: String,
    pub clean_url: Option<String>,
    pub resolved_url: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub environment: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ResolveErrorBody {
    pub error: String,
    pub details: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_info: Option<DebugInfo>,
}

fn error_response(status: StatusCode, body: ResolveErrorBody) -> Response {
    (status, Json(body)).into_response()
}

fn missing_url() -> Response {
    error_response(
        StatusCode::BAD_REQUEST,
        ResolveErrorBody {
            error: "URL is required".to_string(),
            details: "Provide a TikTok share link in the `url` field".to_string(),
            debug_info: None,
        },
    )
}

fn failure_response(err: ResolveError, environment: &str) -> Response {
    let details = err.to_string();
    match err {
        ResolveError::InvalidArgument(_) => missing_url(),
        ResolveError::ExtractionFailed { trace, warnings } => {
            tracing::warn!(original_url = %trace.original_url, "Could not resolve share link");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ResolveErrorBody {
                    error: "Failed to process TikTok URL".to_string(),
                    details,
                    debug_info: Some(debug_info(trace, warnings, environment)),
                },
            )
        }
        ResolveError::FetchFailed(_) => {
            tracing::error!(error = %details, "Unexpected fetch failure escaped resolution");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ResolveErrorBody {
                    error: "Failed to process TikTok URL".to_string(),
                    details,
                    debug_info: None,
                },
            )
        }
    }
}

fn debug_info(trace: ResolutionTrace, warnings: Vec<String>, environment: &str) -> DebugInfo {
    DebugInfo {
        original_url: trace.original_url,
        clean_url: trace.clean_url,
        resolved_url: trace.resolved_url,
        timestamp: Utc::now(),
        environment: environment.to_string(),
        warnings,
    }
}

async fn resolve(state: &AppState, url: &str) -> Response {
    match state.resolver.resolve(url).await {
        Ok(video) => (
            StatusCode::OK,
            Json(ResolveResponse {
                success: true,
                data: video,
            }),
        )
            .into_response(),
        Err(e) => failure_response(e, &state.config.common.environment),
    }
}

#[tracing::instrument(skip(state, payload))]
pub async fn resolve_post(
    State(state): State<AppState>,
    payload: Result<Json<ResolveRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                ResolveErrorBody {
                    error: "Invalid request body".to_string(),
                    details: rejection.body_text(),
                    debug_info: None,
                },
            );
        }
    };

    match request.url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => resolve(&state, url).await,
        _ => missing_url(),
    }
}

/// `GET /tiktok?url=...` resolves; without `url` it describes the endpoint.
#[tracing::instrument(skip(state, query))]
pub async fn resolve_get(
    State(state): State<AppState>,
    query: Result<Query<ResolveRequest>, QueryRejection>,
) -> Response {
    let query = match query {
        Ok(Query(query)) => query,
        Err(rejection) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                ResolveErrorBody {
                    error: "Invalid query string".to_string(),
                    details: rejection.body_text(),
                    debug_info: None,
                },
            );
        }
    };

    match query.url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => resolve(&state, url).await,
        _ => Json(json!({
            "message": "TikTok link resolver",
            "usage": {
                "POST /tiktok": { "body": { "url": "https://www.tiktok.com/@user/video/1234567890" } },
                "GET /tiktok": { "query": "?url=https://vm.tiktok.com/XXXXXXXX/" }
            },
            "supported_formats": [
                "https://www.tiktok.com/@user/video/<id>",
                "https://www.tiktok.com/@/video/<id>",
                "https://vm.tiktok.com/<code>/",
                "https://vt.tiktok.com/<code>/",
                "https://m.tiktok.com/v/<id>.html"
            ]
        }))
        .into_response(),
    }
}
