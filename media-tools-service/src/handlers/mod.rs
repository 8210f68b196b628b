//! HTTP handlers for media-tools-service.

pub mod health;
pub mod tiktok;
pub mod usage;

pub use health::{health_check, metrics_endpoint, readiness_check};
pub use tiktok::{resolve_get, resolve_post};
pub use usage::{check_usage, consume_usage, update_usage};
