//! TikTok share-link resolution.
//!
//! [`UrlResolver::resolve`] runs a fixed pipeline: a fast path for share links
//! with an empty username, then cleaning, short-link expansion, and an ordered
//! list of fallback strategies. A strategy failure is recorded as a warning
//! and the next strategy runs; only when all of them fail is an error
//! returned.

pub mod clean;
pub mod fetch;
pub mod patterns;

pub use clean::{clean_url, is_short_link, is_tiktok_host};
pub use fetch::{extract_title, HttpPageFetcher, PageFetcher, DEFAULT_TITLE};
pub use patterns::{extract_video_id, find_video_id};

use crate::config::ResolverConfig;
use crate::models::{BasicInfo, ResolutionMethod, ResolutionTrace, ResolvedVideo};
use crate::services::metrics;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0}")]
    FetchFailed(String),

    #[error("No video id could be extracted from {}", .trace.original_url)]
    ExtractionFailed {
        trace: ResolutionTrace,
        warnings: Vec<String>,
    },
}

/// Fallback strategies, tried in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    HtmlScraping,
    UrlValidation,
}

const FALLBACK_CHAIN: [Strategy; 2] = [Strategy::HtmlScraping, Strategy::UrlValidation];

impl Strategy {
    fn method(self) -> ResolutionMethod {
        match self {
            Strategy::HtmlScraping => ResolutionMethod::HtmlScraping,
            Strategy::UrlValidation => ResolutionMethod::UrlValidation,
        }
    }
}

/// URLs in play for one resolution.
struct Attempt<'a> {
    original: &'a str,
    cleaned: &'a str,
    resolved: &'a str,
}

impl Attempt<'_> {
    /// Id from the resolved URL, else from the cleaned one.
    fn video_id(&self) -> Option<String> {
        extract_video_id(self.resolved).or_else(|| extract_video_id(self.cleaned))
    }

    fn no_video_id(&self) -> ResolveError {
        ResolveError::ExtractionFailed {
            trace: ResolutionTrace {
                original_url: self.original.to_string(),
                clean_url: Some(self.cleaned.to_string()),
                resolved_url: Some(self.resolved.to_string()),
            },
            warnings: Vec::new(),
        }
    }
}

pub struct UrlResolver {
    fetcher: Arc<dyn PageFetcher>,
    short_link_hosts: Vec<String>,
    allowed_query_params: Vec<String>,
}

impl UrlResolver {
    pub fn new(fetcher: Arc<dyn PageFetcher>, config: &ResolverConfig) -> Self {
        Self {
            fetcher,
            short_link_hosts: config.short_link_hosts.clone(),
            allowed_query_params: config.allowed_query_params.clone(),
        }
    }

    pub fn clean_url(&self, raw: &str) -> String {
        clean_url(raw, &self.allowed_query_params)
    }

    /// Expand a short link. Any failure, and any URL that is not on a
    /// short-link host, yields the input unchanged.
    pub async fn resolve_redirect(&self, url: &str) -> String {
        self.try_resolve_redirect(url)
            .await
            .unwrap_or_else(|_| url.to_string())
    }

    async fn try_resolve_redirect(&self, url: &str) -> Result<String, ResolveError> {
        if !is_short_link(url, &self.short_link_hosts) {
            return Ok(url.to_string());
        }
        self.fetcher.follow_redirects(url).await.map_err(|e| {
            tracing::warn!(url = %url, error = %e, "Short link expansion failed");
            metrics::record_resolution_failure("redirect");
            e
        })
    }

    /// Scrape the page title.
    pub async fn extract_basic_info(&self, url: &str) -> Result<BasicInfo, ResolveError> {
        let html = self.fetcher.fetch_page(url).await?;
        Ok(BasicInfo {
            title: extract_title(&html),
            method: ResolutionMethod::HtmlScraping,
        })
    }

    #[tracing::instrument(skip(self))]
    pub async fn resolve(&self, raw_url: &str) -> Result<ResolvedVideo, ResolveError> {
        if raw_url.trim().is_empty() {
            return Err(ResolveError::InvalidArgument("URL is required".to_string()));
        }

        if let Some(video_id) = patterns::malformed_share_link_id(raw_url) {
            tracing::info!(video_id = %video_id, "Resolved share link with empty username");
            return Ok(self.finish(
                ResolutionMethod::MalformedUrlExtraction,
                DEFAULT_TITLE.to_string(),
                Some(video_id),
                &Attempt {
                    original: raw_url,
                    cleaned: raw_url,
                    resolved: raw_url,
                },
                Vec::new(),
            ));
        }

        let cleaned = self.clean_url(raw_url);
        let mut warnings = Vec::new();
        let resolved = match self.try_resolve_redirect(&cleaned).await {
            Ok(resolved) => resolved,
            Err(e) => {
                warnings.push(format!("redirect: {}", e));
                cleaned.clone()
            }
        };

        let attempt = Attempt {
            original: raw_url,
            cleaned: &cleaned,
            resolved: &resolved,
        };

        for strategy in FALLBACK_CHAIN {
            match self.run_strategy(strategy, &attempt).await {
                Ok((title, video_id)) => {
                    return Ok(self.finish(strategy.method(), title, video_id, &attempt, warnings));
                }
                Err(e) => {
                    let stage = strategy.method().as_str();
                    tracing::warn!(strategy = stage, error = %e, "Resolution strategy failed");
                    metrics::record_resolution_failure(stage);
                    warnings.push(format!("{}: {}", stage, e));
                }
            }
        }

        metrics::record_resolution_failure("exhausted");
        Err(ResolveError::ExtractionFailed {
            trace: ResolutionTrace {
                original_url: raw_url.to_string(),
                clean_url: Some(cleaned.clone()),
                resolved_url: Some(resolved.clone()),
            },
            warnings,
        })
    }

    /// Title and video id for one strategy.
    async fn run_strategy(
        &self,
        strategy: Strategy,
        attempt: &Attempt<'_>,
    ) -> Result<(String, Option<String>), ResolveError> {
        match strategy {
            Strategy::HtmlScraping => {
                let info = self.extract_basic_info(attempt.resolved).await?;
                let video_id = attempt.video_id();
                // A loaded page without an id only counts when it is a TikTok page.
                if video_id.is_none() && !is_tiktok_host(attempt.resolved) {
                    return Err(attempt.no_video_id());
                }
                Ok((info.title, video_id))
            }
            Strategy::UrlValidation => attempt
                .video_id()
                .map(|id| (DEFAULT_TITLE.to_string(), Some(id)))
                .ok_or_else(|| attempt.no_video_id()),
        }
    }

    fn finish(
        &self,
        method: ResolutionMethod,
        title: String,
        video_id: Option<String>,
        attempt: &Attempt<'_>,
        warnings: Vec<String>,
    ) -> ResolvedVideo {
        metrics::record_resolution(method.as_str());
        tracing::info!(method = %method, video_id = ?video_id, "Resolved share link");
        ResolvedVideo {
            title,
            video_id,
            download_url: attempt.resolved.to_string(),
            resolved_url: attempt.resolved.to_string(),
            original_url: attempt.original.to_string(),
            method,
            note: method.note().to_string(),
            warnings,
        }
    }
}
