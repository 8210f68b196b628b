//! Outbound HTTP for link resolution.

use super::ResolveError;
use crate::config::ResolverConfig;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{
    header::{ACCEPT, ACCEPT_LANGUAGE},
    redirect, Client,
};
use std::time::Duration;

pub const DEFAULT_TITLE: &str = "TikTok Video";
const TITLE_SUFFIX: &str = " | TikTok";
const MAX_REDIRECTS: usize = 10;

static TITLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("title regex is valid"));

/// Network side of the resolver, swappable in tests.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Follow redirects starting at `url` and return the final URL.
    async fn follow_redirects(&self, url: &str) -> Result<String, ResolveError>;

    /// GET `url` and return the body. Non-2xx responses are errors.
    async fn fetch_page(&self, url: &str) -> Result<String, ResolveError>;
}

#[derive(Clone)]
pub struct HttpPageFetcher {
    client: Client,
}

impl HttpPageFetcher {
    pub fn new(config: &ResolverConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn follow_redirects(&self, url: &str) -> Result<String, ResolveError> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| ResolveError::FetchFailed(format!("HEAD {} failed: {}", url, e)))?;

        tracing::debug!(status = %response.status(), final_url = %response.url(), "Redirect chain followed");
        Ok(response.url().to_string())
    }

    async fn fetch_page(&self, url: &str) -> Result<String, ResolveError> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await
            .map_err(|e| ResolveError::FetchFailed(format!("GET {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResolveError::FetchFailed(format!(
                "GET {} returned {}",
                url, status
            )));
        }

        response
            .text()
            .await
            .map_err(|e| ResolveError::FetchFailed(format!("Reading body of {} failed: {}", url, e)))
    }
}

/// Page title with the site suffix removed, or [`DEFAULT_TITLE`].
pub fn extract_title(html: &str) -> String {
    TITLE_RE
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| decode_entities(m.as_str().trim()))
        .map(|title| title.trim_end_matches(TITLE_SUFFIX).trim().to_string())
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| DEFAULT_TITLE.to_string())
}

fn decode_entities(text: &str) -> String {
    text.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
