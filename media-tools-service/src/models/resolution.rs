use serde::Serialize;
use std::fmt;

/// Which strategy produced a resolution result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    /// Share link missing its username segment; id read straight from the URL.
    MalformedUrlExtraction,
    HtmlScraping,
    UrlValidation,
}

impl ResolutionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MalformedUrlExtraction => "malformed_url_extraction",
            Self::HtmlScraping => "html_scraping",
            Self::UrlValidation => "url_validation",
        }
    }

    pub fn note(&self) -> &'static str {
        match self {
            Self::MalformedUrlExtraction => {
                "Video id recovered from a share link missing its username segment"
            }
            Self::HtmlScraping => "Title scraped from the video page",
            Self::UrlValidation => {
                "Video page could not be scraped; video id taken from the link itself"
            }
        }
    }
}

impl fmt::Display for ResolutionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of resolving a share link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedVideo {
    pub title: String,
    pub video_id: Option<String>,
    pub download_url: String,
    pub resolved_url: String,
    pub original_url: String,
    pub method: ResolutionMethod,
    pub note: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Page metadata obtained by scraping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicInfo {
    pub title: String,
    pub method: ResolutionMethod,
}

/// URLs seen along the way, reported when every strategy fails.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolutionTrace {
    pub original_url: String,
    pub clean_url: Option<String>,
    pub resolved_url: Option<String>,
}
