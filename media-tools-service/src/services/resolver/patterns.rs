//! Ordered video-id patterns. The list order is the priority: the first
//! pattern that matches decides the id, there is no scoring.

use once_cell::sync::Lazy;
use regex::Regex;

pub struct VideoIdPattern {
    pub name: &'static str,
    regex: Regex,
}

impl VideoIdPattern {
    fn capture(&self, url: &str) -> Option<String> {
        self.regex
            .captures(url)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }
}

pub const MALFORMED_USERNAME: &str = "malformed_username";

static PATTERNS: Lazy<Vec<VideoIdPattern>> = Lazy::new(|| {
    [
        ("standard", r"tiktok\.com/@[^/?#\s]+/video/(\d+)"),
        (MALFORMED_USERNAME, r"tiktok\.com/@/video/(\d+)"),
        ("v_path", r"tiktok\.com/v/(\d+)"),
        ("v_query", r"[?&]v=(\d+)"),
        ("short_link", r"(?:vm|vt)\.tiktok\.com/([A-Za-z0-9]+)"),
        ("video_anywhere", r"/video/(\d+)"),
        ("share_item_id", r"[?&]share_item_id=(\d+)"),
    ]
    .into_iter()
    .map(|(name, pattern)| VideoIdPattern {
        name,
        regex: Regex::new(pattern).expect("video id pattern is a valid regex"),
    })
    .collect()
});

/// Patterns in priority order.
pub fn patterns() -> &'static [VideoIdPattern] {
    &PATTERNS
}

/// First matching pattern name together with the captured id.
pub fn find_video_id(url: &str) -> Option<(&'static str, String)> {
    patterns()
        .iter()
        .find_map(|p| p.capture(url).map(|id| (p.name, id)))
}

pub fn extract_video_id(url: &str) -> Option<String> {
    find_video_id(url).map(|(_, id)| id)
}

/// Id from a share link whose username segment is empty (`/@/video/<id>`).
pub fn malformed_share_link_id(url: &str) -> Option<String> {
    patterns()
        .iter()
        .find(|p| p.name == MALFORMED_USERNAME)
        .and_then(|p| p.capture(url))
}
