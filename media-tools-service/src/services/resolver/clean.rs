use url::Url;

/// Strip tracking noise from a share link.
///
/// Parseable URLs are rebuilt with only the `allowed` query parameters and no
/// fragment. Anything else is cut at the first whitespace, which handles
/// share text pasted after the link.
pub fn clean_url(raw: &str, allowed: &[String]) -> String {
    let trimmed = raw.trim();

    match Url::parse(trimmed) {
        Ok(mut url) => {
            let kept: Vec<(String, String)> = url
                .query_pairs()
                .filter(|(key, _)| allowed.iter().any(|a| a == key))
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();

            url.set_fragment(None);
            if kept.is_empty() {
                url.set_query(None);
            } else {
                url.query_pairs_mut().clear().extend_pairs(kept.iter());
            }
            url.to_string()
        }
        Err(_) => trimmed
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string(),
    }
}

/// Whether `url` points at one of the redirecting short-link hosts.
pub fn is_short_link(url: &str, hosts: &[String]) -> bool {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
        .map(|host| hosts.iter().any(|h| h.eq_ignore_ascii_case(&host)))
        .unwrap_or(false)
}

/// Whether `url` is on `tiktok.com` or one of its subdomains.
pub fn is_tiktok_host(url: &str) -> bool {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
        .map(|host| host == "tiktok.com" || host.ends_with(".tiktok.com"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed() -> Vec<String> {
        vec!["v".to_string(), "share_item_id".to_string()]
    }

    #[test]
    fn drops_tracking_parameters() {
        assert_eq!(
            clean_url(
                "https://www.tiktok.com/@alice/video/7123456789?is_from_webapp=1&sender_device=pc",
                &allowed()
            ),
            "https://www.tiktok.com/@alice/video/7123456789"
        );
    }

    #[test]
    fn keeps_allow_listed_parameters() {
        assert_eq!(
            clean_url(
                "https://www.tiktok.com/share?utm_source=x&share_item_id=42#top",
                &allowed()
            ),
            "https://www.tiktok.com/share?share_item_id=42"
        );
    }

    #[test]
    fn unparseable_input_is_cut_at_whitespace() {
        assert_eq!(
            clean_url("  vm.tiktok.com/ZM8abcdEf/ look at this", &allowed()),
            "vm.tiktok.com/ZM8abcdEf/"
        );
        assert_eq!(clean_url("   ", &allowed()), "");
    }

    #[test]
    fn detects_short_link_hosts() {
        let hosts = vec!["vm.tiktok.com".to_string()];
        assert!(is_short_link("https://VM.tiktok.com/ZM8abcdEf/", &hosts));
        assert!(!is_short_link("https://www.tiktok.com/@a/video/1", &hosts));
        assert!(!is_short_link("not a url", &hosts));
    }

    #[test]
    fn recognises_tiktok_hosts() {
        assert!(is_tiktok_host("https://www.tiktok.com/foryou"));
        assert!(is_tiktok_host("https://TikTok.com/@alice"));
        assert!(!is_tiktok_host("https://example.com/not-a-video"));
        assert!(!is_tiktok_host("https://nottiktok.com/video/1"));
        assert!(!is_tiktok_host("tiktok.com/@alice"));
    }
}
