//! Handle and post-link normalization.

use std::sync::OnceLock;

use regex::Regex;

fn post_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:x\.com|twitter\.com)/[A-Za-z0-9_]+/status(?:es)?/(\d+)")
            .expect("post URL regex is valid")
    })
}

/// Normalize an X handle to its bare form.
///
/// Accepts a bare handle (`jess`), an `@`-prefixed handle (`@jess`), or a
/// full profile URL (`https://x.com/jess`, `twitter.com/jess/`). Returns
/// `None` if nothing usable remains after stripping.
#[must_use]
pub fn normalize_handle(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let rest = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    let rest = rest.strip_prefix("www.").unwrap_or(rest);

    let handle = if let Some(path) = rest
        .strip_prefix("x.com/")
        .or_else(|| rest.strip_prefix("twitter.com/"))
    {
        // First path segment is the handle; ignore any trailing path/query.
        path.split(['/', '?']).next().unwrap_or("")
    } else {
        rest
    };

    let handle = handle.trim_start_matches('@').trim();
    if handle.is_empty() || !handle.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    Some(handle.to_lowercase())
}

/// Extract the numeric status id from an X post link.
///
/// Recognizes `x.com` and `twitter.com` status URLs, with or without a
/// scheme, including the legacy `/statuses/` path. Returns `None` for
/// anything else; a submission whose link does not resolve here is not
/// trackable.
#[must_use]
pub fn post_id_from_url(url: &str) -> Option<String> {
    post_url_re()
        .captures(url.trim())
        .map(|caps| caps[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_handle_passes_through() {
        assert_eq!(normalize_handle("jess_w").as_deref(), Some("jess_w"));
    }

    #[test]
    fn at_prefix_is_stripped() {
        assert_eq!(normalize_handle("@Jess_W").as_deref(), Some("jess_w"));
    }

    #[test]
    fn profile_url_is_reduced_to_handle() {
        assert_eq!(
            normalize_handle("https://x.com/jess_w").as_deref(),
            Some("jess_w")
        );
        assert_eq!(
            normalize_handle("http://twitter.com/Jess_W/").as_deref(),
            Some("jess_w")
        );
        assert_eq!(
            normalize_handle("www.x.com/jess_w?s=21").as_deref(),
            Some("jess_w")
        );
    }

    #[test]
    fn empty_and_garbage_handles_are_rejected() {
        assert_eq!(normalize_handle(""), None);
        assert_eq!(normalize_handle("@"), None);
        assert_eq!(normalize_handle("not a handle"), None);
    }

    #[test]
    fn post_id_extracted_from_x_and_twitter_urls() {
        assert_eq!(
            post_id_from_url("https://x.com/jess_w/status/1790000000000000001").as_deref(),
            Some("1790000000000000001")
        );
        assert_eq!(
            post_id_from_url("https://twitter.com/jess_w/statuses/42").as_deref(),
            Some("42")
        );
        assert_eq!(
            post_id_from_url("x.com/jess_w/status/99?s=20").as_deref(),
            Some("99")
        );
    }

    #[test]
    fn non_post_urls_are_not_trackable() {
        assert_eq!(post_id_from_url("https://x.com/jess_w"), None);
        assert_eq!(post_id_from_url("https://instagram.com/p/abc123"), None);
        assert_eq!(post_id_from_url(""), None);
    }
}
