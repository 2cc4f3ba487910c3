//! Tiered parsing for model responses.
//!
//! Models are asked for raw JSON but answer however they like. Parsing runs
//! through an explicit chain: (1) direct JSON, (2) fenced code block,
//! (3) first balanced `{...}`/`[...]` substring, (4) regex extraction of
//! known URL/identifier patterns straight from the text. Each tier is
//! independently testable with literal fixtures.

use regex::Regex;
use serde::de::DeserializeOwned;
use std::sync::LazyLock;

/// Structured tiers (1-3). Returns None when no tier yields valid JSON for
/// the target type; callers then fall back to `extract_patterns`.
pub fn parse_json_response<T: DeserializeOwned>(raw: &str) -> Option<T> {
    if let Ok(value) = serde_json::from_str(raw.trim()) {
        return Some(value);
    }
    if let Some(block) = fenced_block(raw) {
        if let Ok(value) = serde_json::from_str(block) {
            return Some(value);
        }
    }
    if let Some(span) = balanced_span(raw) {
        if let Ok(value) = serde_json::from_str(span) {
            return Some(value);
        }
    }
    None
}

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*(.+?)\s*```").unwrap());

/// The contents of the first fenced code block, if any.
fn fenced_block(raw: &str) -> Option<&str> {
    FENCE_RE
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// The first balanced `{...}` or `[...]` substring, honoring strings and
/// escapes so braces inside values don't end the scan early.
fn balanced_span(raw: &str) -> Option<&str> {
    let start = raw.find(['{', '['])?;
    let open = raw.as_bytes()[start];
    let close = if open == b'{' { b'}' } else { b']' };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, byte) in raw.as_bytes()[start..].iter().copied().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match byte {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b if !in_string && b == open => depth += 1,
            b if !in_string && b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Tier 4: pattern extraction
// ---------------------------------------------------------------------------

/// Fields recoverable from free text when every structured tier fails.
#[derive(Debug, Default, PartialEq)]
pub struct PatternExtract {
    pub official_site: Option<String>,
    pub legistar_client: Option<String>,
    pub feed_urls: Vec<String>,
    pub zip_codes: Vec<String>,
}

static LEGISTAR_API_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)https?://webapi\.legistar\.com/v1/([a-z0-9-]+)").unwrap()
});
static LEGISTAR_PORTAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)https?://([a-z0-9-]+)\.legistar\.com").unwrap()
});
static FEED_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)https?://[^\s"'<>)]+(?:/rss[^\s"'<>)]*|/feed/?|\.xml)"#).unwrap()
});
static OFFICIAL_SITE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)https?://(?:www\.)?[a-z0-9][a-z0-9.-]*\.(?:gov|org)(?:/[^\s"'<>)]*)?"#)
        .unwrap()
});
static ZIP_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d{5}\b").unwrap());

pub fn extract_patterns(raw: &str) -> PatternExtract {
    let mut extract = PatternExtract::default();

    extract.legistar_client = LEGISTAR_API_RE
        .captures(raw)
        .or_else(|| LEGISTAR_PORTAL_RE.captures(raw))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_lowercase());

    for m in FEED_URL_RE.find_iter(raw) {
        let url = trim_url(m.as_str());
        if !extract.feed_urls.contains(&url) {
            extract.feed_urls.push(url);
        }
    }

    // First .gov/.org URL that isn't one of the feeds.
    extract.official_site = OFFICIAL_SITE_RE
        .find_iter(raw)
        .map(|m| trim_url(m.as_str()))
        .find(|url| {
            !extract.feed_urls.iter().any(|feed| feed.starts_with(url.as_str()))
                && !url.contains("legistar.com")
        });

    for m in ZIP_RE.find_iter(raw) {
        let zip = m.as_str().to_string();
        if !extract.zip_codes.contains(&zip) {
            extract.zip_codes.push(zip);
        }
    }

    extract
}

fn trim_url(url: &str) -> String {
    url.trim_end_matches(['.', ',', ';', ')']).to_string()
}
