//! Nixle (public-safety alerts) adapter.
//!
//! Two independent collection paths merged and deduplicated by content hash:
//! an agency RSS feed when an agency identifier is configured, and HTML
//! scraping of the public per-zip-code alert listing, following each alert
//! detail link. No stable JSON API is assumed on the scrape path, so field
//! extraction runs through CSS selectors with fallback chains.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use scraper::{Html, Selector};
use tracing::{info, warn};

use civicwire_common::{
    AlertKind, AlertSeverity, AlertUrgency, CivicWireError, ContentKind, RawItem, Source,
};

use crate::adapters::PlatformAdapter;
use crate::traits::Fetcher;

/// Detail pages followed per zip code listing.
const MAX_DETAILS_PER_ZIP: usize = 10;
/// Pause between successive zip-code fetches. Politeness only.
const ZIP_FETCH_PAUSE: Duration = Duration::from_millis(500);

pub struct NixleAdapter<'a> {
    fetcher: &'a dyn Fetcher,
    base_url: String,
}

impl<'a> NixleAdapter<'a> {
    pub fn new(fetcher: &'a dyn Fetcher, base_url: impl Into<String>) -> Self {
        Self {
            fetcher,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    // --- RSS path ---

    async fn collect_agency_feed(&self, agency: &str) -> Result<Vec<RawItem>, CivicWireError> {
        let url = format!("{}/rss/agency/{}", self.base_url, agency);
        let xml = self.fetcher.get_text(&url).await?;
        let feed = feed_rs::parser::parse(xml.as_bytes())
            .map_err(|e| CivicWireError::Parse(format!("Invalid feed from {url}: {e}")))?;

        let mut items = Vec::new();
        for entry in feed.entries {
            let title = match entry.title.as_ref() {
                Some(t) if !t.content.trim().is_empty() => t.content.trim().to_string(),
                _ => continue,
            };
            let summary = entry
                .summary
                .as_ref()
                .map(|s| s.content.trim().to_string())
                .filter(|s| !s.is_empty());
            let link = entry.links.first().map(|l| l.href.clone());
            let published = entry.published.or(entry.updated);

            let mut item = alert_item(&title, summary.as_deref(), Some(agency));
            item.external_id = Some(entry.id.clone());
            item.url = link;
            item.published_at = published;
            items.push(item.finish());
        }
        info!(agency, count = items.len(), "Nixle agency feed collected");
        Ok(items)
    }

    // --- Scrape path ---

    async fn collect_zip(&self, zip: &str) -> Result<Vec<RawItem>, CivicWireError> {
        let listing_url = format!("{}/zipcode/{}/", self.base_url, zip);
        let html = self.fetcher.get_text(&listing_url).await?;
        let links = extract_alert_links(&html, &listing_url);

        let mut items = Vec::new();
        for link in links.into_iter().take(MAX_DETAILS_PER_ZIP) {
            let detail_html = match self.fetcher.get_text(&link).await {
                Ok(html) => html,
                Err(e) => {
                    warn!(url = link.as_str(), error = %e, "Alert detail fetch failed");
                    continue;
                }
            };
            match parse_alert_detail(&detail_html, &link) {
                Some(item) => items.push(item),
                None => warn!(url = link.as_str(), "Alert detail page had no title"),
            }
        }
        info!(zip, count = items.len(), "Nixle zip page collected");
        Ok(items)
    }
}

#[async_trait]
impl PlatformAdapter for NixleAdapter<'_> {
    async fn collect(&self, source: &Source) -> Result<Vec<RawItem>, CivicWireError> {
        if source.agency_id.is_none() && source.zip_codes.is_empty() {
            return Err(CivicWireError::Config(format!(
                "Nixle source '{}' has neither an agency identifier nor zip codes",
                source.name
            )));
        }

        let mut items = Vec::new();

        if let Some(agency) = source.agency_id.as_deref() {
            items.extend(self.collect_agency_feed(agency).await?);
        }

        for (i, zip) in source.zip_codes.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(ZIP_FETCH_PAUSE).await;
            }
            items.extend(self.collect_zip(zip).await?);
        }

        // The two paths can surface the same alert; collapse within the batch.
        let mut seen = HashSet::new();
        items.retain(|item| seen.insert(item.content_hash.clone()));

        Ok(items)
    }
}

// ---------------------------------------------------------------------------
// HTML extraction
// ---------------------------------------------------------------------------

/// Alert detail links from a zip listing page, absolutized and deduplicated.
fn extract_alert_links(html: &str, listing_url: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let selector = match Selector::parse("a[href]") {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };
    let base = url::Url::parse(listing_url).ok();

    let mut seen = HashSet::new();
    document
        .select(&selector)
        .filter_map(|el| el.value().attr("href"))
        .filter(|href| href.contains("/alert/"))
        .filter_map(|href| match &base {
            Some(base) => base.join(href).ok().map(|u| u.to_string()),
            None => Some(href.to_string()),
        })
        .filter(|link| seen.insert(link.clone()))
        .collect()
}

/// Extract title/body/agency/date from an alert detail page. Returns None
/// when no title can be found (the page is unusable without one).
fn parse_alert_detail(html: &str, url: &str) -> Option<RawItem> {
    let document = Html::parse_document(html);

    let title = select_text(&document, &["h1.alert-title", "h1", "title"])?;
    let body = select_text(
        &document,
        &["div.alert-content", "div#alert-body", "article", "div.content"],
    );
    let agency = select_text(&document, &["span.agency-name", "div.agency a", ".agency"]);
    let date = select_text(&document, &["span.alert-date", "time", ".date"])
        .as_deref()
        .and_then(parse_alert_date);

    let mut item = alert_item(&title, body.as_deref(), agency.as_deref());
    item.external_id = alert_id_from_url(url);
    item.url = Some(url.to_string());
    item.published_at = date;
    Some(item.finish())
}

/// First non-empty text match over an ordered selector fallback chain.
fn select_text(document: &Html, selectors: &[&str]) -> Option<String> {
    for selector_str in selectors {
        let Ok(selector) = Selector::parse(selector_str) else {
            continue;
        };
        if let Some(element) = document.select(&selector).next() {
            let text = element.text().collect::<String>().trim().to_string();
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

/// The numeric segment after `/alert/` in a detail URL.
fn alert_id_from_url(url: &str) -> Option<String> {
    let (_, rest) = url.split_once("/alert/")?;
    let id: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    (!id.is_empty()).then_some(id)
}

fn parse_alert_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%B %d, %Y", "%m/%d/%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, format) {
            return d.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Build a classified alert item from title/body text. The caller stamps
/// identifiers, URL, and timestamps before calling `finish()`.
fn alert_item(title: &str, body: Option<&str>, agency: Option<&str>) -> RawItem {
    let combined = match body {
        Some(body) => format!("{title} {body}"),
        None => title.to_string(),
    };

    let kind = classify_kind(&combined);
    let content_kind = match kind {
        AlertKind::Alert => ContentKind::Alert,
        AlertKind::Advisory | AlertKind::Community => ContentKind::Advisory,
    };

    let mut item = RawItem::new(content_kind, title);
    item.description = body.map(|b| truncate(b, 500));
    item.content = body.map(str::to_string);
    item.alert_kind = Some(kind);
    item.urgency = Some(classify_urgency(&combined));
    item.severity = Some(classify_severity(&combined));
    item.agency = agency.map(str::to_string);
    item.category = Some("public_safety".to_string());
    item
}

/// Ordered keyword checks; first matching pattern wins. Defaults are the most
/// conservative value of each scale.
const KIND_PATTERNS: &[(&str, AlertKind)] = &[
    ("amber alert", AlertKind::Alert),
    ("emergency", AlertKind::Alert),
    ("evacuation", AlertKind::Alert),
    ("warning", AlertKind::Alert),
    ("alert", AlertKind::Alert),
    ("advisory", AlertKind::Advisory),
    ("road closure", AlertKind::Advisory),
    ("traffic", AlertKind::Advisory),
    ("weather", AlertKind::Advisory),
];

const URGENCY_PATTERNS: &[(&str, AlertUrgency)] = &[
    ("immediate", AlertUrgency::Immediate),
    ("evacuate", AlertUrgency::Immediate),
    ("shelter in place", AlertUrgency::Immediate),
    ("right now", AlertUrgency::Immediate),
    ("expected", AlertUrgency::Expected),
    ("today", AlertUrgency::Expected),
    ("tonight", AlertUrgency::Expected),
    ("within hours", AlertUrgency::Expected),
    ("upcoming", AlertUrgency::Future),
    ("planned", AlertUrgency::Future),
    ("scheduled", AlertUrgency::Future),
    ("next week", AlertUrgency::Future),
];

const SEVERITY_PATTERNS: &[(&str, AlertSeverity)] = &[
    ("extreme", AlertSeverity::Extreme),
    ("life-threatening", AlertSeverity::Extreme),
    ("catastrophic", AlertSeverity::Extreme),
    ("evacuation", AlertSeverity::Extreme),
    ("severe", AlertSeverity::Severe),
    ("major", AlertSeverity::Severe),
    ("dangerous", AlertSeverity::Severe),
    ("moderate", AlertSeverity::Moderate),
    ("caution", AlertSeverity::Moderate),
    ("minor", AlertSeverity::Minor),
];

fn classify_kind(text: &str) -> AlertKind {
    let text = text.to_lowercase();
    for (pattern, kind) in KIND_PATTERNS {
        if text.contains(pattern) {
            return *kind;
        }
    }
    AlertKind::Community
}

fn classify_urgency(text: &str) -> AlertUrgency {
    let text = text.to_lowercase();
    for (pattern, urgency) in URGENCY_PATTERNS {
        if text.contains(pattern) {
            return *urgency;
        }
    }
    AlertUrgency::Unknown
}

fn classify_severity(text: &str) -> AlertSeverity {
    let text = text.to_lowercase();
    for (pattern, severity) in SEVERITY_PATTERNS {
        if text.contains(pattern) {
            return *severity;
        }
    }
    AlertSeverity::Minor
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{nixle_source, MockFetcher};

    const ZIP_LISTING: &str = r#"
        <html><body>
          <div class="alerts">
            <a href="/alert/6012988/">Water main break near downtown</a>
            <a href="/alert/6012989/">Traffic advisory: parade route closures</a>
            <a href="/alert/6012988/">Water main break near downtown (repeat link)</a>
            <a href="/about/">About Nixle</a>
          </div>
        </body></html>"#;

    const ALERT_DETAIL: &str = r#"
        <html><body>
          <h1 class="alert-title">Evacuate immediately: chemical spill on Route 9</h1>
          <span class="agency-name">Springfield Police Department</span>
          <span class="alert-date">March 1, 2025</span>
          <div class="alert-content">A tanker rollover has released hazardous
          material. Residents within one mile should evacuate immediately.</div>
        </body></html>"#;

    #[test]
    fn listing_links_are_absolutized_and_deduped() {
        let links = extract_alert_links(ZIP_LISTING, "https://local.nixle.com/zipcode/62701/");
        assert_eq!(
            links,
            vec![
                "https://local.nixle.com/alert/6012988/",
                "https://local.nixle.com/alert/6012989/",
            ]
        );
    }

    #[test]
    fn detail_page_fields_extracted() {
        let item = parse_alert_detail(ALERT_DETAIL, "https://local.nixle.com/alert/6012988/").unwrap();
        assert_eq!(item.title, "Evacuate immediately: chemical spill on Route 9");
        assert_eq!(item.external_id.as_deref(), Some("6012988"));
        assert_eq!(item.agency.as_deref(), Some("Springfield Police Department"));
        assert_eq!(item.urgency, Some(AlertUrgency::Immediate));
        assert!(item.published_at.is_some());
        assert!(!item.content_hash.is_empty());
    }

    #[test]
    fn detail_page_without_title_is_rejected() {
        assert!(parse_alert_detail("<html><body></body></html>", "https://x/alert/1/").is_none());
    }

    #[test]
    fn urgency_first_match_wins_and_defaults_conservatively() {
        // "immediate" appears before "expected" in the pattern table.
        assert_eq!(
            classify_urgency("Evacuation expected, leave immediately"),
            AlertUrgency::Immediate
        );
        assert_eq!(classify_urgency("Road work planned"), AlertUrgency::Future);
        assert_eq!(classify_urgency("Community meeting notes"), AlertUrgency::Unknown);
    }

    #[test]
    fn severity_defaults_to_minor() {
        assert_eq!(classify_severity("severe thunderstorm"), AlertSeverity::Severe);
        assert_eq!(classify_severity("use caution on icy roads"), AlertSeverity::Moderate);
        assert_eq!(classify_severity("lost dog found"), AlertSeverity::Minor);
    }

    #[test]
    fn kind_classification() {
        assert_eq!(classify_kind("Tornado warning issued"), AlertKind::Alert);
        assert_eq!(classify_kind("Traffic advisory downtown"), AlertKind::Advisory);
        assert_eq!(classify_kind("National night out block party"), AlertKind::Community);
    }

    #[tokio::test]
    async fn rss_and_scrape_paths_merge_with_batch_dedup() {
        let rss = r#"<?xml version="1.0" encoding="UTF-8"?>
            <rss version="2.0"><channel>
              <title>Springfield PD</title>
              <item>
                <title>Evacuate immediately: chemical spill on Route 9</title>
                <link>https://local.nixle.com/alert/6012988/</link>
                <guid>6012988</guid>
                <description>Hazmat release near Route 9.</description>
              </item>
              <item>
                <title>Severe weather expected tonight</title>
                <link>https://local.nixle.com/alert/6012990/</link>
                <guid>6012990</guid>
              </item>
            </channel></rss>"#;

        let fetcher = MockFetcher::new()
            .on_text("https://local.nixle.com/rss/agency/springfieldpd", rss)
            .on_text("https://local.nixle.com/zipcode/62701/", ZIP_LISTING)
            .on_text("https://local.nixle.com/alert/6012988/", ALERT_DETAIL)
            .on_text(
                "https://local.nixle.com/alert/6012989/",
                r#"<html><h1>Traffic advisory: parade route closures</h1></html>"#,
            );

        let adapter = NixleAdapter::new(&fetcher, "https://local.nixle.com");
        let mut source = nixle_source(vec!["62701".to_string()]);
        source.agency_id = Some("springfieldpd".to_string());

        let items = adapter.collect(&source).await.unwrap();
        // 2 RSS entries + 2 detail pages, but alert 6012988 appears on both
        // paths with the same (title, url, id) and collapses to one item.
        assert_eq!(items.len(), 3);

        // A second collection of the identical pages yields identical hashes.
        let again = adapter.collect(&source).await.unwrap();
        let hashes: Vec<_> = items.iter().map(|i| i.content_hash.clone()).collect();
        let hashes_again: Vec<_> = again.iter().map(|i| i.content_hash.clone()).collect();
        assert_eq!(hashes, hashes_again);
    }

    #[tokio::test]
    async fn unconfigured_source_is_config_error() {
        let fetcher = MockFetcher::new();
        let adapter = NixleAdapter::new(&fetcher, "https://local.nixle.com");
        let source = nixle_source(Vec::new());
        let err = adapter.collect(&source).await.unwrap_err();
        assert!(matches!(err, CivicWireError::Config(_)));
    }

    #[tokio::test]
    async fn zip_listing_transport_error_propagates() {
        let fetcher = MockFetcher::new()
            .on_transport_error("https://local.nixle.com/zipcode/62701/", "HTTP 503");
        let adapter = NixleAdapter::new(&fetcher, "https://local.nixle.com");
        let source = nixle_source(vec!["62701".to_string()]);
        let err = adapter.collect(&source).await.unwrap_err();
        assert!(matches!(err, CivicWireError::Transport(_)));
    }
}
