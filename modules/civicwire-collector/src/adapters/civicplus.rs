//! CivicPlus (municipal CMS) adapter.
//!
//! Scrapes the configured news/announcements listing page of a city site.
//! CivicEngage markup varies between deployments, so extraction runs through
//! selector fallback chains and falls back to scanning CivicAlerts links.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use scraper::{ElementRef, Html, Selector};
use tracing::info;

use civicwire_common::{CivicWireError, ContentKind, RawItem, Source};

use crate::adapters::PlatformAdapter;
use crate::traits::Fetcher;

/// Listing items collected per page.
const MAX_ITEMS: usize = 25;

pub struct CivicPlusAdapter<'a> {
    fetcher: &'a dyn Fetcher,
}

impl<'a> CivicPlusAdapter<'a> {
    pub fn new(fetcher: &'a dyn Fetcher) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl PlatformAdapter for CivicPlusAdapter<'_> {
    async fn collect(&self, source: &Source) -> Result<Vec<RawItem>, CivicWireError> {
        let endpoint = source.endpoint_url.as_deref().ok_or_else(|| {
            CivicWireError::Config(format!(
                "CivicPlus source '{}' has no endpoint URL",
                source.name
            ))
        })?;

        let html = self.fetcher.get_text(endpoint).await?;
        let items = extract_news_items(&html, endpoint);

        info!(endpoint, count = items.len(), "CivicPlus listing collected");
        Ok(items)
    }
}

/// Pull news entries out of a listing page. Container-based extraction first;
/// when no known container matches, fall back to CivicAlerts detail links.
fn extract_news_items(html: &str, endpoint: &str) -> Vec<RawItem> {
    let document = Html::parse_document(html);
    let base = url::Url::parse(endpoint).ok();

    let container_selectors = ["div.newsItem", "li.listItem", "div.item", "article"];
    let mut items = Vec::new();

    for selector_str in container_selectors {
        let Ok(selector) = Selector::parse(selector_str) else {
            continue;
        };
        for element in document.select(&selector) {
            if let Some(item) = item_from_container(element, base.as_ref()) {
                items.push(item);
            }
        }
        if !items.is_empty() {
            break;
        }
    }

    if items.is_empty() {
        items = items_from_alert_links(&document, base.as_ref());
    }

    // Listing pages repeat entries in sidebars; keep the first occurrence.
    let mut seen = std::collections::HashSet::new();
    items.retain(|item| seen.insert(item.content_hash.clone()));
    items.truncate(MAX_ITEMS);
    items
}

fn item_from_container(element: ElementRef<'_>, base: Option<&url::Url>) -> Option<RawItem> {
    let link_selector = Selector::parse("a[href]").ok()?;
    let link = element.select(&link_selector).find(|a| {
        !a.text().collect::<String>().trim().is_empty()
    })?;

    let title = link.text().collect::<String>().trim().to_string();
    if title.is_empty() {
        return None;
    }
    let href = link.value().attr("href")?;
    let url = absolutize(href, base);

    let date = ["span.date", "time", "div.date"]
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .find_map(|selector| {
            element
                .select(&selector)
                .next()
                .map(|el| el.text().collect::<String>().trim().to_string())
        })
        .as_deref()
        .and_then(parse_listing_date);

    let snippet = Selector::parse("p").ok().and_then(|selector| {
        element
            .select(&selector)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|s| !s.is_empty())
    });

    let mut item = RawItem::new(ContentKind::News, title);
    item.external_id = alert_id_from_href(href);
    item.url = Some(url);
    item.published_at = date;
    item.description = snippet;
    item.category = Some("municipal".to_string());
    Some(item.finish())
}

/// Fallback: any CivicAlerts detail link counts as a news entry.
fn items_from_alert_links(document: &Html, base: Option<&url::Url>) -> Vec<RawItem> {
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    document
        .select(&selector)
        .filter_map(|link| {
            let href = link.value().attr("href")?;
            if !href.to_lowercase().contains("civicalerts.aspx") {
                return None;
            }
            let title = link.text().collect::<String>().trim().to_string();
            if title.is_empty() {
                return None;
            }
            let mut item = RawItem::new(ContentKind::News, title);
            item.external_id = alert_id_from_href(href);
            item.url = Some(absolutize(href, base));
            item.category = Some("municipal".to_string());
            Some(item.finish())
        })
        .collect()
}

fn absolutize(href: &str, base: Option<&url::Url>) -> String {
    match base {
        Some(base) => base
            .join(href)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| href.to_string()),
        None => href.to_string(),
    }
}

/// The AID query parameter of a CivicAlerts link, when present.
fn alert_id_from_href(href: &str) -> Option<String> {
    let lower = href.to_lowercase();
    let idx = lower.find("aid=")?;
    let id: String = href[idx + 4..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    (!id.is_empty()).then_some(id)
}

fn parse_listing_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim().trim_start_matches("Posted on").trim();
    for format in ["%B %d, %Y", "%m/%d/%Y", "%Y-%m-%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, format) {
            return d.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{civicplus_source, MockFetcher};

    const LISTING: &str = r#"
        <html><body>
          <div class="newsItem">
            <a href="/CivicAlerts.aspx?AID=310">Road resurfacing begins on Main Street</a>
            <span class="date">March 3, 2025</span>
            <p>Crews begin a three-week resurfacing project.</p>
          </div>
          <div class="newsItem">
            <a href="/CivicAlerts.aspx?AID=311">Parks department summer registration opens</a>
          </div>
        </body></html>"#;

    const BARE_LISTING: &str = r#"
        <html><body>
          <a href="/CivicAlerts.aspx?AID=99">Water tower maintenance scheduled</a>
          <a href="/Calendar.aspx">Calendar</a>
        </body></html>"#;

    #[test]
    fn containers_extracted_with_dates_and_ids() {
        let items = extract_news_items(LISTING, "https://www.springfield.gov/news");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "Road resurfacing begins on Main Street");
        assert_eq!(items[0].external_id.as_deref(), Some("310"));
        assert_eq!(
            items[0].url.as_deref(),
            Some("https://www.springfield.gov/CivicAlerts.aspx?AID=310")
        );
        assert!(items[0].published_at.is_some());
        assert_eq!(
            items[0].description.as_deref(),
            Some("Crews begin a three-week resurfacing project.")
        );
        assert!(items[1].published_at.is_none());
    }

    #[test]
    fn falls_back_to_civic_alert_links() {
        let items = extract_news_items(BARE_LISTING, "https://www.springfield.gov/news");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Water tower maintenance scheduled");
        assert_eq!(items[0].external_id.as_deref(), Some("99"));
    }

    #[tokio::test]
    async fn missing_endpoint_is_config_error() {
        let fetcher = MockFetcher::new();
        let adapter = CivicPlusAdapter::new(&fetcher);
        let mut source = civicplus_source("https://www.springfield.gov/news");
        source.endpoint_url = None;
        let err = adapter.collect(&source).await.unwrap_err();
        assert!(matches!(err, CivicWireError::Config(_)));
    }

    #[tokio::test]
    async fn empty_page_yields_zero_items_not_error() {
        let fetcher =
            MockFetcher::new().on_text("https://www.springfield.gov/news", "<html></html>");
        let adapter = CivicPlusAdapter::new(&fetcher);
        let source = civicplus_source("https://www.springfield.gov/news");
        let items = adapter.collect(&source).await.unwrap();
        assert!(items.is_empty());
    }
}
