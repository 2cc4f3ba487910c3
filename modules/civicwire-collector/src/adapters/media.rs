//! Media portal adapter: RSS/Atom feed of a local news outlet.

use async_trait::async_trait;
use tracing::info;

use civicwire_common::{CivicWireError, ContentKind, RawItem, Source};

use crate::adapters::PlatformAdapter;
use crate::traits::Fetcher;

pub struct MediaFeedAdapter<'a> {
    fetcher: &'a dyn Fetcher,
}

impl<'a> MediaFeedAdapter<'a> {
    pub fn new(fetcher: &'a dyn Fetcher) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl PlatformAdapter for MediaFeedAdapter<'_> {
    async fn collect(&self, source: &Source) -> Result<Vec<RawItem>, CivicWireError> {
        let endpoint = source.endpoint_url.as_deref().ok_or_else(|| {
            CivicWireError::Config(format!(
                "Media feed source '{}' has no endpoint URL",
                source.name
            ))
        })?;

        let xml = self.fetcher.get_text(endpoint).await?;
        let feed = feed_rs::parser::parse(xml.as_bytes())
            .map_err(|e| CivicWireError::Parse(format!("Invalid feed from {endpoint}: {e}")))?;

        let mut items = Vec::new();
        for entry in feed.entries {
            let title = match entry.title.as_ref() {
                Some(t) if !t.content.trim().is_empty() => t.content.trim().to_string(),
                _ => continue,
            };

            let mut item = RawItem::new(ContentKind::News, title);
            item.external_id = Some(entry.id.clone());
            item.url = entry.links.first().map(|l| l.href.clone());
            item.published_at = entry.published.or(entry.updated);
            item.description = entry
                .summary
                .as_ref()
                .map(|s| s.content.trim().to_string())
                .filter(|s| !s.is_empty());
            item.category = entry.categories.first().map(|c| c.term.clone());
            items.push(item.finish());
        }

        info!(endpoint, count = items.len(), "Media feed collected");
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{media_source, MockFetcher};

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
        <rss version="2.0"><channel>
          <title>Springfield Gazette</title>
          <item>
            <title>Council weighs riverfront rezoning</title>
            <link>https://gazette.example.com/news/riverfront-rezoning</link>
            <guid>gazette-4411</guid>
            <pubDate>Sat, 01 Mar 2025 09:00:00 GMT</pubDate>
            <description>The proposal returns for a second reading.</description>
            <category>government</category>
          </item>
          <item>
            <title></title>
            <link>https://gazette.example.com/news/untitled</link>
          </item>
        </channel></rss>"#;

    #[tokio::test]
    async fn feed_items_normalized_and_untitled_entries_dropped() {
        let fetcher = MockFetcher::new().on_text("https://gazette.example.com/feed", FEED);
        let adapter = MediaFeedAdapter::new(&fetcher);
        let source = media_source("https://gazette.example.com/feed");

        let items = adapter.collect(&source).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Council weighs riverfront rezoning");
        assert_eq!(items[0].content_kind, ContentKind::News);
        assert_eq!(
            items[0].url.as_deref(),
            Some("https://gazette.example.com/news/riverfront-rezoning")
        );
        assert_eq!(items[0].category.as_deref(), Some("government"));
        assert!(items[0].published_at.is_some());
    }

    #[tokio::test]
    async fn malformed_feed_is_parse_error() {
        let fetcher =
            MockFetcher::new().on_text("https://gazette.example.com/feed", "not a feed at all");
        let adapter = MediaFeedAdapter::new(&fetcher);
        let source = media_source("https://gazette.example.com/feed");
        let err = adapter.collect(&source).await.unwrap_err();
        assert!(matches!(err, CivicWireError::Parse(_)));
    }
}
