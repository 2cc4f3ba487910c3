//! Content processor: scans pending items, applies promotion eligibility
//! rules, and creates downstream news articles through the sink's own
//! (region, hash) dedup barrier. Item failures are isolated: one bad item
//! marks itself Failed and the loop moves on.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use civicwire_common::{article_hash, AlertUrgency, ContentItem, ContentKind, NewArticle, Region};

use crate::traits::{ArticleSink, ContentStore};

/// Only items published inside this window are considered.
const RECENCY_WINDOW_DAYS: i64 = 14;
/// Generic items need at least this many characters of title to be worth an
/// article.
const MIN_TITLE_CHARS: usize = 10;
/// Snippet cap for article bodies built from full content.
const SNIPPET_CHARS: usize = 280;

#[derive(Debug, Default)]
pub struct ProcessStats {
    pub scanned: u32,
    pub promoted: u32,
    pub duplicates: u32,
    pub ineligible: u32,
    pub failed: u32,
    pub errors: Vec<String>,
}

impl std::fmt::Display for ProcessStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Processing: scanned={}, promoted={}, duplicates={}, ineligible={}, failed={}",
            self.scanned, self.promoted, self.duplicates, self.ineligible, self.failed
        )
    }
}

pub struct ContentProcessor {
    store: Arc<dyn ContentStore>,
    sink: Arc<dyn ArticleSink>,
}

impl ContentProcessor {
    pub fn new(store: Arc<dyn ContentStore>, sink: Arc<dyn ArticleSink>) -> Self {
        Self { store, sink }
    }

    /// Promote eligible pending items of a region, most recently published
    /// first, bounded by `limit`.
    pub async fn process_pending(&self, region: &Region, limit: usize) -> Result<ProcessStats> {
        let now = Utc::now();
        let window_start = now - Duration::days(RECENCY_WINDOW_DAYS);
        let items = self.store.pending_items(region.id, window_start, limit).await?;

        let mut stats = ProcessStats::default();

        for item in items {
            stats.scanned += 1;

            if !should_process(&item, now) {
                self.store.mark_skipped(item.id).await?;
                stats.ineligible += 1;
                continue;
            }

            match self.promote(&item, region).await {
                Ok(Some(article_id)) => {
                    self.store.mark_processed(item.id, article_id).await?;
                    stats.promoted += 1;
                }
                Ok(None) => {
                    self.store.mark_skipped(item.id).await?;
                    stats.duplicates += 1;
                }
                Err(e) => {
                    warn!(
                        item_id = %item.id,
                        title = item.title.as_str(),
                        error = %e,
                        "Item promotion failed"
                    );
                    if let Err(mark_err) = self.store.mark_failed(item.id).await {
                        warn!(item_id = %item.id, error = %mark_err, "Failed to mark item failed");
                    }
                    stats.failed += 1;
                    stats.errors.push(format!("{}: {e}", item.id));
                }
            }
        }

        info!(region = region.slug.as_str(), "{stats}");
        Ok(stats)
    }

    async fn promote(&self, item: &ContentItem, region: &Region) -> Result<Option<Uuid>> {
        let title = article_title(item);
        let snippet = item
            .description
            .clone()
            .or_else(|| item.content.as_ref().map(|c| truncate(c, SNIPPET_CHARS)));

        let article = NewArticle {
            region_id: region.id,
            content_hash: article_hash(&title, item.url.as_deref()),
            title,
            url: item.url.clone(),
            snippet,
            source_name: item.source_name.clone(),
            published_at: item.published_at,
            metadata: serde_json::json!({
                "content_item_id": item.id,
                "content_kind": item.content_kind.as_str(),
                "category": item.category,
                "platform": item.platform.as_str(),
                "event_date": item.event_date,
                "body_name": item.body_name,
                "alert_kind": item.alert_kind.map(|k| k.as_str()),
                "urgency": item.urgency.map(|u| u.as_str()),
            }),
        };

        self.sink.create_if_new(&article).await
    }
}

/// Promotion eligibility per content kind.
fn should_process(item: &ContentItem, now: DateTime<Utc>) -> bool {
    match item.content_kind {
        // Safety items are only worth publishing while still in effect.
        ContentKind::Alert | ContentKind::Advisory => {
            item.expires_at.map(|expires| expires > now).unwrap_or(true)
        }
        // A meeting that already happened is not news.
        ContentKind::Meeting | ContentKind::Agenda => {
            item.event_date.map(|date| date >= now).unwrap_or(true)
        }
        ContentKind::Matter => true,
        _ => item.title.trim().chars().count() >= MIN_TITLE_CHARS,
    }
}

/// Per-kind title templates for the downstream article.
fn article_title(item: &ContentItem) -> String {
    match item.content_kind {
        ContentKind::Meeting | ContentKind::Agenda => {
            match (&item.body_name, item.event_date) {
                (Some(body), Some(date)) => {
                    format!("{} Meeting Scheduled for {}", body, date.format("%B %-d"))
                }
                _ => item.title.clone(),
            }
        }
        ContentKind::Alert | ContentKind::Advisory => {
            if item.urgency == Some(AlertUrgency::Immediate)
                && !item.title.to_uppercase().contains("ALERT")
            {
                format!("ALERT: {}", item.title)
            } else {
                item.title.clone()
            }
        }
        _ => item.title.clone(),
    }
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
    use crate::store::MemoryStore;
    use crate::testing::{media_source, raw_item, test_region};
    use civicwire_common::{ProcessingStatus, RawItem, Source};

    fn seeded_store() -> (Arc<MemoryStore>, Region, Source) {
        let store = Arc::new(MemoryStore::new());
        let region = test_region();
        let mut source = media_source("https://gazette.example.com/feed");
        source.region_id = region.id;
        store.insert_source(source.clone());
        (store, region, source)
    }

    async fn stored(store: &MemoryStore, raw: RawItem, source: &Source) -> ContentItem {
        store.store_if_new(raw, source).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn past_meeting_is_never_promoted() {
        let (store, region, source) = seeded_store();
        let now = Utc::now();

        let mut raw = raw_item(ContentKind::Meeting, "City Commission Meeting", now);
        raw.body_name = Some("City Commission".to_string());
        raw.event_date = Some(now - Duration::days(2));
        let item = stored(&store, raw.finish(), &source).await;

        let processor = ContentProcessor::new(store.clone(), store.clone());
        let stats = processor.process_pending(&region, 10).await.unwrap();

        assert_eq!(stats.ineligible, 1);
        assert_eq!(stats.promoted, 0);
        assert_eq!(
            store.item(item.id).unwrap().processing_status,
            ProcessingStatus::Skipped
        );
        assert!(store.articles_for_region(region.id).is_empty());
    }

    #[tokio::test]
    async fn expired_alert_is_never_promoted() {
        let (store, region, source) = seeded_store();
        let now = Utc::now();

        let mut raw = raw_item(ContentKind::Alert, "Flood warning for river district", now);
        raw.expires_at = Some(now - Duration::hours(1));
        stored(&store, raw.finish(), &source).await;

        let processor = ContentProcessor::new(store.clone(), store.clone());
        let stats = processor.process_pending(&region, 10).await.unwrap();
        assert_eq!(stats.ineligible, 1);
        assert_eq!(stats.promoted, 0);
    }

    #[tokio::test]
    async fn title_length_boundary_for_generic_items() {
        let (store, region, source) = seeded_store();
        let now = Utc::now();

        stored(&store, raw_item(ContentKind::News, "Nine char.", now), &source).await; // 10 chars
        stored(&store, raw_item(ContentKind::News, "Nine char", now), &source).await; // 9 chars

        let processor = ContentProcessor::new(store.clone(), store.clone());
        let stats = processor.process_pending(&region, 10).await.unwrap();

        assert_eq!(stats.promoted, 1);
        assert_eq!(stats.ineligible, 1);
        let titles: Vec<String> = store
            .articles_for_region(region.id)
            .into_iter()
            .map(|a| a.title)
            .collect();
        assert_eq!(titles, vec!["Nine char.".to_string()]);
    }

    #[tokio::test]
    async fn meeting_title_template_applied() {
        let (store, region, source) = seeded_store();
        let now = Utc::now();

        let mut raw = raw_item(ContentKind::Meeting, "City Commission Meeting - internal", now);
        raw.body_name = Some("City Commission".to_string());
        // Keep the meeting in the future relative to the test clock.
        raw.event_date = Some(now + Duration::days(10));
        let expected = format!(
            "City Commission Meeting Scheduled for {}",
            (now + Duration::days(10)).format("%B %-d")
        );
        stored(&store, raw.finish(), &source).await;

        let processor = ContentProcessor::new(store.clone(), store.clone());
        let stats = processor.process_pending(&region, 10).await.unwrap();
        assert_eq!(stats.promoted, 1);

        let articles = store.articles_for_region(region.id);
        assert_eq!(articles[0].title, expected);
    }

    #[tokio::test]
    async fn immediate_alert_gets_prefix_unless_present() {
        let (store, region, source) = seeded_store();
        let now = Utc::now();

        let mut raw = raw_item(ContentKind::Alert, "Chemical spill on Route 9", now);
        raw.urgency = Some(AlertUrgency::Immediate);
        stored(&store, raw.finish(), &source).await;

        let mut already = raw_item(ContentKind::Alert, "Amber Alert issued for area", now);
        already.urgency = Some(AlertUrgency::Immediate);
        stored(&store, already.finish(), &source).await;

        let processor = ContentProcessor::new(store.clone(), store.clone());
        processor.process_pending(&region, 10).await.unwrap();

        let mut titles: Vec<String> = store
            .articles_for_region(region.id)
            .into_iter()
            .map(|a| a.title)
            .collect();
        titles.sort();
        assert_eq!(
            titles,
            vec![
                "ALERT: Chemical spill on Route 9".to_string(),
                "Amber Alert issued for area".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn duplicate_article_hash_marks_item_skipped() {
        let (store, region, source) = seeded_store();
        let now = Utc::now();

        // Two distinct items (different external ids → different content
        // hashes) that render to the same article title + url.
        let mut first = raw_item(ContentKind::News, "Council weighs rezoning plan", now);
        first.external_id = Some("a".to_string());
        let mut second = raw_item(ContentKind::News, "Council weighs rezoning plan", now);
        second.external_id = Some("b".to_string());
        let first_item = stored(&store, first.finish(), &source).await;
        let second_item = stored(&store, second.finish(), &source).await;

        let processor = ContentProcessor::new(store.clone(), store.clone());
        let stats = processor.process_pending(&region, 10).await.unwrap();

        assert_eq!(stats.promoted, 1);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(store.articles_for_region(region.id).len(), 1);

        let statuses: Vec<ProcessingStatus> = [first_item.id, second_item.id]
            .iter()
            .map(|id| store.item(*id).unwrap().processing_status)
            .collect();
        assert!(statuses.contains(&ProcessingStatus::Processed));
        assert!(statuses.contains(&ProcessingStatus::Skipped));
    }

    #[tokio::test]
    async fn second_pass_produces_no_new_articles() {
        let (store, region, source) = seeded_store();
        let now = Utc::now();

        stored(&store, raw_item(ContentKind::Matter, "ORD-2025-01: Zoning amendment", now), &source)
            .await;

        let processor = ContentProcessor::new(store.clone(), store.clone());
        let first = processor.process_pending(&region, 10).await.unwrap();
        assert_eq!(first.promoted, 1);

        let second = processor.process_pending(&region, 10).await.unwrap();
        assert_eq!(second.scanned, 0);
        assert_eq!(second.promoted, 0);
        assert_eq!(store.articles_for_region(region.id).len(), 1);
    }
}
