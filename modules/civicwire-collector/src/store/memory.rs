//! In-memory store: a full implementation of the persistence ports backed by
//! std collections. Used for tests and dry runs; the durable implementation
//! is `store::postgres`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use civicwire_common::{
    ContentItem, NewArticle, ProcessingStatus, RawItem, Region, RunOutcome, RunStatus, Source,
};
use civicwire_common::types::CollectionRun;

use crate::traits::{ArticleSink, Cache, ContentStore, RegionDirectory};

#[derive(Default)]
struct Inner {
    regions: Vec<Region>,
    sources: Vec<Source>,
    runs: Vec<CollectionRun>,
    items: Vec<ContentItem>,
    articles: Vec<(Uuid, NewArticle)>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_region(&self, region: Region) {
        self.lock().regions.push(region);
    }

    pub fn insert_source(&self, source: Source) {
        self.lock().sources.push(source);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("memory store lock poisoned")
    }

    // --- Inspection helpers for tests ---

    pub fn source(&self, id: Uuid) -> Option<Source> {
        self.lock().sources.iter().find(|s| s.id == id).cloned()
    }

    pub fn all_sources(&self) -> Vec<Source> {
        self.lock().sources.clone()
    }

    pub fn runs_for_source(&self, source_id: Uuid) -> Vec<CollectionRun> {
        self.lock()
            .runs
            .iter()
            .filter(|r| r.source_id == source_id)
            .cloned()
            .collect()
    }

    pub fn items_for_source(&self, source_id: Uuid) -> Vec<ContentItem> {
        self.lock()
            .items
            .iter()
            .filter(|i| i.source_id == source_id)
            .cloned()
            .collect()
    }

    pub fn item(&self, id: Uuid) -> Option<ContentItem> {
        self.lock().items.iter().find(|i| i.id == id).cloned()
    }

    pub fn articles_for_region(&self, region_id: Uuid) -> Vec<NewArticle> {
        self.lock()
            .articles
            .iter()
            .filter(|(_, a)| a.region_id == region_id)
            .map(|(_, a)| a.clone())
            .collect()
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn sources_for_region(&self, region_id: Uuid) -> Result<Vec<Source>> {
        let inner = self.lock();
        Ok(inner
            .sources
            .iter()
            .filter(|s| s.region_id == region_id && s.enabled)
            .cloned()
            .collect())
    }

    async fn upsert_source(&self, source: &Source) -> Result<Source> {
        let mut inner = self.lock();
        let key = source.connection_key();
        if let Some(existing) = inner.sources.iter_mut().find(|s| {
            s.region_id == source.region_id
                && s.platform == source.platform
                && s.connection_key() == key
        }) {
            existing.name = source.name.clone();
            existing.endpoint_url = source.endpoint_url.clone();
            existing.client_id = source.client_id.clone();
            existing.agency_id = source.agency_id.clone();
            existing.zip_codes = source.zip_codes.clone();
            existing.entity_kind = source.entity_kind;
            existing.source_kind = source.source_kind;
            return Ok(existing.clone());
        }
        inner.sources.push(source.clone());
        Ok(source.clone())
    }

    async fn create_run(&self, source_id: Uuid, started_at: DateTime<Utc>) -> Result<Uuid> {
        let run = CollectionRun {
            id: Uuid::new_v4(),
            source_id,
            status: RunStatus::Running,
            started_at,
            finished_at: None,
            items_found: 0,
            items_new: 0,
            items_skipped: 0,
            error: None,
        };
        let id = run.id;
        self.lock().runs.push(run);
        Ok(id)
    }

    async fn finalize_run(
        &self,
        run_id: Uuid,
        outcome: RunOutcome,
        finished_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.lock();
        let Some(run) = inner.runs.iter_mut().find(|r| r.id == run_id) else {
            bail!("No run with id {run_id}");
        };
        if run.status != RunStatus::Running {
            bail!("Run {run_id} already finalized");
        }
        run.finished_at = Some(finished_at);
        match outcome {
            RunOutcome::Completed {
                items_found,
                items_new,
                items_skipped,
            } => {
                run.status = RunStatus::Completed;
                run.items_found = items_found;
                run.items_new = items_new;
                run.items_skipped = items_skipped;
            }
            RunOutcome::Failed { error } => {
                run.status = RunStatus::Failed;
                run.error = Some(error);
            }
        }
        Ok(())
    }

    async fn store_if_new(&self, raw: RawItem, source: &Source) -> Result<Option<ContentItem>> {
        let mut inner = self.lock();
        let duplicate = inner
            .items
            .iter()
            .any(|i| i.source_id == source.id && i.content_hash == raw.content_hash);
        if duplicate {
            return Ok(None);
        }
        let item = ContentItem::from_raw(raw, source, Utc::now());
        inner.items.push(item.clone());
        Ok(Some(item))
    }

    async fn record_source_success(
        &self,
        source_id: Uuid,
        items_new: u32,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.lock();
        if let Some(source) = inner.sources.iter_mut().find(|s| s.id == source_id) {
            source.health = civicwire_common::SourceHealth::Healthy;
            source.last_run_at = Some(now);
            source.last_success_at = Some(now);
            source.consecutive_failures = 0;
            source.items_collected += items_new as u64;
        }
        Ok(())
    }

    async fn record_source_failure(&self, source_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let mut inner = self.lock();
        if let Some(source) = inner.sources.iter_mut().find(|s| s.id == source_id) {
            source.health = civicwire_common::SourceHealth::Failing;
            source.last_run_at = Some(now);
            source.consecutive_failures += 1;
        }
        Ok(())
    }

    async fn pending_items(
        &self,
        region_id: Uuid,
        published_after: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ContentItem>> {
        let inner = self.lock();
        let mut pending: Vec<ContentItem> = inner
            .items
            .iter()
            .filter(|i| {
                i.region_id == region_id
                    && i.processing_status == ProcessingStatus::Pending
                    && effective_published(i) >= published_after
            })
            .cloned()
            .collect();
        pending.sort_by_key(|i| std::cmp::Reverse(effective_published(i)));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn mark_processed(&self, item_id: Uuid, article_id: Uuid) -> Result<()> {
        self.set_status(item_id, ProcessingStatus::Processed, Some(article_id))
    }

    async fn mark_skipped(&self, item_id: Uuid) -> Result<()> {
        self.set_status(item_id, ProcessingStatus::Skipped, None)
    }

    async fn mark_failed(&self, item_id: Uuid) -> Result<()> {
        self.set_status(item_id, ProcessingStatus::Failed, None)
    }
}

impl MemoryStore {
    fn set_status(
        &self,
        item_id: Uuid,
        status: ProcessingStatus,
        article_id: Option<Uuid>,
    ) -> Result<()> {
        let mut inner = self.lock();
        let Some(item) = inner.items.iter_mut().find(|i| i.id == item_id) else {
            bail!("No content item with id {item_id}");
        };
        item.processing_status = status;
        if article_id.is_some() {
            item.article_id = article_id;
        }
        Ok(())
    }
}

/// Items without a publish date fall back to their collection time for
/// windowing and ordering.
fn effective_published(item: &ContentItem) -> DateTime<Utc> {
    item.published_at.unwrap_or(item.collected_at)
}

#[async_trait]
impl ArticleSink for MemoryStore {
    async fn create_if_new(&self, article: &NewArticle) -> Result<Option<Uuid>> {
        let mut inner = self.lock();
        let duplicate = inner
            .articles
            .iter()
            .any(|(_, a)| a.region_id == article.region_id && a.content_hash == article.content_hash);
        if duplicate {
            return Ok(None);
        }
        let id = Uuid::new_v4();
        inner.articles.push((id, article.clone()));
        Ok(Some(id))
    }
}

#[async_trait]
impl RegionDirectory for MemoryStore {
    async fn region_by_slug(&self, slug: &str) -> Result<Option<Region>> {
        Ok(self.lock().regions.iter().find(|r| r.slug == slug).cloned())
    }
}

// ---------------------------------------------------------------------------
// MemoryCache
// ---------------------------------------------------------------------------

/// TTL-bounded key/value cache for discovery results.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (serde_json::Value, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Option<serde_json::Value> {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        match entries.get(key) {
            Some((value, deadline)) if *deadline > Instant::now() => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn put(&self, key: &str, value: serde_json::Value, ttl: Duration) {
        let deadline = Instant::now() + ttl;
        self.entries
            .lock()
            .expect("cache lock poisoned")
            .insert(key.to_string(), (value, deadline));
    }
}
