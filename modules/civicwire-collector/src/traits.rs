// Trait abstractions for the pipeline's external dependencies.
//
// Fetcher — all HTTP behind one trait (API JSON, HTML pages, feeds, probes).
// ContentStore — source/run/item persistence with the per-source dedup gate.
// ArticleSink — the downstream "create article if new" collaborator.
// RegionDirectory — region lookup owned by an external collaborator.
// Cache — key/value cache with TTL for discovery results.
// ChatModel — the discovery model endpoint.
//
// These enable deterministic testing with the mocks in `testing`:
// no network, no database. `cargo test` in seconds.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use civicwire_common::{
    CivicWireError, ContentItem, NewArticle, RawItem, Region, RunOutcome, Source,
};

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// GET a URL and parse the body as JSON.
    async fn get_json(&self, url: &str) -> Result<serde_json::Value, CivicWireError>;

    /// GET a URL and return the raw body (HTML or XML).
    async fn get_text(&self, url: &str) -> Result<String, CivicWireError>;

    /// Lightweight existence probe: true on any 2xx response.
    async fn probe(&self, url: &str) -> Result<bool, CivicWireError>;
}

// ---------------------------------------------------------------------------
// ContentStore
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Enabled sources for a region, in stable query order.
    async fn sources_for_region(&self, region_id: Uuid) -> Result<Vec<Source>>;

    /// Insert or update a source keyed by (region_id, platform,
    /// connection_key). Repeated discovery runs converge on the same row.
    async fn upsert_source(&self, source: &Source) -> Result<Source>;

    /// Open a collection run in Running state. Returns the run id.
    async fn create_run(&self, source_id: Uuid, started_at: DateTime<Utc>) -> Result<Uuid>;

    /// Finalize a run exactly once with its terminal outcome.
    async fn finalize_run(
        &self,
        run_id: Uuid,
        outcome: RunOutcome,
        finished_at: DateTime<Utc>,
    ) -> Result<()>;

    /// The single ingestion dedup gate: persists the item with Pending status
    /// unless an item with the same content hash already exists for this
    /// source, in which case returns None.
    async fn store_if_new(&self, raw: RawItem, source: &Source) -> Result<Option<ContentItem>>;

    async fn record_source_success(
        &self,
        source_id: Uuid,
        items_new: u32,
        now: DateTime<Utc>,
    ) -> Result<()>;

    async fn record_source_failure(&self, source_id: Uuid, now: DateTime<Utc>) -> Result<()>;

    /// Pending items for a region published at or after `published_after`,
    /// most recently published first, bounded to `limit`.
    async fn pending_items(
        &self,
        region_id: Uuid,
        published_after: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ContentItem>>;

    async fn mark_processed(&self, item_id: Uuid, article_id: Uuid) -> Result<()>;

    async fn mark_skipped(&self, item_id: Uuid) -> Result<()>;

    async fn mark_failed(&self, item_id: Uuid) -> Result<()>;
}

// ---------------------------------------------------------------------------
// ArticleSink
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ArticleSink: Send + Sync {
    /// Create a downstream article unless one with the same content hash
    /// already exists for the region. Returns the new article id, or None
    /// when the hash was already present.
    async fn create_if_new(&self, article: &NewArticle) -> Result<Option<Uuid>>;
}

// ---------------------------------------------------------------------------
// RegionDirectory
// ---------------------------------------------------------------------------

#[async_trait]
pub trait RegionDirectory: Send + Sync {
    async fn region_by_slug(&self, slug: &str) -> Result<Option<Region>>;
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Option<serde_json::Value>;

    async fn put(&self, key: &str, value: serde_json::Value, ttl: Duration);
}

// ---------------------------------------------------------------------------
// ChatModel
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// One system + user exchange; returns the raw assistant text.
    async fn chat(&self, system: &str, user: &str) -> Result<String>;
}

#[async_trait]
impl ChatModel for ai_client::OpenAi {
    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        self.chat_completion(system, user).await
    }
}
