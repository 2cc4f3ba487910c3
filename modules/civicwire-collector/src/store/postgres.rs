//! Durable Postgres store. Runtime-checked sqlx queries; the schema is
//! created by the idempotent `migrate` function. Both dedup barriers are
//! enforced with unique indexes in addition to the insert-if-absent queries,
//! so concurrent writers cannot slip a duplicate through.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use civicwire_common::types::CollectionRun;
use civicwire_common::{
    AlertKind, AlertSeverity, AlertUrgency, ContentItem, ContentKind, EntityKind, MeetingKind,
    NewArticle, Platform, ProcessingStatus, RawItem, Region, RunOutcome, RunStatus, Source,
    SourceHealth, SourceKind,
};

use crate::traits::{ArticleSink, ContentStore, RegionDirectory};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS regions (
        id UUID PRIMARY KEY,
        slug TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        state TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS sources (
        id UUID PRIMARY KEY,
        region_id UUID NOT NULL,
        name TEXT NOT NULL,
        platform TEXT NOT NULL,
        source_kind TEXT NOT NULL,
        entity_kind TEXT NOT NULL,
        endpoint_url TEXT,
        client_id TEXT,
        agency_id TEXT,
        zip_codes TEXT[] NOT NULL DEFAULT '{}',
        connection_key TEXT NOT NULL,
        poll_interval_minutes INTEGER NOT NULL,
        enabled BOOLEAN NOT NULL DEFAULT TRUE,
        health TEXT NOT NULL,
        last_run_at TIMESTAMPTZ,
        last_success_at TIMESTAMPTZ,
        consecutive_failures INTEGER NOT NULL DEFAULT 0,
        items_collected BIGINT NOT NULL DEFAULT 0,
        auto_discovered BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS sources_identity
        ON sources (region_id, platform, connection_key)",
    "CREATE TABLE IF NOT EXISTS collection_runs (
        id UUID PRIMARY KEY,
        source_id UUID NOT NULL,
        status TEXT NOT NULL,
        started_at TIMESTAMPTZ NOT NULL,
        finished_at TIMESTAMPTZ,
        items_found INTEGER NOT NULL DEFAULT 0,
        items_new INTEGER NOT NULL DEFAULT 0,
        items_skipped INTEGER NOT NULL DEFAULT 0,
        error TEXT
    )",
    "CREATE INDEX IF NOT EXISTS collection_runs_source
        ON collection_runs (source_id, started_at DESC)",
    "CREATE TABLE IF NOT EXISTS content_items (
        id UUID PRIMARY KEY,
        source_id UUID NOT NULL,
        region_id UUID NOT NULL,
        platform TEXT NOT NULL,
        source_name TEXT NOT NULL,
        content_kind TEXT NOT NULL,
        external_id TEXT,
        title TEXT NOT NULL,
        description TEXT,
        content TEXT,
        url TEXT,
        published_at TIMESTAMPTZ,
        event_date TIMESTAMPTZ,
        expires_at TIMESTAMPTZ,
        category TEXT,
        subcategory TEXT,
        tags TEXT[] NOT NULL DEFAULT '{}',
        body_name TEXT,
        meeting_kind TEXT,
        agenda_url TEXT,
        alert_kind TEXT,
        urgency TEXT,
        severity TEXT,
        agency TEXT,
        raw JSONB NOT NULL DEFAULT 'null',
        content_hash TEXT NOT NULL,
        processing_status TEXT NOT NULL,
        article_id UUID,
        collected_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS content_items_dedup
        ON content_items (source_id, content_hash)",
    "CREATE INDEX IF NOT EXISTS content_items_pending
        ON content_items (region_id, processing_status, published_at DESC)",
    "CREATE TABLE IF NOT EXISTS news_articles (
        id UUID PRIMARY KEY,
        region_id UUID NOT NULL,
        title TEXT NOT NULL,
        url TEXT,
        snippet TEXT,
        source_name TEXT NOT NULL,
        published_at TIMESTAMPTZ,
        content_hash TEXT NOT NULL,
        metadata JSONB NOT NULL DEFAULT 'null',
        created_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS news_articles_dedup
        ON news_articles (region_id, content_hash)",
];

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Idempotent schema creation.
    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Database schema up to date");
        Ok(())
    }

    pub async fn upsert_region(&self, region: &Region) -> Result<()> {
        sqlx::query(
            "INSERT INTO regions (id, slug, name, state) VALUES ($1, $2, $3, $4)
             ON CONFLICT (slug) DO UPDATE SET name = $3, state = $4",
        )
        .bind(region.id)
        .bind(&region.slug)
        .bind(&region.name)
        .bind(&region.state)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn runs_for_source(&self, source_id: Uuid, limit: i64) -> Result<Vec<CollectionRun>> {
        let rows = sqlx::query(
            "SELECT * FROM collection_runs WHERE source_id = $1
             ORDER BY started_at DESC LIMIT $2",
        )
        .bind(source_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(run_from_row).collect()
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn source_from_row(row: &PgRow) -> Result<Source> {
    Ok(Source {
        id: row.try_get("id")?,
        region_id: row.try_get("region_id")?,
        name: row.try_get("name")?,
        platform: row.try_get::<String, _>("platform")?.parse::<Platform>()?,
        source_kind: row.try_get::<String, _>("source_kind")?.parse::<SourceKind>()?,
        entity_kind: row.try_get::<String, _>("entity_kind")?.parse::<EntityKind>()?,
        endpoint_url: row.try_get("endpoint_url")?,
        client_id: row.try_get("client_id")?,
        agency_id: row.try_get("agency_id")?,
        zip_codes: row.try_get("zip_codes")?,
        poll_interval_minutes: row.try_get::<i32, _>("poll_interval_minutes")? as u32,
        enabled: row.try_get("enabled")?,
        health: row.try_get::<String, _>("health")?.parse::<SourceHealth>()?,
        last_run_at: row.try_get("last_run_at")?,
        last_success_at: row.try_get("last_success_at")?,
        consecutive_failures: row.try_get::<i32, _>("consecutive_failures")? as u32,
        items_collected: row.try_get::<i64, _>("items_collected")? as u64,
        auto_discovered: row.try_get("auto_discovered")?,
        created_at: row.try_get("created_at")?,
    })
}

fn run_from_row(row: &PgRow) -> Result<CollectionRun> {
    Ok(CollectionRun {
        id: row.try_get("id")?,
        source_id: row.try_get("source_id")?,
        status: row.try_get::<String, _>("status")?.parse::<RunStatus>()?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        items_found: row.try_get::<i32, _>("items_found")? as u32,
        items_new: row.try_get::<i32, _>("items_new")? as u32,
        items_skipped: row.try_get::<i32, _>("items_skipped")? as u32,
        error: row.try_get("error")?,
    })
}

fn item_from_row(row: &PgRow) -> Result<ContentItem> {
    Ok(ContentItem {
        id: row.try_get("id")?,
        source_id: row.try_get("source_id")?,
        region_id: row.try_get("region_id")?,
        platform: row.try_get::<String, _>("platform")?.parse::<Platform>()?,
        source_name: row.try_get("source_name")?,
        content_kind: row.try_get::<String, _>("content_kind")?.parse::<ContentKind>()?,
        external_id: row.try_get("external_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        content: row.try_get("content")?,
        url: row.try_get("url")?,
        published_at: row.try_get("published_at")?,
        event_date: row.try_get("event_date")?,
        expires_at: row.try_get("expires_at")?,
        category: row.try_get("category")?,
        subcategory: row.try_get("subcategory")?,
        tags: row.try_get("tags")?,
        body_name: row.try_get("body_name")?,
        meeting_kind: parse_opt::<MeetingKind>(row.try_get("meeting_kind")?)?,
        agenda_url: row.try_get("agenda_url")?,
        alert_kind: parse_opt::<AlertKind>(row.try_get("alert_kind")?)?,
        urgency: parse_opt::<AlertUrgency>(row.try_get("urgency")?)?,
        severity: parse_opt::<AlertSeverity>(row.try_get("severity")?)?,
        agency: row.try_get("agency")?,
        raw: row.try_get("raw")?,
        content_hash: row.try_get("content_hash")?,
        processing_status: row
            .try_get::<String, _>("processing_status")?
            .parse::<ProcessingStatus>()?,
        article_id: row.try_get("article_id")?,
        collected_at: row.try_get("collected_at")?,
    })
}

fn parse_opt<T: std::str::FromStr>(value: Option<String>) -> Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value.map(|s| s.parse::<T>()).transpose().map_err(Into::into)
}

// ---------------------------------------------------------------------------
// ContentStore
// ---------------------------------------------------------------------------

#[async_trait]
impl ContentStore for PgStore {
    async fn sources_for_region(&self, region_id: Uuid) -> Result<Vec<Source>> {
        let rows = sqlx::query(
            "SELECT * FROM sources WHERE region_id = $1 AND enabled ORDER BY created_at, id",
        )
        .bind(region_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(source_from_row).collect()
    }

    async fn upsert_source(&self, source: &Source) -> Result<Source> {
        let row = sqlx::query(
            "INSERT INTO sources (
                id, region_id, name, platform, source_kind, entity_kind,
                endpoint_url, client_id, agency_id, zip_codes, connection_key,
                poll_interval_minutes, enabled, health, last_run_at,
                last_success_at, consecutive_failures, items_collected,
                auto_discovered, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                      $14, $15, $16, $17, $18, $19, $20)
            ON CONFLICT (region_id, platform, connection_key) DO UPDATE SET
                name = EXCLUDED.name,
                source_kind = EXCLUDED.source_kind,
                entity_kind = EXCLUDED.entity_kind,
                endpoint_url = EXCLUDED.endpoint_url,
                client_id = EXCLUDED.client_id,
                agency_id = EXCLUDED.agency_id,
                zip_codes = EXCLUDED.zip_codes
            RETURNING *",
        )
        .bind(source.id)
        .bind(source.region_id)
        .bind(&source.name)
        .bind(source.platform.as_str())
        .bind(source.source_kind.as_str())
        .bind(source.entity_kind.as_str())
        .bind(&source.endpoint_url)
        .bind(&source.client_id)
        .bind(&source.agency_id)
        .bind(&source.zip_codes)
        .bind(source.connection_key())
        .bind(source.poll_interval_minutes as i32)
        .bind(source.enabled)
        .bind(source.health.as_str())
        .bind(source.last_run_at)
        .bind(source.last_success_at)
        .bind(source.consecutive_failures as i32)
        .bind(source.items_collected as i64)
        .bind(source.auto_discovered)
        .bind(source.created_at)
        .fetch_one(&self.pool)
        .await?;
        source_from_row(&row)
    }

    async fn create_run(&self, source_id: Uuid, started_at: DateTime<Utc>) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO collection_runs (id, source_id, status, started_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(id)
        .bind(source_id)
        .bind(RunStatus::Running.as_str())
        .bind(started_at)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    async fn finalize_run(
        &self,
        run_id: Uuid,
        outcome: RunOutcome,
        finished_at: DateTime<Utc>,
    ) -> Result<()> {
        // The status guard makes finalization single-shot even under races.
        let result = match outcome {
            RunOutcome::Completed {
                items_found,
                items_new,
                items_skipped,
            } => {
                sqlx::query(
                    "UPDATE collection_runs SET status = $2, finished_at = $3,
                     items_found = $4, items_new = $5, items_skipped = $6
                     WHERE id = $1 AND status = $7",
                )
                .bind(run_id)
                .bind(RunStatus::Completed.as_str())
                .bind(finished_at)
                .bind(items_found as i32)
                .bind(items_new as i32)
                .bind(items_skipped as i32)
                .bind(RunStatus::Running.as_str())
                .execute(&self.pool)
                .await?
            }
            RunOutcome::Failed { error } => {
                sqlx::query(
                    "UPDATE collection_runs SET status = $2, finished_at = $3, error = $4
                     WHERE id = $1 AND status = $5",
                )
                .bind(run_id)
                .bind(RunStatus::Failed.as_str())
                .bind(finished_at)
                .bind(error)
                .bind(RunStatus::Running.as_str())
                .execute(&self.pool)
                .await?
            }
        };
        if result.rows_affected() == 0 {
            anyhow::bail!("Run {run_id} not found or already finalized");
        }
        Ok(())
    }

    async fn store_if_new(&self, raw: RawItem, source: &Source) -> Result<Option<ContentItem>> {
        let item = ContentItem::from_raw(raw, source, Utc::now());
        let inserted = sqlx::query(
            "INSERT INTO content_items (
                id, source_id, region_id, platform, source_name, content_kind,
                external_id, title, description, content, url, published_at,
                event_date, expires_at, category, subcategory, tags, body_name,
                meeting_kind, agenda_url, alert_kind, urgency, severity, agency,
                raw, content_hash, processing_status, article_id, collected_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                      $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24,
                      $25, $26, $27, $28, $29)
            ON CONFLICT (source_id, content_hash) DO NOTHING
            RETURNING id",
        )
        .bind(item.id)
        .bind(item.source_id)
        .bind(item.region_id)
        .bind(item.platform.as_str())
        .bind(&item.source_name)
        .bind(item.content_kind.as_str())
        .bind(&item.external_id)
        .bind(&item.title)
        .bind(&item.description)
        .bind(&item.content)
        .bind(&item.url)
        .bind(item.published_at)
        .bind(item.event_date)
        .bind(item.expires_at)
        .bind(&item.category)
        .bind(&item.subcategory)
        .bind(&item.tags)
        .bind(&item.body_name)
        .bind(item.meeting_kind.map(|k| k.as_str()))
        .bind(&item.agenda_url)
        .bind(item.alert_kind.map(|k| k.as_str()))
        .bind(item.urgency.map(|u| u.as_str()))
        .bind(item.severity.map(|s| s.as_str()))
        .bind(&item.agency)
        .bind(&item.raw)
        .bind(&item.content_hash)
        .bind(item.processing_status.as_str())
        .bind(item.article_id)
        .bind(item.collected_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(inserted.map(|_| item))
    }

    async fn record_source_success(
        &self,
        source_id: Uuid,
        items_new: u32,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE sources SET health = $2, last_run_at = $3, last_success_at = $3,
             consecutive_failures = 0, items_collected = items_collected + $4
             WHERE id = $1",
        )
        .bind(source_id)
        .bind(SourceHealth::Healthy.as_str())
        .bind(now)
        .bind(items_new as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_source_failure(&self, source_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE sources SET health = $2, last_run_at = $3,
             consecutive_failures = consecutive_failures + 1
             WHERE id = $1",
        )
        .bind(source_id)
        .bind(SourceHealth::Failing.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn pending_items(
        &self,
        region_id: Uuid,
        published_after: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ContentItem>> {
        let rows = sqlx::query(
            "SELECT * FROM content_items
             WHERE region_id = $1 AND processing_status = $2
               AND COALESCE(published_at, collected_at) >= $3
             ORDER BY COALESCE(published_at, collected_at) DESC
             LIMIT $4",
        )
        .bind(region_id)
        .bind(ProcessingStatus::Pending.as_str())
        .bind(published_after)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(item_from_row).collect()
    }

    async fn mark_processed(&self, item_id: Uuid, article_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE content_items SET processing_status = $2, article_id = $3 WHERE id = $1",
        )
        .bind(item_id)
        .bind(ProcessingStatus::Processed.as_str())
        .bind(article_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_skipped(&self, item_id: Uuid) -> Result<()> {
        self.set_status(item_id, ProcessingStatus::Skipped).await
    }

    async fn mark_failed(&self, item_id: Uuid) -> Result<()> {
        self.set_status(item_id, ProcessingStatus::Failed).await
    }
}

impl PgStore {
    async fn set_status(&self, item_id: Uuid, status: ProcessingStatus) -> Result<()> {
        sqlx::query("UPDATE content_items SET processing_status = $2 WHERE id = $1")
            .bind(item_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ArticleSink
// ---------------------------------------------------------------------------

#[async_trait]
impl ArticleSink for PgStore {
    async fn create_if_new(&self, article: &NewArticle) -> Result<Option<Uuid>> {
        let id = Uuid::new_v4();
        let inserted = sqlx::query(
            "INSERT INTO news_articles (
                id, region_id, title, url, snippet, source_name, published_at,
                content_hash, metadata, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (region_id, content_hash) DO NOTHING
            RETURNING id",
        )
        .bind(id)
        .bind(article.region_id)
        .bind(&article.title)
        .bind(&article.url)
        .bind(&article.snippet)
        .bind(&article.source_name)
        .bind(article.published_at)
        .bind(&article.content_hash)
        .bind(&article.metadata)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;
        Ok(inserted.map(|_| id))
    }
}

// ---------------------------------------------------------------------------
// RegionDirectory
// ---------------------------------------------------------------------------

#[async_trait]
impl RegionDirectory for PgStore {
    async fn region_by_slug(&self, slug: &str) -> Result<Option<Region>> {
        let row = sqlx::query("SELECT id, slug, name, state FROM regions WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            Ok(Region {
                id: row.try_get("id")?,
                slug: row.try_get("slug")?,
                name: row.try_get("name")?,
                state: row.try_get("state")?,
            })
        })
        .transpose()
    }
}
