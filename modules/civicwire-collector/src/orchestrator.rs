//! Collection orchestrator: iterates sources due for polling, dispatches to
//! the platform adapter, records a run per attempt, and aggregates results.
//! One source failing must never affect another source's collection.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use civicwire_common::{CivicWireError, Config, Platform, RawItem, Region, RunOutcome, Source};

use crate::adapters::{
    CivicPlusAdapter, LegistarAdapter, MediaFeedAdapter, NixleAdapter, PlatformAdapter,
};
use crate::traits::{ContentStore, Fetcher};

/// Aggregate result of one region collection pass.
#[derive(Debug, Default)]
pub struct RegionCollectStats {
    pub sources_due: u32,
    pub sources_collected: u32,
    pub sources_failed: u32,
    pub sources_not_due: u32,
    pub items_found: u32,
    pub items_new: u32,
    pub items_skipped: u32,
    pub errors: Vec<SourceError>,
}

#[derive(Debug, Clone)]
pub struct SourceError {
    pub source_id: Uuid,
    pub source_name: String,
    pub message: String,
}

impl std::fmt::Display for RegionCollectStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Collection Pass Complete ===")?;
        writeln!(f, "Sources due:       {}", self.sources_due)?;
        writeln!(f, "Sources collected: {}", self.sources_collected)?;
        writeln!(f, "Sources failed:    {}", self.sources_failed)?;
        writeln!(f, "Sources not due:   {}", self.sources_not_due)?;
        writeln!(f, "Items found:       {}", self.items_found)?;
        writeln!(f, "Items new:         {}", self.items_new)?;
        writeln!(f, "Items skipped:     {} (duplicate hash)", self.items_skipped)?;
        for error in &self.errors {
            writeln!(f, "  error [{}]: {}", error.source_name, error.message)?;
        }
        Ok(())
    }
}

/// Per-source result of a successful collection.
#[derive(Debug, Clone)]
pub struct SourceResult {
    pub run_id: Uuid,
    pub items_found: u32,
    pub items_new: u32,
    pub items_skipped: u32,
}

pub struct CollectionOrchestrator {
    store: Arc<dyn ContentStore>,
    fetcher: Arc<dyn Fetcher>,
    legistar_base_url: String,
    nixle_base_url: String,
    concurrency: usize,
}

impl CollectionOrchestrator {
    pub fn new(store: Arc<dyn ContentStore>, fetcher: Arc<dyn Fetcher>, config: &Config) -> Self {
        Self {
            store,
            fetcher,
            legistar_base_url: config.legistar_base_url.clone(),
            nixle_base_url: config.nixle_base_url.clone(),
            concurrency: config.collect_concurrency.max(1),
        }
    }

    /// Collect every enabled, due source of a region. Sources run on a
    /// bounded worker pool; a failure is recorded in the aggregate error list
    /// and never cancels or skips sibling sources.
    pub async fn collect_for_region(&self, region: &Region) -> Result<RegionCollectStats> {
        let now = Utc::now();
        let sources = self.store.sources_for_region(region.id).await?;

        let (due, not_due): (Vec<Source>, Vec<Source>) =
            sources.into_iter().partition(|s| s.is_due(now));

        let mut stats = RegionCollectStats {
            sources_due: due.len() as u32,
            sources_not_due: not_due.len() as u32,
            ..Default::default()
        };

        info!(
            region = region.slug.as_str(),
            due = due.len(),
            not_due = not_due.len(),
            "Starting collection pass"
        );

        let results: Vec<(Source, Result<SourceResult>)> = stream::iter(due.into_iter().map(
            |source| async move {
                let result = self.collect_from_source(&source).await;
                (source, result)
            },
        ))
        .buffer_unordered(self.concurrency)
        .collect()
        .await;

        for (source, result) in results {
            match result {
                Ok(outcome) => {
                    stats.sources_collected += 1;
                    stats.items_found += outcome.items_found;
                    stats.items_new += outcome.items_new;
                    stats.items_skipped += outcome.items_skipped;
                }
                Err(e) => {
                    stats.sources_failed += 1;
                    stats.errors.push(SourceError {
                        source_id: source.id,
                        source_name: source.name.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        info!("{stats}");
        Ok(stats)
    }

    /// One collection attempt against one source, bracketed by a run record
    /// that is finalized exactly once on both the success and failure paths.
    pub async fn collect_from_source(&self, source: &Source) -> Result<SourceResult> {
        let started_at = Utc::now();
        let run_id = self.store.create_run(source.id, started_at).await?;

        match self.run_adapter(source).await {
            Ok(items) => {
                let items_found = items.len() as u32;
                let mut items_new = 0u32;
                let mut items_skipped = 0u32;

                for raw in items {
                    match self.store.store_if_new(raw, source).await? {
                        Some(_) => items_new += 1,
                        None => items_skipped += 1,
                    }
                }

                self.store
                    .finalize_run(
                        run_id,
                        RunOutcome::Completed {
                            items_found,
                            items_new,
                            items_skipped,
                        },
                        Utc::now(),
                    )
                    .await?;
                self.store
                    .record_source_success(source.id, items_new, Utc::now())
                    .await?;

                info!(
                    source = source.name.as_str(),
                    platform = %source.platform,
                    found = items_found,
                    new = items_new,
                    skipped = items_skipped,
                    "Source collected"
                );

                Ok(SourceResult {
                    run_id,
                    items_found,
                    items_new,
                    items_skipped,
                })
            }
            Err(e) => {
                let message = e.to_string();
                self.store
                    .finalize_run(
                        run_id,
                        RunOutcome::Failed {
                            error: message.clone(),
                        },
                        Utc::now(),
                    )
                    .await?;
                self.store
                    .record_source_failure(source.id, Utc::now())
                    .await?;

                warn!(
                    source = source.name.as_str(),
                    platform = %source.platform,
                    error = message.as_str(),
                    "Source collection failed"
                );
                Err(e.into())
            }
        }
    }

    /// Exhaustive dispatch over the closed platform set. Each variant is
    /// bound to its adapter here; there is no string-keyed lookup to miss.
    async fn run_adapter(&self, source: &Source) -> Result<Vec<RawItem>, CivicWireError> {
        match source.platform {
            Platform::Legistar => {
                LegistarAdapter::new(self.fetcher.as_ref(), &self.legistar_base_url)
                    .collect(source)
                    .await
            }
            Platform::CivicPlus => CivicPlusAdapter::new(self.fetcher.as_ref()).collect(source).await,
            Platform::Nixle => {
                NixleAdapter::new(self.fetcher.as_ref(), &self.nixle_base_url)
                    .collect(source)
                    .await
            }
            Platform::MediaFeed => MediaFeedAdapter::new(self.fetcher.as_ref()).collect(source).await,
        }
    }
}
