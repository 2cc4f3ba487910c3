use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use civicwire_common::{Config, Region};
use civicwire_collector::discovery::DiscoveryEngine;
use civicwire_collector::fetch::WebFetcher;
use civicwire_collector::orchestrator::CollectionOrchestrator;
use civicwire_collector::processor::ContentProcessor;
use civicwire_collector::store::{MemoryCache, PgStore};
use civicwire_collector::traits::RegionDirectory;

#[derive(Parser)]
#[command(name = "civicwire-collector", about = "Civic content collection pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create or update the database schema.
    Migrate,
    /// Register a region.
    AddRegion {
        #[arg(long)]
        slug: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        state: String,
    },
    /// Collect all due sources of a region.
    Collect {
        #[arg(long)]
        region: String,
    },
    /// Promote pending content items of a region into news articles.
    Process {
        #[arg(long)]
        region: String,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Discover data sources for one city and register them in a region.
    DiscoverCity {
        #[arg(long)]
        city: String,
        #[arg(long)]
        state: String,
        #[arg(long)]
        region: String,
    },
    /// Discover data sources for every city of a county.
    DiscoverCounty {
        #[arg(long)]
        county: String,
        #[arg(long)]
        state: String,
        #[arg(long)]
        region: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("civicwire=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    let store = Arc::new(PgStore::connect(&config.database_url).await?);
    store.migrate().await?;

    match cli.command {
        Command::Migrate => {
            info!("Migration complete");
        }
        Command::AddRegion { slug, name, state } => {
            let region = Region {
                id: uuid::Uuid::new_v4(),
                slug: slug.clone(),
                name,
                state,
            };
            store.upsert_region(&region).await?;
            info!(slug = slug.as_str(), "Region registered");
        }
        Command::Collect { region } => {
            let region = resolve_region(store.as_ref(), &region).await?;
            let fetcher = Arc::new(WebFetcher::new()?);
            let orchestrator = CollectionOrchestrator::new(store.clone(), fetcher, &config);
            let stats = orchestrator.collect_for_region(&region).await?;
            info!("Collection pass finished. {stats}");
        }
        Command::Process { region, limit } => {
            let region = resolve_region(store.as_ref(), &region).await?;
            let processor = ContentProcessor::new(store.clone(), store.clone());
            let stats = processor.process_pending(&region, limit).await?;
            info!("Processing finished. {stats}");
        }
        Command::DiscoverCity { city, state, region } => {
            let region = resolve_region(store.as_ref(), &region).await?;
            let engine = discovery_engine(&config, store.clone())?;
            let discovery = engine.discover_city(&city, &state).await?;
            let upserted = engine.create_sources(&discovery, &region).await?;
            info!(city = city.as_str(), upserted, "Discovery finished");
        }
        Command::DiscoverCounty { county, state, region } => {
            let region = resolve_region(store.as_ref(), &region).await?;
            let engine = discovery_engine(&config, store.clone())?;
            let sweep = engine.discover_county(&county, &state).await?;
            let mut upserted = 0;
            for discovery in &sweep.discoveries {
                upserted += engine.create_sources(discovery, &region).await?;
            }
            info!(
                county = county.as_str(),
                cities = sweep.discoveries.len(),
                failed = sweep.cities_failed,
                upserted,
                "County discovery finished"
            );
        }
    }

    Ok(())
}

async fn resolve_region(store: &PgStore, slug: &str) -> Result<Region> {
    match store.region_by_slug(slug).await? {
        Some(region) => Ok(region),
        None => bail!("Unknown region '{slug}'. Register it with add-region first."),
    }
}

fn discovery_engine(config: &Config, store: Arc<PgStore>) -> Result<DiscoveryEngine> {
    let mut model = ai_client::OpenAi::new(&config.openai_api_key, &config.model_name);
    if let Some(base_url) = &config.model_base_url {
        model = model.with_base_url(base_url);
    }
    let fetcher = Arc::new(WebFetcher::new()?);

    Ok(DiscoveryEngine::new(
        Arc::new(model),
        Arc::new(MemoryCache::new()),
        store,
        fetcher,
        config.legistar_base_url.clone(),
        Duration::from_secs(config.discovery_cache_ttl_hours * 3600),
    ))
}
