//! LLM-assisted source discovery.
//!
//! Asks the model for a locality's civic data surfaces (official site,
//! legislative portal client, news feeds, alert zip codes), parses whatever
//! comes back through the tiered parser, and materializes Source rows via
//! upsert so repeated runs converge. Results are cached per (city, state).

pub mod parse;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use civicwire_common::{
    CivicWireError, EntityKind, Platform, Region, Source, SourceKind,
};

use crate::adapters::legistar;
use crate::traits::{Cache, ChatModel, ContentStore, Fetcher};

/// Pause between successive per-city model queries. Politeness only.
const DISCOVERY_PAUSE: Duration = Duration::from_millis(500);
/// Locality enumeration cap for state-wide sweeps.
const MAX_STATE_CITIES: usize = 25;

const DISCOVERY_SYSTEM_PROMPT: &str = "You are a research assistant that maps the public data \
    surfaces of United States municipalities: official websites, legislative management portals, \
    public-safety alert coverage, and local news feeds. You answer with raw JSON only - no \
    markdown fences, no commentary.";

/// What discovery learned about one city.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CityDiscovery {
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub official_website: Option<String>,
    #[serde(default)]
    pub legistar_client: Option<String>,
    #[serde(default)]
    pub news_feed_urls: Vec<String>,
    #[serde(default)]
    pub alert_zip_codes: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Fan-out result for county/state sweeps.
#[derive(Debug, Default)]
pub struct DiscoverySweep {
    pub discoveries: Vec<CityDiscovery>,
    pub cities_failed: u32,
    pub errors: Vec<String>,
}

impl std::fmt::Display for DiscoverySweep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Discovery sweep: cities={}, failed={}",
            self.discoveries.len(),
            self.cities_failed
        )
    }
}

pub struct DiscoveryEngine {
    chat: Arc<dyn ChatModel>,
    cache: Arc<dyn Cache>,
    store: Arc<dyn ContentStore>,
    fetcher: Arc<dyn Fetcher>,
    legistar_base_url: String,
    cache_ttl: Duration,
}

impl DiscoveryEngine {
    pub fn new(
        chat: Arc<dyn ChatModel>,
        cache: Arc<dyn Cache>,
        store: Arc<dyn ContentStore>,
        fetcher: Arc<dyn Fetcher>,
        legistar_base_url: impl Into<String>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            chat,
            cache,
            store,
            fetcher,
            legistar_base_url: legistar_base_url.into(),
            cache_ttl,
        }
    }

    /// Discover the data surfaces of one city. Cache-first; a structured
    /// parse failure falls back to regex extraction rather than erroring.
    pub async fn discover_city(&self, city: &str, state: &str) -> Result<CityDiscovery> {
        let cache_key = format!(
            "discovery:{}:{}",
            city.trim().to_lowercase(),
            state.trim().to_lowercase()
        );
        if let Some(cached) = self.cache.get(&cache_key).await {
            if let Ok(discovery) = serde_json::from_value::<CityDiscovery>(cached) {
                info!(city, state, "Discovery cache hit");
                return Ok(discovery);
            }
        }

        let response = self
            .chat
            .chat(DISCOVERY_SYSTEM_PROMPT, &city_prompt(city, state))
            .await
            .map_err(|e| CivicWireError::Model(e.to_string()))?;

        let mut discovery = match parse::parse_json_response::<CityDiscovery>(&response) {
            Some(discovery) => discovery,
            None => {
                warn!(city, state, "Structured parse failed, using pattern extraction");
                from_patterns(parse::extract_patterns(&response))
            }
        };
        discovery.city = city.to_string();
        discovery.state = state.to_string();

        // The model often knows the portal exists without knowing the client
        // id; probe the usual permutations before giving up.
        if discovery.legistar_client.is_none() {
            discovery.legistar_client =
                legistar::discover_client(self.fetcher.as_ref(), &self.legistar_base_url, city, state)
                    .await;
        }

        self.cache
            .put(&cache_key, serde_json::to_value(&discovery)?, self.cache_ttl)
            .await;

        info!(
            city,
            state,
            legistar = discovery.legistar_client.is_some(),
            feeds = discovery.news_feed_urls.len(),
            zips = discovery.alert_zip_codes.len(),
            "City discovery complete"
        );
        Ok(discovery)
    }

    /// Enumerate a county's localities and discover each. A failure for one
    /// city is recorded and does not stop the sweep.
    pub async fn discover_county(&self, county: &str, state: &str) -> Result<DiscoverySweep> {
        let scope = format!("{county} County");
        let cities = self.enumerate_cities(&scope, state).await?;
        Ok(self.sweep(cities, state).await)
    }

    /// State-wide sweep over the largest municipalities.
    pub async fn discover_state(&self, state: &str) -> Result<DiscoverySweep> {
        let scope = format!("the state of {state}");
        let mut cities = self.enumerate_cities(&scope, state).await?;
        cities.truncate(MAX_STATE_CITIES);
        Ok(self.sweep(cities, state).await)
    }

    async fn sweep(&self, cities: Vec<String>, state: &str) -> DiscoverySweep {
        let mut sweep = DiscoverySweep::default();
        for (i, city) in cities.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(DISCOVERY_PAUSE).await;
            }
            match self.discover_city(city, state).await {
                Ok(discovery) => sweep.discoveries.push(discovery),
                Err(e) => {
                    warn!(city = city.as_str(), state, error = %e, "City discovery failed");
                    sweep.cities_failed += 1;
                    sweep.errors.push(format!("{city}: {e}"));
                }
            }
        }
        info!("{sweep}");
        sweep
    }

    /// Second, differently-prompted query that lists localities for a scope.
    async fn enumerate_cities(&self, scope: &str, state: &str) -> Result<Vec<String>> {
        let prompt = format!(
            "List the incorporated cities and towns in {scope}, {state}, largest first. \
             Respond with a raw JSON array of city name strings and nothing else."
        );
        let response = self
            .chat
            .chat(DISCOVERY_SYSTEM_PROMPT, &prompt)
            .await
            .map_err(|e| CivicWireError::Model(e.to_string()))?;

        if let Some(cities) = parse::parse_json_response::<Vec<String>>(&response) {
            return Ok(cities);
        }

        // Fallback: treat each line as a city name, stripping list markers.
        let cities: Vec<String> = response
            .lines()
            .map(|line| {
                line.trim()
                    .trim_start_matches(['-', '*', '•'])
                    .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')')
                    .trim()
                    .to_string()
            })
            .filter(|line| !line.is_empty() && line.len() > 2 && !line.contains(':'))
            .collect();
        Ok(cities)
    }

    /// Materialize Source rows for everything a discovery found. Upserts are
    /// keyed (region, platform, connection key) so reruns converge.
    pub async fn create_sources(
        &self,
        discovery: &CityDiscovery,
        region: &Region,
    ) -> Result<u32> {
        let mut upserted = 0u32;

        if let Some(client) = &discovery.legistar_client {
            let mut source = Source::new(
                region.id,
                format!("{} Legislative Calendar", discovery.city),
                Platform::Legistar,
                SourceKind::Api,
                EntityKind::City,
            );
            source.client_id = Some(client.clone());
            source.auto_discovered = true;
            self.store.upsert_source(&source).await?;
            upserted += 1;
        }

        if let Some(website) = &discovery.official_website {
            let mut source = Source::new(
                region.id,
                format!("{} Municipal News", discovery.city),
                Platform::CivicPlus,
                SourceKind::Scrape,
                EntityKind::City,
            );
            source.endpoint_url = Some(website.trim_end_matches('/').to_string());
            source.auto_discovered = true;
            self.store.upsert_source(&source).await?;
            upserted += 1;
        }

        for feed_url in &discovery.news_feed_urls {
            let mut source = Source::new(
                region.id,
                feed_source_name(feed_url, &discovery.city),
                Platform::MediaFeed,
                SourceKind::Rss,
                EntityKind::Other,
            );
            source.endpoint_url = Some(feed_url.clone());
            source.auto_discovered = true;
            self.store.upsert_source(&source).await?;
            upserted += 1;
        }

        if !discovery.alert_zip_codes.is_empty() {
            let mut source = Source::new(
                region.id,
                format!("{} Safety Alerts", discovery.city),
                Platform::Nixle,
                SourceKind::Scrape,
                EntityKind::Police,
            );
            source.zip_codes = discovery.alert_zip_codes.clone();
            source.auto_discovered = true;
            self.store.upsert_source(&source).await?;
            upserted += 1;
        }

        info!(
            city = discovery.city.as_str(),
            region = region.slug.as_str(),
            upserted,
            "Sources materialized from discovery"
        );
        Ok(upserted)
    }
}

fn city_prompt(city: &str, state: &str) -> String {
    format!(
        r#"Find the public data surfaces of {city}, {state}. Respond with exactly this JSON shape:

{{
  "official_website": "https://... or null",
  "legistar_client": "the Legistar API client identifier, or null",
  "news_feed_urls": ["RSS or Atom feed URLs of local news outlets"],
  "alert_zip_codes": ["zip codes covered by public-safety alert services"],
  "notes": "anything noteworthy, or null"
}}

Return raw JSON only. Use null for anything you cannot determine."#
    )
}

/// Shape a regex-extraction result into a CityDiscovery.
fn from_patterns(extract: parse::PatternExtract) -> CityDiscovery {
    CityDiscovery {
        official_website: extract.official_site,
        legistar_client: extract.legistar_client,
        news_feed_urls: extract.feed_urls,
        alert_zip_codes: extract.zip_codes,
        ..Default::default()
    }
}

/// "Gazette Feed (springfield)" style name derived from the feed host.
fn feed_source_name(feed_url: &str, city: &str) -> String {
    let host = url::Url::parse(feed_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| feed_url.to_string());
    format!("{host} ({city})")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryCache, MemoryStore};
    use crate::testing::{test_region, MockChat, MockFetcher};

    fn engine(chat: MockChat, store: Arc<MemoryStore>) -> DiscoveryEngine {
        DiscoveryEngine::new(
            Arc::new(chat),
            Arc::new(MemoryCache::new()),
            store,
            Arc::new(MockFetcher::new()),
            "https://webapi.legistar.com/v1",
            Duration::from_secs(24 * 3600),
        )
    }

    const CITY_JSON: &str = r#"{
        "official_website": "https://www.springfield.il.gov",
        "legistar_client": "springfield",
        "news_feed_urls": ["https://gazette.example.com/rss/local"],
        "alert_zip_codes": ["62701", "62704"],
        "notes": null
    }"#;

    #[tokio::test]
    async fn structured_response_parsed_directly() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(MockChat::new().on_response(CITY_JSON), store);

        let discovery = engine.discover_city("Springfield", "IL").await.unwrap();
        assert_eq!(discovery.city, "Springfield");
        assert_eq!(discovery.legistar_client.as_deref(), Some("springfield"));
        assert_eq!(discovery.alert_zip_codes, vec!["62701", "62704"]);
    }

    #[tokio::test]
    async fn malformed_response_recovers_via_regex_fallback() {
        let store = Arc::new(MemoryStore::new());
        let prose = "I couldn't format that as JSON, but the local news feed lives at \
                     https://gazette.example.com/rss/local and the city site is \
                     https://www.springfield.il.gov. Alerts cover 62701.";
        let engine = engine(MockChat::new().on_response(prose), store);

        let discovery = engine.discover_city("Springfield", "IL").await.unwrap();
        assert_eq!(
            discovery.news_feed_urls,
            vec!["https://gazette.example.com/rss/local"]
        );
        assert_eq!(
            discovery.official_website.as_deref(),
            Some("https://www.springfield.il.gov")
        );
        assert_eq!(discovery.alert_zip_codes, vec!["62701"]);
    }

    #[tokio::test]
    async fn second_call_hits_cache_not_model() {
        let store = Arc::new(MemoryStore::new());
        // Only one scripted response; a second model call would error.
        let engine = engine(MockChat::new().on_response(CITY_JSON), store);

        let first = engine.discover_city("Springfield", "IL").await.unwrap();
        let second = engine.discover_city("Springfield", "IL").await.unwrap();
        assert_eq!(first.legistar_client, second.legistar_client);
    }

    #[tokio::test]
    async fn county_sweep_isolates_city_failures() {
        let store = Arc::new(MemoryStore::new());
        let chat = MockChat::new()
            .on_response(r#"["Springfield", "Chatham"]"#)
            .on_response(CITY_JSON);
        // Chatham gets no scripted response → its discovery fails.
        let engine = engine(chat, store);

        let sweep = engine.discover_county("Sangamon", "IL").await.unwrap();
        assert_eq!(sweep.discoveries.len(), 1);
        assert_eq!(sweep.cities_failed, 1);
        assert_eq!(sweep.errors.len(), 1);
        assert!(sweep.errors[0].starts_with("Chatham"));
    }

    #[tokio::test]
    async fn create_sources_converges_on_rerun() {
        let store = Arc::new(MemoryStore::new());
        let region = test_region();
        let engine = engine(
            MockChat::new().on_response(CITY_JSON).on_response(CITY_JSON),
            store.clone(),
        );

        let discovery = engine.discover_city("Springfield", "IL").await.unwrap();
        let first = engine.create_sources(&discovery, &region).await.unwrap();
        // One legistar + one municipal site + one feed + one alert source.
        assert_eq!(first, 4);
        assert_eq!(store.all_sources().len(), 4);
        assert!(store.all_sources().iter().all(|s| s.auto_discovered));

        // Re-running discovery + materialization must not duplicate rows.
        let again = engine.discover_city("Springfield", "IL").await.unwrap();
        engine.create_sources(&again, &region).await.unwrap();
        assert_eq!(store.all_sources().len(), 4);
    }
}
