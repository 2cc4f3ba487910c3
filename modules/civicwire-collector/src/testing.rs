// Test mocks for the collection pipeline.
//
// Mocks matching the trait boundaries that touch the outside world:
// - MockFetcher (Fetcher) — pattern-based URL→response registry
// - MockChat (ChatModel) — scripted model responses, popped in order
//
// The in-memory store (`store::memory`) is a full implementation rather than
// a mock and is used directly in tests. Plus helpers for constructing
// sources, regions, and items.

use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use civicwire_common::{
    CivicWireError, ContentKind, EntityKind, Platform, RawItem, Region, Source, SourceKind,
};

use crate::traits::{ChatModel, Fetcher};

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

enum Canned {
    Json(serde_json::Value),
    Text(String),
    TransportError(String),
}

/// URL-prefix-keyed content fetcher. Registered URLs match by `starts_with`
/// so tests don't have to reproduce full query strings. Unregistered URLs
/// return a transport error; unregistered probes answer false.
pub struct MockFetcher {
    responses: Vec<(String, Canned)>,
    probes: Vec<(String, bool)>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self {
            responses: Vec::new(),
            probes: Vec::new(),
        }
    }

    pub fn on_json(mut self, url_prefix: &str, value: serde_json::Value) -> Self {
        self.responses
            .push((url_prefix.to_string(), Canned::Json(value)));
        self
    }

    pub fn on_text(mut self, url_prefix: &str, body: &str) -> Self {
        self.responses
            .push((url_prefix.to_string(), Canned::Text(body.to_string())));
        self
    }

    pub fn on_transport_error(mut self, url_prefix: &str, message: &str) -> Self {
        self.responses.push((
            url_prefix.to_string(),
            Canned::TransportError(message.to_string()),
        ));
        self
    }

    pub fn on_probe(mut self, url_prefix: &str, alive: bool) -> Self {
        self.probes.push((url_prefix.to_string(), alive));
        self
    }

    fn lookup(&self, url: &str) -> Option<&Canned> {
        self.responses
            .iter()
            .find(|(prefix, _)| url.starts_with(prefix.as_str()))
            .map(|(_, canned)| canned)
    }
}

impl Default for MockFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn get_json(&self, url: &str) -> Result<serde_json::Value, CivicWireError> {
        match self.lookup(url) {
            Some(Canned::Json(value)) => Ok(value.clone()),
            Some(Canned::Text(body)) => serde_json::from_str(body)
                .map_err(|e| CivicWireError::Parse(format!("Invalid JSON from {url}: {e}"))),
            Some(Canned::TransportError(msg)) => Err(CivicWireError::Transport(msg.clone())),
            None => Err(CivicWireError::Transport(format!(
                "MockFetcher: no response registered for {url}"
            ))),
        }
    }

    async fn get_text(&self, url: &str) -> Result<String, CivicWireError> {
        match self.lookup(url) {
            Some(Canned::Text(body)) => Ok(body.clone()),
            Some(Canned::Json(value)) => Ok(value.to_string()),
            Some(Canned::TransportError(msg)) => Err(CivicWireError::Transport(msg.clone())),
            None => Err(CivicWireError::Transport(format!(
                "MockFetcher: no response registered for {url}"
            ))),
        }
    }

    async fn probe(&self, url: &str) -> Result<bool, CivicWireError> {
        Ok(self
            .probes
            .iter()
            .find(|(prefix, _)| url.starts_with(prefix.as_str()))
            .map(|(_, alive)| *alive)
            .unwrap_or(false))
    }
}

// ---------------------------------------------------------------------------
// MockChat
// ---------------------------------------------------------------------------

/// Scripted chat model: responses are returned in registration order.
pub struct MockChat {
    responses: Mutex<VecDeque<String>>,
}

impl MockChat {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
        }
    }

    pub fn on_response(self, response: &str) -> Self {
        self.responses
            .lock()
            .expect("mock chat lock poisoned")
            .push_back(response.to_string());
        self
    }
}

impl Default for MockChat {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatModel for MockChat {
    async fn chat(&self, _system: &str, _user: &str) -> Result<String> {
        match self
            .responses
            .lock()
            .expect("mock chat lock poisoned")
            .pop_front()
        {
            Some(response) => Ok(response),
            None => bail!("MockChat: no scripted response left"),
        }
    }
}

// ---------------------------------------------------------------------------
// Fixture helpers
// ---------------------------------------------------------------------------

pub fn test_region() -> Region {
    Region {
        id: Uuid::new_v4(),
        slug: "springfield-il".to_string(),
        name: "Springfield".to_string(),
        state: "IL".to_string(),
    }
}

pub fn legistar_source(client_id: Option<&str>) -> Source {
    let mut source = Source::new(
        Uuid::new_v4(),
        "Springfield Legislative Calendar",
        Platform::Legistar,
        SourceKind::Api,
        EntityKind::City,
    );
    source.client_id = client_id.map(str::to_string);
    source
}

pub fn nixle_source(zip_codes: Vec<String>) -> Source {
    let mut source = Source::new(
        Uuid::new_v4(),
        "Springfield Safety Alerts",
        Platform::Nixle,
        SourceKind::Scrape,
        EntityKind::Police,
    );
    source.zip_codes = zip_codes;
    source
}

pub fn civicplus_source(endpoint_url: &str) -> Source {
    let mut source = Source::new(
        Uuid::new_v4(),
        "Springfield Municipal News",
        Platform::CivicPlus,
        SourceKind::Scrape,
        EntityKind::City,
    );
    source.endpoint_url = Some(endpoint_url.to_string());
    source
}

pub fn media_source(endpoint_url: &str) -> Source {
    let mut source = Source::new(
        Uuid::new_v4(),
        "Springfield Gazette",
        Platform::MediaFeed,
        SourceKind::Rss,
        EntityKind::Other,
    );
    source.endpoint_url = Some(endpoint_url.to_string());
    source
}

/// Pending-ready item of the given kind, published now.
pub fn raw_item(kind: ContentKind, title: &str, published_at: DateTime<Utc>) -> RawItem {
    let mut item = RawItem::new(kind, title);
    item.published_at = Some(published_at);
    item.finish()
}
