use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CivicWireError;

// --- Region ---

/// A geographic region (city/county) that sources and content are scoped to.
/// Owned by the external region directory; carried here for scoping only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Region {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub state: String,
}

// --- Platform (closed enum) ---

/// External platform a source is collected from. Closed set: every variant is
/// bound to exactly one adapter, dispatched by an exhaustive match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Legistar,
    CivicPlus,
    Nixle,
    MediaFeed,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Legistar => "legistar",
            Platform::CivicPlus => "civic_plus",
            Platform::Nixle => "nixle",
            Platform::MediaFeed => "media_feed",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = CivicWireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "legistar" => Ok(Platform::Legistar),
            "civic_plus" => Ok(Platform::CivicPlus),
            "nixle" => Ok(Platform::Nixle),
            "media_feed" => Ok(Platform::MediaFeed),
            other => Err(CivicWireError::UnknownPlatform(other.to_string())),
        }
    }
}

// --- Source enums ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Api,
    Rss,
    Scrape,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Api => "api",
            SourceKind::Rss => "rss",
            SourceKind::Scrape => "scrape",
        }
    }
}

impl std::str::FromStr for SourceKind {
    type Err = CivicWireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "api" => Ok(SourceKind::Api),
            "rss" => Ok(SourceKind::Rss),
            "scrape" => Ok(SourceKind::Scrape),
            other => Err(CivicWireError::Validation(format!(
                "unknown source kind: {other}"
            ))),
        }
    }
}

/// What kind of public entity a source represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    City,
    County,
    Police,
    Fire,
    School,
    Other,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::City => "city",
            EntityKind::County => "county",
            EntityKind::Police => "police",
            EntityKind::Fire => "fire",
            EntityKind::School => "school",
            EntityKind::Other => "other",
        }
    }
}

impl std::str::FromStr for EntityKind {
    type Err = CivicWireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "city" => Ok(EntityKind::City),
            "county" => Ok(EntityKind::County),
            "police" => Ok(EntityKind::Police),
            "fire" => Ok(EntityKind::Fire),
            "school" => Ok(EntityKind::School),
            _ => Ok(EntityKind::Other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceHealth {
    Healthy,
    Failing,
    Unknown,
}

impl SourceHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceHealth::Healthy => "healthy",
            SourceHealth::Failing => "failing",
            SourceHealth::Unknown => "unknown",
        }
    }
}

impl std::str::FromStr for SourceHealth {
    type Err = CivicWireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "healthy" => Ok(SourceHealth::Healthy),
            "failing" => Ok(SourceHealth::Failing),
            _ => Ok(SourceHealth::Unknown),
        }
    }
}

// --- Source ---

/// One configured external feed for a region/platform pair.
/// Mutated on every collection attempt (health, counters); never hard-deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: Uuid,
    pub region_id: Uuid,
    pub name: String,
    pub platform: Platform,
    pub source_kind: SourceKind,
    pub entity_kind: EntityKind,

    // Connection parameters — which one is populated depends on the platform.
    pub endpoint_url: Option<String>,
    pub client_id: Option<String>,
    pub agency_id: Option<String>,
    pub zip_codes: Vec<String>,

    pub poll_interval_minutes: u32,
    pub enabled: bool,
    pub health: SourceHealth,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub items_collected: u64,
    pub auto_discovered: bool,
    pub created_at: DateTime<Utc>,
}

impl Source {
    /// New source with default bookkeeping fields. Callers set the
    /// platform-specific connection parameters afterwards.
    pub fn new(
        region_id: Uuid,
        name: impl Into<String>,
        platform: Platform,
        source_kind: SourceKind,
        entity_kind: EntityKind,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            region_id,
            name: name.into(),
            platform,
            source_kind,
            entity_kind,
            endpoint_url: None,
            client_id: None,
            agency_id: None,
            zip_codes: Vec::new(),
            poll_interval_minutes: 60,
            enabled: true,
            health: SourceHealth::Unknown,
            last_run_at: None,
            last_success_at: None,
            consecutive_failures: 0,
            items_collected: 0,
            auto_discovered: false,
            created_at: Utc::now(),
        }
    }

    /// The distinguishing connection parameter for this platform. Together
    /// with (region_id, platform) this identifies a source for upserts, so
    /// repeated discovery runs converge instead of duplicating.
    pub fn connection_key(&self) -> String {
        let key = match self.platform {
            Platform::Legistar => self.client_id.clone().unwrap_or_default(),
            Platform::Nixle => match &self.agency_id {
                Some(agency) => agency.clone(),
                None => {
                    let mut zips = self.zip_codes.clone();
                    zips.sort();
                    zips.join(",")
                }
            },
            Platform::CivicPlus | Platform::MediaFeed => {
                self.endpoint_url.clone().unwrap_or_default()
            }
        };
        key.to_lowercase()
    }

    /// Whether the poll interval has elapsed since the last run.
    /// A source that has never run is always due.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_run_at {
            Some(last) => (now - last).num_minutes() >= self.poll_interval_minutes as i64,
            None => true,
        }
    }
}

// --- CollectionRun ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = CivicWireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(CivicWireError::Validation(format!(
                "unknown run status: {other}"
            ))),
        }
    }
}

/// One collection attempt against one source. Created as Running at the start
/// of collect_from_source, finalized exactly once, never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionRun {
    pub id: Uuid,
    pub source_id: Uuid,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub items_found: u32,
    pub items_new: u32,
    pub items_skipped: u32,
    pub error: Option<String>,
}

/// Terminal state handed to the store when a run is finalized.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed {
        items_found: u32,
        items_new: u32,
        items_skipped: u32,
    },
    Failed {
        error: String,
    },
}

// --- Content classification ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Meeting,
    Agenda,
    Matter,
    Alert,
    Advisory,
    News,
    Notice,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Meeting => "meeting",
            ContentKind::Agenda => "agenda",
            ContentKind::Matter => "matter",
            ContentKind::Alert => "alert",
            ContentKind::Advisory => "advisory",
            ContentKind::News => "news",
            ContentKind::Notice => "notice",
        }
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ContentKind {
    type Err = CivicWireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "meeting" => Ok(ContentKind::Meeting),
            "agenda" => Ok(ContentKind::Agenda),
            "matter" => Ok(ContentKind::Matter),
            "alert" => Ok(ContentKind::Alert),
            "advisory" => Ok(ContentKind::Advisory),
            "news" => Ok(ContentKind::News),
            "notice" => Ok(ContentKind::Notice),
            other => Err(CivicWireError::Validation(format!(
                "unknown content kind: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeetingKind {
    Regular,
    Special,
    Emergency,
    Workshop,
    Hearing,
}

impl MeetingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeetingKind::Regular => "regular",
            MeetingKind::Special => "special",
            MeetingKind::Emergency => "emergency",
            MeetingKind::Workshop => "workshop",
            MeetingKind::Hearing => "hearing",
        }
    }
}

impl std::str::FromStr for MeetingKind {
    type Err = CivicWireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "regular" => Ok(MeetingKind::Regular),
            "special" => Ok(MeetingKind::Special),
            "emergency" => Ok(MeetingKind::Emergency),
            "workshop" => Ok(MeetingKind::Workshop),
            "hearing" => Ok(MeetingKind::Hearing),
            other => Err(CivicWireError::Validation(format!(
                "unknown meeting kind: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Alert,
    Advisory,
    Community,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Alert => "alert",
            AlertKind::Advisory => "advisory",
            AlertKind::Community => "community",
        }
    }
}

impl std::str::FromStr for AlertKind {
    type Err = CivicWireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "alert" => Ok(AlertKind::Alert),
            "advisory" => Ok(AlertKind::Advisory),
            "community" => Ok(AlertKind::Community),
            other => Err(CivicWireError::Validation(format!(
                "unknown alert kind: {other}"
            ))),
        }
    }
}

/// CAP-style urgency scale. Classification defaults to Unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertUrgency {
    Immediate,
    Expected,
    Future,
    Unknown,
}

impl AlertUrgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertUrgency::Immediate => "Immediate",
            AlertUrgency::Expected => "Expected",
            AlertUrgency::Future => "Future",
            AlertUrgency::Unknown => "Unknown",
        }
    }
}

impl std::str::FromStr for AlertUrgency {
    type Err = CivicWireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Immediate" => Ok(AlertUrgency::Immediate),
            "Expected" => Ok(AlertUrgency::Expected),
            "Future" => Ok(AlertUrgency::Future),
            _ => Ok(AlertUrgency::Unknown),
        }
    }
}

/// CAP-style severity scale. Classification defaults to Minor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertSeverity {
    Extreme,
    Severe,
    Moderate,
    Minor,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Extreme => "Extreme",
            AlertSeverity::Severe => "Severe",
            AlertSeverity::Moderate => "Moderate",
            AlertSeverity::Minor => "Minor",
        }
    }
}

impl std::str::FromStr for AlertSeverity {
    type Err = CivicWireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Extreme" => Ok(AlertSeverity::Extreme),
            "Severe" => Ok(AlertSeverity::Severe),
            "Moderate" => Ok(AlertSeverity::Moderate),
            _ => Ok(AlertSeverity::Minor),
        }
    }
}

// --- Content items ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Processed,
    Skipped,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processed => "processed",
            ProcessingStatus::Skipped => "skipped",
            ProcessingStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for ProcessingStatus {
    type Err = CivicWireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ProcessingStatus::Pending),
            "processed" => Ok(ProcessingStatus::Processed),
            "skipped" => Ok(ProcessingStatus::Skipped),
            "failed" => Ok(ProcessingStatus::Failed),
            other => Err(CivicWireError::Validation(format!(
                "unknown processing status: {other}"
            ))),
        }
    }
}

/// What an adapter hands back for one fetched item, before persistence.
/// Carries the precomputed content hash and every ContentItem field the
/// platform can populate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawItem {
    pub content_kind: ContentKind,
    pub external_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub content: Option<String>,
    pub url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub event_date: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub tags: Vec<String>,

    // Legislative fields
    pub body_name: Option<String>,
    pub meeting_kind: Option<MeetingKind>,
    pub agenda_url: Option<String>,

    // Alert fields
    pub alert_kind: Option<AlertKind>,
    pub urgency: Option<AlertUrgency>,
    pub severity: Option<AlertSeverity>,
    pub agency: Option<String>,

    pub raw: serde_json::Value,
    pub content_hash: String,
}

impl RawItem {
    /// Bare item of the given kind; adapters fill in what they know and then
    /// call `finish()` to stamp the content hash.
    pub fn new(content_kind: ContentKind, title: impl Into<String>) -> Self {
        Self {
            content_kind,
            external_id: None,
            title: title.into(),
            description: None,
            content: None,
            url: None,
            published_at: None,
            event_date: None,
            expires_at: None,
            category: None,
            subcategory: None,
            tags: Vec::new(),
            body_name: None,
            meeting_kind: None,
            agenda_url: None,
            alert_kind: None,
            urgency: None,
            severity: None,
            agency: None,
            raw: serde_json::Value::Null,
            content_hash: String::new(),
        }
    }

    /// Stamp the dedup hash from (title, url, external_id).
    pub fn finish(mut self) -> Self {
        self.content_hash = crate::hash::content_hash(
            &self.title,
            self.url.as_deref(),
            self.external_id.as_deref(),
        );
        self
    }
}

/// One normalized unit of civic content, persisted with per-source hash dedup.
/// Only `processing_status` and `article_id` change after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: Uuid,
    pub source_id: Uuid,
    pub region_id: Uuid,
    // Denormalized from the owning source at ingestion; promotion needs both
    // without a join.
    pub platform: Platform,
    pub source_name: String,

    pub content_kind: ContentKind,
    pub external_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub content: Option<String>,
    pub url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub event_date: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub tags: Vec<String>,

    pub body_name: Option<String>,
    pub meeting_kind: Option<MeetingKind>,
    pub agenda_url: Option<String>,

    pub alert_kind: Option<AlertKind>,
    pub urgency: Option<AlertUrgency>,
    pub severity: Option<AlertSeverity>,
    pub agency: Option<String>,

    pub raw: serde_json::Value,
    pub content_hash: String,
    pub processing_status: ProcessingStatus,
    pub article_id: Option<Uuid>,
    pub collected_at: DateTime<Utc>,
}

impl ContentItem {
    pub fn from_raw(raw: RawItem, source: &Source, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_id: source.id,
            region_id: source.region_id,
            platform: source.platform,
            source_name: source.name.clone(),
            content_kind: raw.content_kind,
            external_id: raw.external_id,
            title: raw.title,
            description: raw.description,
            content: raw.content,
            url: raw.url,
            published_at: raw.published_at,
            event_date: raw.event_date,
            expires_at: raw.expires_at,
            category: raw.category,
            subcategory: raw.subcategory,
            tags: raw.tags,
            body_name: raw.body_name,
            meeting_kind: raw.meeting_kind,
            agenda_url: raw.agenda_url,
            alert_kind: raw.alert_kind,
            urgency: raw.urgency,
            severity: raw.severity,
            agency: raw.agency,
            raw: raw.raw,
            content_hash: raw.content_hash,
            processing_status: ProcessingStatus::Pending,
            article_id: None,
            collected_at: now,
        }
    }
}

// --- Downstream article ---

/// Payload for the downstream article sink. The hash is independent from the
/// ContentItem hash — (title, url) scoped per region — so the two dedup
/// barriers stay decoupled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewArticle {
    pub region_id: Uuid,
    pub title: String,
    pub url: Option<String>,
    pub snippet: Option<String>,
    pub source_name: String,
    pub published_at: Option<DateTime<Utc>>,
    pub content_hash: String,
    pub metadata: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn source_with_interval(minutes: u32) -> Source {
        let mut s = Source::new(
            Uuid::new_v4(),
            "Test Source",
            Platform::MediaFeed,
            SourceKind::Rss,
            EntityKind::City,
        );
        s.poll_interval_minutes = minutes;
        s
    }

    #[test]
    fn never_run_source_is_due() {
        let source = source_with_interval(60);
        assert!(source.is_due(Utc::now()));
    }

    #[test]
    fn source_due_only_after_interval_elapses() {
        let now = Utc::now();
        let mut source = source_with_interval(60);

        source.last_run_at = Some(now - Duration::minutes(30));
        assert!(!source.is_due(now));

        source.last_run_at = Some(now - Duration::minutes(61));
        assert!(source.is_due(now));
    }

    #[test]
    fn platform_round_trips_through_strings() {
        for platform in [
            Platform::Legistar,
            Platform::CivicPlus,
            Platform::Nixle,
            Platform::MediaFeed,
        ] {
            assert_eq!(platform.as_str().parse::<Platform>().unwrap(), platform);
        }
        assert!("granicus".parse::<Platform>().is_err());
    }

    #[test]
    fn nixle_connection_key_prefers_agency_over_zips() {
        let mut source = Source::new(
            Uuid::new_v4(),
            "PD Alerts",
            Platform::Nixle,
            SourceKind::Scrape,
            EntityKind::Police,
        );
        source.zip_codes = vec!["55401".to_string(), "55104".to_string()];
        assert_eq!(source.connection_key(), "55104,55401");

        source.agency_id = Some("SpringfieldPD".to_string());
        assert_eq!(source.connection_key(), "springfieldpd");
    }

    #[test]
    fn raw_item_finish_stamps_hash() {
        let item = RawItem::new(ContentKind::News, "Title").finish();
        assert_eq!(
            item.content_hash,
            crate::hash::content_hash("Title", None, None)
        );
    }
}
