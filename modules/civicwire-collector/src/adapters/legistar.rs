//! Legistar (legislative management) adapter.
//!
//! Queries the OData-style REST API for upcoming meetings ("events") and
//! recently introduced legislation ("matters"), scoped per client identifier.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use tracing::{info, warn};

use civicwire_common::{CivicWireError, ContentKind, MeetingKind, RawItem, Source};

use crate::adapters::PlatformAdapter;
use crate::traits::Fetcher;

/// Meetings are collected this many days ahead.
const EVENT_LOOKAHEAD_DAYS: i64 = 30;
/// Matters are collected this many days back.
const MATTER_LOOKBACK_DAYS: i64 = 14;
/// Page cap for both endpoints.
const PAGE_SIZE: u32 = 50;

pub struct LegistarAdapter<'a> {
    fetcher: &'a dyn Fetcher,
    base_url: String,
}

impl<'a> LegistarAdapter<'a> {
    pub fn new(fetcher: &'a dyn Fetcher, base_url: impl Into<String>) -> Self {
        Self {
            fetcher,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn fetch_events(&self, client: &str, now: DateTime<Utc>) -> Result<Vec<RawItem>, CivicWireError> {
        let url = format!(
            "{}/{}/events?{}",
            self.base_url,
            client,
            events_query(now)
        );
        let rows = self.fetch_rows(&url).await?;

        let mut items = Vec::new();
        for row in &rows {
            match event_item(row, now) {
                Some(item) => items.push(item),
                None => warn!(client, "Skipping event row without EventId"),
            }
        }
        Ok(items)
    }

    async fn fetch_matters(&self, client: &str, now: DateTime<Utc>) -> Result<Vec<RawItem>, CivicWireError> {
        let url = format!(
            "{}/{}/matters?{}",
            self.base_url,
            client,
            matters_query(now)
        );
        let rows = self.fetch_rows(&url).await?;

        let mut items = Vec::new();
        for row in &rows {
            match matter_item(row) {
                Some(item) => items.push(item),
                None => warn!(client, "Skipping matter row without MatterId"),
            }
        }
        Ok(items)
    }

    async fn fetch_rows(&self, url: &str) -> Result<Vec<Value>, CivicWireError> {
        let value = self.fetcher.get_json(url).await?;
        match value {
            Value::Array(rows) => Ok(rows),
            other => Err(CivicWireError::Parse(format!(
                "Expected JSON array from {url}, got {}",
                json_kind(&other)
            ))),
        }
    }
}

#[async_trait]
impl PlatformAdapter for LegistarAdapter<'_> {
    async fn collect(&self, source: &Source) -> Result<Vec<RawItem>, CivicWireError> {
        let client = source.client_id.as_deref().ok_or_else(|| {
            CivicWireError::Config(format!(
                "Legistar source '{}' has no client identifier",
                source.name
            ))
        })?;

        let now = Utc::now();
        let mut items = self.fetch_events(client, now).await?;
        items.extend(self.fetch_matters(client, now).await?);

        info!(client, count = items.len(), "Legistar collection complete");
        Ok(items)
    }
}

// ---------------------------------------------------------------------------
// Query construction
// ---------------------------------------------------------------------------

fn events_query(now: DateTime<Utc>) -> String {
    let start = odata_date(now);
    let end = odata_date(now + Duration::days(EVENT_LOOKAHEAD_DAYS));
    format!(
        "$filter=EventDate ge datetime'{start}' and EventDate le datetime'{end}'\
         &$orderby=EventDate asc&$top={PAGE_SIZE}"
    )
}

fn matters_query(now: DateTime<Utc>) -> String {
    let start = odata_date(now - Duration::days(MATTER_LOOKBACK_DAYS));
    format!(
        "$filter=MatterIntroDate ge datetime'{start}'\
         &$orderby=MatterIntroDate desc&$top={PAGE_SIZE}"
    )
}

fn odata_date(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT00:00:00").to_string()
}

// ---------------------------------------------------------------------------
// Row normalization
// ---------------------------------------------------------------------------

fn event_item(row: &Value, now: DateTime<Utc>) -> Option<RawItem> {
    let id = row.get("EventId").and_then(Value::as_i64)?;
    let body = row
        .get("EventBodyName")
        .and_then(Value::as_str)
        .unwrap_or("City Council");
    let event_date = row
        .get("EventDate")
        .and_then(Value::as_str)
        .and_then(parse_legistar_date);

    let title = match event_date {
        Some(date) => format!("{} Meeting - {}", body, date.format("%B %-d, %Y")),
        None => format!("{body} Meeting"),
    };

    let mut item = RawItem::new(ContentKind::Meeting, title);
    item.external_id = Some(id.to_string());
    item.body_name = Some(body.to_string());
    item.meeting_kind = Some(classify_meeting(body));
    item.event_date = event_date;
    item.published_at = Some(now);
    item.url = row
        .get("EventInSiteURL")
        .and_then(Value::as_str)
        .map(str::to_string);
    item.agenda_url = row
        .get("EventAgendaFile")
        .and_then(Value::as_str)
        .map(str::to_string);
    item.description = row
        .get("EventLocation")
        .and_then(Value::as_str)
        .map(|loc| format!("Location: {loc}"));
    item.category = Some("government".to_string());
    item.raw = row.clone();
    Some(item.finish())
}

fn matter_item(row: &Value) -> Option<RawItem> {
    let id = row.get("MatterId").and_then(Value::as_i64)?;
    let file = row.get("MatterFile").and_then(Value::as_str);
    let name = row
        .get("MatterName")
        .and_then(Value::as_str)
        .or_else(|| row.get("MatterTitle").and_then(Value::as_str));

    let title = match (file, name) {
        (Some(file), Some(name)) => format!("{file}: {name}"),
        (Some(file), None) => file.to_string(),
        (None, Some(name)) => name.to_string(),
        (None, None) => format!("Matter {id}"),
    };

    let mut item = RawItem::new(ContentKind::Matter, title);
    item.external_id = Some(id.to_string());
    item.published_at = row
        .get("MatterIntroDate")
        .and_then(Value::as_str)
        .and_then(parse_legistar_date);
    item.description = row
        .get("MatterTypeName")
        .and_then(Value::as_str)
        .map(str::to_string);
    item.subcategory = row
        .get("MatterStatusName")
        .and_then(Value::as_str)
        .map(str::to_string);
    item.category = Some("legislation".to_string());
    item.raw = row.clone();
    Some(item.finish())
}

/// Legistar timestamps come back without a zone, e.g. "2025-03-01T00:00:00".
fn parse_legistar_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Ordered substring checks over the body name; first match wins.
fn classify_meeting(body_name: &str) -> MeetingKind {
    let name = body_name.to_lowercase();
    if name.contains("special") {
        MeetingKind::Special
    } else if name.contains("emergency") {
        MeetingKind::Emergency
    } else if name.contains("workshop") || name.contains("work session") {
        MeetingKind::Workshop
    } else if name.contains("hearing") {
        MeetingKind::Hearing
    } else {
        MeetingKind::Regular
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Client discovery
// ---------------------------------------------------------------------------

/// Probe a handful of client-identifier permutations against the bodies
/// endpoint and return the first one that answers. Linear probing: there is
/// no uniqueness guarantee, so candidates are ordered most-specific first
/// and the result is recorded on the source for operator review.
pub async fn discover_client(
    fetcher: &dyn Fetcher,
    base_url: &str,
    city: &str,
    state: &str,
) -> Option<String> {
    let base_url = base_url.trim_end_matches('/');
    for candidate in client_candidates(city, state) {
        let url = format!("{base_url}/{candidate}/bodies?$top=1");
        match fetcher.probe(&url).await {
            Ok(true) => {
                info!(city, candidate = candidate.as_str(), "Legistar client discovered");
                return Some(candidate);
            }
            Ok(false) => {}
            Err(e) => warn!(city, candidate = candidate.as_str(), error = %e, "Client probe failed"),
        }
    }
    None
}

fn client_candidates(city: &str, state: &str) -> Vec<String> {
    let city = city.trim().to_lowercase();
    let state = state.trim().to_lowercase();
    let compact = city.replace([' ', '-'], "");
    let hyphenated = city.replace(' ', "-");

    let mut candidates: Vec<String> = Vec::new();
    for candidate in [
        format!("{compact}{state}"),
        compact,
        format!("{hyphenated}-{state}"),
        hyphenated,
    ] {
        if !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockFetcher;
    use serde_json::json;

    #[test]
    fn meeting_classification_order() {
        assert_eq!(classify_meeting("Special City Commission"), MeetingKind::Special);
        assert_eq!(classify_meeting("Emergency Session"), MeetingKind::Emergency);
        assert_eq!(classify_meeting("Budget Workshop"), MeetingKind::Workshop);
        assert_eq!(classify_meeting("Planning Work Session"), MeetingKind::Workshop);
        assert_eq!(classify_meeting("Public Hearing"), MeetingKind::Hearing);
        assert_eq!(classify_meeting("City Commission"), MeetingKind::Regular);
        // "Special" wins over "hearing" when both appear.
        assert_eq!(classify_meeting("Special Public Hearing"), MeetingKind::Special);
    }

    #[test]
    fn event_title_from_body_and_date() {
        let row = json!({
            "EventId": 1201,
            "EventBodyName": "City Commission",
            "EventDate": "2025-03-01T00:00:00",
            "EventLocation": "Council Chambers",
            "EventInSiteURL": "https://springfield.legistar.com/MeetingDetail.aspx?ID=1201"
        });
        let item = event_item(&row, Utc::now()).unwrap();
        assert_eq!(item.title, "City Commission Meeting - March 1, 2025");
        assert_eq!(item.content_kind, ContentKind::Meeting);
        assert_eq!(item.external_id.as_deref(), Some("1201"));
        assert_eq!(item.meeting_kind, Some(MeetingKind::Regular));
        assert!(!item.content_hash.is_empty());
    }

    #[test]
    fn event_row_without_id_is_skipped() {
        let row = json!({"EventBodyName": "City Commission"});
        assert!(event_item(&row, Utc::now()).is_none());
    }

    #[test]
    fn matter_title_from_file_and_name() {
        let row = json!({
            "MatterId": 88,
            "MatterFile": "ORD-2025-01",
            "MatterName": "Zoning amendment for riverfront district",
            "MatterIntroDate": "2025-02-20T00:00:00",
            "MatterTypeName": "Ordinance"
        });
        let item = matter_item(&row).unwrap();
        assert_eq!(item.title, "ORD-2025-01: Zoning amendment for riverfront district");
        assert_eq!(item.content_kind, ContentKind::Matter);
        assert_eq!(item.description.as_deref(), Some("Ordinance"));
    }

    #[test]
    fn odata_queries_carry_window_and_cap() {
        let now = "2025-02-25T12:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let events = events_query(now);
        assert!(events.contains("EventDate ge datetime'2025-02-25T00:00:00'"));
        assert!(events.contains("EventDate le datetime'2025-03-27T00:00:00'"));
        assert!(events.contains("$top=50"));

        let matters = matters_query(now);
        assert!(matters.contains("MatterIntroDate ge datetime'2025-02-11T00:00:00'"));
        assert!(matters.contains("$orderby=MatterIntroDate desc"));
    }

    #[test]
    fn client_candidates_most_specific_first() {
        let candidates = client_candidates("Sioux Falls", "SD");
        assert_eq!(
            candidates,
            vec!["siouxfallssd", "siouxfalls", "sioux-falls-sd", "sioux-falls"]
        );
    }

    #[tokio::test]
    async fn discover_client_returns_first_probe_hit() {
        let fetcher = MockFetcher::new()
            .on_probe("https://webapi.legistar.com/v1/springfield/bodies", true);
        let client = discover_client(&fetcher, "https://webapi.legistar.com/v1", "Springfield", "IL")
            .await;
        // "springfieldil" probes first and misses; "springfield" hits.
        assert_eq!(client.as_deref(), Some("springfield"));
    }

    #[tokio::test]
    async fn discover_client_none_when_all_probes_miss() {
        let fetcher = MockFetcher::new();
        let client = discover_client(&fetcher, "https://webapi.legistar.com/v1", "Nowhere", "ZZ").await;
        assert!(client.is_none());
    }

    #[tokio::test]
    async fn collect_without_client_id_is_config_error() {
        let fetcher = MockFetcher::new();
        let adapter = LegistarAdapter::new(&fetcher, "https://webapi.legistar.com/v1");
        let source = crate::testing::legistar_source(None);
        let err = adapter.collect(&source).await.unwrap_err();
        assert!(matches!(err, CivicWireError::Config(_)));
    }
}
