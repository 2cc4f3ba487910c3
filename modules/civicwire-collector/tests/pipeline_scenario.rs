//! End-to-end scenario: a Legistar source yields one upcoming meeting and one
//! matter; collection stores two distinct items; processing promotes both
//! with the expected titles; a second processing pass creates nothing new.

use std::sync::Arc;

use chrono::{Datelike, Duration, Utc};
use serde_json::json;

use civicwire_collector::orchestrator::CollectionOrchestrator;
use civicwire_collector::processor::ContentProcessor;
use civicwire_collector::store::MemoryStore;
use civicwire_collector::testing::{legistar_source, test_region, MockFetcher};
use civicwire_common::{Config, ContentKind, ProcessingStatus};

fn test_config() -> Config {
    Config {
        database_url: String::new(),
        openai_api_key: String::new(),
        model_name: "test".to_string(),
        model_base_url: None,
        legistar_base_url: "https://webapi.legistar.com/v1".to_string(),
        nixle_base_url: "https://local.nixle.com".to_string(),
        discovery_cache_ttl_hours: 24,
        collect_concurrency: 4,
    }
}

#[tokio::test]
async fn legistar_collection_through_promotion() {
    let region = test_region();
    let store = Arc::new(MemoryStore::new());

    let mut source = legistar_source(Some("springfield"));
    source.region_id = region.id;
    source.poll_interval_minutes = 0;
    let source_id = source.id;
    store.insert_source(source);

    // The meeting sits comfortably in the future so promotion sees it as
    // upcoming regardless of when the test runs.
    let event_date = Utc::now() + Duration::days(10);
    let event_date_str = event_date.format("%Y-%m-%dT00:00:00").to_string();
    let intro_date = Utc::now() - Duration::days(3);
    let intro_date_str = intro_date.format("%Y-%m-%dT00:00:00").to_string();

    let events = json!([{
        "EventId": 1201,
        "EventBodyName": "City Commission",
        "EventDate": event_date_str,
        "EventLocation": "Council Chambers",
        "EventInSiteURL": "https://springfield.legistar.com/MeetingDetail.aspx?ID=1201"
    }]);
    let matters = json!([{
        "MatterId": 88,
        "MatterFile": "ORD-2025-01",
        "MatterName": "Zoning amendment for riverfront district",
        "MatterIntroDate": intro_date_str,
        "MatterTypeName": "Ordinance"
    }]);

    let fetcher = Arc::new(
        MockFetcher::new()
            .on_json("https://webapi.legistar.com/v1/springfield/events", events)
            .on_json("https://webapi.legistar.com/v1/springfield/matters", matters),
    );

    // --- Collection ---

    let orchestrator = CollectionOrchestrator::new(store.clone(), fetcher, &test_config());
    let stats = orchestrator.collect_for_region(&region).await.unwrap();

    assert_eq!(stats.sources_collected, 1);
    assert_eq!(stats.items_found, 2);
    assert_eq!(stats.items_new, 2);
    assert!(stats.errors.is_empty());

    let items = store.items_for_source(source_id);
    assert_eq!(items.len(), 2);
    let hashes: std::collections::HashSet<_> =
        items.iter().map(|i| i.content_hash.clone()).collect();
    assert_eq!(hashes.len(), 2, "two distinct content hashes");

    // Re-collecting the same payloads stores nothing new.
    let again = orchestrator.collect_for_region(&region).await.unwrap();
    assert_eq!(again.items_new, 0);
    assert_eq!(again.items_skipped, 2);

    // --- Promotion ---

    let processor = ContentProcessor::new(store.clone(), store.clone());
    let process_stats = processor.process_pending(&region, 10).await.unwrap();

    assert_eq!(process_stats.promoted, 2);
    assert_eq!(process_stats.failed, 0);

    let articles = store.articles_for_region(region.id);
    assert_eq!(articles.len(), 2);

    let titles: Vec<String> = articles.iter().map(|a| a.title.clone()).collect();
    let expected_meeting_title = format!(
        "City Commission Meeting Scheduled for {} {}",
        event_date.format("%B"),
        event_date.day()
    );
    assert!(
        titles.contains(&expected_meeting_title),
        "expected {expected_meeting_title:?} in {titles:?}"
    );
    assert!(titles
        .iter()
        .any(|t| t == "ORD-2025-01: Zoning amendment for riverfront district"));

    // Items transitioned out of pending with article references.
    for item in store.items_for_source(source_id) {
        assert_eq!(item.processing_status, ProcessingStatus::Processed);
        assert!(item.article_id.is_some());
        assert!(matches!(
            item.content_kind,
            ContentKind::Meeting | ContentKind::Matter
        ));
    }

    // --- Second processing pass: nothing pending, nothing created ---

    let second = processor.process_pending(&region, 10).await.unwrap();
    assert_eq!(second.scanned, 0);
    assert_eq!(second.promoted, 0);
    assert_eq!(store.articles_for_region(region.id).len(), 2);
}
