//! Whole-pipeline laws: idempotent ingest (L1) and restart/replay
//! equivalence (L2), plus end-to-end verdict handling.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use icewatch_common::{
    AdapterConfig, AlertKind, Config, GeoPoint, Report, SourceSettings, TrustTier,
};
use icewatch_notify::{AlertPayload, AlertSink, Notifier, NotifyError};
use icewatch_pipeline::{
    Correlator, CorrelatorConfig, FilterStage, Gazetteer, HeuristicRecognizer, LocationExtractor,
    Pipeline,
};
use icewatch_store::Store;

#[derive(Clone, Default)]
struct RecordingSink {
    delivered: Arc<Mutex<Vec<AlertKind>>>,
}

#[async_trait]
impl AlertSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn deliver(&self, alert: &AlertPayload) -> Result<(), NotifyError> {
        self.delivered.lock().unwrap().push(alert.kind);
        Ok(())
    }
}

fn test_config() -> Config {
    let off = SourceSettings {
        enabled: false,
        interval_secs: 60,
    };
    Config {
        webhook_url: String::new(),
        db_path: ":memory:".to_string(),
        max_distance_km: 50.0,
        min_corroboration_sources: 2,
        cluster_expiry_hours: 6.0,
        fresh_max_hours: 3.0,
        temporal_window_hours: 2.0,
        geo_window_km: 3.0,
        sim_threshold: 0.25,
        queue_capacity: 1024,
        dry_run: false,
        log_level: "INFO".to_string(),
        adapters: AdapterConfig {
            community: off.clone(),
            community_feed_url: String::new(),
            microblog: off.clone(),
            microblog_search_url: String::new(),
            microblog_queries: vec![],
            photo: off.clone(),
            photo_base_url: String::new(),
            photo_accounts: vec![],
            smsmap: off.clone(),
            smsmap_url: String::new(),
            news: off,
            rss_feeds: vec![],
        },
    }
}

fn build_pipeline(store: Store) -> (Pipeline, Arc<Mutex<Vec<AlertKind>>>) {
    let config = test_config();
    let gazetteer = Arc::new(Gazetteer::bundled().unwrap());
    let filter = FilterStage::new(&config, gazetteer.clone(), &["news"]);
    let extractor = LocationExtractor::new(
        gazetteer,
        Some(Box::new(HeuristicRecognizer::new().unwrap())),
    );
    let correlator = Correlator::new(CorrelatorConfig::from_config(&config), store.clone());
    let sink = RecordingSink::default();
    let delivered = sink.delivered.clone();
    let notifier = Notifier::new(Box::new(sink), store.clone(), false);
    (
        Pipeline::new(filter, extractor, correlator, notifier, store),
        delivered,
    )
}

fn report(source: &str, local_id: &str, trust: TrustTier, content: &str, minutes_ago: i64) -> Report {
    let now = Utc::now();
    Report {
        dedup_key: Report::dedup_key_for(source, local_id),
        source: source.to_string(),
        trust,
        observed_at: now - Duration::minutes(minutes_ago),
        ingested_at: now,
        content: content.to_string(),
        author: Some(format!("{source}-observer")),
        url: None,
        coords: None,
        locations: vec![],
        verdict: None,
    }
}

fn incident_stream() -> Vec<Report> {
    vec![
        {
            let mut r = report(
                "community",
                "1",
                TrustTier::High,
                "ICE agents detaining people at the Whittier clinic right now",
                40,
            );
            r.coords = Some(GeoPoint::new(44.9533, -93.2780));
            r
        },
        report(
            "microblog",
            "2",
            TrustTier::Normal,
            "ICE agents at the Whittier clinic, avoid the area",
            30,
        ),
        report(
            "photo",
            "3",
            TrustTier::Normal,
            "ICE detaining people outside the Whittier clinic",
            20,
        ),
        report(
            "microblog",
            "4",
            TrustTier::Normal,
            "more ICE agents arriving at the Whittier clinic",
            10,
        ),
    ]
}

async fn membership(store: &Store) -> BTreeSet<BTreeSet<String>> {
    store
        .load_active_clusters()
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.members.into_iter().map(|m| m.dedup_key).collect())
        .collect()
}

#[tokio::test]
async fn reingesting_the_same_report_changes_nothing() {
    let store = Store::connect_in_memory().await.unwrap();
    let (mut pipeline, delivered) = build_pipeline(store.clone());

    let r = incident_stream().remove(0);
    pipeline.process(r.clone()).await.unwrap();
    pipeline.process(r).await.unwrap();

    assert_eq!(store.report_count().await.unwrap(), 1);
    let clusters = store.load_active_clusters().await.unwrap();
    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0].members.len(), 1);
    assert_eq!(delivered.lock().unwrap().len(), 1, "exactly one NEW alert");
}

#[tokio::test]
async fn rejected_reports_persist_but_never_cluster() {
    let store = Store::connect_in_memory().await.unwrap();
    let (mut pipeline, delivered) = build_pipeline(store.clone());

    let r = report(
        "news",
        "1",
        TrustTier::Normal,
        "ICE raids in Minneapolis last year drew protests",
        10,
    );
    pipeline.process(r).await.unwrap();

    assert_eq!(store.report_count().await.unwrap(), 1);
    assert!(store.load_active_clusters().await.unwrap().is_empty());
    assert!(delivered.lock().unwrap().is_empty());
}

#[tokio::test]
async fn one_incident_yields_one_new_then_updates() {
    let store = Store::connect_in_memory().await.unwrap();
    let (mut pipeline, delivered) = build_pipeline(store.clone());

    for r in incident_stream() {
        pipeline.process(r).await.unwrap();
    }

    let kinds = delivered.lock().unwrap().clone();
    assert_eq!(kinds[0], AlertKind::New);
    assert!(kinds[1..].iter().all(|k| *k == AlertKind::Update));

    let clusters = store.load_active_clusters().await.unwrap();
    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0].members.len(), 4);
}

#[tokio::test]
async fn restart_and_replay_yields_identical_membership() {
    // Uninterrupted run
    let store_a = Store::connect_in_memory().await.unwrap();
    let (mut pipeline_a, _) = build_pipeline(store_a.clone());
    for r in incident_stream() {
        pipeline_a.process(r).await.unwrap();
    }

    // Interrupted after two reports, then a fresh process resumes
    let store_b = Store::connect_in_memory().await.unwrap();
    let (mut pipeline_b, _) = build_pipeline(store_b.clone());
    let stream = incident_stream();
    for r in &stream[..2] {
        pipeline_b.process(r.clone()).await.unwrap();
    }
    drop(pipeline_b);

    let (mut resumed, _) = build_pipeline(store_b.clone());
    let restored = resumed.warm_start().await.unwrap();
    assert_eq!(restored, 1);
    for r in &stream[2..] {
        resumed.process(r.clone()).await.unwrap();
    }

    assert_eq!(membership(&store_a).await, membership(&store_b).await);
}
