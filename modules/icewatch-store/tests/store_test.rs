//! Integration tests for the SQLite store, against an in-memory database.

use chrono::{Duration, Utc};
use icewatch_common::{
    AlertKind, AlertRecord, Cluster, GeoPoint, Report, ResolvedLocation, TrustTier, Verdict,
};
use icewatch_store::Store;

fn report(key: &str, source: &str) -> Report {
    let now = Utc::now();
    Report {
        dedup_key: key.to_string(),
        source: source.to_string(),
        trust: TrustTier::Normal,
        observed_at: now - Duration::minutes(10),
        ingested_at: now,
        content: "ICE agents reported near Lake Street".to_string(),
        author: Some("observer".to_string()),
        url: Some("https://example.com/post/1".to_string()),
        coords: Some(GeoPoint::new(44.9483, -93.2620)),
        locations: vec![ResolvedLocation {
            name: Some("Lake Street".to_string()),
            point: Some(GeoPoint::new(44.9483, -93.2620)),
            confidence: 0.9,
        }],
        verdict: Some(Verdict::Relevant),
    }
}

#[tokio::test]
async fn put_report_is_idempotent() {
    let store = Store::connect_in_memory().await.unwrap();
    let r = report("microblog:1", "microblog");

    assert!(store.put_report(&r).await.unwrap());
    assert!(!store.put_report(&r).await.unwrap(), "second insert must be a no-op");
    assert_eq!(store.report_count().await.unwrap(), 1);
    assert!(store.has_report("microblog:1").await.unwrap());
    assert!(!store.has_report("microblog:2").await.unwrap());
}

#[tokio::test]
async fn upsert_and_restore_active_cluster() {
    let store = Store::connect_in_memory().await.unwrap();

    let a = report("microblog:1", "microblog");
    let b = report("photo:1", "photo");
    store.put_report(&a).await.unwrap();
    store.put_report(&b).await.unwrap();

    let mut cluster = Cluster::from_seed(a.clone());
    cluster.members.push(b.clone());
    cluster.last_updated = b.observed_at;
    cluster.confidence = 0.55;
    store.upsert_cluster(&cluster).await.unwrap();

    let restored = store.load_active_clusters().await.unwrap();
    assert_eq!(restored.len(), 1);
    let c = &restored[0];
    assert_eq!(c.id, cluster.id);
    assert_eq!(c.members.len(), 2);
    assert_eq!(c.source_diversity(), 2);
    assert!((c.confidence - 0.55).abs() < 1e-9);
    // Pre-resolved coordinates round-trip through coords_json
    assert!(c.members[0].coords.is_some());
}

#[tokio::test]
async fn mark_alert_appends_record() {
    let store = Store::connect_in_memory().await.unwrap();

    let a = report("community:1", "community");
    store.put_report(&a).await.unwrap();
    let mut cluster = Cluster::from_seed(a);
    store.upsert_cluster(&cluster).await.unwrap();

    let record = AlertRecord {
        kind: AlertKind::New,
        at: Utc::now(),
        member_count: 1,
    };
    cluster.alerts_emitted.push(record.clone());
    store.mark_alert(&cluster, &record).await.unwrap();

    let restored = store.load_active_clusters().await.unwrap();
    assert_eq!(restored[0].alerts_emitted.len(), 1);
    assert_eq!(restored[0].alerts_emitted[0].kind, AlertKind::New);
    assert_eq!(restored[0].alerts_emitted[0].member_count, 1);
}

#[tokio::test]
async fn expired_clusters_are_not_restored() {
    let store = Store::connect_in_memory().await.unwrap();

    let a = report("microblog:9", "microblog");
    store.put_report(&a).await.unwrap();
    let mut cluster = Cluster::from_seed(a);
    cluster.state = icewatch_common::ClusterState::Expired;
    store.upsert_cluster(&cluster).await.unwrap();

    assert!(store.load_active_clusters().await.unwrap().is_empty());
}

#[tokio::test]
async fn purge_removes_only_old_unclustered_rows() {
    let store = Store::connect_in_memory().await.unwrap();

    let mut old = report("microblog:old", "microblog");
    old.ingested_at = Utc::now() - Duration::days(10);
    store.put_report(&old).await.unwrap();

    let fresh = report("microblog:fresh", "microblog");
    store.put_report(&fresh).await.unwrap();

    let mut clustered = report("community:kept", "community");
    clustered.ingested_at = Utc::now() - Duration::days(10);
    store.put_report(&clustered).await.unwrap();
    let cluster = Cluster::from_seed(clustered);
    store.upsert_cluster(&cluster).await.unwrap();

    let removed = store
        .purge_older_than(Utc::now() - Duration::days(7))
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert_eq!(store.report_count().await.unwrap(), 2);
}
