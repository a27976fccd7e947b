//! Notifier behavior: kind reconciliation, idempotency, retry classification.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use icewatch_common::{AlertKind, Cluster, Report, TrustTier};
use icewatch_notify::{AlertPayload, AlertSink, Notifier, NotifyError};
use icewatch_store::Store;

fn member(source: &str, n: usize) -> Report {
    let now = Utc::now();
    Report {
        dedup_key: format!("{source}:{n}"),
        source: source.to_string(),
        trust: TrustTier::Normal,
        observed_at: now,
        ingested_at: now,
        content: format!("ICE activity report {n}"),
        author: Some("observer".to_string()),
        url: None,
        coords: None,
        locations: vec![],
        verdict: None,
    }
}

#[derive(Clone, Default)]
struct RecordingSink {
    delivered: Arc<Mutex<Vec<(AlertKind, String)>>>,
}

#[async_trait]
impl AlertSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn deliver(&self, alert: &AlertPayload) -> Result<(), NotifyError> {
        self.delivered
            .lock()
            .unwrap()
            .push((alert.kind, alert.idempotency_key.clone()));
        Ok(())
    }
}

struct FailingSink {
    error: fn() -> NotifyError,
    attempts: Arc<Mutex<u32>>,
}

#[async_trait]
impl AlertSink for FailingSink {
    fn name(&self) -> &str {
        "failing"
    }

    async fn deliver(&self, _alert: &AlertPayload) -> Result<(), NotifyError> {
        *self.attempts.lock().unwrap() += 1;
        Err((self.error)())
    }
}

async fn store_with(cluster: &Cluster) -> Store {
    let store = Store::connect_in_memory().await.unwrap();
    for m in &cluster.members {
        store.put_report(m).await.unwrap();
    }
    store.upsert_cluster(cluster).await.unwrap();
    store
}

#[tokio::test]
async fn first_alert_is_new_then_updates_follow() {
    let sink = RecordingSink::default();
    let delivered = sink.delivered.clone();

    let mut cluster = Cluster::from_seed(member("community", 1));
    let store = store_with(&cluster).await;
    let notifier = Notifier::new(Box::new(sink), store, false);

    notifier.dispatch(&mut cluster, AlertKind::New).await.unwrap();
    cluster.members.push(member("microblog", 2));
    notifier.dispatch(&mut cluster, AlertKind::Update).await.unwrap();

    let kinds: Vec<AlertKind> = delivered.lock().unwrap().iter().map(|(k, _)| *k).collect();
    assert_eq!(kinds, vec![AlertKind::New, AlertKind::Update]);

    assert_eq!(cluster.alerts_emitted.len(), 2);
    assert!(cluster.alerts_emitted[0].member_count < cluster.alerts_emitted[1].member_count);
}

#[tokio::test]
async fn duplicate_new_downgrades_to_update() {
    let sink = RecordingSink::default();
    let delivered = sink.delivered.clone();

    let mut cluster = Cluster::from_seed(member("community", 1));
    let store = store_with(&cluster).await;
    let notifier = Notifier::new(Box::new(sink), store, false);

    notifier.dispatch(&mut cluster, AlertKind::New).await.unwrap();
    cluster.members.push(member("microblog", 2));
    // Correlator asks for NEW again; history says otherwise.
    notifier.dispatch(&mut cluster, AlertKind::New).await.unwrap();

    let kinds: Vec<AlertKind> = delivered.lock().unwrap().iter().map(|(k, _)| *k).collect();
    assert_eq!(kinds, vec![AlertKind::New, AlertKind::Update]);
}

#[tokio::test]
async fn update_without_prior_new_upgrades() {
    let sink = RecordingSink::default();
    let delivered = sink.delivered.clone();

    let mut cluster = Cluster::from_seed(member("microblog", 1));
    cluster.members.push(member("photo", 2));
    let store = store_with(&cluster).await;
    let notifier = Notifier::new(Box::new(sink), store, false);

    notifier
        .dispatch(&mut cluster, AlertKind::Update)
        .await
        .unwrap();

    let kinds: Vec<AlertKind> = delivered.lock().unwrap().iter().map(|(k, _)| *k).collect();
    assert_eq!(kinds, vec![AlertKind::New]);
}

#[tokio::test]
async fn stagnant_member_count_suppresses_emission() {
    let sink = RecordingSink::default();
    let delivered = sink.delivered.clone();

    let mut cluster = Cluster::from_seed(member("community", 1));
    let store = store_with(&cluster).await;
    let notifier = Notifier::new(Box::new(sink), store, false);

    notifier.dispatch(&mut cluster, AlertKind::New).await.unwrap();
    // Nothing new arrived; a second candidate must be suppressed.
    notifier.dispatch(&mut cluster, AlertKind::Update).await.unwrap();

    assert_eq!(delivered.lock().unwrap().len(), 1);
    assert_eq!(cluster.alerts_emitted.len(), 1);
}

#[tokio::test]
async fn idempotency_keys_carry_the_sequence() {
    let sink = RecordingSink::default();
    let delivered = sink.delivered.clone();

    let mut cluster = Cluster::from_seed(member("community", 1));
    let store = store_with(&cluster).await;
    let notifier = Notifier::new(Box::new(sink), store, false);

    notifier.dispatch(&mut cluster, AlertKind::New).await.unwrap();
    cluster.members.push(member("microblog", 2));
    notifier.dispatch(&mut cluster, AlertKind::Update).await.unwrap();

    let keys: Vec<String> = delivered.lock().unwrap().iter().map(|(_, k)| k.clone()).collect();
    assert_eq!(keys[0], format!("{}/0", cluster.id));
    assert_eq!(keys[1], format!("{}/1", cluster.id));
}

#[tokio::test]
async fn transient_failures_retry_then_leave_history_unchanged() {
    let attempts = Arc::new(Mutex::new(0));
    let sink = FailingSink {
        error: || NotifyError::Transient("503".to_string()),
        attempts: attempts.clone(),
    };

    let mut cluster = Cluster::from_seed(member("community", 1));
    let store = store_with(&cluster).await;
    let notifier = Notifier::new(Box::new(sink), store, false);

    notifier.dispatch(&mut cluster, AlertKind::New).await.unwrap();

    assert_eq!(*attempts.lock().unwrap(), 5, "bounded retry budget");
    assert!(
        cluster.alerts_emitted.is_empty(),
        "failed delivery must not record an emission"
    );
}

#[tokio::test]
async fn permanent_failure_drops_without_retry() {
    let attempts = Arc::new(Mutex::new(0));
    let sink = FailingSink {
        error: || NotifyError::Permanent("404".to_string()),
        attempts: attempts.clone(),
    };

    let mut cluster = Cluster::from_seed(member("community", 1));
    let store = store_with(&cluster).await;
    let notifier = Notifier::new(Box::new(sink), store, false);

    notifier.dispatch(&mut cluster, AlertKind::New).await.unwrap();

    assert_eq!(*attempts.lock().unwrap(), 1);
    assert!(cluster.alerts_emitted.is_empty());
}

#[tokio::test]
async fn failed_new_is_retried_by_the_next_emission() {
    // First delivery fails permanently; the next candidate must go out as
    // NEW because no NEW was ever recorded.
    let mut cluster = Cluster::from_seed(member("microblog", 1));
    cluster.members.push(member("photo", 2));
    let store = store_with(&cluster).await;

    let failing = FailingSink {
        error: || NotifyError::Permanent("404".to_string()),
        attempts: Arc::new(Mutex::new(0)),
    };
    let notifier = Notifier::new(Box::new(failing), store.clone(), false);
    notifier.dispatch(&mut cluster, AlertKind::New).await.unwrap();
    assert!(cluster.alerts_emitted.is_empty());

    let sink = RecordingSink::default();
    let delivered = sink.delivered.clone();
    let notifier = Notifier::new(Box::new(sink), store, false);
    cluster.members.push(member("community", 3));
    notifier.dispatch(&mut cluster, AlertKind::Update).await.unwrap();

    let kinds: Vec<AlertKind> = delivered.lock().unwrap().iter().map(|(k, _)| *k).collect();
    assert_eq!(kinds, vec![AlertKind::New]);
}

#[tokio::test]
async fn dry_run_skips_store_writes() {
    let sink = RecordingSink::default();

    let mut cluster = Cluster::from_seed(member("community", 1));
    let store = store_with(&cluster).await;
    let notifier = Notifier::new(Box::new(sink), store.clone(), true);

    notifier.dispatch(&mut cluster, AlertKind::New).await.unwrap();

    // Emission recorded in memory only
    assert_eq!(cluster.alerts_emitted.len(), 1);
    let persisted = store.load_active_clusters().await.unwrap();
    assert!(persisted[0].alerts_emitted.is_empty());
}
