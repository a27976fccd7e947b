//! Drives registered adapters on their configured cadence.
//!
//! One task per adapter, jittered intervals to avoid thundering herds, and
//! a bounded fan-in queue to the pipeline. When the queue is full, reports
//! are dropped (counted) rather than stalling faster adapters.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use icewatch_common::Report;

use crate::adapter::{AdapterError, SourceAdapter};

/// Per-poll deadline. An adapter that can't answer in this long forfeits
/// the tick.
const POLL_DEADLINE: Duration = Duration::from_secs(30);

/// How long shutdown waits for in-flight polls before cancelling them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Interval jitter: ±10%.
const JITTER_MIN: f64 = 0.9;
const JITTER_MAX: f64 = 1.1;

pub struct Scheduler {
    adapters: Vec<Box<dyn SourceAdapter>>,
    tx: mpsc::Sender<Report>,
    shutdown: watch::Receiver<bool>,
    dropped: Arc<AtomicU64>,
}

impl Scheduler {
    pub fn new(tx: mpsc::Sender<Report>, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            adapters: Vec::new(),
            tx,
            shutdown,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn register(&mut self, adapter: Box<dyn SourceAdapter>) {
        info!(
            source = adapter.name(),
            interval_secs = adapter.interval().as_secs(),
            trust = %adapter.trust(),
            "Adapter registered"
        );
        self.adapters.push(adapter);
    }

    pub fn adapter_count(&self) -> usize {
        self.adapters.len()
    }

    /// Counter of reports dropped on queue backpressure.
    pub fn dropped_handle(&self) -> Arc<AtomicU64> {
        self.dropped.clone()
    }

    /// Run all adapter loops until shutdown, then drain in-flight polls
    /// under the grace period and cancel the rest.
    pub async fn run(self) {
        let Scheduler {
            adapters,
            tx,
            mut shutdown,
            dropped,
        } = self;

        let total = adapters.len();
        if total == 0 {
            error!("No adapters registered; ingest is silent");
        }
        info!(adapters = total, "Scheduler starting");

        let disabled = Arc::new(AtomicUsize::new(0));
        let mut tasks = JoinSet::new();
        for adapter in adapters {
            tasks.spawn(adapter_loop(
                adapter,
                tx.clone(),
                shutdown.clone(),
                dropped.clone(),
                disabled.clone(),
                total,
            ));
        }
        // The pipeline sees the queue close once every adapter task is gone.
        drop(tx);

        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }

        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                grace_secs = SHUTDOWN_GRACE.as_secs(),
                "In-flight polls outlived the grace period, cancelling"
            );
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }

        info!("Scheduler stopped");
    }
}

async fn adapter_loop(
    mut adapter: Box<dyn SourceAdapter>,
    tx: mpsc::Sender<Report>,
    mut shutdown: watch::Receiver<bool>,
    dropped: Arc<AtomicU64>,
    disabled: Arc<AtomicUsize>,
    total: usize,
) {
    let name = adapter.name();

    loop {
        let wait = jittered(adapter.interval());
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown.changed() => {}
        }
        if *shutdown.borrow() {
            break;
        }

        match tokio::time::timeout(POLL_DEADLINE, adapter.poll()).await {
            Ok(Ok(reports)) => {
                for report in reports {
                    match tx.try_send(report) {
                        Ok(()) => {}
                        Err(TrySendError::Full(report)) => {
                            let count = dropped.fetch_add(1, Ordering::Relaxed) + 1;
                            warn!(
                                source = name,
                                dedup_key = %report.dedup_key,
                                total_dropped = count,
                                "Pipeline queue full, report dropped"
                            );
                        }
                        Err(TrySendError::Closed(_)) => {
                            info!(source = name, "Pipeline queue closed, adapter stopping");
                            return;
                        }
                    }
                }
            }
            Ok(Err(AdapterError::Transient(e))) => {
                warn!(source = name, error = %e, "Transient poll failure, retrying next tick");
            }
            Ok(Err(AdapterError::Permanent(e))) => {
                error!(source = name, error = %e, "Permanent poll failure, adapter disabled until restart");
                let down = disabled.fetch_add(1, Ordering::Relaxed) + 1;
                if down >= total {
                    error!("All source adapters are disabled; no reports are being collected");
                }
                return;
            }
            Err(_) => {
                warn!(
                    source = name,
                    deadline_secs = POLL_DEADLINE.as_secs(),
                    "Poll deadline exceeded, retrying next tick"
                );
            }
        }
    }

    info!(source = name, "Adapter stopped");
}

fn jittered(interval: Duration) -> Duration {
    let factor = rand::rng().random_range(JITTER_MIN..=JITTER_MAX);
    interval.mul_f64(factor)
}
