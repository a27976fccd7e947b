//! The sequential pipeline task.
//!
//! Drains the adapter queue one report at a time through
//! filter → extract → correlate → notify. Sequential on purpose: cluster
//! decisions stay deterministic in arrival order and the active-cluster set
//! needs no locking.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use icewatch_common::{IceWatchError, Report, Verdict};
use icewatch_notify::Notifier;
use icewatch_store::Store;

use crate::correlator::Correlator;
use crate::extractor::LocationExtractor;
use crate::filter::FilterStage;

/// How long a shutdown waits for queued reports before giving up.
const DRAIN_GRACE: Duration = Duration::from_secs(10);

pub struct Pipeline {
    filter: FilterStage,
    extractor: LocationExtractor,
    correlator: Correlator,
    notifier: Notifier,
    store: Store,
}

impl Pipeline {
    pub fn new(
        filter: FilterStage,
        extractor: LocationExtractor,
        correlator: Correlator,
        notifier: Notifier,
        store: Store,
    ) -> Self {
        Self {
            filter,
            extractor,
            correlator,
            notifier,
            store,
        }
    }

    /// Restore ACTIVE clusters from the store into the correlator. Member
    /// locations are re-extracted so matching behaves the same after a
    /// restart. Returns the number restored.
    pub async fn warm_start(&mut self) -> Result<usize, IceWatchError> {
        let mut clusters = self.store.load_active_clusters().await?;
        for cluster in &mut clusters {
            for member in &mut cluster.members {
                self.extractor.extract(member);
            }
        }
        let count = clusters.len();
        self.correlator.restore(clusters);
        Ok(count)
    }

    /// Run one report through every stage. Store and invariant failures
    /// propagate (fatal); everything else resolves to a verdict or an alert.
    pub async fn process(&mut self, mut report: Report) -> Result<(), IceWatchError> {
        let verdict = self.filter.verdict(&report);
        report.verdict = Some(verdict);

        // Dedup: a key we've seen before is silently dropped. The failed
        // insert also protects reports aborted mid-processing — they retry
        // on the adapter's next cycle.
        let inserted = self.store.put_report(&report).await?;
        if !inserted {
            trace!(dedup_key = %report.dedup_key, "Duplicate report dropped");
            return Ok(());
        }

        if verdict != Verdict::Relevant {
            debug!(
                dedup_key = %report.dedup_key,
                source = %report.source,
                verdict = %verdict,
                "Report rejected"
            );
            return Ok(());
        }

        self.extractor.extract(&mut report);
        info!(
            dedup_key = %report.dedup_key,
            source = %report.source,
            locations = report.locations.len(),
            "Relevant report accepted"
        );

        if let Some(emission) = self.correlator.observe(report, Utc::now()).await? {
            let cluster = self
                .correlator
                .cluster_mut(emission.cluster_id)
                .ok_or_else(|| {
                    IceWatchError::InvariantViolation("emitted cluster not active".to_string())
                })?;
            self.notifier.dispatch(cluster, emission.kind).await?;
        }

        Ok(())
    }

    /// Consume the queue until shutdown, then drain what's left under a
    /// bounded grace period.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<Report>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), IceWatchError> {
        info!("Pipeline task started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                maybe = rx.recv() => match maybe {
                    Some(report) => self.process(report).await?,
                    None => {
                        info!("Report queue closed, pipeline stopping");
                        return Ok(());
                    }
                }
            }
        }

        let deadline = tokio::time::Instant::now() + DRAIN_GRACE;
        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(report)) => self.process(report).await?,
                Ok(None) => break,
                Err(_) => {
                    warn!("Drain grace period elapsed with reports still queued");
                    break;
                }
            }
        }

        info!("Pipeline stopped");
        Ok(())
    }
}
