//! At-most-once NEW / UPDATE emission with idempotency against the store.
//!
//! The notifier is the invariant boundary for alert history: one NEW per
//! cluster, always before any UPDATE, member counts strictly increasing.
//! Kind candidates from the correlator are reconciled against the cluster's
//! recorded history before anything is sent.

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use icewatch_common::{AlertKind, AlertRecord, Cluster, IceWatchError};
use icewatch_store::Store;

use crate::payload::build_payload;
use crate::sink::{AlertSink, NotifyError};

const MAX_ATTEMPTS: u32 = 5;
const BACKOFF_BASE: Duration = Duration::from_secs(2);
const BACKOFF_CAP: Duration = Duration::from_secs(60);

pub struct Notifier {
    sink: Box<dyn AlertSink>,
    store: Store,
    dry_run: bool,
}

impl Notifier {
    pub fn new(sink: Box<dyn AlertSink>, store: Store, dry_run: bool) -> Self {
        info!(sink = sink.name(), dry_run, "Notifier ready");
        Self {
            sink,
            store,
            dry_run,
        }
    }

    /// Dispatch an emission candidate for a cluster. Mutates only the
    /// cluster's `alerts_emitted` record (and its store marker).
    ///
    /// Delivery failures never bubble up: transient failures exhaust a
    /// bounded retry budget, permanent ones are logged and dropped with the
    /// emission history untouched so a later update retries the missing
    /// alert. Store failures are fatal and do propagate.
    pub async fn dispatch(
        &self,
        cluster: &mut Cluster,
        candidate: AlertKind,
    ) -> Result<(), IceWatchError> {
        // Reconcile against history: a second NEW downgrades, an UPDATE
        // without a prior NEW upgrades.
        let kind = if cluster.has_new_alert() {
            AlertKind::Update
        } else {
            AlertKind::New
        };
        if kind != candidate {
            debug!(
                cluster_id = %cluster.id,
                candidate = %candidate,
                reconciled = %kind,
                "Alert kind reconciled against emission history"
            );
        }

        // Member counts across successive alerts must strictly increase.
        let member_count = cluster.members.len();
        if let Some(last) = cluster.alerts_emitted.last() {
            if member_count <= last.member_count {
                debug!(
                    cluster_id = %cluster.id,
                    member_count,
                    last = last.member_count,
                    "Suppressing alert: member count has not grown"
                );
                return Ok(());
            }
        }

        let sequence = cluster.alerts_emitted.len();
        let payload = build_payload(cluster, kind, sequence);

        match self.deliver_with_retry(&payload).await {
            Ok(()) => {
                let record = AlertRecord {
                    kind,
                    at: Utc::now(),
                    member_count,
                };
                cluster.alerts_emitted.push(record.clone());
                if !self.dry_run {
                    self.store.mark_alert(cluster, &record).await?;
                }
                info!(
                    cluster_id = %cluster.id,
                    kind = %kind,
                    member_count,
                    confidence = cluster.confidence,
                    "Alert dispatched"
                );
                Ok(())
            }
            Err(NotifyError::Permanent(e)) => {
                warn!(cluster_id = %cluster.id, error = %e, "Permanent delivery failure, alert dropped");
                Ok(())
            }
            Err(NotifyError::Transient(e)) => {
                warn!(
                    cluster_id = %cluster.id,
                    error = %e,
                    attempts = MAX_ATTEMPTS,
                    "Delivery still failing after retries, alert dropped"
                );
                Ok(())
            }
        }
    }

    async fn deliver_with_retry(
        &self,
        payload: &crate::payload::AlertPayload,
    ) -> Result<(), NotifyError> {
        let mut last_err = None;
        for attempt in 0..MAX_ATTEMPTS {
            match self.sink.deliver(payload).await {
                Ok(()) => return Ok(()),
                Err(NotifyError::Permanent(e)) => return Err(NotifyError::Permanent(e)),
                Err(NotifyError::Transient(e)) => {
                    if attempt + 1 < MAX_ATTEMPTS {
                        let backoff = backoff_for(attempt);
                        warn!(
                            attempt = attempt + 1,
                            backoff_secs = backoff.as_secs(),
                            error = %e,
                            "Transient delivery failure, retrying after backoff"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                    last_err = Some(e);
                }
            }
        }
        Err(NotifyError::Transient(
            last_err.unwrap_or_else(|| "exhausted retries".to_string()),
        ))
    }
}

/// Exponential backoff: base doubles per attempt, capped.
fn backoff_for(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE * 2u32.saturating_pow(attempt);
    exp.min(BACKOFF_CAP)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_for(0), Duration::from_secs(2));
        assert_eq!(backoff_for(1), Duration::from_secs(4));
        assert_eq!(backoff_for(3), Duration::from_secs(16));
        assert_eq!(backoff_for(10), Duration::from_secs(60));
    }
}
