//! The clustering correlator.
//!
//! Owns the in-memory ACTIVE cluster set. Each filtered report is matched
//! against candidates from a ~1 km spatial grid using temporal, geographic,
//! and content predicates; winners are assigned, losers seed new clusters.
//! Single-writer by design — the pipeline task is the only caller, so
//! cluster decisions are deterministic in arrival order.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use icewatch_common::{
    AlertKind, Cluster, ClusterState, Config, GeoPoint, IceWatchError, Report, TrustTier,
};
use icewatch_store::Store;

use crate::similarity::SimilarityEngine;

const CELL_KM: f64 = 1.0;
const KM_PER_DEG_LAT: f64 = 111.195;

/// Composite match score weights: content, geography, recency.
const W_SIM: f64 = 0.5;
const W_GEO: f64 = 0.3;
const W_TIME: f64 = 0.2;

#[derive(Debug, Clone)]
pub struct CorrelatorConfig {
    pub temporal_window: Duration,
    pub geo_window_km: f64,
    pub cluster_expiry: Duration,
    pub sim_threshold: f64,
    pub min_corroboration_sources: usize,
}

impl CorrelatorConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            temporal_window: config.temporal_window(),
            geo_window_km: config.geo_window_km,
            cluster_expiry: config.cluster_expiry(),
            sim_threshold: config.sim_threshold,
            min_corroboration_sources: config.min_corroboration_sources,
        }
    }
}

/// An alert candidate handed to the notifier. The notifier reconciles the
/// kind against the cluster's emission history before dispatch.
#[derive(Debug, Clone, Copy)]
pub struct Emission {
    pub cluster_id: Uuid,
    pub kind: AlertKind,
}

pub struct Correlator {
    cfg: CorrelatorConfig,
    store: Store,
    clusters: HashMap<Uuid, Cluster>,
    grid: SpatialGrid,
    /// Clusters with no centroid yet; always candidates for content and
    /// same-observer matching.
    unanchored: HashSet<Uuid>,
    similarity: SimilarityEngine,
}

impl Correlator {
    pub fn new(cfg: CorrelatorConfig, store: Store) -> Self {
        Self {
            cfg,
            store,
            clusters: HashMap::new(),
            grid: SpatialGrid::new(icewatch_common::DOWNTOWN_LAT),
            unanchored: HashSet::new(),
            similarity: SimilarityEngine::new(),
        }
    }

    /// Warm-start from persisted ACTIVE clusters.
    pub fn restore(&mut self, clusters: Vec<Cluster>) {
        let count = clusters.len();
        for cluster in clusters {
            for member in &cluster.members {
                self.similarity.observe(&member.content);
            }
            self.index(&cluster);
            self.clusters.insert(cluster.id, cluster);
        }
        if count > 0 {
            info!(clusters = count, "Restored active clusters from store");
        }
    }

    pub fn cluster(&self, id: Uuid) -> Option<&Cluster> {
        self.clusters.get(&id)
    }

    pub fn cluster_mut(&mut self, id: Uuid) -> Option<&mut Cluster> {
        self.clusters.get_mut(&id)
    }

    pub fn active_count(&self) -> usize {
        self.clusters.len()
    }

    /// Process one filtered report: expire stale clusters, match or create,
    /// persist, and return an alert candidate when one is due.
    pub async fn observe(
        &mut self,
        report: Report,
        now: DateTime<Utc>,
    ) -> Result<Option<Emission>, IceWatchError> {
        self.expire_stale(now).await?;

        // A report joins at most one cluster, ever.
        if self
            .clusters
            .values()
            .any(|c| c.members.iter().any(|m| m.dedup_key == report.dedup_key))
        {
            return Err(IceWatchError::InvariantViolation(format!(
                "report {} already belongs to a cluster",
                report.dedup_key
            )));
        }

        self.similarity.observe(&report.content);

        match self.best_match(&report) {
            Some(cluster_id) => self.assign(cluster_id, report).await,
            None => self.create(report).await,
        }
    }

    /// Expire clusters whose last activity is older than the expiry window,
    /// persisting their terminal state. Strictly-older semantics: a cluster
    /// exactly at the boundary stays active.
    pub async fn expire_stale(&mut self, now: DateTime<Utc>) -> Result<usize, IceWatchError> {
        let expired: Vec<Uuid> = self
            .clusters
            .values()
            .filter(|c| now - c.last_updated > self.cfg.cluster_expiry)
            .map(|c| c.id)
            .collect();

        for id in &expired {
            if let Some(mut cluster) = self.clusters.remove(id) {
                cluster.state = ClusterState::Expired;
                self.unindex(&cluster);
                self.store.upsert_cluster(&cluster).await?;
                debug!(cluster_id = %cluster.id, members = cluster.members.len(), "Cluster expired");
            }
        }
        Ok(expired.len())
    }

    fn best_match(&self, report: &Report) -> Option<Uuid> {
        let report_point = report.best_location().and_then(|l| l.point);

        let candidates: Vec<Uuid> = match report_point {
            Some(point) => {
                let mut ids = self.grid.nearby(&point, self.cfg.geo_window_km);
                ids.extend(self.unanchored.iter().copied());
                ids
            }
            // No resolved location: only same-observer follow-ups can match,
            // so every active cluster is a candidate.
            None => self.clusters.keys().copied().collect(),
        };

        let mut best: Option<(f64, DateTime<Utc>, Uuid)> = None;
        for id in candidates {
            let Some(cluster) = self.clusters.get(&id) else {
                continue;
            };
            let Some(score) = self.match_score(report, report_point, cluster) else {
                continue;
            };
            let replace = match &best {
                None => true,
                Some((best_score, best_first_seen, _)) => {
                    score > *best_score
                        || (score == *best_score && cluster.first_seen < *best_first_seen)
                }
            };
            if replace {
                best = Some((score, cluster.first_seen, id));
            }
        }
        best.map(|(_, _, id)| id)
    }

    /// All three predicates must hold; returns the composite score used to
    /// pick between multiple matching clusters.
    fn match_score(
        &self,
        report: &Report,
        report_point: Option<GeoPoint>,
        cluster: &Cluster,
    ) -> Option<f64> {
        // Temporal: recency against the cluster's latest activity.
        let gap = (report.observed_at - cluster.last_updated).abs();
        if gap > self.cfg.temporal_window {
            return None;
        }
        // All members must stay within the window of the oldest observation.
        let new_min = cluster.oldest_observation().min(report.observed_at);
        let new_max = cluster
            .members
            .iter()
            .map(|m| m.observed_at)
            .max()
            .unwrap_or(cluster.last_updated)
            .max(report.observed_at);
        if new_max - new_min > self.cfg.temporal_window {
            return None;
        }

        // Geographic: proximity when both sides have coordinates, otherwise
        // only a follow-up by the same observer qualifies.
        let geo_term = match (report_point, cluster.centroid) {
            (Some(p), Some(c)) => {
                let dist = p.distance_km(&c);
                if dist > self.cfg.geo_window_km {
                    return None;
                }
                1.0 - dist / self.cfg.geo_window_km
            }
            _ => {
                if !cluster.contains_observer(&report.source, report.author.as_deref()) {
                    return None;
                }
                0.0
            }
        };

        // Content: TF-IDF cosine against the cluster's concatenated text.
        let cluster_text = cluster
            .members
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let sim = self.similarity.cosine(&report.content, &cluster_text);
        if sim < self.cfg.sim_threshold {
            return None;
        }

        let window_secs = self.cfg.temporal_window.num_seconds() as f64;
        let time_term = 1.0 - gap.num_seconds() as f64 / window_secs;
        Some(W_SIM * sim + W_GEO * geo_term + W_TIME * time_term)
    }

    async fn assign(
        &mut self,
        cluster_id: Uuid,
        report: Report,
    ) -> Result<Option<Emission>, IceWatchError> {
        let window = self.cfg.temporal_window;
        let min_sources = self.cfg.min_corroboration_sources;

        let cluster = self
            .clusters
            .get_mut(&cluster_id)
            .ok_or_else(|| IceWatchError::InvariantViolation("matched cluster vanished".into()))?;

        let old_centroid = cluster.centroid;
        let observed_at = report.observed_at;

        cluster.members.push(report);
        cluster.last_updated = cluster.last_updated.max(observed_at);
        cluster.centroid = cluster.weighted_centroid().or(old_centroid);
        if let Some(label) = cluster.majority_label() {
            cluster.label = Some(label);
        }
        cluster.confidence = confidence(cluster, window);

        let kind = if !cluster.alerts_emitted.is_empty() {
            Some(AlertKind::Update)
        } else if corroborated(cluster, min_sources) {
            // First alert for this cluster — a silent NORMAL-trust seed just
            // got its corroborating source (or a failed NEW is being retried).
            Some(AlertKind::New)
        } else {
            None
        };

        // Re-bucket if the centroid moved cells or appeared.
        let cluster_snapshot = cluster.clone();
        self.rebucket(&cluster_snapshot, old_centroid);
        self.store.upsert_cluster(&cluster_snapshot).await?;

        debug!(
            cluster_id = %cluster_id,
            members = cluster_snapshot.members.len(),
            confidence = cluster_snapshot.confidence,
            "Report assigned to cluster"
        );

        Ok(kind.map(|kind| Emission { cluster_id, kind }))
    }

    async fn create(&mut self, report: Report) -> Result<Option<Emission>, IceWatchError> {
        let trust = report.trust;
        let mut cluster = Cluster::from_seed(report);
        cluster.confidence = confidence(&cluster, self.cfg.temporal_window);

        let cluster_id = cluster.id;
        self.index(&cluster);
        self.store.upsert_cluster(&cluster).await?;
        self.clusters.insert(cluster_id, cluster);

        debug!(cluster_id = %cluster_id, "New cluster created");

        // High-trust sources alert immediately; everything else stays silent
        // until corroborated.
        Ok((trust == TrustTier::High).then_some(Emission {
            cluster_id,
            kind: AlertKind::New,
        }))
    }

    fn index(&mut self, cluster: &Cluster) {
        match cluster.centroid {
            Some(point) => self.grid.insert(cluster.id, &point),
            None => {
                self.unanchored.insert(cluster.id);
            }
        }
    }

    fn unindex(&mut self, cluster: &Cluster) {
        if let Some(point) = cluster.centroid {
            self.grid.remove(cluster.id, &point);
        }
        self.unanchored.remove(&cluster.id);
    }

    fn rebucket(&mut self, cluster: &Cluster, old_centroid: Option<GeoPoint>) {
        match (old_centroid, cluster.centroid) {
            (None, Some(new)) => {
                self.unanchored.remove(&cluster.id);
                self.grid.insert(cluster.id, &new);
            }
            (Some(old), Some(new)) => {
                if self.grid.cell(&old) != self.grid.cell(&new) {
                    self.grid.remove(cluster.id, &old);
                    self.grid.insert(cluster.id, &new);
                }
            }
            _ => {}
        }
    }
}

/// True when the cluster clears the bar for a first alert.
fn corroborated(cluster: &Cluster, min_sources: usize) -> bool {
    cluster.source_diversity() >= min_sources
        || cluster.members.iter().any(|m| m.trust == TrustTier::High)
}

/// Evidentiary strength: source diversity, member count, temporal
/// tightness, and location precision.
pub fn confidence(cluster: &Cluster, temporal_window: Duration) -> f64 {
    let members = cluster.members.len().max(1) as f64;
    let div_term = (cluster.source_diversity() as f64 / 3.0).min(1.0);
    let count_term = (members / 5.0).min(1.0);

    let window_secs = temporal_window.num_seconds().max(1) as f64;
    let span_secs = cluster.observation_span().num_seconds() as f64;
    let time_term = (1.0 - span_secs / window_secs).clamp(0.0, 1.0);

    let loc_term = cluster
        .members
        .iter()
        .map(|m| m.location_confidence())
        .sum::<f64>()
        / members;

    (0.35 * div_term + 0.25 * count_term + 0.20 * time_term + 0.20 * loc_term).clamp(0.0, 1.0)
}

// --- Spatial grid ---

/// Fixed-size grid over lat/lon, ~1 km cells at the metro's latitude.
struct SpatialGrid {
    km_per_deg_lon: f64,
    cells: HashMap<(i64, i64), Vec<Uuid>>,
}

impl SpatialGrid {
    fn new(reference_lat: f64) -> Self {
        Self {
            km_per_deg_lon: KM_PER_DEG_LAT * reference_lat.to_radians().cos(),
            cells: HashMap::new(),
        }
    }

    fn cell(&self, point: &GeoPoint) -> (i64, i64) {
        (
            (point.lat * KM_PER_DEG_LAT / CELL_KM).floor() as i64,
            (point.lon * self.km_per_deg_lon / CELL_KM).floor() as i64,
        )
    }

    fn insert(&mut self, id: Uuid, point: &GeoPoint) {
        self.cells.entry(self.cell(point)).or_default().push(id);
    }

    fn remove(&mut self, id: Uuid, point: &GeoPoint) {
        let key = self.cell(point);
        if let Some(ids) = self.cells.get_mut(&key) {
            ids.retain(|i| *i != id);
            if ids.is_empty() {
                self.cells.remove(&key);
            }
        }
    }

    /// Ids in every cell overlapping a radius around the point.
    fn nearby(&self, point: &GeoPoint, radius_km: f64) -> Vec<Uuid> {
        let (row, col) = self.cell(point);
        let ring = (radius_km / CELL_KM).ceil() as i64 + 1;
        let mut ids = Vec::new();
        for r in (row - ring)..=(row + ring) {
            for c in (col - ring)..=(col + ring) {
                if let Some(cell_ids) = self.cells.get(&(r, c)) {
                    ids.extend(cell_ids.iter().copied());
                }
            }
        }
        ids
    }
}
