use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;

// --- Source trust ---

/// Coarse source-level priority. High-trust sources (vetted community
/// reporting platforms) may trigger single-source alerts; everything else
/// waits for corroboration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustTier {
    High,
    Normal,
}

impl std::fmt::Display for TrustTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrustTier::High => write!(f, "high"),
            TrustTier::Normal => write!(f, "normal"),
        }
    }
}

impl TrustTier {
    pub fn from_str_loose(s: &str) -> Self {
        match s {
            "high" => TrustTier::High,
            _ => TrustTier::Normal,
        }
    }
}

// --- Filter verdict ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Relevant,
    RejectedStale,
    RejectedIrrelevant,
    RejectedNews,
    RejectedOutOfRegion,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Relevant => write!(f, "relevant"),
            Verdict::RejectedStale => write!(f, "rejected_stale"),
            Verdict::RejectedIrrelevant => write!(f, "rejected_irrelevant"),
            Verdict::RejectedNews => write!(f, "rejected_news"),
            Verdict::RejectedOutOfRegion => write!(f, "rejected_out_of_region"),
        }
    }
}

impl Verdict {
    pub fn from_str_loose(s: &str) -> Self {
        match s {
            "relevant" => Verdict::Relevant,
            "rejected_stale" => Verdict::RejectedStale,
            "rejected_news" => Verdict::RejectedNews,
            "rejected_out_of_region" => Verdict::RejectedOutOfRegion,
            _ => Verdict::RejectedIrrelevant,
        }
    }
}

// --- Extracted location ---

/// A place reference resolved from report text or carried by the source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedLocation {
    pub name: Option<String>,
    pub point: Option<GeoPoint>,
    pub confidence: f64,
}

// --- Report ---

/// A single observation from one source at one timestamp.
///
/// Created by an adapter, mutated only through the filter/extract pipeline
/// until committed, then read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    /// Globally unique: `{source}:{source_local_id}`.
    pub dedup_key: String,
    pub source: String,
    pub trust: TrustTier,
    /// When the observation was made (source-provided, UTC).
    pub observed_at: DateTime<Utc>,
    /// When we fetched it.
    pub ingested_at: DateTime<Utc>,
    pub content: String,
    pub author: Option<String>,
    pub url: Option<String>,
    /// Coordinates carried by the source itself, if any.
    pub coords: Option<GeoPoint>,
    /// Populated by the location extractor.
    pub locations: Vec<ResolvedLocation>,
    pub verdict: Option<Verdict>,
}

impl Report {
    pub fn dedup_key_for(source: &str, local_id: &str) -> String {
        format!("{source}:{local_id}")
    }

    /// Observation age relative to ingest.
    pub fn age(&self) -> Duration {
        self.ingested_at - self.observed_at
    }

    /// Highest-confidence resolved location with coordinates, if any.
    pub fn best_location(&self) -> Option<&ResolvedLocation> {
        self.locations
            .iter()
            .filter(|l| l.point.is_some())
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
    }

    /// Best location confidence, 0.0 when nothing resolved.
    pub fn location_confidence(&self) -> f64 {
        self.locations
            .iter()
            .map(|l| l.confidence)
            .fold(0.0, f64::max)
    }
}

// --- Alerts ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    New,
    Update,
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertKind::New => write!(f, "new"),
            AlertKind::Update => write!(f, "update"),
        }
    }
}

/// One entry in a cluster's emission history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub kind: AlertKind,
    pub at: DateTime<Utc>,
    pub member_count: usize,
}

// --- Cluster ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterState {
    Active,
    Expired,
}

impl std::fmt::Display for ClusterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterState::Active => write!(f, "active"),
            ClusterState::Expired => write!(f, "expired"),
        }
    }
}

/// A hypothesized incident: the set of reports believed to describe the same
/// real-world event. Active from creation until it goes quiet past expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: Uuid,
    pub centroid: Option<GeoPoint>,
    /// Best-known human-readable location label.
    pub label: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    /// Member reports in arrival order.
    pub members: Vec<Report>,
    pub confidence: f64,
    pub state: ClusterState,
    pub alerts_emitted: Vec<AlertRecord>,
}

impl Cluster {
    /// Start a new cluster from its first member.
    pub fn from_seed(report: Report) -> Self {
        let centroid = report.best_location().and_then(|l| l.point);
        let label = report
            .best_location()
            .and_then(|l| l.name.clone());
        let observed_at = report.observed_at;
        Self {
            id: Uuid::new_v4(),
            centroid,
            label,
            first_seen: observed_at,
            last_updated: observed_at,
            members: vec![report],
            confidence: 0.0,
            state: ClusterState::Active,
            alerts_emitted: Vec::new(),
        }
    }

    /// Distinct source names among members.
    pub fn source_set(&self) -> std::collections::BTreeSet<&str> {
        self.members.iter().map(|r| r.source.as_str()).collect()
    }

    pub fn source_diversity(&self) -> usize {
        self.source_set().len()
    }

    /// True if a member from this source/author pair already exists —
    /// a follow-up post by the same observer.
    pub fn contains_observer(&self, source: &str, author: Option<&str>) -> bool {
        self.members
            .iter()
            .any(|m| m.source == source && m.author.as_deref() == author)
    }

    /// Span between the oldest and newest member observation.
    pub fn observation_span(&self) -> Duration {
        let min = self.members.iter().map(|m| m.observed_at).min();
        let max = self.members.iter().map(|m| m.observed_at).max();
        match (min, max) {
            (Some(a), Some(b)) => b - a,
            _ => Duration::zero(),
        }
    }

    /// Oldest member observation timestamp.
    pub fn oldest_observation(&self) -> DateTime<Utc> {
        self.members
            .iter()
            .map(|m| m.observed_at)
            .min()
            .unwrap_or(self.first_seen)
    }

    pub fn has_new_alert(&self) -> bool {
        self.alerts_emitted.iter().any(|a| a.kind == AlertKind::New)
    }

    /// Confidence-weighted mean of member locations. None when no member
    /// carries coordinates.
    pub fn weighted_centroid(&self) -> Option<GeoPoint> {
        let mut lat_sum = 0.0;
        let mut lon_sum = 0.0;
        let mut weight_sum = 0.0;
        for member in &self.members {
            if let Some(loc) = member.best_location() {
                if let Some(p) = loc.point {
                    let w = loc.confidence.max(0.01);
                    lat_sum += p.lat * w;
                    lon_sum += p.lon * w;
                    weight_sum += w;
                }
            }
        }
        if weight_sum > 0.0 {
            Some(GeoPoint::new(lat_sum / weight_sum, lon_sum / weight_sum))
        } else {
            None
        }
    }

    /// Most common member neighborhood name.
    pub fn majority_label(&self) -> Option<String> {
        let mut counts: Vec<(&str, usize)> = Vec::new();
        for member in &self.members {
            for loc in &member.locations {
                if let Some(name) = loc.name.as_deref() {
                    match counts.iter_mut().find(|(n, _)| *n == name) {
                        Some((_, c)) => *c += 1,
                        None => counts.push((name, 1)),
                    }
                }
            }
        }
        counts
            .iter()
            .max_by_key(|(_, c)| *c)
            .map(|(n, _)| n.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoPoint;

    fn report(source: &str, author: Option<&str>, lat: f64, lon: f64, conf: f64) -> Report {
        let now = Utc::now();
        Report {
            dedup_key: Report::dedup_key_for(source, &format!("{lat}{lon}")),
            source: source.to_string(),
            trust: TrustTier::Normal,
            observed_at: now,
            ingested_at: now,
            content: "test".to_string(),
            author: author.map(|a| a.to_string()),
            url: None,
            coords: None,
            locations: vec![ResolvedLocation {
                name: Some("Whittier".to_string()),
                point: Some(GeoPoint::new(lat, lon)),
                confidence: conf,
            }],
            verdict: Some(Verdict::Relevant),
        }
    }

    #[test]
    fn source_diversity_counts_distinct_sources() {
        let mut cluster = Cluster::from_seed(report("microblog", Some("a"), 44.95, -93.28, 0.9));
        cluster.members.push(report("microblog", Some("b"), 44.95, -93.28, 0.9));
        cluster.members.push(report("photo", Some("c"), 44.95, -93.28, 0.9));
        assert_eq!(cluster.source_diversity(), 2);
    }

    #[test]
    fn weighted_centroid_leans_toward_confident_members() {
        let mut cluster = Cluster::from_seed(report("microblog", None, 44.90, -93.20, 0.9));
        cluster.members.push(report("photo", None, 44.98, -93.28, 0.1));
        let c = cluster.weighted_centroid().unwrap();
        assert!(c.lat < 44.92, "centroid should lean toward the 0.9 member, got {}", c.lat);
    }

    #[test]
    fn contains_observer_matches_source_and_author() {
        let cluster = Cluster::from_seed(report("microblog", Some("ana"), 44.95, -93.28, 0.9));
        assert!(cluster.contains_observer("microblog", Some("ana")));
        assert!(!cluster.contains_observer("microblog", Some("ben")));
        assert!(!cluster.contains_observer("photo", Some("ana")));
    }

    #[test]
    fn dedup_key_joins_source_and_local_id() {
        assert_eq!(Report::dedup_key_for("community", "123"), "community:123");
    }
}
