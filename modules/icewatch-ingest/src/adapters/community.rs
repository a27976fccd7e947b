//! Community reporting platform adapter.
//!
//! Polls a `since`-cursored JSON report feed. Items carry GeoJSON
//! coordinates, category and status labels, and a free-text location
//! description. High trust: the platform vets its own submissions.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use icewatch_common::{haversine_km, GeoPoint, Report, TrustTier, DOWNTOWN_LAT, DOWNTOWN_LON};

use crate::adapter::{AdapterError, SeenIds, SourceAdapter};

pub const SOURCE_NAME: &str = "community";

const CATEGORY_LABELS: &[&str] = &["Critical", "Active", "Observed", "Other"];
const STATUS_LABELS: &[&str] = &["Unconfirmed", "Confirmed"];

#[derive(Debug, Deserialize)]
struct FeedItem {
    #[serde(default)]
    id: serde_json::Value,
    #[serde(default)]
    location: Option<GeoJsonPoint>,
    #[serde(default)]
    location_description: Option<String>,
    #[serde(default)]
    category_enum: Option<usize>,
    #[serde(default)]
    status: Option<usize>,
    #[serde(default)]
    incident_time: Option<DateTime<Utc>>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct GeoJsonPoint {
    /// GeoJSON order: [lon, lat]
    #[serde(default)]
    coordinates: Vec<f64>,
}

pub struct CommunityAdapter {
    feed_url: String,
    interval: Duration,
    radius_km: f64,
    http: reqwest::Client,
    since: Option<DateTime<Utc>>,
    seen: SeenIds,
}

impl CommunityAdapter {
    pub fn new(feed_url: String, interval_secs: u64, radius_km: f64) -> Self {
        Self {
            feed_url,
            interval: Duration::from_secs(interval_secs),
            radius_km,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(25))
                .build()
                .expect("Failed to build HTTP client"),
            since: None,
            seen: SeenIds::default(),
        }
    }

    fn coords(item: &FeedItem) -> Option<GeoPoint> {
        let c = &item.location.as_ref()?.coordinates;
        if c.len() >= 2 {
            Some(GeoPoint::new(c[1], c[0]))
        } else {
            None
        }
    }

    fn in_region(&self, item: &FeedItem) -> bool {
        if let Some(p) = Self::coords(item) {
            return haversine_km(p.lat, p.lon, DOWNTOWN_LAT, DOWNTOWN_LON) <= self.radius_km;
        }
        // No coordinates: let the description carry it through the filter
        // stage; only obviously empty items are dropped here.
        item.location_description.is_some()
    }
}

#[async_trait]
impl SourceAdapter for CommunityAdapter {
    fn name(&self) -> &'static str {
        SOURCE_NAME
    }

    fn trust(&self) -> TrustTier {
        TrustTier::High
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn poll(&mut self) -> Result<Vec<Report>, AdapterError> {
        let now = Utc::now();
        let since = self
            .since
            .unwrap_or_else(|| now - chrono::Duration::hours(3));

        let url = format!("{}?since={}", self.feed_url, since.format("%Y-%m-%dT%H:%M:%S%.3fZ"));
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(AdapterError::from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AdapterError::from_status(status, SOURCE_NAME));
        }

        let items: Vec<FeedItem> = resp.json().await.map_err(AdapterError::from_reqwest)?;
        let total = items.len();

        let mut reports = Vec::new();
        for item in items {
            if !self.in_region(&item) {
                continue;
            }
            let local_id = match &item.id {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                _ => continue,
            };
            if !self.seen.insert(&local_id) {
                continue;
            }

            let observed_at = item.incident_time.or(item.created_at).unwrap_or(now);
            let category = item
                .category_enum
                .and_then(|i| CATEGORY_LABELS.get(i))
                .unwrap_or(&"Unknown");
            let status_label = item
                .status
                .and_then(|i| STATUS_LABELS.get(i))
                .unwrap_or(&"Unknown");
            let description = item
                .location_description
                .clone()
                .unwrap_or_else(|| "Unknown location".to_string());

            reports.push(Report {
                dedup_key: Report::dedup_key_for(SOURCE_NAME, &local_id),
                source: SOURCE_NAME.to_string(),
                trust: TrustTier::High,
                observed_at,
                ingested_at: now,
                content: format!("[Community {category} report] {description}\nStatus: {status_label}"),
                author: Some(SOURCE_NAME.to_string()),
                url: Some(format!("{}#report-{local_id}", self.feed_url)),
                coords: Self::coords(&item),
                locations: Vec::new(),
                verdict: None,
            });
        }

        self.since = Some(now);
        if reports.is_empty() {
            debug!(total, "Community feed: no new regional reports");
        } else {
            info!(new = reports.len(), total, "Community feed reports collected");
        }
        Ok(reports)
    }
}
