//! SMS-driven web map adapter.
//!
//! The upstream publishes sighting markers as a loose XML-ish document of
//! `<map_data>` blocks. Marker timestamps are US Central wall-clock time;
//! they are shifted to UTC on ingest. High trust, slow cadence — the feed
//! updates nightly.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use tracing::{debug, info};

use icewatch_common::{GeoPoint, Report, TrustTier};

use crate::adapter::{AdapterError, SeenIds, SourceAdapter};

pub const SOURCE_NAME: &str = "smsmap";

/// Central wall-clock to UTC. The upstream does not mark DST; the fixed
/// standard-time offset matches its published data.
const CENTRAL_UTC_OFFSET_HOURS: i64 = 6;

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %I:%M %p",
];

#[derive(Debug, Default)]
struct Marker {
    id: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    location: Option<String>,
    timestamp: Option<String>,
    comments: Option<String>,
    priority: Option<String>,
}

pub struct SmsMapAdapter {
    url: String,
    interval: Duration,
    http: reqwest::Client,
    seen: SeenIds,
    tag_re: Regex,
}

impl SmsMapAdapter {
    pub fn new(url: String, interval_secs: u64) -> Self {
        Self {
            url,
            interval: Duration::from_secs(interval_secs),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(25))
                .build()
                .expect("Failed to build HTTP client"),
            seen: SeenIds::default(),
            tag_re: Regex::new(r"(?is)<(id|lat|long|location|timestamp|comments|thispriority)>\s*([^<]*)")
                .expect("marker tag regex"),
        }
    }

    fn parse_markers(&self, body: &str) -> Vec<Marker> {
        body.split("</map_data>")
            .filter(|segment| segment.contains('<'))
            .map(|segment| {
                let mut marker = Marker::default();
                for cap in self.tag_re.captures_iter(segment) {
                    let value = cap[2].trim().to_string();
                    if value.is_empty() {
                        continue;
                    }
                    match cap[1].to_lowercase().as_str() {
                        "id" => marker.id = Some(value),
                        "lat" => marker.lat = value.parse().ok(),
                        "long" => marker.lon = value.parse().ok(),
                        "location" => marker.location = Some(value),
                        "timestamp" => marker.timestamp = Some(value),
                        "comments" => marker.comments = Some(value),
                        "thispriority" => marker.priority = Some(value),
                        _ => {}
                    }
                }
                marker
            })
            .filter(|m| m.id.is_some() || (m.lat.is_some() && m.lon.is_some()))
            .collect()
    }

    fn parse_timestamp(raw: &str, fallback: DateTime<Utc>) -> DateTime<Utc> {
        for format in TIMESTAMP_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
                return naive.and_utc() + chrono::Duration::hours(CENTRAL_UTC_OFFSET_HOURS);
            }
        }
        fallback
    }
}

#[async_trait]
impl SourceAdapter for SmsMapAdapter {
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

        let resp = self
            .http
            .get(&self.url)
            .query(&[("recentmapdata", "1"), ("duration", "today")])
            .send()
            .await
            .map_err(AdapterError::from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AdapterError::from_status(status, SOURCE_NAME));
        }

        let body = resp.text().await.map_err(AdapterError::from_reqwest)?;
        let markers = self.parse_markers(&body);
        let total = markers.len();

        let mut reports = Vec::new();
        for marker in markers {
            let coords = match (marker.lat, marker.lon) {
                (Some(lat), Some(lon)) => Some(GeoPoint::new(lat, lon)),
                _ => None,
            };
            let local_id = marker.id.clone().unwrap_or_else(|| {
                format!(
                    "{}_{}_{}",
                    marker.lat.unwrap_or_default(),
                    marker.lon.unwrap_or_default(),
                    marker.timestamp.as_deref().unwrap_or("unknown")
                )
            });
            if !self.seen.insert(&local_id) {
                continue;
            }

            let observed_at = marker
                .timestamp
                .as_deref()
                .map(|raw| Self::parse_timestamp(raw, now))
                .unwrap_or(now);

            let mut content = String::from("[SMS map alert] ");
            if let Some(priority) = &marker.priority {
                content.push_str(&format!("[{}] ", priority.to_uppercase()));
            }
            content.push_str(marker.location.as_deref().unwrap_or("Unknown location"));
            if let Some(comments) = &marker.comments {
                content.push('\n');
                content.push_str(comments);
            }

            reports.push(Report {
                dedup_key: Report::dedup_key_for(SOURCE_NAME, &local_id),
                source: SOURCE_NAME.to_string(),
                trust: TrustTier::High,
                observed_at,
                ingested_at: now,
                content,
                author: Some(SOURCE_NAME.to_string()),
                url: Some(self.url.clone()),
                coords,
                locations: Vec::new(),
                verdict: None,
            });
        }

        if reports.is_empty() {
            debug!(total, "SMS map: no new markers");
        } else {
            info!(new = reports.len(), total, "SMS map markers collected");
        }
        Ok(reports)
    }
}
