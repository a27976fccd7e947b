//! Photo platform adapter.
//!
//! Monitors configured public accounts for caption text via a JSON media
//! endpoint. Accounts with no observations in 90 days are skipped to cut
//! noise (policy, not an invariant).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use icewatch_common::{Report, TrustTier};

use crate::adapter::{AdapterError, SeenIds, SourceAdapter};

pub const SOURCE_NAME: &str = "photo";

const SILENT_ACCOUNT_DAYS: i64 = 90;

#[derive(Debug, Deserialize)]
struct MediaItem {
    id: String,
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    taken_at: Option<DateTime<Utc>>,
    #[serde(default)]
    url: Option<String>,
}

pub struct PhotoAdapter {
    base_url: String,
    accounts: Vec<String>,
    interval: Duration,
    http: reqwest::Client,
    seen: SeenIds,
    /// Newest post timestamp per account, for the silent-account skip.
    last_post: HashMap<String, DateTime<Utc>>,
    silent: HashMap<String, bool>,
}

impl PhotoAdapter {
    pub fn new(base_url: String, accounts: Vec<String>, interval_secs: u64) -> Self {
        Self {
            base_url,
            accounts,
            interval: Duration::from_secs(interval_secs),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(25))
                .build()
                .expect("Failed to build HTTP client"),
            seen: SeenIds::default(),
            last_post: HashMap::new(),
            silent: HashMap::new(),
        }
    }
}

#[async_trait]
impl SourceAdapter for PhotoAdapter {
    fn name(&self) -> &'static str {
        SOURCE_NAME
    }

    fn trust(&self) -> TrustTier {
        TrustTier::Normal
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn poll(&mut self) -> Result<Vec<Report>, AdapterError> {
        let now = Utc::now();
        let silent_cutoff = now - chrono::Duration::days(SILENT_ACCOUNT_DAYS);
        let mut reports = Vec::new();

        let accounts = self.accounts.clone();
        for account in &accounts {
            if *self.silent.get(account).unwrap_or(&false) {
                continue;
            }

            let url = format!("{}/{}/media.json", self.base_url, account);
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

            let items: Vec<MediaItem> = resp.json().await.map_err(AdapterError::from_reqwest)?;

            let newest = items.iter().filter_map(|i| i.taken_at).max();
            if let Some(ts) = newest {
                self.last_post.insert(account.clone(), ts);
            }
            let latest = self.last_post.get(account).copied().or(newest);
            match latest {
                Some(ts) if ts >= silent_cutoff => {}
                _ => {
                    info!(account, "Photo account silent for 90d, skipping until restart");
                    self.silent.insert(account.clone(), true);
                    continue;
                }
            }

            for item in items {
                let Some(caption) = item.caption.filter(|c| !c.is_empty()) else {
                    continue;
                };
                let local_id = format!("{account}:{}", item.id);
                if !self.seen.insert(&local_id) {
                    continue;
                }
                reports.push(Report {
                    dedup_key: Report::dedup_key_for(SOURCE_NAME, &local_id),
                    source: SOURCE_NAME.to_string(),
                    trust: TrustTier::Normal,
                    observed_at: item.taken_at.unwrap_or(now),
                    ingested_at: now,
                    content: caption,
                    author: Some(account.clone()),
                    url: item.url,
                    coords: None,
                    locations: Vec::new(),
                    verdict: None,
                });
            }
        }

        if reports.is_empty() {
            debug!(accounts = self.accounts.len(), "Photo accounts: nothing new");
        } else {
            info!(new = reports.len(), "Photo captions collected");
        }
        Ok(reports)
    }
}
