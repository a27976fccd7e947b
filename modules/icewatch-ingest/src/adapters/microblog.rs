//! Microblog firehose adapter.
//!
//! Runs configured search queries against a public post-search API and
//! emits matching posts. Normal trust; corroboration gates its alerts.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use icewatch_common::{Report, TrustTier};

use crate::adapter::{AdapterError, SeenIds, SourceAdapter};

pub const SOURCE_NAME: &str = "microblog";

const RESULTS_PER_QUERY: u32 = 25;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    posts: Vec<Post>,
}

#[derive(Debug, Deserialize)]
struct Post {
    uri: String,
    author: Author,
    record: PostRecord,
}

#[derive(Debug, Deserialize)]
struct Author {
    handle: String,
}

#[derive(Debug, Deserialize)]
struct PostRecord {
    #[serde(default)]
    text: String,
    #[serde(rename = "createdAt")]
    created_at: Option<DateTime<Utc>>,
}

pub struct MicroblogAdapter {
    search_url: String,
    queries: Vec<String>,
    interval: Duration,
    http: reqwest::Client,
    seen: SeenIds,
}

impl MicroblogAdapter {
    pub fn new(search_url: String, queries: Vec<String>, interval_secs: u64) -> Self {
        Self {
            search_url,
            queries,
            interval: Duration::from_secs(interval_secs),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(25))
                .build()
                .expect("Failed to build HTTP client"),
            seen: SeenIds::default(),
        }
    }

    /// Turn an AT-protocol post URI into a web link when it has the usual
    /// shape, otherwise pass the URI through.
    fn web_url(uri: &str, handle: &str) -> String {
        match uri.rsplit('/').next() {
            Some(rkey) if uri.starts_with("at://") => {
                format!("https://bsky.app/profile/{handle}/post/{rkey}")
            }
            _ => uri.to_string(),
        }
    }
}

#[async_trait]
impl SourceAdapter for MicroblogAdapter {
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
        let mut reports = Vec::new();

        for query in &self.queries {
            let resp = self
                .http
                .get(&self.search_url)
                .query(&[("q", query.as_str()), ("limit", &RESULTS_PER_QUERY.to_string())])
                .send()
                .await
                .map_err(AdapterError::from_reqwest)?;

            let status = resp.status();
            if !status.is_success() {
                return Err(AdapterError::from_status(status, SOURCE_NAME));
            }

            let data: SearchResponse = resp.json().await.map_err(AdapterError::from_reqwest)?;

            // Oldest first so arrival order tracks source chronology.
            let mut posts = data.posts;
            posts.sort_by_key(|p| p.record.created_at);

            for post in posts {
                if !self.seen.insert(&post.uri) {
                    continue;
                }
                if post.record.text.is_empty() {
                    continue;
                }
                let observed_at = post.record.created_at.unwrap_or(now);
                reports.push(Report {
                    dedup_key: Report::dedup_key_for(SOURCE_NAME, &post.uri),
                    source: SOURCE_NAME.to_string(),
                    trust: TrustTier::Normal,
                    observed_at,
                    ingested_at: now,
                    content: post.record.text.clone(),
                    author: Some(post.author.handle.clone()),
                    url: Some(Self::web_url(&post.uri, &post.author.handle)),
                    coords: None,
                    locations: Vec::new(),
                    verdict: None,
                });
            }
        }

        if reports.is_empty() {
            debug!(queries = self.queries.len(), "Microblog search: nothing new");
        } else {
            info!(new = reports.len(), "Microblog posts collected");
        }
        Ok(reports)
    }
}
