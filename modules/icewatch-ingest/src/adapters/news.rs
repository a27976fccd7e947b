//! News RSS adapter.
//!
//! Plain feed polling via feed-rs. Titles and summaries become report
//! content; the filter stage downstream applies the news-article rejection
//! this source is subject to.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use icewatch_common::{Report, TrustTier};

use crate::adapter::{AdapterError, SeenIds, SourceAdapter};

pub const SOURCE_NAME: &str = "news";

pub struct NewsAdapter {
    feeds: Vec<String>,
    interval: Duration,
    http: reqwest::Client,
    seen: SeenIds,
}

impl NewsAdapter {
    pub fn new(feeds: Vec<String>, interval_secs: u64) -> Self {
        Self {
            feeds,
            interval: Duration::from_secs(interval_secs),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(25))
                .build()
                .expect("Failed to build HTTP client"),
            seen: SeenIds::default(),
        }
    }
}

#[async_trait]
impl SourceAdapter for NewsAdapter {
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

        for feed_url in &self.feeds {
            let resp = self
                .http
                .get(feed_url)
                .header("User-Agent", "icewatch/0.3")
                .send()
                .await
                .map_err(AdapterError::from_reqwest)?;

            let status = resp.status();
            if !status.is_success() {
                return Err(AdapterError::from_status(status, SOURCE_NAME));
            }

            let bytes = resp.bytes().await.map_err(AdapterError::from_reqwest)?;
            let feed = match feed_rs::parser::parse(&bytes[..]) {
                Ok(feed) => feed,
                Err(e) => {
                    // A malformed feed shouldn't take the others down.
                    warn!(feed_url, error = %e, "Unparseable feed, skipping");
                    continue;
                }
            };

            // Oldest first to preserve source chronology.
            let mut entries = feed.entries;
            entries.sort_by_key(|e| e.published.or(e.updated));

            for entry in entries {
                let local_id = if entry.id.is_empty() {
                    match entry.links.first() {
                        Some(link) => link.href.clone(),
                        None => continue,
                    }
                } else {
                    entry.id.clone()
                };
                if !self.seen.insert(&local_id) {
                    continue;
                }

                let title = entry.title.as_ref().map(|t| t.content.clone()).unwrap_or_default();
                let summary = entry
                    .summary
                    .as_ref()
                    .map(|s| s.content.clone())
                    .unwrap_or_default();
                let content = strip_tags(format!("{title}\n{summary}").trim());
                if content.is_empty() {
                    continue;
                }

                let observed_at = entry
                    .published
                    .or(entry.updated)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or(now);

                reports.push(Report {
                    dedup_key: Report::dedup_key_for(SOURCE_NAME, &local_id),
                    source: SOURCE_NAME.to_string(),
                    trust: TrustTier::Normal,
                    observed_at,
                    ingested_at: now,
                    content,
                    author: entry.authors.first().map(|a| a.name.clone()),
                    url: entry.links.first().map(|l| l.href.clone()),
                    coords: None,
                    locations: Vec::new(),
                    verdict: None,
                });
            }
        }

        if reports.is_empty() {
            debug!(feeds = self.feeds.len(), "RSS: nothing new");
        } else {
            info!(new = reports.len(), "RSS entries collected");
        }
        Ok(reports)
    }
}

/// Drop markup and collapse whitespace; feed summaries often carry HTML.
fn strip_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                out.push(' ');
            }
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_stripped_and_whitespace_collapsed() {
        let cleaned = strip_tags("<p>ICE agents <b>reported</b>\n downtown</p>");
        assert_eq!(cleaned, "ICE agents reported downtown");
    }

    #[test]
    fn plain_text_is_untouched() {
        assert_eq!(strip_tags("no markup here"), "no markup here");
    }
}
