use std::env;
use std::path::Path;

use chrono::Duration;

use crate::error::IceWatchError;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Chat webhook endpoint. Required unless running with `dry_run`.
    pub webhook_url: String,
    pub db_path: String,

    // Geographic scope
    pub max_distance_km: f64,

    // Correlation tuning
    pub min_corroboration_sources: usize,
    pub cluster_expiry_hours: f64,
    pub fresh_max_hours: f64,
    pub temporal_window_hours: f64,
    pub geo_window_km: f64,
    pub sim_threshold: f64,

    // Pipeline
    pub queue_capacity: usize,

    pub dry_run: bool,
    pub log_level: String,

    pub adapters: AdapterConfig,
}

/// Per-source enablement and cadence.
#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub enabled: bool,
    pub interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub community: SourceSettings,
    pub community_feed_url: String,

    pub microblog: SourceSettings,
    pub microblog_search_url: String,
    pub microblog_queries: Vec<String>,

    pub photo: SourceSettings,
    pub photo_base_url: String,
    pub photo_accounts: Vec<String>,

    pub smsmap: SourceSettings,
    pub smsmap_url: String,

    pub news: SourceSettings,
    pub rss_feeds: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, IceWatchError> {
        let dry_run = get_bool("DRY_RUN", false);
        let webhook_url = env::var("WEBHOOK_URL").unwrap_or_default();
        if webhook_url.is_empty() && !dry_run {
            return Err(IceWatchError::Config(
                "WEBHOOK_URL is required unless DRY_RUN is set".to_string(),
            ));
        }

        Ok(Self {
            webhook_url,
            db_path: env::var("DB_PATH").unwrap_or_else(|_| "icewatch.db".to_string()),
            max_distance_km: get_f64("MAX_DISTANCE_KM", 50.0)?,
            min_corroboration_sources: get_usize("MIN_CORROBORATION_SOURCES", 2)?,
            cluster_expiry_hours: get_f64("CLUSTER_EXPIRY_HOURS", 6.0)?,
            fresh_max_hours: get_f64("FRESH_MAX_HOURS", 3.0)?,
            temporal_window_hours: get_f64("TEMPORAL_WINDOW_HOURS", 2.0)?,
            geo_window_km: get_f64("GEO_WINDOW_KM", 3.0)?,
            sim_threshold: get_f64("SIM_THRESHOLD", 0.25)?,
            queue_capacity: get_usize("PIPELINE_QUEUE_CAPACITY", 1024)?,
            dry_run,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            adapters: AdapterConfig::from_env()?,
        })
    }

    pub fn fresh_max(&self) -> Duration {
        hours(self.fresh_max_hours)
    }

    pub fn temporal_window(&self) -> Duration {
        hours(self.temporal_window_hours)
    }

    pub fn cluster_expiry(&self) -> Duration {
        hours(self.cluster_expiry_hours)
    }

    /// Log the effective tuning values once at startup.
    pub fn log_summary(&self) {
        tracing::info!(
            max_distance_km = self.max_distance_km,
            geo_window_km = self.geo_window_km,
            temporal_window_hours = self.temporal_window_hours,
            cluster_expiry_hours = self.cluster_expiry_hours,
            fresh_max_hours = self.fresh_max_hours,
            sim_threshold = self.sim_threshold,
            min_corroboration_sources = self.min_corroboration_sources,
            dry_run = self.dry_run,
            "Configuration loaded"
        );
    }
}

impl AdapterConfig {
    fn from_env() -> Result<Self, IceWatchError> {
        Ok(Self {
            community: SourceSettings {
                enabled: get_bool("COMMUNITY_ENABLED", true),
                interval_secs: get_u64("COMMUNITY_POLL_INTERVAL", 90)?,
            },
            community_feed_url: env::var("COMMUNITY_FEED_URL")
                .unwrap_or_else(|_| "https://iceout.org/api/report-feed".to_string()),

            microblog: SourceSettings {
                enabled: get_bool("MICROBLOG_ENABLED", true),
                interval_secs: get_u64("MICROBLOG_POLL_INTERVAL", 120)?,
            },
            microblog_search_url: env::var("MICROBLOG_SEARCH_URL").unwrap_or_else(|_| {
                "https://public.api.bsky.app/xrpc/app.bsky.feed.searchPosts".to_string()
            }),
            microblog_queries: get_list("MICROBLOG_QUERIES", &["ice minneapolis", "ice twin cities"]),

            photo: SourceSettings {
                enabled: get_bool("PHOTO_ENABLED", false),
                interval_secs: get_u64("PHOTO_POLL_INTERVAL", 300)?,
            },
            photo_base_url: env::var("PHOTO_BASE_URL").unwrap_or_default(),
            photo_accounts: get_list("PHOTO_ACCOUNTS", &[]),

            smsmap: SourceSettings {
                enabled: get_bool("SMSMAP_ENABLED", true),
                interval_secs: get_u64("SMSMAP_POLL_INTERVAL", 1800)?,
            },
            smsmap_url: env::var("SMSMAP_URL")
                .unwrap_or_else(|_| "https://stopice.net/login/".to_string()),

            news: SourceSettings {
                enabled: get_bool("NEWS_ENABLED", true),
                interval_secs: get_u64("NEWS_POLL_INTERVAL", 300)?,
            },
            rss_feeds: get_list("RSS_FEEDS", &[]),
        })
    }
}

/// Apply a KEY=VALUE file to the process environment. Existing variables win.
pub fn apply_env_file(path: &Path) -> Result<(), IceWatchError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| IceWatchError::Config(format!("Cannot read config file {path:?}: {e}")))?;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            if env::var(key.trim()).is_err() {
                env::set_var(key.trim(), value.trim());
            }
        }
    }
    Ok(())
}

fn hours(h: f64) -> Duration {
    Duration::seconds((h * 3600.0).round() as i64)
}

fn get_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"),
        Err(_) => default,
    }
}

fn get_f64(key: &str, default: f64) -> Result<f64, IceWatchError> {
    match env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|_| IceWatchError::Config(format!("{key} must be a number, got {v:?}"))),
        Err(_) => Ok(default),
    }
}

fn get_u64(key: &str, default: u64) -> Result<u64, IceWatchError> {
    match env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|_| IceWatchError::Config(format!("{key} must be an integer, got {v:?}"))),
        Err(_) => Ok(default),
    }
}

fn get_usize(key: &str, default: usize) -> Result<usize, IceWatchError> {
    match env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|_| IceWatchError::Config(format!("{key} must be an integer, got {v:?}"))),
        Err(_) => Ok(default),
    }
}

fn get_list(key: &str, default: &[&str]) -> Vec<String> {
    match env::var(key) {
        Ok(v) => v
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(_) => default.iter().map(|s| s.to_string()).collect(),
    }
}
