//! Relevance filtering: freshness, enforcement keywords, geographic scope,
//! and news-article rejection. A pure `Report → Verdict` function; first
//! rejection wins. Dedup happens at the store boundary, not here.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Duration;
use regex::Regex;

use icewatch_common::{haversine_km, Config, GeoPoint, Report, Verdict, DOWNTOWN_LAT, DOWNTOWN_LON};

use crate::gazetteer::Gazetteer;

/// Enforcement-activity keywords, whole-word and case-insensitive.
/// `i.c.e.` is matched without a trailing boundary because the final dot
/// never sits on one.
const KEYWORD_PATTERN: &str = r"(?i)\b(?:ice|ero|cbp|border patrol|raids?|detention|detained|agents?|enforcement|deportation|la migra|immigration)\b|(?i)i\.c\.e\.";

/// Contextual cues required when the only keyword hit is the bare word "ice".
const CUE_PATTERN: &str =
    r"(?i)\b(?:agents?|officers?|raids?|van|vans|vehicles?|checkpoint|detain(?:ed|ing)?|sighting|spotted|enforcement|la migra)\b";

/// Hockey/weather/food contexts that make a bare "ice" hit noise.
const NOISE_PATTERN: &str = r"(?i)\b(?:ice cream|ice fishing|ice skating|icy roads|black ice|ice dam|ice storm|ice hockey|ice rink|dry ice|thin ice|break the ice|ice scraper|ice melt|ice cold|iced coffee|iced tea)\b";

/// Phrases that strongly indicate current, on-the-ground activity.
const REALTIME_PATTERN: &str = r"(?i)\b(?:right now|happening now|happening|currently|on scene|minutes ago|this morning|just saw|just spotted|spotted at|seen at|heads up|confirmed sighting|unconfirmed sighting|avoid the area|stay away from)\b";

/// Retrospective markers: court cases, policy coverage, past events.
const RETRO_PATTERN: &str = r"(?i)\b(?:yesterday|last week|last month|last year|earlier today|court ruling|court order|lawsuit|filed suit|sentenced|convicted|pleaded guilty|indicted|policy|legislation|executive order|announced|press conference|in a statement|according to|officials said|fiscal year|annual report)\b";

pub struct FilterStage {
    fresh_max: Duration,
    max_distance_km: f64,
    downtown: GeoPoint,
    news_sources: HashSet<String>,
    gazetteer: Arc<Gazetteer>,
    keyword_re: Regex,
    cue_re: Regex,
    noise_re: Regex,
    realtime_re: Regex,
    retro_re: Regex,
}

impl FilterStage {
    pub fn new(config: &Config, gazetteer: Arc<Gazetteer>, news_sources: &[&str]) -> Self {
        Self {
            fresh_max: config.fresh_max(),
            max_distance_km: config.max_distance_km,
            downtown: GeoPoint::new(DOWNTOWN_LAT, DOWNTOWN_LON),
            news_sources: news_sources.iter().map(|s| s.to_string()).collect(),
            gazetteer,
            keyword_re: Regex::new(KEYWORD_PATTERN).expect("keyword regex"),
            cue_re: Regex::new(CUE_PATTERN).expect("cue regex"),
            noise_re: Regex::new(NOISE_PATTERN).expect("noise regex"),
            realtime_re: Regex::new(REALTIME_PATTERN).expect("realtime regex"),
            retro_re: Regex::new(RETRO_PATTERN).expect("retrospective regex"),
        }
    }

    /// Classify a report. Stage order is fixed; the first failing stage
    /// decides the verdict.
    pub fn verdict(&self, report: &Report) -> Verdict {
        // 1. Freshness — age exactly at the limit is still acceptable.
        if report.age() > self.fresh_max {
            return Verdict::RejectedStale;
        }

        // 2. Relevance
        if !self.is_relevant(&report.content) {
            return Verdict::RejectedIrrelevant;
        }

        // 3. Geographic scope
        if !self.in_region(report) {
            return Verdict::RejectedOutOfRegion;
        }

        // 4. News-article rejection, news sources only
        if self.news_sources.contains(&report.source) && self.reads_like_news(&report.content) {
            return Verdict::RejectedNews;
        }

        Verdict::Relevant
    }

    fn is_relevant(&self, content: &str) -> bool {
        let matches: Vec<String> = self
            .keyword_re
            .find_iter(content)
            .map(|m| m.as_str().to_lowercase())
            .collect();
        if matches.is_empty() {
            return false;
        }

        // A lone "ice" needs disambiguation: no weather/hockey context and
        // at least one enforcement cue nearby.
        let only_bare_ice = matches.iter().all(|m| m == "ice");
        if only_bare_ice {
            if self.noise_re.is_match(content) {
                return false;
            }
            if !self.cue_re.is_match(content) {
                return false;
            }
        }

        true
    }

    fn in_region(&self, report: &Report) -> bool {
        if self.gazetteer.mentions_region(&report.content) {
            return true;
        }
        if let Some(coords) = report.coords {
            let dist = haversine_km(coords.lat, coords.lon, self.downtown.lat, self.downtown.lon);
            // Boundary inclusive
            return dist <= self.max_distance_km;
        }
        false
    }

    fn reads_like_news(&self, content: &str) -> bool {
        if self.retro_re.is_match(content) {
            return true;
        }
        !self.realtime_re.is_match(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use icewatch_common::TrustTier;

    fn stage() -> FilterStage {
        let config = test_config();
        FilterStage::new(&config, Arc::new(Gazetteer::bundled().unwrap()), &["news"])
    }

    fn test_config() -> Config {
        // Defaults only; no env reads in tests.
        Config {
            webhook_url: String::new(),
            db_path: ":memory:".to_string(),
            max_distance_km: 50.0,
            min_corroboration_sources: 2,
            cluster_expiry_hours: 6.0,
            fresh_max_hours: 3.0,
            temporal_window_hours: 2.0,
            geo_window_km: 3.0,
            sim_threshold: 0.25,
            queue_capacity: 1024,
            dry_run: true,
            log_level: "INFO".to_string(),
            adapters: test_adapters(),
        }
    }

    fn test_adapters() -> icewatch_common::AdapterConfig {
        icewatch_common::AdapterConfig {
            community: icewatch_common::SourceSettings { enabled: false, interval_secs: 90 },
            community_feed_url: String::new(),
            microblog: icewatch_common::SourceSettings { enabled: false, interval_secs: 120 },
            microblog_search_url: String::new(),
            microblog_queries: vec![],
            photo: icewatch_common::SourceSettings { enabled: false, interval_secs: 300 },
            photo_base_url: String::new(),
            photo_accounts: vec![],
            smsmap: icewatch_common::SourceSettings { enabled: false, interval_secs: 1800 },
            smsmap_url: String::new(),
            news: icewatch_common::SourceSettings { enabled: false, interval_secs: 300 },
            rss_feeds: vec![],
        }
    }

    fn report(source: &str, content: &str, age_minutes: i64) -> Report {
        let now = Utc::now();
        Report {
            dedup_key: format!("{source}:test"),
            source: source.to_string(),
            trust: TrustTier::Normal,
            observed_at: now - Duration::minutes(age_minutes),
            ingested_at: now,
            content: content.to_string(),
            author: None,
            url: None,
            coords: None,
            locations: vec![],
            verdict: None,
        }
    }

    #[test]
    fn realtime_sighting_is_relevant() {
        let v = stage().verdict(&report(
            "microblog",
            "ICE agents at 5th and Hennepin in downtown Minneapolis right now",
            10,
        ));
        assert_eq!(v, Verdict::Relevant);
    }

    #[test]
    fn stale_report_rejected_strictly_past_the_limit() {
        let s = stage();
        let at_limit = report("microblog", "ICE raid reported in Uptown", 180);
        assert_eq!(s.verdict(&at_limit), Verdict::Relevant);

        let past_limit = report("microblog", "ICE raid reported in Uptown", 181);
        assert_eq!(s.verdict(&past_limit), Verdict::RejectedStale);
    }

    #[test]
    fn hockey_ice_is_noise() {
        let v = stage().verdict(&report(
            "microblog",
            "great ice hockey game in Minneapolis tonight, the ice was perfect",
            10,
        ));
        assert_eq!(v, Verdict::RejectedIrrelevant);
    }

    #[test]
    fn bare_ice_without_cue_is_irrelevant() {
        let v = stage().verdict(&report(
            "microblog",
            "the ice on lake street is melting fast this spring",
            10,
        ));
        assert_eq!(v, Verdict::RejectedIrrelevant);
    }

    #[test]
    fn bare_ice_with_cue_passes() {
        let v = stage().verdict(&report(
            "microblog",
            "ice vans spotted near Powderhorn Park, heads up",
            10,
        ));
        assert_eq!(v, Verdict::Relevant);
    }

    #[test]
    fn no_keywords_is_irrelevant() {
        let v = stage().verdict(&report(
            "microblog",
            "traffic is terrible on Hennepin Avenue today",
            10,
        ));
        assert_eq!(v, Verdict::RejectedIrrelevant);
    }

    #[test]
    fn out_of_region_coords_rejected() {
        // St. Louis, MO
        let mut r = report("microblog", "ICE agents spotted at a checkpoint right now", 10);
        r.coords = Some(GeoPoint::new(38.6270, -90.1994));
        assert_eq!(stage().verdict(&r), Verdict::RejectedOutOfRegion);
    }

    #[test]
    fn coords_exactly_at_radius_are_in_scope() {
        // 50.0 km due south of downtown (1° latitude = 111.195 km)
        let mut r = report("microblog", "ICE agents spotted at a checkpoint right now", 10);
        r.coords = Some(GeoPoint::new(DOWNTOWN_LAT - 50.0 / 111.195, DOWNTOWN_LON));
        assert_eq!(stage().verdict(&r), Verdict::Relevant);
    }

    #[test]
    fn retrospective_news_rejected() {
        let v = stage().verdict(&report(
            "news",
            "ICE raids in Minneapolis last year drew protests",
            10,
        ));
        assert_eq!(v, Verdict::RejectedNews);
    }

    #[test]
    fn news_without_realtime_signal_rejected() {
        let v = stage().verdict(&report(
            "news",
            "ICE enforcement operations continue across Minneapolis",
            10,
        ));
        assert_eq!(v, Verdict::RejectedNews);
    }

    #[test]
    fn news_with_realtime_signal_passes() {
        let v = stage().verdict(&report(
            "news",
            "ICE agents are on scene at a Lake Street business in Minneapolis",
            10,
        ));
        assert_eq!(v, Verdict::Relevant);
    }

    #[test]
    fn community_sources_skip_news_rejection() {
        let v = stage().verdict(&report(
            "microblog",
            "ICE enforcement reported near Cedar-Riverside",
            10,
        ));
        assert_eq!(v, Verdict::Relevant);
    }
}
