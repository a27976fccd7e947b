//! Rendering a cluster into a deliverable alert.

use icewatch_common::{AlertKind, Cluster};

// Embed colors, by kind and confidence band.
const COLOR_NEW_HIGH: u32 = 0xFF0000;
const COLOR_NEW_MEDIUM: u32 = 0xFF4500;
const COLOR_NEW_LOW: u32 = 0xFF8C00;
const COLOR_UPDATE: u32 = 0x3498DB;

const EXCERPT_MAX_CHARS: usize = 120;
const NEW_EXCERPT_LIMIT: usize = 6;
const UPDATE_EXCERPT_LIMIT: usize = 4;

const FALLBACK_LOCATION: &str = "Minneapolis area";

#[derive(Debug, Clone)]
pub struct Excerpt {
    pub source: String,
    pub author: Option<String>,
    pub text: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AlertPayload {
    /// `{cluster_id}/{sequence}` — stable across retries of one emission.
    pub idempotency_key: String,
    pub kind: AlertKind,
    pub title: String,
    pub summary: String,
    pub excerpts: Vec<Excerpt>,
    pub confidence: f64,
    pub color: u32,
}

pub fn build_payload(cluster: &Cluster, kind: AlertKind, sequence: usize) -> AlertPayload {
    let location = cluster
        .label
        .clone()
        .unwrap_or_else(|| FALLBACK_LOCATION.to_string());

    let band = confidence_band(cluster.confidence);
    let sources: Vec<String> = cluster
        .source_set()
        .into_iter()
        .map(|s| s.to_string())
        .collect();

    let (title, summary, excerpt_limit, color) = match kind {
        AlertKind::New => (
            format!("ICE ACTIVITY: {location}"),
            format!(
                "**{band} confidence** | {} report(s) across {}\nFirst observed: {}",
                cluster.members.len(),
                sources.join(", "),
                cluster.oldest_observation().format("%H:%M UTC"),
            ),
            NEW_EXCERPT_LIMIT,
            new_color(cluster.confidence),
        ),
        AlertKind::Update => (
            format!("UPDATE: {location}"),
            format!(
                "Additional reporting on an earlier incident\nNow at **{band}** confidence | {} total report(s)",
                cluster.members.len(),
            ),
            UPDATE_EXCERPT_LIMIT,
            COLOR_UPDATE,
        ),
    };

    // NEW shows the whole cluster; UPDATE only the most recent arrivals.
    let members: Vec<_> = match kind {
        AlertKind::New => cluster.members.iter().take(excerpt_limit).collect(),
        AlertKind::Update => cluster
            .members
            .iter()
            .rev()
            .take(excerpt_limit)
            .rev()
            .collect(),
    };

    let excerpts = members
        .into_iter()
        .map(|m| Excerpt {
            source: m.source.clone(),
            author: m.author.clone(),
            text: truncate(&m.content),
            url: m.url.clone(),
        })
        .collect();

    AlertPayload {
        idempotency_key: format!("{}/{}", cluster.id, sequence),
        kind,
        title,
        summary,
        excerpts,
        confidence: cluster.confidence,
        color,
    }
}

fn confidence_band(score: f64) -> &'static str {
    if score >= 0.7 {
        "HIGH"
    } else if score >= 0.45 {
        "MEDIUM"
    } else {
        "LOW"
    }
}

fn new_color(score: f64) -> u32 {
    if score >= 0.7 {
        COLOR_NEW_HIGH
    } else if score >= 0.45 {
        COLOR_NEW_MEDIUM
    } else {
        COLOR_NEW_LOW
    }
}

fn truncate(text: &str) -> String {
    let flat = text.replace('\n', " ");
    let trimmed = flat.trim();
    if trimmed.chars().count() <= EXCERPT_MAX_CHARS {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(EXCERPT_MAX_CHARS).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use icewatch_common::{Report, TrustTier};

    fn member(source: &str, content: &str) -> Report {
        let now = Utc::now();
        Report {
            dedup_key: format!("{source}:{content}"),
            source: source.to_string(),
            trust: TrustTier::Normal,
            observed_at: now,
            ingested_at: now,
            content: content.to_string(),
            author: Some("observer".to_string()),
            url: None,
            coords: None,
            locations: vec![],
            verdict: None,
        }
    }

    #[test]
    fn idempotency_key_is_cluster_and_sequence() {
        let cluster = Cluster::from_seed(member("community", "ICE at Lake Street"));
        let payload = build_payload(&cluster, AlertKind::New, 0);
        assert_eq!(payload.idempotency_key, format!("{}/0", cluster.id));
    }

    #[test]
    fn new_alert_titles_use_location_label() {
        let mut cluster = Cluster::from_seed(member("community", "ICE at Lake Street"));
        cluster.label = Some("Whittier".to_string());
        let payload = build_payload(&cluster, AlertKind::New, 0);
        assert_eq!(payload.title, "ICE ACTIVITY: Whittier");
    }

    #[test]
    fn missing_label_falls_back_to_area() {
        let cluster = Cluster::from_seed(member("community", "ICE sighting"));
        let payload = build_payload(&cluster, AlertKind::New, 0);
        assert_eq!(payload.title, format!("ICE ACTIVITY: {FALLBACK_LOCATION}"));
    }

    #[test]
    fn update_excerpts_show_latest_members() {
        let mut cluster = Cluster::from_seed(member("microblog", "first"));
        for i in 0..6 {
            cluster.members.push(member("photo", &format!("report {i}")));
        }
        let payload = build_payload(&cluster, AlertKind::Update, 1);
        assert_eq!(payload.excerpts.len(), UPDATE_EXCERPT_LIMIT);
        assert_eq!(payload.excerpts.last().unwrap().text, "report 5");
    }

    #[test]
    fn long_content_is_truncated() {
        let long = "x".repeat(400);
        let cluster = Cluster::from_seed(member("microblog", &long));
        let payload = build_payload(&cluster, AlertKind::New, 0);
        assert!(payload.excerpts[0].text.len() <= EXCERPT_MAX_CHARS + 3);
        assert!(payload.excerpts[0].text.ends_with("..."));
    }
}
