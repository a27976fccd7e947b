//! Static place-name index for the Minneapolis metro.
//!
//! Three tiers: neighborhoods and landmarks resolve at high confidence,
//! metro municipalities at city-level confidence. Seeded from the bundled
//! geodata files; read-only after load.

use std::collections::HashMap;

use regex::Regex;
use serde::Deserialize;
use tracing::info;

use icewatch_common::{GeoPoint, IceWatchError};

const NEIGHBORHOODS_JSON: &str = include_str!("../../../geodata/minneapolis_neighborhoods.json");
const LANDMARKS_JSON: &str = include_str!("../../../geodata/landmarks.json");
const CITIES_JSON: &str = include_str!("../../../geodata/cities.json");

/// Broad region references that put a report in scope without naming a
/// specific place.
const REGION_ALIASES: &[&str] = &[
    "twin cities",
    "minnesota",
    "hennepin county",
    "ramsey county",
    "twin cities metro",
];

#[derive(Debug, Deserialize)]
struct RawEntry {
    name: String,
    #[serde(default)]
    aliases: Vec<String>,
    centroid: RawCentroid,
}

#[derive(Debug, Deserialize)]
struct RawCentroid {
    lat: f64,
    lon: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceTier {
    Neighborhood,
    Landmark,
    City,
}

impl PlaceTier {
    /// Extraction confidence for a gazetteer hit at this tier.
    pub fn confidence(&self) -> f64 {
        match self {
            PlaceTier::Neighborhood | PlaceTier::Landmark => 0.9,
            PlaceTier::City => 0.5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Place {
    pub canonical: String,
    pub point: GeoPoint,
    pub tier: PlaceTier,
}

pub struct Gazetteer {
    places: Vec<Place>,
    by_token: HashMap<String, usize>,
    scan_regex: Regex,
    scope_regex: Regex,
}

impl Gazetteer {
    /// Load the geodata bundled into the binary.
    pub fn bundled() -> Result<Self, IceWatchError> {
        Self::from_json(NEIGHBORHOODS_JSON, LANDMARKS_JSON, CITIES_JSON)
    }

    pub fn from_json(
        neighborhoods: &str,
        landmarks: &str,
        cities: &str,
    ) -> Result<Self, IceWatchError> {
        let mut places = Vec::new();
        let mut by_token: HashMap<String, usize> = HashMap::new();

        let mut load = |json: &str, tier: PlaceTier| -> Result<(), IceWatchError> {
            let entries: Vec<RawEntry> = serde_json::from_str(json)
                .map_err(|e| IceWatchError::Config(format!("Invalid gazetteer data: {e}")))?;
            for entry in entries {
                let idx = places.len();
                places.push(Place {
                    canonical: entry.name.clone(),
                    point: GeoPoint::new(entry.centroid.lat, entry.centroid.lon),
                    tier,
                });
                by_token.insert(normalize(&entry.name), idx);
                for alias in &entry.aliases {
                    by_token.insert(normalize(alias), idx);
                }
            }
            Ok(())
        };

        load(neighborhoods, PlaceTier::Neighborhood)?;
        load(landmarks, PlaceTier::Landmark)?;
        load(cities, PlaceTier::City)?;

        let scan_regex = build_token_regex(by_token.keys().map(String::as_str))?;
        let scope_regex = build_token_regex(
            by_token
                .keys()
                .map(String::as_str)
                .chain(REGION_ALIASES.iter().copied()),
        )?;

        info!(places = places.len(), tokens = by_token.len(), "Gazetteer loaded");

        Ok(Self {
            places,
            by_token,
            scan_regex,
            scope_regex,
        })
    }

    /// Look up a single candidate name.
    pub fn lookup(&self, candidate: &str) -> Option<&Place> {
        self.by_token
            .get(&normalize(candidate))
            .map(|&idx| &self.places[idx])
    }

    /// Phrase-match every known place name in free text. Each place is
    /// reported once regardless of how many aliases hit.
    pub fn scan(&self, text: &str) -> Vec<&Place> {
        let mut seen = std::collections::HashSet::new();
        let mut found = Vec::new();
        for m in self.scan_regex.find_iter(text) {
            if let Some(&idx) = self.by_token.get(&normalize(m.as_str())) {
                if seen.insert(idx) {
                    found.push(&self.places[idx]);
                }
            }
        }
        found
    }

    /// True if the text references the metro area at all (place names,
    /// city names, or a broad region alias).
    pub fn mentions_region(&self, text: &str) -> bool {
        self.scope_regex.is_match(text)
    }

    pub fn len(&self) -> usize {
        self.places.len()
    }

    pub fn is_empty(&self) -> bool {
        self.places.is_empty()
    }
}

fn normalize(s: &str) -> String {
    s.to_lowercase()
        .replace('-', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Compile one case-insensitive word-boundary alternation over all tokens.
/// Longest tokens first so multi-word names win over their prefixes;
/// whitespace in a token matches whitespace or hyphens in the text.
fn build_token_regex<'a>(tokens: impl Iterator<Item = &'a str>) -> Result<Regex, IceWatchError> {
    let mut sorted: Vec<&str> = tokens.collect();
    sorted.sort_by_key(|t| std::cmp::Reverse(t.len()));

    let parts: Vec<String> = sorted
        .iter()
        .map(|t| regex::escape(t).replace(r"\ ", r"[\s\-]+"))
        .collect();
    let pattern = format!(r"(?i)\b(?:{})\b", parts.join("|"));
    Regex::new(&pattern)
        .map_err(|e| IceWatchError::Config(format!("Gazetteer regex failed to compile: {e}")))
}
