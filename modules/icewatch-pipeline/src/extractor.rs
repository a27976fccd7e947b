//! Resolves report text (and any source-carried coordinates) into scored
//! location entries for the correlator.

use std::sync::Arc;

use tracing::{info, warn};

use icewatch_common::{Report, ResolvedLocation};

use crate::gazetteer::Gazetteer;
use crate::ner::EntityRecognizer;

pub struct LocationExtractor {
    gazetteer: Arc<Gazetteer>,
    recognizer: Option<Box<dyn EntityRecognizer>>,
}

impl LocationExtractor {
    pub fn new(gazetteer: Arc<Gazetteer>, recognizer: Option<Box<dyn EntityRecognizer>>) -> Self {
        match &recognizer {
            Some(r) => info!(recognizer = r.name(), "Location extractor ready"),
            None => warn!("Entity recognizer unavailable — running gazetteer-only"),
        }
        Self {
            gazetteer,
            recognizer,
        }
    }

    /// Populate `report.locations`. Source-carried coordinates come first at
    /// full confidence, then gazetteer phrase hits, then recognizer
    /// candidates resolved through the gazetteer tiers.
    pub fn extract(&self, report: &mut Report) {
        let mut locations: Vec<ResolvedLocation> = Vec::new();
        let mut seen = std::collections::HashSet::new();

        if let Some(coords) = report.coords {
            locations.push(ResolvedLocation {
                name: None,
                point: Some(coords),
                confidence: 1.0,
            });
        }

        for place in self.gazetteer.scan(&report.content) {
            if seen.insert(place.canonical.to_lowercase()) {
                locations.push(ResolvedLocation {
                    name: Some(place.canonical.clone()),
                    point: Some(place.point),
                    confidence: place.tier.confidence(),
                });
            }
        }

        if let Some(recognizer) = &self.recognizer {
            for candidate in recognizer.entities(&report.content) {
                if let Some(place) = self.gazetteer.lookup(&candidate) {
                    if seen.insert(place.canonical.to_lowercase()) {
                        locations.push(ResolvedLocation {
                            name: Some(place.canonical.clone()),
                            point: Some(place.point),
                            confidence: place.tier.confidence(),
                        });
                    }
                }
            }
        }

        report.locations = locations;
    }
}
