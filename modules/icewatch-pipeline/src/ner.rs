//! Named-entity recognition seam for the location extractor.
//!
//! The extractor only needs candidate place strings; where they come from is
//! pluggable. The default recognizer is a heuristic English model good
//! enough for short community posts. When construction fails the extractor
//! falls back to gazetteer-only matching.

use regex::Regex;

use icewatch_common::IceWatchError;

pub trait EntityRecognizer: Send + Sync {
    fn name(&self) -> &str;

    /// Candidate place strings found in the text, in order of appearance.
    fn entities(&self, text: &str) -> Vec<String>;
}

/// Heuristic recognizer: capitalized spans and street intersections.
pub struct HeuristicRecognizer {
    span_re: Regex,
    intersection_re: Regex,
}

impl HeuristicRecognizer {
    pub fn new() -> Result<Self, IceWatchError> {
        let span_re = Regex::new(r"\b[A-Z][a-z]+(?:[\s\-][A-Z][a-z]+){0,3}\b")
            .map_err(|e| IceWatchError::Extraction(format!("span regex: {e}")))?;
        // "5th and Hennepin", "38th & Chicago"
        let intersection_re =
            Regex::new(r"\b(\d+(?:st|nd|rd|th)?)\s+(?:and|&)\s+([A-Z][A-Za-z]+)\b")
                .map_err(|e| IceWatchError::Extraction(format!("intersection regex: {e}")))?;
        Ok(Self {
            span_re,
            intersection_re,
        })
    }
}

impl EntityRecognizer for HeuristicRecognizer {
    fn name(&self) -> &str {
        "heuristic"
    }

    fn entities(&self, text: &str) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();

        for cap in self.intersection_re.captures_iter(text) {
            let full = cap.get(0).map(|m| m.as_str().to_string());
            let street = cap.get(2).map(|m| m.as_str().to_string());
            for candidate in [full, street].into_iter().flatten() {
                if seen.insert(candidate.to_lowercase()) {
                    out.push(candidate);
                }
            }
        }

        for m in self.span_re.find_iter(text) {
            let candidate = m.as_str();
            if seen.insert(candidate.to_lowercase()) {
                out.push(candidate.to_string());
            }
        }

        out
    }
}
