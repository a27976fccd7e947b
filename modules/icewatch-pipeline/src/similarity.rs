//! TF-IDF content similarity over a lazily built vocabulary.
//!
//! Vocabulary statistics grow as reports are observed and are not
//! persisted; scores may shift slightly across restarts but clustering
//! decisions for dissimilar reports are robust to that.

use std::collections::HashMap;

const STOPWORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "been",
    "but", "by", "can", "could", "did", "do", "for", "from", "get", "had", "has", "have", "he",
    "her", "his", "how", "i", "if", "in", "into", "is", "it", "its", "just", "like", "me", "my",
    "no", "not", "now", "of", "on", "one", "or", "our", "out", "over", "she", "so", "some",
    "than", "that", "the", "their", "them", "then", "there", "they", "this", "to", "up", "was",
    "we", "were", "what", "when", "where", "which", "who", "will", "with", "would", "you",
    "your",
];

pub struct SimilarityEngine {
    doc_freq: HashMap<String, usize>,
    doc_count: usize,
}

impl SimilarityEngine {
    pub fn new() -> Self {
        Self {
            doc_freq: HashMap::new(),
            doc_count: 0,
        }
    }

    /// Fold a document's tokens into the vocabulary statistics.
    pub fn observe(&mut self, text: &str) {
        let mut unique = std::collections::HashSet::new();
        for token in tokenize(text) {
            unique.insert(token);
        }
        for token in unique {
            *self.doc_freq.entry(token).or_insert(0) += 1;
        }
        self.doc_count += 1;
    }

    /// Cosine similarity of the two texts' TF-IDF vectors, in [0, 1].
    pub fn cosine(&self, a: &str, b: &str) -> f64 {
        let va = self.vector(a);
        let vb = self.vector(b);
        if va.is_empty() || vb.is_empty() {
            return 0.0;
        }

        let mut dot = 0.0;
        for (token, wa) in &va {
            if let Some(wb) = vb.get(token) {
                dot += wa * wb;
            }
        }
        let norm_a: f64 = va.values().map(|w| w * w).sum::<f64>().sqrt();
        let norm_b: f64 = vb.values().map(|w| w * w).sum::<f64>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }
        dot / (norm_a * norm_b)
    }

    fn vector(&self, text: &str) -> HashMap<String, f64> {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return HashMap::new();
        }

        let mut counts: HashMap<String, f64> = HashMap::new();
        for token in &tokens {
            *counts.entry(token.clone()).or_insert(0.0) += 1.0;
        }

        let total = tokens.len() as f64;
        let n = self.doc_count.max(1) as f64;
        counts
            .into_iter()
            .map(|(token, count)| {
                let df = self.doc_freq.get(&token).copied().unwrap_or(0) as f64;
                let idf = (1.0 + n / (1.0 + df)).ln();
                (token, (count / total) * idf)
            })
            .collect()
    }
}

impl Default for SimilarityEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2 && !STOPWORDS.contains(t))
        .map(|t| t.to_string())
        .collect()
}
