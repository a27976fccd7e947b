pub mod correlator;
pub mod extractor;
pub mod filter;
pub mod gazetteer;
pub mod ner;
pub mod pipeline;
pub mod similarity;

pub use correlator::{confidence, Correlator, CorrelatorConfig, Emission};
pub use extractor::LocationExtractor;
pub use filter::FilterStage;
pub use gazetteer::{Gazetteer, Place, PlaceTier};
pub use ner::{EntityRecognizer, HeuristicRecognizer};
pub use pipeline::Pipeline;
pub use similarity::SimilarityEngine;
