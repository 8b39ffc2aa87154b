mod model;
mod runner;
mod trainer;

pub use crate::ngram::{
    model::{NGramModel, Scorer},
    runner::{ForgetGuard, NGramModelRunner},
    trainer::{NGramTrainer, Phase},
};

/// Stem of the forward counts files in a model directory.
pub const FORWARD_COUNTS: &str = "forward";
/// Stem of the counts trained on reversed token streams.
pub const REVERSE_COUNTS: &str = "reverse";
pub const REMEMBERED_IDENTIFIERS_FILE: &str = "remembered_identifiers.json";
pub const VOCABULARY_FILE: &str = "vocabulary.txt";
