pub mod bpe;
pub mod cache;
pub mod config;
pub mod context;
pub mod contributor;
pub mod counter;
pub mod enumerator;
pub mod error;
pub mod loader;
pub mod mmap_slice;
pub mod neural;
pub mod ngram;
pub mod predictor;
pub mod search;
pub mod service;
pub mod shutdown;
pub mod vocabulary;

pub use bpe::FastBpe;
pub use config::EngineConfig;
pub use context::{Context, Statistics};
pub use contributor::{Prediction, Source};
pub use error::{Error, Result};
pub use mmap_slice::MmapSlice;
pub use ngram::{NGramModel, NGramModelRunner, NGramTrainer};
pub use predictor::NeuralNamePredictor;
pub use search::{BeamSearchGenerator, CancellationToken};
pub use service::{SuggestionService, VariableKey, VariableRequest};
pub use vocabulary::{MemoryVocabulary, PersistentVocabulary, Vocabulary};

/// End-of-sequence marker of the neural vocabulary; also wraps every assembled context.
pub const EOS_TOKEN: &str = "</s>";
/// Placeholder written at every usage of the variable being named.
pub const VAR_TOKEN: &str = "VAR_0";
pub const NEURAL_UNKNOWN_TOKEN: &str = "<unk>";
/// Index the neural runner pads batches with.
pub const PAD_IDX: usize = 2;
/// Separates names in training targets; never a valid generated token.
pub const SEPARATOR_TOKEN: &str = "|";
