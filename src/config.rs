use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Settings of the whole engine, loadable from JSON. Missing fields take their defaults.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub ngram: NGramConfig,
    pub search: SearchConfig,
    pub context: ContextConfig,
    pub service: ServiceConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NGramConfig {
    pub order: usize,
    /// Jelinek-Mercer interpolation weight of the longer context.
    pub lambda: f64,
    pub bidirectional: bool,
    /// Softmax temperature applied to candidate log-probabilities.
    pub temperature: f64,
    /// Training tokens seen fewer times than this map to the unknown token.
    pub vocabulary_cutoff: usize,
    /// Successors taken per context length when collecting candidates.
    pub successor_limit: usize,
    /// Names never suggested.
    pub stop_names: Vec<String>,
}

impl Default for NGramConfig {
    fn default() -> Self {
        Self {
            order: 6,
            lambda: 0.5,
            bidirectional: true,
            temperature: 6.0,
            vocabulary_cutoff: 0,
            successor_limit: 100,
            stop_names: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub beam_size: usize,
    /// Maximum number of generated tokens per hypothesis.
    pub max_length: usize,
    pub length_penalty: f32,
    pub repetition_penalty: f32,
    pub early_stopping: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            beam_size: 10,
            max_length: 10,
            length_penalty: 1.0,
            repetition_penalty: 8.0,
            early_stopping: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub max_sequence_length: usize,
    pub left_offset: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_sequence_length: 512,
            left_offset: 100,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Suggestions returned per contributor.
    pub prediction_cutoff: usize,
    pub cache_size: usize,
    pub cache_ttl_secs: u64,
    /// Number of n-gram runners, one per worker thread.
    pub workers: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            prediction_cutoff: 10,
            cache_size: 1024,
            cache_ttl_secs: 600,
            workers: rayon::current_num_threads(),
        }
    }
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::Config(msg.into())
}

impl EngineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let config: EngineConfig = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let ngram = &self.ngram;
        if ngram.order == 0 {
            return Err(invalid("ngram.order must be at least 1"));
        }
        if !(ngram.lambda > 0.0 && ngram.lambda < 1.0) {
            return Err(invalid(format!("ngram.lambda {} not in (0, 1)", ngram.lambda)));
        }
        if !(ngram.temperature > 0.0) {
            return Err(invalid("ngram.temperature must be positive"));
        }
        if ngram.successor_limit == 0 {
            return Err(invalid("ngram.successor_limit must be at least 1"));
        }

        let search = &self.search;
        if search.beam_size == 0 || search.max_length == 0 {
            return Err(invalid("search.beam_size and search.max_length must be at least 1"));
        }
        if !(search.repetition_penalty > 0.0) || !search.length_penalty.is_finite() {
            return Err(invalid(
                "search.repetition_penalty must be positive and search.length_penalty finite",
            ));
        }

        if self.context.max_sequence_length < 3 {
            return Err(invalid("context.max_sequence_length must be at least 3"));
        }

        let service = &self.service;
        if service.prediction_cutoff == 0 || service.cache_size == 0 || service.workers == 0 {
            return Err(invalid(
                "service.prediction_cutoff, service.cache_size and service.workers must be at least 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.ngram.order, 6);
        assert_eq!(config.search.beam_size, 10);
        assert_eq!(config.context.left_offset, 100);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"ngram": {"order": 3}, "search": {"beam_size": 4}}"#).unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.ngram.order, 3);
        assert_eq!(config.ngram.lambda, 0.5);
        assert_eq!(config.search.beam_size, 4);
        assert_eq!(config.search.max_length, 10);
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = EngineConfig::default();
        config.ngram.lambda = 1.0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = EngineConfig::default();
        config.search.beam_size = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.context.max_sequence_length = 2;
        assert!(config.validate().is_err());
    }
}
