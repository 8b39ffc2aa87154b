use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::error::Result;
use crate::ngram::NGramModelRunner;
use crate::predictor::NeuralNamePredictor;
use crate::search::CancellationToken;

pub const NGRAM_PRIORITY: usize = 1;
pub const NEURAL_PRIORITY: usize = 1;

/// Which model proposed a name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    NGram,
    Neural,
    /// Proposed by more than one kind of model.
    Both,
}

/// A candidate name with its probability and the weight of the model that proposed it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub name: String,
    pub probability: f64,
    pub priority: usize,
    pub source: Source,
}

/// Probability a model gives to the name a variable already has.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NameProbability {
    pub probability: f64,
    pub log_probability: f64,
    pub priority: usize,
}

/// Predictions of one contributor. `priority` weighs them in [`merge_predictions`]; a
/// contributor that did not run has priority 0.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Contribution {
    pub predictions: Vec<Prediction>,
    pub priority: usize,
}

/// The models that can propose names for a variable.
pub enum Contributor<'a> {
    NGram(&'a NGramModelRunner),
    Neural {
        predictor: &'a NeuralNamePredictor,
        cancel: &'a CancellationToken,
    },
}

impl<'a> Contributor<'a> {
    pub fn source(&self) -> Source {
        match self {
            Contributor::NGram(_) => Source::NGram,
            Contributor::Neural { .. } => Source::Neural,
        }
    }

    pub fn priority(&self) -> usize {
        match self {
            Contributor::NGram(runner) => runner.priority(),
            Contributor::Neural { .. } => NEURAL_PRIORITY,
        }
    }

    pub fn contribute<S: AsRef<str>>(&self, context: &Context<S>, limit: usize) -> Result<Contribution> {
        let mut predictions = match self {
            Contributor::NGram(runner) => runner.suggest_names(context, limit),
            Contributor::Neural { predictor, cancel } => predictor.predict(context, cancel)?,
        };
        predictions.truncate(limit);
        Ok(Contribution {
            predictions,
            priority: self.priority(),
        })
    }

    pub fn get_probability<S: AsRef<str>>(&self, context: &Context<S>) -> Result<NameProbability> {
        match self {
            Contributor::NGram(runner) => Ok(runner.get_probability(context)),
            Contributor::Neural { predictor, cancel } => predictor.get_probability(context, cancel),
        }
    }
}

/// Merges the contributions into one ranking.
///
/// Each prediction adds `probability * priority / total_priority` to its name. A name
/// proposed by different kinds of models is reported as [`Source::Both`]. Equal scores keep
/// first-proposed order. At most `cutoff` names are returned.
pub fn merge_predictions(contributions: &[Contribution], cutoff: usize) -> Vec<Prediction> {
    let total: usize = contributions.iter().map(|c| c.priority).sum();
    if total == 0 {
        return Vec::new();
    }

    let mut merged: Vec<Prediction> = Vec::new();
    let mut positions: AHashMap<&str, usize> = AHashMap::new();
    for contribution in contributions {
        for prediction in &contribution.predictions {
            let addition = prediction.probability * prediction.priority as f64 / total as f64;
            match positions.get(prediction.name.as_str()) {
                Some(&i) => {
                    let entry = &mut merged[i];
                    entry.probability += addition;
                    entry.priority += prediction.priority;
                    if entry.source != prediction.source {
                        entry.source = Source::Both;
                    }
                }
                None => {
                    positions.insert(&prediction.name, merged.len());
                    merged.push(Prediction {
                        probability: addition,
                        ..prediction.clone()
                    });
                }
            }
        }
    }

    merged.sort_by(|a, b| b.probability.total_cmp(&a.probability));
    merged.truncate(cutoff);
    merged
}

/// Average of the probabilities weighted by priority; 0 when no contributor has weight.
pub fn weighted_probability(probabilities: &[NameProbability]) -> f64 {
    let total: usize = probabilities.iter().map(|p| p.priority).sum();
    if total == 0 {
        return 0.0;
    }
    let weighted: f64 = probabilities
        .iter()
        .map(|p| p.probability * p.priority as f64)
        .sum();
    weighted / total as f64
}
