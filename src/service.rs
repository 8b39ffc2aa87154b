use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cache::TtlCache;
use crate::config::{EngineConfig, ServiceConfig};
use crate::context::{Context, Statistics};
use crate::contributor::{
    merge_predictions, weighted_probability, Contribution, Contributor, NameProbability, Prediction,
};
use crate::counter::Representation;
use crate::error::Result;
use crate::loader::SourceFile;
use crate::ngram::{NGramModel, NGramModelRunner};
use crate::predictor::NeuralNamePredictor;
use crate::search::CancellationToken;
use crate::vocabulary::UNKNOWN_TOKEN;
use crate::NEURAL_UNKNOWN_TOKEN;

/// Names ranked this high are never reported as inconsistent.
pub const CONSISTENCY_TOP_K: usize = 5;

/// Stable identity of a variable: the file it is declared in, the byte offset of the
/// declaration and the name it currently has.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariableKey {
    pub file: String,
    pub offset: usize,
    pub name: String,
}

/// A variable together with its token context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VariableRequest {
    pub key: VariableKey,
    pub context: Context<String>,
}

/// The variables of one file, analyzed with the file itself forgotten.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileRequest {
    pub file: SourceFile,
    pub variables: Vec<VariableRequest>,
}

/// Which counts a cached ranking was computed against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Scope {
    Model,
    /// The variable's own file forgotten.
    LeaveFileOut,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub key: VariableKey,
    pub predictions: Vec<Prediction>,
}

/// Entry point of the engine.
///
/// Holds one n-gram runner per worker over a shared model, and optionally a neural
/// predictor. A failure while predicting one variable is logged and yields no suggestions
/// for that variable only.
///
/// Neural work always runs before a runner is locked: it may wait on rayon, and a worker
/// waiting on rayon can pick up another file that needs the same runner.
pub struct SuggestionService {
    config: ServiceConfig,
    runners: Vec<Mutex<NGramModelRunner>>,
    neural: Option<NeuralNamePredictor>,
    predictions: TtlCache<(VariableKey, Scope), Vec<Prediction>>,
    verdicts: TtlCache<VariableKey, bool>,
}

impl SuggestionService {
    pub fn new(
        ngram: Option<Arc<NGramModel>>,
        neural: Option<NeuralNamePredictor>,
        config: ServiceConfig,
    ) -> Self {
        let runners = match ngram {
            Some(model) => (0..config.workers.max(1))
                .map(|_| Mutex::new(NGramModelRunner::new(model.clone())))
                .collect(),
            None => Vec::new(),
        };
        let ttl = Duration::from_secs(config.cache_ttl_secs);
        Self {
            predictions: TtlCache::new(config.cache_size, ttl),
            verdicts: TtlCache::new(config.cache_size, ttl),
            config,
            runners,
            neural,
        }
    }

    /// Loads the n-gram model from `ngram_dir`, and serves `neural` next to it if given.
    pub fn load(
        ngram_dir: &Path,
        representation: Representation,
        neural: Option<NeuralNamePredictor>,
        config: &EngineConfig,
    ) -> Result<Self> {
        let model = NGramModel::load(ngram_dir, config.ngram.clone(), representation)?;
        Ok(Self::new(Some(Arc::new(model)), neural, config.service.clone()))
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn num_runners(&self) -> usize {
        self.runners.len()
    }

    /// The runner owned by the current worker thread. Threads outside the pool share the
    /// first one.
    fn runner(&self) -> Option<MutexGuard<'_, NGramModelRunner>> {
        if self.runners.is_empty() {
            return None;
        }
        let worker = rayon::current_thread_index().unwrap_or(0) % self.runners.len();
        Some(self.runners[worker].lock())
    }

    /// Cached predictions, or nothing for a malformed request. `None` means they must be
    /// computed.
    fn lookup(&self, request: &VariableRequest, scope: Scope) -> Option<Vec<Prediction>> {
        if let Some(cached) = self.predictions.get(&(request.key.clone(), scope)) {
            return Some(cached);
        }
        if let Err(e) = request.context.validate() {
            log::warn!("no suggestions for {:?}: {}", request.key, e);
            return Some(Vec::new());
        }
        None
    }

    fn contribute(&self, contributor: &Contributor<'_>, request: &VariableRequest) -> Option<Contribution> {
        match contributor.contribute(&request.context, self.config.prediction_cutoff) {
            Ok(contribution) => Some(contribution),
            Err(e) => {
                log::warn!("{:?} failed for {:?}: {}", contributor.source(), request.key, e);
                None
            }
        }
    }

    fn neural_contribution(&self, request: &VariableRequest, cancel: &CancellationToken) -> Option<Contribution> {
        let predictor = self.neural.as_ref()?;
        self.contribute(&Contributor::Neural { predictor, cancel }, request)
    }

    fn neural_probability(&self, request: &VariableRequest, cancel: &CancellationToken) -> Option<NameProbability> {
        let predictor = self.neural.as_ref()?;
        let contributor = Contributor::Neural { predictor, cancel };
        match contributor.get_probability(&request.context) {
            Ok(probability) => Some(probability),
            Err(e) => {
                log::warn!("no neural probability for {:?}: {}", request.key, e);
                None
            }
        }
    }

    /// Adds the n-gram contribution to `neural`, merges and caches the result.
    fn finish(
        &self,
        request: &VariableRequest,
        scope: Scope,
        runner: Option<&NGramModelRunner>,
        neural: Option<Contribution>,
        cancel: &CancellationToken,
    ) -> Vec<Prediction> {
        let start = Instant::now();
        let mut contributions = Vec::with_capacity(2);
        if let Some(runner) = runner {
            contributions.extend(self.contribute(&Contributor::NGram(runner), request));
        }
        contributions.extend(neural);
        let merged = merge_predictions(&contributions, self.config.prediction_cutoff);
        log::debug!(
            "{} suggestions for {} ({} tokens) in {:.2?}",
            merged.len(),
            request.key.name,
            request.context.len(),
            start.elapsed()
        );
        if !cancel.is_cancelled() {
            self.predictions.insert((request.key.clone(), scope), merged.clone());
        }
        merged
    }

    /// Ranked names for one variable, against the full model.
    pub fn suggest_variable_name(&self, request: &VariableRequest, cancel: &CancellationToken) -> Vec<Prediction> {
        if let Some(predictions) = self.lookup(request, Scope::Model) {
            return predictions;
        }
        let neural = self.neural_contribution(request, cancel);
        let runner = self.runner();
        self.finish(request, Scope::Model, runner.as_deref(), neural, cancel)
    }

    /// Ranked names for every variable of a file, with the file's own n-grams forgotten so
    /// it cannot vote for its current names. The file is relearned before returning.
    pub fn suggest_file(&self, request: &FileRequest, cancel: &CancellationToken) -> Vec<Suggestion> {
        let done: Vec<Option<Vec<Prediction>>> = request.variables.iter().map(|v| self.lookup(v, Scope::LeaveFileOut)).collect();
        let neural: Vec<Option<Contribution>> = request
            .variables
            .iter()
            .zip(&done)
            .map(|(variable, done)| match done {
                Some(_) => None,
                None => self.neural_contribution(variable, cancel),
            })
            .collect();

        let mut runner = self.runner();
        let guard = runner.as_mut().map(|runner| runner.forgetting(&request.file));
        request
            .variables
            .iter()
            .zip(done)
            .zip(neural)
            .map(|((variable, done), neural)| Suggestion {
                key: variable.key.clone(),
                predictions: done.unwrap_or_else(|| {
                    self.finish(variable, Scope::LeaveFileOut, guard.as_deref(), neural, cancel)
                }),
            })
            .collect()
    }

    /// [`Self::suggest_file`] for many files, one worker per file.
    pub fn suggest_files(&self, requests: &[FileRequest], cancel: &CancellationToken) -> Vec<Vec<Suggestion>> {
        let start = Instant::now();
        let suggestions: Vec<Vec<Suggestion>> = requests
            .par_iter()
            .map(|request| self.suggest_file(request, cancel))
            .collect();
        log::info!(
            "suggested names for {} files ({} variables) in {:.2?}",
            requests.len(),
            requests.iter().map(|r| r.variables.len()).sum::<usize>(),
            start.elapsed()
        );
        suggestions
    }

    /// Whether the models agree on a name other than the current one: there are
    /// predictions, the top one is not the unknown token, and the current name is not among
    /// the top few.
    pub fn is_inconsistent(&self, request: &VariableRequest, cancel: &CancellationToken) -> bool {
        if let Some(verdict) = self.verdicts.get(&request.key) {
            return verdict;
        }
        let predictions = self.suggest_variable_name(request, cancel);
        let verdict = match predictions.first() {
            None => false,
            Some(top) if top.name == UNKNOWN_TOKEN || top.name == NEURAL_UNKNOWN_TOKEN => false,
            Some(_) => !predictions
                .iter()
                .take(CONSISTENCY_TOP_K)
                .any(|p| p.name == request.key.name),
        };
        if !cancel.is_cancelled() {
            self.verdicts.insert(request.key.clone(), verdict);
        }
        verdict
    }

    /// Priority-weighted average of the probability each model gives the current name.
    pub fn get_variable_name_probability(&self, request: &VariableRequest, cancel: &CancellationToken) -> f64 {
        if let Err(e) = request.context.validate() {
            log::warn!("no probability for {:?}: {}", request.key, e);
            return 0.0;
        }
        let mut probabilities: Vec<NameProbability> = self.neural_probability(request, cancel).into_iter().collect();
        if let Some(runner) = self.runner() {
            probabilities.push(runner.get_probability(&request.context));
        }
        weighted_probability(&probabilities)
    }

    /// N-gram evidence behind a variable's context.
    pub fn context_statistics(&self, request: &VariableRequest) -> Statistics {
        if request.context.validate().is_err() {
            return Statistics::EMPTY;
        }
        match self.runner() {
            Some(runner) => runner.context_statistics(&request.context),
            None => Statistics::EMPTY,
        }
    }

    /// Drops cached results for a file, e.g. after it was edited. Returns how many entries
    /// were dropped.
    pub fn invalidate_file(&self, path: &str) -> usize {
        self.predictions.invalidate_where(|(key, _)| key.file == path)
            + self.verdicts.invalidate_where(|key| key.file == path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NGramConfig;
    use crate::ngram::NGramTrainer;

    fn file(path: &str, tokens: &[&str]) -> SourceFile {
        SourceFile::new(path, tokens.iter().map(|t| t.to_string()).collect(), vec![1])
    }

    fn corpus() -> Vec<SourceFile> {
        vec![
            file("a.java", &["int", "count", "=", "0", ";", "count", "++", ";"]),
            file("b.java", &["int", "total", "=", "0", ";", "total", "++", ";"]),
            file("c.java", &["int", "count", "=", "0", ";", "count", "++", ";"]),
        ]
    }

    fn service(workers: usize) -> SuggestionService {
        let mut trainer = NGramTrainer::new(NGramConfig {
            order: 3,
            ..NGramConfig::default()
        });
        trainer.learn_corpus(&corpus(), false);
        let model = Arc::new(trainer.into_model().unwrap());
        SuggestionService::new(
            Some(model),
            None,
            ServiceConfig {
                workers,
                ..ServiceConfig::default()
            },
        )
    }

    fn request(path: &str, name: &str) -> VariableRequest {
        let tokens = ["int", name, "=", "0", ";", name, "++", ";"];
        VariableRequest {
            key: VariableKey {
                file: path.to_string(),
                offset: 4,
                name: name.to_string(),
            },
            context: Context::new(tokens.iter().map(|t| t.to_string()).collect(), vec![1, 5]).unwrap(),
        }
    }

    fn names(predictions: &[Prediction]) -> Vec<&str> {
        predictions.iter().map(|p| p.name.as_str()).collect()
    }

    #[test]
    fn test_suggest_variable_name() {
        let service = service(2);
        assert_eq!(service.num_runners(), 2);
        let predictions = service.suggest_variable_name(&request("d.java", "x"), &CancellationToken::new());
        assert_eq!(names(&predictions), vec!["count", "total"]);
        assert!(predictions[0].probability > predictions[1].probability);
    }

    #[test]
    fn test_suggest_file_forgets_the_file() {
        let service = service(1);
        let cancel = CancellationToken::new();
        let request = FileRequest {
            file: corpus()[0].clone(),
            variables: vec![request("a.java", "count")],
        };
        let suggestions = service.suggest_file(&request, &cancel);
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].key.name, "count");
        // With a.java forgotten, count and total are backed by one file each.
        let predictions = &suggestions[0].predictions;
        assert_eq!(names(predictions), vec!["count", "total"]);
        assert_eq!(predictions[0].probability, predictions[1].probability);

        let runner = service.runner().unwrap();
        assert!(runner.is_pristine());
    }

    #[test]
    fn test_full_model_ranking_is_not_reused_for_the_file() {
        let cancel = CancellationToken::new();
        let request = FileRequest {
            file: corpus()[0].clone(),
            variables: vec![request("a.java", "count")],
        };
        let fresh = service(1).suggest_file(&request, &cancel);

        let service = service(1);
        let full = service.suggest_variable_name(&request.variables[0], &cancel);
        assert!(full[0].probability > full[1].probability);
        let forgotten = service.suggest_file(&request, &cancel);
        assert_eq!(forgotten, fresh);
        assert_eq!(forgotten[0].predictions[0].probability, forgotten[0].predictions[1].probability);

        // Both rankings stay cached side by side.
        assert_eq!(service.suggest_variable_name(&request.variables[0], &cancel), full);
        assert_eq!(service.invalidate_file("a.java"), 2);
    }

    #[test]
    fn test_suggest_files_in_parallel() {
        let service = service(4);
        let requests: Vec<FileRequest> = corpus()
            .into_iter()
            .map(|file| {
                let name = file.tokens[1].clone();
                let variables = vec![request(&file.path, &name)];
                FileRequest { file, variables }
            })
            .collect();
        let suggestions = service.suggest_files(&requests, &CancellationToken::new());
        assert_eq!(suggestions.len(), 3);
        assert_eq!(names(&suggestions[1][0].predictions), vec!["count"]);
        for runner in &service.runners {
            assert!(runner.lock().is_pristine());
        }
    }

    #[test]
    fn test_is_inconsistent() {
        let service = service(1);
        let cancel = CancellationToken::new();
        assert!(!service.is_inconsistent(&request("d.java", "count"), &cancel));
        assert!(service.is_inconsistent(&request("d.java", "weird"), &cancel));
        assert_eq!(service.verdicts.len(), 2);
        assert_eq!(service.invalidate_file("d.java"), 4);
        assert!(service.verdicts.is_empty());
    }

    #[test]
    fn test_invalid_context_degrades() {
        let service = service(1);
        let mut bad = request("d.java", "x");
        bad.context = serde_json::from_str(r#"{"tokens": ["int", "x"], "varIdxs": [5]}"#).unwrap();
        assert!(service.suggest_variable_name(&bad, &CancellationToken::new()).is_empty());
        assert_eq!(service.context_statistics(&bad), Statistics::EMPTY);
        assert_eq!(service.get_variable_name_probability(&bad, &CancellationToken::new()), 0.0);
    }

    #[test]
    fn test_probability_and_statistics() {
        let service = service(1);
        let cancel = CancellationToken::new();
        let count = service.get_variable_name_probability(&request("d.java", "count"), &cancel);
        let total = service.get_variable_name_probability(&request("d.java", "total"), &cancel);
        assert!(count > total && total > 0.0);
        assert_eq!(service.get_variable_name_probability(&request("d.java", "weird"), &cancel), 0.0);

        let stats = service.context_statistics(&request("d.java", "x"));
        assert_eq!(stats.usage_count, 2);
        assert!(stats.total_ngram_counts > 0);
    }

    #[test]
    fn test_without_models() {
        let service = SuggestionService::new(None, None, ServiceConfig::default());
        let cancel = CancellationToken::new();
        assert!(service.suggest_variable_name(&request("d.java", "x"), &cancel).is_empty());
        assert!(!service.is_inconsistent(&request("d.java", "x"), &cancel));
        assert_eq!(service.context_statistics(&request("d.java", "x")), Statistics::EMPTY);
    }
}
