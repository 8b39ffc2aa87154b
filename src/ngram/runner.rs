use std::ops::Deref;
use std::sync::Arc;

use ahash::AHashSet;

use crate::context::{Context, Statistics};
use crate::contributor::{NameProbability, Prediction, Source, NGRAM_PRIORITY};
use crate::counter::{Countable, NGramTrie, Overlay};
use crate::loader::SourceFile;
use crate::ngram::{NGramModel, Scorer};
use crate::vocabulary::{Vocabulary, UNKNOWN_INDEX};

/// Per-worker view of a shared [`NGramModel`].
///
/// A runner can forget the files being analyzed so their own tokens do not vote for their
/// names. Forgotten and relearned n-grams go to private deltas; the shared counts are never
/// touched, so runners on different workers do not need to lock anything.
pub struct NGramModelRunner {
    model: Arc<NGramModel>,
    forward_delta: NGramTrie,
    reverse_delta: NGramTrie,
    forgotten: AHashSet<String>,
}

impl NGramModelRunner {
    pub fn new(model: Arc<NGramModel>) -> Self {
        let order = model.order();
        Self {
            model,
            forward_delta: NGramTrie::new(order),
            reverse_delta: NGramTrie::new(order),
            forgotten: AHashSet::new(),
        }
    }

    pub fn model(&self) -> &Arc<NGramModel> {
        &self.model
    }

    /// Weight of this runner's answers when merged with other contributors.
    pub fn priority(&self) -> usize {
        NGRAM_PRIORITY
    }

    pub fn scorer(&self) -> Scorer<'_> {
        self.model.scorer(&self.forward_delta, &self.reverse_delta)
    }

    /// Forward counts as this runner sees them.
    pub fn counts(&self, gram: &[u32]) -> [u64; 2] {
        Overlay::new(self.model.forward(), &self.forward_delta).counts(gram)
    }

    /// Whether no file is currently forgotten or relearned differently.
    pub fn is_pristine(&self) -> bool {
        self.forward_delta.is_empty() && self.reverse_delta.is_empty()
    }

    pub fn is_forgotten(&self, path: &str) -> bool {
        self.forgotten.contains(path)
    }

    fn update(&mut self, file: &SourceFile, delta: i64) {
        let vocabulary = self.model.vocabulary();
        let indices: Vec<u32> = file
            .tokens
            .iter()
            .map(|token| vocabulary.index_of(token) as u32)
            .collect();
        self.forward_delta.update(&indices, delta);
        if self.model.reverse().is_some() {
            let reversed: Vec<u32> = indices.into_iter().rev().collect();
            self.reverse_delta.update(&reversed, delta);
        }
    }

    /// Removes the file's n-grams unless it is already forgotten. Returns whether it did.
    pub fn forget_file_if_needed(&mut self, file: &SourceFile) -> bool {
        if !self.forgotten.insert(file.path.clone()) {
            return false;
        }
        self.update(file, -1);
        log::debug!("forgot {} ({} tokens)", file.path, file.tokens.len());
        true
    }

    /// Adds the file's n-grams back if it was forgotten. Returns whether it did.
    pub fn learn_file_if_needed(&mut self, file: &SourceFile) -> bool {
        if !self.forgotten.remove(&file.path) {
            return false;
        }
        self.update(file, 1);
        log::debug!("relearned {} ({} tokens)", file.path, file.tokens.len());
        true
    }

    /// Forgets `file` for as long as the guard lives. Dropping the guard relearns it, on
    /// early return and unwinding too.
    pub fn forgetting<'r>(&'r mut self, file: &'r SourceFile) -> ForgetGuard<'r> {
        let forgot = self.forget_file_if_needed(file);
        ForgetGuard {
            runner: self,
            file,
            forgot,
        }
    }

    /// Ranked names for the variable whose usages are marked in `context`.
    pub fn suggest_names<S: AsRef<str>>(&self, context: &Context<S>, limit: usize) -> Vec<Prediction> {
        if context.is_empty() || context.usage_count() == 0 {
            return Vec::new();
        }
        let indices = self.model.to_indices(context).with(UNKNOWN_INDEX as u32);
        let vocabulary = self.model.vocabulary();
        let priority = self.priority();
        self.scorer()
            .rank(&indices, None)
            .into_iter()
            .take(limit)
            .map(|(index, probability)| Prediction {
                name: vocabulary.to_word(index as usize),
                probability,
                priority,
                source: Source::NGram,
            })
            .collect()
    }

    /// How likely the name currently written at the usages is among the candidates.
    pub fn get_probability<S: AsRef<str>>(&self, context: &Context<S>) -> NameProbability {
        let first = match context.var_idxs().first() {
            Some(&first) => first,
            None => return NameProbability::default(),
        };
        let indices = self.model.to_indices(context);
        let current = indices.tokens()[first];
        let unknown = indices.with(UNKNOWN_INDEX as u32);

        let scorer = self.scorer();
        // A name the model never saw gets no share of the ranking.
        let probability = if current == UNKNOWN_INDEX as u32 {
            0.0
        } else {
            scorer
                .rank(&unknown, Some(current))
                .into_iter()
                .find(|&(index, _)| index == current)
                .map_or(0.0, |(_, probability)| probability)
        };
        NameProbability {
            probability,
            log_probability: scorer.log_probability(&unknown.with(current)),
            priority: self.priority(),
        }
    }

    pub fn context_statistics<S: AsRef<str>>(&self, context: &Context<S>) -> Statistics {
        if context.usage_count() == 0 {
            return Statistics::EMPTY;
        }
        let indices = self.model.to_indices(context).with(UNKNOWN_INDEX as u32);
        self.scorer().statistics(&indices)
    }
}

/// A runner with one file forgotten. Derefs to the runner for queries.
pub struct ForgetGuard<'r> {
    runner: &'r mut NGramModelRunner,
    file: &'r SourceFile,
    forgot: bool,
}

impl<'r> Deref for ForgetGuard<'r> {
    type Target = NGramModelRunner;

    fn deref(&self) -> &NGramModelRunner {
        self.runner
    }
}

impl<'r> Drop for ForgetGuard<'r> {
    fn drop(&mut self) {
        if self.forgot {
            self.runner.learn_file_if_needed(self.file);
        }
    }
}
