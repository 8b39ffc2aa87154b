use std::collections::BTreeSet;
use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;

use crate::config::NGramConfig;
use crate::counter::{Counts, NGramTrie};
use crate::error::Result;
use crate::loader::SourceFile;
use crate::ngram::NGramModel;
use crate::vocabulary::{MemoryVocabulary, Vocabulary, UNKNOWN_INDEX};

/// Whether learning may grow the vocabulary and remember declared identifiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Training,
    Inference,
}

/// Accumulates n-gram counts over a corpus of lexed files.
pub struct NGramTrainer {
    config: NGramConfig,
    phase: Phase,
    vocabulary: MemoryVocabulary,
    remembered: BTreeSet<u32>,
    forward: NGramTrie,
    reverse: Option<NGramTrie>,
}

fn reversed(tokens: &[u32]) -> Vec<u32> {
    tokens.iter().rev().copied().collect()
}

impl NGramTrainer {
    pub fn new(config: NGramConfig) -> Self {
        Self::with_vocabulary(config, MemoryVocabulary::new())
    }

    /// Starts training on top of an existing vocabulary, opened for growth.
    pub fn with_vocabulary(config: NGramConfig, mut vocabulary: MemoryVocabulary) -> Self {
        vocabulary.open();
        let forward = NGramTrie::new(config.order);
        let reverse = config.bidirectional.then(|| NGramTrie::new(config.order));
        Self {
            config,
            phase: Phase::Training,
            vocabulary,
            remembered: BTreeSet::new(),
            forward,
            reverse,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn train(&mut self) {
        self.phase = Phase::Training;
        self.vocabulary.open();
    }

    /// Switches to inference: unseen tokens now map to the unknown index.
    pub fn eval(&mut self) {
        self.phase = Phase::Inference;
        self.vocabulary.close();
    }

    pub fn vocabulary(&self) -> &MemoryVocabulary {
        &self.vocabulary
    }

    pub fn remembered(&self) -> &BTreeSet<u32> {
        &self.remembered
    }

    fn index(&mut self, file: &SourceFile) -> Vec<u32> {
        let indices: Vec<u32> = file
            .tokens
            .iter()
            .map(|token| self.vocabulary.to_index(token) as u32)
            .collect();
        if self.phase == Phase::Training {
            for &pos in &file.declarations {
                match indices.get(pos) {
                    Some(&index) if index != UNKNOWN_INDEX as u32 => {
                        self.remembered.insert(index);
                    }
                    _ => {}
                }
            }
        }
        indices
    }

    pub fn learn_file(&mut self, file: &SourceFile) {
        let indices = self.index(file);
        self.forward.learn(&indices);
        if let Some(reverse) = &mut self.reverse {
            reverse.learn(&reversed(&indices));
        }
    }

    /// Learns a whole corpus. Files are indexed in order so vocabulary indices are
    /// reproducible, then counted in parallel and merged.
    ///
    /// With a positive vocabulary cutoff and a fresh vocabulary, the vocabulary is first
    /// built from the corpus and closed, so rare tokens count as unknown.
    pub fn learn_corpus(&mut self, files: &[SourceFile], progress: bool) {
        let start = Instant::now();
        let cutoff = self.config.vocabulary_cutoff;
        if cutoff > 0 && self.phase == Phase::Training && self.vocabulary.size() == 1 {
            self.vocabulary = MemoryVocabulary::build(files.iter().flat_map(|f| &f.tokens), cutoff);
            self.vocabulary.close();
        }

        let total_tokens: u64 = files.iter().map(|f| f.tokens.len() as u64).sum();
        let pb = if progress {
            ProgressBar::new(total_tokens)
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) =
            ProgressStyle::with_template("[{elapsed}/{eta}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
        {
            pb.set_style(style);
        }

        let mut indexed = Vec::with_capacity(files.len());
        for file in files {
            indexed.push(self.index(file));
            pb.inc(file.tokens.len() as u64);
            pb.set_message(format!("{} words", self.vocabulary.size()));
        }

        let order = self.config.order;
        let bidirectional = self.reverse.is_some();
        let empty = || (NGramTrie::new(order), NGramTrie::new(order));
        let (forward, reverse) = indexed
            .par_iter()
            .fold(empty, |(mut forward, mut reverse), tokens| {
                forward.learn(tokens);
                if bidirectional {
                    reverse.learn(&reversed(tokens));
                }
                (forward, reverse)
            })
            .reduce(empty, |(mut forward, mut reverse), (f, r)| {
                forward.merge(&f);
                reverse.merge(&r);
                (forward, reverse)
            });

        self.forward.merge(&forward);
        if let Some(all) = &mut self.reverse {
            all.merge(&reverse);
        }
        pb.finish_and_clear();
        log::info!(
            "learned {} files ({} tokens) in {:.2?}: {} words, {} trie nodes",
            files.len(),
            total_tokens,
            start.elapsed(),
            self.vocabulary.size(),
            self.forward.num_nodes()
        );
    }

    /// Closes the vocabulary and wraps the counts into a model held in RAM.
    pub fn into_model(mut self) -> Result<NGramModel> {
        self.vocabulary.close();
        NGramModel::new(
            self.config,
            self.vocabulary,
            self.remembered,
            Counts::Ram(self.forward),
            self.reverse.map(Counts::Ram),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::Countable;

    fn file(path: &str, tokens: &[&str], declarations: Vec<usize>) -> SourceFile {
        SourceFile::new(path, tokens.iter().map(|t| t.to_string()).collect(), declarations)
    }

    fn config() -> NGramConfig {
        NGramConfig {
            order: 3,
            ..NGramConfig::default()
        }
    }

    #[test]
    fn test_remembers_declarations_only_while_training() {
        let mut trainer = NGramTrainer::new(config());
        trainer.learn_file(&file("a", &["int", "count", "=", "0"], vec![1]));
        let count = trainer.vocabulary().get("count").unwrap() as u32;
        assert_eq!(trainer.remembered().iter().copied().collect::<Vec<_>>(), vec![count]);

        trainer.eval();
        let size = trainer.vocabulary().size();
        trainer.learn_file(&file("b", &["int", "total", "=", "0"], vec![1]));
        assert_eq!(trainer.vocabulary().size(), size);
        assert_eq!(trainer.remembered().len(), 1);
        assert_eq!(trainer.phase(), Phase::Inference);
    }

    #[test]
    fn test_parallel_corpus_matches_sequential() {
        let files = vec![
            file("a", &["for", "i", "in", "items"], vec![1]),
            file("b", &["let", "item", "=", "items", "[", "i", "]"], vec![1]),
            file("c", &["i", "+=", "1"], vec![]),
        ];

        let mut sequential = NGramTrainer::new(config());
        for f in &files {
            sequential.learn_file(f);
        }
        let mut parallel = NGramTrainer::new(config());
        parallel.learn_corpus(&files, false);

        assert_eq!(parallel.vocabulary().words(), sequential.vocabulary().words());
        assert_eq!(parallel.remembered(), sequential.remembered());
        assert_eq!(parallel.forward, sequential.forward);
        assert_eq!(parallel.reverse, sequential.reverse);
    }

    #[test]
    fn test_cutoff_maps_rare_tokens_to_unknown() {
        let files = vec![file("a", &["x", "y", "x"], vec![1])];
        let mut trainer = NGramTrainer::new(NGramConfig {
            vocabulary_cutoff: 2,
            ..config()
        });
        trainer.learn_corpus(&files, false);
        assert_eq!(trainer.vocabulary().get("y"), None);
        assert!(trainer.remembered().is_empty());

        let model = trainer.into_model().unwrap();
        assert_eq!(model.forward().counts(&[UNKNOWN_INDEX as u32])[0], 1);
    }
}
