use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::time::Instant;

use ahash::AHashSet;
use tempfile::NamedTempFile;

use crate::config::NGramConfig;
use crate::context::{Context, Statistics};
use crate::counter::{Countable, Counts, NGramTrie, Overlay, Representation};
use crate::error::{Error, Result};
use crate::ngram::{FORWARD_COUNTS, REMEMBERED_IDENTIFIERS_FILE, REVERSE_COUNTS, VOCABULARY_FILE};
use crate::vocabulary::{read_vocabulary, write_vocabulary, MemoryVocabulary, Vocabulary, UNKNOWN_INDEX};

/// Trained n-gram counts with their vocabulary, shared read-only by every runner.
///
/// Probabilities are Jelinek-Mercer interpolations from the uniform distribution up to the
/// longest context of `order - 1` tokens. A bidirectional model also holds counts of the
/// reversed token streams and averages both directions.
pub struct NGramModel {
    config: NGramConfig,
    vocabulary: MemoryVocabulary,
    remembered: BTreeSet<u32>,
    stop_indices: AHashSet<u32>,
    forward: Counts,
    reverse: Option<Counts>,
}

fn save_counts(counts: &Counts, path: &Path) -> Result<u64> {
    match counts {
        Counts::Ram(trie) => trie.save(path),
        Counts::Disk(frozen) => Err(Error::InvalidInput(format!(
            "counts mapped from {:?} are read-only",
            frozen.path()
        ))),
    }
}

fn write_remembered(remembered: &BTreeSet<u32>, path: &Path) -> Result<u64> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let temp = NamedTempFile::new_in(parent)?;
    {
        let mut writer = BufWriter::new(temp.as_file());
        serde_json::to_writer(&mut writer, remembered)?;
        writer.flush()?;
    }
    let file = temp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(file.metadata()?.len())
}

fn read_remembered(path: &Path) -> Result<BTreeSet<u32>> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

impl NGramModel {
    pub fn new(
        config: NGramConfig,
        vocabulary: MemoryVocabulary,
        remembered: BTreeSet<u32>,
        forward: Counts,
        reverse: Option<Counts>,
    ) -> Result<Self> {
        if forward.order() != config.order {
            return Err(Error::Config(format!(
                "counts have order {}, configured order is {}",
                forward.order(),
                config.order
            )));
        }
        if reverse.is_some() != config.bidirectional {
            return Err(Error::Config(
                "reverse counts must be present exactly when the model is bidirectional".into(),
            ));
        }
        let stop_indices = config
            .stop_names
            .iter()
            .filter_map(|name| vocabulary.get(name))
            .map(|index| index as u32)
            .collect();
        Ok(Self {
            config,
            vocabulary,
            remembered,
            stop_indices,
            forward,
            reverse,
        })
    }

    pub fn config(&self) -> &NGramConfig {
        &self.config
    }

    pub fn order(&self) -> usize {
        self.config.order
    }

    pub fn vocabulary(&self) -> &MemoryVocabulary {
        &self.vocabulary
    }

    pub fn remembered(&self) -> &BTreeSet<u32> {
        &self.remembered
    }

    pub fn forward(&self) -> &Counts {
        &self.forward
    }

    pub fn reverse(&self) -> Option<&Counts> {
        self.reverse.as_ref()
    }

    pub fn representation(&self) -> Representation {
        self.forward.representation()
    }

    /// Maps a token context to vocabulary indices without growing the vocabulary.
    pub fn to_indices<S: AsRef<str>>(&self, context: &Context<S>) -> Context<u32> {
        context.map(|token| self.vocabulary.index_of(token.as_ref()) as u32)
    }

    /// Writes counts, remembered identifiers and vocabulary into `dir`.
    ///
    /// Returns the total number of bytes written, which callers can use to pick the
    /// representation the model is loaded with next time.
    pub fn save(&self, dir: &Path) -> Result<u64> {
        let start = Instant::now();
        std::fs::create_dir_all(dir)?;

        let mut bytes = save_counts(&self.forward, &dir.join(format!("{}.bin", FORWARD_COUNTS)))?;
        if let Some(reverse) = &self.reverse {
            bytes += save_counts(reverse, &dir.join(format!("{}.bin", REVERSE_COUNTS)))?;
        }
        bytes += write_remembered(&self.remembered, &dir.join(REMEMBERED_IDENTIFIERS_FILE))?;
        bytes += write_vocabulary(&self.vocabulary, dir.join(VOCABULARY_FILE))?;

        log::info!(
            "saved n-gram model to {:?}: {} bytes in {:.2?}",
            dir,
            bytes,
            start.elapsed()
        );
        Ok(bytes)
    }

    /// Writes memory-mappable copies of RAM counts next to the serialized ones.
    pub fn freeze(&self, dir: &Path) -> Result<u64> {
        let mut bytes = 0;
        let stems = [(FORWARD_COUNTS, Some(&self.forward)), (REVERSE_COUNTS, self.reverse.as_ref())];
        for (stem, counts) in stems {
            if let Some(Counts::Ram(trie)) = counts {
                bytes += trie.freeze(&dir.join(format!("{}.frozen", stem)))?;
            }
        }
        Ok(bytes)
    }

    /// Loads a model saved by [`NGramModel::save`]. The vocabulary comes back closed.
    pub fn load(dir: &Path, config: NGramConfig, representation: Representation) -> Result<Self> {
        let start = Instant::now();
        let mut vocabulary = read_vocabulary(dir.join(VOCABULARY_FILE), 0)?;
        vocabulary.close();
        let remembered = read_remembered(&dir.join(REMEMBERED_IDENTIFIERS_FILE))?;

        let forward = Counts::load(dir, FORWARD_COUNTS, representation)?;
        let reverse = if config.bidirectional {
            Some(Counts::load(dir, REVERSE_COUNTS, representation)?)
        } else {
            None
        };

        let model = Self::new(config, vocabulary, remembered, forward, reverse)?;
        log::info!(
            "loaded {:?} n-gram model from {:?}: {} words, {} remembered identifiers in {:.2?}",
            representation,
            dir,
            model.vocabulary.size(),
            model.remembered.len(),
            start.elapsed()
        );
        Ok(model)
    }

    /// Scores against the shared counts with per-runner deltas applied.
    pub fn scorer<'a>(&'a self, forward_delta: &'a NGramTrie, reverse_delta: &'a NGramTrie) -> Scorer<'a> {
        Scorer {
            model: self,
            forward: Overlay::new(&self.forward, forward_delta),
            reverse: self
                .reverse
                .as_ref()
                .map(|reverse| Overlay::new(reverse, reverse_delta)),
        }
    }
}

/// Probability queries against one view of a model's counts.
pub struct Scorer<'a> {
    model: &'a NGramModel,
    forward: Overlay<'a, Counts>,
    reverse: Option<Overlay<'a, Counts>>,
}

impl<'a> Scorer<'a> {
    fn interpolate(&self, counts: &dyn Countable, context: &[u32], token: u32) -> f64 {
        let lambda = self.model.config.lambda;
        let mut probability = 1.0 / self.model.vocabulary.size().max(1) as f64;
        let mut gram = Vec::with_capacity(context.len() + 1);
        for n in 0..=context.len() {
            gram.clear();
            gram.extend_from_slice(&context[context.len() - n..]);
            gram.push(token);
            let [count, context_count] = counts.counts(&gram);
            if context_count == 0 {
                break;
            }
            probability =
                lambda * count as f64 / context_count as f64 + (1.0 - lambda) * probability;
        }
        probability
    }

    fn forward_context<'t>(&self, tokens: &'t [u32], index: usize) -> &'t [u32] {
        &tokens[index.saturating_sub(self.model.order() - 1)..index]
    }

    /// Tokens following `index` in reversed order, nearest last, as the reverse counts see them.
    fn reverse_context(&self, tokens: &[u32], index: usize) -> Vec<u32> {
        let end = (index + self.model.order()).min(tokens.len());
        tokens[index + 1..end].iter().rev().copied().collect()
    }

    /// Probability of `tokens[index]` given its neighbours.
    pub fn token_probability(&self, tokens: &[u32], index: usize) -> f64 {
        let token = tokens[index];
        let forward = self.interpolate(&self.forward, self.forward_context(tokens, index), token);
        match &self.reverse {
            Some(reverse) => {
                let backward = self.interpolate(reverse, &self.reverse_context(tokens, index), token);
                (forward + backward) / 2.0
            }
            None => forward,
        }
    }

    /// Log-probability of the tokens around every usage. Each usage scores the tokens whose
    /// window of `order` reaches it, and windows of consecutive usages never overlap.
    pub fn log_probability(&self, context: &Context<u32>) -> f64 {
        let order = self.model.order();
        let tokens = context.tokens();
        let mut log_probability = 0.0;
        let mut right = 0;
        for &idx in context.var_idxs() {
            let left = if self.reverse.is_some() {
                (idx + 1).saturating_sub(order)
            } else {
                idx
            };
            let left = left.max(right);
            right = (idx + order).min(tokens.len());
            for i in left..right {
                log_probability += self.token_probability(tokens, i).ln();
            }
        }
        log_probability
    }

    /// Remembered, non-stop identifiers seen next to any usage under any context length.
    pub fn candidates(&self, context: &Context<u32>) -> BTreeSet<u32> {
        let limit = self.model.config.successor_limit;
        let tokens = context.tokens();
        let mut successors = Vec::new();
        for &idx in context.var_idxs() {
            for n in 0..self.model.order().min(idx + 1) {
                successors.extend(self.forward.successors(&tokens[idx - n..idx], limit));
            }
            if let Some(reverse) = &self.reverse {
                let following = self.reverse_context(tokens, idx);
                for n in 0..=following.len() {
                    successors.extend(reverse.successors(&following[following.len() - n..], limit));
                }
            }
        }
        successors
            .into_iter()
            .map(|(token, _)| token)
            .filter(|&token| self.is_candidate(token))
            .collect()
    }

    fn is_candidate(&self, token: u32) -> bool {
        token != UNKNOWN_INDEX as u32
            && self.model.remembered.contains(&token)
            && !self.model.stop_indices.contains(&token)
    }

    /// Scores every candidate, plus `extra` if given, substituted at all usages and turns
    /// the log-probabilities into a tempered softmax. Sorted by descending probability, ties
    /// by ascending index.
    pub fn rank(&self, context: &Context<u32>, extra: Option<u32>) -> Vec<(u32, f64)> {
        let mut candidates = self.candidates(context);
        candidates.extend(extra);
        if candidates.is_empty() {
            return Vec::new();
        }

        let temperature = self.model.config.temperature;
        let mut ranked: Vec<(u32, f64)> = candidates
            .into_iter()
            .map(|c| (c, self.log_probability(&context.with(c)) / temperature))
            .collect();
        let max = ranked
            .iter()
            .map(|&(_, logit)| logit)
            .fold(f64::NEG_INFINITY, f64::max);
        let mut sum = 0.0;
        for (_, logit) in ranked.iter_mut() {
            *logit = (*logit - max).exp();
            sum += *logit;
        }
        for (_, probability) in ranked.iter_mut() {
            *probability /= sum;
        }
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        log::debug!("ranked {} n-gram candidates", ranked.len());
        ranked
    }

    /// Times the context up to `index` was seen, plus the reverse count if bidirectional.
    pub fn context_count(&self, tokens: &[u32], index: usize) -> u64 {
        let start = (index + 1).saturating_sub(self.model.order());
        let mut count = self.forward.counts(&tokens[start..=index])[1];
        if let Some(reverse) = &self.reverse {
            let end = (index + self.model.order()).min(tokens.len());
            let gram: Vec<u32> = tokens[index..end].iter().rev().copied().collect();
            count += reverse.counts(&gram)[1];
        }
        count
    }

    pub fn statistics(&self, context: &Context<u32>) -> Statistics {
        let tokens = context.tokens();
        Statistics {
            usage_count: context.usage_count(),
            total_ngram_counts: context
                .var_idxs()
                .iter()
                .map(|&idx| self.context_count(tokens, idx))
                .sum(),
        }
    }
}
