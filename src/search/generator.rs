use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::config::SearchConfig;
use crate::error::Result;
use crate::neural::NeuralModelRunner;
use crate::search::beam::{apply_repetition_penalty, repeated_indices, BeamSearch};
use crate::search::hypothesis::Hypothesis;
use crate::search::numeric::{log_softmax, log_softmax_rows, top_k};
use crate::vocabulary::Vocabulary;
use crate::{EOS_TOKEN, SEPARATOR_TOKEN, VAR_TOKEN};

/// Steps taken by [`BeamSearchGenerator::predict_greedy`].
pub const GREEDY_STEPS: usize = 6;

/// Cooperative cancellation flag shared between a caller and a running search.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Generates names for an encoded context by beam search over the decoder.
#[derive(Clone)]
pub struct BeamSearchGenerator {
    runner: NeuralModelRunner,
    vocabulary: Arc<dyn Vocabulary>,
    config: SearchConfig,
    eos: usize,
    var: usize,
    separator: Option<usize>,
}

impl BeamSearchGenerator {
    pub fn new(runner: NeuralModelRunner, vocabulary: Arc<dyn Vocabulary>, config: SearchConfig) -> Self {
        let eos = vocabulary.index_of(EOS_TOKEN);
        let var = vocabulary.index_of(VAR_TOKEN);
        let separator = vocabulary.get(SEPARATOR_TOKEN);
        Self {
            runner,
            vocabulary,
            config,
            eos,
            var,
            separator,
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn vocabulary(&self) -> &Arc<dyn Vocabulary> {
        &self.vocabulary
    }

    /// Decoder prefix every hypothesis starts from.
    pub fn prefix(&self) -> [usize; 2] {
        [self.eos, self.var]
    }

    /// Runs beam search for one assembled context. Returns finished hypotheses, best first.
    ///
    /// The encoder runs once. If `cancel` fires, the search stops before the next decoder
    /// call and returns what has finished so far.
    pub fn generate(&self, source: &[usize], cancel: &CancellationToken) -> Result<Vec<Hypothesis>> {
        if source.is_empty() {
            return Ok(Vec::new());
        }
        let start = Instant::now();
        let encoded = self.runner.encode(&[source.to_vec()])?;
        let mut search = BeamSearch::new(self.prefix().to_vec(), self.eos, self.separator, &self.config);

        let mut steps = 0;
        while !search.is_done() {
            if cancel.is_cancelled() {
                log::warn!(
                    "beam search cancelled after {} steps with {} finished hypotheses",
                    steps,
                    search.finished().len()
                );
                break;
            }
            let batch: Vec<Vec<usize>> = search.beams().iter().map(|beam| beam.tokens.clone()).collect();
            let mut log_probs = self.runner.decode(&batch, &encoded)?;
            log_softmax_rows(&mut log_probs);
            for (row, beam) in log_probs.rows_mut().into_iter().zip(search.beams()) {
                let repeated = repeated_indices(
                    self.vocabulary.as_ref(),
                    &beam.tokens[search.prefix_len()..],
                );
                apply_repetition_penalty(row, &repeated, self.config.repetition_penalty);
            }
            search.step(&log_probs);
            steps += 1;
        }

        let hypotheses = search.finish();
        log::debug!(
            "beam search over {} source tokens: {} steps, {} hypotheses in {:.2?}",
            source.len(),
            steps,
            hypotheses.len(),
            start.elapsed()
        );
        Ok(hypotheses)
    }

    /// Takes the most likely token at each step, starting from end-of-sequence alone, until
    /// end-of-sequence comes out again or [`GREEDY_STEPS`] tokens are generated.
    pub fn predict_greedy(&self, source: &[usize]) -> Result<Hypothesis> {
        let mut tokens = vec![self.eos];
        let mut step_log_probs = Vec::new();
        if !source.is_empty() {
            let encoded = self.runner.encode(&[source.to_vec()])?;
            for _ in 0..GREEDY_STEPS {
                let logits = self.runner.decode(&[tokens.clone()], &encoded)?;
                let mut row = logits.row(0).to_vec();
                log_softmax(&mut row);
                let (token, lp) = match top_k(&row, 1).first() {
                    Some(&best) => best,
                    None => break,
                };
                if token == self.eos {
                    break;
                }
                tokens.push(token);
                step_log_probs.push(lp);
            }
        }
        let log_prob = step_log_probs.iter().sum();
        Ok(Hypothesis {
            tokens,
            prefix_len: 1,
            step_log_probs,
            log_prob,
            score: log_prob,
        })
    }
}
