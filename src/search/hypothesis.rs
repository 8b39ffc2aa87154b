/// A token sequence with its cumulative log-probability.
///
/// `tokens` starts with the fixed decoder prefix; only the tokens after it were generated.
#[derive(Clone, Debug, PartialEq)]
pub struct Hypothesis {
    pub tokens: Vec<usize>,
    pub prefix_len: usize,
    /// Log-probability of each decoding step, a closing end-of-sequence included even though
    /// it is not kept in `tokens`.
    pub step_log_probs: Vec<f32>,
    /// Sum of `step_log_probs`.
    pub log_prob: f32,
    /// Length-penalized score used for ranking.
    pub score: f32,
}

impl Hypothesis {
    pub fn generated(&self) -> &[usize] {
        &self.tokens[self.prefix_len.min(self.tokens.len())..]
    }
}

pub(crate) fn length_penalized(log_prob: f32, len: usize, length_penalty: f32) -> f32 {
    log_prob / (len.max(1) as f32).powf(length_penalty)
}

/// Pool of the `beam_size` best finished hypotheses.
#[derive(Clone, Debug)]
pub struct BeamHypotheses {
    beam_size: usize,
    max_length: usize,
    length_penalty: f32,
    early_stopping: bool,
    hyps: Vec<Hypothesis>,
    worst_score: f32,
}

impl BeamHypotheses {
    /// `max_length` is the longest total sequence a hypothesis can reach, prefix included.
    pub fn new(beam_size: usize, max_length: usize, length_penalty: f32, early_stopping: bool) -> Self {
        Self {
            beam_size,
            max_length,
            length_penalty,
            early_stopping,
            hyps: Vec::with_capacity(beam_size + 1),
            worst_score: 1e9,
        }
    }

    pub fn len(&self) -> usize {
        self.hyps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hyps.is_empty()
    }

    pub fn worst_score(&self) -> f32 {
        self.worst_score
    }

    /// Offers a finished hypothesis. It is kept if the pool is not full or if it beats the
    /// current worst, which is then evicted.
    pub fn add(&mut self, tokens: Vec<usize>, prefix_len: usize, step_log_probs: Vec<f32>) {
        let log_prob: f32 = step_log_probs.iter().sum();
        let score = length_penalized(log_prob, tokens.len(), self.length_penalty);
        if self.hyps.len() >= self.beam_size && score <= self.worst_score {
            return;
        }
        self.hyps.push(Hypothesis {
            tokens,
            prefix_len,
            step_log_probs,
            log_prob,
            score,
        });
        if self.hyps.len() > self.beam_size {
            // Evict the oldest among equally bad hypotheses.
            let mut worst = 0;
            for (i, hyp) in self.hyps.iter().enumerate() {
                if hyp.score < self.hyps[worst].score {
                    worst = i;
                }
            }
            self.hyps.remove(worst);
            self.worst_score = self
                .hyps
                .iter()
                .map(|hyp| hyp.score)
                .fold(f32::INFINITY, f32::min);
        } else {
            self.worst_score = self.worst_score.min(score);
        }
    }

    /// Whether no open beam can still improve the pool. `best_log_prob` is the cumulative
    /// log-probability of the best open beam.
    pub fn is_done(&self, best_log_prob: f32) -> bool {
        if self.hyps.len() < self.beam_size {
            return false;
        }
        if self.early_stopping {
            return true;
        }
        self.worst_score >= length_penalized(best_log_prob, self.max_length, self.length_penalty)
    }

    /// Finished hypotheses, best first. Equal scores keep the order they finished in.
    pub fn into_sorted(mut self) -> Vec<Hypothesis> {
        self.hyps.sort_by(|a, b| b.score.total_cmp(&a.score));
        self.hyps
    }
}
