use ahash::AHashSet;
use ndarray::{Array2, ArrayViewMut1};

use crate::bpe::TOKEN_DELIM;
use crate::config::SearchConfig;
use crate::search::hypothesis::{BeamHypotheses, Hypothesis};
use crate::search::numeric::top_k;
use crate::vocabulary::Vocabulary;

fn capitalize_first(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn lowercase_first(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Spellings of a subword that count as repeating it: case changes, with and without the
/// continuation marker.
pub fn case_variants(word: &str) -> Vec<String> {
    let cased = [
        word.to_string(),
        word.to_uppercase(),
        word.to_lowercase(),
        capitalize_first(word),
        lowercase_first(word),
    ];
    let mut variants: Vec<String> = Vec::with_capacity(cased.len() * 2);
    for form in cased {
        let other = match form.strip_suffix(TOKEN_DELIM) {
            Some(stripped) => stripped.to_string(),
            None => format!("{}{}", form, TOKEN_DELIM),
        };
        for v in [form, other] {
            if !v.is_empty() && !variants.contains(&v) {
                variants.push(v);
            }
        }
    }
    variants
}

/// Vocabulary indices of every case variant of the `generated` tokens.
pub fn repeated_indices<V: Vocabulary + ?Sized>(vocabulary: &V, generated: &[usize]) -> AHashSet<usize> {
    let mut indices = AHashSet::new();
    for &token in generated {
        for variant in case_variants(&vocabulary.to_word(token)) {
            if let Some(index) = vocabulary.get(&variant) {
                indices.insert(index);
            }
        }
    }
    indices
}

/// Pushes the scores at `indices` toward less likely: negative log-probabilities are
/// multiplied by `penalty`, positive scores divided by it.
pub fn apply_repetition_penalty(mut row: ArrayViewMut1<f32>, indices: &AHashSet<usize>, penalty: f32) {
    for &index in indices {
        if let Some(score) = row.get_mut(index) {
            *score = if *score < 0.0 {
                *score * penalty
            } else {
                *score / penalty
            };
        }
    }
}

/// An open hypothesis.
#[derive(Clone, Debug, PartialEq)]
pub struct Beam {
    pub tokens: Vec<usize>,
    pub step_log_probs: Vec<f32>,
    pub log_prob: f32,
}

/// Beam search state between decoder calls.
pub struct BeamSearch {
    beam_size: usize,
    max_length: usize,
    prefix_len: usize,
    eos: usize,
    separator: Option<usize>,
    beams: Vec<Beam>,
    finished: BeamHypotheses,
    done: bool,
}

impl BeamSearch {
    /// Starts from a single beam holding `prefix`. `max_length` in `config` bounds the number
    /// of generated tokens.
    pub fn new(prefix: Vec<usize>, eos: usize, separator: Option<usize>, config: &SearchConfig) -> Self {
        let prefix_len = prefix.len();
        let finished = BeamHypotheses::new(
            config.beam_size,
            prefix_len + config.max_length,
            config.length_penalty,
            config.early_stopping,
        );
        Self {
            beam_size: config.beam_size,
            max_length: config.max_length,
            prefix_len,
            eos,
            separator,
            beams: vec![Beam {
                tokens: prefix,
                step_log_probs: Vec::new(),
                log_prob: 0.0,
            }],
            finished,
            done: false,
        }
    }

    pub fn beams(&self) -> &[Beam] {
        &self.beams
    }

    pub fn prefix_len(&self) -> usize {
        self.prefix_len
    }

    pub fn finished(&self) -> &BeamHypotheses {
        &self.finished
    }

    pub fn is_done(&self) -> bool {
        self.done || self.beams.is_empty()
    }

    /// Advances every beam by one token. `log_probs` has one row of next-token
    /// log-probabilities per open beam, penalties already applied.
    pub fn step(&mut self, log_probs: &Array2<f32>) {
        if self.is_done() {
            return;
        }
        let vocabulary = log_probs.ncols();
        if vocabulary == 0 || log_probs.nrows() != self.beams.len() {
            log::warn!(
                "decoder returned {:?} scores for {} beams, stopping",
                log_probs.dim(),
                self.beams.len()
            );
            self.done = true;
            return;
        }

        let mut scores = Vec::with_capacity(self.beams.len() * vocabulary);
        for (beam, row) in self.beams.iter().zip(log_probs.rows()) {
            scores.extend(row.iter().map(|&lp| beam.log_prob + lp));
        }

        let mut survivors = Vec::with_capacity(self.beam_size);
        for (flat, score) in top_k(&scores, 2 * self.beam_size) {
            if !score.is_finite() {
                continue;
            }
            let (row, token) = (flat / vocabulary, flat % vocabulary);
            if Some(token) == self.separator {
                continue;
            }
            let beam = &self.beams[row];
            let mut step_log_probs = Vec::with_capacity(beam.step_log_probs.len() + 1);
            step_log_probs.extend_from_slice(&beam.step_log_probs);
            step_log_probs.push(log_probs[[row, token]]);
            if token == self.eos {
                self.finished.add(beam.tokens.clone(), self.prefix_len, step_log_probs);
            } else {
                let mut tokens = Vec::with_capacity(beam.tokens.len() + 1);
                tokens.extend_from_slice(&beam.tokens);
                tokens.push(token);
                if tokens.len() - self.prefix_len >= self.max_length {
                    self.finished.add(tokens, self.prefix_len, step_log_probs);
                } else {
                    survivors.push(Beam {
                        tokens,
                        step_log_probs,
                        log_prob: score,
                    });
                }
            }
            if survivors.len() == self.beam_size {
                break;
            }
        }

        self.done = match survivors.first() {
            Some(best) => self.finished.is_done(best.log_prob),
            None => true,
        };
        self.beams = survivors;
    }

    /// Finished hypotheses, best first.
    pub fn finish(self) -> Vec<Hypothesis> {
        self.finished.into_sorted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocabulary::MemoryVocabulary;
    use float_cmp::approx_eq;
    use ndarray::{array, Array1};

    fn config(beam_size: usize, max_length: usize) -> SearchConfig {
        SearchConfig {
            beam_size,
            max_length,
            length_penalty: 1.0,
            repetition_penalty: 8.0,
            early_stopping: false,
        }
    }

    #[test]
    fn test_case_variants() {
        let variants = case_variants("file@@");
        for expected in ["file@@", "FILE@@", "File@@", "file", "FILE", "File"] {
            assert!(variants.contains(&expected.to_string()), "{}", expected);
        }
        let variants = case_variants("Name");
        for expected in ["Name", "NAME", "name", "Name@@", "name@@", "NAME@@"] {
            assert!(variants.contains(&expected.to_string()), "{}", expected);
        }
        assert_eq!(variants.len(), 6);
    }

    #[test]
    fn test_repetition_penalty_lowers_repeats() {
        let mut vocabulary = MemoryVocabulary::new();
        for word in ["file@@", "File", "name", "FILE@@"] {
            vocabulary.to_index(word);
        }
        let repeated = repeated_indices(&vocabulary, &[1]);
        let mut expected: Vec<_> = repeated.iter().copied().collect();
        expected.sort_unstable();
        assert_eq!(expected, vec![1, 2, 4]);

        let before = array![-0.1f32, -0.5, 0.4, -2.0, 0.0];
        let mut after = before.clone();
        apply_repetition_penalty(after.view_mut(), &repeated, 8.0);
        assert_eq!(after, array![-0.1f32, -4.0, 0.05, -2.0, 0.0]);
        for i in 0..before.len() {
            assert!(after[i] <= before[i]);
        }

        let mut short = Array1::from(vec![-1.0f32]);
        apply_repetition_penalty(short.view_mut(), &repeated, 8.0);
        assert_eq!(short[0], -1.0);
    }

    #[test]
    fn test_step_finishes_on_eos_and_skips_separator() {
        // eos = 0, separator = 3
        let mut search = BeamSearch::new(vec![0, 1], 0, Some(3), &config(2, 5));
        let ln = |p: f32| p.ln();
        search.step(&array![[ln(0.4), ln(0.05), ln(0.2), ln(0.3), ln(0.05)]]);
        assert_eq!(search.finished().len(), 1);
        assert_eq!(
            search.beams().iter().map(|b| b.tokens.clone()).collect::<Vec<_>>(),
            vec![vec![0, 1, 2], vec![0, 1, 1]]
        );
        assert!(!search.is_done());
    }

    #[test]
    fn test_max_length_finishes_every_beam() {
        let mut search = BeamSearch::new(vec![0, 1], 0, None, &config(2, 2));
        let row = [-3.0f32, -1.0, -2.0];
        search.step(&array![row]);
        assert_eq!(search.beams().len(), 2);
        search.step(&array![row, row]);
        assert!(search.is_done());
        let hyps = search.finish();
        assert_eq!(hyps.len(), 2);
        for hyp in &hyps {
            assert!(hyp.generated().len() <= 2);
        }
        assert!(hyps[0].score >= hyps[1].score);
    }

    #[test]
    fn test_step_log_probs_add_up() {
        // eos = 0
        let mut search = BeamSearch::new(vec![0, 1], 0, None, &config(2, 3));
        let ln = |p: f32| p.ln();
        search.step(&array![[ln(0.1), ln(0.2), ln(0.3), ln(0.4)]]);
        for beam in search.beams() {
            assert_eq!(beam.step_log_probs.len(), 1);
            assert_eq!(beam.step_log_probs[0], beam.log_prob);
        }
        let row = [ln(0.5), ln(0.1), ln(0.15), ln(0.25)];
        search.step(&array![row, row]);
        search.step(&Array2::from_shape_fn((search.beams().len(), 4), |(_, v)| row[v]));

        let hyps = search.finish();
        assert!(!hyps.is_empty());
        for hyp in &hyps {
            let total: f32 = hyp.step_log_probs.iter().sum();
            assert!(approx_eq!(f32, total, hyp.log_prob, epsilon = 1e-5));
            // A hypothesis closed by end-of-sequence has one step more than tokens.
            let closed = usize::from(hyp.generated().len() < 3);
            assert_eq!(hyp.step_log_probs.len(), hyp.generated().len() + closed);
        }
    }

    #[test]
    fn test_early_stopping() {
        let mut search = BeamSearch::new(
            vec![0],
            0,
            None,
            &SearchConfig {
                early_stopping: true,
                ..config(1, 10)
            },
        );
        search.step(&array![[-0.1f32, -1.0]]);
        assert!(search.is_done());
        assert_eq!(search.finish()[0].tokens, vec![0]);
    }
}
