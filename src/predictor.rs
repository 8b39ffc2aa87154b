use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::bpe::{undo_bpe, TOKEN_DELIM};
use crate::cache::TtlCache;
use crate::config::{EngineConfig, SearchConfig, ServiceConfig};
use crate::context::{Context, ContextAssembler};
use crate::contributor::{NameProbability, Prediction, Source, NEURAL_PRIORITY};
use crate::error::Result;
use crate::neural::{NeuralModelRunner, NumericGraph};
use crate::search::{BeamSearchGenerator, CancellationToken, Hypothesis};

/// Suggests names with a sequence-to-sequence model: the context is assembled into subword
/// indices, decoded by beam search and turned back into identifiers.
///
/// Results are cached by assembled input, so the same context is decoded once per TTL.
pub struct NeuralNamePredictor {
    assembler: ContextAssembler,
    generator: BeamSearchGenerator,
    cache: TtlCache<Vec<usize>, Vec<Prediction>>,
}

impl NeuralNamePredictor {
    pub fn new(
        assembler: ContextAssembler,
        runner: NeuralModelRunner,
        search: SearchConfig,
        service: &ServiceConfig,
    ) -> Self {
        let generator = BeamSearchGenerator::new(runner, assembler.vocabulary().clone(), search);
        Self {
            assembler,
            generator,
            cache: TtlCache::new(service.cache_size, Duration::from_secs(service.cache_ttl_secs)),
        }
    }

    /// Loads BPE codes and the subword vocabulary from `model_dir`; `graph` runs the network.
    pub fn load(model_dir: &Path, graph: Arc<dyn NumericGraph>, config: &EngineConfig) -> Result<Self> {
        let start = Instant::now();
        let assembler = ContextAssembler::from_model_dir(model_dir, config.context.clone())?;
        log::info!(
            "loaded neural model {:?} ({} subwords, {} merges) in {:.2?}",
            model_dir,
            assembler.vocabulary().size(),
            assembler.bpe().num_merges(),
            start.elapsed()
        );
        Ok(Self::new(
            assembler,
            NeuralModelRunner::new(graph),
            config.search.clone(),
            &config.service,
        ))
    }

    pub fn assembler(&self) -> &ContextAssembler {
        &self.assembler
    }

    pub fn generator(&self) -> &BeamSearchGenerator {
        &self.generator
    }

    /// Identifier spelled by the generated subwords, if they form exactly one word.
    fn to_name(&self, generated: &[usize]) -> Option<String> {
        let words = self.assembler.vocabulary().to_words(generated);
        // A dangling continuation marker means the name was cut off.
        if words.last().map_or(true, |w| w.ends_with(TOKEN_DELIM)) {
            return None;
        }
        let joined = undo_bpe(&words.join(" "));
        let mut parts = joined.split(' ');
        match (parts.next(), parts.next()) {
            (Some(name), None) if !name.is_empty() && !name.contains(TOKEN_DELIM) => Some(name.to_string()),
            _ => None,
        }
    }

    /// Turns finished hypotheses into names with renormalized probabilities. Hypotheses
    /// spelling the same name add up.
    fn to_predictions(&self, hypotheses: &[Hypothesis]) -> Vec<Prediction> {
        let mut predictions: Vec<Prediction> = Vec::new();
        for hyp in hypotheses {
            let name = match self.to_name(hyp.generated()) {
                Some(name) => name,
                None => continue,
            };
            let probability = f64::from(hyp.score).exp();
            match predictions.iter_mut().find(|p| p.name == name) {
                Some(existing) => existing.probability += probability,
                None => predictions.push(Prediction {
                    name,
                    probability,
                    priority: NEURAL_PRIORITY,
                    source: Source::Neural,
                }),
            }
        }
        let total: f64 = predictions.iter().map(|p| p.probability).sum();
        if total > 0.0 {
            for p in &mut predictions {
                p.probability /= total;
            }
        }
        predictions.sort_by(|a, b| b.probability.total_cmp(&a.probability));
        predictions
    }

    /// Ranked names for the variable whose usages are marked in `context`.
    pub fn predict<S: AsRef<str>>(&self, context: &Context<S>, cancel: &CancellationToken) -> Result<Vec<Prediction>> {
        let source = self.assembler.assemble(context);
        if source.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(cached) = self.cache.get(&source) {
            return Ok(cached);
        }
        let hypotheses = self.generator.generate(&source, cancel)?;
        let predictions = self.to_predictions(&hypotheses);
        log::debug!(
            "{} hypotheses gave {} names for {} source subwords",
            hypotheses.len(),
            predictions.len(),
            source.len()
        );
        if !cancel.is_cancelled() {
            self.cache.insert(source, predictions.clone());
        }
        Ok(predictions)
    }

    /// Probability of the name currently written at the first usage among the predictions.
    pub fn get_probability<S: AsRef<str>>(
        &self,
        context: &Context<S>,
        cancel: &CancellationToken,
    ) -> Result<NameProbability> {
        let current = match context.var_idxs().first() {
            Some(&first) => context.tokens()[first].as_ref(),
            None => return Ok(NameProbability::default()),
        };
        let probability = self
            .predict(context, cancel)?
            .iter()
            .find(|p| p.name == current)
            .map_or(0.0, |p| p.probability);
        Ok(NameProbability {
            probability,
            log_probability: probability.ln(),
            priority: NEURAL_PRIORITY,
        })
    }

    /// Greedy decoding of the context, if it spells a single identifier.
    pub fn predict_greedy<S: AsRef<str>>(&self, context: &Context<S>) -> Result<Option<String>> {
        let source = self.assembler.assemble(context);
        if source.is_empty() {
            return Ok(None);
        }
        let hyp = self.generator.predict_greedy(&source)?;
        Ok(self.to_name(hyp.generated()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bpe::FastBpe;
    use crate::config::ContextConfig;
    use crate::vocabulary::{MemoryVocabulary, Vocabulary};
    use float_cmp::approx_eq;
    use ndarray::{Array2, Array3, ArrayView1, ArrayView2, ArrayView3};

    // 0 <unk>, 1 </s>, 2 VAR_0, 3 file@@, 4 name, 5 int, 6 =, 7 ;, 8 count
    fn vocabulary() -> MemoryVocabulary {
        let mut vocabulary = MemoryVocabulary::new();
        for word in ["</s>", "VAR_0", "file@@", "name", "int", "=", ";", "count"] {
            vocabulary.to_index(word);
        }
        vocabulary.close();
        vocabulary
    }

    /// Spells "file@@ name", or "count" as the runner-up, then ends.
    struct Speller;

    impl NumericGraph for Speller {
        fn encode(&self, tokens: ArrayView2<i64>, _: ArrayView1<i64>) -> anyhow::Result<Array3<f32>> {
            Ok(Array3::zeros((tokens.nrows(), tokens.ncols(), 1)))
        }

        fn decode(
            &self,
            tokens: ArrayView2<i64>,
            lengths: ArrayView1<i64>,
            _: ArrayView3<f32>,
            _: ArrayView1<i64>,
        ) -> anyhow::Result<Array2<f32>> {
            Ok(Array2::from_shape_fn((lengths.len(), 9), |(b, v)| {
                let last = tokens[[b, lengths[b] as usize - 1]];
                let preferred: &[usize] = match last {
                    2 => &[3, 8],
                    3 => &[4],
                    _ => &[1],
                };
                match preferred.iter().position(|&p| p == v) {
                    Some(0) => 5.0,
                    Some(_) => 4.0,
                    None if v == 0 || v == 2 => f32::NEG_INFINITY,
                    None => 0.0,
                }
            }))
        }
    }

    fn predictor() -> NeuralNamePredictor {
        let assembler = ContextAssembler::new(
            FastBpe::from_pairs(Vec::<(String, String)>::new()),
            Arc::new(vocabulary()),
            ContextConfig::default(),
        );
        NeuralNamePredictor::new(
            assembler,
            NeuralModelRunner::new(Arc::new(Speller)),
            SearchConfig {
                beam_size: 4,
                max_length: 4,
                ..SearchConfig::default()
            },
            &ServiceConfig::default(),
        )
    }

    fn context(name: &str) -> Context<String> {
        let tokens = ["int", name, "=", name, ";"];
        Context::new(tokens.iter().map(|t| t.to_string()).collect(), vec![1, 3]).unwrap()
    }

    #[test]
    fn test_to_name() {
        let predictor = predictor();
        assert_eq!(predictor.to_name(&[3, 4]), Some("filename".to_string()));
        assert_eq!(predictor.to_name(&[4, 8]), None);
        assert_eq!(predictor.to_name(&[3]), None);
        assert_eq!(predictor.to_name(&[]), None);
    }

    #[test]
    fn test_predict_renormalizes() {
        let predictor = predictor();
        let predictions = predictor.predict(&context("x"), &CancellationToken::new()).unwrap();
        assert_eq!(predictions[0].name, "filename");
        assert!(predictions.iter().any(|p| p.name == "count"));
        assert!(predictions.iter().all(|p| p.source == Source::Neural));
        let total: f64 = predictions.iter().map(|p| p.probability).sum();
        assert!(approx_eq!(f64, total, 1.0, epsilon = 1e-9));
    }

    #[test]
    fn test_predictions_are_cached() {
        let predictor = predictor();
        let cancel = CancellationToken::new();
        let first = predictor.predict(&context("x"), &cancel).unwrap();
        assert_eq!(predictor.cache.len(), 1);
        // The name at the usages is masked, so another name hits the same entry.
        let second = predictor.predict(&context("y"), &cancel).unwrap();
        assert_eq!(first, second);
        assert_eq!(predictor.cache.len(), 1);
    }

    #[test]
    fn test_cancelled_predictions_are_not_cached() {
        let predictor = predictor();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(predictor.predict(&context("x"), &cancel).unwrap().is_empty());
        assert!(predictor.cache.is_empty());
    }

    #[test]
    fn test_get_probability() {
        let predictor = predictor();
        let cancel = CancellationToken::new();
        let named = predictor.get_probability(&context("filename"), &cancel).unwrap();
        assert!(named.probability > 0.5);
        assert_eq!(named.priority, NEURAL_PRIORITY);

        let unknown = predictor.get_probability(&context("zzz"), &cancel).unwrap();
        assert_eq!(unknown.probability, 0.0);
        assert_eq!(unknown.log_probability, f64::NEG_INFINITY);
    }

    #[test]
    fn test_predict_greedy() {
        let predictor = predictor();
        // Greedy decoding starts without the placeholder and ends at once.
        assert_eq!(predictor.predict_greedy(&context("x")).unwrap(), None);
    }
}
