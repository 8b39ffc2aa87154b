extern crate quickcheck;

use std::sync::Arc;

use ahash::AHashSet;
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView3};
use quickcheck::{QuickCheck, TestResult, Testable};

use namegrams::config::{NGramConfig, SearchConfig};
use namegrams::context::truncate;
use namegrams::counter::Representation;
use namegrams::loader::SourceFile;
use namegrams::neural::{NeuralModelRunner, NumericGraph};
use namegrams::search::apply_repetition_penalty;
use namegrams::vocabulary::UNKNOWN_INDEX;
use namegrams::{
    BeamSearchGenerator, CancellationToken, Context, FastBpe, MemoryVocabulary, NGramModel, NGramModelRunner,
    NGramTrainer, PersistentVocabulary, Vocabulary,
};

fn qc<T: Testable>(f: T) {
    QuickCheck::new().tests(500).max_tests(5000).quickcheck(f);
}

const EOS: u32 = 1;
const VAR: u32 = 2;

fn strings(tokens: &[&str]) -> Vec<String> {
    tokens.iter().map(|t| t.to_string()).collect()
}

#[test]
fn truncation_keeps_a_usage_between_end_markers() {
    fn prop(body: Vec<u8>, max_len: u8, left_offset: u8) -> TestResult {
        let mut idxs = vec![EOS];
        idxs.extend(body.iter().map(|&b| if b % 5 == 0 { VAR } else { 10 + (b % 7) as u32 }));
        idxs.push(EOS);
        let max_len = 3 + (max_len % 30) as usize;
        if idxs.len() <= max_len || !idxs.contains(&VAR) {
            return TestResult::discard();
        }

        let window = truncate(&idxs, max_len, (left_offset % 8) as usize, VAR, EOS);
        TestResult::from_bool(
            window.len() == max_len
                && window.contains(&VAR)
                && window[0] == EOS
                && window[max_len - 1] == EOS,
        )
    }
    qc(prop as fn(Vec<u8>, u8, u8) -> TestResult);
}

#[test]
fn vocabulary_round_trips_until_closed() {
    fn prop(words: Vec<String>) -> bool {
        let mut vocabulary = MemoryVocabulary::new();
        let indices: Vec<usize> = words.iter().map(|w| vocabulary.to_index(w)).collect();
        let round_trip = words.iter().zip(&indices).all(|(w, &i)| vocabulary.to_word(i) == *w);

        vocabulary.close();
        let size = vocabulary.size();
        let unseen = format!("{}#unseen", words.concat());
        round_trip && vocabulary.to_index(&unseen) == UNKNOWN_INDEX && vocabulary.size() == size
    }
    qc(prop as fn(Vec<String>) -> bool);
}

#[test]
fn repetition_penalty_never_raises_a_score() {
    fn prop(row: Vec<f32>, repeated: Vec<u8>, penalty: u8) -> TestResult {
        if row.iter().any(|x| !x.is_finite()) {
            return TestResult::discard();
        }
        let penalty = 1.0 + penalty as f32 / 10.0;
        let indices: AHashSet<usize> = repeated.into_iter().map(usize::from).collect();
        let before = Array1::from(row);
        let mut after = before.clone();
        apply_repetition_penalty(after.view_mut(), &indices, penalty);
        TestResult::from_bool(before.iter().zip(after.iter()).all(|(b, a)| a <= b))
    }
    qc(prop as fn(Vec<f32>, Vec<u8>, u8) -> TestResult);
}

#[test]
fn persistent_vocabulary_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let mut vocabulary = MemoryVocabulary::new();
    for word in ["</s>", "VAR_0", "int", "count@@", "er", "naïve"] {
        vocabulary.to_index(word);
    }
    let path = dir.path().join("vocabulary");
    PersistentVocabulary::save_vocabulary(&vocabulary, &path).unwrap();

    let persistent = PersistentVocabulary::open(&path, namegrams::vocabulary::UNKNOWN_TOKEN).unwrap();
    assert_eq!(persistent.size(), vocabulary.size());
    for i in 0..vocabulary.size() {
        assert_eq!(persistent.to_word(i), vocabulary.to_word(i));
    }
    assert!(persistent.close());
}

#[test]
fn scenario_vocabulary_from_tokens() {
    let vocabulary = MemoryVocabulary::build(["foo", "bar", "foo", "baz"], 0);
    assert_eq!(vocabulary.size(), 4);
    assert_eq!(vocabulary.count("foo"), Some(2));
}

#[test]
fn scenario_truncate_two_usages() {
    let mut vocabulary = MemoryVocabulary::new();
    for word in ["</s>", "VAR_0"] {
        vocabulary.to_index(word);
    }
    let context = Context::new(strings(&["int", "x", "=", "x", ";"]), vec![1, 3]).unwrap();
    let masked = context.with("VAR_0".to_string());
    let idxs: Vec<usize> = masked
        .tokens()
        .iter()
        .map(|t| vocabulary.to_index(t))
        .collect();
    let eos = vocabulary.index_of("</s>");
    let var = vocabulary.index_of("VAR_0");

    let window = truncate(&idxs, 4, 1, var, eos);
    assert_eq!(window, vec![eos, var, vocabulary.index_of("="), eos]);
}

#[test]
fn scenario_forget_then_learn_is_a_no_op() {
    let file = SourceFile::new(
        "Main.java",
        strings(&["int", "count", "=", "0", ";", "count", "+=", "step", ";"]),
        vec![1],
    );
    let mut trainer = NGramTrainer::new(NGramConfig {
        order: 4,
        ..NGramConfig::default()
    });
    trainer.learn_corpus(std::slice::from_ref(&file), false);
    let model = Arc::new(trainer.into_model().unwrap());
    let mut runner = NGramModelRunner::new(model.clone());

    let indices: Vec<u32> = file
        .tokens
        .iter()
        .map(|t| model.vocabulary().index_of(t) as u32)
        .collect();
    let grams: Vec<&[u32]> = (1..=4).flat_map(|n| indices.windows(n)).collect();
    let before: Vec<[u64; 2]> = grams.iter().map(|g| runner.counts(g)).collect();

    assert!(runner.forget_file_if_needed(&file));
    assert_eq!(runner.counts(&indices[..1])[0], 0);
    assert!(runner.learn_file_if_needed(&file));

    let after: Vec<[u64; 2]> = grams.iter().map(|g| runner.counts(g)).collect();
    assert_eq!(before, after);
    assert!(runner.is_pristine());
}

#[test]
fn scenario_bpe_is_deterministic() {
    let bpe = FastBpe::from_pairs(
        [("c", "o"), ("co", "u"), ("n", "t</w>"), ("cou", "nt</w>")]
            .iter()
            .map(|&(l, r)| (l.to_string(), r.to_string())),
    );
    let text = "int count = count + counter ;";
    let once = bpe.apply_bpe(text);
    for _ in 0..5 {
        assert_eq!(bpe.apply_bpe(text), once);
    }
    assert_eq!(namegrams::bpe::undo_bpe(&once), text);
}

#[test]
fn ngram_model_persists_in_both_representations() {
    let files = vec![
        SourceFile::new("a.py", strings(&["for", "item", "in", "items", ":", "print", "(", "item", ")"]), vec![1]),
        SourceFile::new("b.py", strings(&["for", "row", "in", "rows", ":", "print", "(", "row", ")"]), vec![1]),
    ];
    let config = NGramConfig {
        order: 3,
        ..NGramConfig::default()
    };
    let mut trainer = NGramTrainer::new(config.clone());
    trainer.learn_corpus(&files, false);
    let model = trainer.into_model().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let bytes = model.save(dir.path()).unwrap();
    assert!(bytes > 0);

    let context = Context::new(strings(&["for", "x", "in", "items", ":", "print", "(", "x", ")"]), vec![1, 7]).unwrap();
    let expected = NGramModelRunner::new(Arc::new(model)).suggest_names(&context, 10);
    assert_eq!(expected[0].name, "item");

    for representation in [Representation::Ram, Representation::Disk] {
        let loaded = NGramModel::load(dir.path(), config.clone(), representation).unwrap();
        assert_eq!(loaded.representation(), representation);
        let runner = NGramModelRunner::new(Arc::new(loaded));
        assert_eq!(runner.suggest_names(&context, 10), expected);
    }
}

/// Logits that depend only on the decoded prefix, through a fixed mixing function.
struct Hashing {
    vocabulary: usize,
}

impl NumericGraph for Hashing {
    fn encode(&self, tokens: ArrayView2<i64>, _: ArrayView1<i64>) -> anyhow::Result<Array3<f32>> {
        Ok(Array3::from_shape_fn((tokens.nrows(), tokens.ncols(), 1), |(b, l, _)| {
            tokens[[b, l]] as f32
        }))
    }

    fn decode(
        &self,
        tokens: ArrayView2<i64>,
        lengths: ArrayView1<i64>,
        _: ArrayView3<f32>,
        _: ArrayView1<i64>,
    ) -> anyhow::Result<Array2<f32>> {
        Ok(Array2::from_shape_fn((tokens.nrows(), self.vocabulary), |(b, v)| {
            let mut h: u64 = 1469598103934665603;
            for l in 0..lengths[b] as usize {
                h = (h ^ tokens[[b, l]] as u64).wrapping_mul(1099511628211);
            }
            h = (h ^ v as u64).wrapping_mul(1099511628211);
            (h % 1000) as f32 / 100.0
        }))
    }
}

fn generator(config: SearchConfig) -> BeamSearchGenerator {
    let mut vocabulary = MemoryVocabulary::new();
    for word in ["</s>", "VAR_0", "|", "get@@", "Get@@", "value", "name", "file@@", "s", "id"] {
        vocabulary.to_index(word);
    }
    vocabulary.close();
    let runner = NeuralModelRunner::new(Arc::new(Hashing {
        vocabulary: vocabulary.size(),
    }));
    BeamSearchGenerator::new(runner, Arc::new(vocabulary), config)
}

#[test]
fn beam_search_is_deterministic() {
    let generator = generator(SearchConfig {
        early_stopping: false,
        ..SearchConfig::default()
    });
    let source = [1, 5, 2, 6, 1];
    let cancel = CancellationToken::new();
    let first = generator.generate(&source, &cancel).unwrap();
    let second = generator.generate(&source, &cancel).unwrap();
    assert!(!first.is_empty());
    assert_eq!(first, second);
}

#[test]
fn beam_search_terminates_within_bounds() {
    for beam_size in [1, 2, 5] {
        for max_length in [1, 3, 6] {
            for early_stopping in [false, true] {
                let config = SearchConfig {
                    beam_size,
                    max_length,
                    early_stopping,
                    ..SearchConfig::default()
                };
                let hyps = generator(config).generate(&[1, 7, 2, 1], &CancellationToken::new()).unwrap();
                assert!(hyps.len() <= beam_size);
                for hyp in &hyps {
                    assert!(hyp.generated().len() <= max_length);
                    assert!(!hyp.generated().contains(&3));
                    assert_eq!(&hyp.tokens[..2], &[1, 2]);
                }
                assert!(hyps.windows(2).all(|w| w[0].score >= w[1].score));
            }
        }
    }
}
