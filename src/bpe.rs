pub mod escape;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use ahash::AHashMap;
use rayon::prelude::*;

use crate::error::{Error, Result};

/// Continuation marker appended to every non-final piece of a split word.
pub const TOKEN_DELIM: &str = "@@";
const END_WORD: &str = "</w>";

/// Byte-pair encoder driven by a fixed, ordered list of merge rules.
///
/// The rank of a merge is its line number in the codes file; lower ranks merge first.
#[derive(Clone, Debug, Default)]
pub struct FastBpe {
    codes: AHashMap<(String, String), usize>,
    reversed_codes: AHashMap<String, (String, String)>,
    vocab: AHashMap<String, usize>,
}

fn read_lines(path: &Path) -> Result<Vec<(usize, String)>> {
    let reader = BufReader::new(File::open(path)?);
    let mut lines = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if !line.trim().is_empty() {
            lines.push((i + 1, line));
        }
    }
    Ok(lines)
}

impl FastBpe {
    /// Loads merge rules (`left right [count]` per line) and, optionally, a subword
    /// vocabulary (`subword count` per line) that limits which merged pieces may be emitted.
    pub fn from_files(codes_path: &Path, vocab_path: Option<&Path>) -> Result<Self> {
        let mut pairs = Vec::new();
        for (line_no, line) in read_lines(codes_path)? {
            let mut split = line.split(' ');
            match (split.next(), split.next()) {
                (Some(left), Some(right)) if !left.is_empty() && !right.is_empty() => {
                    pairs.push((left.to_string(), right.to_string()))
                }
                _ => {
                    return Err(Error::CorruptVocabulary {
                        path: codes_path.to_path_buf(),
                        line: line_no,
                        reason: "expected a pair of symbols".into(),
                    })
                }
            }
        }
        let mut bpe = Self::from_pairs(pairs);

        if let Some(vocab_path) = vocab_path {
            for (line_no, line) in read_lines(vocab_path)? {
                let mut split = line.split(' ');
                let (word, count) = match (split.next(), split.next().map(str::parse::<usize>)) {
                    (Some(word), Some(Ok(count))) => (word.to_string(), count),
                    _ => {
                        return Err(Error::CorruptVocabulary {
                            path: vocab_path.to_path_buf(),
                            line: line_no,
                            reason: "expected `subword count`".into(),
                        })
                    }
                };
                bpe.vocab.insert(word, count);
            }
        }
        log::info!(
            "loaded {} BPE merges from {:?} ({} vocabulary entries)",
            bpe.codes.len(),
            codes_path,
            bpe.vocab.len()
        );
        Ok(bpe)
    }

    /// Builds an encoder from merge rules in rank order. Repeated rules keep their first rank.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut bpe = Self::default();
        for (left, right) in pairs {
            if bpe.codes.contains_key(&(left.clone(), right.clone())) {
                continue;
            }
            let rank = bpe.codes.len();
            bpe.reversed_codes
                .entry(format!("{}{}", left, right))
                .or_insert_with(|| (left.clone(), right.clone()));
            bpe.codes.insert((left, right), rank);
        }
        bpe
    }

    pub fn num_merges(&self) -> usize {
        self.codes.len()
    }

    /// Splits every whitespace-separated word of `text` into subwords, marking non-final
    /// pieces with `@@`. Distinct words are encoded in parallel; the output is deterministic.
    pub fn apply_bpe(&self, text: &str) -> String {
        let words: Vec<&str> = text.split_whitespace().collect();
        let mut unique = words.clone();
        unique.sort_unstable();
        unique.dedup();

        let encoded: Vec<String> = unique.par_iter().map(|w| self.encode_word(w)).collect();
        words
            .iter()
            .filter_map(|w| unique.binary_search(w).ok().map(|i| encoded[i].as_str()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Encodes one word. Markup from the escape table is cut out first and emitted verbatim.
    fn encode_word(&self, word: &str) -> String {
        let escaped = escape::escape(word);
        let pieces: Vec<String> = escaped
            .split_whitespace()
            .map(|piece| match escape::unescape(piece) {
                Some(markup) => markup.to_string(),
                None => self.process_word(piece),
            })
            .collect();
        pieces.join(&format!("{} ", TOKEN_DELIM))
    }

    fn process_word(&self, word: &str) -> String {
        let mut subwords: Vec<String> = word.chars().map(String::from).collect();
        if let Some(last) = subwords.last_mut() {
            last.push_str(END_WORD);
        }

        while subwords.len() > 1 {
            let best = subwords
                .windows(2)
                .filter_map(|w| self.codes.get(&(w[0].clone(), w[1].clone())))
                .min()
                .copied();
            let best = match best {
                Some(rank) => rank,
                None => break,
            };

            let mut merged = Vec::with_capacity(subwords.len());
            let mut i = 0;
            while i < subwords.len() {
                if i + 1 < subwords.len()
                    && self.codes.get(&(subwords[i].clone(), subwords[i + 1].clone()))
                        == Some(&best)
                {
                    merged.push(format!("{}{}", subwords[i], subwords[i + 1]));
                    i += 2;
                } else {
                    merged.push(subwords[i].clone());
                    i += 1;
                }
            }
            subwords = merged;
        }

        if !self.vocab.is_empty() {
            subwords = self.limit_vocab(subwords);
        }

        let mut out = subwords.join(&format!("{} ", TOKEN_DELIM));
        if out.ends_with(END_WORD) {
            out.truncate(out.len() - END_WORD.len());
        }
        out
    }

    fn in_vocab(&self, subword: &str, is_final: bool) -> bool {
        if is_final {
            self.vocab
                .contains_key(subword.strip_suffix(END_WORD).unwrap_or(subword))
        } else {
            self.vocab
                .contains_key(&format!("{}{}", subword, TOKEN_DELIM))
        }
    }

    fn limit_vocab(&self, subwords: Vec<String>) -> Vec<String> {
        let last = subwords.len().saturating_sub(1);
        let mut limited = Vec::with_capacity(subwords.len());
        for (i, subword) in subwords.into_iter().enumerate() {
            if self.in_vocab(&subword, i == last) {
                limited.push(subword);
            } else {
                self.decompose(&subword, &mut limited, i == last);
            }
        }
        limited
    }

    /// Splits a merged subword back through the merge that produced it until every piece is
    /// in the vocabulary or is a single symbol.
    fn decompose(&self, subword: &str, out: &mut Vec<String>, is_final: bool) {
        let (left, right) = match self.reversed_codes.get(subword) {
            Some(pair) => pair,
            None => {
                out.push(subword.to_string());
                return;
            }
        };
        if self.in_vocab(left, false) {
            out.push(left.clone());
        } else {
            self.decompose(left, out, false);
        }
        if self.in_vocab(right, is_final) {
            out.push(right.clone());
        } else {
            self.decompose(right, out, is_final);
        }
    }
}

/// Reverses BPE by collapsing `@@ ` continuation markers.
pub fn undo_bpe(text: &str) -> String {
    let joined = text.replace(&format!("{} ", TOKEN_DELIM), "");
    joined
        .strip_suffix(TOKEN_DELIM)
        .map(str::to_string)
        .unwrap_or(joined)
}
