use ahash::AHashMap;

use crate::vocabulary::{Vocabulary, UNKNOWN_INDEX, UNKNOWN_TOKEN};

/// In-memory [`Vocabulary`] backed by a `HashMap` and a word list.
///
/// The vocabulary is open by default: [`Vocabulary::to_index`] allocates the next dense index
/// for every unseen token. Once closed, unseen tokens map to [`UNKNOWN_INDEX`] and the
/// vocabulary no longer grows. Counts are informative only and are not used by any model.
#[derive(Clone, Debug)]
pub struct MemoryVocabulary {
    word_indices: AHashMap<String, usize>,
    words: Vec<String>,
    counts: Vec<usize>,
    closed: bool,
    checkpoint: usize,
}

impl Default for MemoryVocabulary {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryVocabulary {
    /// Creates an open vocabulary holding only the unknown token.
    pub fn new() -> Self {
        let mut vocab = Self {
            word_indices: AHashMap::new(),
            words: Vec::new(),
            counts: Vec::new(),
            closed: false,
            checkpoint: 0,
        };
        vocab.add_unknown();
        vocab
    }

    /// Builds a vocabulary from a token stream, keeping tokens seen at least `cutoff` times.
    ///
    /// Indices follow first-seen order of the kept tokens.
    pub fn build<I, S>(tokens: I, cutoff: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut order: Vec<String> = Vec::new();
        let mut counts: AHashMap<String, usize> = AHashMap::new();
        for token in tokens {
            let token = token.as_ref();
            match counts.get_mut(token) {
                Some(count) => *count += 1,
                None => {
                    counts.insert(token.to_string(), 1);
                    order.push(token.to_string());
                }
            }
        }

        let mut vocab = Self::new();
        for token in order {
            let count = counts[&token];
            if count >= cutoff {
                vocab.store(&token, count);
            }
        }
        vocab
    }

    fn add_unknown(&mut self) {
        self.word_indices.insert(UNKNOWN_TOKEN.to_string(), UNKNOWN_INDEX);
        self.words.push(UNKNOWN_TOKEN.to_string());
        self.counts.push(0);
    }

    fn push(&mut self, token: &str, count: usize) -> usize {
        let index = self.words.len();
        self.word_indices.insert(token.to_string(), index);
        self.words.push(token.to_string());
        self.counts.push(count);
        index
    }

    pub fn open(&mut self) {
        self.closed = false;
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Marks the current size as the point [`MemoryVocabulary::restore_checkpoint`] rolls back to.
    pub fn set_checkpoint(&mut self) {
        self.checkpoint = self.words.len();
    }

    /// Removes, last added first, every entry added after the checkpoint.
    pub fn restore_checkpoint(&mut self) {
        while self.words.len() > self.checkpoint.max(1) {
            if let Some(word) = self.words.pop() {
                self.counts.pop();
                self.word_indices.remove(&word);
            }
        }
    }

    /// Empties the vocabulary back to the unknown token and reopens it.
    pub fn clear(&mut self) {
        self.word_indices.clear();
        self.words.clear();
        self.counts.clear();
        self.checkpoint = 0;
        self.open();
        self.add_unknown();
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn counts(&self) -> &[usize] {
        &self.counts
    }
}

impl Vocabulary for MemoryVocabulary {
    fn size(&self) -> usize {
        self.words.len()
    }

    fn get(&self, token: &str) -> Option<usize> {
        self.word_indices.get(token).copied()
    }

    fn to_word(&self, index: usize) -> String {
        self.words
            .get(index)
            .cloned()
            .unwrap_or_else(|| UNKNOWN_TOKEN.to_string())
    }

    fn count(&self, token: &str) -> Option<usize> {
        Some(self.get(token).map_or(0, |index| self.counts[index]))
    }

    fn to_index(&mut self, token: &str) -> usize {
        match self.get(token) {
            Some(index) => index,
            None if self.closed => UNKNOWN_INDEX,
            None => self.push(token, 1),
        }
    }

    /// Stores a token with its count, updating the count if the token is already present.
    /// A closed vocabulary ignores unseen tokens.
    fn store(&mut self, token: &str, count: usize) -> Option<usize> {
        match self.get(token) {
            Some(index) => {
                self.counts[index] = count;
                Some(index)
            }
            None if self.closed => None,
            None => Some(self.push(token, count)),
        }
    }
}
