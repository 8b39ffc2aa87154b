mod memory;
mod persistent;
mod text;

pub use crate::vocabulary::{
    memory::MemoryVocabulary,
    persistent::PersistentVocabulary,
    text::{read_vocabulary, write_vocabulary},
};

/// Text of the sentinel stored at index 0 of every in-memory vocabulary.
pub const UNKNOWN_TOKEN: &str = "<unknownCharacter>";

/// Index of [`UNKNOWN_TOKEN`] in an in-memory vocabulary.
pub const UNKNOWN_INDEX: usize = 0;

/// Trait for a bidirectional mapping between tokens and dense integer indices.
pub trait Vocabulary: Send + Sync {
    /// Gets the number of entries, the unknown token included.
    fn size(&self) -> usize;

    /// Looks up a token without allocating, returning `None` if it is unseen.
    fn get(&self, token: &str) -> Option<usize>;

    /// Gets the token stored at `index`, or the unknown token text if the index is invalid.
    fn to_word(&self, index: usize) -> String;

    /// Gets the informative count stored alongside a token.
    fn count(&self, token: &str) -> Option<usize>;

    /// Index every unseen token maps to.
    fn unknown_index(&self) -> usize {
        UNKNOWN_INDEX
    }

    /// Looks up a token, mapping unseen tokens to [`Vocabulary::unknown_index`].
    fn index_of(&self, token: &str) -> usize {
        self.get(token).unwrap_or_else(|| self.unknown_index())
    }

    /// Maps a token, allocating a new index if the vocabulary accepts new entries.
    fn to_index(&mut self, token: &str) -> usize {
        self.index_of(token)
    }

    /// Stores a token with its count. Returns the index, or `None` if the vocabulary is read-only.
    fn store(&mut self, _token: &str, _count: usize) -> Option<usize> {
        None
    }

    /// Looks up every token without allocating.
    fn indices_of(&self, tokens: &[String]) -> Vec<usize> {
        tokens.iter().map(|t| self.index_of(t)).collect()
    }

    /// Maps indices back to tokens.
    fn to_words(&self, indices: &[usize]) -> Vec<String> {
        indices.iter().map(|&i| self.to_word(i)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_build_with_cutoff() {
        let vocab = MemoryVocabulary::build(tokens(&["foo", "bar", "foo", "baz"]), 0);
        assert_eq!(vocab.size(), 4);
        assert_eq!(vocab.count("foo"), Some(2));
        assert_eq!(vocab.get("foo"), Some(1));
        assert_eq!(vocab.get("bar"), Some(2));
        assert_eq!(vocab.get("baz"), Some(3));

        let vocab = MemoryVocabulary::build(tokens(&["foo", "bar", "foo", "baz"]), 2);
        assert_eq!(vocab.size(), 2);
        assert_eq!(vocab.get("bar"), None);
    }

    #[test]
    fn test_read_only_lookup_through_trait() {
        let mut vocab = MemoryVocabulary::new();
        vocab.to_index("a");
        vocab.close();

        let dyn_vocab: &dyn Vocabulary = &vocab;
        assert_eq!(dyn_vocab.index_of("a"), 1);
        assert_eq!(dyn_vocab.index_of("b"), UNKNOWN_INDEX);
        assert_eq!(dyn_vocab.to_word(42), UNKNOWN_TOKEN);
        assert_eq!(
            dyn_vocab.indices_of(&tokens(&["a", "b"])),
            vec![1, UNKNOWN_INDEX]
        );
    }
}
