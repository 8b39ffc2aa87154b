mod assembly;
mod truncate;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::vocabulary::Vocabulary;

pub use crate::context::{assembly::ContextAssembler, truncate::truncate};

/// Ordered tokens surrounding a variable, with the positions of every usage of the variable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context<T> {
    tokens: Vec<T>,
    #[serde(rename = "varIdxs", alias = "var_idxs")]
    var_idxs: Vec<usize>,
}

impl<T> Context<T> {
    /// Creates a context. Usage positions must be strictly increasing and inside `tokens`.
    pub fn new(tokens: Vec<T>, var_idxs: Vec<usize>) -> Result<Self> {
        let context = Self { tokens, var_idxs };
        context.validate()?;
        Ok(context)
    }

    /// Checks the usage positions of a context built through deserialization.
    pub fn validate(&self) -> Result<()> {
        if self.var_idxs.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::InvalidInput(
                "usage positions must be strictly increasing".into(),
            ));
        }
        match self.var_idxs.last() {
            Some(&last) if last >= self.tokens.len() => Err(Error::InvalidInput(format!(
                "usage position {} outside {} tokens",
                last,
                self.tokens.len()
            ))),
            _ => Ok(()),
        }
    }

    pub fn tokens(&self) -> &[T] {
        &self.tokens
    }

    pub fn var_idxs(&self) -> &[usize] {
        &self.var_idxs
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn usage_count(&self) -> usize {
        self.var_idxs.len()
    }

    pub fn map<U, F: FnMut(&T) -> U>(&self, f: F) -> Context<U> {
        Context {
            tokens: self.tokens.iter().map(f).collect(),
            var_idxs: self.var_idxs.clone(),
        }
    }

    /// Splits the tokens around each usage. The usages themselves are dropped, so a context
    /// with `k` usages yields `k + 1` (possibly empty) runs.
    pub fn split_by_usages(&self) -> Vec<&[T]> {
        let mut runs = Vec::with_capacity(self.var_idxs.len() + 1);
        let mut last = 0;
        for &idx in &self.var_idxs {
            runs.push(&self.tokens[last..idx]);
            last = idx + 1;
        }
        runs.push(&self.tokens[last..]);
        runs
    }
}

impl<T: Clone> Context<T> {
    /// Copy of the context with `token` written at every usage position.
    pub fn with(&self, token: T) -> Self {
        let mut tokens = self.tokens.clone();
        for &idx in &self.var_idxs {
            tokens[idx] = token.clone();
        }
        Self {
            tokens,
            var_idxs: self.var_idxs.clone(),
        }
    }
}

impl<S: AsRef<str>> Context<S> {
    /// Maps tokens through a vocabulary without growing it.
    pub fn to_indices<V: Vocabulary + ?Sized>(&self, vocabulary: &V) -> Context<usize> {
        self.map(|t| vocabulary.index_of(t.as_ref()))
    }
}

/// Diagnostic summary of how much n-gram evidence backs a variable's context.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub usage_count: usize,
    pub total_ngram_counts: u64,
}

impl Statistics {
    pub const EMPTY: Statistics = Statistics {
        usage_count: 0,
        total_ngram_counts: 0,
    };

    pub fn counts_mean(&self) -> f64 {
        if self.usage_count > 0 {
            self.total_ngram_counts as f64 / self.usage_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> Context<String> {
        let tokens = ["int", "x", "=", "x", ";"].iter().map(|t| t.to_string()).collect();
        Context::new(tokens, vec![1, 3]).unwrap()
    }

    #[test]
    fn test_with_replaces_usages() {
        let replaced = context().with("VAR".to_string());
        assert_eq!(replaced.tokens(), &["int", "VAR", "=", "VAR", ";"]);
        assert_eq!(replaced.var_idxs(), &[1, 3]);
    }

    #[test]
    fn test_split_by_usages() {
        let ctx = context();
        let runs = ctx.split_by_usages();
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[0], &["int".to_string()]);
        assert_eq!(runs[1], &["=".to_string()]);
        assert_eq!(runs[2], &[";".to_string()]);

        let edge = Context::new(vec![1, 2], vec![0, 1]).unwrap();
        let empty: &[i32] = &[];
        assert_eq!(edge.split_by_usages(), vec![empty, empty, empty]);
    }

    #[test]
    fn test_split_without_clone() {
        #[derive(Debug, PartialEq)]
        struct Token(u8);

        let ctx = Context::new(vec![Token(1), Token(2), Token(3)], vec![1]).unwrap();
        let runs = ctx.split_by_usages();
        assert_eq!(runs, vec![&[Token(1)][..], &[Token(3)][..]]);
    }

    #[test]
    fn test_invalid_usages() {
        assert!(Context::new(vec![1, 2], vec![2]).is_err());
        assert!(Context::new(vec![1, 2], vec![1, 1]).is_err());
    }

    #[test]
    fn test_json_field_names() {
        let ctx: Context<String> =
            serde_json::from_str(r#"{"tokens": ["a", "b"], "varIdxs": [1]}"#).unwrap();
        assert_eq!(ctx.var_idxs(), &[1]);
        let ctx: Context<String> =
            serde_json::from_str(r#"{"tokens": ["a"], "var_idxs": [0]}"#).unwrap();
        assert_eq!(ctx.usage_count(), 1);
    }
}
