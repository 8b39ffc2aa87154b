use std::path::Path;
use std::sync::Arc;

use crate::bpe::FastBpe;
use crate::config::ContextConfig;
use crate::context::{truncate, Context};
use crate::error::Result;
use crate::vocabulary::{PersistentVocabulary, Vocabulary};
use crate::{EOS_TOKEN, VAR_TOKEN};

/// Turns a variable's token context into encoder input: usages are replaced by the variable
/// placeholder, each run between usages is BPE-encoded, the sequence is wrapped in
/// end-of-sequence markers, mapped to indices and truncated.
pub struct ContextAssembler {
    bpe: FastBpe,
    vocabulary: Arc<dyn Vocabulary>,
    config: ContextConfig,
    eos_idx: usize,
    var_idx: usize,
}

impl ContextAssembler {
    pub fn new(bpe: FastBpe, vocabulary: Arc<dyn Vocabulary>, config: ContextConfig) -> Self {
        let eos_idx = vocabulary.index_of(EOS_TOKEN);
        let var_idx = vocabulary.index_of(VAR_TOKEN);
        Self {
            bpe,
            vocabulary,
            config,
            eos_idx,
            var_idx,
        }
    }

    /// Loads `codes` and `vocab.txt` from a neural model directory.
    pub fn from_model_dir(model_dir: &Path, config: ContextConfig) -> Result<Self> {
        let bpe = FastBpe::from_files(&model_dir.join("codes"), None)?;
        let vocabulary = PersistentVocabulary::read_from_file(
            &model_dir.join("vocab.txt"),
            None,
            crate::NEURAL_UNKNOWN_TOKEN,
        )?;
        Ok(Self::new(bpe, Arc::new(vocabulary), config))
    }

    pub fn vocabulary(&self) -> &Arc<dyn Vocabulary> {
        &self.vocabulary
    }

    pub fn bpe(&self) -> &FastBpe {
        &self.bpe
    }

    pub fn eos_idx(&self) -> usize {
        self.eos_idx
    }

    pub fn var_idx(&self) -> usize {
        self.var_idx
    }

    /// BPE-encoded tokens of the context, before index mapping and truncation.
    pub fn bpe_tokens<S: AsRef<str>>(&self, context: &Context<S>) -> Vec<String> {
        let runs: Vec<String> = context
            .split_by_usages()
            .into_iter()
            .map(|run| {
                let text = run.iter().map(|t| t.as_ref()).collect::<Vec<_>>().join(" ");
                self.bpe.apply_bpe(&text)
            })
            .collect();
        let joined = runs.join(&format!(" {} ", VAR_TOKEN));

        let mut tokens = Vec::with_capacity(joined.len() / 4 + 2);
        tokens.push(EOS_TOKEN.to_string());
        tokens.extend(joined.split_whitespace().map(str::to_string));
        tokens.push(EOS_TOKEN.to_string());
        tokens
    }

    /// Encoder input for a context; empty if the context has no tokens.
    pub fn assemble<S: AsRef<str>>(&self, context: &Context<S>) -> Vec<usize> {
        if context.is_empty() {
            return Vec::new();
        }
        let idxs = self.vocabulary.indices_of(&self.bpe_tokens(context));
        let truncated = truncate(
            &idxs,
            self.config.max_sequence_length,
            self.config.left_offset,
            self.var_idx,
            self.eos_idx,
        );
        log::debug!(
            "assembled context of {} tokens into {} indices ({} after truncation)",
            context.len(),
            idxs.len(),
            truncated.len()
        );
        truncated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocabulary::MemoryVocabulary;

    fn assembler(max_sequence_length: usize) -> ContextAssembler {
        let bpe = FastBpe::from_pairs(vec![("i".into(), "n".into()), ("in".into(), "t</w>".into())]);
        let mut vocabulary = MemoryVocabulary::new();
        for word in ["</s>", "VAR_0", "int", "=", "0", ";", "f@@", "o@@", "o"] {
            vocabulary.to_index(word);
        }
        vocabulary.close();
        let config = ContextConfig {
            max_sequence_length,
            left_offset: 1,
        };
        ContextAssembler::new(bpe, Arc::new(vocabulary), config)
    }

    #[test]
    fn test_bpe_tokens_wrap_runs() {
        let assembler = assembler(512);
        let context = Context::new(vec!["int", "foo", "=", "0", ";"], vec![1]).unwrap();
        assert_eq!(
            assembler.bpe_tokens(&context),
            vec!["</s>", "int", "VAR_0", "=", "0", ";", "</s>"]
        );
        assert_eq!(assembler.assemble(&context), vec![1, 3, 2, 4, 5, 6, 1]);
    }

    #[test]
    fn test_assemble_truncates() {
        let assembler = assembler(4);
        let context = Context::new(vec!["int", "x", "=", "x", ";"], vec![1, 3]).unwrap();
        let idxs = assembler.assemble(&context);
        assert_eq!(idxs.len(), 4);
        assert_eq!(idxs[0], assembler.eos_idx());
        assert_eq!(idxs[3], assembler.eos_idx());
        assert!(idxs.contains(&assembler.var_idx()));
    }

    #[test]
    fn test_empty_context() {
        let assembler = assembler(16);
        let context: Context<&str> = Context::new(vec![], vec![]).unwrap();
        assert!(assembler.assemble(&context).is_empty());
    }
}
