use std::path::PathBuf;

/// Errors produced by the name-suggestion engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A vocabulary text file has a malformed line or a gap in its indices.
    #[error("corrupt vocabulary {path:?} at line {line}: {reason}")]
    CorruptVocabulary {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// A binary index (idx2enum, enumerator, frozen counts) is truncated or inconsistent.
    #[error("corrupt index {path:?}: {reason}")]
    CorruptIndex { path: PathBuf, reason: String },

    #[error("bincode: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// A persistent handle was used after it had been closed.
    #[error("{0} is closed")]
    Closed(&'static str),

    #[error("neural backend: {0:#}")]
    Backend(anyhow::Error),

    /// The caller supplied an argument the engine cannot work with.
    #[error("{0}")]
    InvalidInput(String),
}

impl Error {
    pub(crate) fn corrupt_index<P: Into<PathBuf>>(path: P, reason: impl Into<String>) -> Self {
        Error::CorruptIndex {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
