mod delta;
mod frozen;
mod trie;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use crate::counter::{delta::Overlay, frozen::FrozenTrie, trie::NGramTrie};

/// Read access to n-gram counts over vocabulary indices.
///
/// Every window of up to `order` tokens is counted together with all of its prefixes, so the
/// context count of a gram is the number of times its prefix was followed by any token.
pub trait Countable: Send + Sync {
    /// Gets `[count(gram), count(gram[..len - 1] followed by anything)]`.
    fn counts(&self, gram: &[u32]) -> [u64; 2];

    /// Gets up to `limit` tokens seen after `context`, by descending count then ascending index.
    fn successors(&self, context: &[u32], limit: usize) -> Vec<(u32, u64)>;

    /// Number of windows counted, i.e. the context count of the empty context.
    fn total(&self) -> u64 {
        self.counts(&[])[1]
    }
}

/// Sorts successors by descending count, then ascending token, and keeps the first `limit`.
pub(crate) fn rank_successors(successors: &mut Vec<(u32, u64)>, limit: usize) {
    successors.sort_unstable_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    successors.truncate(limit);
}

/// How trained counts are held once loaded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Representation {
    /// Deserialized into a heap-allocated trie.
    #[default]
    Ram,
    /// Memory-mapped from a frozen trie file.
    Disk,
}

/// Trained counts in either representation.
pub enum Counts {
    Ram(NGramTrie),
    Disk(FrozenTrie),
}

impl Counts {
    /// Loads counts saved under `stem`: `<stem>.bin` for RAM, `<stem>.frozen` for disk. A
    /// missing frozen file is created from the serialized trie.
    pub fn load(dir: &Path, stem: &str, representation: Representation) -> Result<Self> {
        let bin = dir.join(format!("{}.bin", stem));
        match representation {
            Representation::Ram => Ok(Counts::Ram(NGramTrie::load(&bin)?)),
            Representation::Disk => {
                let frozen = dir.join(format!("{}.frozen", stem));
                if !frozen.exists() {
                    NGramTrie::load(&bin)?.freeze(&frozen)?;
                }
                Ok(Counts::Disk(FrozenTrie::open(&frozen)?))
            }
        }
    }

    pub fn order(&self) -> usize {
        match self {
            Counts::Ram(trie) => trie.order(),
            Counts::Disk(trie) => trie.order(),
        }
    }

    pub fn representation(&self) -> Representation {
        match self {
            Counts::Ram(_) => Representation::Ram,
            Counts::Disk(_) => Representation::Disk,
        }
    }
}

impl Countable for Counts {
    fn counts(&self, gram: &[u32]) -> [u64; 2] {
        match self {
            Counts::Ram(trie) => trie.counts(gram),
            Counts::Disk(trie) => trie.counts(gram),
        }
    }

    fn successors(&self, context: &[u32], limit: usize) -> Vec<(u32, u64)> {
        match self {
            Counts::Ram(trie) => trie.successors(context, limit),
            Counts::Disk(trie) => trie.successors(context, limit),
        }
    }
}
