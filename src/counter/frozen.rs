use std::path::{Path, PathBuf};

use crate::counter::trie::TrieNode;
use crate::counter::{rank_successors, Countable, NGramTrie};
use crate::error::{Error, Result};
use crate::mmap_slice::{MmapSlice, MmapSliceMut};

const MAGIC: u32 = 0x4e47_4654;
const HEADER_LEN: usize = 2;

/// Read-only n-gram counts memory-mapped from a flat array of `u32` words.
///
/// After a `[magic, order]` header, each node is laid out as
/// `[count, child_total, n, (token, child_offset) * n]` with children sorted by token, so a
/// lookup is one binary search per gram token. Counts saturate at `u32::MAX`.
pub struct FrozenTrie {
    path: PathBuf,
    words: MmapSlice<u32>,
    order: usize,
}

fn saturate(count: i64) -> u32 {
    count.clamp(0, u32::MAX as i64) as u32
}

fn node_len(node: &TrieNode) -> usize {
    3 + 2 * node.children.len() + node.children.values().map(node_len).sum::<usize>()
}

/// Writes `node` at `offset` and returns the offset just past its subtree.
fn write_node(words: &mut [u32], node: &TrieNode, offset: usize) -> usize {
    words[offset] = saturate(node.count);
    words[offset + 1] = saturate(node.child_total);
    words[offset + 2] = node.children.len() as u32;

    let mut next = offset + 3 + 2 * node.children.len();
    for (i, (&token, child)) in node.children.iter().enumerate() {
        words[offset + 3 + 2 * i] = token;
        words[offset + 4 + 2 * i] = next as u32;
        next = write_node(words, child, next);
    }
    next
}

impl FrozenTrie {
    /// Lays out `trie` in a new file at `path`. Returns the number of bytes written.
    pub fn write(trie: &NGramTrie, path: &Path) -> Result<u64> {
        let len = HEADER_LEN + node_len(trie.root());
        if len > u32::MAX as usize {
            return Err(Error::InvalidInput(format!(
                "{} words do not fit a frozen trie",
                len
            )));
        }

        let mut words = MmapSliceMut::<u32>::create(path, len)?;
        words[0] = MAGIC;
        words[1] = trie.order() as u32;
        write_node(&mut words, trie.root(), HEADER_LEN);
        let bytes = words.flush()?;
        log::info!("froze {} trie nodes into {:?} ({} bytes)", trie.num_nodes(), path, bytes);
        Ok(bytes)
    }

    pub fn open(path: &Path) -> Result<Self> {
        let words = MmapSlice::<u32>::open(path)?;
        if words.len() < HEADER_LEN + 3 || words[0] != MAGIC {
            return Err(Error::corrupt_index(path, "not a frozen trie"));
        }
        let order = words[1] as usize;
        Ok(Self {
            path: path.to_path_buf(),
            words,
            order,
        })
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn word(&self, offset: usize) -> u32 {
        self.words.get(offset).copied().unwrap_or(0)
    }

    fn children(&self, node: usize) -> &[u32] {
        let n = self.word(node + 2) as usize;
        let start = (node + 3).min(self.words.len());
        let end = (node + 3 + 2 * n).min(self.words.len());
        &self.words[start..end]
    }

    fn child(&self, node: usize, token: u32) -> Option<usize> {
        let children = self.children(node);
        let pairs = children.len() / 2;
        let (mut lo, mut hi) = (0, pairs);
        while lo < hi {
            let mid = (lo + hi) / 2;
            match children[2 * mid].cmp(&token) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Some(children[2 * mid + 1] as usize),
            }
        }
        None
    }

    fn find(&self, gram: &[u32]) -> Option<usize> {
        gram.iter()
            .try_fold(HEADER_LEN, |node, &token| self.child(node, token))
    }
}

impl Countable for FrozenTrie {
    fn counts(&self, gram: &[u32]) -> [u64; 2] {
        let context = &gram[..gram.len().saturating_sub(1)];
        let context_count = self
            .find(context)
            .map_or(0, |node| self.word(node + 1) as u64);
        let count = if gram.is_empty() {
            context_count
        } else {
            self.find(gram).map_or(0, |node| self.word(node) as u64)
        };
        [count, context_count]
    }

    fn successors(&self, context: &[u32], limit: usize) -> Vec<(u32, u64)> {
        let node = match self.find(context) {
            Some(node) => node,
            None => return Vec::new(),
        };
        let mut successors: Vec<(u32, u64)> = self
            .children(node)
            .chunks_exact(2)
            .map(|pair| (pair[0], self.word(pair[1] as usize) as u64))
            .filter(|&(_, count)| count > 0)
            .collect();
        rank_successors(&mut successors, limit);
        successors
    }
}
