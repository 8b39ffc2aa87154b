use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::counter::{rank_successors, Countable, FrozenTrie};
use crate::error::{Error, Result};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct TrieNode {
    pub(crate) count: i64,
    pub(crate) child_total: i64,
    pub(crate) children: BTreeMap<u32, TrieNode>,
}

impl TrieNode {
    fn update(&mut self, gram: &[u32], delta: i64) {
        let (&token, rest) = match gram.split_first() {
            Some(split) => split,
            None => return,
        };
        self.child_total += delta;
        let child = self.children.entry(token).or_default();
        child.count += delta;
        child.update(rest, delta);
        if child.count == 0 && child.children.is_empty() {
            self.children.remove(&token);
        }
    }

    fn merge(&mut self, other: &TrieNode) {
        self.child_total += other.child_total;
        for (token, theirs) in &other.children {
            let ours = self.children.entry(*token).or_default();
            ours.count += theirs.count;
            ours.merge(theirs);
        }
        self.children
            .retain(|_, child| child.count != 0 || !child.children.is_empty());
    }

    fn find(&self, gram: &[u32]) -> Option<&TrieNode> {
        gram.iter()
            .try_fold(self, |node, token| node.children.get(token))
    }

    fn num_nodes(&self) -> usize {
        1 + self.children.values().map(TrieNode::num_nodes).sum::<usize>()
    }
}

/// Mutable n-gram counts stored as a trie of windows of up to `order` tokens.
///
/// Counts are signed so the same structure can record a delta of forgotten and learned
/// windows on top of another counter; nodes whose count returns to zero are pruned.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NGramTrie {
    order: usize,
    root: TrieNode,
}

impl NGramTrie {
    pub fn new(order: usize) -> Self {
        Self {
            order,
            root: TrieNode::default(),
        }
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn is_empty(&self) -> bool {
        self.root.children.is_empty()
    }

    pub fn num_nodes(&self) -> usize {
        self.root.num_nodes()
    }

    pub(crate) fn root(&self) -> &TrieNode {
        &self.root
    }

    /// Adds `delta` to every window of the sequence and to all of its prefixes.
    pub fn update(&mut self, tokens: &[u32], delta: i64) {
        for i in 0..tokens.len() {
            let end = (i + self.order).min(tokens.len());
            self.root.update(&tokens[i..end], delta);
        }
    }

    pub fn learn(&mut self, tokens: &[u32]) {
        self.update(tokens, 1);
    }

    pub fn forget(&mut self, tokens: &[u32]) {
        self.update(tokens, -1);
    }

    /// Adds every count of `other` into this trie.
    pub fn merge(&mut self, other: &NGramTrie) {
        self.root.merge(&other.root);
    }

    /// Signed `[count(gram), context count]`, as stored.
    pub fn raw_counts(&self, gram: &[u32]) -> [i64; 2] {
        let (context, _) = gram.split_at(gram.len().saturating_sub(1));
        let count = if gram.is_empty() {
            self.root.child_total
        } else {
            self.root.find(gram).map_or(0, |n| n.count)
        };
        let context_count = self.root.find(context).map_or(0, |n| n.child_total);
        [count, context_count]
    }

    /// Every stored successor of `context` with its signed count.
    pub fn raw_successors(&self, context: &[u32]) -> Vec<(u32, i64)> {
        self.root.find(context).map_or_else(Vec::new, |node| {
            node.children
                .iter()
                .map(|(&token, child)| (token, child.count))
                .collect()
        })
    }

    /// Serializes the trie with bincode, atomically. Returns the number of bytes written.
    pub fn save(&self, path: &Path) -> Result<u64> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        let temp = NamedTempFile::new_in(parent)?;
        {
            let mut writer = BufWriter::new(temp.as_file());
            bincode::serialize_into(&mut writer, self)?;
            writer.flush()?;
        }
        let file = temp.persist(path).map_err(|e| Error::Io(e.error))?;
        Ok(file.metadata()?.len())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let trie: NGramTrie = bincode::deserialize_from(reader)?;
        if trie.order == 0 {
            return Err(Error::corrupt_index(path, "n-gram order is zero"));
        }
        Ok(trie)
    }

    /// Writes a memory-mappable copy of the trie. Returns the number of bytes written.
    pub fn freeze(&self, path: &Path) -> Result<u64> {
        FrozenTrie::write(self, path)
    }
}

impl Countable for NGramTrie {
    fn counts(&self, gram: &[u32]) -> [u64; 2] {
        let [count, context_count] = self.raw_counts(gram);
        [count.max(0) as u64, context_count.max(0) as u64]
    }

    fn successors(&self, context: &[u32], limit: usize) -> Vec<(u32, u64)> {
        let mut successors: Vec<(u32, u64)> = self
            .raw_successors(context)
            .into_iter()
            .filter(|&(_, count)| count > 0)
            .map(|(token, count)| (token, count as u64))
            .collect();
        rank_successors(&mut successors, limit);
        successors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_windows_and_prefixes() {
        let mut trie = NGramTrie::new(2);
        trie.learn(&[5, 6, 5, 6, 7]);

        assert_eq!(trie.counts(&[]), [5, 5]);
        assert_eq!(trie.counts(&[5]), [2, 5]);
        assert_eq!(trie.counts(&[5, 6]), [2, 2]);
        assert_eq!(trie.counts(&[6, 7]), [1, 2]);
        assert_eq!(trie.counts(&[7]), [1, 5]);
        assert_eq!(trie.counts(&[7, 5]), [0, 0]);
        assert_eq!(trie.successors(&[6], 10), vec![(5, 1), (7, 1)]);
        assert_eq!(trie.successors(&[], 2), vec![(5, 2), (6, 2)]);
    }

    #[test]
    fn test_forget_restores_exactly() {
        let mut base = NGramTrie::new(3);
        base.learn(&[1, 2, 3, 4]);
        let before = base.clone();

        base.learn(&[9, 2, 3, 9]);
        assert_ne!(base, before);
        base.forget(&[9, 2, 3, 9]);
        assert_eq!(base, before);
    }

    #[test]
    fn test_signed_delta_keeps_nodes_with_children() {
        let mut delta = NGramTrie::new(2);
        delta.forget(&[1, 2]);
        delta.learn(&[1, 3]);
        assert_eq!(delta.raw_counts(&[1]), [0, 0]);
        assert_eq!(delta.raw_successors(&[1]), vec![(2, -1), (3, 1)]);
        assert_eq!(delta.raw_counts(&[]), [0, 0]);
    }

    #[test]
    fn test_merge_equals_joint_learning() {
        let mut a = NGramTrie::new(3);
        a.learn(&[1, 2, 3]);
        let mut b = NGramTrie::new(3);
        b.learn(&[2, 3, 4]);
        a.merge(&b);

        let mut joint = NGramTrie::new(3);
        joint.learn(&[1, 2, 3]);
        joint.learn(&[2, 3, 4]);
        assert_eq!(a, joint);
    }

    #[test]
    fn test_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counts.bin");
        let mut trie = NGramTrie::new(4);
        trie.learn(&[1, 2, 3, 4, 5, 1, 2]);
        let bytes = trie.save(&path).unwrap();
        assert_eq!(bytes, std::fs::metadata(&path).unwrap().len());
        assert_eq!(NGramTrie::load(&path).unwrap(), trie);
    }
}
