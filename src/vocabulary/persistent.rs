use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ahash::AHashMap;
use tempfile::NamedTempFile;

use crate::enumerator::{EnumeratorWriter, StringEnumerator};
use crate::error::{Error, Result};
use crate::shutdown::Closeable;
use crate::vocabulary::{Vocabulary, UNKNOWN_INDEX};

const IDX2ENUM_EXTENSION: &str = "idx2enum";

/// Disk-backed [`Vocabulary`]: a [`StringEnumerator`] maps strings to stable enum ids and an
/// `idx2enum` table maps dense vocabulary indices to those ids.
///
/// The vocabulary is read-only. Each handle owns its own mapping of the enumerator, which is
/// released exactly once by [`PersistentVocabulary::close`], by the shutdown registry, or on drop.
#[derive(Debug)]
pub struct PersistentVocabulary {
    enumerator: Arc<StringEnumerator>,
    idx2enum: Vec<u32>,
    enum2idx: AHashMap<u32, usize>,
    unknown_token: String,
    unknown_index: usize,
}

fn idx2enum_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(IDX2ENUM_EXTENSION);
    PathBuf::from(name)
}

fn write_idx2enum(path: &Path, idx2enum: &[u32]) -> Result<u64> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let temp = NamedTempFile::new_in(parent)?;
    {
        let mut writer = BufWriter::new(temp.as_file());
        let count = u32::try_from(idx2enum.len())
            .map_err(|_| Error::InvalidInput("vocabulary exceeds u32::MAX entries".into()))?;
        writer.write_all(&count.to_be_bytes())?;
        for id in idx2enum {
            writer.write_all(&id.to_be_bytes())?;
        }
        writer.flush()?;
    }
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(4 + 4 * idx2enum.len() as u64)
}

fn read_idx2enum(path: &Path) -> Result<Vec<u32>> {
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;
    if bytes.len() < 4 {
        return Err(Error::corrupt_index(path, "missing entry count"));
    }
    let count = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if bytes.len() != 4 + 4 * count {
        return Err(Error::corrupt_index(
            path,
            format!("expected {} entries, found {} bytes", count, bytes.len() - 4),
        ));
    }
    Ok(bytes[4..]
        .chunks_exact(4)
        .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

impl PersistentVocabulary {
    /// Opens a vocabulary previously written by [`PersistentVocabulary::save`].
    pub fn open<P: AsRef<Path>>(path: P, unknown_token: &str) -> Result<Self> {
        let path = path.as_ref();
        let enumerator = StringEnumerator::open(path)?;
        let idx2enum = read_idx2enum(&idx2enum_path(path))?;

        let enum2idx: AHashMap<u32, usize> = idx2enum
            .iter()
            .enumerate()
            .map(|(index, &id)| (id, index))
            .collect();
        if enum2idx.len() != idx2enum.len() {
            return Err(Error::corrupt_index(path, "duplicate enum ids in idx2enum"));
        }
        let known = enumerator.ids()?;
        if let Some(id) = idx2enum.iter().find(|id| known.binary_search(id).is_err()) {
            return Err(Error::corrupt_index(path, format!("unknown enum id {}", id)));
        }

        let unknown_index = enumerator
            .try_enumerate(unknown_token)?
            .and_then(|id| enum2idx.get(&id).copied())
            .unwrap_or(UNKNOWN_INDEX);
        log::info!(
            "loaded persistent vocabulary {:?} with {} entries",
            path,
            idx2enum.len()
        );

        Ok(Self {
            enumerator,
            idx2enum,
            enum2idx,
            unknown_token: unknown_token.to_string(),
            unknown_index,
        })
    }

    /// Writes `words`, in index order, as an enumerator at `path` and an idx2enum table at
    /// `<path>.idx2enum`. Returns the number of bytes written.
    pub fn save<I, S>(words: I, path: &Path) -> Result<u64>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut writer = EnumeratorWriter::create(path)?;
        let mut idx2enum = Vec::new();
        for word in words {
            let word = word.as_ref();
            let before = writer.len();
            let id = writer.enumerate(word)?;
            if writer.len() == before {
                return Err(Error::InvalidInput(format!(
                    "duplicate vocabulary entry {:?}",
                    word
                )));
            }
            idx2enum.push(id);
        }
        let enumerator_bytes = writer.finish()?;
        let table_bytes = write_idx2enum(&idx2enum_path(path), &idx2enum)?;
        Ok(enumerator_bytes + table_bytes)
    }

    /// Persists any vocabulary at `path`, preserving its indices.
    pub fn save_vocabulary<V: Vocabulary + ?Sized>(vocabulary: &V, path: &Path) -> Result<u64> {
        Self::save((0..vocabulary.size()).map(|i| vocabulary.to_word(i)), path)
    }

    /// Opens the persisted index at `vocabulary_path` (default: a `vocabulary` file next to
    /// `path`) if one exists and is non-empty; otherwise builds it from the plain word list at
    /// `path`, one word per line, and opens the result.
    pub fn read_from_file(
        path: &Path,
        vocabulary_path: Option<&Path>,
        unknown_token: &str,
    ) -> Result<Self> {
        let vocabulary_path = match vocabulary_path {
            Some(p) => p.to_path_buf(),
            None => path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join("vocabulary"),
        };
        let persisted = std::fs::metadata(idx2enum_path(&vocabulary_path))
            .map(|m| m.len() > 4)
            .unwrap_or(false);

        if !persisted {
            let reader = BufReader::new(File::open(path)?);
            let mut words = Vec::new();
            for line in reader.lines() {
                let line = line?;
                let word = line.trim_end_matches('\r');
                if !word.is_empty() {
                    words.push(word.to_string());
                }
            }
            let bytes = Self::save(&words, &vocabulary_path)?;
            log::info!(
                "built persistent vocabulary {:?} from {:?} ({} words, {} bytes)",
                vocabulary_path,
                path,
                words.len(),
                bytes
            );
        }
        Self::open(&vocabulary_path, unknown_token)
    }

    pub fn unknown_token(&self) -> &str {
        &self.unknown_token
    }

    /// Releases the enumerator mapping. Returns `false` if it had already been released.
    pub fn close(&self) -> bool {
        self.enumerator.close()
    }

    pub fn is_closed(&self) -> bool {
        self.enumerator.is_closed()
    }
}

impl Vocabulary for PersistentVocabulary {
    fn size(&self) -> usize {
        self.idx2enum.len()
    }

    fn get(&self, token: &str) -> Option<usize> {
        match self.enumerator.try_enumerate(token) {
            Ok(id) => id.and_then(|id| self.enum2idx.get(&id).copied()),
            Err(e) => {
                log::warn!("vocabulary lookup of {:?} failed: {}", token, e);
                None
            }
        }
    }

    fn to_word(&self, index: usize) -> String {
        let word = self
            .idx2enum
            .get(index)
            .map(|&id| self.enumerator.value_of(id));
        match word {
            Some(Ok(Some(word))) => word,
            Some(Err(e)) => {
                log::warn!("vocabulary lookup of index {} failed: {}", index, e);
                self.unknown_token.clone()
            }
            _ => self.unknown_token.clone(),
        }
    }

    fn count(&self, _token: &str) -> Option<usize> {
        None
    }

    fn unknown_index(&self) -> usize {
        self.unknown_index
    }
}

impl Drop for PersistentVocabulary {
    fn drop(&mut self) {
        self.enumerator.close();
    }
}
