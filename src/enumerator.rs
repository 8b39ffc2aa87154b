use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;
use tempfile::NamedTempFile;

use crate::error::{Error, Result};
use crate::mmap_slice::MmapSlice;
use crate::shutdown::{self, Closeable};

const MAGIC: &[u8; 8] = b"NGENUM01";

/// Appends strings to a new enumerator file, assigning each distinct string a stable id.
///
/// Records are laid out as `[u32 little-endian length][utf-8 bytes]` after an 8-byte magic
/// header; the id of a string is the byte offset of its record. The file is written to a
/// temporary sibling and renamed into place by [`EnumeratorWriter::finish`].
pub struct EnumeratorWriter {
    path: PathBuf,
    writer: BufWriter<NamedTempFile>,
    ids: AHashMap<String, u32>,
    offset: u64,
}

impl EnumeratorWriter {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        let mut writer = BufWriter::new(NamedTempFile::new_in(parent)?);
        writer.write_all(MAGIC)?;

        Ok(Self {
            path,
            writer,
            ids: AHashMap::new(),
            offset: MAGIC.len() as u64,
        })
    }

    /// Gets the id of `value`, appending a record the first time it is seen.
    pub fn enumerate(&mut self, value: &str) -> Result<u32> {
        if let Some(&id) = self.ids.get(value) {
            return Ok(id);
        }
        let id = u32::try_from(self.offset)
            .map_err(|_| Error::corrupt_index(&self.path, "enumerator exceeds 4 GiB"))?;
        let len = u32::try_from(value.len())
            .map_err(|_| Error::InvalidInput(format!("string of {} bytes", value.len())))?;

        self.writer.write_all(&len.to_le_bytes())?;
        self.writer.write_all(value.as_bytes())?;
        self.offset += 4 + value.len() as u64;
        self.ids.insert(value.to_string(), id);
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Flushes and atomically moves the file into place. Returns the number of bytes written.
    pub fn finish(self) -> Result<u64> {
        let temp = self
            .writer
            .into_inner()
            .map_err(|e| Error::Io(e.into_error()))?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| Error::Io(e.error))?;
        Ok(self.offset)
    }
}

struct EnumeratorData {
    bytes: MmapSlice<u8>,
    /// Record offsets in file order, hence ascending.
    records: Vec<u32>,
    /// Record offsets ordered by the bytes of their string.
    sorted: Vec<u32>,
}

impl EnumeratorData {
    fn record(&self, offset: u32) -> &[u8] {
        let start = offset as usize;
        let mut len = [0u8; 4];
        len.copy_from_slice(&self.bytes[start..start + 4]);
        let len = u32::from_le_bytes(len) as usize;
        &self.bytes[start + 4..start + 4 + len]
    }

    fn load(path: &Path) -> Result<Self> {
        let bytes = MmapSlice::<u8>::new(&File::open(path)?)?;
        if bytes.len() < MAGIC.len() || &bytes[..MAGIC.len()] != MAGIC {
            return Err(Error::corrupt_index(path, "missing enumerator header"));
        }

        let mut records = Vec::new();
        let mut offset = MAGIC.len();
        while offset < bytes.len() {
            if offset + 4 > bytes.len() {
                return Err(Error::corrupt_index(path, "truncated record length"));
            }
            let mut len = [0u8; 4];
            len.copy_from_slice(&bytes[offset..offset + 4]);
            let end = offset + 4 + u32::from_le_bytes(len) as usize;
            if end > bytes.len() {
                return Err(Error::corrupt_index(path, "truncated record"));
            }
            if std::str::from_utf8(&bytes[offset + 4..end]).is_err() {
                return Err(Error::corrupt_index(path, "record is not utf-8"));
            }
            let id = u32::try_from(offset)
                .map_err(|_| Error::corrupt_index(path, "enumerator exceeds 4 GiB"))?;
            records.push(id);
            offset = end;
        }

        let mut data = Self {
            bytes,
            sorted: Vec::new(),
            records,
        };
        let mut sorted = data.records.clone();
        sorted.sort_unstable_by(|&a, &b| data.record(a).cmp(data.record(b)));
        if sorted
            .windows(2)
            .any(|w| data.record(w[0]) == data.record(w[1]))
        {
            return Err(Error::corrupt_index(path, "duplicate enumerator record"));
        }
        data.sorted = sorted;
        Ok(data)
    }
}

/// Read-only, memory-mapped string enumerator.
///
/// Lookups run against a mapped file; [`Closeable::close`] unmaps it exactly once, after
/// which every lookup fails with [`Error::Closed`].
pub struct StringEnumerator {
    path: PathBuf,
    data: RwLock<Option<EnumeratorData>>,
}

impl StringEnumerator {
    /// Maps an enumerator file and registers the handle with the shutdown registry.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Arc<Self>> {
        let path = path.as_ref().to_path_buf();
        let data = EnumeratorData::load(&path)?;
        log::debug!("opened enumerator {:?} with {} strings", path, data.records.len());

        let enumerator = Arc::new(Self {
            path,
            data: RwLock::new(Some(data)),
        });
        shutdown::register(&enumerator);
        Ok(enumerator)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.data.read().is_none()
    }

    pub fn len(&self) -> Result<usize> {
        self.with_data(|data| data.records.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Gets the id of `value`, or `None` if it was never enumerated.
    pub fn try_enumerate(&self, value: &str) -> Result<Option<u32>> {
        self.with_data(|data| {
            data.sorted
                .binary_search_by(|&offset| data.record(offset).cmp(value.as_bytes()))
                .ok()
                .map(|i| data.sorted[i])
        })
    }

    /// Gets the string recorded under `id`, or `None` if `id` is not a record offset.
    pub fn value_of(&self, id: u32) -> Result<Option<String>> {
        self.with_data(|data| {
            data.records
                .binary_search(&id)
                .ok()
                .map(|_| String::from_utf8_lossy(data.record(id)).into_owned())
        })
    }

    /// Ids of every record in file order.
    pub fn ids(&self) -> Result<Vec<u32>> {
        self.with_data(|data| data.records.clone())
    }

    fn with_data<R>(&self, f: impl FnOnce(&EnumeratorData) -> R) -> Result<R> {
        match self.data.read().as_ref() {
            Some(data) => Ok(f(data)),
            None => Err(Error::Closed("string enumerator")),
        }
    }
}

impl Closeable for StringEnumerator {
    fn close(&self) -> bool {
        let closed = self.data.write().take().is_some();
        if closed {
            log::debug!("closed enumerator {:?}", self.path);
        }
        closed
    }
}

impl std::fmt::Debug for StringEnumerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StringEnumerator")
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, words: &[&str]) -> Vec<u32> {
        let mut writer = EnumeratorWriter::create(path).unwrap();
        let ids = words.iter().map(|w| writer.enumerate(w).unwrap()).collect();
        writer.finish().unwrap();
        ids
    }

    #[test]
    fn test_enumerate_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("words.enum");
        let ids = write(&path, &["zeta", "alpha", "", "zeta", "ünïcode"]);
        assert_eq!(ids[0], ids[3]);
        assert_eq!(ids[0], MAGIC.len() as u32);

        let enumerator = StringEnumerator::open(&path).unwrap();
        assert_eq!(enumerator.len().unwrap(), 4);
        for (word, id) in ["zeta", "alpha", "", "ünïcode"].iter().zip([ids[0], ids[1], ids[2], ids[4]]) {
            assert_eq!(enumerator.try_enumerate(word).unwrap(), Some(id));
            assert_eq!(enumerator.value_of(id).unwrap().as_deref(), Some(*word));
        }
        assert_eq!(enumerator.try_enumerate("missing").unwrap(), None);
        assert_eq!(enumerator.value_of(ids[1] + 1).unwrap(), None);
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("words.enum");
        write(&path, &["a"]);

        let enumerator = StringEnumerator::open(&path).unwrap();
        assert!(enumerator.close());
        assert!(!enumerator.close());
        assert!(enumerator.is_closed());
        assert!(matches!(
            enumerator.try_enumerate("a"),
            Err(Error::Closed(_))
        ));
    }

    #[test]
    fn test_truncated_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("words.enum");
        write(&path, &["abcdef"]);
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 2]).unwrap();

        assert!(matches!(
            StringEnumerator::open(&path),
            Err(Error::CorruptIndex { .. })
        ));
    }
}
