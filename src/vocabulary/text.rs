use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::{Error, Result};
use crate::vocabulary::{MemoryVocabulary, Vocabulary};

/// Writes a vocabulary with one `count<TAB>index<TAB>word` entry per line.
///
/// The file is written to a temporary sibling and renamed into place. Returns the number of
/// bytes written.
pub fn write_vocabulary<P: AsRef<Path>>(vocabulary: &MemoryVocabulary, path: P) -> Result<u64> {
    let path = path.as_ref();
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let temp = NamedTempFile::new_in(parent)?;
    {
        let mut writer = BufWriter::new(temp.as_file());
        for (index, (word, count)) in vocabulary
            .words()
            .iter()
            .zip(vocabulary.counts())
            .enumerate()
        {
            writeln!(writer, "{}\t{}\t{}", count, index, word)?;
        }
        writer.flush()?;
    }
    let file = temp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(file.metadata()?.len())
}

/// Reads a vocabulary written by [`write_vocabulary`], skipping entries counted below `cutoff`.
///
/// The word column may itself contain tabs. With a zero cutoff every index must be strictly
/// consecutive from 0; with a positive cutoff the kept entries are re-densified.
pub fn read_vocabulary<P: AsRef<Path>>(path: P, cutoff: usize) -> Result<MemoryVocabulary> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let mut vocabulary = MemoryVocabulary::new();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let corrupt = |reason: String| Error::CorruptVocabulary {
            path: path.to_path_buf(),
            line: line_no + 1,
            reason,
        };

        let mut split = line.splitn(3, '\t');
        let (count, index, word) = match (split.next(), split.next(), split.next()) {
            (Some(c), Some(i), Some(w)) => (c, i, w),
            _ => return Err(corrupt("expected three tab-separated columns".into())),
        };
        let count: usize = count
            .parse()
            .map_err(|_| corrupt(format!("invalid count {:?}", count)))?;
        let index: usize = index
            .parse()
            .map_err(|_| corrupt(format!("invalid index {:?}", index)))?;

        if count < cutoff {
            continue;
        }
        if cutoff == 0 && index > 0 && index != vocabulary.size() {
            return Err(corrupt(format!(
                "non-consecutive index {} (expected {})",
                index,
                vocabulary.size()
            )));
        }
        vocabulary.store(word, count);
    }
    Ok(vocabulary)
}
