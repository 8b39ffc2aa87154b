mod flate2;
mod plain;
mod zstd;

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use crate::loader::flate2::CorpusGzFileLoader;
pub use crate::loader::plain::{CorpusFileLoader, CorpusTextLoader};
pub use crate::loader::zstd::CorpusZstdFileLoader;

/// One lexed source file of a training corpus.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: String,
    pub tokens: Vec<String>,
    /// Positions in `tokens` of identifiers that declare a variable.
    #[serde(default)]
    pub declarations: Vec<usize>,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, tokens: Vec<String>, declarations: Vec<usize>) -> Self {
        Self {
            path: path.into(),
            tokens,
            declarations,
        }
    }

    pub fn declared_names(&self) -> impl Iterator<Item = &str> {
        self.declarations
            .iter()
            .filter_map(|&i| self.tokens.get(i))
            .map(String::as_str)
    }
}

/// Loader for a corpus of lexed source files stored as JSON lines.
pub trait CorpusSource {
    type Iter: Iterator<Item = Result<SourceFile>>;

    /// Returns an iterator over fallible source file records.
    fn iter(&self) -> Result<Self::Iter>;
}

/// Parses one [`SourceFile`] per non-blank line.
pub struct JsonLines<R> {
    lines: std::io::Lines<R>,
}

impl<R: BufRead> JsonLines<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }
}

impl<R: BufRead> Iterator for JsonLines<R> {
    type Item = Result<SourceFile>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            if line.trim().is_empty() {
                continue;
            }
            return Some(serde_json::from_str(&line).map_err(Error::from));
        }
    }
}

/// File formats supported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CorpusFileFormat {
    Plain,
    Gzip,
    Zstd,
}

impl CorpusFileFormat {
    /// Guesses the format of a corpus file from its name.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        if name.ends_with(".jsonl.gz") {
            Some(Self::Gzip)
        } else if name.ends_with(".jsonl.zst") {
            Some(Self::Zstd)
        } else if name.ends_with(".jsonl") {
            Some(Self::Plain)
        } else {
            None
        }
    }

    pub fn read(self, path: &Path) -> Result<Vec<SourceFile>> {
        match self {
            Self::Plain => CorpusFileLoader::new(path).iter()?.collect(),
            Self::Gzip => CorpusGzFileLoader::new(path).iter()?.collect(),
            Self::Zstd => CorpusZstdFileLoader::new(path).iter()?.collect(),
        }
    }
}

impl FromStr for CorpusFileFormat {
    type Err = &'static str;

    fn from_str(fmt: &str) -> std::result::Result<Self, Self::Err> {
        match fmt {
            "plain" => Ok(Self::Plain),
            "gzip" => Ok(Self::Gzip),
            "zstd" => Ok(Self::Zstd),
            _ => Err("Invalid format"),
        }
    }
}

/// Reads every `*.jsonl`, `*.jsonl.gz` and `*.jsonl.zst` file of a directory in parallel.
/// Files come back in path order so training is reproducible.
pub fn load_corpus_dir(dir: &Path) -> Result<Vec<SourceFile>> {
    let mut paths: Vec<(PathBuf, CorpusFileFormat)> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter_map(|path| CorpusFileFormat::from_path(&path).map(|format| (path, format)))
        .collect();
    paths.sort_by(|a, b| a.0.cmp(&b.0));

    let chunks = paths
        .par_iter()
        .map(|(path, format)| format.read(path))
        .collect::<Result<Vec<_>>>()?;
    let files: Vec<SourceFile> = chunks.into_iter().flatten().collect();
    log::info!(
        "loaded {} source files from {} corpus files in {:?}",
        files.len(),
        paths.len(),
        dir
    );
    Ok(files)
}
