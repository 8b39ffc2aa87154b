use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::loader::{CorpusSource, JsonLines};

pub struct CorpusFileLoader {
    filepath: PathBuf,
}

impl CorpusFileLoader {
    pub fn new<P>(filepath: P) -> Self
    where
        P: AsRef<Path>,
    {
        Self {
            filepath: PathBuf::from(filepath.as_ref()),
        }
    }
}

impl CorpusSource for CorpusFileLoader {
    type Iter = JsonLines<BufReader<File>>;

    fn iter(&self) -> Result<Self::Iter> {
        let reader = BufReader::new(File::open(&self.filepath)?);
        Ok(JsonLines::new(reader))
    }
}

pub struct CorpusTextLoader<'a> {
    text: &'a [u8],
}

impl<'a> CorpusTextLoader<'a> {
    pub const fn new(text: &'a [u8]) -> Self {
        Self { text }
    }
}

impl<'a> CorpusSource for CorpusTextLoader<'a> {
    type Iter = JsonLines<BufReader<&'a [u8]>>;

    fn iter(&self) -> Result<Self::Iter> {
        Ok(JsonLines::new(BufReader::new(self.text)))
    }
}
