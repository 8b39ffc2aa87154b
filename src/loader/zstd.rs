use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use zstd::stream::read::Decoder;

use crate::error::Result;
use crate::loader::{CorpusSource, JsonLines};

pub struct CorpusZstdFileLoader {
    filepath: PathBuf,
}

impl CorpusZstdFileLoader {
    pub fn new<P>(filepath: P) -> Self
    where
        P: AsRef<Path>,
    {
        Self {
            filepath: PathBuf::from(filepath.as_ref()),
        }
    }
}

impl CorpusSource for CorpusZstdFileLoader {
    type Iter = JsonLines<BufReader<Decoder<'static, BufReader<File>>>>;

    fn iter(&self) -> Result<Self::Iter> {
        let reader = Decoder::new(File::open(&self.filepath)?)?;
        Ok(JsonLines::new(BufReader::new(reader)))
    }
}
