use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;

use crate::error::Result;
use crate::loader::{CorpusSource, JsonLines};

pub struct CorpusGzFileLoader {
    filepath: PathBuf,
}

impl CorpusGzFileLoader {
    pub fn new<P>(filepath: P) -> Self
    where
        P: AsRef<Path>,
    {
        Self {
            filepath: PathBuf::from(filepath.as_ref()),
        }
    }
}

impl CorpusSource for CorpusGzFileLoader {
    type Iter = JsonLines<BufReader<GzDecoder<File>>>;

    fn iter(&self) -> Result<Self::Iter> {
        let reader = GzDecoder::new(File::open(&self.filepath)?);
        Ok(JsonLines::new(BufReader::new(reader)))
    }
}
