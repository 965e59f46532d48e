use std::path::Path;

use anyhow::{Error, Result};
use rocksdb::{Direction, IteratorMode, DB};

use super::{MetaDB, MetaError};

pub struct RocksMeta {
    inner: DB,
}

impl RocksMeta {
    pub fn open<P: AsRef<Path>>(p: P) -> Result<Self> {
        let inner = DB::open_default(p)?;
        Ok(RocksMeta { inner })
    }
}

impl MetaDB for RocksMeta {
    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.inner.put(key.as_bytes(), value)?;
        Ok(())
    }

    fn has(&self, key: &str) -> Result<bool> {
        self.inner
            .get_pinned(key.as_bytes())
            .map(|r| r.is_some())
            .map_err(From::from)
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, MetaError> {
        let bytes = self
            .inner
            .get_pinned(key.as_bytes())
            .map_err(|e| MetaError::from(Error::new(e)))?;

        match bytes {
            Some(b) => Ok(b.as_ref().to_owned()),
            None => Err(MetaError::NotFound),
        }
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.inner.delete(key.as_bytes())?;
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let mode = IteratorMode::From(prefix.as_bytes(), Direction::Forward);

        let mut out = Vec::new();
        for item in self.inner.iterator(mode) {
            let (key, value) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }

            out.push((String::from_utf8_lossy(&key).into_owned(), value.to_vec()));
        }

        Ok(out)
    }
}
