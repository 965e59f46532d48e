use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::RwLock;

use anyhow::{anyhow, Result};

use super::{MetaDB, MetaError};

/// In-memory [`MetaDB`], mostly for tests and dry runs.
#[derive(Default)]
pub struct MemMeta {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MetaDB for MemMeta {
    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut entries = self.entries.write().map_err(|e| anyhow!("lock poisoned: {}", e))?;
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn has(&self, key: &str) -> Result<bool> {
        let entries = self.entries.read().map_err(|e| anyhow!("lock poisoned: {}", e))?;
        Ok(entries.contains_key(key))
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, MetaError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| MetaError::Failure(anyhow!("lock poisoned: {}", e)))?;

        entries.get(key).cloned().ok_or(MetaError::NotFound)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().map_err(|e| anyhow!("lock poisoned: {}", e))?;
        entries.remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let entries = self.entries.read().map_err(|e| anyhow!("lock poisoned: {}", e))?;

        Ok(entries
            .range::<String, _>((Bound::Included(prefix.to_string()), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
