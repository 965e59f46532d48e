//! keyed metadata storage for durable sector records

use std::sync::Arc;

use anyhow::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{from_slice, to_vec};

pub mod mem;
pub mod rocks;

pub enum MetaError {
    NotFound,
    Failure(Error),
}

impl From<Error> for MetaError {
    fn from(val: Error) -> Self {
        MetaError::Failure(val)
    }
}

impl std::fmt::Debug for MetaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetaError::NotFound => f.write_str("not found"),
            MetaError::Failure(e) => write!(f, "{:?}", e),
        }
    }
}

/// A flat keyed byte store. Keys are utf-8 strings ordered lexicographically,
/// which is what `scan_prefix` relies on.
pub trait MetaDB: Send + Sync {
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    fn has(&self, key: &str) -> Result<bool>;

    fn get(&self, key: &str) -> Result<Vec<u8>, MetaError>;

    fn remove(&self, key: &str) -> Result<()>;

    /// Produces all entries whose key starts with the given prefix.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;
}

/// A namespaced view over a shared [`MetaDB`].
#[derive(Clone)]
pub struct PrefixedMetaDB {
    prefix: String,
    inner: Arc<dyn MetaDB>,
}

impl PrefixedMetaDB {
    pub fn wrap<P: Into<String>>(prefix: P, inner: Arc<dyn MetaDB>) -> Self {
        Self {
            prefix: prefix.into(),
            inner,
        }
    }

    fn key(&self, k: &str) -> String {
        [self.prefix.as_str(), k].join("/")
    }
}

impl MetaDB for PrefixedMetaDB {
    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.inner.set(&self.key(key), value)
    }

    fn has(&self, key: &str) -> Result<bool> {
        self.inner.has(&self.key(key))
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, MetaError> {
        self.inner.get(&self.key(key))
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.inner.remove(&self.key(key))
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let full = self.key(prefix);
        let strip = format!("{}/", self.prefix);

        Ok(self
            .inner
            .scan_prefix(&full)?
            .into_iter()
            .map(|(k, v)| (k.trim_start_matches(&strip).to_string(), v))
            .collect())
    }
}

/// Serialized-document layer on top of a [`MetaDB`].
pub struct MetaDocumentDB<M>(M);

impl<M: MetaDB> MetaDocumentDB<M> {
    pub fn wrap(inner: M) -> Self {
        MetaDocumentDB(inner)
    }

    pub fn set<T>(&self, key: &str, val: &T) -> Result<()>
    where
        T: Serialize,
    {
        let data = to_vec(val)?;
        self.0.set(key, &data)
    }

    pub fn get<T>(&self, key: &str) -> Result<T, MetaError>
    where
        T: DeserializeOwned,
    {
        let data = self.0.get(key)?;
        from_slice(&data).map_err(|e| MetaError::Failure(Error::new(e)))
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.0.remove(key)
    }

    /// Deserializes every document under the given key prefix.
    pub fn scan<T>(&self, prefix: &str) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        self.0
            .scan_prefix(prefix)?
            .into_iter()
            .map(|(_, v)| from_slice(&v).map_err(Error::new))
            .collect()
    }
}
