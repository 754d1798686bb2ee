//! Key store capability
//!
//! URI-addressed JSON records with an issuer id assigned on creation. The
//! issuer id stays the same when a record is replaced and is never reused
//! for a different record. `put` with `allow_update = false` is an atomic
//! create-if-absent and is the only concurrency guard registration relies on.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;

use crate::error::StoreError;

/// A stored record and the issuer id it was created under
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
    pub value: Value,
    pub issuer_id: String,
}

#[async_trait]
pub trait KeyStore: Send + Sync {
    /// All record URIs
    async fn uris(&self) -> Result<Vec<String>, StoreError>;

    /// Record at `uri`
    async fn get(&self, uri: &str) -> Result<Option<StoredEntry>, StoreError>;

    /// Record created under `issuer_id`, with its URI
    async fn get_by_issuer(
        &self,
        issuer_id: &str,
    ) -> Result<Option<(String, StoredEntry)>, StoreError>;

    /// Create or replace the record at `uri`, returning its issuer id.
    ///
    /// Fails with [`StoreError::Conflict`] if a record exists and
    /// `allow_update` is false.
    async fn put(&self, uri: &str, value: Value, allow_update: bool) -> Result<String, StoreError>;

    /// Remove the record at `uri`; returns whether one existed
    async fn remove(&self, uri: &str) -> Result<bool, StoreError>;

    /// Flush buffered writes (no-op unless the backend buffers)
    async fn deploy(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Check the backend is reachable
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Short backend name for health reporting
    fn kind(&self) -> &'static str;
}

/// Generate a fresh issuer id
pub fn new_issuer_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// In-memory key store (development and tests; lost on restart)
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    records: DashMap<String, StoredEntry>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn uris(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.records.iter().map(|entry| entry.key().clone()).collect())
    }

    async fn get(&self, uri: &str) -> Result<Option<StoredEntry>, StoreError> {
        Ok(self.records.get(uri).map(|entry| entry.value().clone()))
    }

    async fn get_by_issuer(
        &self,
        issuer_id: &str,
    ) -> Result<Option<(String, StoredEntry)>, StoreError> {
        Ok(self
            .records
            .iter()
            .find(|entry| entry.value().issuer_id == issuer_id)
            .map(|entry| (entry.key().clone(), entry.value().clone())))
    }

    async fn put(&self, uri: &str, value: Value, allow_update: bool) -> Result<String, StoreError> {
        match self.records.entry(uri.to_string()) {
            Entry::Occupied(mut occupied) => {
                if !allow_update {
                    return Err(StoreError::Conflict(uri.to_string()));
                }
                occupied.get_mut().value = value;
                Ok(occupied.get().issuer_id.clone())
            }
            Entry::Vacant(vacant) => {
                let issuer_id = new_issuer_id();
                vacant.insert(StoredEntry {
                    value,
                    issuer_id: issuer_id.clone(),
                });
                Ok(issuer_id)
            }
        }
    }

    async fn remove(&self, uri: &str) -> Result<bool, StoreError> {
        Ok(self.records.remove(uri).is_some())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}
