//! Access grants
//!
//! An access administrator manages a list of `{id, encrypted_credential}`
//! pairs. Each `encrypted_credential` is a credential record sealed with a
//! key only the server holds, so the administrator can copy registration
//! codes around without seeing key material. Per administrator the store
//! holds:
//!
//! - `access:{admin_hash}`: the sealed JSON list of ids
//! - `credential:{admin_hash}:{hash(id)}`: the sealed credential as given
//! - `sign_count:{admin_hash}:{hash(id)}`: the credential's counter

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crypto::{Sealed, SecretBox};
use crate::error::{CryptoError, GrantError, StoreError};
use crate::identity::hash_identity;
use crate::keystore::KeyStore;
use crate::record::CredentialRecord;

/// Key store namespaces owned by an administrator hash
pub const ACCESS_NAMESPACE: &str = "access";
pub const CREDENTIAL_NAMESPACE: &str = "credential";
pub const SIGN_COUNT_NAMESPACE: &str = "sign_count";

pub fn access_index_uri(owner_hash: &str) -> String {
    format!("{ACCESS_NAMESPACE}:{owner_hash}")
}

pub fn grant_uri(owner_hash: &str, id: &str) -> String {
    format!("{CREDENTIAL_NAMESPACE}:{owner_hash}:{}", hash_identity(id))
}

pub fn sign_count_uri(owner_hash: &str, id: &str) -> String {
    format!("{SIGN_COUNT_NAMESPACE}:{owner_hash}:{}", hash_identity(id))
}

/// One user's entry in an administrator's list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantEntry {
    pub id: String,
    pub encrypted_credential: Sealed,
}

/// Reads and writes sealed access grants
#[derive(Clone)]
pub struct GrantVault {
    secret: SecretBox,
    store: Arc<dyn KeyStore>,
}

impl GrantVault {
    pub fn new(secret: SecretBox, store: Arc<dyn KeyStore>) -> Self {
        Self { secret, store }
    }

    /// Seal an enrolled credential into a registration code
    pub fn seal_credential(&self, record: &CredentialRecord) -> Result<Sealed, CryptoError> {
        self.secret.seal_json(record)
    }

    pub fn open_credential(&self, sealed: &Sealed) -> Result<CredentialRecord, CryptoError> {
        self.secret.open_json(sealed)
    }

    /// Current list for an administrator (empty if never set)
    pub async fn list(&self, owner_hash: &str) -> Result<Vec<GrantEntry>, GrantError> {
        let ids = self.ids(owner_hash).await?;
        let mut entries = Vec::with_capacity(ids.len());

        for id in ids {
            let uri = grant_uri(owner_hash, &id);
            match self.store.get(&uri).await? {
                Some(stored) => {
                    let encrypted_credential: Sealed = serde_json::from_value(stored.value)
                        .map_err(|e| GrantError::CorruptIndex(e.to_string()))?;
                    entries.push(GrantEntry {
                        id,
                        encrypted_credential,
                    });
                }
                None => {
                    tracing::warn!(uri = %uri, "Grant listed in index but missing from store");
                }
            }
        }

        Ok(entries)
    }

    /// Replace an administrator's list.
    ///
    /// Every registration code must open under the credential key before
    /// anything is written. Blobs are written before the index and dropped
    /// users lose their records after it, so a failed write never leaves the
    /// index naming a missing blob.
    pub async fn replace(&self, owner_hash: &str, entries: &[GrantEntry]) -> Result<(), GrantError> {
        let mut seen = HashSet::new();
        let mut counters = Vec::with_capacity(entries.len());
        for entry in entries {
            if !seen.insert(entry.id.as_str()) {
                return Err(GrantError::DuplicateId(entry.id.clone()));
            }
            let record = self
                .open_credential(&entry.encrypted_credential)
                .map_err(|_| GrantError::InvalidCredential(entry.id.clone()))?;
            counters.push(record.sign_count);
        }

        let previous = self.ids(owner_hash).await?;

        for (entry, sign_count) in entries.iter().zip(counters) {
            self.store
                .put(
                    &grant_uri(owner_hash, &entry.id),
                    to_value(&entry.encrypted_credential)?,
                    true,
                )
                .await?;
            self.store
                .put(
                    &sign_count_uri(owner_hash, &entry.id),
                    Value::from(sign_count),
                    true,
                )
                .await?;
        }

        // The index only moves once every blob it names is stored
        let ids: Vec<&str> = entries.iter().map(|entry| entry.id.as_str()).collect();
        let index = self
            .secret
            .seal_json(&ids)
            .map_err(|e| GrantError::Store(StoreError::Serialization(e.to_string())))?;
        self.store
            .put(&access_index_uri(owner_hash), to_value(&index)?, true)
            .await?;

        for dropped in previous.iter().filter(|id| !seen.contains(id.as_str())) {
            self.store.remove(&grant_uri(owner_hash, dropped)).await?;
            self.store.remove(&sign_count_uri(owner_hash, dropped)).await?;
        }

        self.store.deploy().await?;

        tracing::info!(
            owner_hash = %owner_hash,
            granted = entries.len(),
            "Access grants replaced"
        );
        Ok(())
    }

    async fn ids(&self, owner_hash: &str) -> Result<Vec<String>, GrantError> {
        let Some(stored) = self.store.get(&access_index_uri(owner_hash)).await? else {
            return Ok(Vec::new());
        };
        let sealed: Sealed = serde_json::from_value(stored.value)
            .map_err(|e| GrantError::CorruptIndex(e.to_string()))?;
        self.secret
            .open_json(&sealed)
            .map_err(|e| GrantError::CorruptIndex(e.to_string()))
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, GrantError> {
    serde_json::to_value(value).map_err(|e| GrantError::Store(StoreError::Serialization(e.to_string())))
}

impl std::fmt::Debug for GrantVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrantVault")
            .field("store", &self.store.kind())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::MemoryKeyStore;
    use serde_json::json;

    fn vault() -> (GrantVault, Arc<MemoryKeyStore>) {
        let store = Arc::new(MemoryKeyStore::new());
        let secret = SecretBox::new(&[9u8; 32]).unwrap();
        (GrantVault::new(secret, store.clone()), store)
    }

    fn record(count: u32) -> CredentialRecord {
        CredentialRecord {
            public_key: json!("pk"),
            credential_id: vec![1, 2, 3],
            sign_count: count,
        }
    }

    #[tokio::test]
    async fn test_empty_list_when_never_set() {
        let (vault, _) = vault();
        assert!(vault.list("owner").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replace_and_list() {
        let (vault, store) = vault();
        let entries = vec![
            GrantEntry {
                id: "carol".into(),
                encrypted_credential: vault.seal_credential(&record(4)).unwrap(),
            },
            GrantEntry {
                id: "dave".into(),
                encrypted_credential: vault.seal_credential(&record(0)).unwrap(),
            },
        ];
        vault.replace("owner", &entries).await.unwrap();

        assert_eq!(vault.list("owner").await.unwrap(), entries);
        let count = store
            .get(&sign_count_uri("owner", "carol"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(count.value, json!(4));
        // index is sealed, ids are not visible in storage
        let index = store.get(&access_index_uri("owner")).await.unwrap().unwrap();
        assert!(!index.value.to_string().contains("carol"));
    }

    #[tokio::test]
    async fn test_dropped_users_are_removed() {
        let (vault, store) = vault();
        let carol = GrantEntry {
            id: "carol".into(),
            encrypted_credential: vault.seal_credential(&record(1)).unwrap(),
        };
        let dave = GrantEntry {
            id: "dave".into(),
            encrypted_credential: vault.seal_credential(&record(2)).unwrap(),
        };
        vault
            .replace("owner", &[carol.clone(), dave])
            .await
            .unwrap();
        vault.replace("owner", &[carol.clone()]).await.unwrap();

        assert_eq!(vault.list("owner").await.unwrap(), vec![carol]);
        assert!(store.get(&grant_uri("owner", "dave")).await.unwrap().is_none());
        assert!(store
            .get(&sign_count_uri("owner", "dave"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_foreign_blob_rejected_before_any_write() {
        let (vault, store) = vault();
        let foreign = SecretBox::new(&[1u8; 32]).unwrap();
        let entries = vec![GrantEntry {
            id: "mallory".into(),
            encrypted_credential: foreign.seal_json(&record(0)).unwrap(),
        }];

        assert_eq!(
            vault.replace("owner", &entries).await,
            Err(GrantError::InvalidCredential("mallory".into()))
        );
        assert!(store.is_empty());
    }

    /// Memory store whose writes to one URI fail
    struct FailingStore {
        inner: MemoryKeyStore,
        poisoned: String,
    }

    #[async_trait::async_trait]
    impl KeyStore for FailingStore {
        async fn uris(&self) -> Result<Vec<String>, StoreError> {
            self.inner.uris().await
        }

        async fn get(&self, uri: &str) -> Result<Option<crate::keystore::StoredEntry>, StoreError> {
            self.inner.get(uri).await
        }

        async fn get_by_issuer(
            &self,
            issuer_id: &str,
        ) -> Result<Option<(String, crate::keystore::StoredEntry)>, StoreError> {
            self.inner.get_by_issuer(issuer_id).await
        }

        async fn put(&self, uri: &str, value: Value, allow_update: bool) -> Result<String, StoreError> {
            if uri == self.poisoned {
                return Err(StoreError::Backend("disk full".into()));
            }
            self.inner.put(uri, value, allow_update).await
        }

        async fn remove(&self, uri: &str) -> Result<bool, StoreError> {
            self.inner.remove(uri).await
        }

        fn kind(&self) -> &'static str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_failed_write_keeps_previous_index() {
        let store = Arc::new(FailingStore {
            inner: MemoryKeyStore::new(),
            poisoned: sign_count_uri("owner", "dave"),
        });
        let vault = GrantVault::new(SecretBox::new(&[9u8; 32]).unwrap(), store.clone());
        let carol = GrantEntry {
            id: "carol".into(),
            encrypted_credential: vault.seal_credential(&record(1)).unwrap(),
        };
        let dave = GrantEntry {
            id: "dave".into(),
            encrypted_credential: vault.seal_credential(&record(2)).unwrap(),
        };
        vault.replace("owner", &[carol.clone()]).await.unwrap();

        assert!(matches!(
            vault.replace("owner", &[dave]).await,
            Err(GrantError::Store(StoreError::Backend(_)))
        ));

        // carol is still listed and her blob is still there
        assert_eq!(vault.list("owner").await.unwrap(), vec![carol]);
        assert!(store
            .get(&grant_uri("owner", "carol"))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_duplicate_ids_rejected() {
        let (vault, _) = vault();
        let blob = vault.seal_credential(&record(0)).unwrap();
        let entries = vec![
            GrantEntry {
                id: "x".into(),
                encrypted_credential: blob.clone(),
            },
            GrantEntry {
                id: "x".into(),
                encrypted_credential: blob,
            },
        ];
        assert_eq!(
            vault.replace("owner", &entries).await,
            Err(GrantError::DuplicateId("x".into()))
        );
    }
}
