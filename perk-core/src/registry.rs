//! Credential registry adapter
//!
//! Typed view of the key store for per-identity credential records, which
//! live at the bare identity hash. Namespaced URIs (`namespace:owner[:...]`)
//! belong to the access-grant subsystem and are skipped by the typed
//! operations but covered by startup reconciliation.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::StoreError;
use crate::grant::{ACCESS_NAMESPACE, CREDENTIAL_NAMESPACE, SIGN_COUNT_NAMESPACE};
use crate::keystore::KeyStore;
use crate::record::{CredentialRecord, StoredCredential};

/// What a key store URI refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UriKind<'a> {
    /// Credential record of the identity with this hash
    Identity(&'a str),
    /// Access-grant record owned by this administrator hash
    Owned { namespace: &'a str, owner: &'a str },
    /// Something this registry does not manage
    Foreign,
}

pub fn classify_uri(uri: &str) -> UriKind<'_> {
    let mut parts = uri.splitn(3, ':');
    match (parts.next(), parts.next()) {
        (Some(hash), None) => UriKind::Identity(hash),
        (Some(namespace), Some(owner))
            if [ACCESS_NAMESPACE, CREDENTIAL_NAMESPACE, SIGN_COUNT_NAMESPACE]
                .contains(&namespace) =>
        {
            UriKind::Owned { namespace, owner }
        }
        _ => UriKind::Foreign,
    }
}

/// Outcome of startup reconciliation
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub removed: Vec<String>,
    pub failed: Vec<(String, String)>,
}

#[derive(Clone)]
pub struct CredentialRegistry {
    store: Arc<dyn KeyStore>,
}

impl CredentialRegistry {
    pub fn new(store: Arc<dyn KeyStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn KeyStore> {
        &self.store
    }

    /// Hashes of all stored credential records
    pub async fn list_uris(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .store
            .uris()
            .await?
            .iter()
            .filter_map(|uri| match classify_uri(uri) {
                UriKind::Identity(hash) => Some(hash.to_string()),
                _ => None,
            })
            .collect())
    }

    pub async fn get(&self, hash: &str) -> Result<Option<StoredCredential>, StoreError> {
        match self.store.get(hash).await? {
            Some(entry) => Ok(Some(StoredCredential {
                record: decode(entry.value)?,
                issuer_id: entry.issuer_id,
            })),
            None => Ok(None),
        }
    }

    /// Credential record created under `issuer_id`, with its identity hash
    pub async fn get_by_issuer(
        &self,
        issuer_id: &str,
    ) -> Result<Option<(String, StoredCredential)>, StoreError> {
        let Some((uri, entry)) = self.store.get_by_issuer(issuer_id).await? else {
            return Ok(None);
        };
        match classify_uri(&uri) {
            UriKind::Identity(hash) => Ok(Some((
                hash.to_string(),
                StoredCredential {
                    record: decode(entry.value)?,
                    issuer_id: entry.issuer_id,
                },
            ))),
            _ => Ok(None),
        }
    }

    /// Store a record; `allow_update = false` fails with `Conflict` if one exists
    pub async fn put(
        &self,
        hash: &str,
        record: &CredentialRecord,
        allow_update: bool,
    ) -> Result<String, StoreError> {
        let value =
            serde_json::to_value(record).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.store.put(hash, value, allow_update).await
    }

    pub async fn remove(&self, hash: &str) -> Result<bool, StoreError> {
        self.store.remove(hash).await
    }

    pub async fn deploy(&self) -> Result<(), StoreError> {
        self.store.deploy().await
    }

    /// Remove every record whose identity (or owning administrator) is not
    /// in `valid_hashes`.
    ///
    /// Runs once before the listener starts. A failed removal is logged and
    /// does not stop the others.
    pub async fn reconcile(
        &self,
        valid_hashes: &HashSet<String>,
    ) -> Result<ReconcileReport, StoreError> {
        let mut report = ReconcileReport::default();

        for uri in self.store.uris().await? {
            let stale = match classify_uri(&uri) {
                UriKind::Identity(hash) => !valid_hashes.contains(hash),
                UriKind::Owned { owner, .. } => !valid_hashes.contains(owner),
                UriKind::Foreign => false,
            };
            if !stale {
                continue;
            }

            match self.store.remove(&uri).await {
                Ok(_) => {
                    tracing::info!(uri = %uri, "Removed record for unconfigured identity");
                    report.removed.push(uri);
                }
                Err(e) => {
                    tracing::warn!(uri = %uri, error = %e, "Failed to remove stale record");
                    report.failed.push((uri, e.to_string()));
                }
            }
        }

        if !report.removed.is_empty() {
            self.store.deploy().await?;
        }

        Ok(report)
    }
}

impl std::fmt::Debug for CredentialRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRegistry")
            .field("store", &self.store.kind())
            .finish()
    }
}

fn decode(value: serde_json::Value) -> Result<CredentialRecord, StoreError> {
    serde_json::from_value(value).map_err(|e| StoreError::Serialization(e.to_string()))
}
