//! Identity hashing and lookup
//!
//! Storage never sees an identity name: records are addressed by the SHA3-256
//! digest (hex) of the name combined with a deployment prefix. The table
//! built at startup maps those hashes back to names.

use std::collections::{HashMap, HashSet};

use sha3::{Digest, Sha3_256};

use crate::error::IdentityError;

/// One-way digest of a prefixed identity, hex encoded
pub fn hash_identity(prefixed_id: &str) -> String {
    hex::encode(Sha3_256::digest(prefixed_id.as_bytes()))
}

/// A configured principal allowed to hold one credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub prefixed_id: String,
    pub hash: String,
}

impl Identity {
    pub fn new(prefix: &str, name: &str) -> Self {
        let prefixed_id = format!("{prefix}{name}");
        let hash = hash_identity(&prefixed_id);
        Self {
            name: name.to_string(),
            prefixed_id,
            hash,
        }
    }

    /// Stable 16-byte user handle derived from the hash
    pub fn user_handle(&self) -> [u8; 16] {
        let mut handle = [0u8; 16];
        // hash is always 64 hex chars
        if let Ok(bytes) = hex::decode(&self.hash[..32]) {
            handle.copy_from_slice(&bytes);
        }
        handle
    }
}

/// Configured identities indexed by hash
#[derive(Debug, Clone, Default)]
pub struct IdentityTable {
    prefix: String,
    by_hash: HashMap<String, Identity>,
}

impl IdentityTable {
    pub fn new<I, S>(prefix: &str, names: I) -> Result<Self, IdentityError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut by_hash = HashMap::new();
        for name in names {
            let name = name.as_ref();
            if name.is_empty() {
                return Err(IdentityError::EmptyName);
            }
            let identity = Identity::new(prefix, name);
            if by_hash.contains_key(&identity.hash) {
                return Err(IdentityError::Duplicate(name.to_string()));
            }
            by_hash.insert(identity.hash.clone(), identity);
        }

        Ok(Self {
            prefix: prefix.to_string(),
            by_hash,
        })
    }

    /// Resolve a request path segment to a configured identity
    pub fn resolve(&self, name: &str) -> Option<&Identity> {
        self.by_hash.get(&hash_identity(&format!("{}{}", self.prefix, name)))
    }

    pub fn by_hash(&self, hash: &str) -> Option<&Identity> {
        self.by_hash.get(hash)
    }

    pub fn name_for_hash(&self, hash: &str) -> Option<&str> {
        self.by_hash.get(hash).map(|identity| identity.name.as_str())
    }

    pub fn contains_hash(&self, hash: &str) -> bool {
        self.by_hash.contains_key(hash)
    }

    pub fn hashes(&self) -> HashSet<String> {
        self.by_hash.keys().cloned().collect()
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Identity> {
        self.by_hash.values()
    }
}
