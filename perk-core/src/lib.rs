//! Perk Core - protocol primitives for WebAuthn perk exchange
//!
//! This crate holds everything the perk server needs that is not HTTP:
//!
//! - Authenticated Challenges: session state sealed with AES-256-GCM and
//!   bound to an identity, a flow and an issue time
//! - Identity hashing so storage never sees identity names
//! - A key store capability with an in-memory backend, and the credential
//!   registry built on it (including startup reconciliation)
//! - Sealed access grants for delegated credential management
//! - Decoding of the compact tokens callers sign with their credential
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use perk_core::{ChallengeCodec, FlowType, SecretBox, SystemClock};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let key = SecretBox::generate_key();
//! let codec = ChallengeCodec::new(SecretBox::new(&key)?, Arc::new(SystemClock));
//!
//! let sealed = codec.seal("some-identity-hash", FlowType::Login, &serde_json::json!([1, 2]))?;
//! let payload = codec.open(&sealed, "some-identity-hash", FlowType::Login, 60_000)?;
//! assert_eq!(payload, serde_json::json!([1, 2]));
//! # Ok(())
//! # }
//! ```

pub mod challenge;
pub mod clock;
pub mod crypto;
pub mod error;
pub mod grant;
pub mod identity;
pub mod keystore;
pub mod record;
pub mod registry;
pub mod token;

// Re-export main types for convenience
pub use challenge::{
    ChallengeCodec, ChallengeHeader, ChallengeTransport, FlowType, SealedChallenges, SessionData,
    DEFAULT_TIMEOUT_MS,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use crypto::{Sealed, SecretBox, KEY_BYTES};
pub use error::{
    ChallengeError, CryptoError, GrantError, IdentityError, Result, StoreError, TokenError,
};
pub use grant::{GrantEntry, GrantVault};
pub use identity::{hash_identity, Identity, IdentityTable};
pub use keystore::{KeyStore, MemoryKeyStore, StoredEntry};
pub use record::{CredentialRecord, StoredCredential};
pub use registry::{CredentialRegistry, ReconcileReport};
