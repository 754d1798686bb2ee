//! Authorization capability
//!
//! Turns `{issuer_id, assertion}` into a verified payload. The credential
//! record is found by issuer id, never by anything the request path says,
//! and the assertion must be signed by exactly that record's credential.

use std::sync::Arc;

use async_trait::async_trait;
use perk_core::{token, Clock, CredentialRecord, CredentialRegistry, IdentityTable};
use serde_json::Value;

use crate::error::ApiError;
use crate::webauthn::{AssertionExpectations, AssertionResponse, Ceremony, CeremonyError};

/// What a caller presents for authorization
#[derive(Debug, Clone)]
pub struct AuthzToken {
    pub issuer_id: String,
    pub assertion: AssertionResponse,
    pub expectations: AssertionExpectations,
}

/// A verified assertion and the identity that made it
#[derive(Debug, Clone, PartialEq)]
pub struct Authorization {
    /// Claims of the signed token
    pub payload: Value,
    /// Configured name of the identity owning the credential
    pub uri: String,
    /// Identity hash the record is stored under
    pub hash: String,
    pub issuer_id: String,
    pub record: CredentialRecord,
}

#[async_trait]
pub trait Authorize: Send + Sync {
    async fn authorize(&self, token: &AuthzToken) -> Result<Authorization, ApiError>;
}

/// Authorizes against credential records in the registry
pub struct RegistryAuthorizer {
    registry: CredentialRegistry,
    identities: Arc<IdentityTable>,
    excluded: Vec<Arc<IdentityTable>>,
    ceremony: Arc<dyn Ceremony>,
    clock: Arc<dyn Clock>,
}

impl RegistryAuthorizer {
    pub fn new(
        registry: CredentialRegistry,
        identities: Arc<IdentityTable>,
        ceremony: Arc<dyn Ceremony>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            identities,
            excluded: Vec::new(),
            ceremony,
            clock,
        }
    }

    /// Records owned by `other` identities are known but not accepted here
    pub fn excluding(mut self, other: Arc<IdentityTable>) -> Self {
        self.excluded.push(other);
        self
    }
}

#[async_trait]
impl Authorize for RegistryAuthorizer {
    async fn authorize(&self, token: &AuthzToken) -> Result<Authorization, ApiError> {
        let Some((hash, stored)) = self.registry.get_by_issuer(&token.issuer_id).await? else {
            tracing::warn!(issuer_id = %token.issuer_id, "No credential for issuer id");
            return Err(ApiError::issuer_mismatch());
        };

        if token.assertion.raw_id.as_slice() != stored.record.credential_id.as_slice() {
            tracing::warn!(
                issuer_id = %token.issuer_id,
                identity_hash = %hash,
                "Assertion credential does not match issuer's record"
            );
            return Err(ApiError::issuer_mismatch());
        }

        let verified = self
            .ceremony
            .verify_assertion(&stored.record, &token.assertion, &token.expectations)
            .await
            .map_err(|e| match e {
                CeremonyError::Rejected(reason) => {
                    tracing::warn!(issuer_id = %token.issuer_id, reason = %reason, "Assertion rejected");
                    ApiError::issuer_mismatch()
                }
                other => other.into(),
            })?;

        let Some(name) = self.identities.name_for_hash(&hash) else {
            if self.excluded.iter().any(|table| table.contains_hash(&hash)) {
                tracing::warn!(identity_hash = %hash, "Credential belongs to another identity class");
                return Err(ApiError::issuer_mismatch());
            }
            return Err(ApiError::UnknownIdentityHash(hash));
        };

        let now_secs = self.clock.now_millis() / 1000;
        let payload = token::decode_claims(&verified.challenge, now_secs)?;

        tracing::info!(
            issuer_id = %token.issuer_id,
            identity_hash = %hash,
            counter = verified.counter,
            "Assertion authorized"
        );

        Ok(Authorization {
            payload,
            uri: name.to_string(),
            hash,
            issuer_id: stored.issuer_id,
            record: stored.record,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webauthn::{CeremonyUser, Factor, MockCeremony, SoftAuthenticator};
    use perk_core::{token::encode_unsigned, ManualClock, MemoryKeyStore};
    use serde_json::json;

    const ORIGIN: &str = "https://localhost:3000";

    struct Fixture {
        authorizer: RegistryAuthorizer,
        registry: CredentialRegistry,
        ceremony: Arc<MockCeremony>,
        table: Arc<IdentityTable>,
    }

    fn fixture() -> Fixture {
        let registry = CredentialRegistry::new(Arc::new(MemoryKeyStore::new()));
        let table = Arc::new(IdentityTable::new("", ["u1", "u2"]).unwrap());
        let ceremony = Arc::new(MockCeremony::new(ORIGIN));
        let authorizer = RegistryAuthorizer::new(
            registry.clone(),
            table.clone(),
            ceremony.clone(),
            Arc::new(ManualClock::new(1_000_000)),
        );
        Fixture {
            authorizer,
            registry,
            ceremony,
            table,
        }
    }

    async fn register(f: &Fixture, name: &str, key: &SoftAuthenticator) -> String {
        let identity = f.table.resolve(name).unwrap();
        let user = CeremonyUser {
            handle: identity.user_handle(),
            name: name.into(),
            display_name: name.into(),
        };
        let start = f.ceremony.begin_registration(&user).await.unwrap();
        let record = f
            .ceremony
            .finish_registration(&start.state, &key.attest(&start.options))
            .await
            .unwrap();
        f.registry.put(&identity.hash, &record, false).await.unwrap()
    }

    fn token(issuer_id: &str, assertion: AssertionResponse) -> AuthzToken {
        AuthzToken {
            issuer_id: issuer_id.into(),
            assertion,
            expectations: AssertionExpectations {
                origin: ORIGIN.into(),
                factor: Factor::Either,
                prev_counter: 0,
                user_handle: None,
            },
        }
    }

    #[tokio::test]
    async fn test_authorizes_own_issuer() {
        let f = fixture();
        let key = SoftAuthenticator::new(ORIGIN);
        let issuer = register(&f, "u1", &key).await;

        let signed = encode_unsigned(&json!({ "foo": 90 }));
        let info = f
            .authorizer
            .authorize(&token(&issuer, key.assert(signed.as_bytes())))
            .await
            .unwrap();
        assert_eq!(info.payload, json!({ "foo": 90 }));
        assert_eq!(info.uri, "u1");
        assert_eq!(info.issuer_id, issuer);
    }

    #[tokio::test]
    async fn test_other_identitys_issuer_rejected() {
        let f = fixture();
        let key_a = SoftAuthenticator::new(ORIGIN);
        let key_b = SoftAuthenticator::new(ORIGIN);
        register(&f, "u1", &key_a).await;
        let issuer_b = register(&f, "u2", &key_b).await;

        let signed = encode_unsigned(&json!({}));
        let err = f
            .authorizer
            .authorize(&token(&issuer_b, key_a.assert(signed.as_bytes())))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::IssuerMismatch(ref m) if m == "signature validation failed"));
    }

    #[tokio::test]
    async fn test_unknown_issuer_rejected() {
        let f = fixture();
        let key = SoftAuthenticator::new(ORIGIN);
        let err = f
            .authorizer
            .authorize(&token("nope", key.assert(b"a.e30.")))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::IssuerMismatch(_)));
    }

    #[tokio::test]
    async fn test_record_for_unconfigured_hash_is_server_error() {
        let f = fixture();
        let key = SoftAuthenticator::new(ORIGIN);
        let ghost = perk_core::Identity::new("", "ghost");
        let user = CeremonyUser {
            handle: ghost.user_handle(),
            name: "ghost".into(),
            display_name: "ghost".into(),
        };
        let start = f.ceremony.begin_registration(&user).await.unwrap();
        let record = f
            .ceremony
            .finish_registration(&start.state, &key.attest(&start.options))
            .await
            .unwrap();
        let issuer = f.registry.put(&ghost.hash, &record, false).await.unwrap();

        let err = f
            .authorizer
            .authorize(&token(&issuer, key.assert(b"a.e30.")))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::UnknownIdentityHash(h) if h == ghost.hash));
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let f = fixture();
        let key = SoftAuthenticator::new(ORIGIN);
        let issuer = register(&f, "u1", &key).await;
        // clock is at 1000 s
        let signed = encode_unsigned(&json!({ "exp": 1000 }));
        let err = f
            .authorizer
            .authorize(&token(&issuer, key.assert(signed.as_bytes())))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }
}
