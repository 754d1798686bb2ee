//! Ceremony capability
//!
//! The controllers never talk to a WebAuthn library directly. They drive a
//! [`Ceremony`], whose per-ceremony state is opaque JSON that gets sealed
//! into an Authenticated Challenge and handed back on completion.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use perk_core::CredentialRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{AssertionResponse, AttestationResponse};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CeremonyError {
    /// The client's response failed verification
    #[error("{0}")]
    Rejected(String),

    /// The authenticator counter did not advance
    #[error("authenticator counter did not increase, credential may be cloned")]
    PossibleClone,

    #[error("ceremony failure: {0}")]
    Internal(String),
}

/// The user a credential is created for
#[derive(Debug, Clone)]
pub struct CeremonyUser {
    /// Stable 16-byte user handle
    pub handle: [u8; 16],
    pub name: String,
    pub display_name: String,
}

/// Options for the browser plus state to seal until completion
#[derive(Debug, Clone, PartialEq)]
pub struct CeremonyStart {
    pub options: Value,
    pub state: Value,
}

/// Result of a successful login ceremony
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginOutcome {
    pub counter: u32,
    pub user_verified: bool,
}

/// Result of verifying an assertion over a caller-chosen challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedAssertion {
    /// The bytes the authenticator signed
    pub challenge: Vec<u8>,
    pub counter: u32,
    pub user_verified: bool,
}

/// Which authentication factor an assertion must represent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Factor {
    /// User verification (PIN or biometric) required
    First,
    /// User presence is enough
    Second,
    #[default]
    Either,
}

impl FromStr for Factor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" => Ok(Self::First),
            "second" => Ok(Self::Second),
            "either" => Ok(Self::Either),
            other => Err(format!("unknown factor {other:?} (expected first, second or either)")),
        }
    }
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::First => "first",
            Self::Second => "second",
            Self::Either => "either",
        })
    }
}

impl Factor {
    /// `userVerification` requested from the browser
    pub fn user_verification(&self) -> &'static str {
        match self {
            Self::First => "required",
            Self::Second => "discouraged",
            Self::Either => "preferred",
        }
    }

    pub fn accepts(&self, user_verified: bool) -> bool {
        match self {
            Self::First => user_verified,
            Self::Second | Self::Either => true,
        }
    }
}

/// What a perk assertion is checked against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionExpectations {
    pub origin: String,
    pub factor: Factor,
    /// Counter baseline; the assertion's counter must exceed it unless both are 0
    pub prev_counter: u32,
    pub user_handle: Option<Vec<u8>>,
}

/// Operator overrides for the per-request expectation defaults
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpectationOverrides {
    pub origin: Option<String>,
    pub factor: Option<Factor>,
    pub prev_counter: Option<u32>,
}

impl ExpectationOverrides {
    /// Defaults are origin `https://{host}`, factor either, counter baseline 0
    /// and the user handle carried by the assertion itself
    pub fn resolve(
        &self,
        host: Option<&str>,
        car: &AssertionResponse,
    ) -> Result<AssertionExpectations, CeremonyError> {
        let origin = match (&self.origin, host) {
            (Some(origin), _) => origin.clone(),
            (None, Some(host)) => format!("https://{host}"),
            (None, None) => {
                return Err(CeremonyError::Rejected(
                    "cannot derive expected origin without a Host header".into(),
                ))
            }
        };

        Ok(AssertionExpectations {
            origin,
            factor: self.factor.unwrap_or_default(),
            prev_counter: self.prev_counter.unwrap_or(0),
            user_handle: car.user_handle().map(<[u8]>::to_vec),
        })
    }
}

/// Counter check shared by login and perk verification
pub fn counter_regressed(counter: u32, baseline: u32) -> bool {
    (counter != 0 || baseline != 0) && counter <= baseline
}

#[async_trait]
pub trait Ceremony: Send + Sync {
    async fn begin_registration(&self, user: &CeremonyUser) -> Result<CeremonyStart, CeremonyError>;

    async fn finish_registration(
        &self,
        state: &Value,
        ccr: &AttestationResponse,
    ) -> Result<CredentialRecord, CeremonyError>;

    async fn begin_login(&self, record: &CredentialRecord) -> Result<CeremonyStart, CeremonyError>;

    async fn finish_login(
        &self,
        state: &Value,
        car: &AssertionResponse,
        record: &CredentialRecord,
    ) -> Result<LoginOutcome, CeremonyError>;

    /// Verify an assertion over whatever challenge the client signed
    async fn verify_assertion(
        &self,
        record: &CredentialRecord,
        car: &AssertionResponse,
        expectations: &AssertionExpectations,
    ) -> Result<VerifiedAssertion, CeremonyError>;

    fn name(&self) -> &'static str;
}
