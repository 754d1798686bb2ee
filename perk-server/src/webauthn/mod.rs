//! WebAuthn ceremony capability for the perk server
//!
//! ## Architecture
//!
//! - `ceremony`: the [`Ceremony`] trait the controllers drive, plus perk
//!   assertion expectations
//! - `config`: WebAuthn Relying Party configuration
//! - `passkey`: [`Ceremony`] backed by webauthn-rs
//! - `mock`: software authenticator and matching ceremony (`test-utils`)
//! - `types`: wire types for browser credential responses

pub mod ceremony;
mod config;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
mod passkey;
pub mod types;

pub use ceremony::{
    AssertionExpectations, Ceremony, CeremonyError, CeremonyStart, CeremonyUser,
    ExpectationOverrides, Factor, LoginOutcome, VerifiedAssertion,
};
pub use config::{AttestationPreference, WebAuthnConfig};
#[cfg(any(test, feature = "test-utils"))]
pub use mock::{MockCeremony, SoftAuthenticator};
pub use passkey::PasskeyCeremony;
pub use types::{AssertionResponse, AttestationResponse, ByteBuf, ClientDataJson};
