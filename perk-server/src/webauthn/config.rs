//! WebAuthn Relying Party configuration
//!
//! Configures the WebAuthn library with Relying Party (RP) identity.

use std::fmt;
use std::str::FromStr;

use url::Url;
use webauthn_rs::prelude::*;

use super::ceremony::Factor;

/// Attestation conveyance preference put into creation options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AttestationPreference {
    #[default]
    None,
    Indirect,
    Direct,
}

impl AttestationPreference {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Indirect => "indirect",
            Self::Direct => "direct",
        }
    }
}

impl FromStr for AttestationPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "indirect" => Ok(Self::Indirect),
            "direct" => Ok(Self::Direct),
            other => Err(format!(
                "unknown attestation preference {other:?} (expected none, indirect or direct)"
            )),
        }
    }
}

impl fmt::Display for AttestationPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// WebAuthn configuration wrapper
pub struct WebAuthnConfig {
    webauthn: Webauthn,
    origin: Url,
    attestation: AttestationPreference,
    factor: Factor,
}

impl WebAuthnConfig {
    /// Create a new WebAuthn configuration
    ///
    /// # Arguments
    ///
    /// * `rp_id` - Relying Party ID (typically the domain name)
    /// * `rp_origin` - Relying Party origin URL
    /// * `rp_name` - Human-readable name for the Relying Party
    pub fn new(rp_id: &str, rp_origin: &Url, rp_name: &str) -> Result<Self, WebauthnError> {
        let builder = WebauthnBuilder::new(rp_id, rp_origin)?
            .rp_name(rp_name)
            .allow_subdomains(false);

        Ok(Self {
            webauthn: builder.build()?,
            origin: rp_origin.clone(),
            attestation: AttestationPreference::default(),
            factor: Factor::default(),
        })
    }

    pub fn with_attestation(mut self, attestation: AttestationPreference) -> Self {
        self.attestation = attestation;
        self
    }

    /// Factor the ceremonies ask browsers for and enforce
    pub fn with_factor(mut self, factor: Factor) -> Self {
        self.factor = factor;
        self
    }

    /// Get a reference to the Webauthn instance
    pub fn webauthn(&self) -> &Webauthn {
        &self.webauthn
    }

    /// Origin as browsers report it in client data (no trailing slash)
    pub fn origin(&self) -> String {
        self.origin.origin().ascii_serialization()
    }

    pub fn attestation(&self) -> AttestationPreference {
        self.attestation
    }

    pub fn factor(&self) -> Factor {
        self.factor
    }
}

impl fmt::Debug for WebAuthnConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebAuthnConfig")
            .field("webauthn", &"<Webauthn instance>")
            .field("origin", &self.origin.as_str())
            .field("attestation", &self.attestation)
            .field("factor", &self.factor)
            .finish()
    }
}
