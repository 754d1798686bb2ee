//! Server configuration module
//!
//! One typed configuration loaded from environment variables with documented
//! defaults and validated once before the listener starts.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;

use perk_core::{CryptoError, IdentityError, IdentityTable, SecretBox, DEFAULT_TIMEOUT_MS};
use thiserror::Error;
use url::Url;

use crate::webauthn::{AttestationPreference, ExpectationOverrides, Factor, WebAuthnConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid {var}: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error("no identities configured")]
    NoIdentities,

    #[error("invalid identity list: {0}")]
    Identity(#[from] IdentityError),

    #[error("access administrator {0:?} collides with a user identity")]
    AdminCollision(String),

    #[error("invalid key in {var}: {source}")]
    Key {
        var: &'static str,
        #[source]
        source: CryptoError,
    },

    #[error("WebAuthn configuration failed: {0}")]
    Webauthn(String),

    #[error("perk exchange configured without a handler")]
    MissingHandler,
}

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port (default: 3000)
    pub port: u16,
    /// Server host (default: 127.0.0.1)
    pub host: IpAddr,
    /// Allowed CORS origins, comma-separated (default: allow all in dev)
    pub allowed_origins: Option<Vec<String>>,
    /// Request body limit in KB (default: 64)
    pub body_limit_kb: usize,
    /// Request timeout in seconds (default: 30)
    pub timeout_secs: u64,
    /// Enable rate limiting (default: false for tests, true when loaded from env)
    pub rate_limit_enabled: bool,
    /// Rate limit: requests per second (default: 10)
    pub rate_limit_per_sec: u64,
    /// Rate limit: burst size (default: 20)
    pub rate_limit_burst: u32,
    /// PostgreSQL key store; in-memory store when unset
    pub database_url: Option<String>,
    /// Database connection pool maximum connections (default: 10)
    pub database_max_connections: u32,

    /// Identity names allowed to hold a credential
    pub valid_ids: Vec<String>,
    /// Namespace prefix combined with each name before hashing
    pub id_prefix: String,
    /// Base64 AES-256 key for session data; generated at boot when unset
    pub session_data_key: Option<String>,
    /// Session data lifetime in milliseconds (default: 60000)
    pub session_timeout_ms: u64,

    /// Relying Party ID (default: localhost)
    pub rp_id: String,
    /// Relying Party origin (default: https://localhost:3000)
    pub rp_origin: String,
    /// Relying Party display name
    pub rp_name: String,
    /// Attestation conveyance preference (default: none)
    pub attestation: AttestationPreference,

    /// Expected origin for perk assertions instead of `https://{Host}`
    pub trusted_origin: Option<String>,
    /// Expected authentication factor for perk assertions
    pub expected_factor: Factor,

    /// Access administrators; `/access/` is enabled when set
    pub access_ids: Option<Vec<String>>,
    /// Namespace prefix for administrator names (default: "access/")
    pub access_prefix: String,
    /// Base64 AES-256 key sealing access-grant blobs
    pub credential_secret_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            allowed_origins: None, // None = allow all (dev mode)
            body_limit_kb: 64,
            timeout_secs: 30,
            rate_limit_enabled: false, // Disabled by default (for tests)
            rate_limit_per_sec: 10,
            rate_limit_burst: 20,
            database_url: None,
            database_max_connections: 10,
            valid_ids: Vec::new(),
            id_prefix: String::new(),
            session_data_key: None,
            session_timeout_ms: DEFAULT_TIMEOUT_MS,
            rp_id: "localhost".to_string(),
            rp_origin: "https://localhost:3000".to_string(),
            rp_name: "WebAuthn Perk".to_string(),
            attestation: AttestationPreference::None,
            trusted_origin: None,
            expected_factor: Factor::Either,
            access_ids: None,
            access_prefix: "access/".to_string(),
            credential_secret_key: None,
        }
    }
}

/// Reads settings by name; the process environment in production
struct Settings<F> {
    lookup: F,
}

impl<F> Settings<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, var: &str) -> Option<String> {
        (self.lookup)(var)
    }

    fn list(&self, var: &str) -> Option<Vec<String>> {
        self.get(var).map(|values| {
            values
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
    }

    fn parsed<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.get(var) {
            Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                var,
                reason: format!("{value:?}: {e}"),
            }),
            None => Ok(default),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration from any source of named settings
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Settings { lookup };
        let defaults = Self::default();

        // Rate limiting enabled by default in production, can be disabled with RATE_LIMIT_ENABLED=false
        let rate_limit_enabled = env
            .get("RATE_LIMIT_ENABLED")
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(true);

        let valid_ids = env.list("PERK_VALID_IDS").ok_or(ConfigError::Missing("PERK_VALID_IDS"))?;

        Ok(Self {
            port: env.parsed("PORT", defaults.port)?,
            host: env.parsed("HOST", defaults.host)?,
            allowed_origins: env.list("ALLOWED_ORIGINS"),
            body_limit_kb: env.parsed("BODY_LIMIT_KB", defaults.body_limit_kb)?,
            timeout_secs: env.parsed("REQUEST_TIMEOUT_SECS", defaults.timeout_secs)?,
            rate_limit_enabled,
            rate_limit_per_sec: env.parsed("RATE_LIMIT_PER_SEC", defaults.rate_limit_per_sec)?,
            rate_limit_burst: env.parsed("RATE_LIMIT_BURST", defaults.rate_limit_burst)?,
            database_url: env.get("DATABASE_URL"),
            database_max_connections: env
                .parsed("DATABASE_MAX_CONNECTIONS", defaults.database_max_connections)?,
            valid_ids,
            id_prefix: env.get("PERK_ID_PREFIX").unwrap_or(defaults.id_prefix),
            session_data_key: env.get("PERK_SESSION_DATA_KEY"),
            session_timeout_ms: env.parsed("PERK_SESSION_TIMEOUT_MS", defaults.session_timeout_ms)?,
            rp_id: env.get("WEBAUTHN_RP_ID").unwrap_or(defaults.rp_id),
            rp_origin: env.get("WEBAUTHN_RP_ORIGIN").unwrap_or(defaults.rp_origin),
            rp_name: env.get("WEBAUTHN_RP_NAME").unwrap_or(defaults.rp_name),
            attestation: env.parsed("PERK_ATTESTATION", defaults.attestation)?,
            trusted_origin: env.get("PERK_TRUSTED_ORIGIN"),
            expected_factor: env.parsed("PERK_EXPECTED_FACTOR", defaults.expected_factor)?,
            access_ids: env.list("PERK_ACCESS_IDS").filter(|ids| !ids.is_empty()),
            access_prefix: env.get("PERK_ACCESS_PREFIX").unwrap_or(defaults.access_prefix),
            credential_secret_key: env.get("PERK_CREDENTIAL_SECRET_KEY"),
        })
    }

    /// Reject configurations the server cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let users = self.identity_table()?;

        if self.session_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                var: "PERK_SESSION_TIMEOUT_MS",
                reason: "must be greater than zero".into(),
            });
        }

        if let Some(key) = &self.session_data_key {
            SecretBox::from_base64(key).map_err(|source| ConfigError::Key {
                var: "PERK_SESSION_DATA_KEY",
                source,
            })?;
        }

        Url::parse(&self.rp_origin).map_err(|e| ConfigError::Invalid {
            var: "WEBAUTHN_RP_ORIGIN",
            reason: e.to_string(),
        })?;
        if let Some(origin) = &self.trusted_origin {
            Url::parse(origin).map_err(|e| ConfigError::Invalid {
                var: "PERK_TRUSTED_ORIGIN",
                reason: e.to_string(),
            })?;
        }

        if let Some(admins) = self.access_table()? {
            for admin in admins.iter() {
                if users.contains_hash(&admin.hash) {
                    return Err(ConfigError::AdminCollision(admin.name.clone()));
                }
            }
            let key = self
                .credential_secret_key
                .as_deref()
                .ok_or(ConfigError::Missing("PERK_CREDENTIAL_SECRET_KEY"))?;
            SecretBox::from_base64(key).map_err(|source| ConfigError::Key {
                var: "PERK_CREDENTIAL_SECRET_KEY",
                source,
            })?;
        }

        Ok(())
    }

    /// Get socket address from config
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Configured user identities
    pub fn identity_table(&self) -> Result<IdentityTable, ConfigError> {
        if self.valid_ids.is_empty() {
            return Err(ConfigError::NoIdentities);
        }
        Ok(IdentityTable::new(&self.id_prefix, &self.valid_ids)?)
    }

    /// Configured access administrators, if access control is enabled
    pub fn access_table(&self) -> Result<Option<IdentityTable>, ConfigError> {
        match &self.access_ids {
            Some(ids) if !ids.is_empty() => {
                Ok(Some(IdentityTable::new(&self.access_prefix, ids)?))
            }
            _ => Ok(None),
        }
    }

    /// Session data key, or a fresh one when none is configured
    pub fn session_secret(&self) -> Result<SecretBox, ConfigError> {
        match &self.session_data_key {
            Some(key) => SecretBox::from_base64(key).map_err(|source| ConfigError::Key {
                var: "PERK_SESSION_DATA_KEY",
                source,
            }),
            None => {
                tracing::warn!(
                    "PERK_SESSION_DATA_KEY not set, using a generated key: session data will not survive restarts"
                );
                SecretBox::new(&SecretBox::generate_key()).map_err(|source| ConfigError::Key {
                    var: "PERK_SESSION_DATA_KEY",
                    source,
                })
            }
        }
    }

    pub fn credential_secret(&self) -> Result<Option<SecretBox>, ConfigError> {
        self.credential_secret_key
            .as_deref()
            .map(|key| {
                SecretBox::from_base64(key).map_err(|source| ConfigError::Key {
                    var: "PERK_CREDENTIAL_SECRET_KEY",
                    source,
                })
            })
            .transpose()
    }

    pub fn webauthn_config(&self) -> Result<WebAuthnConfig, ConfigError> {
        let origin = Url::parse(&self.rp_origin).map_err(|e| ConfigError::Invalid {
            var: "WEBAUTHN_RP_ORIGIN",
            reason: e.to_string(),
        })?;
        WebAuthnConfig::new(&self.rp_id, &origin, &self.rp_name)
            .map(|config| {
                config
                    .with_attestation(self.attestation)
                    .with_factor(self.expected_factor)
            })
            .map_err(|e| ConfigError::Webauthn(e.to_string()))
    }

    pub fn expectation_overrides(&self) -> ExpectationOverrides {
        ExpectationOverrides {
            origin: self.trusted_origin.clone(),
            factor: Some(self.expected_factor),
            prev_counter: None,
        }
    }
}
