use thiserror::Error;

/// Failures opening an Authenticated Challenge.
///
/// The HTTP layer reports every variant as the same 400 response; they stay
/// distinct here so callers and tests can tell them apart.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChallengeError {
    #[error("session data failed authentication")]
    ChallengeInvalid,

    #[error("session data was issued for a different identity")]
    WrongIdentity,

    #[error("session data was issued for flow {actual}, expected {expected}")]
    WrongFlowType { expected: String, actual: String },

    #[error("session data expired (issued_at={issued_at}, timeout={timeout_ms}ms, now={now})")]
    ChallengeExpired {
        issued_at: u64,
        timeout_ms: u64,
        now: u64,
    },

    #[error("session data serialization error: {0}")]
    Serialization(String),
}

/// Failures of the symmetric secret box.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("invalid encoding: {0}")]
    Encoding(String),

    #[error("decryption failed")]
    Decryption,

    #[error("encryption failed")]
    Encryption,
}

/// Failures of the external key store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("record already exists: {0}")]
    Conflict(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("record serialization error: {0}")]
    Serialization(String),
}

/// Failures decoding the caller-signed token.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("signed data is not a compact token")]
    Malformed,

    #[error("token payload is not valid: {0}")]
    InvalidPayload(String),

    #[error("token expired")]
    Expired,

    #[error("token not yet valid")]
    NotYetValid,
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Failures building the identity table.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("identity name must not be empty")]
    EmptyName,

    #[error("identity configured twice: {0}")]
    Duplicate(String),
}

/// Failures reading or writing access grants.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GrantError {
    #[error("registration code for {0:?} does not open under the credential key")]
    InvalidCredential(String),

    #[error("user listed twice: {0}")]
    DuplicateId(String),

    #[error("stored grant index is unreadable: {0}")]
    CorruptIndex(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
