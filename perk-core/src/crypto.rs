//! Symmetric authenticated encryption (AES-256-GCM)
//!
//! Used for sealing session data handed to clients and for the access-grant
//! blobs that administrators copy around. Every seal draws a fresh random
//! 96-bit nonce; the nonce travels next to the ciphertext.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Key size in bytes
pub const KEY_BYTES: usize = 32;

/// Nonce size in bytes (96 bits for GCM)
pub const NONCE_BYTES: usize = 12;

/// Transport form of a sealed value: both fields are standard base64
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sealed {
    pub ciphertext: String,
    pub nonce: String,
}

/// AES-256-GCM cipher bound to one key
#[derive(Clone)]
pub struct SecretBox {
    cipher: Aes256Gcm,
}

impl SecretBox {
    /// Create a secret box from raw key bytes (must be 32 bytes)
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != KEY_BYTES {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_BYTES,
                actual: key.len(),
            });
        }
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
            expected: KEY_BYTES,
            actual: key.len(),
        })?;
        Ok(Self { cipher })
    }

    /// Create a secret box from a base64-encoded key
    pub fn from_base64(key: &str) -> Result<Self, CryptoError> {
        let bytes = Zeroizing::new(
            BASE64
                .decode(key.trim())
                .map_err(|e| CryptoError::Encoding(e.to_string()))?,
        );
        Self::new(&bytes)
    }

    /// Generate a fresh random key
    pub fn generate_key() -> Zeroizing<Vec<u8>> {
        Zeroizing::new(Aes256Gcm::generate_key(&mut OsRng).to_vec())
    }

    /// Encrypt `plaintext` under a fresh random nonce
    pub fn seal(&self, plaintext: &[u8]) -> Result<Sealed, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CryptoError::Encryption)?;

        Ok(Sealed {
            ciphertext: BASE64.encode(ciphertext),
            nonce: BASE64.encode(nonce),
        })
    }

    /// Decrypt and authenticate a sealed value
    pub fn open(&self, sealed: &Sealed) -> Result<Vec<u8>, CryptoError> {
        let ciphertext = BASE64
            .decode(&sealed.ciphertext)
            .map_err(|e| CryptoError::Encoding(e.to_string()))?;
        let nonce_bytes = BASE64
            .decode(&sealed.nonce)
            .map_err(|e| CryptoError::Encoding(e.to_string()))?;

        // Nonce::from_slice panics on a wrong length
        if nonce_bytes.len() != NONCE_BYTES {
            return Err(CryptoError::Encoding(format!(
                "nonce must be {} bytes, got {}",
                NONCE_BYTES,
                nonce_bytes.len()
            )));
        }

        self.cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
            .map_err(|_| CryptoError::Decryption)
    }

    /// Serialize `value` as JSON and seal it
    pub fn seal_json<T: Serialize>(&self, value: &T) -> Result<Sealed, CryptoError> {
        let plaintext = Zeroizing::new(
            serde_json::to_vec(value).map_err(|e| CryptoError::Encoding(e.to_string()))?,
        );
        self.seal(&plaintext)
    }

    /// Open a sealed value and parse it as JSON
    pub fn open_json<T: for<'de> Deserialize<'de>>(&self, sealed: &Sealed) -> Result<T, CryptoError> {
        let plaintext = Zeroizing::new(self.open(sealed)?);
        serde_json::from_slice(&plaintext).map_err(|e| CryptoError::Encoding(e.to_string()))
    }
}

impl std::fmt::Debug for SecretBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretBox")
            .field("cipher", &"AES-256-GCM [REDACTED]")
            .finish()
    }
}
