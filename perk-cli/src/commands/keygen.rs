//! Keygen command implementation.

use anyhow::Result;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use perk_core::{SecretBox, KEY_BYTES};
use tracing::debug;

/// Print a fresh key, base64 encoded, on stdout.
pub fn execute() -> Result<()> {
    let key = SecretBox::generate_key();
    debug!(bytes = KEY_BYTES, "Generated key");
    println!("{}", BASE64.encode(key.as_slice()));
    Ok(())
}
