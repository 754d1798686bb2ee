//! Open-grant command implementation.

use std::io::Read;
use std::path::Path;

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use colored::Colorize;
use perk_core::{CredentialRecord, GrantEntry, Sealed, SecretBox};
use serde_json::Value;
use tracing::debug;

fn read_input(input: &Path) -> Result<String> {
    if input == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read file: {}", input.display()))
}

/// Labeled sealed values found in a document
///
/// Accepts a bare `{ciphertext, nonce}`, one `{id, encrypted_credential}`
/// entry, a list of entries, or `{encrypted_credentials: [...]}`.
fn sealed_values(document: Value) -> Result<Vec<(String, Sealed)>> {
    let has = |field: &str| document.get(field).is_some();

    let entries: Vec<GrantEntry> = if has("ciphertext") {
        let sealed: Sealed = serde_json::from_value(document).context("Invalid sealed value")?;
        return Ok(vec![(String::new(), sealed)]);
    } else if has("encrypted_credential") {
        vec![serde_json::from_value(document).context("Invalid sealed value")?]
    } else if has("encrypted_credentials") {
        serde_json::from_value(document["encrypted_credentials"].clone())
            .context("Invalid sealed value")?
    } else if document.is_array() {
        serde_json::from_value(document).context("Invalid sealed value")?
    } else {
        bail!("Invalid sealed value: expected a sealed object, an entry or a list");
    };

    Ok(entries
        .into_iter()
        .map(|entry| (entry.id, entry.encrypted_credential))
        .collect())
}

fn describe(record: &CredentialRecord) -> Value {
    serde_json::json!({
        "credential_id": URL_SAFE_NO_PAD.encode(&record.credential_id),
        "sign_count": record.sign_count,
        "public_key": record.public_key,
    })
}

pub fn execute(input: &Path, key: &str) -> Result<()> {
    let secret = SecretBox::from_base64(key).context("Invalid key")?;
    let text = read_input(input)?;
    let document: Value = serde_json::from_str(text.trim()).context("Invalid sealed value")?;

    let values = sealed_values(document)?;
    debug!(count = values.len(), "Opening sealed values");

    for (id, sealed) in values {
        let record: CredentialRecord = secret
            .open_json(&sealed)
            .with_context(|| format!("Invalid sealed value for {id:?}"))?;
        if !id.is_empty() {
            println!("{}", id.bold());
        }
        println!("{}", serde_json::to_string_pretty(&describe(&record))?);
    }
    Ok(())
}
