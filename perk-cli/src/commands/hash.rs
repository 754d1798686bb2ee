//! Hash command implementation.
//!
//! Records are stored under the hash of the prefixed name, so this is how
//! an operator finds (or deletes) an identity's record by hand.

use anyhow::{bail, Result};
use colored::Colorize;
use perk_core::Identity;

pub fn execute(names: &[String], prefix: &str) -> Result<()> {
    for name in names {
        if name.is_empty() {
            bail!("identity names must not be empty");
        }
        let identity = Identity::new(prefix, name);
        println!("{}  {}", identity.hash, identity.prefixed_id.dimmed());
    }
    Ok(())
}
