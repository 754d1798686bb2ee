//! Subcommand implementations

pub mod hash;
pub mod keygen;
pub mod open_grant;
