//! Perk CLI - operator tooling for the WebAuthn perk server.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod exit_codes;

use exit_codes::ExitCode;

#[derive(Parser)]
#[command(name = "perk")]
#[command(author, version, about = "Operator tooling for the WebAuthn perk server", long_about = None)]
#[command(after_help = "Exit codes:\n  0   success\n  1   general error\n  65  data error (sealed value does not open, bad key)\n  66  input file cannot be read")]
struct Cli {
    /// Log progress to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a base64 AES-256 key for PERK_SESSION_DATA_KEY or PERK_CREDENTIAL_SECRET_KEY
    Keygen,

    /// Compute the storage hash of identity names
    Hash {
        /// Identity names
        #[arg(value_name = "NAME", required = true)]
        names: Vec<String>,

        /// Namespace prefix (PERK_ID_PREFIX, or PERK_ACCESS_PREFIX for administrators)
        #[arg(short, long, default_value = "")]
        prefix: String,
    },

    /// Decrypt a registration code and print the credential record it holds
    OpenGrant {
        /// File holding the sealed value, an access entry or a list (`-` for stdin)
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Base64 credential secret key
        #[arg(short, long, env = "PERK_CREDENTIAL_SECRET_KEY", hide_env_values = true)]
        key: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose { "perk=debug,perk_core=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Keygen => commands::keygen::execute(),
        Commands::Hash { names, prefix } => commands::hash::execute(&names, &prefix),
        Commands::OpenGrant { input, key } => commands::open_grant::execute(&input, &key),
    };

    let exit = match result {
        Ok(()) => ExitCode::success(),
        Err(err) => ExitCode::from_anyhow(&err),
    };
    if let Some(message) = exit.message {
        eprintln!("{} {}", colored::Colorize::red("error:"), message);
    }
    std::process::exit(exit.code);
}
