//! Sealmail CLI: key management and envelope sealing/opening.
//!
//! Usage:
//!   sealmail keygen <identity> [--bits 2048|4096]
//!   sealmail status [<identity>]
//!   sealmail list
//!   sealmail export <identity>
//!   sealmail import <identity> <blob|->
//!   sealmail delete <identity>
//!   sealmail seal --from <identity> --to <identity> [--encrypt] [--sign]  < plaintext
//!   sealmail open --as <identity> [--json]                                < envelope
//!   sealmail inspect                                                      < envelope

mod commands;
mod config;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use config::{Config, LogFormat};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// Sealmail: hybrid RSA + AES-256-GCM mail envelopes.
#[derive(Parser, Debug)]
#[command(name = "sealmail", version, about)]
struct Cli {
    /// Directory holding key files [env: SEALMAIL_KEYS_DIR] [default: keys]
    #[arg(long, global = true)]
    keys_dir: Option<PathBuf>,

    /// Append audit events as JSON lines to this file [env: SEALMAIL_AUDIT_LOG]
    #[arg(long, global = true)]
    audit_log: Option<PathBuf>,

    /// Log output format [env: SEALMAIL_LOG_FORMAT]
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate a key pair, replacing any existing one.
    Keygen {
        identity: String,
        /// RSA modulus size: 2048 or 4096.
        #[arg(long, default_value_t = 2048)]
        bits: usize,
    },
    /// Show which key halves are stored.
    Status { identity: Option<String> },
    /// List every identity with stored keys.
    List,
    /// Print the shareable public key blob.
    Export { identity: String },
    /// Store someone's public key ("-" reads the blob from stdin).
    Import { identity: String, blob: String },
    /// Delete both halves of a key pair.
    Delete { identity: String },
    /// Read plaintext from stdin and write the envelope to stdout.
    Seal {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        encrypt: bool,
        #[arg(long)]
        sign: bool,
    },
    /// Read an envelope from stdin and write the message to stdout.
    Open {
        #[arg(long = "as", value_name = "IDENTITY")]
        recipient: String,
        /// Print the full processing result as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Describe an envelope from stdin without using any key.
    Inspect,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::resolve(cli.keys_dir, cli.audit_log, cli.log_format) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    config.init_tracing();

    let mut stdin = std::io::stdin().lock();
    let mut stdout = std::io::stdout().lock();
    match commands::run(cli.command, &config, &mut stdin, &mut stdout).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
