#![deny(unsafe_code)]

mod auth;
mod commands;
mod config;
mod exit_code;
mod output;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use tracing_subscriber::EnvFilter;

use mudvault_core::error::{KeyStoreError, ReplicationError, StorageError};
use mudvault_core::{KeyStore, LocalStorage, VaultConfig};

use crate::auth::SecretOptions;
use crate::commands::{init, pull, push, status, verify};

/// Encrypted, journaled backups of an object store
#[derive(Parser)]
#[command(name = "mudvault")]
#[command(author, version)]
#[command(propagate_version = true)]
#[command(after_help = "EXAMPLES:
    # Back up a directory of containers into a vault
    mudvault push --vault ~/vault --source /srv/objects

    # Restore everything the vault has ever seen
    echo \"$SECRET\" | mudvault --secret-stdin pull --vault ~/vault --target /srv/restored

    # Compare the live objects against the vault
    mudvault verify --vault ~/vault --source /srv/objects
")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// TOML configuration file
    #[arg(long, env = "MUDVAULT_CONFIG", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Root secret (insecure, prefer --secret-stdin or MUDVAULT_SECRET)
    #[arg(long, env = "MUDVAULT_SECRET", hide_env_values = true, global = true)]
    secret: Option<String>,

    /// Read the root secret from stdin (single line)
    #[arg(long, conflicts_with = "secret", global = true)]
    secret_stdin: bool,

    /// Override the scrypt cost factor (log2 N)
    #[arg(long, env = "MUDVAULT_SCRYPT_COST", value_name = "LOG_N", global = true)]
    scrypt_cost: Option<u8>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the key store of a new vault
    Init(init::Args),

    /// Back up a directory cluster into the vault
    Push(push::Args),

    /// Restore the vault's journal into a directory cluster
    Pull(pull::Args),

    /// Compare a directory cluster against the vault
    Verify(verify::Args),

    /// Show key store state and journal generations
    Status(status::Args),
}

/// What every command gets: resolved configuration and a way to obtain the secret.
pub struct AppContext {
    pub config: VaultConfig,
    pub quiet: bool,
    secret: SecretOptions,
}

impl AppContext {
    /// Acquire the root secret. Prompts only when no other source was given.
    pub fn secret(&self) -> Result<SecretString> {
        auth::get_secret(&self.secret)
    }

    /// Key store over the vault directory, still sealed.
    pub fn key_store(&self, vault: &std::path::Path) -> Arc<KeyStore> {
        Arc::new(KeyStore::new(Arc::new(LocalStorage::new(vault))))
    }

    /// Key store over an existing vault, unsealed.
    pub async fn unsealed_key_store(&self, vault: &std::path::Path) -> Result<Arc<KeyStore>> {
        let keys = self.key_store(vault);
        if !keys.is_initialized().await? {
            anyhow::bail!(
                "No vault at {} (run `mudvault init` first)",
                vault.display()
            );
        }
        let secret = self.secret()?;
        keys.unseal(&secret, &self.config.scrypt)
            .await
            .context("Failed to unseal vault - check your secret")?;
        Ok(keys)
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::from(exit_code::SUCCESS),
        Err(e) => {
            let code = categorize_error(&e);
            let args: Vec<String> = std::env::args().collect();
            let is_quiet = args.iter().any(|a| a == "-q" || a == "--quiet");
            if !is_quiet {
                eprintln!("Error: {e:#}");
            }
            ExitCode::from(code)
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    if !cli.quiet {
        setup_tracing(cli.verbose);
    }

    let mut vault_config = config::load(cli.config.as_deref())?;
    if let Some(log_n) = cli.scrypt_cost {
        vault_config.scrypt = vault_config.scrypt.with_log_n(log_n);
    }

    let ctx = AppContext {
        config: vault_config,
        quiet: cli.quiet,
        secret: SecretOptions {
            secret: cli.secret.clone(),
            secret_stdin: cli.secret_stdin,
        },
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(async {
        match cli.command {
            Commands::Init(args) => init::execute(&ctx, &args).await,
            Commands::Push(args) => push::execute(&ctx, &args).await,
            Commands::Pull(args) => pull::execute(&ctx, &args).await,
            Commands::Verify(args) => verify::execute(&ctx, &args).await,
            Commands::Status(args) => status::execute(&ctx, &args).await,
        }
    })
}

/// Set up tracing/logging based on verbosity level
fn setup_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(io::stderr)
        .init();
}

/// Map an error chain onto an exit code by downcasting the library errors.
fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if let Some(code) = cause.downcast_ref::<KeyStoreError>().and_then(key_store_code) {
            return code;
        }

        if let Some(repl_err) = cause.downcast_ref::<ReplicationError>() {
            match repl_err {
                ReplicationError::MissingState => return exit_code::NOT_FOUND,
                ReplicationError::JournalExists => return exit_code::CONFLICT,
                ReplicationError::UnsupportedVersion(_) => return exit_code::VAULT_INVALID,
                _ => {}
            }
        }

        match cause.downcast_ref::<StorageError>() {
            Some(StorageError::NotFound { .. }) => return exit_code::NOT_FOUND,
            // Boxed, so the chain yields the box rather than the error itself
            Some(StorageError::KeyStore(inner)) => {
                if let Some(code) = key_store_code(inner) {
                    return code;
                }
            }
            _ => {}
        }

        if cause.downcast_ref::<verify::VerificationFailed>().is_some() {
            return exit_code::VERIFY_FAILED;
        }

        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            match io_err.kind() {
                io::ErrorKind::PermissionDenied => return exit_code::PERMISSION_DENIED,
                io::ErrorKind::NotFound => return exit_code::NOT_FOUND,
                _ => {}
            }
        }
    }
    exit_code::GENERAL_ERROR
}

fn key_store_code(err: &KeyStoreError) -> Option<u8> {
    match err {
        KeyStoreError::InvalidSecret => Some(exit_code::AUTH_FAILED),
        KeyStoreError::NotInitialized | KeyStoreError::MissingKey { .. } => {
            Some(exit_code::NOT_FOUND)
        }
        KeyStoreError::UnsupportedMetadata { .. } => Some(exit_code::VAULT_INVALID),
        _ => None,
    }
}
