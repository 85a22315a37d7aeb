//! Push command - back up a directory cluster into the vault.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use tracing::{info, instrument};

use mudvault_core::{DirectoryCluster, JournalMode, Replicator};

use crate::AppContext;
use crate::output::format_bytes;

#[derive(ClapArgs)]
pub struct Args {
    /// Vault directory; a key store is created on first use
    #[arg(long)]
    pub vault: PathBuf,

    /// Directory whose subdirectories are the containers to back up
    #[arg(long)]
    pub source: PathBuf,

    /// Add a generation to an existing journal instead of refusing
    #[arg(long)]
    pub append: bool,

    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,
}

#[instrument(level = "info", name = "cmd::push", skip_all, fields(vault = %args.vault.display()))]
pub async fn execute(ctx: &AppContext, args: &Args) -> Result<()> {
    let keys = ctx.key_store(&args.vault);
    let secret = ctx.secret()?;
    let created = keys
        .open_or_initialize(&secret, &ctx.config.scrypt)
        .await
        .context("Failed to open vault - check your secret")?;
    if created {
        info!("Created new key store");
    }

    let mut config = ctx.config.replication;
    if args.append {
        config = config.with_journal_mode(JournalMode::Append);
    }

    let source = DirectoryCluster::new(&args.source);
    let summary = Replicator::new(config)
        .backup(&source, &keys.as_storage())
        .await
        .with_context(|| format!("Failed to push {}", args.source.display()))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else if !ctx.quiet {
        match summary.journal_timestamp {
            Some(ts) => println!(
                "Pushed {} objects ({}), journal generation {ts}",
                summary.transferred,
                format_bytes(summary.bytes)
            ),
            None => println!(
                "Pushed {} objects ({}), generation already recorded",
                summary.transferred,
                format_bytes(summary.bytes)
            ),
        }
    }
    Ok(())
}
