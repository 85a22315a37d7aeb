//! Pull command - restore the vault's journal into a directory cluster.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use tracing::instrument;

use mudvault_core::{DirectoryCluster, Replicator};

use crate::AppContext;

#[derive(ClapArgs)]
pub struct Args {
    /// Vault directory
    #[arg(long)]
    pub vault: PathBuf,

    /// Directory to restore containers into
    #[arg(long)]
    pub target: PathBuf,

    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,
}

#[instrument(level = "info", name = "cmd::pull", skip_all, fields(vault = %args.vault.display()))]
pub async fn execute(ctx: &AppContext, args: &Args) -> Result<()> {
    let keys = ctx.unsealed_key_store(&args.vault).await?;

    let target = DirectoryCluster::new(&args.target);
    let summary = Replicator::new(ctx.config.replication)
        .pull(&keys.as_storage(), &target)
        .await
        .with_context(|| format!("Failed to pull into {}", args.target.display()))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else if !ctx.quiet {
        println!(
            "Restored {} objects from {} journal generation(s) into {}",
            summary.restored,
            summary.generations,
            args.target.display()
        );
    }
    Ok(())
}
