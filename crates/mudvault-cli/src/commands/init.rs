//! Init command - create the key store of a new vault.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use tracing::instrument;

use crate::AppContext;

#[derive(ClapArgs)]
pub struct Args {
    /// Vault directory (created if missing)
    #[arg(long)]
    pub vault: PathBuf,
}

#[instrument(level = "info", name = "cmd::init", skip_all, fields(vault = %args.vault.display()))]
pub async fn execute(ctx: &AppContext, args: &Args) -> Result<()> {
    let keys = ctx.key_store(&args.vault);
    let secret = ctx.secret()?;
    keys.initialize(&secret, &ctx.config.scrypt)
        .await
        .with_context(|| format!("Failed to initialize vault at {}", args.vault.display()))?;

    if !ctx.quiet {
        println!("Initialized vault at {}", args.vault.display());
    }
    Ok(())
}
