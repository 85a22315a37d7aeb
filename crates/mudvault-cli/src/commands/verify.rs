//! Verify command - compare a directory cluster against the vault.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use comfy_table::Cell;
use tracing::instrument;

use mudvault_core::{DirectoryCluster, ObjectCluster, Replicator, VerifyReport};

use crate::AppContext;
use crate::output::create_table;

#[derive(ClapArgs)]
pub struct Args {
    /// Vault directory
    #[arg(long)]
    pub vault: PathBuf,

    /// Directory cluster holding the live objects
    #[arg(long)]
    pub source: PathBuf,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Returned when the vault does not hold an intact copy of every object.
#[derive(Debug, thiserror::Error)]
#[error("Verification failed: {missing} missing, {invalid} invalid")]
pub struct VerificationFailed {
    pub missing: usize,
    pub invalid: usize,
}

#[instrument(level = "info", name = "cmd::verify", skip_all, fields(vault = %args.vault.display()))]
pub async fn execute(ctx: &AppContext, args: &Args) -> Result<()> {
    let keys = ctx.unsealed_key_store(&args.vault).await?;

    let source = DirectoryCluster::new(&args.source);
    let changes = source
        .initiate_object_backup()
        .await
        .with_context(|| format!("Failed to scan {}", args.source.display()))?;
    let report = Replicator::new(ctx.config.replication)
        .verify(&changes, &source, &keys.as_storage())
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !ctx.quiet {
        print_report(&report);
    }

    if report.is_clean() {
        Ok(())
    } else {
        Err(VerificationFailed {
            missing: report.missing.len(),
            invalid: report.invalid.len(),
        }
        .into())
    }
}

fn print_report(report: &VerifyReport) {
    if report.is_clean() {
        println!("All {} objects verified", report.valid.len());
        return;
    }

    let mut table = create_table();
    table.set_header(vec!["Object", "Status"]);
    for reference in &report.missing {
        table.add_row(vec![Cell::new(reference), Cell::new("missing")]);
    }
    for reference in &report.invalid {
        table.add_row(vec![Cell::new(reference), Cell::new("invalid")]);
    }
    println!("{table}");
    println!(
        "{} valid, {} missing, {} invalid",
        report.valid.len(),
        report.missing.len(),
        report.invalid.len()
    );
}
