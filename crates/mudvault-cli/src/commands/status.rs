//! Status command - key store state and journal generations.

use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args as ClapArgs;
use serde::Serialize;
use tracing::instrument;

use mudvault_core::{KeyStoreState, Replicator};

use crate::AppContext;
use crate::output::create_table;

#[derive(ClapArgs)]
pub struct Args {
    /// Vault directory
    #[arg(long)]
    pub vault: PathBuf,

    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct Generation {
    timestamp: i64,
    created: usize,
    modified: usize,
    destroyed: usize,
}

#[derive(Serialize)]
struct StatusReport {
    state: KeyStoreState,
    generations: Vec<Generation>,
}

#[instrument(level = "info", name = "cmd::status", skip_all, fields(vault = %args.vault.display()))]
pub async fn execute(ctx: &AppContext, args: &Args) -> Result<()> {
    let mut report = StatusReport {
        state: ctx.key_store(&args.vault).state().await?,
        generations: Vec::new(),
    };

    if report.state != KeyStoreState::Uninitialized {
        let keys = ctx.unsealed_key_store(&args.vault).await?;
        report.state = keys.state().await?;
        if let Some(journal) = Replicator::new(ctx.config.replication)
            .load_journal(&keys.as_storage())
            .await?
        {
            report.generations = journal
                .changes
                .iter()
                .map(|(timestamp, log)| Generation {
                    timestamp: *timestamp,
                    created: log.created.len(),
                    modified: log.modified.len(),
                    destroyed: log.destroyed.len(),
                })
                .collect();
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Vault:  {}", args.vault.display());
    println!("State:  {}", report.state);
    if report.generations.is_empty() {
        println!("No journal generations");
        return Ok(());
    }

    let mut table = create_table();
    table.set_header(vec!["Generation", "Time (UTC)", "Created", "Modified", "Destroyed"]);
    for generation in &report.generations {
        let time = DateTime::<Utc>::from_timestamp_millis(generation.timestamp)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            generation.timestamp.to_string(),
            time,
            generation.created.to_string(),
            generation.modified.to_string(),
            generation.destroyed.to_string(),
        ]);
    }
    println!("{table}");
    Ok(())
}
