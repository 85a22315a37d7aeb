//! TOML configuration file.
//!
//! ```toml
//! [scrypt]
//! log_n = 15
//!
//! [replication]
//! concurrency = 16
//! journal_mode = "append"
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use mudvault_core::VaultConfig;

/// Load the configuration at `path`, or the defaults when none was given.
pub fn load(path: Option<&Path>) -> Result<VaultConfig> {
    let Some(path) = path else {
        return Ok(VaultConfig::default());
    };

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: VaultConfig = toml::from_str(&text)
        .with_context(|| format!("Invalid config file {}", path.display()))?;
    debug!(path = %path.display(), ?config, "Loaded configuration");
    Ok(config)
}
