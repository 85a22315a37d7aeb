//! Root secret acquisition.

use std::io::{self, BufRead, IsTerminal};

use anyhow::{Context, Result, bail};
use secrecy::SecretString;

/// Where the root secret may come from, as given on the command line.
#[derive(Debug, Default, Clone)]
pub struct SecretOptions {
    /// Value of `--secret` or `MUDVAULT_SECRET`.
    pub secret: Option<String>,
    /// Read a single line from stdin.
    pub secret_stdin: bool,
}

/// Resolve the root secret.
///
/// Priority: `--secret-stdin`, then `--secret` / `MUDVAULT_SECRET`, then an
/// interactive prompt.
pub fn get_secret(options: &SecretOptions) -> Result<SecretString> {
    if options.secret_stdin {
        return read_stdin_secret();
    }

    if let Some(secret) = &options.secret {
        if secret.is_empty() {
            bail!("Secret must not be empty");
        }
        return Ok(SecretString::from(secret.clone()));
    }

    let secret = rpassword::prompt_password("Vault secret: ").context("Failed to read secret")?;
    if secret.is_empty() {
        bail!("Secret must not be empty");
    }
    Ok(SecretString::from(secret))
}

fn read_stdin_secret() -> Result<SecretString> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        bail!("--secret-stdin expects the secret on a pipe, not a terminal");
    }

    let mut line = String::new();
    stdin
        .lock()
        .read_line(&mut line)
        .context("Failed to read secret from stdin")?;
    let trimmed = trim_line_ending(&line);
    if trimmed.is_empty() {
        bail!("No secret provided on stdin");
    }
    Ok(SecretString::from(trimmed.to_string()))
}

fn trim_line_ending(line: &str) -> &str {
    line.strip_suffix('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .unwrap_or(line)
}
