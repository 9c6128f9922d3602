//! Parley Daemon
//!
//! Exposes parley sessions to an editor plugin over stdio. Requests arrive
//! one JSON object per line on stdin; responses and buffer notifications
//! leave the same way on stdout. Logs go to stderr.
//!
//! # Usage
//!
//! ```bash
//! # Defaults from ~/.config/parley/parley.toml, if present
//! parley-daemon
//!
//! # Override the model and the claude executable
//! parley-daemon --model opus --claude-path /opt/claude/bin/claude
//!
//! # With verbose logging
//! RUST_LOG=debug parley-daemon 2>parley.log
//! ```
//!
//! # Environment Variables
//!
//! - `PARLEY_CONFIG`: Config file path
//! - `PARLEY_MAX_SESSIONS`: Store capacity (default: 10)
//! - `PARLEY_SESSION_TIMEOUT_SECS`: Idle eviction timeout (default: 1800)
//! - `PARLEY_FLUSH_INTERVAL_MS`: Flush buffer interval (default: 100)
//! - `PARLEY_MAX_TURNS`: Turn limit passed to claude (default: 3)
//! - `PARLEY_DEFAULT_MODEL`: Model for new sessions (default: sonnet)
//! - `PARLEY_CLAUDE_PATH`: claude executable (default: `claude` on PATH)
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)
//!
//! Command-line flags win over environment variables, which win over the
//! config file.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::BufReader;
use tracing::info;

use parley_core::{load_config, load_config_from_path, ClaudeCliBackend, ConfigOverrides};

mod protocol;
mod server;
mod sink;

/// Stdio JSON-lines front end for parley sessions
#[derive(Debug, Parser)]
#[command(name = "parley-daemon", version, about)]
struct Cli {
    /// Config file (default: ~/.config/parley/parley.toml)
    #[arg(long, env = "PARLEY_CONFIG")]
    config: Option<PathBuf>,

    /// Model for sessions started without one
    #[arg(long)]
    model: Option<String>,

    /// Path to the claude executable
    #[arg(long)]
    claude_path: Option<String>,

    /// Maximum concurrent sessions
    #[arg(long)]
    max_sessions: Option<usize>,

    /// Flush buffer interval in milliseconds
    #[arg(long)]
    flush_interval_ms: Option<u64>,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(model) = &self.model {
            overrides = overrides.with_default_model(model.clone());
        }
        if let Some(path) = &self.claude_path {
            overrides = overrides.with_claude_path(path.clone());
        }
        if let Some(max) = self.max_sessions {
            overrides = overrides.with_max_sessions(max);
        }
        if let Some(ms) = self.flush_interval_ms {
            overrides = overrides.with_flush_interval_ms(ms);
        }
        overrides
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the protocol
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("parley_daemon=info".parse()?)
                .add_directive("parley_core=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config_from_path(Some(path.clone()))?,
        None => load_config()?,
    };
    let overrides = cli.overrides();
    if !overrides.is_empty() {
        overrides.apply(&mut config)?;
    }

    info!(
        source = %config.source(),
        path = ?config.config_file_path,
        max_sessions = config.max_sessions,
        default_model = %config.default_model,
        claude = %config.claude.executable,
        "Starting parley daemon"
    );

    let backend = Arc::new(ClaudeCliBackend::new(config.claude.clone()));
    server::run(
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        backend,
        config.manager_settings(),
    )
    .await?;

    info!("Parley daemon stopped");
    Ok(())
}
