//! Binary entry point for the gocache proxy.
//!
//! Intentionally thin: parse `--config`, wire a [`TomlFileConfigSource`]
//! that reads and parses it, and hand off to [`gocache::Lifecycle`]. The
//! CLI's subcommands, the management HTTP API, PID-file handling, and
//! daemonization are out of scope for this core — this binary is the
//! minimal adapter that makes the core runnable, not a reimplementation of
//! those adapters.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use gocache::config::{Config, ConfigSource};
use gocache::error::{ProxyError, Result};
use gocache::Lifecycle;

#[derive(Parser)]
#[command(name = "gocache-proxy")]
#[command(author, version, about = "Local HTTP/HTTPS caching forward proxy", long_about = None)]
struct Cli {
    /// Path to a TOML config file. Missing fields fall back to defaults.
    /// Re-read on `SIGHUP`.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// Reads and parses a TOML config file fresh on every `load()` call, so a
/// `SIGHUP` reload picks up on-disk edits.
struct TomlFileConfigSource {
    path: PathBuf,
}

impl ConfigSource for TomlFileConfigSource {
    fn load(&self) -> Result<Config> {
        let raw = std::fs::read_to_string(&self.path).map_err(|e| {
            ProxyError::Persistence(format!("failed to read config file {}: {e}", self.path.display()))
        })?;
        toml::from_str(&raw).map_err(|e| {
            ProxyError::Persistence(format!("failed to parse config file {}: {e}", self.path.display()))
        })
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let source: Arc<dyn ConfigSource> = match cli.config {
        Some(path) => Arc::new(TomlFileConfigSource { path }),
        None => Arc::new(Config::default()),
    };

    let lifecycle = match Lifecycle::bootstrap(source) {
        Ok(lifecycle) => lifecycle,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = lifecycle.serve().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
