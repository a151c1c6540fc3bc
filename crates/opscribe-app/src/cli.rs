//! CLI argument definitions for the Opscribe binary.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

use opscribe_core::config::OpscribeConfig;

/// Opscribe - architecture knowledge graphs with tenant-scoped semantic retrieval.
#[derive(Parser, Debug)]
#[command(name = "opscribe", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// API server port.
    #[arg(short = 'p', long = "port", global = true)]
    pub port: Option<u16>,

    /// Data directory holding the SQLite database.
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run the HTTP API server (default).
    Serve,
    /// Rebuild the knowledge base items of one graph.
    Ingest {
        /// Graph to ingest.
        graph_id: Uuid,
    },
    /// Print the items of a tenant closest to a query.
    Retrieve {
        /// Tenant (client) to search.
        #[arg(short = 't', long = "tenant")]
        tenant: Uuid,
        /// Maximum number of results; defaults to `retrieval.default_limit`.
        #[arg(short = 'n', long = "limit")]
        limit: Option<usize>,
        /// Free-text query.
        query: String,
    },
}

impl CliArgs {
    /// The subcommand to run, `serve` when none was given.
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }

    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > OPSCRIBE_CONFIG env var > ~/.opscribe/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("OPSCRIBE_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the API server port.
    ///
    /// Priority: --port flag > OPSCRIBE_PORT env var > config file value.
    pub fn resolve_port(&self, config_port: u16) -> u16 {
        if let Some(p) = self.port {
            return p;
        }
        if let Ok(val) = std::env::var("OPSCRIBE_PORT") {
            if let Ok(p) = val.parse::<u16>() {
                return p;
            }
        }
        config_port
    }

    /// Resolve the data directory.
    ///
    /// Priority: --data-dir flag > OPSCRIBE_DATA_DIR env var. Returns `None`
    /// when neither is set, leaving the config file value in place.
    pub fn resolve_data_dir(&self) -> Option<String> {
        if let Some(ref p) = self.data_dir {
            return Some(p.to_string_lossy().to_string());
        }
        std::env::var("OPSCRIBE_DATA_DIR").ok()
    }

    /// Resolve the log level before tracing is installed.
    ///
    /// Priority: --log-level flag > the config file's level (when the file
    /// loaded) > the built-in default. RUST_LOG still overrides the result
    /// when the filter is built.
    pub fn resolve_log_level(&self, file: Option<&OpscribeConfig>) -> String {
        if let Some(ref level) = self.log_level {
            return level.clone();
        }
        match file {
            Some(config) => config.general.log_level.clone(),
            None => OpscribeConfig::default().general.log_level,
        }
    }
}

/// Default config file path.
fn default_config_path() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".opscribe").join("config.toml");
    }
    PathBuf::from("config.toml")
}
