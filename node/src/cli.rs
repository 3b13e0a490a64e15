//! # CLI Interface
//!
//! Defines the command-line argument structure for `ptm-node` using
//! `clap` derive. Supports three subcommands: `run`, `init`, and `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use ptm_resync::config::{DEFAULT_API_PORT, DEFAULT_METRICS_PORT, DEFAULT_PASS_INTERVAL_SECS};

/// Private transaction manager node.
///
/// Holds encrypted private transaction payloads, answers resend requests
/// from peers, and recovers its own lost history from pushed batches.
#[derive(Parser, Debug)]
#[command(
    name = "ptm-node",
    about = "Private transaction manager node with batch resync",
    version,
    propagate_version = true
)]
pub struct PtmNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node.
    Run(RunArgs),
    /// Initialize a new node: creates the data directory and generates
    /// a fresh X25519 key.
    Init(InitArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to a JSON resync configuration file.
    ///
    /// When omitted, built-in defaults are used.
    #[arg(long, short = 'c', env = "PTM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Path to the node data directory holding the database and key file.
    #[arg(long, short = 'd', env = "PTM_DATA_DIR", default_value = ".ptm")]
    pub data_dir: PathBuf,

    /// Port for the REST and WebSocket API.
    #[arg(long, env = "PTM_API_PORT", default_value_t = DEFAULT_API_PORT)]
    pub api_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "PTM_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Overrides `resendMode` from the configuration file.
    #[arg(long, env = "PTM_RESEND_MODE")]
    pub resend_mode: Option<bool>,

    /// Seconds between background recovery passes.
    #[arg(long, env = "PTM_PASS_INTERVAL_SECS", default_value_t = DEFAULT_PASS_INTERVAL_SECS)]
    pub pass_interval_secs: u64,

    /// Log output format: "pretty" or "json".
    #[arg(long, env = "PTM_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Path to the data directory to initialize.
    #[arg(long, short = 'd', env = "PTM_DATA_DIR", default_value = ".ptm")]
    pub data_dir: PathBuf,

    /// Overwrite an existing key file.
    #[arg(long)]
    pub force: bool,
}
