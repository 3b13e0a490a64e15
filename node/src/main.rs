// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # PTM Node
//!
//! Entry point for the `ptm-node` binary. Parses CLI arguments, initializes
//! logging and metrics, serves the resync API, and runs background recovery.
//!
//! The binary supports three subcommands:
//!
//! - `run`     start the node
//! - `init`    initialize the data directory and generate a key
//! - `version` print build version information

mod api;
mod cli;
mod logging;
mod metrics;
mod publisher;
mod recovery;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;

use ptm_resync::config::{ResyncConfig, PROTOCOL_VERSION};
use ptm_resync::crypto::KeyPair;
use ptm_resync::enclave::KeyringEnclave;
use ptm_resync::storage::ResyncDb;

use cli::{Commands, PtmNodeCli};
use logging::LogFormat;
use metrics::NodeMetrics;

/// Broadcast channel capacity for live event streaming.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// File name of the hex-encoded X25519 secret inside the data directory.
const KEY_FILE_NAME: &str = "node.key";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = PtmNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_node(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the node: API server, metrics endpoint, and the recovery loop.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(
        logging::DEFAULT_FILTER,
        LogFormat::from_str_lossy(&args.log_format),
    );

    let mut config = match &args.config {
        Some(path) => ResyncConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => ResyncConfig::default(),
    };
    if let Some(resend_mode) = args.resend_mode {
        config.resend_mode = resend_mode;
    }
    config.validate().context("invalid resync configuration")?;

    tracing::info!(
        api_port = args.api_port,
        metrics_port = args.metrics_port,
        data_dir = %args.data_dir.display(),
        resend_mode = config.resend_mode,
        "starting ptm-node"
    );

    // --- Persistent storage ---
    let db_path = args.data_dir.join("db");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;
    let db = ResyncDb::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), "database opened");

    // --- Enclave ---
    let keypair = load_key(&args.data_dir)?;
    let enclave = Arc::new(KeyringEnclave::new(vec![keypair]));

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new().context("failed to register metrics")?);

    // --- Event broadcast ---
    let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

    // --- Application state ---
    let resend_mode = config.resend_mode;
    let app_state = api::AppState::new(
        format!("{} (protocol {})", env!("CARGO_PKG_VERSION"), PROTOCOL_VERSION),
        &db,
        enclave,
        config,
        Arc::clone(&node_metrics),
        event_tx,
    );
    recovery::refresh_staging_gauge(&app_state);

    // --- API server ---
    let api_router = api::create_router(app_state.clone());
    let api_addr = format!("0.0.0.0:{}", args.api_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Recovery ---
    let interval = Duration::from_secs(args.pass_interval_secs.max(1));
    let recovery = async {
        if resend_mode {
            tracing::info!(interval_secs = interval.as_secs(), "background recovery enabled");
            recovery::recovery_loop(app_state, interval).await;
        } else {
            tracing::info!("resend mode off, background recovery disabled");
            std::future::pending::<()>().await;
        }
    };

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = recovery => {}
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    db.flush().context("failed to flush database")?;
    tracing::info!("ptm-node stopped");
    Ok(())
}

/// Reads the node key written by `init`.
fn load_key(data_dir: &Path) -> Result<KeyPair> {
    let key_path = data_dir.join(KEY_FILE_NAME);
    let encoded = std::fs::read_to_string(&key_path).with_context(|| {
        format!(
            "failed to read node key at {} (run `ptm-node init` first)",
            key_path.display()
        )
    })?;
    let keypair = KeyPair::from_secret_hex(encoded.trim())
        .with_context(|| format!("malformed node key at {}", key_path.display()))?;
    tracing::info!(public_key = %keypair.public_key(), "node key loaded");
    Ok(keypair)
}

/// Initializes a new node data directory and generates an X25519 key.
fn init_node(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("ptm_node=info", LogFormat::Pretty);

    let data_dir = &args.data_dir;
    tracing::info!(data_dir = %data_dir.display(), "initializing node");

    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let key_path = data_dir.join(KEY_FILE_NAME);
    if key_path.exists() && !args.force {
        anyhow::bail!(
            "key file {} already exists (pass --force to overwrite)",
            key_path.display()
        );
    }

    let keypair = KeyPair::generate();
    let public_key = keypair.public_key();
    std::fs::write(&key_path, keypair.secret_key_hex())
        .with_context(|| format!("failed to write node key to {}", key_path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!(
        public_key = %public_key,
        key_path = %key_path.display(),
        "node key generated"
    );

    println!("Node initialized successfully.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Node key       : {}", key_path.display());
    println!("  Public key     : {}", public_key);

    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("ptm-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol {}", PROTOCOL_VERSION);
    println!("rustc    {}", option_env!("RUSTC_VERSION").unwrap_or("unknown"));
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// A handler that fails to install is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
