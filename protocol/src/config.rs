//! # Resync Configuration & Constants
//!
//! Every tunable of the resend/staging/sync pipeline lives here, either as a
//! named constant or as a field of [`ResyncConfig`]. The constants are the
//! defaults; the struct is what a node actually runs with.
//!
//! Configuration is an explicit serde schema. Unknown fields are rejected so
//! a typo in a deployment file fails loudly instead of silently falling back
//! to a default.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// X25519 public key length in bytes.
pub const PUBLIC_KEY_LENGTH: usize = 32;

/// AES-256-GCM key length in bytes. Also the length of the per-transaction
/// master key sealed inside each recipient box.
pub const AES_KEY_LENGTH: usize = 32;

/// AES-256-GCM nonce length in bytes.
pub const AES_NONCE_LENGTH: usize = 12;

/// AES-256-GCM authentication tag length in bytes.
pub const AES_TAG_LENGTH: usize = 16;

/// Message hashes are SHA-512 digests of the payload ciphertext.
pub const MESSAGE_HASH_LENGTH: usize = 64;

/// Context string for the recipient-box key derivation. Changing it makes
/// every stored box unreadable.
pub const RECIPIENT_BOX_KDF_CONTEXT: &str = "ptm-resync 2026 recipient box v1";

// ---------------------------------------------------------------------------
// Pipeline Defaults
// ---------------------------------------------------------------------------

/// Default number of payload views per publish call when a caller does not
/// specify one.
pub const DEFAULT_RESEND_BATCH_SIZE: u32 = 100;

/// Page size used by `perform_sync` when walking staged rows.
pub const DEFAULT_SYNC_PAGE_SIZE: usize = 10_000;

/// Rows written back per sled batch during a staging pass.
pub const DEFAULT_STAGING_BATCH_SIZE: usize = 10_000;

/// Rows deleted per sled batch when the staging area is wiped.
pub const DEFAULT_CLEANUP_BATCH_SIZE: usize = 10_000;

/// Seconds between background recovery passes in the node binary.
pub const DEFAULT_PASS_INTERVAL_SECS: u64 = 30;

// ---------------------------------------------------------------------------
// Network Defaults
// ---------------------------------------------------------------------------

/// Default port for the node's HTTP API.
pub const DEFAULT_API_PORT: u16 = 9081;

/// Default port for the Prometheus endpoint.
pub const DEFAULT_METRICS_PORT: u16 = 9082;

/// Crate version, surfaced by the node's `/status` endpoint.
pub const PROTOCOL_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// ResyncConfig
// ---------------------------------------------------------------------------

/// Errors raised while loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Runtime configuration of the resync subsystem.
///
/// `resend_mode` is captured once when the orchestrator is built; flipping
/// it requires a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct ResyncConfig {
    /// Whether this node takes part in the resend protocol at all.
    pub resend_mode: bool,

    /// Staged rows fetched per page during sync.
    pub sync_page_size: usize,

    /// Rows written back per batch during a staging pass.
    pub staging_batch_size: usize,

    /// Rows deleted per batch during cleanup.
    pub cleanup_batch_size: usize,
}

impl Default for ResyncConfig {
    fn default() -> Self {
        Self {
            resend_mode: true,
            sync_page_size: DEFAULT_SYNC_PAGE_SIZE,
            staging_batch_size: DEFAULT_STAGING_BATCH_SIZE,
            cleanup_batch_size: DEFAULT_CLEANUP_BATCH_SIZE,
        }
    }
}

impl ResyncConfig {
    /// Load a JSON configuration file. Missing fields take their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject zero page and batch sizes; every loop in the pipeline relies
    /// on making progress per iteration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync_page_size == 0 {
            return Err(ConfigError::Invalid("syncPageSize must be at least 1".into()));
        }
        if self.staging_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "stagingBatchSize must be at least 1".into(),
            ));
        }
        if self.cleanup_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "cleanupBatchSize must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
