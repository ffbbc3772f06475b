// Error types for the coordinator's fallible edges: config loading, the two
// durable stores, and the console link.
//
// Admission rejections are not errors in this sense; they live in
// `admission.rs` as `Rejection` because every variant is an expected,
// user-facing outcome.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure to load `BotConfig`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Failure reading or rewriting a durable line store (ban list, temporary
/// access records).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write '{}': {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Failure reported by the remote console link.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// The link is dead; the session needs restoring.
    #[error("console link disconnected")]
    Disconnected,
    #[error("console operation failed: {0}")]
    Failed(String),
}
