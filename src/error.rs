//! Error types for the library boundaries.
//!
//! None of these cross `Pipeline::run`; the pipeline degrades them into
//! diagnostics or a terminal report.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("unsafe artifact path '{path}': {reason}")]
    UnsafePath { path: String, reason: String },

    #[error("failed to create workspace {}: {source}", path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no bindable port: {0}")]
    Port(#[source] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("program not found: {0}")]
    NotFound(String),

    #[error("failed to spawn '{program}' after {attempts} attempts: {source}")]
    Spawn {
        program: String,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("process I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle is not configured")]
    Disabled,

    #[error("oracle request failed: {0}")]
    Transport(String),

    #[error("oracle returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("oracle response could not be parsed: {0}")]
    Malformed(String),

    #[error("oracle timed out after {0}s")]
    Timeout(u64),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid oracle endpoint '{endpoint}': {reason}")]
    Endpoint { endpoint: String, reason: String },

    #[error("config field '{0}' must be greater than zero")]
    Zero(&'static str),

    #[error("could not determine config directory")]
    NoConfigDir,

    #[error("failed to write config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
}
