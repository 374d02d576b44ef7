// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Crate-wide error type.
//!
//! Every fallible operation of the RPC and timing layers returns [`Result`].
//! The variants map one-to-one onto the failure outcomes callers are expected
//! to branch on (`Timeout` vs `Cancelled`, `OutOfSync` vs `NotFound`, ...).

use thiserror::Error;

/// Errors returned by the RPC and timing layers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    // ========================================================================
    // RPC errors
    // ========================================================================
    /// No connection entry exists for the named peer.
    #[error("not connected to participant '{0}'")]
    NotConnected(String),

    /// The service has no command transmitter bound (not initialized or already shut down).
    #[error("service not initialized")]
    NotInitialized,

    /// No matching response arrived within the configured window.
    #[error("request timed out")]
    Timeout,

    /// The wait was aborted by a table-wide stop.
    #[error("request cancelled")]
    Cancelled,

    /// The remote side answered with a JSON-RPC error object.
    #[error("remote error {code}: {message}")]
    Remote {
        /// JSON-RPC error code
        code: i64,
        /// Error message as sent by the remote
        message: String,
    },

    /// The command bus refused or failed to deliver a command.
    #[error("transmission failed: {0}")]
    Transmission(String),

    // ========================================================================
    // Generic errors
    // ========================================================================
    /// Invalid parameter or configuration value.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Named entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Named entity is already registered.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Operation is not allowed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Catch-all for handler failures translated at a dispatch boundary.
    #[error("unexpected error: {0}")]
    Unexpected(String),

    // ========================================================================
    // Timing errors
    // ========================================================================
    /// No new sample arrived since the previous step invocation.
    #[error("no new sample for signal '{0}' since last step")]
    OutOfSync(String),

    /// Configuration file could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// JSON-RPC error code used when this error is sent back to a remote caller.
    pub fn json_rpc_code(&self) -> i64 {
        match self {
            Error::NotFound(_) => -32601,
            Error::InvalidArgument(_) => -32602,
            Error::Remote { code, .. } => *code,
            _ => -32603,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::InvalidArgument(format!("JSON: {}", e))
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Config(e.to_string())
    }
}
