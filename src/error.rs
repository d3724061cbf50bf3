//! Error types shared across the crate.
//!
//! Protocol-level failures (a toy not answering, a malformed response) are
//! deliberately *not* errors: they surface as `None`/`false` results because
//! flaky hardware is routine. The variants here cover caller mistakes and
//! lifecycle failures the library cannot absorb.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The model name is not a key in the Lovense capability table.
    #[error("invalid model name '{model}' for toy at {address}; valid names are: {valid:?}")]
    Validation {
        model: String,
        address: String,
        valid: Vec<&'static str>,
    },

    /// Establishing the transport link or setting up notifications failed.
    #[error("connection error for toy at {address}: {message}")]
    Connection { address: String, message: String },

    /// The toy id is not present in the hub registry.
    #[error("unknown toy '{0}'")]
    UnknownToy(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl Error {
    pub(crate) fn connection(address: &str, message: impl Into<String>) -> Self {
        Self::Connection {
            address: address.to_string(),
            message: message.into(),
        }
    }
}

/// Failures of the background engine itself, as opposed to the work it runs.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine has not started or has already been shut down.
    #[error("engine is not running")]
    NotReady,

    /// The deadline elapsed before the submitted work completed. The work
    /// itself is left running; only its result is discarded.
    #[error("engine operation timed out")]
    Timeout,

    /// The submitted task died without producing a result.
    #[error("engine task failed: {0}")]
    Failed(String),
}

/// Errors reported by the pluggable BLE transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("device is not connected")]
    NotConnected,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
