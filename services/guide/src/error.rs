//! services/guide/src/error.rs
//!
//! Defines the primary error type for the entire `guide` service.

use crate::config::ConfigError;
use tour_guide_core::ports::PortError;

/// The primary error type for the `guide` service.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// Represents an error from the underlying websocket library.
    #[error("WebSocket Error: {0}")]
    Websocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Represents a standard Input/Output error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}
