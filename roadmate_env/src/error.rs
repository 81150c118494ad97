//! Error types for the RoadMate environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Clone, Error)]
pub enum EnvError {
    /// Routing provider returned an error or an unusable payload
    #[error("Routing error: {0}")]
    Routing(String),

    /// Routing provider could not be reached
    #[error("Provider unreachable: {0}")]
    Unreachable(String),

    /// Payload serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Context operation failed
    #[error("Context error: {0}")]
    Context(String),

    /// Operation timed out
    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl EnvError {
    /// Creates a routing error.
    pub fn routing(msg: impl Into<String>) -> Self {
        Self::Routing(msg.into())
    }

    /// Creates an unreachable error.
    pub fn unreachable(provider: impl std::fmt::Display) -> Self {
        Self::Unreachable(provider.to_string())
    }
}
