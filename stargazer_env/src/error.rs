//! Error types for the Stargazer environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Network send failed (connection refused, channel closed, etc.)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Target endpoint is unreachable (no listener or simulated partition)
    #[error("Endpoint unreachable: {0}")]
    EndpointUnreachable(String),

    /// Payload serialization/deserialization failed
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Endpoint string is not a usable URI
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Operation timed out
    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl EnvError {
    /// Creates a network error.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::NetworkError(msg.into())
    }

    /// Creates an unreachable error.
    pub fn unreachable(endpoint: impl std::fmt::Display) -> Self {
        Self::EndpointUnreachable(endpoint.to_string())
    }

    /// Returns true if retrying the same call could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EnvError::NetworkError(_) | EnvError::EndpointUnreachable(_) | EnvError::Timeout(_)
        )
    }
}
