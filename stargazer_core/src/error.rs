//! Error taxonomy shared by the Auth, Manager and Compute services.
//!
//! Every variant maps to a machine-checkable status code. The message sent to
//! a caller comes from [`StargazerError::public_message`], which never echoes
//! internal state (in particular it never says whether a token exists).

use stargazer_env::EnvError;
use thiserror::Error;

use crate::token_store::StoreError;

/// Primary error type for all Stargazer operations.
#[derive(Debug, Error)]
pub enum StargazerError {
    // ========== Caller Errors ==========

    /// Missing, invalid, expired, revoked or wrong-type credential
    #[error("Unauthorized")]
    Unauthorized,

    /// Malformed request: wrong type, out-of-range value, missing field
    #[error("Bad request: {0}")]
    Validation(String),

    /// Duplicate node address/identity, or the Manager is busy
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Unregister/revoke of an unknown identity
    #[error("Not found")]
    NotFound,

    /// No Healthy compute capacity to start or continue a run
    #[error("Unavailable: {0}")]
    Unavailable(String),

    // ========== Node Errors ==========

    /// A node's reply violates the assigned-range contract
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// A node did not answer within the per-call deadline
    #[error("Timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// A node answered with a non-success status
    #[error("Request rejected with status {status}")]
    Rejected { status: u16 },

    // ========== Infrastructure Errors ==========

    /// Token store failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Transport or context failure
    #[error(transparent)]
    Env(#[from] EnvError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StargazerError {
    /// Creates a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Creates a conflict error.
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Creates an unavailable error.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Creates a protocol violation.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// HTTP-style status code reported to callers.
    pub fn status_code(&self) -> u16 {
        match self {
            StargazerError::Unauthorized => 401,
            StargazerError::Validation(_) => 400,
            StargazerError::Conflict(_) => 409,
            StargazerError::NotFound => 404,
            StargazerError::Unavailable(_) => 503,
            StargazerError::Protocol(_) | StargazerError::Rejected { .. } => 502,
            StargazerError::Timeout { .. } => 504,
            StargazerError::Store(_) | StargazerError::Env(_) | StargazerError::Internal(_) => 500,
        }
    }

    /// Message safe to hand to an external caller.
    pub fn public_message(&self) -> String {
        match self {
            StargazerError::Unauthorized => "unauthorized".to_string(),
            StargazerError::Validation(msg) => msg.clone(),
            StargazerError::Conflict(msg) => msg.clone(),
            StargazerError::NotFound => "not found".to_string(),
            StargazerError::Unavailable(msg) => msg.clone(),
            StargazerError::Protocol(_)
            | StargazerError::Timeout { .. }
            | StargazerError::Rejected { .. } => "upstream failure".to_string(),
            StargazerError::Store(_) | StargazerError::Env(_) | StargazerError::Internal(_) => {
                "internal error".to_string()
            }
        }
    }

    /// Returns true if retrying the same call could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StargazerError::Env(e) => e.is_transient(),
            StargazerError::Timeout { .. } => true,
            StargazerError::Rejected { status } => *status >= 500,
            _ => false,
        }
    }
}

/// Result type alias for Stargazer operations
pub type Result<T> = std::result::Result<T, StargazerError>;
