//! Service configuration.
//!
//! Every struct has a `Default` suitable for tests and the in-process
//! cluster. `from_env` reads the deployment variables on top of the
//! defaults:
//!
//! | Variable                      | Used by          |
//! |-------------------------------|------------------|
//! | `STARGAZER_VERSION`           | all services     |
//! | `STARGAZER_SERVICE_TOKEN`     | Manager, Compute |
//! | `AUTH_ENDPOINT`               | Manager, Compute |
//! | `STARGAZER_CALL_TIMEOUT_MS`   | Manager          |
//! | `STARGAZER_ENDPOINT`          | Compute          |
//! | `STARGAZER_MANAGER_ENDPOINT`  | Compute          |

use stargazer_env::Endpoint;
use std::time::Duration;

use crate::error::{Result, StargazerError};
use crate::retry::RetryConfig;

/// Version string reported by `/api/common/version` when none is configured.
pub const DEFAULT_SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default per-call deadline for Manager-to-Compute calls.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

fn read_version(lookup: &impl Fn(&str) -> Option<String>) -> String {
    lookup("STARGAZER_VERSION").unwrap_or_else(|| DEFAULT_SERVICE_VERSION.to_string())
}

fn read_endpoint(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<Endpoint>> {
    lookup(key)
        .map(|raw| {
            Endpoint::parse(&raw).map_err(|_| StargazerError::validation(format!("{}: invalid endpoint", key)))
        })
        .transpose()
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

// ============================================================================
// AUTH
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct AuthConfig {
    pub service_version: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            service_version: DEFAULT_SERVICE_VERSION.to_string(),
        }
    }
}

impl AuthConfig {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            service_version: read_version(&lookup),
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(env_lookup)
    }
}

// ============================================================================
// MANAGER
// ============================================================================

/// Tuning for the simulation loop.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    /// Deadline for each call to a Compute node (default: 5s)
    pub call_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ManagerConfig {
    pub service_version: String,

    /// Manager-type token presented to Compute nodes and to Auth
    pub service_token: Option<String>,

    /// Auth service used to validate callers
    pub auth_endpoint: Option<Endpoint>,

    pub coordinator: CoordinatorConfig,

    /// Backoff for calls to the Auth service
    pub auth_retry: RetryConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            service_version: DEFAULT_SERVICE_VERSION.to_string(),
            service_token: None,
            auth_endpoint: None,
            coordinator: CoordinatorConfig::default(),
            auth_retry: RetryConfig::default(),
        }
    }
}

impl ManagerConfig {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self {
            service_version: read_version(&lookup),
            service_token: lookup("STARGAZER_SERVICE_TOKEN"),
            auth_endpoint: read_endpoint(&lookup, "AUTH_ENDPOINT")?,
            ..Default::default()
        };

        if let Some(raw) = lookup("STARGAZER_CALL_TIMEOUT_MS") {
            let ms: u64 = raw
                .parse()
                .ok()
                .filter(|ms| *ms > 0)
                .ok_or_else(|| StargazerError::validation("STARGAZER_CALL_TIMEOUT_MS: expected a positive integer"))?;
            config.coordinator.call_timeout = Duration::from_millis(ms);
        }

        Ok(config)
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(env_lookup)
    }
}

// ============================================================================
// COMPUTE
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ComputeConfig {
    pub service_version: String,

    /// Address this node registers under
    pub endpoint: Option<Endpoint>,

    /// Manager to register with
    pub manager_endpoint: Option<Endpoint>,

    /// Auth service used to validate callers
    pub auth_endpoint: Option<Endpoint>,

    /// Compute-type token used for registration and for Auth calls
    pub service_token: Option<String>,

    /// Backoff for self-registration
    pub registration_retry: RetryConfig,

    /// Backoff for calls to the Auth service
    pub auth_retry: RetryConfig,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            service_version: DEFAULT_SERVICE_VERSION.to_string(),
            endpoint: None,
            manager_endpoint: None,
            auth_endpoint: None,
            service_token: None,
            registration_retry: RetryConfig::default(),
            auth_retry: RetryConfig::default(),
        }
    }
}

impl ComputeConfig {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            service_version: read_version(&lookup),
            endpoint: read_endpoint(&lookup, "STARGAZER_ENDPOINT")?,
            manager_endpoint: read_endpoint(&lookup, "STARGAZER_MANAGER_ENDPOINT")?,
            auth_endpoint: read_endpoint(&lookup, "AUTH_ENDPOINT")?,
            service_token: lookup("STARGAZER_SERVICE_TOKEN"),
            ..Default::default()
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(env_lookup)
    }
}
