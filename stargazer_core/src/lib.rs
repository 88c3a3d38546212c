//! Stargazer Core - Distributed N-body Simulation with Capability Tokens
//!
//! Three services cooperate to advance an N-body system one timestep at a time:
//! 1. **Auth**: issues bearer tokens (Compute, Manager, User) and validates them
//! 2. **Manager**: registers Compute nodes, partitions bodies across them and
//!    drives the step loop as the single writer of the authoritative body list
//! 3. **Compute**: advances its assigned index range with the physics kernel
//!
//! Every privileged call on every service goes through [`trust::authorize`].

pub mod body;
pub mod kernel;
pub mod token_store;
pub mod trust;
pub mod registry;
pub mod partition;
pub mod coordinator;
pub mod protocol;
pub mod router;
pub mod client;
pub mod retry;
pub mod config;
pub mod error;

pub mod auth_service;
pub mod manager_service;
pub mod compute_service;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export key types for convenience
pub use body::{Body, BodyUpdate, RunSetup, SimulationConfig};
pub use coordinator::{RunReport, RunState, SimulationCoordinator, StepObserver};
pub use error::{Result, StargazerError};
pub use kernel::{PairwiseKernel, PhysicsKernel};
pub use token_store::{MemoryTokenStore, SledTokenStore, TokenStore, TokenType};
pub use trust::{Authenticator, TokenAuthority};

pub use auth_service::AuthService;
pub use compute_service::ComputeService;
pub use manager_service::ManagerService;
