//! Stargazer Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" abstraction allowing the Auth, Manager
//! and Compute services to run in both **Production** (tokio) and
//! **Simulation** (virtual clock) environments.
//!
//! # Core Concept: The Reactor Pattern
//!
//! For Deterministic Simulation Testing (DST), we intercept all I/O:
//! - Time (`now()`, `system_time()`, `sleep()`)
//! - Network (`call()`)
//! - Randomness (`fill_random()`)
//!
//! By deriving all entropy from a single 64-bit seed, any bug becomes
//! reproducible via its seed number.
//!
//! # Example
//!
//! ```ignore
//! use stargazer_env::{Endpoint, NodeTransport, RequestEnvelope};
//!
//! async fn ping<Net: NodeTransport>(net: &Net, endpoint: &Endpoint) {
//!     let request = RequestEnvelope::new("/api/common/version", Some(token), Vec::new());
//!     let response = net.call(endpoint, request).await?;
//!     assert!(response.is_success());
//! }
//! ```

mod context;
mod transport;
mod types;
mod error;
mod tokio_impl;

pub use context::StargazerContext;
pub use transport::{NetworkController, NodeTransport};
pub use types::{Endpoint, NodeId, RequestEnvelope, ResponseEnvelope};
pub use error::EnvError;
pub use tokio_impl::TokioContext;
