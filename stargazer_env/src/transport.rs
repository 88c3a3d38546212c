//! Request/response transport abstraction between Stargazer services.

use async_trait::async_trait;
use crate::error::EnvError;
use crate::types::{Endpoint, RequestEnvelope, ResponseEnvelope};

/// Abstraction for calls from one Stargazer service to another.
///
/// # Implementations
///
/// - **Production**: wraps an HTTP client
/// - **In-process**: `LocalRouter` dispatches straight to service handlers
/// - **Simulation**: `SimNetwork` adds latency, partitions and corruption
///
/// # Call Flow
///
/// ```text
/// Manager                    Transport                  Compute
///   |                           |                          |
///   |-- call(endpoint, req) --->|                          |
///   |                           |-- [latency/faults] ----->|
///   |                           |<------- response --------|
///   |<------ Ok(response) ------|                          |
/// ```
#[async_trait]
pub trait NodeTransport: Send + Sync + 'static {
    /// Sends a request to a service endpoint and waits for its reply.
    ///
    /// # Returns
    /// * `Ok(response)` - The service answered (any status code)
    /// * `Err(EnvError::EndpointUnreachable)` - Nothing is listening there
    /// * `Err(EnvError::NetworkError)` - The call failed in flight
    ///
    /// # Note
    /// No timeout is applied here; callers bound the call themselves.
    async fn call(
        &self,
        endpoint: &Endpoint,
        request: RequestEnvelope,
    ) -> Result<ResponseEnvelope, EnvError>;
}

/// Marker trait for network controllers in simulation.
///
/// Allows injecting faults like partitions and latency.
pub trait NetworkController: Send + Sync {
    /// Cuts an endpoint off from every caller.
    fn isolate(&self, endpoint: &Endpoint);

    /// Heals all partitions.
    fn heal_all(&self);

    /// Sets latency for calls to a specific endpoint.
    fn set_latency(&self, endpoint: &Endpoint, latency_ms: u64);

    /// Makes an endpoint's replies arrive corrupted with the given
    /// probability (0.0 - 1.0).
    fn set_corruption(&self, endpoint: &Endpoint, rate: f64);
}
