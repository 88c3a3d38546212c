//! Compute node executor.
//!
//! Holds the configuration version, constants and assigned range pushed by
//! the Manager. Bodies are not kept between steps: each step request carries
//! the full authoritative list, the kernel advances the assigned range, and
//! only that range's updates go back.

use async_trait::async_trait;
use parking_lot::Mutex;
use stargazer_env::{RequestEnvelope, ResponseEnvelope};
use std::sync::Arc;
use tracing::{debug, info};

use crate::body::SimulationConfig;
use crate::error::{Result, StargazerError};
use crate::kernel::PhysicsKernel;
use crate::partition::IndexRange;
use crate::protocol::{
    self, routes, AssignRequest, ComputeConfigureRequest, ServiceInfo, StepRequest, StepResponse,
    SuccessResponse,
};
use crate::router::ServiceHandler;
use crate::token_store::TokenType;
use crate::trust::{authorize, Authenticator};

/// Only the Manager drives a Compute node.
const MANAGER_ONLY: &[TokenType] = &[TokenType::Manager];

#[derive(Debug, Clone, Default)]
struct ExecutorState {
    version: Option<u64>,
    constants: Option<SimulationConfig>,
    body_count: usize,
    range: Option<IndexRange>,
}

/// One Compute node.
pub struct ComputeService {
    authenticator: Arc<dyn Authenticator>,
    kernel: Arc<dyn PhysicsKernel>,
    info: ServiceInfo,
    state: Mutex<ExecutorState>,
}

impl ComputeService {
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        kernel: Arc<dyn PhysicsKernel>,
        service_version: impl Into<String>,
    ) -> Self {
        Self {
            authenticator,
            kernel,
            info: ServiceInfo::new(service_version, "compute"),
            state: Mutex::new(ExecutorState::default()),
        }
    }

    /// Version this node last accepted.
    pub fn version(&self) -> Option<u64> {
        self.state.lock().version
    }

    /// Range this node currently owns.
    pub fn range(&self) -> Option<IndexRange> {
        self.state.lock().range
    }

    fn check_version(state: &ExecutorState, version: u64) -> Result<()> {
        if state.version != Some(version) {
            return Err(StargazerError::conflict("stale configuration version"));
        }
        Ok(())
    }

    /// Accepts a configuration. Older versions than the current one are
    /// refused; the assigned range is cleared.
    pub fn configure(&self, request: ComputeConfigureRequest) -> Result<SuccessResponse> {
        let mut state = self.state.lock();
        if matches!(state.version, Some(current) if request.version < current) {
            return Err(StargazerError::conflict("stale configuration version"));
        }

        *state = ExecutorState {
            version: Some(request.version),
            constants: Some(request.constants),
            body_count: request.bodies.len(),
            range: None,
        };

        info!(version = request.version, bodies = request.bodies.len(), "Configured");
        Ok(SuccessResponse::OK)
    }

    pub fn assign(&self, request: AssignRequest) -> Result<SuccessResponse> {
        let mut state = self.state.lock();
        Self::check_version(&state, request.version)?;
        if !request.range.fits(state.body_count) {
            return Err(StargazerError::validation("range outside body list"));
        }
        state.range = Some(request.range);

        debug!(version = request.version, range = %request.range, "Assigned range");
        Ok(SuccessResponse::OK)
    }

    pub fn step(&self, request: StepRequest) -> Result<StepResponse> {
        let (range, constants) = {
            let state = self.state.lock();
            Self::check_version(&state, request.version)?;
            if request.bodies.len() != state.body_count {
                return Err(StargazerError::validation("body count differs from configuration"));
            }
            match (state.range, state.constants) {
                (Some(range), Some(constants)) => (range, constants),
                _ => return Err(StargazerError::conflict("no range assigned")),
            }
        };

        let updated = self.kernel.step(&request.bodies, range.as_range(), &constants);
        Ok(StepResponse { range, updated })
    }

    async fn dispatch(&self, request: &RequestEnvelope) -> ResponseEnvelope {
        let bearer = request.bearer.as_deref();
        if let Err(e) = authorize(&*self.authenticator, bearer, MANAGER_ONLY).await {
            return protocol::error_reply(&e);
        }

        let payload = &request.payload;
        match request.route.as_str() {
            routes::COMPUTE_CONFIGURE => {
                protocol::respond(200, protocol::decode(payload).and_then(|r| self.configure(r)))
            }
            routes::COMPUTE_ASSIGN => {
                protocol::respond(200, protocol::decode(payload).and_then(|r| self.assign(r)))
            }
            routes::COMPUTE_STEP => {
                protocol::respond(200, protocol::decode(payload).and_then(|r| self.step(r)))
            }
            _ => protocol::error_reply(&StargazerError::NotFound),
        }
    }
}

#[async_trait]
impl ServiceHandler for ComputeService {
    async fn handle(&self, request: RequestEnvelope) -> ResponseEnvelope {
        let bearer = request.bearer.as_deref();
        if let Some(resp) = self.info.answer(&*self.authenticator, bearer, &request.route).await {
            return resp;
        }
        self.dispatch(&request).await
    }
}
