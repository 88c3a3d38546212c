//! Fixtures shared by the unit tests.

use async_trait::async_trait;
use nalgebra::Vector3;
use parking_lot::Mutex;
use stargazer_env::{Endpoint, NodeId, RequestEnvelope, ResponseEnvelope};
use std::sync::Arc;
use std::time::Duration;

use crate::body::Body;
use crate::compute_service::ComputeService;
use crate::config::CoordinatorConfig;
use crate::coordinator::{CancelHandle, SimulationCoordinator, StepObserver};
use crate::kernel::PairwiseKernel;
use crate::partition::IndexRange;
use crate::protocol::{self, routes, AssignRequest, StepResponse};
use crate::registry::RegistrationDesk;
use crate::router::{LocalRouter, ServiceHandler};
use crate::token_store::TokenType;
use crate::trust::{Authenticator, Validation};

/// Accepts secrets named after their type ("user", "manager", "compute").
pub struct NamedTokens;

#[async_trait]
impl Authenticator for NamedTokens {
    async fn validate(&self, secret: &str) -> Validation {
        secret
            .parse::<TokenType>()
            .map_or(Validation::invalid(), Validation::valid)
    }
}

/// `n` unit masses spread over a small plane, none coincident.
pub fn bodies(n: usize) -> Vec<Body> {
    (0..n)
        .map(|i| {
            let x = i as f64;
            let y = (i % 3) as f64 * 0.5;
            Body::new(Vector3::new(x, y, 0.0), Vector3::zeros(), 1.0, 0.0)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fault {
    None,
    /// Never answers in any reasonable time
    Hang,
    /// Step replies claim a range one index too long
    WrongRange,
    /// Every call answers with this status
    Reject(u16),
}

/// A real Compute service with a switchable fault in front of it.
pub struct FaultyCompute {
    inner: ComputeService,
    fault: Mutex<Fault>,
    assigned: Mutex<Vec<IndexRange>>,
    steps: Mutex<u64>,
}

impl FaultyCompute {
    pub fn new() -> Self {
        Self {
            inner: ComputeService::new(Arc::new(NamedTokens), Arc::new(PairwiseKernel), "test"),
            fault: Mutex::new(Fault::None),
            assigned: Mutex::new(Vec::new()),
            steps: Mutex::new(0),
        }
    }

    /// Every range this node was assigned, in call order.
    pub fn assigned(&self) -> Vec<IndexRange> {
        self.assigned.lock().clone()
    }

    /// Number of step calls received.
    pub fn steps(&self) -> u64 {
        *self.steps.lock()
    }
}

#[async_trait]
impl ServiceHandler for FaultyCompute {
    async fn handle(&self, request: RequestEnvelope) -> ResponseEnvelope {
        match request.route.as_str() {
            routes::COMPUTE_ASSIGN => {
                if let Ok(assign) = serde_json::from_slice::<AssignRequest>(&request.payload) {
                    self.assigned.lock().push(assign.range);
                }
            }
            routes::COMPUTE_STEP => *self.steps.lock() += 1,
            _ => {}
        }

        let fault = *self.fault.lock();
        match fault {
            Fault::None => self.inner.handle(request).await,
            Fault::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                self.inner.handle(request).await
            }
            Fault::Reject(status) => ResponseEnvelope::new(status, Vec::new()),
            Fault::WrongRange => {
                let is_step = request.route == routes::COMPUTE_STEP;
                let resp = self.inner.handle(request).await;
                if !is_step || !resp.is_success() {
                    return resp;
                }
                match serde_json::from_slice::<StepResponse>(&resp.payload) {
                    Ok(mut reply) => {
                        reply.range = IndexRange::new(reply.range.start, reply.range.end + 1);
                        protocol::reply(200, &reply)
                    }
                    Err(_) => resp,
                }
            }
        }
    }
}

/// Router, desk and N compute nodes, registered in order.
pub struct TestCluster {
    pub router: Arc<LocalRouter>,
    pub desk: Arc<RegistrationDesk>,
    pub nodes: Mutex<Vec<Arc<FaultyCompute>>>,
}

impl TestCluster {
    pub fn new(n: usize) -> Self {
        let cluster = Self {
            router: LocalRouter::shared(),
            desk: Arc::new(RegistrationDesk::new()),
            nodes: Mutex::new(Vec::new()),
        };
        for _ in 0..n {
            cluster.add_node();
        }
        cluster
    }

    /// Starts and registers one more node. Returns its index.
    pub fn add_node(&self) -> usize {
        let mut nodes = self.nodes.lock();
        let i = nodes.len();
        let endpoint = Self::endpoint(i);
        let node = Arc::new(FaultyCompute::new());
        self.router.mount(endpoint.clone(), node.clone());
        self.desk
            .register(NodeId::from_seed(i as u64), endpoint)
            .expect("fresh node registers");
        nodes.push(node);
        i
    }

    pub fn endpoint(i: usize) -> Endpoint {
        Endpoint::parse(&format!("http://compute-{}:8000", i)).expect("valid endpoint")
    }

    pub fn set_fault(&self, i: usize, fault: Fault) {
        *self.nodes.lock()[i].fault.lock() = fault;
    }

    pub fn node(&self, i: usize) -> Arc<FaultyCompute> {
        self.nodes.lock()[i].clone()
    }

    pub fn coordinator(&self) -> SimulationCoordinator<LocalRouter> {
        SimulationCoordinator::new(
            self.router.clone(),
            "manager",
            self.desk.clone(),
            CoordinatorConfig::default(),
        )
    }
}

/// Cancels the run once `after` steps have been observed.
pub struct CancelAfter {
    handle: CancelHandle,
    after: u64,
}

impl CancelAfter {
    pub fn new(handle: CancelHandle, after: u64) -> Self {
        Self { handle, after }
    }
}

impl StepObserver for CancelAfter {
    fn on_step(&self, step: u64, _bodies: &[Body]) {
        if step + 1 >= self.after {
            self.handle.cancel();
        }
    }
}

/// Runs `action` once, right after step `step` is merged.
pub struct AtStep<F> {
    step: u64,
    action: Mutex<Option<F>>,
}

impl<F: FnOnce() + Send> AtStep<F> {
    pub fn new(step: u64, action: F) -> Self {
        Self {
            step,
            action: Mutex::new(Some(action)),
        }
    }
}

impl<F: FnOnce() + Send> StepObserver for AtStep<F> {
    fn on_step(&self, step: u64, _bodies: &[Body]) {
        if step != self.step {
            return;
        }
        if let Some(action) = self.action.lock().take() {
            action();
        }
    }
}
