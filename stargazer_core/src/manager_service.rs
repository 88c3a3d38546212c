//! The Manager service.
//!
//! Registration goes to the shared [`RegistrationDesk`] and never waits on a
//! run. Configure and simulate need exclusive use of the coordinator; if a
//! run holds it they answer 409 immediately instead of queueing.

use async_trait::async_trait;
use parking_lot::RwLock;
use stargazer_env::{NodeTransport, RequestEnvelope, ResponseEnvelope};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::coordinator::{CancelHandle, RunProgress, RunReport, RunState, SimulationCoordinator};
use crate::error::{Result, StargazerError};
use crate::protocol::{
    self, routes, ConfigureRequest, RegisterRequest, ServiceInfo, SimulateRequest, SimulateResponse,
    StatusResponse, SuccessResponse,
};
use crate::registry::RegistrationDesk;
use crate::router::ServiceHandler;
use crate::token_store::TokenType;
use crate::trust::{authorize, Authenticator};

const COMPUTE_ONLY: &[TokenType] = &[TokenType::Compute];
const USER_ONLY: &[TokenType] = &[TokenType::User];

pub struct ManagerService<Net: NodeTransport + ?Sized> {
    authenticator: Arc<dyn Authenticator>,
    desk: Arc<RegistrationDesk>,
    coordinator: Mutex<SimulationCoordinator<Net>>,
    cancel: CancelHandle,
    progress: Arc<RwLock<RunProgress>>,
    info: ServiceInfo,
}

impl<Net: NodeTransport + ?Sized> ManagerService<Net> {
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        coordinator: SimulationCoordinator<Net>,
        service_version: impl Into<String>,
    ) -> Self {
        Self {
            authenticator,
            desk: coordinator.desk(),
            cancel: coordinator.cancel_handle(),
            progress: coordinator.progress(),
            coordinator: Mutex::new(coordinator),
            info: ServiceInfo::new(service_version, "manager"),
        }
    }

    fn busy() -> StargazerError {
        StargazerError::conflict("run in progress")
    }

    async fn register(&self, bearer: Option<&str>, payload: &[u8]) -> Result<SuccessResponse> {
        let principal = authorize(&*self.authenticator, bearer, COMPUTE_ONLY).await?;
        let request: RegisterRequest = protocol::decode(payload)?;
        self.desk.register(principal.identity, request.compute_endpoint)?;
        Ok(SuccessResponse::OK)
    }

    async fn unregister(&self, bearer: Option<&str>) -> Result<SuccessResponse> {
        let principal = authorize(&*self.authenticator, bearer, COMPUTE_ONLY).await?;
        self.desk.unregister(principal.identity)?;
        Ok(SuccessResponse::OK)
    }

    async fn configure(&self, bearer: Option<&str>, payload: &[u8]) -> Result<SuccessResponse> {
        authorize(&*self.authenticator, bearer, USER_ONLY).await?;
        let setup = protocol::decode::<ConfigureRequest>(payload)?.into_setup()?;

        let mut coordinator = self.coordinator.try_lock().map_err(|_| Self::busy())?;
        coordinator.configure(setup).await?;
        Ok(SuccessResponse::OK)
    }

    async fn simulate(&self, bearer: Option<&str>, payload: &[u8]) -> Result<RunReport> {
        authorize(&*self.authenticator, bearer, USER_ONLY).await?;
        let request: SimulateRequest = protocol::decode(payload)?;

        let mut coordinator = self.coordinator.try_lock().map_err(|_| Self::busy())?;
        coordinator.simulate(request.duration).await
    }

    async fn cancel(&self, bearer: Option<&str>) -> Result<SuccessResponse> {
        authorize(&*self.authenticator, bearer, USER_ONLY).await?;
        self.cancel.cancel();
        info!("Cancellation requested");
        Ok(SuccessResponse::OK)
    }

    async fn status(&self, bearer: Option<&str>) -> Result<StatusResponse> {
        authorize(&*self.authenticator, bearer, USER_ONLY).await?;
        let progress = self.progress.read().clone();
        Ok(StatusResponse {
            state: progress.state,
            version: progress.version,
            body_count: progress.body_count,
            steps_completed: progress.steps_completed,
            steps_scheduled: progress.steps_scheduled,
            pending_changes: self.desk.pending(),
            nodes: progress.nodes,
        })
    }

    fn simulate_reply(result: Result<RunReport>) -> ResponseEnvelope {
        match result {
            Ok(report) => {
                let status = if report.status == RunState::Failed { 503 } else { 200 };
                protocol::reply(
                    status,
                    &SimulateResponse {
                        success: report.status == RunState::Completed,
                        status: report.status,
                        steps_completed: report.steps_completed,
                        steps_scheduled: report.steps_scheduled,
                        bodies: report.bodies,
                        degraded_events: report.events,
                    },
                )
            }
            Err(e) => protocol::error_reply(&e),
        }
    }
}

#[async_trait]
impl<Net: NodeTransport + ?Sized> ServiceHandler for ManagerService<Net> {
    async fn handle(&self, request: RequestEnvelope) -> ResponseEnvelope {
        let bearer = request.bearer.as_deref();
        if let Some(resp) = self.info.answer(&*self.authenticator, bearer, &request.route).await {
            return resp;
        }

        let payload = &request.payload;
        match request.route.as_str() {
            routes::MANAGER_REGISTER => protocol::respond(200, self.register(bearer, payload).await),
            routes::MANAGER_UNREGISTER => protocol::respond(200, self.unregister(bearer).await),
            routes::MANAGER_CONFIGURE => protocol::respond(200, self.configure(bearer, payload).await),
            routes::MANAGER_SIMULATE => Self::simulate_reply(self.simulate(bearer, payload).await),
            routes::MANAGER_CANCEL => protocol::respond(200, self.cancel(bearer).await),
            routes::MANAGER_STATUS => protocol::respond(200, self.status(bearer).await),
            _ => protocol::error_reply(&StargazerError::NotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::SimulationConfig;
    use crate::router::LocalRouter;
    use crate::test_support::{bodies, Fault, NamedTokens, TestCluster};

    fn service(cluster: &TestCluster) -> ManagerService<LocalRouter> {
        ManagerService::new(Arc::new(NamedTokens), cluster.coordinator(), "1.0.0")
    }

    fn request(route: &str, bearer: &str, body: serde_json::Value) -> RequestEnvelope {
        RequestEnvelope::new(route, Some(bearer.to_string()), body.to_string().into_bytes())
    }

    fn configure_body(n: usize) -> serde_json::Value {
        let constants = SimulationConfig {
            timestep: 0.1,
            gravitational_constant: 1.0,
            coulomb_constant: 0.0,
            softening: 0.01,
        };
        serde_json::json!({ "constants": constants, "bodies": bodies(n) })
    }

    #[tokio::test(start_paused = true)]
    async fn test_configure_then_simulate() {
        let cluster = TestCluster::new(2);
        let svc = service(&cluster);

        let resp = svc.handle(request(routes::MANAGER_CONFIGURE, "user", configure_body(5))).await;
        assert_eq!(resp.status, 200);

        let resp = svc
            .handle(request(routes::MANAGER_SIMULATE, "user", serde_json::json!({"duration": 0.3})))
            .await;
        assert_eq!(resp.status, 200);
        let body: SimulateResponse = serde_json::from_slice(&resp.payload).unwrap();
        assert!(body.success);
        assert_eq!(body.steps_completed, 3);
        assert_eq!(body.bodies.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operations_enforce_token_type() {
        let cluster = TestCluster::new(1);
        let svc = service(&cluster);

        let resp = svc.handle(request(routes::MANAGER_CONFIGURE, "compute", configure_body(2))).await;
        assert_eq!(resp.status, 401);

        let resp = svc
            .handle(request(
                routes::MANAGER_REGISTER,
                "user",
                serde_json::json!({"compute_endpoint": "http://compute-9:8000"}),
            ))
            .await;
        assert_eq!(resp.status, 401);
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulate_before_configure_is_conflict() {
        let cluster = TestCluster::new(1);
        let svc = service(&cluster);
        let resp = svc
            .handle(request(routes::MANAGER_SIMULATE, "user", serde_json::json!({"duration": 1.0})))
            .await;
        assert_eq!(resp.status, 409);
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_and_unregister() {
        let cluster = TestCluster::new(0);
        let svc = service(&cluster);
        let body = serde_json::json!({"compute_endpoint": "http://compute-9:8000"});

        let resp = svc.handle(request(routes::MANAGER_REGISTER, "compute", body.clone())).await;
        assert_eq!(resp.status, 200);
        let resp = svc.handle(request(routes::MANAGER_REGISTER, "compute", body)).await;
        assert_eq!(resp.status, 409);

        let empty = serde_json::json!({});
        let resp = svc.handle(request(routes::MANAGER_UNREGISTER, "compute", empty.clone())).await;
        assert_eq!(resp.status, 200);
        let resp = svc.handle(request(routes::MANAGER_UNREGISTER, "compute", empty)).await;
        assert_eq!(resp.status, 404);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_coordinator_is_conflict() {
        let cluster = TestCluster::new(1);
        let svc = service(&cluster);

        let _guard = svc.coordinator.lock().await;
        let resp = svc.handle(request(routes::MANAGER_CONFIGURE, "user", configure_body(2))).await;
        assert_eq!(resp.status, 409);

        // Registration and status never wait on a run
        let resp = svc
            .handle(request(
                routes::MANAGER_REGISTER,
                "compute",
                serde_json::json!({"compute_endpoint": "http://compute-9:8000"}),
            ))
            .await;
        assert_eq!(resp.status, 200);
        let resp = svc.handle(request(routes::MANAGER_STATUS, "user", serde_json::json!({}))).await;
        let status: StatusResponse = serde_json::from_slice(&resp.payload).unwrap();
        assert_eq!(status.pending_changes, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_run_is_unavailable_with_state() {
        let cluster = TestCluster::new(2);
        let svc = service(&cluster);
        svc.handle(request(routes::MANAGER_CONFIGURE, "user", configure_body(4))).await;

        cluster.set_fault(0, Fault::Reject(500));
        cluster.set_fault(1, Fault::Reject(500));
        let resp = svc
            .handle(request(routes::MANAGER_SIMULATE, "user", serde_json::json!({"duration": 1.0})))
            .await;
        assert_eq!(resp.status, 503);

        let body: SimulateResponse = serde_json::from_slice(&resp.payload).unwrap();
        assert!(!body.success);
        assert_eq!(body.status, RunState::Failed);
        assert_eq!(body.bodies.len(), 4);
        assert_eq!(body.degraded_events.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_reports_nodes() {
        let cluster = TestCluster::new(2);
        let svc = service(&cluster);
        svc.handle(request(routes::MANAGER_CONFIGURE, "user", configure_body(4))).await;

        let resp = svc.handle(request(routes::MANAGER_STATUS, "user", serde_json::json!({}))).await;
        let status: StatusResponse = serde_json::from_slice(&resp.payload).unwrap();
        assert_eq!(status.state, RunState::Idle);
        assert_eq!(status.version, Some(1));
        assert_eq!(status.nodes.len(), 2);
        assert!(status.nodes.iter().all(|n| n.healthy));
    }
}
