//! End-to-end tests over the in-process router: real Auth, Manager and
//! Compute services, with every call authenticated remotely against Auth.

use approx::assert_relative_eq;
use chrono::{Duration, Utc};
use nalgebra::Vector3;
use stargazer_core::client::{describe, AuthClient, ManagerClient, RemoteAuthenticator};
use stargazer_core::config::CoordinatorConfig;
use stargazer_core::partition::IndexRange;
use stargazer_core::registry::RegistrationDesk;
use stargazer_core::retry::RetryConfig;
use stargazer_core::router::LocalRouter;
use stargazer_core::{
    AuthService, Authenticator, Body, ComputeService, ManagerService, MemoryTokenStore,
    PairwiseKernel, PhysicsKernel, RunState, SimulationConfig, SimulationCoordinator,
    StargazerError, TokenAuthority, TokenType,
};
use stargazer_env::{Endpoint, TokioContext};
use std::sync::Arc;

struct Cluster {
    ctx: Arc<TokioContext>,
    router: Arc<LocalRouter>,
    auth: Endpoint,
    manager: Endpoint,
    admin: String,
    computes: Vec<(Arc<ComputeService>, String)>,
}

fn endpoint(raw: &str) -> Endpoint {
    Endpoint::parse(raw).unwrap()
}

impl Cluster {
    async fn start(n: usize) -> Self {
        let ctx = TokioContext::shared();
        let router = LocalRouter::shared();
        let auth = endpoint("http://auth:7000");
        let manager = endpoint("http://manager:7001");

        let authority = Arc::new(TokenAuthority::new(ctx.clone(), Arc::new(MemoryTokenStore::new())));
        let admin = authority.bootstrap(TokenType::User, Duration::hours(1)).unwrap();
        router.mount(auth.clone(), Arc::new(AuthService::new(authority, "test")));

        let mut cluster = Self {
            ctx,
            router,
            auth,
            manager,
            admin,
            computes: Vec::new(),
        };

        let manager_token = cluster.mint(TokenType::Manager).await;
        let coordinator = SimulationCoordinator::new(
            cluster.router.clone(),
            manager_token.clone(),
            Arc::new(RegistrationDesk::new()),
            CoordinatorConfig::default(),
        );
        let service = ManagerService::new(cluster.remote(&manager_token), coordinator, "test");
        cluster.router.mount(cluster.manager.clone(), Arc::new(service));

        for _ in 0..n {
            cluster.add_compute().await;
        }
        cluster
    }

    async fn mint(&self, token_type: TokenType) -> String {
        AuthClient::new(self.router.clone(), self.auth.clone(), self.admin.clone())
            .create(token_type, Utc::now() + Duration::hours(1))
            .await
            .unwrap()
    }

    fn remote(&self, token: &str) -> Arc<dyn Authenticator> {
        Arc::new(RemoteAuthenticator::new(
            self.ctx.clone(),
            self.router.clone(),
            self.auth.clone(),
            token,
            RetryConfig::none(),
        ))
    }

    fn client(&self, token: &str) -> ManagerClient<TokioContext, LocalRouter> {
        ManagerClient::new(self.ctx.clone(), self.router.clone(), self.manager.clone(), token)
    }

    fn user(&self) -> ManagerClient<TokioContext, LocalRouter> {
        self.client(&self.admin)
    }

    async fn add_compute(&mut self) {
        let i = self.computes.len();
        let token = self.mint(TokenType::Compute).await;
        let ep = endpoint(&format!("http://compute-{}:8000", i));

        let service = Arc::new(ComputeService::new(self.remote(&token), Arc::new(PairwiseKernel), "test"));
        self.router.mount(ep.clone(), service.clone());
        self.client(&token).register(&ep, &RetryConfig::none()).await.unwrap();
        self.computes.push((service, token));
    }
}

fn constants() -> SimulationConfig {
    SimulationConfig {
        timestep: 0.05,
        gravitational_constant: 1.0,
        coulomb_constant: 0.5,
        softening: 0.01,
    }
}

fn initial_bodies(n: usize) -> Vec<Body> {
    (0..n)
        .map(|i| {
            let angle = i as f64 * 0.7;
            let position = Vector3::new(angle.cos() * (1.0 + i as f64), angle.sin() * 2.0, 0.1 * i as f64);
            let velocity = Vector3::new(-angle.sin(), angle.cos(), 0.0) * 0.1;
            let charge = if i % 2 == 0 { 0.2 } else { -0.1 };
            Body::new(position, velocity, 1.0 + i as f64 * 0.1, charge)
        })
        .collect()
}

fn serial(mut bodies: Vec<Body>, config: &SimulationConfig, steps: u64) -> Vec<Body> {
    for _ in 0..steps {
        let updates = PairwiseKernel.step(&bodies, 0..bodies.len(), config);
        for (body, update) in bodies.iter_mut().zip(&updates) {
            body.apply(update);
        }
    }
    bodies
}

#[tokio::test]
async fn test_distributed_run_matches_serial() {
    let cluster = Cluster::start(3).await;
    let user = cluster.user();

    user.configure(constants(), initial_bodies(9)).await.unwrap();
    let result = user.simulate(0.5).await.unwrap();

    assert!(result.success);
    assert_eq!(result.status, RunState::Completed);
    assert_eq!(result.steps_completed, 10);

    let expected = serial(initial_bodies(9), &constants(), 10);
    for (got, want) in result.bodies.iter().zip(&expected) {
        assert_relative_eq!(got.position, want.position, epsilon = 1e-12);
        assert_relative_eq!(got.velocity, want.velocity, epsilon = 1e-12);
    }
}

#[tokio::test]
async fn test_unregister_repartitions_remaining_nodes() {
    let cluster = Cluster::start(3).await;
    let user = cluster.user();
    user.configure(constants(), initial_bodies(9)).await.unwrap();

    user.simulate(0.05).await.unwrap();
    let ranges: Vec<_> = cluster.computes.iter().map(|(svc, _)| svc.range()).collect();
    assert_eq!(
        ranges,
        vec![
            Some(IndexRange::new(0, 3)),
            Some(IndexRange::new(3, 6)),
            Some(IndexRange::new(6, 9)),
        ]
    );

    let (_, second) = &cluster.computes[1];
    cluster.client(second).unregister().await.unwrap();

    let result = user.simulate(0.05).await.unwrap();
    assert_eq!(result.status, RunState::Completed);
    assert_eq!(cluster.computes[0].0.range(), Some(IndexRange::new(0, 5)));
    assert_eq!(cluster.computes[2].0.range(), Some(IndexRange::new(5, 9)));

    let status = user.status().await.unwrap();
    assert_eq!(status.nodes.len(), 2);
}

#[tokio::test]
async fn test_token_types_gate_every_boundary() {
    let cluster = Cluster::start(1).await;
    let (_, compute_token) = &cluster.computes[0];

    let err = cluster
        .client(compute_token)
        .configure(constants(), initial_bodies(2))
        .await
        .unwrap_err();
    assert!(matches!(err, StargazerError::Rejected { status: 401 }));

    let err = cluster
        .user()
        .register(&endpoint("http://compute-9:8000"), &RetryConfig::none())
        .await
        .unwrap_err();
    assert!(matches!(err, StargazerError::Rejected { status: 401 }));
}

#[tokio::test]
async fn test_auth_outage_fails_closed() {
    let cluster = Cluster::start(1).await;
    cluster.router.unmount(&cluster.auth);

    let err = cluster
        .user()
        .configure(constants(), initial_bodies(2))
        .await
        .unwrap_err();
    assert!(matches!(err, StargazerError::Rejected { status: 401 }));
}

#[tokio::test]
async fn test_revoked_compute_token_cannot_unregister() {
    let cluster = Cluster::start(1).await;
    let (_, token) = &cluster.computes[0];

    AuthClient::new(cluster.router.clone(), cluster.auth.clone(), cluster.admin.clone())
        .revoke(token)
        .await
        .unwrap();

    let err = cluster.client(token).unregister().await.unwrap_err();
    assert!(matches!(err, StargazerError::Rejected { status: 401 }));
}

#[tokio::test]
async fn test_common_routes() {
    let cluster = Cluster::start(1).await;
    let (version, kind) = describe(&*cluster.router, &cluster.manager, &cluster.admin)
        .await
        .unwrap();
    assert_eq!(version, "test");
    assert_eq!(kind, "manager");

    let (_, kind) = describe(&*cluster.router, &cluster.auth, &cluster.admin).await.unwrap();
    assert_eq!(kind, "auth");
}
