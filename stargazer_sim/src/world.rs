//! SimCluster - a full Stargazer deployment inside one simulation.
//!
//! Auth, Manager and the Compute nodes are the production services, mounted
//! on an in-process router and reached only through the [`SimNetwork`].
//! Every privileged call is authenticated remotely against Auth, exactly as
//! in a deployment.

use chrono::Duration as ChronoDuration;
use stargazer_core::client::{AuthClient, ManagerClient, RemoteAuthenticator};
use stargazer_core::config::CoordinatorConfig;
use stargazer_core::registry::RegistrationDesk;
use stargazer_core::retry::RetryConfig;
use stargazer_core::router::LocalRouter;
use stargazer_core::{
    AuthService, Authenticator, ComputeService, ManagerService, MemoryTokenStore, PairwiseKernel,
    Result, SimulationConfig, SimulationCoordinator, StargazerError, StepObserver, TokenAuthority,
    TokenType,
};
use stargazer_env::Endpoint;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::context::SimContext;
use crate::network::SimNetwork;

pub const AUTH_ENDPOINT: &str = "http://auth:7000";
pub const MANAGER_ENDPOINT: &str = "http://manager:7001";

/// Version every simulated service reports.
const SIM_VERSION: &str = "sim";

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Compute nodes registered at start
    pub compute_nodes: usize,

    /// Bodies in the generated system
    pub body_count: usize,

    /// Simulated seconds per `simulate` call
    pub duration: f64,

    /// Physics constants
    pub constants: SimulationConfig,

    /// Manager-to-Compute call deadline
    pub call_timeout: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            compute_nodes: 3,
            body_count: 24,
            duration: 0.1,
            constants: SimulationConfig {
                timestep: 0.01,
                gravitational_constant: 1.0,
                coulomb_constant: 1.0,
                softening: 0.05,
            },
            call_timeout: stargazer_core::config::DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl SimConfig {
    /// Seed for token secrets and the virtual clock.
    pub fn context_seed(&self) -> u64 {
        self.seed
    }

    /// Seed for body generation.
    pub fn physics_seed(&self) -> u64 {
        self.seed.wrapping_mul(0x9e3779b97f4a7c15)
    }

    /// Seed for network fault draws.
    pub fn network_seed(&self) -> u64 {
        self.seed.wrapping_mul(0x517cc1b727220a95)
    }
}

/// A mounted Compute node.
pub struct ComputeHandle {
    pub endpoint: Endpoint,

    /// The node's Compute token (also its registry identity)
    pub token: String,

    pub service: Arc<ComputeService>,
}

fn endpoint(raw: &str) -> Result<Endpoint> {
    Endpoint::parse(raw).map_err(StargazerError::from)
}

/// The running cluster.
pub struct SimCluster {
    pub config: SimConfig,
    pub context: Arc<SimContext>,
    pub network: Arc<SimNetwork>,
    pub authority: Arc<TokenAuthority<SimContext>>,
    pub auth: Endpoint,
    pub manager: Endpoint,
    router: Arc<LocalRouter>,
    admin: String,
    computes: Vec<ComputeHandle>,
}

impl SimCluster {
    /// Boots Auth, then the Manager, then registers every Compute node.
    ///
    /// Must run inside the simulation runtime.
    pub async fn start(config: SimConfig, observer: Option<Arc<dyn StepObserver>>) -> Result<Self> {
        let context = SimContext::shared(config.context_seed());
        let router = LocalRouter::shared();
        let network = SimNetwork::shared(router.clone(), config.network_seed());
        let auth = endpoint(AUTH_ENDPOINT)?;
        let manager = endpoint(MANAGER_ENDPOINT)?;

        let authority = Arc::new(TokenAuthority::new(context.clone(), Arc::new(MemoryTokenStore::new())));
        let admin = authority.bootstrap(TokenType::User, ChronoDuration::days(1))?;
        router.mount(auth.clone(), Arc::new(AuthService::new(authority.clone(), SIM_VERSION)));

        let mut cluster = Self {
            config,
            context,
            network,
            authority,
            auth,
            manager,
            router,
            admin,
            computes: Vec::new(),
        };

        let manager_token = cluster.mint(TokenType::Manager).await?;
        let mut coordinator = SimulationCoordinator::new(
            cluster.network.clone(),
            manager_token.clone(),
            Arc::new(RegistrationDesk::new()),
            CoordinatorConfig {
                call_timeout: cluster.config.call_timeout,
            },
        );
        coordinator.set_observer(observer);
        let service = ManagerService::new(cluster.remote(&manager_token), coordinator, SIM_VERSION);
        cluster.router.mount(cluster.manager.clone(), Arc::new(service));

        for _ in 0..cluster.config.compute_nodes {
            cluster.add_compute().await?;
        }

        info!(
            seed = cluster.config.seed,
            nodes = cluster.computes.len(),
            "Cluster up"
        );
        Ok(cluster)
    }

    /// Mints a token of `token_type` through the Auth API.
    pub async fn mint(&self, token_type: TokenType) -> Result<String> {
        let expires = self.authority.now() + ChronoDuration::days(1);
        self.tokens().create(token_type, expires).await
    }

    fn remote(&self, token: &str) -> Arc<dyn Authenticator> {
        Arc::new(RemoteAuthenticator::new(
            self.context.clone(),
            self.network.clone(),
            self.auth.clone(),
            token,
            RetryConfig::default(),
        ))
    }

    /// Mounts a new Compute node and registers it. Returns its index.
    pub async fn add_compute(&mut self) -> Result<usize> {
        let index = self.computes.len();
        let token = self.mint(TokenType::Compute).await?;
        let endpoint = endpoint(&format!("http://compute-{}:8000", index))?;

        let service = Arc::new(ComputeService::new(self.remote(&token), Arc::new(PairwiseKernel), SIM_VERSION));
        self.router.mount(endpoint.clone(), service.clone());

        self.client(&token)
            .register(&endpoint, &RetryConfig::default())
            .await?;
        debug!(index, endpoint = %endpoint, "Compute node registered");

        self.computes.push(ComputeHandle {
            endpoint,
            token,
            service,
        });
        Ok(index)
    }

    /// The operator's view: User token against the Manager.
    pub fn operator(&self) -> ManagerClient<SimContext, SimNetwork> {
        self.client(&self.admin)
    }

    /// A Manager client presenting `token`.
    pub fn client(&self, token: &str) -> ManagerClient<SimContext, SimNetwork> {
        ManagerClient::new(self.context.clone(), self.network.clone(), self.manager.clone(), token)
    }

    /// Token administration with the bootstrap User token.
    pub fn tokens(&self) -> AuthClient<SimNetwork> {
        AuthClient::new(self.network.clone(), self.auth.clone(), self.admin.clone())
    }

    pub fn compute(&self, index: usize) -> Option<&ComputeHandle> {
        self.computes.get(index)
    }

    pub fn computes(&self) -> &[ComputeHandle] {
        &self.computes
    }
}
