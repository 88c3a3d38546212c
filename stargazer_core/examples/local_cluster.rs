//! Stargazer Local Cluster - Auth, Manager and three Compute nodes in one process
//!
//! Wires the three services over the in-process router exactly as they
//! would talk over HTTP:
//!
//! 1. Auth mints a bootstrap User token, then Manager and Compute tokens
//! 2. Each Compute node registers itself with the Manager
//! 3. The operator configures a two-body orbit plus a charged swarm
//! 4. The Manager partitions the bodies and drives the step loop
//!
//! Run: `RUST_LOG=info cargo run --example local_cluster`

use chrono::{Duration, Utc};
use nalgebra::Vector3;
use stargazer_core::client::{AuthClient, ManagerClient, RemoteAuthenticator};
use stargazer_core::config::{AuthConfig, ComputeConfig, ManagerConfig};
use stargazer_core::kernel::{kinetic_energy, potential_energy};
use stargazer_core::registry::RegistrationDesk;
use stargazer_core::router::LocalRouter;
use stargazer_core::{
    AuthService, Authenticator, Body, ComputeService, ManagerService, PairwiseKernel,
    SimulationConfig, SimulationCoordinator, SledTokenStore, TokenAuthority,
    TokenType,
};
use stargazer_env::{Endpoint, TokioContext};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const COMPUTE_NODES: usize = 3;

fn print_energy(label: &str, bodies: &[Body], constants: &SimulationConfig) {
    let kinetic = kinetic_energy(bodies);
    let potential = potential_energy(bodies, constants);
    println!(
        "  {:<6} kinetic {:>12.6}  potential {:>12.6}  total {:>12.6}",
        label,
        kinetic,
        potential,
        kinetic + potential
    );
}

fn initial_bodies() -> Vec<Body> {
    let mut bodies = vec![
        Body::new(Vector3::zeros(), Vector3::zeros(), 1000.0, 0.0),
        Body::new(Vector3::new(10.0, 0.0, 0.0), Vector3::new(0.0, 10.0, 0.0), 1.0, 0.0),
    ];
    for i in 0..10 {
        let angle = i as f64 * std::f64::consts::TAU / 10.0;
        let position = Vector3::new(angle.cos(), angle.sin(), 0.0) * 25.0;
        let charge = if i % 2 == 0 { 0.5 } else { -0.5 };
        bodies.push(Body::new(position, Vector3::zeros(), 0.1, charge));
    }
    bodies
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    println!("=== Stargazer Local Cluster ===\n");

    let ctx = TokioContext::shared();
    let router = LocalRouter::shared();
    let auth_config = AuthConfig::from_env()?;
    let manager_config = ManagerConfig::from_env()?;
    let auth_endpoint = match manager_config.auth_endpoint.clone() {
        Some(endpoint) => endpoint,
        None => Endpoint::parse("http://auth:7000")?,
    };
    let manager_endpoint = Endpoint::parse("http://manager:7001")?;

    // Auth
    let store = Arc::new(SledTokenStore::open_temporary()?);
    let authority = Arc::new(TokenAuthority::new(ctx.clone(), store));
    let admin = authority.bootstrap(TokenType::User, Duration::hours(1))?;
    router.mount(
        auth_endpoint.clone(),
        Arc::new(AuthService::new(authority, auth_config.service_version)),
    );
    println!("[auth]    listening on {}", auth_endpoint);

    let tokens = AuthClient::new(router.clone(), auth_endpoint.clone(), admin.clone());
    let expires = Utc::now() + Duration::hours(1);

    // Manager
    let manager_token = tokens.create(TokenType::Manager, expires).await?;
    let remote = |token: &str| -> Arc<dyn Authenticator> {
        Arc::new(
            RemoteAuthenticator::new(
                ctx.clone(),
                router.clone(),
                auth_endpoint.clone(),
                token,
                manager_config.auth_retry.clone(),
            )
            .with_call_timeout(manager_config.coordinator.call_timeout),
        )
    };
    let coordinator = SimulationCoordinator::new(
        router.clone(),
        manager_token.clone(),
        Arc::new(RegistrationDesk::new()),
        manager_config.coordinator.clone(),
    );
    router.mount(
        manager_endpoint.clone(),
        Arc::new(ManagerService::new(remote(&manager_token), coordinator, manager_config.service_version.clone())),
    );
    println!("[manager] listening on {}", manager_endpoint);

    // Compute nodes
    for i in 0..COMPUTE_NODES {
        let endpoint = Endpoint::parse(&format!("http://compute-{}:8000", i))?;
        let token = tokens.create(TokenType::Compute, expires).await?;
        let config = ComputeConfig {
            endpoint: Some(endpoint.clone()),
            manager_endpoint: Some(manager_endpoint.clone()),
            service_token: Some(token.clone()),
            ..ComputeConfig::default()
        };

        let service = ComputeService::new(remote(&token), Arc::new(PairwiseKernel), config.service_version.clone());
        router.mount(endpoint.clone(), Arc::new(service));
        ManagerClient::new(ctx.clone(), router.clone(), manager_endpoint.clone(), token)
            .register(&endpoint, &config.registration_retry)
            .await?;
        println!("[compute] {} registered", endpoint);
    }

    // Operator
    let constants = SimulationConfig {
        timestep: 0.01,
        gravitational_constant: 1.0,
        coulomb_constant: 1.0,
        softening: 0.05,
    };
    let bodies = initial_bodies();
    println!("\nConfiguring {} bodies, dt = {}", bodies.len(), constants.timestep);

    let operator = ManagerClient::new(ctx.clone(), router.clone(), manager_endpoint.clone(), admin);
    print_energy("before", &bodies, &constants);

    operator.configure(constants, bodies).await?;
    let result = operator.simulate(2.0).await?;

    println!(
        "\nRun {:?}: {}/{} steps, {} degraded events",
        result.status,
        result.steps_completed,
        result.steps_scheduled,
        result.degraded_events.len()
    );
    print_energy("after", &result.bodies, &constants);

    let status = operator.status().await?;
    for node in &status.nodes {
        println!(
            "  node {}  {}  healthy={}  synced={:?}",
            node.id, node.endpoint, node.healthy, node.synced_version
        );
    }

    Ok(())
}
