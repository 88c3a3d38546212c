//! Scenario runner - executes DST scenarios against a full cluster.
//!
//! Each run gets its own single-threaded tokio runtime with the clock
//! paused. Call deadlines, injected latency and retry backoff all elapse in
//! virtual time, and task interleaving depends only on the seed.

use futures::future::join;
use stargazer_core::coordinator::DegradedKind;
use stargazer_core::protocol::SimulateResponse;
use stargazer_core::{Body, Result, RunState, StargazerError, StepObserver, TokenType};
use stargazer_env::{Endpoint, NetworkController, StargazerContext};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::oracle::{fingerprint, Oracle};
use crate::scenarios::ScenarioId;
use crate::world::{SimCluster, SimConfig};

/// Distributed and serial runs must agree to within this distance.
const ORACLE_TOLERANCE: f64 = 1e-9;

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Steps of the last run
    pub steps_scheduled: u64,
    pub steps_completed: u64,

    /// Final virtual time in seconds
    pub final_time_secs: f64,

    /// Degraded events reported by the last run
    pub degraded_events: usize,

    /// Fingerprint of the last run's bodies (0 if none)
    pub fingerprint: u64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default)]
pub struct ScenarioMetrics {
    /// Calls that went through the simulated network
    pub calls: u64,

    /// Calls dropped by a partition
    pub dropped: u64,

    /// Replies garbled in flight
    pub corrupted: u64,

    /// Largest deviation from the serial oracle, where compared
    pub max_position_error: f64,
}

/// Assertions collected while a scenario runs.
#[derive(Debug, Default)]
struct Checks {
    failures: Vec<String>,
}

impl Checks {
    fn expect(&mut self, ok: bool, what: impl Into<String>) {
        if !ok {
            self.failures.push(what.into());
        }
    }

    fn verdict(self) -> Option<String> {
        if self.failures.is_empty() {
            None
        } else {
            Some(self.failures.join("; "))
        }
    }
}

/// What a scenario hands back to the runner.
#[derive(Default)]
struct Outcome {
    run: Option<SimulateResponse>,
    checks: Checks,
    max_position_error: f64,
}

/// Runs DST scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Compute nodes at start
    compute_nodes: usize,

    /// Bodies in the system
    body_count: usize,

    /// Simulated seconds per run
    duration: f64,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64, compute_nodes: usize) -> Self {
        let defaults = SimConfig::default();
        Self {
            seed,
            compute_nodes,
            body_count: defaults.body_count,
            duration: defaults.duration,
        }
    }

    /// Sets the number of bodies.
    pub fn with_bodies(mut self, body_count: usize) -> Self {
        self.body_count = body_count;
        self
    }

    /// Sets the simulated duration of each run.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration = secs;
        self
    }

    fn sim_config(&self) -> SimConfig {
        SimConfig {
            seed: self.seed,
            compute_nodes: self.compute_nodes,
            body_count: self.body_count,
            duration: self.duration,
            ..SimConfig::default()
        }
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.run_observed(scenario, None)
    }

    /// Runs a scenario with `observer` receiving every merged step.
    pub fn run_observed(&self, scenario: ScenarioId, observer: Option<Arc<dyn StepObserver>>) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build();
        match runtime {
            Ok(runtime) => runtime.block_on(self.execute(scenario, observer)),
            Err(e) => self.aborted(scenario, format!("runtime: {}", e)),
        }
    }

    fn aborted(&self, scenario: ScenarioId, reason: String) -> ScenarioResult {
        error!("{} aborted: {}", scenario.name(), reason);
        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: false,
            steps_scheduled: 0,
            steps_completed: 0,
            final_time_secs: 0.0,
            degraded_events: 0,
            fingerprint: 0,
            failure_reason: Some(reason),
            metrics: ScenarioMetrics::default(),
        }
    }

    async fn execute(&self, scenario: ScenarioId, observer: Option<Arc<dyn StepObserver>>) -> ScenarioResult {
        let mut cluster = match SimCluster::start(self.sim_config(), observer).await {
            Ok(cluster) => cluster,
            Err(e) => return self.aborted(scenario, format!("cluster start: {}", e)),
        };

        let outcome = match scenario {
            ScenarioId::Baseline => self.run_baseline(&cluster).await,
            ScenarioId::NodeTimeout => self.run_node_timeout(&cluster).await,
            ScenarioId::ProtocolViolation => self.run_protocol_violation(&cluster).await,
            ScenarioId::Churn => self.run_churn(&mut cluster).await,
            ScenarioId::Rejoin => self.run_rejoin(&cluster).await,
            ScenarioId::TotalOutage => self.run_total_outage(&cluster).await,
            ScenarioId::Cancel => self.run_cancel(&cluster).await,
            ScenarioId::TokenExpiry => self.run_token_expiry(&cluster).await,
        };
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => return self.aborted(scenario, e.to_string()),
        };

        let stats = cluster.network.stats();
        let run = outcome.run.as_ref();
        let failure_reason = outcome.checks.verdict();

        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: failure_reason.is_none(),
            steps_scheduled: run.map_or(0, |r| r.steps_scheduled),
            steps_completed: run.map_or(0, |r| r.steps_completed),
            final_time_secs: cluster.context.now().as_secs_f64(),
            degraded_events: run.map_or(0, |r| r.degraded_events.len()),
            fingerprint: run.map_or(0, |r| fingerprint(&r.bodies)),
            failure_reason,
            metrics: ScenarioMetrics {
                calls: stats.calls,
                dropped: stats.dropped,
                corrupted: stats.corrupted,
                max_position_error: outcome.max_position_error,
            },
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Generates the body set and configures the Manager with it.
    async fn configure(&self, cluster: &SimCluster) -> Result<Vec<Body>> {
        let bodies = Oracle::new(cluster.config.physics_seed()).spawn_bodies(self.body_count);
        cluster
            .operator()
            .configure(cluster.config.constants, bodies.clone())
            .await?;
        Ok(bodies)
    }

    fn node(cluster: &SimCluster, index: usize) -> Result<Endpoint> {
        cluster
            .compute(index)
            .map(|c| c.endpoint.clone())
            .ok_or_else(|| StargazerError::validation(format!("scenario needs compute node {}", index)))
    }

    fn deviation(cluster: &SimCluster, initial: &[Body], run: &SimulateResponse) -> f64 {
        let expected = Oracle::reference(initial, &cluster.config.constants, run.steps_completed);
        Oracle::max_position_error(&run.bodies, &expected)
    }

    // ------------------------------------------------------------------
    // Scenarios
    // ------------------------------------------------------------------

    /// DST-001: Baseline - healthy cluster must match the serial oracle.
    async fn run_baseline(&self, cluster: &SimCluster) -> Result<Outcome> {
        info!("DST-001: Baseline - distributed vs serial");

        let initial = self.configure(cluster).await?;
        let run = cluster.operator().simulate(self.duration).await?;
        let error = Self::deviation(cluster, &initial, &run);
        debug!(steps = run.steps_completed, error, "Baseline run finished");

        let mut checks = Checks::default();
        checks.expect(run.status == RunState::Completed, format!("status {:?}", run.status));
        checks.expect(
            cluster.config.constants.steps_for(self.duration).ok() == Some(run.steps_scheduled),
            "steps scheduled != round(duration / timestep)",
        );
        checks.expect(run.steps_completed == run.steps_scheduled, "not every step merged");
        checks.expect(run.degraded_events.is_empty(), "degraded events on a healthy cluster");
        checks.expect(run.bodies.len() == initial.len(), "body count changed");
        checks.expect(error <= ORACLE_TOLERANCE, format!("oracle deviation {:.3e}", error));

        Ok(Outcome {
            run: Some(run),
            checks,
            max_position_error: error,
        })
    }

    /// DST-002: NodeTimeout - one node exceeds the deadline on every call.
    async fn run_node_timeout(&self, cluster: &SimCluster) -> Result<Outcome> {
        info!("DST-002: NodeTimeout - slow compute node");

        self.configure(cluster).await?;
        let slow = Self::node(cluster, 1)?;
        let over_deadline = cluster.config.call_timeout.as_millis() as u64 * 2;
        cluster.network.set_latency(&slow, over_deadline);
        info!("  ⏱ {} now answers after {}ms", slow, over_deadline);

        let run = cluster.operator().simulate(self.duration).await?;

        let mut checks = Checks::default();
        checks.expect(run.status == RunState::Completed, format!("status {:?}", run.status));
        checks.expect(run.degraded_events.len() == 1, format!("{} degraded events", run.degraded_events.len()));
        checks.expect(
            run.degraded_events
                .first()
                .map_or(false, |e| e.kind == DegradedKind::Timeout && e.step == 0),
            "expected a timeout at step 0",
        );
        checks.expect(
            run.steps_completed == run.steps_scheduled,
            "remaining nodes did not cover the slow node's range",
        );

        Ok(Outcome {
            run: Some(run),
            checks,
            ..Outcome::default()
        })
    }

    /// DST-003: ProtocolViolation - one node's replies are garbled.
    async fn run_protocol_violation(&self, cluster: &SimCluster) -> Result<Outcome> {
        info!("DST-003: ProtocolViolation - corrupted replies");

        self.configure(cluster).await?;
        let noisy = Self::node(cluster, 0)?;
        cluster.network.set_corruption(&noisy, 1.0);

        let run = cluster.operator().simulate(self.duration).await?;

        let mut checks = Checks::default();
        checks.expect(run.status == RunState::Completed, format!("status {:?}", run.status));
        checks.expect(
            run.degraded_events.len() == 1
                && run.degraded_events[0].kind == DegradedKind::ProtocolViolation,
            "expected exactly one protocol violation",
        );
        checks.expect(run.bodies.iter().all(|b| b.position.iter().all(|v| v.is_finite())), "non-finite body");

        Ok(Outcome {
            run: Some(run),
            checks,
            ..Outcome::default()
        })
    }

    /// DST-004: Churn - one node joins and one leaves before the run.
    async fn run_churn(&self, cluster: &mut SimCluster) -> Result<Outcome> {
        info!("DST-004: Churn - membership changes at the boundary");

        let initial = self.configure(cluster).await?;

        let joined = cluster.add_compute().await?;
        let leaving = cluster
            .compute(0)
            .map(|c| c.token.clone())
            .ok_or_else(|| StargazerError::validation("scenario needs compute node 0"))?;
        cluster.client(&leaving).unregister().await?;
        info!("  ↔ compute-{} joined, compute-0 left", joined);

        let run = cluster.operator().simulate(self.duration).await?;
        let error = Self::deviation(cluster, &initial, &run);
        let status = cluster.operator().status().await?;

        let mut checks = Checks::default();
        checks.expect(run.status == RunState::Completed, format!("status {:?}", run.status));
        checks.expect(run.degraded_events.is_empty(), "degraded events during churn");
        checks.expect(error <= ORACLE_TOLERANCE, format!("oracle deviation {:.3e}", error));
        checks.expect(status.nodes.len() == self.compute_nodes, "registry size after churn");
        checks.expect(
            cluster.compute(joined).map_or(false, |c| c.service.version().is_some()),
            "joined node was never configured",
        );

        Ok(Outcome {
            run: Some(run),
            checks,
            max_position_error: error,
        })
    }

    /// DST-005: Rejoin - a partitioned node heals and is admitted.
    async fn run_rejoin(&self, cluster: &SimCluster) -> Result<Outcome> {
        info!("DST-005: Rejoin - partition then heal");

        self.configure(cluster).await?;
        let lost = Self::node(cluster, 1)?;
        cluster.network.isolate(&lost);
        info!("  ⚡ {} partitioned", lost);

        let degraded = cluster.operator().simulate(self.duration).await?;

        cluster.network.heal(&lost);
        info!("  ✓ {} healed", lost);
        let run = cluster.operator().simulate(self.duration).await?;
        let status = cluster.operator().status().await?;

        let mut checks = Checks::default();
        checks.expect(
            degraded
                .degraded_events
                .first()
                .map_or(false, |e| e.kind == DegradedKind::TransportFailure),
            "partition did not degrade the first run",
        );
        checks.expect(run.status == RunState::Completed, format!("status {:?}", run.status));
        checks.expect(run.degraded_events.is_empty(), "healed node still degrading");
        checks.expect(status.nodes.iter().all(|n| n.healthy), "healed node not readmitted");

        Ok(Outcome {
            run: Some(run),
            checks,
            ..Outcome::default()
        })
    }

    /// DST-006: TotalOutage - no compute node is reachable.
    async fn run_total_outage(&self, cluster: &SimCluster) -> Result<Outcome> {
        info!("DST-006: TotalOutage - every compute node partitioned");

        let initial = self.configure(cluster).await?;
        for compute in cluster.computes() {
            cluster.network.isolate(&compute.endpoint);
        }

        let run = cluster.operator().simulate(self.duration).await?;
        let unchanged = Oracle::max_position_error(&run.bodies, &initial);

        let mut checks = Checks::default();
        checks.expect(run.status == RunState::Failed, format!("status {:?}", run.status));
        checks.expect(!run.success, "failed run reported success");
        checks.expect(run.steps_completed == 0, "steps completed without nodes");
        checks.expect(unchanged == 0.0, "bodies changed during outage");
        checks.expect(
            run.degraded_events.len() == cluster.computes().len(),
            "expected one event per node",
        );

        Ok(Outcome {
            run: Some(run),
            checks,
            ..Outcome::default()
        })
    }

    /// DST-007: Cancel - the operator cancels part-way through a long run.
    async fn run_cancel(&self, cluster: &SimCluster) -> Result<Outcome> {
        info!("DST-007: Cancel - cancellation at a boundary");

        self.configure(cluster).await?;
        for compute in cluster.computes() {
            cluster.network.set_latency(&compute.endpoint, 10);
        }

        let duration = cluster.config.constants.timestep * 50.0;
        let runner = cluster.operator();
        let canceller = cluster.operator();
        let cancel = async {
            cluster.context.sleep(Duration::from_millis(105)).await;
            canceller.cancel().await
        };
        let (run, cancelled) = join(runner.simulate(duration), cancel).await;
        let run = run?;
        cancelled?;

        let mut checks = Checks::default();
        checks.expect(run.status == RunState::Cancelled, format!("status {:?}", run.status));
        checks.expect(!run.success, "cancelled run reported success");
        checks.expect(
            run.steps_completed > 0 && run.steps_completed < run.steps_scheduled,
            format!("cancel landed at step {}/{}", run.steps_completed, run.steps_scheduled),
        );

        Ok(Outcome {
            run: Some(run),
            checks,
            ..Outcome::default()
        })
    }

    /// DST-008: TokenExpiry - create(user, +1h), then jump 1h01m.
    async fn run_token_expiry(&self, cluster: &SimCluster) -> Result<Outcome> {
        info!("DST-008: TokenExpiry - wall clock jump");

        let tokens = cluster.tokens();
        let token = tokens
            .create(TokenType::User, cluster.authority.now() + chrono::Duration::hours(1))
            .await?;

        let fresh = tokens.authenticate(&token).await?;
        let fresh_status = cluster.client(&token).status().await;

        cluster.context.advance_time(Duration::from_secs(61 * 60));
        info!("  ⏩ clock advanced 1h01m");

        let stale = tokens.authenticate(&token).await?;
        let stale_status = cluster.client(&token).status().await;

        let mut checks = Checks::default();
        checks.expect(fresh.valid && fresh.token_type == Some(TokenType::User), "fresh token invalid");
        checks.expect(fresh_status.is_ok(), "fresh token refused by manager");
        checks.expect(!stale.valid && stale.token_type.is_none(), "expired token still valid");
        checks.expect(
            matches!(stale_status, Err(StargazerError::Rejected { status: 401 })),
            "expired token accepted by manager",
        );

        Ok(Outcome {
            checks,
            ..Outcome::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn runner() -> ScenarioRunner {
        ScenarioRunner::new(42, 3).with_bodies(9).with_duration(0.05)
    }

    fn assert_passes(scenario: ScenarioId) -> ScenarioResult {
        let result = runner().run(scenario);
        assert!(result.passed, "{}: {:?}", scenario, result.failure_reason);
        result
    }

    #[test]
    fn test_baseline_matches_oracle() {
        let result = assert_passes(ScenarioId::Baseline);
        assert_eq!(result.steps_completed, 5);
        assert!(result.metrics.max_position_error <= ORACLE_TOLERANCE);
    }

    #[test]
    fn test_node_timeout_scenario() {
        let result = assert_passes(ScenarioId::NodeTimeout);
        assert_eq!(result.degraded_events, 1);
        // Every step waits out at least one deadline
        assert!(result.final_time_secs >= 5.0);
    }

    #[test]
    fn test_protocol_violation_scenario() {
        let result = assert_passes(ScenarioId::ProtocolViolation);
        assert!(result.metrics.corrupted > 0);
    }

    #[test]
    fn test_churn_scenario() {
        assert_passes(ScenarioId::Churn);
    }

    #[test]
    fn test_rejoin_scenario() {
        let result = assert_passes(ScenarioId::Rejoin);
        assert!(result.metrics.dropped > 0);
    }

    #[test]
    fn test_total_outage_scenario() {
        let result = assert_passes(ScenarioId::TotalOutage);
        assert_eq!(result.steps_completed, 0);
    }

    #[test]
    fn test_cancel_scenario() {
        assert_passes(ScenarioId::Cancel);
    }

    #[test]
    fn test_token_expiry_scenario() {
        assert_passes(ScenarioId::TokenExpiry);
    }

    #[test]
    fn test_same_seed_same_outcome() {
        let a = runner().run(ScenarioId::NodeTimeout);
        let b = runner().run(ScenarioId::NodeTimeout);
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_eq!(a.metrics.calls, b.metrics.calls);
        assert_eq!(a.final_time_secs, b.final_time_secs);
    }

    #[test]
    fn test_scenario_needing_missing_node_fails_cleanly() {
        let result = ScenarioRunner::new(42, 1).with_bodies(4).run(ScenarioId::NodeTimeout);
        assert!(!result.passed);
        assert!(result.failure_reason.is_some());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]

        #[test]
        fn prop_baseline_matches_oracle_for_any_shape(
            seed in any::<u64>(),
            nodes in 1usize..5,
            bodies in 1usize..13,
        ) {
            let result = ScenarioRunner::new(seed, nodes)
                .with_bodies(bodies)
                .with_duration(0.03)
                .run(ScenarioId::Baseline);
            prop_assert!(result.passed, "{:?}", result.failure_reason);
        }
    }
}
