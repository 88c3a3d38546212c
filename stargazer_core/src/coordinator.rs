//! The simulation coordinator: the Manager's per-timestep loop.
//!
//! The coordinator owns the [`NodeRegistry`] and the [`BodyStore`]; nothing
//! else writes either. Each step runs as:
//!
//! ```text
//! boundary:  cancel? -> apply queued membership -> partition eligible nodes
//!    |
//!    +--> step calls (assign if range changed, then step)   } join_all,
//!    +--> probes (configure Unhealthy / unsynced nodes)     } each bounded
//!    |                                                        by call_timeout
//! merge:     validate each reply, write accepted ranges, demote offenders
//!    |
//! apply:     probe results (healed nodes join the NEXT partition)
//! ```

use futures::future::{join, join_all};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use stargazer_env::{Endpoint, NodeId, NodeTransport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::body::{Body, BodyStore, BodyUpdate, ConfigSnapshot, RunSetup};
use crate::client::ComputeClient;
use crate::config::CoordinatorConfig;
use crate::error::{Result, StargazerError};
use crate::partition::{self, IndexRange};
use crate::protocol::{self, ComputeConfigureRequest, NodeStatus, StepRequest, StepResponse};
use crate::registry::{NodeRegistry, RegistrationDesk};

// ============================================================================
// RUN TYPES
// ============================================================================

/// Lifecycle of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Configuring,
    Stepping,
    Completed,
    Failed,
    Cancelled,
}

/// Why a node's contribution to a step was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradedKind {
    /// No reply within the per-call deadline
    Timeout,
    /// Reply for the wrong range, wrong length, or non-finite values
    ProtocolViolation,
    /// The call failed in flight
    TransportFailure,
    /// The node answered with an error status
    Rejected,
}

/// A degraded-accuracy event: some indices kept their previous values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunEvent {
    /// Zero-based step index
    pub step: u64,
    pub node: NodeId,
    pub kind: DegradedKind,
    /// Indices that were not advanced, if the node held any
    pub range: Option<IndexRange>,
}

/// Outcome of a `simulate` call.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub status: RunState,
    pub steps_scheduled: u64,
    pub steps_completed: u64,
    /// Last fully merged authoritative list
    pub bodies: Vec<Body>,
    pub events: Vec<RunEvent>,
}

/// Receives the merged body list after every step.
pub trait StepObserver: Send + Sync {
    fn on_step(&self, step: u64, bodies: &[Body]);
}

/// Requests cancellation of the current run. Honored at the next boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Snapshot published at every boundary, readable without the coordinator.
#[derive(Debug, Clone)]
pub struct RunProgress {
    pub state: RunState,
    pub version: Option<u64>,
    pub body_count: usize,
    pub steps_scheduled: u64,
    pub steps_completed: u64,
    pub nodes: Vec<NodeStatus>,
}

impl Default for RunProgress {
    fn default() -> Self {
        Self {
            state: RunState::Idle,
            version: None,
            body_count: 0,
            steps_scheduled: 0,
            steps_completed: 0,
            nodes: Vec::new(),
        }
    }
}

// ============================================================================
// COORDINATOR
// ============================================================================

/// Drives configure and simulate against the registered Compute nodes.
pub struct SimulationCoordinator<Net: NodeTransport + ?Sized> {
    client: ComputeClient<Net>,
    desk: Arc<RegistrationDesk>,
    registry: NodeRegistry,
    store: BodyStore,
    snapshot: Option<ConfigSnapshot>,
    next_version: u64,
    runs: u64,
    config: CoordinatorConfig,
    cancel: CancelHandle,
    progress: Arc<RwLock<RunProgress>>,
    observer: Option<Arc<dyn StepObserver>>,
}

/// Outcome of one node's step call.
struct StepOutcome {
    node: NodeId,
    range: IndexRange,
    result: Result<StepResponse>,
}

impl<Net: NodeTransport + ?Sized> SimulationCoordinator<Net> {
    /// `manager_token` is presented on every call to a Compute node.
    pub fn new(
        transport: Arc<Net>,
        manager_token: impl Into<String>,
        desk: Arc<RegistrationDesk>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            client: ComputeClient::new(transport, manager_token),
            desk,
            registry: NodeRegistry::new(),
            store: BodyStore::new(),
            snapshot: None,
            next_version: 1,
            runs: 0,
            config,
            cancel: CancelHandle::default(),
            progress: Arc::new(RwLock::new(RunProgress::default())),
            observer: None,
        }
    }

    pub fn set_observer(&mut self, observer: Option<Arc<dyn StepObserver>>) {
        self.observer = observer;
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn progress(&self) -> Arc<RwLock<RunProgress>> {
        self.progress.clone()
    }

    pub fn desk(&self) -> Arc<RegistrationDesk> {
        self.desk.clone()
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn bodies(&self) -> &[Body] {
        self.store.as_slice()
    }

    pub fn snapshot(&self) -> Option<ConfigSnapshot> {
        self.snapshot
    }

    fn set_state(&self, state: RunState) {
        self.progress.write().state = state;
    }

    fn publish(&self, steps_scheduled: u64, steps_completed: u64) {
        let mut progress = self.progress.write();
        progress.version = self.snapshot.map(|s| s.version);
        progress.body_count = self.store.len();
        progress.steps_scheduled = steps_scheduled;
        progress.steps_completed = steps_completed;
        progress.nodes = self
            .registry
            .nodes()
            .iter()
            .map(|n| NodeStatus {
                id: n.id,
                endpoint: n.endpoint.clone(),
                healthy: n.is_healthy(),
                synced_version: n.synced_version,
                range: n.range,
            })
            .collect();
    }

    fn apply_membership(&mut self) {
        let (joined, left) = self.registry.apply(self.desk.drain());
        if joined + left > 0 {
            info!(joined, left, nodes = self.registry.len(), "Membership changed at boundary");
        }
    }

    fn timeout_error(&self) -> StargazerError {
        StargazerError::Timeout {
            timeout_ms: self.config.call_timeout.as_millis() as u64,
        }
    }

    /// Sends an encoded configuration to each target concurrently.
    async fn broadcast_configure(
        &self,
        targets: Vec<(NodeId, Endpoint)>,
        payload: &[u8],
    ) -> Vec<(NodeId, Result<()>)> {
        let deadline = self.config.call_timeout;
        let calls = targets.into_iter().map(|(id, endpoint)| {
            let payload = payload.to_vec();
            async move {
                let result = bounded(deadline, self.client.configure(&endpoint, payload))
                    .await
                    .unwrap_or_else(|| Err(self.timeout_error()));
                (id, result)
            }
        });
        join_all(calls).await
    }

    fn configure_payload(&self, version: u64) -> Result<Vec<u8>> {
        let snapshot = self
            .snapshot
            .ok_or_else(|| StargazerError::conflict("not configured"))?;
        protocol::encode(&ComputeConfigureRequest {
            version,
            constants: snapshot.config,
            bodies: self.store.to_vec(),
        })
    }

    /// Validates a run and pushes it to every Healthy node.
    ///
    /// Nodes that fail the broadcast are demoted. Fails Unavailable if no
    /// node accepted the configuration.
    pub async fn configure(&mut self, setup: RunSetup) -> Result<u64> {
        self.set_state(RunState::Configuring);
        self.apply_membership();

        let version = self.next_version;
        self.next_version += 1;
        let (config, bodies) = setup.into_parts();

        let payload = protocol::encode(&ComputeConfigureRequest {
            version,
            constants: config,
            bodies: bodies.clone(),
        })?;
        let targets: Vec<(NodeId, Endpoint)> = self
            .registry
            .nodes()
            .iter()
            .filter(|n| n.is_healthy())
            .map(|n| (n.id, n.endpoint.clone()))
            .collect();

        info!(version, bodies = bodies.len(), nodes = targets.len(), "Broadcasting configuration");

        for (id, result) in self.broadcast_configure(targets, &payload).await {
            match result {
                Ok(()) => self.registry.mark_synced(&id, version),
                Err(e) => {
                    warn!(node = %id, error = %e, "Configuration broadcast failed, demoting node");
                    self.registry.mark_unhealthy(&id);
                }
            }
        }

        if self.registry.eligible(version).is_empty() {
            self.snapshot = None;
            self.store.replace(Vec::new());
            self.set_state(RunState::Idle);
            self.publish(0, 0);
            return Err(StargazerError::unavailable("no healthy compute nodes"));
        }

        self.snapshot = Some(ConfigSnapshot { version, config });
        self.store.replace(bodies);
        self.set_state(RunState::Idle);
        self.publish(0, 0);
        Ok(version)
    }

    /// Configures nodes that are Unhealthy or not yet synced, and applies
    /// the outcome. Returns the number admitted.
    async fn admit(&mut self, version: u64) -> Result<usize> {
        let targets = self.registry.needing_probe(version);
        if targets.is_empty() {
            return Ok(0);
        }
        let payload = self.configure_payload(version)?;
        let results = self.broadcast_configure(targets, &payload).await;
        Ok(self.apply_probes(results, version))
    }

    fn apply_probes(&mut self, results: Vec<(NodeId, Result<()>)>, version: u64) -> usize {
        let mut admitted = 0;
        for (id, result) in results {
            match result {
                Ok(()) => {
                    self.registry.mark_synced(&id, version);
                    admitted += 1;
                }
                Err(e) => {
                    if self.registry.mark_unhealthy(&id) {
                        warn!(node = %id, error = %e, "Admission failed, node marked unhealthy");
                    } else {
                        debug!(node = %id, error = %e, "Node still unhealthy");
                    }
                }
            }
        }
        admitted
    }

    /// Checks a step reply against the range the node was given.
    fn validate_reply(range: IndexRange, reply: StepResponse) -> Result<Vec<BodyUpdate>> {
        if reply.range != range {
            return Err(StargazerError::protocol(format!(
                "expected range {}, got {}",
                range, reply.range
            )));
        }
        if reply.updated.len() != range.len() {
            return Err(StargazerError::protocol(format!(
                "expected {} updates, got {}",
                range.len(),
                reply.updated.len()
            )));
        }
        if !reply.updated.iter().all(BodyUpdate::is_finite) {
            return Err(StargazerError::protocol("non-finite update"));
        }
        Ok(reply.updated)
    }

    fn classify(err: &StargazerError) -> DegradedKind {
        match err {
            StargazerError::Timeout { .. } => DegradedKind::Timeout,
            StargazerError::Protocol(_) => DegradedKind::ProtocolViolation,
            StargazerError::Rejected { .. } => DegradedKind::Rejected,
            _ => DegradedKind::TransportFailure,
        }
    }

    /// Runs `round(duration / timestep)` steps.
    ///
    /// Node failures degrade the run but only end it when no eligible node
    /// remains (Failed). Cancellation ends it at the next boundary.
    pub async fn simulate(&mut self, duration: f64) -> Result<RunReport> {
        let snapshot = self
            .snapshot
            .ok_or_else(|| StargazerError::conflict("not configured"))?;
        let version = snapshot.version;
        let steps_scheduled = snapshot.config.steps_for(duration)?;

        self.runs += 1;
        let run_id = Uuid::from_u64_pair(version, self.runs);
        self.cancel.reset();
        self.set_state(RunState::Stepping);

        info!(%run_id, version, steps = steps_scheduled, "Starting run");

        // Nodes registered since configure take part from step one
        self.apply_membership();
        self.admit(version).await?;
        self.publish(steps_scheduled, 0);

        let mut events = Vec::new();
        let mut steps_completed = 0;
        let mut status = RunState::Completed;

        for step in 0..steps_scheduled {
            if self.cancel.is_cancelled() {
                info!(%run_id, step, "Run cancelled at boundary");
                status = RunState::Cancelled;
                break;
            }
            self.apply_membership();

            // An empty eligible set fails partitioning and ends the run here
            let eligible = self.registry.eligible(version);
            match self.run_step(step, version, &eligible, &mut events).await {
                Ok(true) => steps_completed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(%run_id, step, error = %e, "Step could not be dispatched, failing run");
                    status = RunState::Failed;
                    break;
                }
            }

            if let Some(observer) = &self.observer {
                observer.on_step(step, self.store.as_slice());
            }
            self.publish(steps_scheduled, steps_completed);

            if self.registry.eligible(version).is_empty() {
                warn!(%run_id, step, "No healthy compute nodes left");
                status = RunState::Failed;
                break;
            }
        }

        self.registry.clear_ranges();
        self.set_state(status);
        self.publish(steps_scheduled, steps_completed);

        info!(
            %run_id,
            status = ?status,
            steps_completed,
            steps_scheduled,
            degraded = events.len(),
            "Run finished"
        );

        Ok(RunReport {
            run_id,
            status,
            steps_scheduled,
            steps_completed,
            bodies: self.store.to_vec(),
            events,
        })
    }

    /// One scatter/gather round. Returns true if any range was merged.
    async fn run_step(
        &mut self,
        step: u64,
        version: u64,
        eligible: &[NodeId],
        events: &mut Vec<RunEvent>,
    ) -> Result<bool> {
        let plan = partition::assign(eligible, self.store.len())?;

        let step_payload = protocol::encode(&StepRequest {
            version,
            bodies: self.store.to_vec(),
        })?;
        let probes = self.registry.needing_probe(version);
        let probe_payload = if probes.is_empty() {
            Vec::new()
        } else {
            self.configure_payload(version)?
        };

        let deadline = self.config.call_timeout;
        let calls: Vec<_> = plan
            .active()
            .filter_map(|(id, range)| {
                let node = self.registry.get(id)?;
                let needs_assign = node.range != Some(*range);
                Some((*id, *range, node.endpoint.clone(), needs_assign))
            })
            .collect();

        for (id, range) in plan.assignments() {
            self.registry.set_range(id, *range);
        }

        let this = &*self;
        let step_calls = calls.into_iter().map(|(node, range, endpoint, needs_assign)| {
            let payload = step_payload.clone();
            async move {
                let call = async {
                    if needs_assign {
                        this.client.assign(&endpoint, version, range).await?;
                    }
                    this.client.step(&endpoint, payload).await
                };
                let result = bounded(deadline, call)
                    .await
                    .unwrap_or_else(|| Err(this.timeout_error()));
                StepOutcome { node, range, result }
            }
        });

        let (outcomes, probe_results) = join(
            join_all(step_calls),
            this.broadcast_configure(probes, &probe_payload),
        )
        .await;

        // Merge
        let mut merged = false;
        for outcome in outcomes {
            let StepOutcome { node, range, result } = outcome;
            match result.and_then(|reply| Self::validate_reply(range, reply)) {
                Ok(updates) => {
                    self.store.merge(range.as_range(), &updates);
                    merged = true;
                }
                Err(e) => {
                    let kind = Self::classify(&e);
                    warn!(step, node = %node, range = %range, kind = ?kind, error = %e, "Dropping node reply");
                    self.registry.mark_unhealthy(&node);
                    events.push(RunEvent {
                        step,
                        node,
                        kind,
                        range: Some(range),
                    });
                }
            }
        }

        // Healed nodes join the next partition
        let admitted = self.apply_probes(probe_results, version);
        if admitted > 0 {
            info!(step, admitted, "Nodes admitted for next step");
        }

        debug!(step, nodes = plan.len(), merged, "Step settled");
        Ok(merged)
    }
}

/// Runs `fut` with a deadline. `None` means it did not finish in time.
async fn bounded<F: std::future::Future>(deadline: Duration, fut: F) -> Option<F::Output> {
    tokio::time::timeout(deadline, fut).await.ok()
}
