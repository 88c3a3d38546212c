//! Simulated network transport with fault injection.
//!
//! Wraps the in-process router. Faults are keyed by destination endpoint:
//! every call to an isolated endpoint fails in flight, every call to a slow
//! endpoint waits out its latency first, and replies from a corrupting
//! endpoint are garbled with the configured probability.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use stargazer_core::router::LocalRouter;
use stargazer_env::{EnvError, Endpoint, NetworkController, NodeTransport, RequestEnvelope, ResponseEnvelope};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Reply body substituted for corrupted responses.
const GARBLED: &[u8] = b"\x00\x13garbled";

#[derive(Debug, Default)]
struct LinkFaults {
    isolated: HashSet<Endpoint>,
    latency_ms: HashMap<Endpoint, u64>,
    corruption: HashMap<Endpoint, f64>,
}

/// Counters collected during a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkStats {
    pub calls: u64,
    pub dropped: u64,
    pub corrupted: u64,
}

/// The simulated network shared by every service in a cluster.
pub struct SimNetwork {
    router: Arc<LocalRouter>,
    faults: Mutex<LinkFaults>,

    /// RNG for corruption draws (separate from the context's token RNG)
    rng: Mutex<ChaCha8Rng>,

    calls: AtomicU64,
    dropped: AtomicU64,
    corrupted: AtomicU64,
}

impl SimNetwork {
    pub fn new(router: Arc<LocalRouter>, seed: u64) -> Self {
        Self {
            router,
            faults: Mutex::new(LinkFaults::default()),
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
            calls: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            corrupted: AtomicU64::new(0),
        }
    }

    pub fn shared(router: Arc<LocalRouter>, seed: u64) -> Arc<Self> {
        Arc::new(Self::new(router, seed))
    }

    /// Reconnects a single endpoint.
    pub fn heal(&self, endpoint: &Endpoint) {
        self.faults.lock().isolated.remove(endpoint);
    }

    /// Checks if calls to `endpoint` currently get through.
    pub fn is_reachable(&self, endpoint: &Endpoint) -> bool {
        !self.faults.lock().isolated.contains(endpoint)
    }

    /// Gets the latency for an endpoint (default 0).
    pub fn latency(&self, endpoint: &Endpoint) -> u64 {
        self.faults.lock().latency_ms.get(endpoint).copied().unwrap_or(0)
    }

    /// Clears every fault on every endpoint.
    pub fn reset(&self) {
        *self.faults.lock() = LinkFaults::default();
    }

    pub fn stats(&self) -> NetworkStats {
        NetworkStats {
            calls: self.calls.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            corrupted: self.corrupted.load(Ordering::Relaxed),
        }
    }

    fn should_corrupt(&self, endpoint: &Endpoint) -> bool {
        let rate = self.faults.lock().corruption.get(endpoint).copied().unwrap_or(0.0);
        rate > 0.0 && self.rng.lock().gen_bool(rate)
    }
}

#[async_trait]
impl NodeTransport for SimNetwork {
    async fn call(
        &self,
        endpoint: &Endpoint,
        request: RequestEnvelope,
    ) -> Result<ResponseEnvelope, EnvError> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        let latency = self.latency(endpoint);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if !self.is_reachable(endpoint) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            trace!(endpoint = %endpoint, route = %request.route, "Dropped by partition");
            return Err(EnvError::network(format!("{} is partitioned", endpoint)));
        }

        let mut response = self.router.call(endpoint, request).await?;

        if self.should_corrupt(endpoint) {
            self.corrupted.fetch_add(1, Ordering::Relaxed);
            response.payload = GARBLED.to_vec();
        }
        Ok(response)
    }
}

impl NetworkController for SimNetwork {
    fn isolate(&self, endpoint: &Endpoint) {
        self.faults.lock().isolated.insert(endpoint.clone());
    }

    fn heal_all(&self) {
        self.faults.lock().isolated.clear();
    }

    fn set_latency(&self, endpoint: &Endpoint, latency_ms: u64) {
        self.faults.lock().latency_ms.insert(endpoint.clone(), latency_ms);
    }

    fn set_corruption(&self, endpoint: &Endpoint, rate: f64) {
        self.faults
            .lock()
            .corruption
            .insert(endpoint.clone(), rate.clamp(0.0, 1.0));
    }
}
