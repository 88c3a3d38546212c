//! Production implementation of StargazerContext using Tokio.

use crate::StargazerContext;
use async_trait::async_trait;
use rand::RngCore;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// Production context backed by Tokio and OS entropy.
///
/// This is the "real" implementation used in production deployments.
/// Time comes from the system clock, randomness from OsRng.
pub struct TokioContext {
    /// Start time for monotonic duration calculations
    start: Instant,
}

impl TokioContext {
    /// Creates a new TokioContext.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Creates an Arc-wrapped context for sharing across tasks.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for TokioContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StargazerContext for TokioContext {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn fill_random(&self, dest: &mut [u8]) {
        use rand::rngs::OsRng;
        OsRng.fill_bytes(dest);
    }

    fn seed(&self) -> u64 {
        // Production is not seeded
        0
    }
}
