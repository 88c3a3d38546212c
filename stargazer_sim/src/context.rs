//! Simulation context implementing StargazerContext for deterministic testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use stargazer_env::StargazerContext;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

/// Simulation context backed by deterministic time and RNG.
///
/// This implements `StargazerContext` using:
/// - The tokio clock, which the runner starts paused, so sleeps and call
///   deadlines complete in virtual time
/// - A skew that scenarios add to jump the wall clock (token expiry)
/// - A seeded ChaCha8 RNG for token secrets
pub struct SimContext {
    /// Master seed for this simulation
    seed: u64,

    /// Virtual time 0
    origin: Instant,

    /// Jumps applied on top of the tokio clock (nanoseconds)
    skew_ns: Arc<AtomicU64>,

    /// Deterministic RNG for token secrets
    rng: Arc<Mutex<ChaCha8Rng>>,

    /// Epoch offset (virtual time 0 maps to this wall-clock time)
    epoch: SystemTime,
}

impl SimContext {
    /// Creates a new SimContext with the given seed.
    ///
    /// Call from inside the simulation runtime so the origin is taken from
    /// its paused clock.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            origin: Instant::now(),
            skew_ns: Arc::new(AtomicU64::new(0)),
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
            epoch: UNIX_EPOCH + Duration::from_secs(1704067200), // 2024-01-01 00:00:00 UTC
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    /// Jumps the clock forward without waking sleepers.
    pub fn advance_time(&self, duration: Duration) {
        self.skew_ns.fetch_add(duration.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Clone for SimContext {
    fn clone(&self) -> Self {
        Self {
            seed: self.seed,
            origin: self.origin,
            skew_ns: Arc::clone(&self.skew_ns),
            rng: Arc::clone(&self.rng),
            epoch: self.epoch,
        }
    }
}

#[async_trait]
impl StargazerContext for SimContext {
    fn now(&self) -> Duration {
        self.origin.elapsed() + Duration::from_nanos(self.skew_ns.load(Ordering::SeqCst))
    }

    fn system_time(&self) -> SystemTime {
        self.epoch + self.now()
    }

    async fn sleep(&self, duration: Duration) {
        // Paused clock: auto-advances once every task is idle
        tokio::time::sleep(duration).await;
    }

    fn fill_random(&self, dest: &mut [u8]) {
        self.rng.lock().fill_bytes(dest);
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sim_context_time() {
        let ctx = SimContext::new(42);
        assert_eq!(ctx.now(), Duration::ZERO);

        ctx.sleep(Duration::from_secs(1)).await;
        assert_eq!(ctx.now(), Duration::from_secs(1));

        ctx.advance_time(Duration::from_millis(500));
        assert_eq!(ctx.now(), Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sim_context_wall_clock_follows_jumps() {
        let ctx = SimContext::new(42);
        let before = ctx.system_time();
        ctx.advance_time(Duration::from_secs(3660));
        let elapsed = ctx.system_time().duration_since(before).unwrap();
        assert_eq!(elapsed, Duration::from_secs(3660));
    }

    #[test]
    fn test_sim_context_deterministic_random() {
        let ctx1 = SimContext::new(42);
        let ctx2 = SimContext::new(42);

        let mut a = [0u8; 24];
        let mut b = [0u8; 24];
        ctx1.fill_random(&mut a);
        ctx2.fill_random(&mut b);

        // Same seed = same secrets
        assert_eq!(a, b);

        // Next draw differs
        ctx1.fill_random(&mut b);
        assert_ne!(a, b);
    }

    #[test]
    fn test_sim_context_seed() {
        let ctx = SimContext::new(12345);
        assert_eq!(ctx.seed(), 12345);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sim_context_clone_shares_time() {
        let ctx1 = SimContext::new(42);
        let ctx2 = ctx1.clone();

        ctx1.advance_time(Duration::from_secs(5));

        // Both should see the same time
        assert_eq!(ctx1.now(), ctx2.now());
    }
}
