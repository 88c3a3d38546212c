//! Core environment context trait for Stargazer services.

use async_trait::async_trait;
use std::time::{Duration, SystemTime};

/// The central interface for Environment Interaction.
///
/// This trait abstracts the "real world" so that the Auth, Manager and
/// Compute services can run in both production (tokio) and simulation
/// (virtual clock) environments.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time`, `OsRng`
/// - **Simulation**: `SimContext` - virtual clock, `ChaCha8Rng(seed)`
///
/// # Determinism
///
/// For DST, all methods that would normally introduce non-determinism
/// (time, randomness) are controlled by the implementation.
#[async_trait]
pub trait StargazerContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    ///
    /// In simulation, this is the virtual clock time.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time.
    ///
    /// Token creation and expiry instants are taken from here, so a
    /// simulation can expire tokens by advancing its virtual clock.
    fn system_time(&self) -> SystemTime;

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances virtual clock
    async fn sleep(&self, duration: Duration);

    /// Fills `dest` with high-entropy random bytes.
    ///
    /// Token secrets are drawn from here. Production uses the OS CSPRNG;
    /// simulation derives the bytes from the master seed so runs replay.
    fn fill_random(&self, dest: &mut [u8]);

    /// Returns the context's seed (for logging/debugging).
    ///
    /// In production, returns 0 (not seeded).
    /// In simulation, returns the master seed.
    fn seed(&self) -> u64;
}
