//! Core environment context trait for the threat map client.

use async_trait::async_trait;
use std::future::Future;
use std::time::{Duration, SystemTime};

/// The central interface for Environment Interaction.
///
/// This trait abstracts the "real world" so that the refresh scheduler and
/// the render pipeline can run both against a live backend (tokio) and inside
/// the deterministic replay harness (virtual clock).
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time`
/// - **Simulation**: `SimContext` - manually advanced virtual clock
///
/// # Determinism
///
/// Everything that would normally introduce non-determinism (wall clock,
/// timers) goes through this trait, so a replay with the same seed produces
/// the same frames.
#[async_trait]
pub trait MapContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    ///
    /// Used for debounce deadlines and refresh bookkeeping.
    /// In simulation, this is the virtual clock time.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time.
    ///
    /// Used to classify cluster freshness against track timestamps.
    /// In simulation, this is derived from virtual clock + epoch offset.
    fn system_time(&self) -> SystemTime;

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances virtual clock
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task.
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// Returns the context's seed (for logging/debugging).
    ///
    /// In production, returns 0 (not seeded).
    /// In simulation, returns the master seed.
    fn seed(&self) -> u64;
}
