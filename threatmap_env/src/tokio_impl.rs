//! Live map context on the tokio runtime.

use crate::MapContext;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::Instant;
use tracing::Instrument;

/// Context used by the apps and the `--live` CLI mode.
///
/// Monotonic time is read from the tokio clock, not `std::time`, so a
/// runtime started with `start_paused = true` fast-forwards the refresh
/// interval and the zoom debounce.
pub struct TokioContext {
    /// Tokio instant of context creation
    created: Instant,
}

impl TokioContext {
    pub fn new() -> Self {
        Self { created: Instant::now() }
    }

    /// Shared handle for the scheduler and its spawned fetches.
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
impl MapContext for TokioContext {
    fn now(&self) -> Duration {
        self.created.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn spawn<F>(&self, name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        // Fetch and icon tasks log under the name they were spawned with
        tokio::spawn(future.instrument(tracing::debug_span!("task", name)));
    }

    fn seed(&self) -> u64 {
        0
    }
}
