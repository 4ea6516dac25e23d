//! Simulation context implementing MapContext for deterministic replays.

use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use threatmap_env::MapContext;

/// Wall-clock time at virtual time zero: 2024-01-01 00:00:00 UTC.
pub const SIM_EPOCH_SECS: u64 = 1_704_067_200;

/// Simulation context backed by a virtual clock and a seeded RNG.
///
/// This implements `MapContext` using:
/// - A virtual clock that only moves when advanced (or slept on)
/// - A seeded ChaCha8 RNG for fetch latency jitter
/// - A fixed epoch so `system_time` is reproducible
pub struct SimContext {
    /// Master seed for this replay
    seed: u64,

    /// Current virtual time (nanoseconds since replay start)
    virtual_time_ns: Arc<Mutex<u64>>,

    /// Deterministic RNG for latency jitter
    rng: Arc<Mutex<ChaCha8Rng>>,

    /// Virtual time 0 maps to this wall-clock time
    epoch: SystemTime,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimContext {
    /// Creates a new SimContext with the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            virtual_time_ns: Arc::new(Mutex::new(0)),
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
            epoch: UNIX_EPOCH + Duration::from_secs(SIM_EPOCH_SECS),
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    /// Advances virtual time by the given duration.
    pub fn advance_time(&self, duration: Duration) {
        let mut time = lock(&self.virtual_time_ns);
        *time = time.saturating_add(duration.as_nanos() as u64);
    }

    /// Sets the virtual time to a specific value.
    pub fn set_time(&self, time_ns: u64) {
        *lock(&self.virtual_time_ns) = time_ns;
    }

    /// Returns the current virtual time in nanoseconds.
    pub fn time_ns(&self) -> u64 {
        *lock(&self.virtual_time_ns)
    }

    /// Wall-clock time in unix seconds.
    pub fn unix_secs(&self) -> i64 {
        (SIM_EPOCH_SECS + self.time_ns() / 1_000_000_000) as i64
    }

    /// Derives an independent sub-seed, e.g. for the feed generator.
    pub fn derive_seed(&self, extension: u64) -> u64 {
        self.seed.wrapping_mul(0x517cc1b727220a95) ^ extension
    }

    /// Random latency in `[min_ms, max_ms]`.
    pub fn jitter(&self, min_ms: u64, max_ms: u64) -> Duration {
        let ms = if max_ms > min_ms {
            lock(&self.rng).gen_range(min_ms..=max_ms)
        } else {
            min_ms
        };
        Duration::from_millis(ms)
    }
}

impl Clone for SimContext {
    fn clone(&self) -> Self {
        Self {
            seed: self.seed,
            virtual_time_ns: Arc::clone(&self.virtual_time_ns),
            rng: Arc::clone(&self.rng),
            epoch: self.epoch,
        }
    }
}

#[async_trait]
impl MapContext for SimContext {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.time_ns())
    }

    fn system_time(&self) -> SystemTime {
        self.epoch + self.now()
    }

    async fn sleep(&self, duration: Duration) {
        // Sleeping jumps the clock; yield so spawned fetches get to run
        self.advance_time(duration);
        tokio::task::yield_now().await;
    }

    fn spawn<F>(&self, _name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(future);
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}
