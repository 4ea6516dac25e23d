//! Transport abstractions between the client core and the alarm backend.

use async_trait::async_trait;
use crate::error::EnvError;
use crate::types::{FeedQuery, IconBytes, LocateResponse, PushSignal, RawPayload};

/// Abstraction for the backend feed.
///
/// # Implementations
///
/// - **Production**: `HttpFeedSource` - `GET /data`, `GET /locate`, SSE `GET /stream`
/// - **Simulation**: scripted transport with injected failures and pushes
///
/// # Push Flow
///
/// ```text
/// Backend                 FeedSource                 RefreshScheduler
///   |                         |                             |
///   |-- SSE data: {...} ----->|                             |
///   |                         |-- next_push() -> signal --->|
///   |                         |<------- fetch(query) -------|
///   |<-------- GET /data -----|                             |
/// ```
#[async_trait]
pub trait FeedSource: Send + Sync + 'static {
    /// Fetches the current feed snapshot.
    ///
    /// # Returns
    /// * `Ok(RawPayload)` - decoded JSON body, not yet normalized
    /// * `Err(EnvError)` - transport or decode failure; the caller keeps
    ///   the previous snapshot
    async fn fetch(&self, query: &FeedQuery) -> Result<RawPayload, EnvError>;

    /// Waits for the next push message.
    ///
    /// # Returns
    /// * `Some(signal)` - a push arrived
    /// * `None` - the push channel is closed (no more pushes will come)
    async fn next_push(&self) -> Option<PushSignal>;

    /// Resolves a place name via `GET /locate?q=`.
    async fn locate(&self, query: &str) -> Result<LocateResponse, EnvError>;
}

/// Abstraction for fetching icon images by URL.
#[async_trait]
pub trait IconFetcher: Send + Sync + 'static {
    /// Fetches the raw bytes behind an icon URL.
    ///
    /// Failure is never fatal to rendering; callers fall back to the
    /// default icon.
    async fn fetch_icon(&self, url: &str) -> Result<IconBytes, EnvError>;
}
