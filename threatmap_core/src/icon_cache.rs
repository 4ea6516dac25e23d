//! Scoped icon cache.
//!
//! Owned by the renderer that uses it and dropped with it. Each URL is
//! fetched at most once: concurrent requests for the same URL wait on the
//! same in-flight fetch, and failures are remembered as [`IconImage::Fallback`]
//! so a broken URL is not retried on every frame.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use threatmap_env::{IconBytes, IconFetcher};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// A cached icon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IconImage {
    Loaded(Arc<IconBytes>),
    /// Draw the default icon instead
    Fallback,
}

impl IconImage {
    pub fn is_loaded(&self) -> bool {
        matches!(self, IconImage::Loaded(_))
    }
}

type Slot = Arc<OnceCell<IconImage>>;

/// URL-keyed icon cache with per-key fetch coalescing.
pub struct IconCache<F: IconFetcher> {
    fetcher: Arc<F>,
    slots: Mutex<HashMap<String, Slot>>,

    /// Fetches actually issued to the fetcher
    fetches: AtomicUsize,

    closed: AtomicBool,
}

impl<F: IconFetcher> IconCache<F> {
    pub fn new(fetcher: Arc<F>) -> Self {
        Self {
            fetcher,
            slots: Mutex::new(HashMap::new()),
            fetches: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the icon for `url`, fetching it on first use.
    ///
    /// Never fails. Once the cache is closed every lookup yields
    /// `Fallback` and fetches that complete afterwards are discarded.
    pub async fn get(&self, url: &str) -> IconImage {
        if self.is_closed() {
            return IconImage::Fallback;
        }
        let slot = Arc::clone(self.slots().entry(url.to_string()).or_default());

        let image = slot
            .get_or_init(|| async {
                self.fetches.fetch_add(1, Ordering::SeqCst);
                match self.fetcher.fetch_icon(url).await {
                    Ok(bytes) => {
                        debug!(url, bytes = bytes.size(), "icon loaded");
                        IconImage::Loaded(Arc::new(bytes))
                    }
                    Err(e) => {
                        warn!(url, error = %e, "icon fetch failed, using default");
                        IconImage::Fallback
                    }
                }
            })
            .await
            .clone();

        if self.is_closed() {
            IconImage::Fallback
        } else {
            image
        }
    }

    /// Non-blocking lookup for the draw path.
    ///
    /// Returns `Fallback` until the icon has finished loading.
    pub fn peek(&self, url: &str) -> IconImage {
        self.slots()
            .get(url)
            .and_then(|slot| slot.get().cloned())
            .unwrap_or(IconImage::Fallback)
    }

    /// Returns true if a fetch for `url` has completed (successfully or not).
    pub fn is_resolved(&self, url: &str) -> bool {
        self.slots().get(url).map_or(false, |slot| slot.initialized())
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets everything, including negative results.
    pub fn clear(&self) {
        self.slots().clear();
    }

    /// Tears the cache down.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;
    use threatmap_env::EnvError;

    /// Serves icons whose URL ends in `.png`; everything else is 404.
    struct SlowFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl IconFetcher for SlowFetcher {
        async fn fetch_icon(&self, url: &str) -> Result<IconBytes, EnvError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            if url.ends_with(".png") {
                Ok(IconBytes {
                    data: vec![0x89, b'P', b'N', b'G'],
                    content_type: Some("image/png".into()),
                })
            } else {
                Err(EnvError::NotFound(url.to_string()))
            }
        }
    }

    fn cache() -> (Arc<SlowFetcher>, IconCache<SlowFetcher>) {
        let fetcher = Arc::new(SlowFetcher {
            calls: AtomicUsize::new(0),
        });
        (Arc::clone(&fetcher), IconCache::new(fetcher))
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_gets_coalesce() {
        let (fetcher, cache) = cache();
        let url = "https://neptun.in.ua/static/shahed.png";

        let (a, b, c) = tokio::join!(cache.get(url), cache.get(url), cache.get(url));
        assert!(a.is_loaded());
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.fetch_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_negative_cached() {
        let (fetcher, cache) = cache();
        let url = "https://neptun.in.ua/static/unknown_xyz";

        assert_eq!(cache.get(url).await, IconImage::Fallback);
        assert_eq!(cache.get(url).await, IconImage::Fallback);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert!(cache.is_resolved(url));

        // Clearing allows a retry
        cache.clear();
        cache.get(url).await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_peek_never_blocks() {
        let (_, cache) = cache();
        let url = "https://neptun.in.ua/static/kab.png";

        assert_eq!(cache.peek(url), IconImage::Fallback);
        cache.get(url).await;
        assert!(cache.peek(url).is_loaded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_cache_discards() {
        let (fetcher, cache) = cache();
        cache.close();
        assert_eq!(cache.get("https://x/a.png").await, IconImage::Fallback);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
        assert!(cache.is_empty());
    }
}
