//! Scripted backend transport with fault injection.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use threatmap_core::GeoPoint;
use threatmap_env::{
    EnvError, FeedQuery, FeedSource, IconBytes, IconFetcher, LocateResponse, LocateStatus, PushSignal, RawPayload,
};
use tokio::sync::mpsc;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory backend for replays and tests.
///
/// Serves whatever body was last published, unless failures were queued
/// with [`fail_next`](ScriptedFeed::fail_next). Push signals are delivered
/// in order through [`FeedSource::next_push`].
pub struct ScriptedFeed {
    body: Mutex<Value>,
    failures: Mutex<VecDeque<EnvError>>,
    places: Mutex<BTreeMap<String, GeoPoint>>,
    missing_icons: Mutex<BTreeSet<String>>,

    push_tx: Mutex<Option<mpsc::UnboundedSender<PushSignal>>>,
    push_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<PushSignal>>,

    fetches: AtomicU64,
    icon_fetches: AtomicU64,
}

impl ScriptedFeed {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            body: Mutex::new(serde_json::json!({ "tracks": [] })),
            failures: Mutex::new(VecDeque::new()),
            places: Mutex::new(BTreeMap::new()),
            missing_icons: Mutex::new(BTreeSet::new()),
            push_tx: Mutex::new(Some(tx)),
            push_rx: tokio::sync::Mutex::new(rx),
            fetches: AtomicU64::new(0),
            icon_fetches: AtomicU64::new(0),
        }
    }

    /// Replaces the body served by `/data`.
    pub fn publish(&self, body: Value) {
        *lock(&self.body) = body;
    }

    /// The next `n` fetches fail with a copy of `error`.
    pub fn fail_next(&self, n: usize, error: impl Fn() -> EnvError) {
        let mut failures = lock(&self.failures);
        for _ in 0..n {
            failures.push_back(error());
        }
    }

    pub fn pending_failures(&self) -> usize {
        lock(&self.failures).len()
    }

    /// Queues a push message. Ignored after [`close_push`](Self::close_push).
    pub fn push(&self, payload: Value) {
        if let Some(tx) = lock(&self.push_tx).as_ref() {
            let _ = tx.send(PushSignal::from_payload(payload));
        }
    }

    /// Closes the push stream; `next_push` drains and then returns `None`.
    pub fn close_push(&self) {
        lock(&self.push_tx).take();
    }

    /// Registers a place name for `/locate`.
    pub fn add_place(&self, name: &str, position: GeoPoint) {
        lock(&self.places).insert(name.to_lowercase(), position);
    }

    /// Makes icon URLs ending in `suffix` answer 404.
    pub fn remove_icon(&self, suffix: &str) {
        lock(&self.missing_icons).insert(suffix.to_string());
    }

    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn icon_fetch_count(&self) -> u64 {
        self.icon_fetches.load(Ordering::SeqCst)
    }

    /// Synchronous `/data`: next queued failure, or the current body.
    pub fn serve(&self) -> Result<RawPayload, EnvError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = lock(&self.failures).pop_front() {
            return Err(err);
        }
        Ok(RawPayload::new(lock(&self.body).clone()))
    }

    /// Synchronous `/locate`: exact name, else names containing the query.
    pub fn resolve(&self, query: &str) -> LocateResponse {
        let places = lock(&self.places);
        let key = query.trim().to_lowercase();
        if let Some(p) = places.get(&key) {
            return LocateResponse {
                status: LocateStatus::Ok,
                lat: Some(p.lat),
                lng: Some(p.lon),
                matches: Vec::new(),
            };
        }
        let matches: Vec<String> = places.keys().filter(|name| name.contains(&key)).cloned().collect();
        LocateResponse {
            status: if matches.is_empty() { LocateStatus::NotFound } else { LocateStatus::Suggest },
            lat: None,
            lng: None,
            matches,
        }
    }
}

impl Default for ScriptedFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeedSource for ScriptedFeed {
    async fn fetch(&self, _query: &FeedQuery) -> Result<RawPayload, EnvError> {
        self.serve()
    }

    async fn next_push(&self) -> Option<PushSignal> {
        self.push_rx.lock().await.recv().await
    }

    async fn locate(&self, query: &str) -> Result<LocateResponse, EnvError> {
        Ok(self.resolve(query))
    }
}

#[async_trait]
impl IconFetcher for ScriptedFeed {
    async fn fetch_icon(&self, url: &str) -> Result<IconBytes, EnvError> {
        self.icon_fetches.fetch_add(1, Ordering::SeqCst);
        if lock(&self.missing_icons).iter().any(|s| url.ends_with(s.as_str())) {
            return Err(EnvError::NotFound(url.to_string()));
        }
        Ok(IconBytes {
            data: url.as_bytes().to_vec(),
            content_type: Some("image/png".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use threatmap_env::PushKind;

    #[tokio::test]
    async fn test_fetch_serves_body_and_failures() {
        let feed = ScriptedFeed::new();
        feed.publish(json!({"tracks": [{"id": "a"}]}));
        feed.fail_next(2, || EnvError::Timeout(5_000));

        let query = FeedQuery::default();
        assert!(matches!(feed.fetch(&query).await, Err(EnvError::Timeout(5_000))));
        assert!(feed.fetch(&query).await.is_err());
        let ok = feed.fetch(&query).await.unwrap();
        assert_eq!(ok.body["tracks"][0]["id"], "a");
        assert_eq!(feed.fetch_count(), 3);
        assert_eq!(feed.pending_failures(), 0);
    }

    #[tokio::test]
    async fn test_push_order_and_close() {
        let feed = ScriptedFeed::new();
        feed.push(json!({"tracks": [{"id": 1}, {"id": 2}]}));
        feed.push(json!({"event": {"id": "e"}}));
        feed.close_push();
        feed.push(json!({"tracks": [{"id": 3}]}));

        assert_eq!(feed.next_push().await.unwrap().kind, PushKind::Tracks(2));
        assert_eq!(feed.next_push().await.unwrap().kind, PushKind::Event);
        assert!(feed.next_push().await.is_none());
    }

    #[tokio::test]
    async fn test_locate_and_icons() {
        let feed = ScriptedFeed::new();
        feed.add_place("Харків", GeoPoint::new(49.99, 36.23));
        feed.add_place("Харківка", GeoPoint::new(48.0, 33.0));

        let exact = feed.locate("харків").await.unwrap();
        assert_eq!(exact.status, LocateStatus::Ok);
        assert_eq!(exact.lat, Some(49.99));

        let partial = feed.locate("харк").await.unwrap();
        assert_eq!(partial.status, LocateStatus::Suggest);
        assert_eq!(partial.matches.len(), 2);

        assert_eq!(feed.locate("львів").await.unwrap().status, LocateStatus::NotFound);

        feed.remove_icon("raketa.png");
        assert!(feed.fetch_icon("https://x/static/shahed.png").await.is_ok());
        assert!(matches!(
            feed.fetch_icon("https://x/static/raketa.png").await,
            Err(EnvError::NotFound(_))
        ));
        assert_eq!(feed.icon_fetch_count(), 2);
    }
}
