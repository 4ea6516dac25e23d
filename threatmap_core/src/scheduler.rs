//! Refresh scheduler.
//!
//! One cancellable loop per map view:
//! 1. re-fetch the feed every `refresh_interval_ms`
//! 2. on success swap the snapshot and re-render
//! 3. on failure keep the previous snapshot and surface a dismissible error
//! 4. re-fetch immediately when a push announces new data
//! 5. re-render (no fetch) when the zoom settles after `zoom_debounce_ms`
//!
//! The timing rules live in [`RefreshCycle`], a sans-IO state machine that
//! is driven with explicit timestamps. [`RefreshScheduler`] runs it against
//! a [`MapContext`] and a [`FeedSource`].

use crate::feed::FeedNormalizer;
use crate::render::{MapRenderer, RenderFrame, TrackSnapshot};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use threatmap_env::{EnvError, FeedQuery, FeedSource, IconFetcher, MapContext, PushSignal, RawPayload};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Zoom changes smaller than this are the same zoom.
const ZOOM_EPSILON: f64 = 1e-6;

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Poll interval (default: 10 s; the iOS client uses 60 s)
    pub refresh_interval_ms: u64,

    /// Quiet time before a zoom change re-renders (default: 180 ms)
    pub zoom_debounce_ms: u64,

    /// Zoom before the first user interaction
    pub initial_zoom: f64,

    /// Parameters sent with every `/data` request
    pub query: FeedQuery,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 10_000,
            zoom_debounce_ms: 180,
            initial_zoom: 6.0,
            query: FeedQuery::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn zoom_debounce(&self) -> Duration {
        Duration::from_millis(self.zoom_debounce_ms)
    }
}

/// Timing state machine.
///
/// At most one fetch is in flight; triggers that arrive meanwhile are
/// folded into a single follow-up fetch.
#[derive(Debug, Clone)]
pub struct RefreshCycle {
    interval: Duration,
    debounce: Duration,
    next_tick: Duration,
    zoom: f64,
    pending_zoom: Option<(f64, Duration)>,
    in_flight: bool,
    queued: bool,
}

impl RefreshCycle {
    /// Creates a cycle whose first tick is due immediately.
    pub fn new(config: &SchedulerConfig, now: Duration) -> Self {
        Self {
            interval: config.refresh_interval(),
            debounce: config.zoom_debounce(),
            next_tick: now,
            zoom: config.initial_zoom,
            pending_zoom: None,
            in_flight: false,
            queued: false,
        }
    }

    /// Committed zoom level.
    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn is_fetching(&self) -> bool {
        self.in_flight
    }

    fn request_fetch(&mut self) -> bool {
        if self.in_flight {
            self.queued = true;
            false
        } else {
            self.in_flight = true;
            true
        }
    }

    /// Returns true if a fetch should start now.
    pub fn on_tick(&mut self, now: Duration) -> bool {
        if now < self.next_tick {
            return false;
        }
        self.next_tick = now + self.interval;
        self.request_fetch()
    }

    /// Manual refresh; also restarts the interval.
    pub fn tick_now(&mut self, now: Duration) -> bool {
        self.next_tick = now + self.interval;
        self.request_fetch()
    }

    /// Returns true if the push warrants a fetch that should start now.
    pub fn on_push(&mut self, signal: &PushSignal) -> bool {
        signal.is_new_data() && self.request_fetch()
    }

    /// Marks the running fetch as done. Returns true if a queued
    /// follow-up fetch should start now.
    pub fn end_fetch(&mut self) -> bool {
        self.in_flight = false;
        if self.queued {
            self.queued = false;
            self.in_flight = true;
            true
        } else {
            false
        }
    }

    /// Records a zoom change; the re-render happens in [`poll_debounce`].
    ///
    /// [`poll_debounce`]: RefreshCycle::poll_debounce
    pub fn on_zoom(&mut self, zoom: f64, now: Duration) {
        if !zoom.is_finite() {
            return;
        }
        let target = self.pending_zoom.map_or(self.zoom, |(z, _)| z);
        if (zoom - target).abs() < ZOOM_EPSILON {
            return;
        }
        if (zoom - self.zoom).abs() < ZOOM_EPSILON {
            // Zoomed back before the debounce fired
            self.pending_zoom = None;
            return;
        }
        self.pending_zoom = Some((zoom, now + self.debounce));
    }

    /// Returns the new zoom once it has been stable for the debounce time.
    pub fn poll_debounce(&mut self, now: Duration) -> Option<f64> {
        match self.pending_zoom {
            Some((zoom, deadline)) if now >= deadline => {
                self.pending_zoom = None;
                self.zoom = zoom;
                Some(zoom)
            }
            _ => None,
        }
    }

    /// Earliest time something is due.
    pub fn next_deadline(&self) -> Duration {
        match self.pending_zoom {
            Some((_, deadline)) => deadline.min(self.next_tick),
            None => self.next_tick,
        }
    }
}

/// A fetch failure shown to the user until dismissed or a fetch succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransientError {
    pub message: String,
    /// Whether retrying is expected to help
    pub retryable: bool,
    /// Monotonic context time of the failure
    pub at: Duration,
}

/// What the view shows.
#[derive(Debug, Clone, Default)]
pub struct ViewState {
    pub snapshot: Arc<TrackSnapshot>,
    pub frame: Arc<RenderFrame>,
    pub zoom: f64,
    pub error: Option<TransientError>,
    pub consecutive_failures: u32,
    pub fetches_ok: u64,
    pub fetches_failed: u64,
}

/// Shared "view still exists" flag.
///
/// Work that completes after teardown checks this and drops its result.
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn kill(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
enum Command {
    TickNow,
    SetZoom(f64),
    DismissError,
    Stop,
}

/// Control handle. Dropping it stops the scheduler.
pub struct SchedulerHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ViewState>,
    liveness: Liveness,
}

impl SchedulerHandle {
    /// Fetches now instead of waiting for the next tick.
    pub fn tick_now(&self) {
        let _ = self.commands.send(Command::TickNow);
    }

    pub fn set_zoom(&self, zoom: f64) {
        let _ = self.commands.send(Command::SetZoom(zoom));
    }

    pub fn dismiss_error(&self) {
        let _ = self.commands.send(Command::DismissError);
    }

    pub fn stop(&self) {
        self.liveness.kill();
        let _ = self.commands.send(Command::Stop);
    }

    pub fn is_running(&self) -> bool {
        self.liveness.is_alive() && !self.commands.is_closed()
    }

    /// Receiver that is notified on every published view state.
    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.state.clone()
    }

    pub fn current(&self) -> ViewState {
        self.state.borrow().clone()
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Async driver of [`RefreshCycle`].
pub struct RefreshScheduler<Ctx, Src, F>
where
    Ctx: MapContext,
    Src: FeedSource,
    F: IconFetcher,
{
    ctx: Arc<Ctx>,
    source: Arc<Src>,
    renderer: MapRenderer<F>,
    normalizer: FeedNormalizer,
    config: SchedulerConfig,
}

impl<Ctx, Src, F> RefreshScheduler<Ctx, Src, F>
where
    Ctx: MapContext,
    Src: FeedSource,
    F: IconFetcher,
{
    pub fn new(
        ctx: Arc<Ctx>,
        source: Arc<Src>,
        renderer: MapRenderer<F>,
        normalizer: FeedNormalizer,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            ctx,
            source,
            renderer,
            normalizer,
            config,
        }
    }

    /// Spawns the loop on the context and returns its handle.
    pub fn start(self) -> SchedulerHandle {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ViewState {
            zoom: self.config.initial_zoom,
            ..ViewState::default()
        });
        let liveness = Liveness::new();

        let ctx = Arc::clone(&self.ctx);
        let task = RunLoop::new(self, cmd_rx, state_tx, liveness.clone());
        ctx.spawn("refresh-scheduler", task.run());

        SchedulerHandle {
            commands: cmd_tx,
            state: state_rx,
            liveness,
        }
    }
}

struct RunLoop<Ctx, Src, F>
where
    Ctx: MapContext,
    Src: FeedSource,
    F: IconFetcher,
{
    ctx: Arc<Ctx>,
    source: Arc<Src>,
    renderer: MapRenderer<F>,
    normalizer: FeedNormalizer,
    query: FeedQuery,
    cycle: RefreshCycle,
    commands: mpsc::UnboundedReceiver<Command>,
    results_tx: mpsc::UnboundedSender<Result<RawPayload, EnvError>>,
    results_rx: mpsc::UnboundedReceiver<Result<RawPayload, EnvError>>,
    state_tx: watch::Sender<ViewState>,
    state: ViewState,
    liveness: Liveness,
    /// Flipped on loop exit; in-flight fetches and icon warm-ups race it
    shutdown: watch::Sender<bool>,
}

impl<Ctx, Src, F> RunLoop<Ctx, Src, F>
where
    Ctx: MapContext,
    Src: FeedSource,
    F: IconFetcher,
{
    fn new(
        scheduler: RefreshScheduler<Ctx, Src, F>,
        commands: mpsc::UnboundedReceiver<Command>,
        state_tx: watch::Sender<ViewState>,
        liveness: Liveness,
    ) -> Self {
        let cycle = RefreshCycle::new(&scheduler.config, scheduler.ctx.now());
        let state = state_tx.borrow().clone();
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        Self {
            ctx: scheduler.ctx,
            source: scheduler.source,
            renderer: scheduler.renderer,
            normalizer: scheduler.normalizer,
            query: scheduler.config.query,
            cycle,
            commands,
            results_tx,
            results_rx,
            state_tx,
            state,
            liveness,
            shutdown: watch::channel(false).0,
        }
    }

    async fn run(mut self) {
        info!(seed = self.ctx.seed(), "refresh scheduler started");
        let mut push_open = true;

        while self.liveness.is_alive() {
            let now = self.ctx.now();
            if self.cycle.on_tick(now) {
                self.spawn_fetch();
            }
            if let Some(zoom) = self.cycle.poll_debounce(now) {
                debug!(zoom, "zoom settled");
                self.state.zoom = zoom;
                self.rerender();
                self.publish();
            }

            let wait = self.cycle.next_deadline().saturating_sub(self.ctx.now());
            let ctx = Arc::clone(&self.ctx);
            let source = Arc::clone(&self.source);

            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(Command::TickNow) => {
                        if self.cycle.tick_now(self.ctx.now()) {
                            self.spawn_fetch();
                        }
                    }
                    Some(Command::SetZoom(zoom)) => self.cycle.on_zoom(zoom, self.ctx.now()),
                    Some(Command::DismissError) => {
                        if self.state.error.take().is_some() {
                            self.publish();
                        }
                    }
                    Some(Command::Stop) | None => break,
                },
                push = source.next_push(), if push_open => match push {
                    Some(signal) => {
                        debug!(kind = ?signal.kind, "push received");
                        if self.cycle.on_push(&signal) {
                            self.spawn_fetch();
                        }
                    }
                    None => {
                        info!("push channel closed, polling only");
                        push_open = false;
                    }
                },
                Some(result) = self.results_rx.recv() => {
                    self.apply_fetch(result);
                    if self.cycle.end_fetch() {
                        self.spawn_fetch();
                    }
                }
                _ = ctx.sleep(wait) => {}
            }
        }

        self.liveness.kill();
        self.shutdown.send_replace(true);
        self.renderer.icon_cache().close();
        info!("refresh scheduler stopped");
    }

    fn spawn_fetch(&self) {
        let source = Arc::clone(&self.source);
        let query = self.query.clone();
        let tx = self.results_tx.clone();
        let liveness = self.liveness.clone();
        let mut shutdown = self.shutdown.subscribe();
        self.ctx.spawn("feed-fetch", async move {
            tokio::select! {
                result = source.fetch(&query) => {
                    if liveness.is_alive() {
                        let _ = tx.send(result);
                    }
                }
                _ = shutdown.changed() => debug!("in-flight fetch cancelled"),
            }
        });
    }

    fn wall_clock_ms(&self) -> i64 {
        self.ctx
            .system_time()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as i64)
    }

    fn apply_fetch(&mut self, result: Result<RawPayload, EnvError>) {
        match result {
            Ok(payload) => {
                let normalized = self.normalizer.normalize(&payload.body);
                let generation = self.state.snapshot.generation + 1;
                let fetched_at_ms = self.wall_clock_ms();
                info!(
                    generation,
                    tracks = normalized.tracks.len(),
                    dropped = normalized.stats.dropped(),
                    "snapshot updated"
                );
                self.state.snapshot = Arc::new(TrackSnapshot::from_normalized(normalized, fetched_at_ms, generation));
                self.state.error = None;
                self.state.consecutive_failures = 0;
                self.state.fetches_ok += 1;
                self.rerender();
                self.warm_icons();
            }
            Err(e) => {
                self.state.consecutive_failures += 1;
                self.state.fetches_failed += 1;
                warn!(
                    error = %e,
                    failures = self.state.consecutive_failures,
                    "feed fetch failed, keeping previous snapshot"
                );
                self.state.error = Some(TransientError {
                    message: e.to_string(),
                    retryable: e.is_transient(),
                    at: self.ctx.now(),
                });
            }
        }
        self.publish();
    }

    fn rerender(&mut self) {
        let frame = self
            .renderer
            .render(&self.state.snapshot, self.state.zoom, self.wall_clock_ms());
        self.state.frame = Arc::new(frame);
    }

    fn warm_icons(&self) {
        let urls = self.renderer.missing_icons(&self.state.frame);
        if urls.is_empty() {
            return;
        }
        let cache = self.renderer.icon_cache();
        let mut shutdown = self.shutdown.subscribe();
        self.ctx.spawn("icon-warm", async move {
            tokio::select! {
                _ = async {
                    for url in urls {
                        cache.get(&url).await;
                    }
                } => {}
                _ = shutdown.changed() => {}
            }
        });
    }

    fn publish(&self) {
        if self.liveness.is_alive() {
            self.state_tx.send_replace(self.state.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::border::BorderMask;
    use crate::cluster::SpatialClusterer;
    use crate::icons::MarkerRenderer;
    use crate::zones::ZoneConfig;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use threatmap_env::{IconBytes, LocateResponse, LocateStatus, TokioContext};
    use tokio::sync::Mutex as AsyncMutex;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    // ---- RefreshCycle ----

    #[test]
    fn test_cycle_first_tick_immediate_then_interval() {
        let mut cycle = RefreshCycle::new(&SchedulerConfig::default(), ms(0));
        assert!(cycle.on_tick(ms(0)));
        assert!(!cycle.end_fetch());
        assert!(!cycle.on_tick(ms(9_999)));
        assert!(cycle.on_tick(ms(10_000)));
        assert_eq!(cycle.next_deadline(), ms(20_000));
    }

    #[test]
    fn test_cycle_coalesces_triggers() {
        let mut cycle = RefreshCycle::new(&SchedulerConfig::default(), ms(0));
        assert!(cycle.on_tick(ms(0)));

        let push = PushSignal::from_payload(json!({"tracks": [{"id": 1}]}));
        assert!(!cycle.on_push(&push));
        assert!(!cycle.tick_now(ms(5)));
        assert!(!cycle.on_push(&push));

        // One follow-up fetch for all three triggers
        assert!(cycle.end_fetch());
        assert!(!cycle.end_fetch());
    }

    #[test]
    fn test_cycle_ignores_empty_pushes() {
        let mut cycle = RefreshCycle::new(&SchedulerConfig::default(), ms(0));
        assert!(!cycle.on_push(&PushSignal::from_payload(json!({"tracks": []}))));
        assert!(!cycle.on_push(&PushSignal::from_payload(json!({"control": {}}))));
        assert!(cycle.on_push(&PushSignal::from_payload(json!({"event": {"id": "x"}}))));
    }

    #[test]
    fn test_cycle_zoom_debounce() {
        let mut cycle = RefreshCycle::new(&SchedulerConfig::default(), ms(0));
        assert_eq!(cycle.zoom(), 6.0);

        cycle.on_zoom(7.0, ms(1_000));
        cycle.on_zoom(8.0, ms(1_100));
        assert_eq!(cycle.poll_debounce(ms(1_279)), None);
        assert_eq!(cycle.next_deadline(), ms(1_280));
        assert_eq!(cycle.poll_debounce(ms(1_280)), Some(8.0));
        assert_eq!(cycle.zoom(), 8.0);

        // Same zoom is ignored
        cycle.on_zoom(8.0, ms(2_000));
        assert_eq!(cycle.poll_debounce(ms(5_000)), None);

        // Zooming back cancels
        cycle.on_zoom(9.0, ms(6_000));
        cycle.on_zoom(8.0, ms(6_050));
        assert_eq!(cycle.poll_debounce(ms(7_000)), None);

        // Repeating the pending zoom does not push the deadline out
        cycle.on_zoom(10.0, ms(8_000));
        cycle.on_zoom(10.0, ms(8_150));
        assert_eq!(cycle.poll_debounce(ms(8_180)), Some(10.0));

        cycle.on_zoom(f64::NAN, ms(9_000));
        assert_eq!(cycle.poll_debounce(ms(10_000)), None);
    }

    // ---- RefreshScheduler ----

    /// Scripted backend: serves queued responses, then the last one again.
    struct ScriptedSource {
        responses: Mutex<VecDeque<Result<serde_json::Value, EnvError>>>,
        last: Mutex<serde_json::Value>,
        latency: Duration,
        fetches: AtomicUsize,
        completed: AtomicUsize,
        push_tx: mpsc::UnboundedSender<PushSignal>,
        push_rx: AsyncMutex<mpsc::UnboundedReceiver<PushSignal>>,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<serde_json::Value, EnvError>>) -> Arc<Self> {
            Self::with_latency(responses, ms(20))
        }

        fn with_latency(responses: Vec<Result<serde_json::Value, EnvError>>, latency: Duration) -> Arc<Self> {
            let (push_tx, push_rx) = mpsc::unbounded_channel();
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                last: Mutex::new(json!({})),
                latency,
                fetches: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
                push_tx,
                push_rx: AsyncMutex::new(push_rx),
            })
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }

        fn completed(&self) -> usize {
            self.completed.load(Ordering::SeqCst)
        }

        fn push(&self, payload: serde_json::Value) {
            self.push_tx.send(PushSignal::from_payload(payload)).unwrap();
        }
    }

    #[async_trait]
    impl FeedSource for ScriptedSource {
        async fn fetch(&self, _query: &FeedQuery) -> Result<RawPayload, EnvError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.latency).await;
            self.completed.fetch_add(1, Ordering::SeqCst);
            let next = self.responses.lock().unwrap().pop_front();
            match next {
                Some(Ok(body)) => {
                    *self.last.lock().unwrap() = body.clone();
                    Ok(RawPayload::new(body))
                }
                Some(Err(e)) => Err(e),
                None => Ok(RawPayload::new(self.last.lock().unwrap().clone())),
            }
        }

        async fn next_push(&self) -> Option<PushSignal> {
            self.push_rx.lock().await.recv().await
        }

        async fn locate(&self, _query: &str) -> Result<LocateResponse, EnvError> {
            Ok(LocateResponse {
                status: LocateStatus::NotFound,
                lat: None,
                lng: None,
                matches: vec![],
            })
        }
    }

    struct NoIcons;

    #[async_trait]
    impl IconFetcher for NoIcons {
        async fn fetch_icon(&self, url: &str) -> Result<IconBytes, EnvError> {
            Err(EnvError::NotFound(url.to_string()))
        }
    }

    fn feed(ids: &[&str]) -> serde_json::Value {
        let tracks: Vec<serde_json::Value> = ids
            .iter()
            .map(|id| json!({"id": id, "lat": 50.45, "lng": 30.52, "threat_type": "shahed"}))
            .collect();
        json!({ "tracks": tracks })
    }

    /// Tokio timers with a wall clock frozen at 2024-01-01T00:00:00Z.
    struct FrozenWallClock(TokioContext);

    const FROZEN_UNIX_MS: i64 = 1_704_067_200_000;

    #[async_trait]
    impl MapContext for FrozenWallClock {
        fn now(&self) -> Duration {
            self.0.now()
        }

        fn system_time(&self) -> std::time::SystemTime {
            UNIX_EPOCH + Duration::from_millis(FROZEN_UNIX_MS as u64)
        }

        async fn sleep(&self, duration: Duration) {
            self.0.sleep(duration).await;
        }

        fn spawn<Fut>(&self, name: &str, future: Fut)
        where
            Fut: std::future::Future<Output = ()> + Send + 'static,
        {
            self.0.spawn(name, future);
        }

        fn seed(&self) -> u64 {
            7
        }
    }

    fn start(source: Arc<ScriptedSource>) -> SchedulerHandle {
        start_on(TokioContext::shared(), source)
    }

    fn start_on<Ctx: MapContext>(ctx: Arc<Ctx>, source: Arc<ScriptedSource>) -> SchedulerHandle {
        let renderer = MapRenderer::new(
            MarkerRenderer::default(),
            SpatialClusterer::default(),
            ZoneConfig::default(),
            BorderMask::fallback(),
            Arc::new(NoIcons),
        );
        RefreshScheduler::new(
            ctx,
            source,
            renderer,
            FeedNormalizer::default(),
            SchedulerConfig::default(),
        )
        .start()
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_fetch_and_periodic_refresh() {
        let source = ScriptedSource::new(vec![Ok(feed(&["a", "b"])), Ok(feed(&["a", "b", "c"]))]);
        let handle = start(Arc::clone(&source));

        tokio::time::sleep(ms(100)).await;
        let state = handle.current();
        assert_eq!(source.fetches(), 1);
        assert_eq!(state.snapshot.generation, 1);
        assert_eq!(state.frame.markers.len(), 2);

        tokio::time::sleep(ms(10_000)).await;
        let state = handle.current();
        assert_eq!(source.fetches(), 2);
        assert_eq!(state.snapshot.generation, 2);
        assert_eq!(state.frame.markers.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_keeps_snapshot_and_surfaces_error() {
        let source = ScriptedSource::new(vec![
            Ok(feed(&["a"])),
            Err(EnvError::HttpStatus { status: 502, url: "/data".into() }),
            Ok(feed(&["a", "b"])),
        ]);
        let handle = start(Arc::clone(&source));

        tokio::time::sleep(ms(10_100)).await;
        let state = handle.current();
        assert_eq!(state.snapshot.generation, 1);
        assert_eq!(state.frame.markers.len(), 1);
        let error = state.error.expect("error surfaced");
        assert!(error.retryable);
        assert_eq!(state.consecutive_failures, 1);

        handle.dismiss_error();
        tokio::time::sleep(ms(10)).await;
        assert!(handle.current().error.is_none());

        // The loop keeps ticking and recovers
        tokio::time::sleep(ms(10_000)).await;
        let state = handle.current();
        assert_eq!(state.snapshot.generation, 2);
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.fetches_failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_triggers_fetch() {
        let source = ScriptedSource::new(vec![Ok(feed(&["a"])), Ok(feed(&["a", "b"]))]);
        let handle = start(Arc::clone(&source));
        tokio::time::sleep(ms(100)).await;
        assert_eq!(source.fetches(), 1);

        source.push(json!({"tracks": []}));
        tokio::time::sleep(ms(100)).await;
        assert_eq!(source.fetches(), 1);

        source.push(json!({"tracks": [{"id": "b"}]}));
        tokio::time::sleep(ms(100)).await;
        assert_eq!(source.fetches(), 2);
        assert_eq!(handle.current().frame.markers.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_now_and_zoom_debounce() {
        let source = ScriptedSource::new(vec![Ok(feed(&["a"]))]);
        let handle = start(Arc::clone(&source));
        tokio::time::sleep(ms(100)).await;

        handle.tick_now();
        tokio::time::sleep(ms(100)).await;
        assert_eq!(source.fetches(), 2);

        handle.set_zoom(8.0);
        tokio::time::sleep(ms(100)).await;
        handle.set_zoom(9.0);
        tokio::time::sleep(ms(100)).await;
        assert_eq!(handle.current().zoom, 6.0);
        tokio::time::sleep(ms(100)).await;
        let state = handle.current();
        assert_eq!(state.zoom, 9.0);
        assert_eq!(state.frame.zoom, 9.0);
        // Zoom re-renders without fetching
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_loop() {
        let source = ScriptedSource::new(vec![Ok(feed(&["a"]))]);
        let handle = start(Arc::clone(&source));
        tokio::time::sleep(ms(100)).await;
        assert!(handle.is_running());

        handle.stop();
        tokio::time::sleep(ms(60_000)).await;
        assert_eq!(source.fetches(), 1);
        assert!(!handle.is_running());

        // Dropping a running handle stops it too
        let source = ScriptedSource::new(vec![Ok(feed(&["a"]))]);
        let handle = start(Arc::clone(&source));
        tokio::time::sleep(ms(100)).await;
        drop(handle);
        tokio::time::sleep(ms(60_000)).await;
        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_cancels_in_flight_fetch() {
        let source = ScriptedSource::with_latency(vec![Ok(feed(&["a"]))], ms(5_000));
        let handle = start(Arc::clone(&source));
        tokio::time::sleep(ms(100)).await;
        assert_eq!(source.fetches(), 1);

        drop(handle);
        tokio::time::sleep(ms(30_000)).await;
        assert_eq!(source.fetches(), 1);
        assert_eq!(source.completed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_burst_during_fetch_collapses_to_one_follow_up() {
        let source = ScriptedSource::with_latency(vec![Ok(feed(&["a"])), Ok(feed(&["a", "b"]))], ms(2_000));
        let handle = start(Arc::clone(&source));
        tokio::time::sleep(ms(100)).await;
        assert_eq!(source.fetches(), 1);

        for i in 0..8 {
            source.push(json!({"tracks": [{"id": format!("p{i}")}]}));
        }
        handle.tick_now();
        tokio::time::sleep(ms(1_000)).await;
        assert_eq!(source.fetches(), 1);

        // First fetch lands at 2 s, the single follow-up at 4 s
        tokio::time::sleep(ms(4_000)).await;
        assert_eq!(source.fetches(), 2);
        assert_eq!(source.completed(), 2);
        let state = handle.current();
        assert_eq!(state.snapshot.generation, 2);
        assert_eq!(state.frame.markers.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_time_comes_from_context_clock() {
        let source = ScriptedSource::new(vec![Ok(feed(&["a"]))]);
        let handle = start_on(Arc::new(FrozenWallClock(TokioContext::new())), Arc::clone(&source));
        tokio::time::sleep(ms(100)).await;

        let state = handle.current();
        assert_eq!(state.snapshot.generation, 1);
        assert_eq!(state.snapshot.fetched_at_ms, FROZEN_UNIX_MS);
    }
}
