//! Scenario runner - replays scenarios against the refresh state machine.
//!
//! The runner steps [`RefreshCycle`] on the virtual clock of a
//! [`SimContext`], the same way the async scheduler does on a real one:
//! ticks start fetches, fetches complete after a seeded latency, pushes
//! and zoom changes arrive from the scenario script. Every rendered frame
//! is checked against the rendering invariants, and each scenario adds its
//! own assertions at the end.

use crate::context::SimContext;
use crate::exporter::{SimEvent, SimExport, SimFrame};
use crate::network::ScriptedFeed;
use crate::oracle::{FeedOracle, HOTSPOTS};
use crate::scenarios::ScenarioId;

use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use threatmap_core::feed::FeedNormalizer;
use threatmap_core::search::{locate, SearchHistory, SearchOutcome};
use threatmap_core::zones::is_kab_trigger;
use threatmap_core::{MapConfig, MapRenderer, RefreshCycle, RenderFrame, ThreatType, TrackSnapshot};
use threatmap_env::{EnvError, FeedQuery, FeedSource, MapContext, PushSignal};
use tracing::{debug, info, warn};

/// Fetch latency bounds (ms).
const LATENCY_MS: (u64, u64) = (20, 400);

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Total ticks executed
    pub total_ticks: u64,

    /// Final virtual time in seconds
    pub final_time_secs: f64,

    /// Active ground truth tracks at the end
    pub final_track_count: usize,

    /// First failed assertion, if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScenarioMetrics {
    pub fetches_started: u64,
    pub fetches_ok: u64,
    pub fetches_failed: u64,

    /// Push messages delivered
    pub pushes: u64,

    /// Pushes that announced nothing new
    pub ignored_pushes: u64,

    /// Triggers folded into an already running or queued fetch
    pub coalesced_triggers: u64,

    /// Re-renders caused by a settled zoom
    pub zoom_renders: u64,

    pub direct_frames: u64,
    pub clustered_frames: u64,
    pub max_markers: usize,

    /// Most entries dropped by one normalization
    pub max_dropped: usize,

    pub final_generation: u64,
}

/// Runs replay scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Virtual time step in milliseconds
    tick_ms: u64,

    /// Maximum duration in seconds
    max_duration_secs: f64,

    config: MapConfig,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            tick_ms: 50,
            max_duration_secs: 60.0,
            config: MapConfig::default(),
        }
    }

    /// Sets the virtual time step.
    pub fn with_tick_ms(mut self, ms: u64) -> Self {
        self.tick_ms = ms.max(1);
        self
    }

    /// Sets the maximum duration.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.max_duration_secs = secs;
        self
    }

    pub fn with_config(mut self, config: MapConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.execute(scenario, None).0
    }

    /// Runs a scenario, sampling a frame every `every_secs` of virtual time.
    pub fn run_with_export(&self, scenario: ScenarioId, every_secs: f64) -> (ScenarioResult, SimExport) {
        let every_ticks = ((every_secs * 1000.0) as u64 / self.tick_ms).max(1);
        let (result, export) = self.execute(scenario, Some(every_ticks));
        let export = export.unwrap_or_else(|| SimExport::new(scenario.name(), self.seed));
        (result, export)
    }

    fn execute(&self, scenario: ScenarioId, export_every: Option<u64>) -> (ScenarioResult, Option<SimExport>) {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let mut replay = match Replay::new(scenario, self.seed, &self.config) {
            Ok(replay) => replay,
            Err(e) => {
                let result = ScenarioResult {
                    scenario,
                    seed: self.seed,
                    passed: false,
                    total_ticks: 0,
                    final_time_secs: 0.0,
                    final_track_count: 0,
                    failure_reason: Some(format!("runtime setup failed: {}", e)),
                    metrics: ScenarioMetrics::default(),
                };
                return (result, None);
            }
        };
        if export_every.is_some() {
            replay.export = Some(SimExport::new(scenario.name(), self.seed));
        }

        let dt = Duration::from_millis(self.tick_ms);
        let total_ticks = ((self.max_duration_secs * 1000.0) as u64 / self.tick_ms).max(1);

        replay.setup();
        for tick in 0..total_ticks {
            let now = replay.ctx.now();
            replay.script(tick, now);
            replay.drive(now);
            if let Some(every) = export_every {
                if tick % every == 0 {
                    replay.record(now);
                }
            }
            replay.ctx.advance_time(dt);
            replay.oracle.step(dt.as_secs_f64());
        }
        replay.finish();

        let failure_reason = replay.failures.first().cloned();
        let passed = failure_reason.is_none();
        let mut metrics = replay.metrics.clone();
        metrics.final_generation = replay.snapshot.generation;

        let mut export = replay.export.take();
        if let Some(export) = export.as_mut() {
            export.finalize(passed, failure_reason.clone());
        }

        let result = ScenarioResult {
            scenario,
            seed: self.seed,
            passed,
            total_ticks,
            final_time_secs: replay.ctx.now().as_secs_f64(),
            final_track_count: replay.oracle.active_count(),
            failure_reason,
            metrics,
        };
        (result, export)
    }
}

/// Zoom storm window: zoom changes every tick in `[start, end)`, then
/// `settle` once.
struct Storm {
    start_ms: u64,
    end_ms: u64,
    settle: f64,
    settled_at: Option<Duration>,
}

/// State of one scenario replay.
struct Replay {
    scenario: ScenarioId,
    ctx: SimContext,
    oracle: FeedOracle,
    feed: Arc<ScriptedFeed>,
    renderer: MapRenderer<ScriptedFeed>,
    normalizer: FeedNormalizer,
    query: FeedQuery,
    cycle: RefreshCycle,
    interval: Duration,
    debounce: Duration,
    max_direct: usize,
    rt: tokio::runtime::Runtime,

    snapshot: TrackSnapshot,
    frame: RenderFrame,
    error: Option<String>,
    in_flight_until: Option<Duration>,

    metrics: ScenarioMetrics,
    failures: Vec<String>,

    export: Option<SimExport>,
    pending_events: Vec<SimEvent>,

    outage_armed: bool,
    bursts: u64,
    storms: Vec<Storm>,
    saw_border_sector: bool,
    saw_approach: bool,
}

impl Replay {
    fn new(scenario: ScenarioId, seed: u64, config: &MapConfig) -> std::io::Result<Self> {
        let ctx = SimContext::new(seed);
        let oracle = FeedOracle::new(ctx.derive_seed(scenario as u64));
        let feed = Arc::new(ScriptedFeed::new());
        let renderer = MapRenderer::from_config(config, Arc::clone(&feed));
        let rt = tokio::runtime::Builder::new_current_thread().build()?;
        let cycle = RefreshCycle::new(&config.scheduler, ctx.now());

        Ok(Self {
            scenario,
            oracle,
            feed,
            renderer,
            normalizer: config.normalizer(),
            query: config.scheduler.query.clone(),
            cycle,
            interval: config.scheduler.refresh_interval(),
            debounce: config.scheduler.zoom_debounce(),
            max_direct: config.cluster.max_direct_markers,
            rt,
            snapshot: TrackSnapshot::default(),
            frame: RenderFrame {
                zoom: config.scheduler.initial_zoom,
                ..RenderFrame::default()
            },
            error: None,
            in_flight_until: None,
            metrics: ScenarioMetrics::default(),
            failures: Vec::new(),
            export: None,
            pending_events: Vec::new(),
            outage_armed: false,
            bursts: 0,
            storms: Vec::new(),
            saw_border_sector: false,
            saw_approach: false,
            ctx,
        })
    }

    fn fail(&mut self, reason: String) {
        warn!(scenario = %self.scenario, "{}", reason);
        self.failures.push(reason);
    }

    fn now_unix_ms(&self) -> i64 {
        self.ctx
            .system_time()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as i64)
    }

    /// Populates the ground truth before the first tick.
    fn setup(&mut self) {
        let t = self.ctx.unix_secs();
        match self.scenario {
            ScenarioId::QuietNight | ScenarioId::Outage | ScenarioId::PushBurst | ScenarioId::ZoomStorm => {
                self.oracle.spawn_wave(10, ThreatType::Shahed, t);
            }
            ScenarioId::MassAttack => {
                self.oracle.spawn_wave(self.max_direct + 150, ThreatType::Shahed, t);
                self.oracle.spawn_wave(20, ThreatType::Raketa, t);
            }
            ScenarioId::MalformedFeed => {
                self.oracle.set_malformed_rate(0.25);
                self.oracle.spawn_wave(40, ThreatType::Shahed, t);
                self.oracle.spawn_wave(4, ThreatType::Raketa, t);
            }
            ScenarioId::KabFront => {
                for _ in 0..3 {
                    self.oracle.spawn_kab(t);
                }
                self.oracle.spawn_border_shelling(t);
                self.oracle.spawn_approach(t);
                self.oracle.spawn_approach(t);
                self.oracle.spawn_wave(5, ThreatType::Shahed, t);
                for (name, position) in HOTSPOTS {
                    self.feed.add_place(name, *position);
                }
            }
        }
        if self.scenario == ScenarioId::ZoomStorm {
            self.storms = vec![
                Storm {
                    start_ms: 3_000,
                    end_ms: 5_000,
                    settle: 9.0,
                    settled_at: None,
                },
                Storm {
                    start_ms: 23_000,
                    end_ms: 25_000,
                    settle: 5.0,
                    settled_at: None,
                },
            ];
        }
        debug!(tracks = self.oracle.active_count(), "ground truth ready");
    }

    /// Scenario-driven inputs for this tick.
    fn script(&mut self, tick: u64, now: Duration) {
        let t_ms = now.as_millis() as u64;
        match self.scenario {
            ScenarioId::Outage if !self.outage_armed && t_ms >= 5_000 => {
                self.outage_armed = true;
                self.feed.fail_next(3, || EnvError::HttpStatus {
                    status: 502,
                    url: "/data".into(),
                });
                self.pending_events.push(SimEvent::warn("backend down for 3 fetches"));
            }
            ScenarioId::PushBurst if t_ms / 7_000 > self.bursts => {
                self.bursts += 1;
                for i in 0..20 {
                    self.deliver_push(json!({"tracks": [{"id": format!("push-{}-{}", self.bursts, i)}]}), now);
                }
                self.deliver_push(json!({"tracks": []}), now);
                self.deliver_push(json!({"control": {"type": "ping"}}), now);
                self.pending_events.push(SimEvent::info(format!("push burst {}", self.bursts)));
            }
            ScenarioId::ZoomStorm => {
                let mut zooms = Vec::new();
                for storm in self.storms.iter_mut() {
                    if (storm.start_ms..storm.end_ms).contains(&t_ms) {
                        zooms.push(7.0 + (tick % 7) as f64 * 0.25);
                    } else if t_ms >= storm.end_ms && storm.settled_at.is_none() {
                        storm.settled_at = Some(now);
                        zooms.push(storm.settle);
                    }
                }
                for zoom in zooms {
                    self.cycle.on_zoom(zoom, now);
                }
            }
            _ => {}
        }
    }

    fn deliver_push(&mut self, payload: serde_json::Value, now: Duration) {
        let signal = PushSignal::from_payload(payload);
        self.metrics.pushes += 1;
        if !signal.is_new_data() {
            self.metrics.ignored_pushes += 1;
        } else if self.cycle.on_push(&signal) {
            self.start_fetch(now);
        } else {
            self.metrics.coalesced_triggers += 1;
        }
    }

    /// Advances the refresh cycle to `now`.
    fn drive(&mut self, now: Duration) {
        if let Some(done) = self.in_flight_until {
            if now >= done {
                self.in_flight_until = None;
                self.complete_fetch();
                if self.cycle.end_fetch() {
                    self.start_fetch(now);
                }
            }
        }

        if self.cycle.on_tick(now) {
            self.start_fetch(now);
        }

        if let Some(zoom) = self.cycle.poll_debounce(now) {
            debug!(zoom, "zoom settled");
            self.metrics.zoom_renders += 1;
            self.pending_events.push(SimEvent::info(format!("zoom {}", zoom)));
            self.rerender();
        }
    }

    fn start_fetch(&mut self, now: Duration) {
        self.metrics.fetches_started += 1;
        let latency = self.ctx.jitter(LATENCY_MS.0, LATENCY_MS.1);
        self.in_flight_until = Some(now + latency);
    }

    fn complete_fetch(&mut self) {
        // The backend answers with the ground truth at response time
        let body = self.oracle.generate_payload(self.ctx.unix_secs());
        self.feed.publish(body);
        let injected = self.oracle.injected();
        let expected = self.oracle.active_count();

        let feed = Arc::clone(&self.feed);
        let result = self.rt.block_on(feed.fetch(&self.query));
        match result {
            Ok(payload) => {
                let normalized = self.normalizer.normalize(&payload.body);
                self.metrics.fetches_ok += 1;
                self.metrics.max_dropped = self.metrics.max_dropped.max(normalized.stats.dropped());

                if normalized.stats.dropped() != injected {
                    self.fail(format!(
                        "dropped {} entries, {} were malformed",
                        normalized.stats.dropped(),
                        injected
                    ));
                }
                if normalized.tracks.len() != expected {
                    self.fail(format!("accepted {} tracks, ground truth has {}", normalized.tracks.len(), expected));
                }

                let generation = self.snapshot.generation + 1;
                self.snapshot = TrackSnapshot::from_normalized(normalized, self.now_unix_ms(), generation);
                self.error = None;
                self.rerender();
                self.rt.block_on(self.renderer.warm_icons(&self.frame));
            }
            Err(e) => {
                self.metrics.fetches_failed += 1;
                warn!(error = %e, "fetch failed, keeping snapshot");
                if self.frame.generation != self.snapshot.generation {
                    self.fail("frame diverged from snapshot during failure".to_string());
                }
                self.pending_events.push(SimEvent::warn(e.to_string()));
                self.error = Some(e.to_string());
            }
        }
    }

    fn rerender(&mut self) {
        self.frame = self
            .renderer
            .render(&self.snapshot, self.cycle.zoom(), self.now_unix_ms());
        self.metrics.max_markers = self.metrics.max_markers.max(self.frame.markers.len());
        if self.frame.clustered {
            self.metrics.clustered_frames += 1;
        } else {
            self.metrics.direct_frames += 1;
        }
        self.check_frame();
    }

    /// Invariants every frame must satisfy.
    fn check_frame(&mut self) {
        let tracks = self.snapshot.tracks.len();
        let frame = &self.frame;
        let mut problems = Vec::new();

        if frame.clustered {
            let members: u64 = frame.markers.iter().filter_map(|m| m.badge_count).map(u64::from).sum();
            if members != tracks as u64 {
                problems.push(format!("clusters hold {} members, snapshot has {} tracks", members, tracks));
            }
            if tracks <= self.max_direct {
                problems.push(format!("clustered {} tracks at or below the threshold", tracks));
            }
            if frame.border_zone.is_some() || !frame.kab_cones.is_empty() || !frame.approaches.is_empty() {
                problems.push("zone overlays drawn in clustered mode".to_string());
            }
        } else {
            if frame.markers.len() != tracks {
                problems.push(format!("{} markers for {} tracks", frame.markers.len(), tracks));
            }
            let triggers = self.snapshot.tracks.iter().filter(|t| is_kab_trigger(t)).count();
            if frame.kab_cones.len() != triggers {
                problems.push(format!("{} KAB cones for {} triggers", frame.kab_cones.len(), triggers));
            }
        }
        if frame.generation != self.snapshot.generation {
            problems.push("frame generation differs from snapshot".to_string());
        }

        self.saw_border_sector |= frame.border_zone.is_some();
        self.saw_approach |= frame.approaches.iter().any(|a| a.arc.is_some());
        for p in problems {
            self.fail(p);
        }
    }

    fn record(&mut self, now: Duration) {
        let mut frame = SimFrame::from_render(now.as_secs_f64(), &self.frame, self.oracle.active_count());
        frame.error = self.error.clone();
        frame.events = std::mem::take(&mut self.pending_events);
        if let Some(export) = self.export.as_mut() {
            export.add_frame(frame);
        }
    }

    fn expected_polls(&self) -> u64 {
        let interval = self.interval.as_millis().max(1);
        (self.ctx.now().as_millis() / interval) as u64 + 1
    }

    /// Scenario-specific assertions.
    fn finish(&mut self) {
        if self.metrics.fetches_ok == 0 {
            self.fail("no successful fetch".to_string());
            return;
        }
        let m = self.metrics.clone();
        match self.scenario {
            ScenarioId::QuietNight => {
                if m.clustered_frames > 0 {
                    self.fail("quiet night produced clustered frames".to_string());
                }
                if m.fetches_started > self.expected_polls() {
                    self.fail(format!("{} fetches for {} polls", m.fetches_started, self.expected_polls()));
                }
            }
            ScenarioId::MassAttack => {
                if m.clustered_frames == 0 || m.direct_frames > 0 {
                    self.fail(format!(
                        "expected only clustered frames, got {} clustered / {} direct",
                        m.clustered_frames, m.direct_frames
                    ));
                }
            }
            ScenarioId::MalformedFeed => {
                if m.max_dropped == 0 {
                    self.fail("no malformed entries were dropped".to_string());
                }
            }
            ScenarioId::Outage => {
                if m.fetches_failed != 3 {
                    self.fail(format!("{} failed fetches, expected 3", m.fetches_failed));
                }
                if self.error.is_some() {
                    self.fail("error still showing after recovery".to_string());
                }
                if self.snapshot.generation != m.fetches_ok {
                    self.fail("snapshot generation does not match successful fetches".to_string());
                }
            }
            ScenarioId::PushBurst => {
                if self.bursts == 0 {
                    self.fail("no push bursts delivered".to_string());
                }
                if m.coalesced_triggers < 19 * self.bursts {
                    self.fail(format!("only {} of the burst pushes were coalesced", m.coalesced_triggers));
                }
                if m.ignored_pushes != 2 * self.bursts {
                    self.fail(format!("{} empty pushes ignored, expected {}", m.ignored_pushes, 2 * self.bursts));
                }
                if m.fetches_started > self.expected_polls() + 2 * self.bursts {
                    self.fail(format!("{} fetches for {} bursts", m.fetches_started, self.bursts));
                }
            }
            ScenarioId::ZoomStorm => {
                let end = self.ctx.now();
                let debounce = self.debounce;
                let settled = self
                    .storms
                    .iter()
                    .filter(|s| s.settled_at.map_or(false, |at| end >= at + debounce))
                    .count() as u64;
                if settled == 0 {
                    self.fail("no zoom storm settled".to_string());
                }
                if m.zoom_renders != settled {
                    self.fail(format!("{} zoom renders for {} settled storms", m.zoom_renders, settled));
                }
                if m.fetches_started > self.expected_polls() {
                    self.fail("zoom changes triggered fetches".to_string());
                }
                let last = self.storms.iter().rev().find(|s| s.settled_at.is_some()).map(|s| s.settle);
                if settled > 0 && last != Some(self.cycle.zoom()) {
                    self.fail(format!("committed zoom {} is not the last settled zoom", self.cycle.zoom()));
                }
            }
            ScenarioId::KabFront => {
                if !self.saw_border_sector {
                    self.fail("border shelling sector never drawn".to_string());
                }
                if !self.saw_approach {
                    self.fail("no approach arc drawn".to_string());
                }
                self.check_search();
            }
        }
    }

    fn check_search(&mut self) {
        let mut history = SearchHistory::new();
        let bounds = self.normalizer.bounds;
        let feed = Arc::clone(&self.feed);

        let found = self.rt.block_on(locate(&*feed, "Харків", &bounds, &mut history));
        if !matches!(found, SearchOutcome::Found { .. }) {
            self.fail(format!("search for a known place returned {:?}", found));
        }
        let missing = self.rt.block_on(locate(&*feed, "Ужгород", &bounds, &mut history));
        match missing {
            SearchOutcome::NoMatches { suggestions } if suggestions.is_empty() => {}
            other => self.fail(format!("search for an unknown place returned {:?}", other)),
        }
        let prefix = self.rt.block_on(locate(&*feed, "хар", &bounds, &mut history));
        if !matches!(prefix, SearchOutcome::Suggest { .. }) {
            self.fail(format!("prefix search returned {:?}", prefix));
        }
    }
}
