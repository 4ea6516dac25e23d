//! Ground truth oracle for replays.
//!
//! The oracle owns the "true" set of threats:
//! - Positions, headings and speeds of every simulated track
//! - Kinematics (great-circle movement, leaving the region deactivates)
//! - `/data` payload generation in the backend's mixed field naming, with
//!   optional malformed entries so the normalizer's drop counters can be
//!   checked against what was injected

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use threatmap_core::geodesy::{destination_point, GeoBounds, GeoPoint, UKRAINE_BOUNDS};
use threatmap_core::ThreatType;

/// Launch areas tracks are spawned around.
pub const HOTSPOTS: &[(&str, GeoPoint)] = &[
    ("Київ", GeoPoint::new(50.45, 30.52)),
    ("Харків", GeoPoint::new(49.99, 36.23)),
    ("Одеса", GeoPoint::new(46.48, 30.72)),
    ("Суми", GeoPoint::new(50.91, 34.80)),
    ("Запоріжжя", GeoPoint::new(47.84, 35.14)),
    ("Дніпро", GeoPoint::new(48.46, 35.05)),
];

/// Points kept per track for trajectory entries.
const TRAIL_LEN: usize = 5;

/// A ground truth threat.
#[derive(Debug, Clone)]
pub struct SimTrack {
    pub id: u64,
    pub position: GeoPoint,
    pub heading_deg: f64,
    pub speed_kmh: f64,
    pub threat_type: ThreatType,
    pub place: String,
    pub text: String,
    pub count: Option<u32>,
    pub border_shelling: bool,
    /// Unix seconds
    pub spawned_at: i64,
    pub active: bool,
    trail: Vec<GeoPoint>,
}

impl SimTrack {
    pub fn wire_id(&self) -> String {
        format!("sim-{}", self.id)
    }
}

/// Kinds of unusable entries the oracle can inject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Malformed {
    MissingId,
    MissingCoordinates,
    BadCoordinates,
    ZeroPlaceholder,
    OutOfBounds,
    Duplicate,
}

impl Malformed {
    const ALL: [Malformed; 6] = [
        Malformed::MissingId,
        Malformed::MissingCoordinates,
        Malformed::BadCoordinates,
        Malformed::ZeroPlaceholder,
        Malformed::OutOfBounds,
        Malformed::Duplicate,
    ];
}

/// The Oracle - owns ground truth and renders it as backend payloads.
pub struct FeedOracle {
    seed: u64,
    rng: ChaCha8Rng,
    tracks: BTreeMap<u64, SimTrack>,
    next_id: u64,
    bounds: GeoBounds,

    /// Position noise standard deviation (degrees)
    position_noise_deg: f64,

    /// Fraction of malformed entries added per payload
    malformed_rate: f64,

    /// Malformed entries in the last payload, by kind
    last_injected: BTreeMap<Malformed, usize>,
}

impl FeedOracle {
    /// Creates a new oracle with the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            tracks: BTreeMap::new(),
            next_id: 1,
            bounds: UKRAINE_BOUNDS,
            position_noise_deg: 0.002,
            malformed_rate: 0.0,
            last_injected: BTreeMap::new(),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn set_position_noise(&mut self, std_dev_deg: f64) {
        self.position_noise_deg = std_dev_deg.max(0.0);
    }

    /// Sets the malformed entry rate (clamped to 0..=1).
    pub fn set_malformed_rate(&mut self, rate: f64) {
        self.malformed_rate = rate.clamp(0.0, 1.0);
    }

    /// Spawns one track near a random hotspot and returns its id.
    pub fn spawn(&mut self, threat_type: ThreatType, now_secs: i64) -> u64 {
        let (name, center) = HOTSPOTS[self.rng.gen_range(0..HOTSPOTS.len())];
        let bearing = self.rng.gen_range(0.0..360.0);
        let distance = self.rng.gen_range(0.0..40.0);
        let position = destination_point(center, bearing, distance);
        let speed_kmh = match threat_type {
            ThreatType::Shahed | ThreatType::Fpv => self.rng.gen_range(120.0..190.0),
            ThreatType::Raketa | ThreatType::Pusk => self.rng.gen_range(700.0..900.0),
            ThreatType::Avia | ThreatType::Kab => self.rng.gen_range(400.0..600.0),
            _ => 0.0,
        };
        let heading_deg = self.rng.gen_range(0.0..360.0);

        let id = self.next_id;
        self.next_id += 1;
        self.tracks.insert(
            id,
            SimTrack {
                id,
                position,
                heading_deg,
                speed_kmh,
                threat_type,
                place: name.to_string(),
                text: String::new(),
                count: None,
                border_shelling: false,
                spawned_at: now_secs,
                active: true,
                trail: vec![position],
            },
        );
        id
    }

    /// Spawns `n` tracks of one type.
    pub fn spawn_wave(&mut self, n: usize, threat_type: ThreatType, now_secs: i64) -> Vec<u64> {
        (0..n).map(|_| self.spawn(threat_type, now_secs)).collect()
    }

    /// Guided bomb alert with the "КАБ" wording the backend uses.
    pub fn spawn_kab(&mut self, now_secs: i64) -> u64 {
        let id = self.spawn(ThreatType::Kab, now_secs);
        if let Some(t) = self.tracks.get_mut(&id) {
            t.text = "Загроза застосування КАБ".to_string();
        }
        id
    }

    /// Shelling report on the border.
    pub fn spawn_border_shelling(&mut self, now_secs: i64) -> u64 {
        let id = self.spawn(ThreatType::Obstril, now_secs);
        if let Some(t) = self.tracks.get_mut(&id) {
            t.border_shelling = true;
            t.text = "Обстріл прикордоння".to_string();
        }
        id
    }

    /// Drone group with a direction hint in the place label.
    pub fn spawn_approach(&mut self, now_secs: i64) -> u64 {
        let id = self.spawn(ThreatType::Shahed, now_secs);
        let count = self.rng.gen_range(2..6);
        if let Some(t) = self.tracks.get_mut(&id) {
            t.place = format!("{} ({}) ←сходу", t.place, count);
            t.count = Some(count);
        }
        id
    }

    pub fn remove(&mut self, id: u64) {
        if let Some(t) = self.tracks.get_mut(&id) {
            t.active = false;
        }
    }

    /// Advances kinematics by `dt` seconds. Tracks leaving the region
    /// become inactive.
    pub fn step(&mut self, dt: f64) {
        for t in self.tracks.values_mut().filter(|t| t.active) {
            if t.speed_kmh <= 0.0 {
                continue;
            }
            t.position = destination_point(t.position, t.heading_deg, t.speed_kmh * dt / 3600.0);
            if !self.bounds.contains(t.position) {
                t.active = false;
                continue;
            }
            t.trail.push(t.position);
            if t.trail.len() > TRAIL_LEN {
                t.trail.remove(0);
            }
        }
    }

    pub fn active_tracks(&self) -> impl Iterator<Item = &SimTrack> {
        self.tracks.values().filter(|t| t.active)
    }

    pub fn active_count(&self) -> usize {
        self.active_tracks().count()
    }

    pub fn track(&self, id: u64) -> Option<&SimTrack> {
        self.tracks.get(&id)
    }

    /// Malformed entries in the last generated payload.
    pub fn injected(&self) -> usize {
        self.last_injected.values().sum()
    }

    pub fn injected_of(&self, kind: Malformed) -> usize {
        self.last_injected.get(&kind).copied().unwrap_or(0)
    }

    /// Renders the current ground truth as a `/data` body.
    ///
    /// Fast movers go into `trajectories`, everything else into `tracks`;
    /// malformed entries (if enabled) are appended to `events`.
    pub fn generate_payload(&mut self, now_secs: i64) -> Value {
        let mut tracks = Vec::new();
        let mut trajectories = Vec::new();
        let mut point_ids = Vec::new();

        let active: Vec<SimTrack> = self.active_tracks().cloned().collect();
        for t in &active {
            if t.threat_type == ThreatType::Raketa && t.trail.len() > 1 {
                trajectories.push(self.trajectory_entry(t));
            } else {
                tracks.push(self.point_entry(t, now_secs));
                point_ids.push(t.wire_id());
            }
        }

        self.last_injected.clear();
        let n_bad = (active.len() as f64 * self.malformed_rate).round() as usize;
        let mut events = Vec::with_capacity(n_bad);
        for i in 0..n_bad {
            let kind = Malformed::ALL[i % Malformed::ALL.len()];
            let entry = match kind {
                Malformed::Duplicate => match point_ids.choose(&mut self.rng) {
                    Some(id) => json!({"id": id, "lat": 49.0, "lng": 32.0, "threat_type": "shahed"}),
                    None => continue,
                },
                other => malformed_entry(other, i),
            };
            *self.last_injected.entry(kind).or_default() += 1;
            events.push(entry);
        }
        // Non-object entries count as missing ids too
        if n_bad > 0 {
            events.push(json!("garbage"));
            *self.last_injected.entry(Malformed::MissingId).or_default() += 1;
        }

        json!({
            "tracks": tracks,
            "events": events,
            "trajectories": trajectories,
        })
    }

    fn noisy(&mut self, p: GeoPoint) -> GeoPoint {
        if self.position_noise_deg <= 0.0 {
            return p;
        }
        let noise = match Normal::new(0.0, self.position_noise_deg) {
            Ok(n) => n,
            Err(_) => return p,
        };
        let q = GeoPoint::new(p.lat + noise.sample(&mut self.rng), p.lon + noise.sample(&mut self.rng));
        if self.bounds.contains(q) {
            q
        } else {
            p
        }
    }

    fn point_entry(&mut self, t: &SimTrack, now_secs: i64) -> Value {
        let p = self.noisy(t.position);
        let mut entry = serde_json::Map::new();
        entry.insert("id".into(), json!(t.wire_id()));

        // The backend has shipped both spellings
        if self.rng.gen_bool(0.5) {
            entry.insert("lat".into(), json!(p.lat));
            entry.insert("lng".into(), json!(p.lon));
            entry.insert("threat_type".into(), json!(t.threat_type.key()));
        } else {
            entry.insert("latitude".into(), json!(p.lat.to_string()));
            entry.insert("longitude".into(), json!(p.lon.to_string()));
            entry.insert("threatType".into(), json!(t.threat_type.key()));
        }
        entry.insert("place".into(), json!(t.place));
        if !t.text.is_empty() {
            entry.insert("text".into(), json!(t.text));
        }
        if let Some(count) = t.count {
            entry.insert("count".into(), json!(count));
        }
        if t.border_shelling {
            entry.insert("border_shelling".into(), json!(true));
        }
        entry.insert("timestamp".into(), json!(now_secs.max(t.spawned_at)));
        Value::Object(entry)
    }

    fn trajectory_entry(&self, t: &SimTrack) -> Value {
        let path: Vec<Value> = t.trail.iter().map(|p| json!([p.lat, p.lon])).collect();
        json!({
            "id": t.wire_id(),
            "threat_type": t.threat_type.key(),
            "place": t.place,
            "path": path,
            "timestamp": t.spawned_at,
        })
    }
}

fn malformed_entry(kind: Malformed, i: usize) -> Value {
    let id = format!("bad-{}", i);
    match kind {
        Malformed::MissingId => json!({"lat": 49.0, "lng": 32.0, "threat_type": "shahed"}),
        Malformed::MissingCoordinates => json!({"id": id, "threat_type": "raketa"}),
        Malformed::BadCoordinates => json!({"id": id, "lat": "abc", "lng": 32.0}),
        Malformed::ZeroPlaceholder => json!({"id": id, "lat": 0.0, "lng": 0.0}),
        Malformed::OutOfBounds => json!({"id": id, "lat": 55.75, "lng": 37.61}),
        Malformed::Duplicate => json!({"id": id}),
    }
}
