//! Geo feed normalizer.
//!
//! Turns a raw `/data` payload into a flat list of [`Track`]s. The backend
//! has shipped several payload shapes over time (`tracks`, `events`,
//! `trajectories`, camelCase and snake_case field names); all of them are
//! accepted here so the rest of the core only ever sees canonical tracks.
//!
//! Normalization never fails. Entries that cannot be used are dropped and
//! counted in [`NormalizeStats`].

use crate::geodesy::{GeoBounds, GeoPoint};
use crate::track::{resolve_type, ThreatType, Track};
use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::debug;

const ID_KEYS: &[&str] = &["id"];
const LAT_KEYS: &[&str] = &["lat", "latitude"];
const LON_KEYS: &[&str] = &["lng", "lon", "longitude"];
const TYPE_KEYS: &[&str] = &["threat_type", "threatType", "actual_type", "actualType", "type"];
const ICON_KEYS: &[&str] = &["marker_icon", "markerIcon", "icon"];
const TEXT_KEYS: &[&str] = &["text", "message"];

/// Timestamps above this are milliseconds, below are seconds.
const MILLIS_THRESHOLD: f64 = 1e12;

/// Why an entry did not make it into the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// No usable id (or the entry is not an object at all)
    MissingId,
    /// No coordinates given
    MissingCoordinates,
    /// Coordinates present but unparseable, non-finite or a (0,0) placeholder
    BadCoordinates,
    /// Outside the accepted region
    OutOfBounds,
    /// Id already seen earlier in the payload
    Duplicate,
    /// Removed by the client-side type filter
    Filtered,
}

/// Per-reason counters for one normalization run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizeStats {
    pub accepted: usize,
    pub missing_id: usize,
    pub missing_coordinates: usize,
    pub bad_coordinates: usize,
    pub out_of_bounds: usize,
    pub duplicate: usize,
    pub filtered: usize,
}

impl NormalizeStats {
    fn record(&mut self, reason: DropReason) {
        match reason {
            DropReason::MissingId => self.missing_id += 1,
            DropReason::MissingCoordinates => self.missing_coordinates += 1,
            DropReason::BadCoordinates => self.bad_coordinates += 1,
            DropReason::OutOfBounds => self.out_of_bounds += 1,
            DropReason::Duplicate => self.duplicate += 1,
            DropReason::Filtered => self.filtered += 1,
        }
    }

    /// Total number of dropped entries.
    pub fn dropped(&self) -> usize {
        self.missing_id
            + self.missing_coordinates
            + self.bad_coordinates
            + self.out_of_bounds
            + self.duplicate
            + self.filtered
    }
}

/// A flight path reported by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub id: String,
    pub threat_type: ThreatType,
    pub path: Vec<GeoPoint>,
}

/// Result of normalizing one payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Normalized {
    pub tracks: Vec<Track>,
    pub trajectories: Vec<Trajectory>,
    pub stats: NormalizeStats,
}

/// Configurable normalizer.
#[derive(Debug, Clone, Default)]
pub struct FeedNormalizer {
    /// Accepted region
    pub bounds: GeoBounds,

    /// When set, only tracks of this type are kept
    pub type_filter: Option<ThreatType>,
}

impl FeedNormalizer {
    pub fn new(bounds: GeoBounds) -> Self {
        Self {
            bounds,
            type_filter: None,
        }
    }

    pub fn with_type_filter(mut self, filter: Option<ThreatType>) -> Self {
        self.type_filter = filter;
        self
    }

    /// Normalizes a raw payload.
    ///
    /// Entries are taken from `tracks`, then `events`, then `trajectories`;
    /// for duplicate ids the first occurrence wins.
    pub fn normalize(&self, raw: &Value) -> Normalized {
        let mut out = Normalized::default();
        let mut seen: HashSet<String> = HashSet::new();

        for key in ["tracks", "events"] {
            for entry in entries(raw, key) {
                match self.parse_point_entry(entry) {
                    Ok(track) => self.accept(track, None, &mut seen, &mut out),
                    Err(reason) => out.stats.record(reason),
                }
            }
        }

        for entry in entries(raw, "trajectories") {
            match self.parse_trajectory_entry(entry) {
                Ok((track, trajectory)) => self.accept(track, Some(trajectory), &mut seen, &mut out),
                Err(reason) => out.stats.record(reason),
            }
        }

        debug!(
            accepted = out.stats.accepted,
            dropped = out.stats.dropped(),
            trajectories = out.trajectories.len(),
            "feed normalized"
        );
        out
    }

    fn accept(
        &self,
        track: Track,
        trajectory: Option<Trajectory>,
        seen: &mut HashSet<String>,
        out: &mut Normalized,
    ) {
        if !seen.insert(track.id.clone()) {
            out.stats.record(DropReason::Duplicate);
            return;
        }
        if let Some(filter) = self.type_filter {
            if track.threat_type != filter {
                out.stats.record(DropReason::Filtered);
                return;
            }
        }
        out.stats.accepted += 1;
        out.tracks.push(track);
        if let Some(trajectory) = trajectory {
            out.trajectories.push(trajectory);
        }
    }

    fn parse_point_entry(&self, entry: &Value) -> Result<Track, DropReason> {
        let obj = entry.as_object().ok_or(DropReason::MissingId)?;
        let id = parse_id(obj).ok_or(DropReason::MissingId)?;
        let lat = coordinate(obj, LAT_KEYS)?;
        let lon = coordinate(obj, LON_KEYS)?;
        let position = self.validate(GeoPoint::new(lat, lon))?;
        Ok(build_track(id, position, obj))
    }

    fn parse_trajectory_entry(&self, entry: &Value) -> Result<(Track, Trajectory), DropReason> {
        let obj = entry.as_object().ok_or(DropReason::MissingId)?;
        let id = parse_id(obj).ok_or(DropReason::MissingId)?;
        let path = match obj.get("path") {
            None | Some(Value::Null) => return Err(DropReason::MissingCoordinates),
            Some(Value::Array(points)) if points.is_empty() => {
                return Err(DropReason::MissingCoordinates)
            }
            Some(Value::Array(points)) => points
                .iter()
                .map(path_point)
                .collect::<Option<Vec<_>>>()
                .ok_or(DropReason::BadCoordinates)?,
            Some(_) => return Err(DropReason::BadCoordinates),
        };
        let head = *path.last().ok_or(DropReason::MissingCoordinates)?;
        let head = self.validate(head)?;
        let track = build_track(id, head, obj);
        let trajectory = Trajectory {
            id: track.id.clone(),
            threat_type: track.threat_type,
            path,
        };
        Ok((track, trajectory))
    }

    fn validate(&self, p: GeoPoint) -> Result<GeoPoint, DropReason> {
        if !p.is_finite() {
            return Err(DropReason::BadCoordinates);
        }
        // (0,0)-ish points are geocoder placeholders
        if p.lat.abs() < 1.0 && p.lon.abs() < 1.0 {
            return Err(DropReason::BadCoordinates);
        }
        if !self.bounds.contains(p) {
            return Err(DropReason::OutOfBounds);
        }
        Ok(p)
    }
}

/// Normalizes a payload with the default region and no type filter.
pub fn normalize(raw: &Value) -> Normalized {
    FeedNormalizer::default().normalize(raw)
}

fn entries<'a>(raw: &'a Value, key: &str) -> &'a [Value] {
    raw.get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

fn string_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    field(obj, keys)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn parse_id(obj: &Map<String, Value>) -> Option<String> {
    match field(obj, ID_KEYS)? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn coordinate(obj: &Map<String, Value>, keys: &[&str]) -> Result<f64, DropReason> {
    let value = field(obj, keys).ok_or(DropReason::MissingCoordinates)?;
    let n = number(value).ok_or(DropReason::BadCoordinates)?;
    if n.is_finite() {
        Ok(n)
    } else {
        Err(DropReason::BadCoordinates)
    }
}

fn path_point(v: &Value) -> Option<GeoPoint> {
    match v {
        Value::Array(pair) if pair.len() >= 2 => {
            let p = GeoPoint::new(number(&pair[0])?, number(&pair[1])?);
            p.is_finite().then_some(p)
        }
        Value::Object(obj) => {
            let lat = coordinate(obj, LAT_KEYS).ok()?;
            let lon = coordinate(obj, LON_KEYS).ok()?;
            Some(GeoPoint::new(lat, lon))
        }
        _ => None,
    }
}

fn bool_field(obj: &Map<String, Value>, keys: &[&str]) -> bool {
    match field(obj, keys) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map_or(false, |x| x != 0.0),
        Some(Value::String(s)) => matches!(s.trim(), "true" | "1"),
        _ => false,
    }
}

fn build_track(id: String, position: GeoPoint, obj: &Map<String, Value>) -> Track {
    let marker_icon = string_field(obj, ICON_KEYS);
    let type_label = string_field(obj, TYPE_KEYS);
    let threat_type = resolve_type(marker_icon.as_deref(), type_label.as_deref());
    let place = string_field(obj, &["place"]);

    let count = field(obj, &["count"])
        .and_then(number)
        .filter(|n| n.is_finite() && *n >= 0.0)
        .map(|n| n as u32)
        .or_else(|| place.as_deref().and_then(place_count));

    Track {
        id,
        lat: position.lat,
        lon: position.lon,
        text: string_field(obj, TEXT_KEYS).unwrap_or_default(),
        threat_type,
        marker_icon,
        place,
        count,
        timestamp: parse_timestamp(obj).unwrap_or(0),
        channel: string_field(obj, &["channel"]),
        border_shelling: bool_field(obj, &["border_shelling", "borderShelling"]),
        course_direction: string_field(obj, &["course_direction", "courseDirection"]),
    }
}

/// Extracts `N` from a `"(N)"` group in a place label, e.g. `"Суми (4)"`.
pub fn place_count(place: &str) -> Option<u32> {
    let mut rest = place;
    while let Some(open) = rest.find('(') {
        let after = &rest[open + 1..];
        let close = after.find(')')?;
        if let Ok(n) = after[..close].trim().parse::<u32>() {
            return Some(n);
        }
        rest = &after[close + 1..];
    }
    None
}

/// Unix milliseconds from `date` or `timestamp`.
fn parse_timestamp(obj: &Map<String, Value>) -> Option<i64> {
    if let Some(date) = string_field(obj, &["date"]) {
        if let Some(ms) = parse_date(&date) {
            return Some(ms);
        }
    }
    let ts = field(obj, &["timestamp", "ts"]).and_then(number)?;
    if !ts.is_finite() || ts < 0.0 {
        return None;
    }
    if ts > MILLIS_THRESHOLD {
        Some(ts as i64)
    } else {
        Some((ts * 1000.0) as i64)
    }
}

/// Parses `YYYY-MM-DD HH:MM:SS` (taken as UTC) or RFC 3339.
pub fn parse_date(s: &str) -> Option<i64> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc().timestamp_millis())
}
