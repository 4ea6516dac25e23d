//! JSON exporter for replay frames.
//!
//! Writes what the map showed at each sampled instant, so a replay can be
//! inspected or diffed between seeds.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use threatmap_core::{MarkerDescriptor, RenderFrame};

/// A single sampled frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimFrame {
    /// Virtual time in seconds
    pub time_sec: f64,

    /// Snapshot generation the frame was rendered from
    pub generation: u64,

    pub zoom: f64,
    pub clustered: bool,

    /// Active tracks in the ground truth
    pub ground_truth: usize,

    pub markers: Vec<MarkerPoint>,
    pub zones: ZoneCounts,

    /// Error banner text, if one is showing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Events (pushes, failures, zoom changes, ...)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<SimEvent>,
}

impl SimFrame {
    pub fn from_render(time_sec: f64, frame: &RenderFrame, ground_truth: usize) -> Self {
        Self {
            time_sec,
            generation: frame.generation,
            zoom: frame.zoom,
            clustered: frame.clustered,
            ground_truth,
            markers: frame.markers.iter().map(MarkerPoint::from).collect(),
            zones: ZoneCounts::from(frame),
            error: None,
            events: Vec::new(),
        }
    }
}

/// Where a marker was drawn and with which icon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkerPoint {
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    pub icon: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badge: Option<u32>,
}

impl From<&MarkerDescriptor> for MarkerPoint {
    fn from(m: &MarkerDescriptor) -> Self {
        Self {
            id: m.id.clone(),
            lat: m.position.lat,
            lon: m.position.lon,
            icon: m.icon.url.clone(),
            badge: m.badge_count,
        }
    }
}

/// Overlay counts of a frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneCounts {
    pub border_sector: bool,
    pub kab_cones: usize,
    pub approaches: usize,
    pub trajectories: usize,
}

impl From<&RenderFrame> for ZoneCounts {
    fn from(frame: &RenderFrame) -> Self {
        Self {
            border_sector: frame.border_zone.is_some(),
            kab_cones: frame.kab_cones.len(),
            approaches: frame.approaches.len(),
            trajectories: frame.trajectories.len(),
        }
    }
}

/// Replay event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimEvent {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

impl SimEvent {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: None,
        }
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: Some("warn".to_string()),
        }
    }
}

/// Complete replay export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Duration in seconds
    pub duration_sec: f64,

    /// All frames
    pub frames: Vec<SimFrame>,

    /// Final result
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            duration_sec: 0.0,
            frames: Vec::new(),
            passed: false,
            failure_reason: None,
        }
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: SimFrame) {
        self.duration_sec = frame.time_sec;
        self.frames.push(frame);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, failure_reason: Option<String>) {
        self.passed = passed;
        self.failure_reason = failure_reason;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
