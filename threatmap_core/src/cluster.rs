//! Grid-bucket spatial clustering.
//!
//! Below the density threshold every track is drawn as its own marker.
//! Above it, tracks are bucketed into square lat/lon cells whose size
//! shrinks as the map zooms in.
//!
//! Output is a pure function of the track *set* and the zoom: tracks are
//! sorted by id before bucketing and cells come out in key order, so the
//! same feed renders the same clusters no matter how the backend ordered it.

use crate::track::{ThreatType, Track};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::debug;

/// One row of the zoom → cell size table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoomStep {
    /// Applies at this zoom and above
    pub min_zoom: f64,
    /// Cell side in degrees
    pub cell_deg: f64,
}

/// Clustering configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Up to this many tracks are drawn 1:1
    pub max_direct_markers: usize,

    /// Cell size below the lowest step
    pub base_cell_deg: f64,

    /// Finer cells at higher zoom
    pub zoom_steps: Vec<ZoomStep>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            max_direct_markers: 650,
            base_cell_deg: 0.55,
            zoom_steps: vec![
                ZoomStep { min_zoom: 7.0, cell_deg: 0.32 },
                ZoomStep { min_zoom: 8.0, cell_deg: 0.18 },
                ZoomStep { min_zoom: 9.0, cell_deg: 0.11 },
                ZoomStep { min_zoom: 10.0, cell_deg: 0.06 },
            ],
        }
    }
}

impl ClusterConfig {
    /// Cell side in degrees for a zoom level.
    ///
    /// The highest step whose `min_zoom` is reached wins, so the table
    /// may be given in any order.
    pub fn cell_size_for_zoom(&self, zoom: f64) -> f64 {
        self.zoom_steps
            .iter()
            .filter(|s| zoom >= s.min_zoom)
            .max_by(|a, b| a.min_zoom.total_cmp(&b.min_zoom))
            .map_or(self.base_cell_deg, |s| s.cell_deg)
    }
}

/// Grid cell index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellKey {
    pub row: i64,
    pub col: i64,
}

impl CellKey {
    pub fn for_point(lat: f64, lon: f64, cell_deg: f64) -> Self {
        Self {
            row: (lat / cell_deg).floor() as i64,
            col: (lon / cell_deg).floor() as i64,
        }
    }
}

impl std::fmt::Display for CellKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.row, self.col)
    }
}

/// Age class of a cluster, driving marker opacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    Fresh,
    Stale,
    Old,
}

impl Freshness {
    const FRESH_MS: i64 = 8 * 60 * 1000;
    const STALE_MS: i64 = 20 * 60 * 1000;

    /// Classifies a report time against the current time (both unix ms).
    pub fn classify(timestamp_ms: i64, now_ms: i64) -> Self {
        let age = now_ms.saturating_sub(timestamp_ms);
        if age < Self::FRESH_MS {
            Freshness::Fresh
        } else if age < Self::STALE_MS {
            Freshness::Stale
        } else {
            Freshness::Old
        }
    }
}

/// Aggregate of the tracks in one grid cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub cell_key: CellKey,
    pub centroid_lat: f64,
    pub centroid_lon: f64,
    pub member_count: usize,
    pub dominant_type: ThreatType,
    pub latest_timestamp: i64,

    /// Type histogram, most frequent first (ties in first-seen order)
    pub type_counts: Vec<(ThreatType, usize)>,

    /// Member ids in id order
    pub member_ids: Vec<String>,
}

/// Result of a clustering pass.
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterOutput {
    /// Few enough tracks to draw each one
    Direct(Vec<Track>),
    Clustered(Vec<Cluster>),
}

impl ClusterOutput {
    /// Number of markers this output produces.
    pub fn len(&self) -> usize {
        match self {
            ClusterOutput::Direct(tracks) => tracks.len(),
            ClusterOutput::Clustered(clusters) => clusters.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_clustered(&self) -> bool {
        matches!(self, ClusterOutput::Clustered(_))
    }
}

/// Grid clusterer.
#[derive(Debug, Clone, Default)]
pub struct SpatialClusterer {
    config: ClusterConfig,
}

impl SpatialClusterer {
    pub fn new(config: ClusterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Clusters a track set for the given zoom level.
    pub fn cluster(&self, tracks: &[Track], zoom: f64) -> ClusterOutput {
        if tracks.len() <= self.config.max_direct_markers {
            return ClusterOutput::Direct(tracks.to_vec());
        }

        let cell_deg = self.config.cell_size_for_zoom(zoom);

        let mut sorted: Vec<&Track> = tracks.iter().collect();
        sorted.sort_by(|a, b| canonical_order(a, b));

        let mut cells: BTreeMap<CellKey, Vec<&Track>> = BTreeMap::new();
        for track in sorted {
            cells
                .entry(CellKey::for_point(track.lat, track.lon, cell_deg))
                .or_default()
                .push(track);
        }

        let clusters: Vec<Cluster> = cells
            .into_iter()
            .map(|(key, members)| summarize(key, &members))
            .collect();

        debug!(
            tracks = tracks.len(),
            clusters = clusters.len(),
            cell_deg,
            zoom,
            "clustered"
        );
        ClusterOutput::Clustered(clusters)
    }
}

/// Clusters with the default configuration.
pub fn cluster(tracks: &[Track], zoom: f64) -> ClusterOutput {
    SpatialClusterer::default().cluster(tracks, zoom)
}

/// Total order on tracks: id first, then the remaining fields so that
/// inputs with repeated ids still sort the same way every time.
fn canonical_order(a: &Track, b: &Track) -> Ordering {
    a.id.cmp(&b.id)
        .then_with(|| a.lat.total_cmp(&b.lat))
        .then_with(|| a.lon.total_cmp(&b.lon))
        .then_with(|| a.threat_type.cmp(&b.threat_type))
        .then_with(|| a.timestamp.cmp(&b.timestamp))
}

fn summarize(cell_key: CellKey, members: &[&Track]) -> Cluster {
    let n = members.len() as f64;
    let (sum_lat, sum_lon) = members
        .iter()
        .fold((0.0, 0.0), |(la, lo), t| (la + t.lat, lo + t.lon));

    // First-seen order of types, with counts
    let mut type_counts: Vec<(ThreatType, usize)> = Vec::new();
    for t in members {
        match type_counts.iter_mut().find(|(ty, _)| *ty == t.threat_type) {
            Some((_, c)) => *c += 1,
            None => type_counts.push((t.threat_type, 1)),
        }
    }
    // Stable sort keeps first-seen order among equal counts
    type_counts.sort_by(|a, b| b.1.cmp(&a.1));

    Cluster {
        cell_key,
        centroid_lat: sum_lat / n,
        centroid_lon: sum_lon / n,
        member_count: members.len(),
        dominant_type: type_counts.first().map_or(ThreatType::Other, |(t, _)| *t),
        latest_timestamp: members.iter().map(|t| t.timestamp).max().unwrap_or(0),
        type_counts,
        member_ids: members.iter().map(|t| t.id.clone()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn track(id: &str, lat: f64, lon: f64, kind: ThreatType) -> Track {
        Track::new(id, lat, lon, kind)
    }

    /// Deterministic pseudo-random tracks over the Ukraine box.
    fn scattered(n: usize) -> Vec<Track> {
        let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state % 1_000_000) as f64 / 1_000_000.0
        };
        (0..n)
            .map(|i| {
                let kind = ThreatType::ALL[i % 4];
                let mut t = track(&format!("t{:04}", i), 44.5 + next() * 8.0, 23.0 + next() * 16.0, kind);
                t.timestamp = i as i64 * 1000;
                t
            })
            .collect()
    }

    #[test]
    fn test_cell_size_table() {
        let config = ClusterConfig::default();
        assert_eq!(config.cell_size_for_zoom(5.0), 0.55);
        assert_eq!(config.cell_size_for_zoom(6.9), 0.55);
        assert_eq!(config.cell_size_for_zoom(7.0), 0.32);
        assert_eq!(config.cell_size_for_zoom(8.0), 0.18);
        assert_eq!(config.cell_size_for_zoom(9.5), 0.11);
        assert_eq!(config.cell_size_for_zoom(10.0), 0.06);
        assert_eq!(config.cell_size_for_zoom(18.0), 0.06);

        // Monotonically non-increasing
        let mut prev = f64::INFINITY;
        for z in 0..20 {
            let size = config.cell_size_for_zoom(z as f64);
            assert!(size <= prev);
            prev = size;
        }
    }

    #[test]
    fn test_threshold_boundary() {
        let clusterer = SpatialClusterer::default();

        let at = scattered(650);
        match clusterer.cluster(&at, 6.0) {
            ClusterOutput::Direct(tracks) => assert_eq!(tracks.len(), 650),
            other => panic!("expected direct output, got {} clusters", other.len()),
        }

        let over = scattered(651);
        assert!(clusterer.cluster(&over, 6.0).is_clustered());
    }

    #[test]
    fn test_three_tracks_same_point() {
        let tracks = vec![
            track("a", 50.45, 30.52, ThreatType::Shahed),
            track("b", 50.45, 30.52, ThreatType::Raketa),
            track("c", 50.45, 30.52, ThreatType::Shahed),
        ];

        // High zoom, below threshold: 1:1
        assert_eq!(cluster(&tracks, 12.0).len(), 3);

        // Force clustering
        let clusterer = SpatialClusterer::new(ClusterConfig {
            max_direct_markers: 0,
            ..Default::default()
        });
        match clusterer.cluster(&tracks, 5.0) {
            ClusterOutput::Clustered(clusters) => {
                assert_eq!(clusters.len(), 1);
                assert_eq!(clusters[0].member_count, 3);
                assert_eq!(clusters[0].dominant_type, ThreatType::Shahed);
                assert_eq!(clusters[0].cell_key.to_string(), "91_55");
            }
            ClusterOutput::Direct(_) => panic!("expected clusters"),
        }
    }

    #[test]
    fn test_order_independence() {
        let tracks = scattered(900);
        let mut reversed = tracks.clone();
        reversed.reverse();
        let mut rotated = tracks.clone();
        rotated.rotate_left(317);

        for zoom in [5.0, 7.0, 9.0, 11.0] {
            let a = cluster(&tracks, zoom);
            assert_eq!(a, cluster(&reversed, zoom));
            assert_eq!(a, cluster(&rotated, zoom));
        }
    }

    #[test]
    fn test_centroid_and_counts() {
        let tracks = scattered(700);
        let ClusterOutput::Clustered(clusters) = cluster(&tracks, 6.0) else {
            panic!("expected clusters");
        };

        let total: usize = clusters.iter().map(|c| c.member_count).sum();
        assert_eq!(total, 700);

        for c in &clusters {
            let members: Vec<&Track> = tracks.iter().filter(|t| c.member_ids.contains(&t.id)).collect();
            assert_eq!(members.len(), c.member_count);
            let lat = members.iter().map(|t| t.lat).sum::<f64>() / members.len() as f64;
            let lon = members.iter().map(|t| t.lon).sum::<f64>() / members.len() as f64;
            assert_relative_eq!(c.centroid_lat, lat, epsilon = 1e-9);
            assert_relative_eq!(c.centroid_lon, lon, epsilon = 1e-9);
            assert_eq!(c.latest_timestamp, members.iter().map(|t| t.timestamp).max().unwrap());
        }
    }

    #[test]
    fn test_dominant_type_tie_first_seen_by_id() {
        let tracks = vec![
            track("b", 50.0, 30.0, ThreatType::Raketa),
            track("a", 50.0, 30.0, ThreatType::Kab),
        ];
        let clusterer = SpatialClusterer::new(ClusterConfig {
            max_direct_markers: 0,
            ..Default::default()
        });
        let ClusterOutput::Clustered(clusters) = clusterer.cluster(&tracks, 5.0) else {
            panic!("expected clusters");
        };
        // "a" sorts first
        assert_eq!(clusters[0].dominant_type, ThreatType::Kab);
        assert_eq!(clusters[0].type_counts, vec![(ThreatType::Kab, 1), (ThreatType::Raketa, 1)]);
    }

    #[test]
    fn test_empty_input() {
        assert!(cluster(&[], 5.0).is_empty());
        let clusterer = SpatialClusterer::new(ClusterConfig {
            max_direct_markers: 0,
            ..Default::default()
        });
        assert_eq!(clusterer.cluster(&[], 5.0), ClusterOutput::Clustered(vec![]));
    }

    #[test]
    fn test_freshness() {
        let now = 10_000_000;
        assert_eq!(Freshness::classify(now - 60_000, now), Freshness::Fresh);
        assert_eq!(Freshness::classify(now - 10 * 60_000, now), Freshness::Stale);
        assert_eq!(Freshness::classify(now - 30 * 60_000, now), Freshness::Old);
        assert_eq!(Freshness::classify(0, now), Freshness::Old);
    }
}
