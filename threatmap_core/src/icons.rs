//! Marker and icon rendering.
//!
//! A single icon/badge mapping is used by every client:
//!
//! - Icon priority: explicit `marker_icon` > per-type table entry > default.
//! - Count badge on a track marker iff `count > 1` and the type is
//!   count-worthy (only `shahed` by default).
//! - Cluster markers always carry their member count.

use crate::cluster::{Cluster, ClusterOutput, Freshness};
use crate::geodesy::GeoPoint;
use crate::track::{ThreatType, Track};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Lines listed in a cluster popup.
const SUMMARY_LINES: usize = 6;

/// Where a resolved icon came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IconSource {
    /// The backend named the icon
    Explicit,
    /// Looked up by threat type
    TypeTable,
    /// Nothing matched
    Default,
}

/// A resolved icon reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IconRef {
    pub url: String,
    pub source: IconSource,
}

/// Icon file names by threat type, served from a static host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IconTable {
    /// Base URL for bare asset names, without trailing slash
    pub static_base: String,

    pub by_type: BTreeMap<ThreatType, String>,

    pub default_icon: String,
}

impl Default for IconTable {
    fn default() -> Self {
        let by_type = ThreatType::ALL
            .iter()
            .filter(|t| **t != ThreatType::Other)
            .map(|t| (*t, format!("{}.png", t.key())))
            .collect();
        Self {
            static_base: "https://neptun.in.ua/static".to_string(),
            by_type,
            default_icon: "default.png".to_string(),
        }
    }
}

impl IconTable {
    /// Resolves an icon name, rooted path or absolute URL to a full URL.
    pub fn url_for(&self, name: &str) -> String {
        let name = name.trim();
        if name.starts_with("http://") || name.starts_with("https://") {
            return name.to_string();
        }
        let base = self.static_base.trim_end_matches('/');
        if name.starts_with('/') {
            return format!("{}{}", origin_of(base), name);
        }
        if name.contains('.') {
            format!("{}/{}", base, name)
        } else {
            format!("{}/{}.png", base, name)
        }
    }

    pub fn default_url(&self) -> String {
        self.url_for(&self.default_icon)
    }

    /// Icon for a type alone.
    pub fn for_type(&self, threat_type: ThreatType) -> IconRef {
        match self.by_type.get(&threat_type) {
            Some(name) => IconRef {
                url: self.url_for(name),
                source: IconSource::TypeTable,
            },
            None => IconRef {
                url: self.default_url(),
                source: IconSource::Default,
            },
        }
    }
}

/// `https://host/static` -> `https://host`
fn origin_of(base: &str) -> &str {
    let scheme_end = base.find("://").map_or(0, |i| i + 3);
    match base[scheme_end..].find('/') {
        Some(i) => &base[..scheme_end + i],
        None => base,
    }
}

/// Which types get a "×N" badge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BadgePolicy {
    pub count_worthy: BTreeSet<ThreatType>,
}

impl Default for BadgePolicy {
    fn default() -> Self {
        Self {
            count_worthy: [ThreatType::Shahed].into_iter().collect(),
        }
    }
}

impl BadgePolicy {
    pub fn badge_for(&self, track: &Track) -> Option<u32> {
        let count = track.count?;
        (count > 1 && self.count_worthy.contains(&track.threat_type)).then_some(count)
    }
}

/// Zoom-dependent marker dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerSizing {
    pub base_px: f64,

    /// Height / width
    pub aspect: f64,

    /// `(min_zoom, factor)`, highest reached zoom wins
    pub steps: Vec<(f64, f64)>,

    /// Factor below the lowest step
    pub min_factor: f64,
}

impl Default for MarkerSizing {
    fn default() -> Self {
        Self {
            base_px: 34.0,
            aspect: 1.15,
            steps: vec![(5.0, 0.7), (6.0, 0.85), (7.0, 1.0), (9.0, 1.25)],
            min_factor: 0.55,
        }
    }
}

impl MarkerSizing {
    pub fn factor(&self, zoom: f64) -> f64 {
        self.steps
            .iter()
            .filter(|(z, _)| zoom >= *z)
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map_or(self.min_factor, |(_, f)| *f)
    }

    /// `(width, height)` in pixels.
    pub fn size_for_zoom(&self, zoom: f64) -> (f64, f64) {
        let width = (self.base_px * self.factor(zoom)).round();
        (width, (width * self.aspect).round())
    }
}

/// What a marker stands for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MarkerKind {
    Track { threat_type: ThreatType },
    Cluster { dominant_type: ThreatType, freshness: Freshness },
}

/// Everything a platform adapter needs to draw one marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerDescriptor {
    pub id: String,
    pub position: GeoPoint,
    pub icon: IconRef,
    pub badge_count: Option<u32>,
    pub width_px: f64,
    pub height_px: f64,
    #[serde(flatten)]
    pub kind: MarkerKind,
    pub title: String,
    /// Popup body lines
    pub summary: Vec<String>,
}

/// Turns tracks and clusters into marker descriptors.
#[derive(Debug, Clone, Default)]
pub struct MarkerRenderer {
    pub icons: IconTable,
    pub badges: BadgePolicy,
    pub sizing: MarkerSizing,
}

impl MarkerRenderer {
    pub fn new(icons: IconTable, badges: BadgePolicy, sizing: MarkerSizing) -> Self {
        Self { icons, badges, sizing }
    }

    /// Icon for a track. Never fails; unknown types get the default icon.
    pub fn resolve_icon(&self, track: &Track) -> IconRef {
        match track.marker_icon.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => IconRef {
                url: self.icons.url_for(name),
                source: IconSource::Explicit,
            },
            _ => self.icons.for_type(track.threat_type),
        }
    }

    pub fn render_track(&self, track: &Track, zoom: f64) -> MarkerDescriptor {
        let (width_px, height_px) = self.sizing.size_for_zoom(zoom);
        let title = track
            .place
            .clone()
            .unwrap_or_else(|| track.threat_type.display_name().to_string());
        let summary = if track.text.is_empty() {
            Vec::new()
        } else {
            vec![track.text.clone()]
        };
        MarkerDescriptor {
            id: track.id.clone(),
            position: track.position(),
            icon: self.resolve_icon(track),
            badge_count: self.badges.badge_for(track),
            width_px,
            height_px,
            kind: MarkerKind::Track {
                threat_type: track.threat_type,
            },
            title,
            summary,
        }
    }

    pub fn render_cluster(&self, cluster: &Cluster, zoom: f64, now_ms: i64) -> MarkerDescriptor {
        let (width_px, height_px) = self.sizing.size_for_zoom(zoom);
        let summary = cluster
            .type_counts
            .iter()
            .take(SUMMARY_LINES)
            .map(|(t, n)| format!("{} ×{}", t.display_name(), n))
            .collect();
        MarkerDescriptor {
            id: format!("cluster:{}", cluster.cell_key),
            position: GeoPoint::new(cluster.centroid_lat, cluster.centroid_lon),
            icon: self.icons.for_type(cluster.dominant_type),
            badge_count: Some(cluster.member_count as u32),
            width_px,
            height_px,
            kind: MarkerKind::Cluster {
                dominant_type: cluster.dominant_type,
                freshness: Freshness::classify(cluster.latest_timestamp, now_ms),
            },
            title: format!("{} загроз", cluster.member_count),
            summary,
        }
    }

    /// Renders a clustering pass, in output order.
    pub fn render(&self, output: &ClusterOutput, zoom: f64, now_ms: i64) -> Vec<MarkerDescriptor> {
        match output {
            ClusterOutput::Direct(tracks) => tracks.iter().map(|t| self.render_track(t, zoom)).collect(),
            ClusterOutput::Clustered(clusters) => clusters
                .iter()
                .map(|c| self.render_cluster(c, zoom, now_ms))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::CellKey;
    use crate::track::resolve_type;

    #[test]
    fn test_icon_priority() {
        let renderer = MarkerRenderer::default();

        let mut track = Track::new("1", 50.0, 30.0, ThreatType::Raketa);
        let icon = renderer.resolve_icon(&track);
        assert_eq!(icon.url, "https://neptun.in.ua/static/raketa.png");
        assert_eq!(icon.source, IconSource::TypeTable);

        track.marker_icon = Some("kab.png".into());
        let icon = renderer.resolve_icon(&track);
        assert_eq!(icon.url, "https://neptun.in.ua/static/kab.png");
        assert_eq!(icon.source, IconSource::Explicit);

        track.marker_icon = Some("/static/trivoga.png".into());
        assert_eq!(renderer.resolve_icon(&track).url, "https://neptun.in.ua/static/trivoga.png");

        track.marker_icon = Some("https://cdn.example.org/x.png".into());
        assert_eq!(renderer.resolve_icon(&track).url, "https://cdn.example.org/x.png");
    }

    #[test]
    fn test_unknown_type_gets_default_icon() {
        let renderer = MarkerRenderer::default();
        let kind = resolve_type(None, Some("unknown_xyz"));
        let track = Track::new("1", 50.0, 30.0, kind);
        let icon = renderer.resolve_icon(&track);
        assert_eq!(icon.url, "https://neptun.in.ua/static/default.png");
        assert_eq!(icon.source, IconSource::Default);
    }

    #[test]
    fn test_badge_policy() {
        let renderer = MarkerRenderer::default();
        let mut shahed = Track::new("1", 50.0, 30.0, ThreatType::Shahed);
        assert_eq!(renderer.render_track(&shahed, 8.0).badge_count, None);
        shahed.count = Some(1);
        assert_eq!(renderer.render_track(&shahed, 8.0).badge_count, None);
        shahed.count = Some(5);
        assert_eq!(renderer.render_track(&shahed, 8.0).badge_count, Some(5));

        let mut raketa = Track::new("2", 50.0, 30.0, ThreatType::Raketa);
        raketa.count = Some(5);
        assert_eq!(renderer.render_track(&raketa, 8.0).badge_count, None);
    }

    #[test]
    fn test_marker_sizing() {
        let sizing = MarkerSizing::default();
        assert_eq!(sizing.size_for_zoom(4.0), (19.0, 22.0));
        assert_eq!(sizing.size_for_zoom(5.0), (24.0, 28.0));
        assert_eq!(sizing.size_for_zoom(7.5), (34.0, 39.0));
        assert_eq!(sizing.size_for_zoom(12.0), (43.0, 49.0));
    }

    #[test]
    fn test_render_cluster() {
        let renderer = MarkerRenderer::default();
        let cluster = Cluster {
            cell_key: CellKey { row: 91, col: 55 },
            centroid_lat: 50.45,
            centroid_lon: 30.52,
            member_count: 3,
            dominant_type: ThreatType::Shahed,
            latest_timestamp: 1_000,
            type_counts: vec![(ThreatType::Shahed, 2), (ThreatType::Raketa, 1)],
            member_ids: vec!["a".into(), "b".into(), "c".into()],
        };
        let marker = renderer.render_cluster(&cluster, 6.0, 61_000);
        assert_eq!(marker.id, "cluster:91_55");
        assert_eq!(marker.badge_count, Some(3));
        assert_eq!(marker.icon.url, "https://neptun.in.ua/static/shahed.png");
        assert_eq!(marker.summary, vec!["Шахед ×2".to_string(), "Ракета ×1".to_string()]);
        assert_eq!(
            marker.kind,
            MarkerKind::Cluster {
                dominant_type: ThreatType::Shahed,
                freshness: Freshness::Fresh
            }
        );
    }
}
