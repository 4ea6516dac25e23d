//! Frame rendering pipeline.
//!
//! Snapshot → clusterer → marker renderer, plus the per-track zone
//! triggers. The output [`RenderFrame`] is plain data; platform adapters
//! only draw it.

use crate::border::BorderMask;
use crate::cluster::{ClusterOutput, SpatialClusterer};
use crate::config::MapConfig;
use crate::feed::{NormalizeStats, Normalized, Trajectory};
use crate::icon_cache::IconCache;
use crate::icons::{IconRef, MarkerDescriptor, MarkerRenderer};
use crate::track::{ThreatType, Track};
use crate::zones::{approach_arc, border_shelling_zone, is_kab_trigger, kab_cone, ApproachArc, GeoZone, KabCone, ZoneConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use threatmap_env::IconFetcher;
use tracing::debug;

/// One normalized feed response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackSnapshot {
    pub tracks: Vec<Track>,
    pub trajectories: Vec<Trajectory>,
    pub stats: NormalizeStats,

    /// Wall clock at fetch time, unix ms
    pub fetched_at_ms: i64,

    /// Increments with every successful fetch; 0 before the first one
    pub generation: u64,
}

impl TrackSnapshot {
    pub fn from_normalized(normalized: Normalized, fetched_at_ms: i64, generation: u64) -> Self {
        Self {
            tracks: normalized.tracks,
            trajectories: normalized.trajectories,
            stats: normalized.stats,
            fetched_at_ms,
            generation,
        }
    }
}

/// Everything drawn for one snapshot at one zoom level.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderFrame {
    pub generation: u64,
    pub zoom: f64,
    pub clustered: bool,
    pub markers: Vec<MarkerDescriptor>,
    pub border_zone: Option<GeoZone>,
    pub kab_cones: Vec<KabCone>,
    pub approaches: Vec<ApproachArc>,
    /// Backend-reported flight paths
    pub trajectories: Vec<Trajectory>,
}

impl RenderFrame {
    /// Distinct icon URLs used by the markers.
    pub fn icon_urls(&self) -> BTreeSet<String> {
        self.markers.iter().map(|m| m.icon.url.clone()).collect()
    }
}

/// Owns the render engines and the scoped caches.
///
/// Created per map view and dropped with it; nothing here is global.
pub struct MapRenderer<F: IconFetcher> {
    pub markers: MarkerRenderer,
    pub clusterer: SpatialClusterer,
    pub zones: ZoneConfig,
    mask: BorderMask,
    icons: Arc<IconCache<F>>,
}

impl<F: IconFetcher> MapRenderer<F> {
    pub fn new(
        markers: MarkerRenderer,
        clusterer: SpatialClusterer,
        zones: ZoneConfig,
        mask: BorderMask,
        fetcher: Arc<F>,
    ) -> Self {
        Self {
            markers,
            clusterer,
            zones,
            mask,
            icons: Arc::new(IconCache::new(fetcher)),
        }
    }

    /// Builds a renderer from configuration, loading the border asset
    /// (or the fallback ring).
    pub fn from_config(config: &MapConfig, fetcher: Arc<F>) -> Self {
        let mask = match &config.border_asset {
            Some(path) => BorderMask::load_or_fallback(path),
            None => BorderMask::fallback(),
        };
        Self::new(
            MarkerRenderer::new(config.icons.clone(), config.badges.clone(), config.sizing.clone()),
            SpatialClusterer::new(config.cluster.clone()),
            config.zones.clone(),
            mask,
            fetcher,
        )
    }

    pub fn mask(&self) -> &BorderMask {
        &self.mask
    }

    pub fn icon_cache(&self) -> Arc<IconCache<F>> {
        Arc::clone(&self.icons)
    }

    /// Renders a snapshot. `now_ms` (unix ms) drives cluster freshness.
    pub fn render(&self, snapshot: &TrackSnapshot, zoom: f64, now_ms: i64) -> RenderFrame {
        let output = self.clusterer.cluster(&snapshot.tracks, zoom);
        let markers = self.markers.render(&output, zoom, now_ms);

        // Zone overlays only make sense next to individual markers
        let (border_zone, kab_cones, approaches) = match &output {
            ClusterOutput::Direct(tracks) => (
                border_shelling_zone(tracks, &self.zones),
                tracks
                    .iter()
                    .filter(|t| is_kab_trigger(t))
                    .map(|t| kab_cone(t, &self.zones))
                    .collect(),
                tracks
                    .iter()
                    .filter_map(|t| approach_arc(t, &self.zones))
                    .collect(),
            ),
            ClusterOutput::Clustered(_) => (None, Vec::new(), Vec::new()),
        };

        debug!(
            generation = snapshot.generation,
            zoom,
            markers = markers.len(),
            clustered = output.is_clustered(),
            "frame rendered"
        );

        RenderFrame {
            generation: snapshot.generation,
            zoom,
            clustered: output.is_clustered(),
            markers,
            border_zone,
            kab_cones,
            approaches,
            trajectories: snapshot.trajectories.clone(),
        }
    }

    /// Icon URLs in `frame` that have not been fetched yet.
    pub fn missing_icons(&self, frame: &RenderFrame) -> Vec<String> {
        frame
            .icon_urls()
            .into_iter()
            .filter(|url| !self.icons.is_resolved(url))
            .collect()
    }

    /// Fetches every icon of the frame. Failures become fallbacks.
    pub async fn warm_icons(&self, frame: &RenderFrame) {
        for url in self.missing_icons(frame) {
            self.icons.get(&url).await;
        }
    }

    /// Icon for drawing now: the loaded image if ready, otherwise the
    /// default icon reference.
    pub fn drawable_icon(&self, icon: &IconRef) -> IconRef {
        if self.icons.peek(&icon.url).is_loaded() {
            icon.clone()
        } else {
            self.markers.icons.for_type(ThreatType::Other)
        }
    }
}

impl<F: IconFetcher> Drop for MapRenderer<F> {
    fn drop(&mut self) {
        self.icons.close();
    }
}
