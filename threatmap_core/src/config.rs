//! Aggregated configuration.
//!
//! Every section has defaults matching the production clients; a JSON file
//! only needs to name the values it overrides:
//!
//! ```json
//! { "cluster": { "max_direct_markers": 400 }, "scheduler": { "refresh_interval_ms": 60000 } }
//! ```

use crate::cluster::ClusterConfig;
use crate::error::MapError;
use crate::feed::FeedNormalizer;
use crate::geodesy::GeoBounds;
use crate::icons::{BadgePolicy, IconTable, MarkerSizing};
use crate::scheduler::SchedulerConfig;
use crate::track::ThreatType;
use crate::zones::ZoneConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    /// Accepted track region
    pub bounds: GeoBounds,

    /// Client-side type filter
    pub type_filter: Option<ThreatType>,

    pub cluster: ClusterConfig,
    pub icons: IconTable,
    pub badges: BadgePolicy,
    pub sizing: MarkerSizing,
    pub zones: ZoneConfig,
    pub scheduler: SchedulerConfig,

    /// GeoJSON country border; the fallback ring is used when absent
    pub border_asset: Option<PathBuf>,
}

impl MapConfig {
    pub fn from_json_str(json: &str) -> Result<Self, MapError> {
        let config: MapConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, MapError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Rejects values that would make the engines misbehave.
    pub fn validate(&self) -> Result<(), MapError> {
        let b = &self.bounds;
        if !(b.min_lat < b.max_lat && b.min_lon < b.max_lon) {
            return Err(MapError::config("bounds are empty"));
        }
        if !(self.cluster.base_cell_deg > 0.0) || self.cluster.zoom_steps.iter().any(|s| !(s.cell_deg > 0.0)) {
            return Err(MapError::config("cell sizes must be positive"));
        }
        if self.scheduler.refresh_interval_ms == 0 {
            return Err(MapError::config("refresh_interval_ms must be positive"));
        }
        if !(self.zones.border_radius_km > 0.0 && self.zones.kab_radius_km > 0.0) {
            return Err(MapError::config("zone radii must be positive"));
        }
        if self.icons.static_base.trim().is_empty() {
            return Err(MapError::config("icons.static_base is empty"));
        }
        Ok(())
    }

    pub fn normalizer(&self) -> FeedNormalizer {
        FeedNormalizer::new(self.bounds).with_type_filter(self.type_filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MapConfig::default();
        assert_eq!(config.cluster.max_direct_markers, 650);
        assert_eq!(config.scheduler.refresh_interval_ms, 10_000);
        assert_eq!(config.scheduler.zoom_debounce_ms, 180);
        assert!(config.badges.count_worthy.contains(&ThreatType::Shahed));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_override() {
        let config = MapConfig::from_json_str(
            r#"{"cluster": {"max_direct_markers": 400}, "scheduler": {"refresh_interval_ms": 60000}, "type_filter": "kab"}"#,
        )
        .unwrap();
        assert_eq!(config.cluster.max_direct_markers, 400);
        assert_eq!(config.cluster.base_cell_deg, 0.55);
        assert_eq!(config.scheduler.refresh_interval_ms, 60_000);
        assert_eq!(config.scheduler.zoom_debounce_ms, 180);
        assert_eq!(config.type_filter, Some(ThreatType::Kab));
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            MapConfig::from_json_str(r#"{"scheduler": {"refresh_interval_ms": 0}}"#),
            Err(MapError::Config(_))
        ));
        assert!(matches!(MapConfig::from_json_str("{"), Err(MapError::Json(_))));
        assert!(matches!(MapConfig::load("/nonexistent/map.json"), Err(MapError::Io(_))));
    }
}
