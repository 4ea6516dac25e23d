//! Threat Map Core - platform-independent engine of the alarm map
//!
//! Every client (mobile, web) shares the same pipeline:
//! 1. **Feed Normalizer**: heterogeneous `/data` payloads → canonical tracks
//! 2. **Spatial Clusterer**: grid buckets above the direct-marker threshold
//! 3. **Marker Renderer**: tracks and clusters → icon, badge, size
//! 4. **Zone Builder**: geodesic sectors, KAB cones, the country mask
//! 5. **Refresh Scheduler**: polling, push-driven refetch, zoom debounce
//!
//! The engines are pure functions over plain data. I/O goes through the
//! `threatmap_env` traits so the scheduler runs the same way against a
//! live backend and under a paused clock.

pub mod border;
pub mod cluster;
pub mod config;
pub mod error;
pub mod feed;
pub mod geodesy;
pub mod icon_cache;
pub mod icons;
pub mod render;
pub mod scheduler;
pub mod search;
pub mod track;
pub mod zones;

// Re-export key types for convenience
pub use border::{BorderMask, BorderRing};
pub use cluster::{cluster, Cluster, ClusterConfig, ClusterOutput, SpatialClusterer};
pub use config::MapConfig;
pub use error::MapError;
pub use feed::{normalize, FeedNormalizer, NormalizeStats, Normalized, Trajectory};
pub use geodesy::GeoPoint;
pub use icon_cache::{IconCache, IconImage};
pub use icons::{IconRef, MarkerDescriptor, MarkerRenderer};
pub use render::{MapRenderer, RenderFrame, TrackSnapshot};
pub use scheduler::{RefreshCycle, RefreshScheduler, SchedulerConfig, SchedulerHandle, ViewState};
pub use search::{SearchHistory, SearchOutcome};
pub use track::{resolve_type, ThreatType, Track};
pub use zones::{build_semi_circle, GeoZone, KabCone, ZoneConfig};
