//! Geodesic zone builder.
//!
//! Sector ("semi-circle") polygons are fans of great-circle destination
//! points around a center. They are used for:
//! - the border-shelling sector (one per frame, facing the hostile border)
//! - the guided-bomb (KAB) cone: three nested rings, a scan ring, a label
//!   anchor and a rotating scan line
//!
//! Approach arcs for `←direction` hints live here too; they are plain
//! lat/lon beziers, not geodesics.

use crate::feed::Trajectory;
use crate::geodesy::{close_ring, destination_point, GeoPoint};
use crate::track::{ThreatType, Track};
use serde::{Deserialize, Serialize};

/// Builds an open sector fan.
///
/// Returns the center followed by `segments + 1` arc points, `segments + 2`
/// points in total. The sweep runs clockwise from `start_bearing` to
/// `end_bearing`; a negative span wraps through north (315 → 135 sweeps
/// through 0 and 90).
pub fn build_semi_circle(
    center: GeoPoint,
    start_bearing: f64,
    end_bearing: f64,
    radius_km: f64,
    segments: usize,
) -> Vec<GeoPoint> {
    let segments = segments.max(1);
    let mut span = end_bearing - start_bearing;
    if span < 0.0 {
        span += 360.0;
    }

    let mut points = Vec::with_capacity(segments + 2);
    points.push(center);
    for i in 0..=segments {
        let bearing = (start_bearing + span * i as f64 / segments as f64).rem_euclid(360.0);
        points.push(destination_point(center, bearing, radius_km));
    }
    points
}

/// What a zone polygon depicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneKind {
    BorderShelling,
    KabOuter,
    KabMid,
    KabInner,
    /// Outline only, no fill
    KabScan,
}

/// A closed sector polygon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoZone {
    pub kind: ZoneKind,
    pub center: GeoPoint,
    pub radius_km: f64,
    pub start_bearing_deg: f64,
    pub end_bearing_deg: f64,

    /// Closed ring: the sector fan with the center repeated at the end
    pub ring_points: Vec<GeoPoint>,
}

impl GeoZone {
    pub fn sector(
        kind: ZoneKind,
        center: GeoPoint,
        radius_km: f64,
        start_bearing_deg: f64,
        end_bearing_deg: f64,
        segments: usize,
    ) -> Self {
        let mut ring_points = build_semi_circle(center, start_bearing_deg, end_bearing_deg, radius_km, segments);
        close_ring(&mut ring_points);
        Self {
            kind,
            center,
            radius_km,
            start_bearing_deg,
            end_bearing_deg,
            ring_points,
        }
    }

    pub fn to_polygon(&self) -> geo::Polygon<f64> {
        let coords: Vec<geo::Coord<f64>> = self.ring_points.iter().map(|p| (*p).into()).collect();
        geo::Polygon::new(geo::LineString::new(coords), vec![])
    }
}

/// Zone geometry parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneConfig {
    pub border_radius_km: f64,
    pub border_segments: usize,
    /// `(start, end)` bearings
    pub border_bearings: (f64, f64),
    /// Bearings used east of `border_east_lon`
    pub border_bearings_east: (f64, f64),
    pub border_east_lon: f64,

    pub kab_radius_km: f64,
    pub kab_segments: usize,
    pub kab_bearings: (f64, f64),
    /// Outer, mid, inner ring radii as fractions of `kab_radius_km`
    pub kab_ring_ratios: [f64; 3],
    pub kab_scan_ratio: f64,
    pub kab_label_bearing: f64,
    pub kab_label_ratio: f64,

    /// Offset in degrees for one cardinal step of a direction hint
    pub hint_offset_deg: f64,
    pub arc_steps: usize,
    pub drone_scale: f64,
    pub missile_scale: f64,
    pub curve_factor: f64,
    /// Curvature multiplier for drones
    pub drone_curve_damping: f64,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            border_radius_km: 120.0,
            border_segments: 80,
            border_bearings: (315.0, 135.0),
            border_bearings_east: (290.0, 110.0),
            border_east_lon: 35.0,

            kab_radius_km: 10.0,
            kab_segments: 96,
            kab_bearings: (180.0, 360.0),
            kab_ring_ratios: [1.0, 0.66, 0.38],
            kab_scan_ratio: 0.92,
            kab_label_bearing: 270.0,
            kab_label_ratio: 0.62,

            hint_offset_deg: 0.25,
            arc_steps: 24,
            drone_scale: 1.4,
            missile_scale: 2.0,
            curve_factor: 0.35,
            drone_curve_damping: 0.8,
        }
    }
}

/// Sector for the first border-shelling track, if any.
pub fn border_shelling_zone(tracks: &[Track], config: &ZoneConfig) -> Option<GeoZone> {
    let track = tracks.iter().find(|t| t.border_shelling)?;
    let (start, end) = if track.lon > config.border_east_lon {
        config.border_bearings_east
    } else {
        config.border_bearings
    };
    Some(GeoZone::sector(
        ZoneKind::BorderShelling,
        track.position(),
        config.border_radius_km,
        start,
        end,
        config.border_segments,
    ))
}

/// Returns true if a track gets a KAB cone.
pub fn is_kab_trigger(track: &Track) -> bool {
    if track.border_shelling {
        return false;
    }
    match track.threat_type {
        ThreatType::Kab => true,
        ThreatType::Raketa => track.mentions_kab(),
        _ => false,
    }
}

/// Line from the cone center to its rim.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanLine {
    pub bearing_deg: f64,
    pub from: GeoPoint,
    pub to: GeoPoint,
    /// Halfway point, end of the fading tail
    pub tail: GeoPoint,
}

/// Scan line at an arbitrary bearing. Pure: the animation just calls this
/// with a new angle each frame.
pub fn scan_line(center: GeoPoint, radius_km: f64, bearing_deg: f64) -> ScanLine {
    let bearing_deg = bearing_deg.rem_euclid(360.0);
    ScanLine {
        bearing_deg,
        from: center,
        to: destination_point(center, bearing_deg, radius_km),
        tail: destination_point(center, bearing_deg, radius_km / 2.0),
    }
}

/// Guided-bomb threat cone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KabCone {
    pub track_id: String,
    pub center: GeoPoint,
    /// Outer, mid, inner
    pub rings: Vec<GeoZone>,
    pub scan: GeoZone,
    /// Where the "КАБ ~N км" label goes
    pub label: GeoPoint,
    pub radius_km: f64,
}

impl KabCone {
    /// Rotor line for an animation angle.
    pub fn rotor(&self, bearing_deg: f64) -> ScanLine {
        scan_line(self.center, self.scan.radius_km, bearing_deg)
    }
}

pub fn kab_cone(track: &Track, config: &ZoneConfig) -> KabCone {
    let center = track.position();
    let (start, end) = config.kab_bearings;
    let r = config.kab_radius_km;

    let kinds = [ZoneKind::KabOuter, ZoneKind::KabMid, ZoneKind::KabInner];
    let rings = kinds
        .iter()
        .zip(config.kab_ring_ratios.iter())
        .map(|(kind, ratio)| GeoZone::sector(*kind, center, r * ratio, start, end, config.kab_segments))
        .collect();

    KabCone {
        track_id: track.id.clone(),
        center,
        rings,
        scan: GeoZone::sector(
            ZoneKind::KabScan,
            center,
            r * config.kab_scan_ratio,
            start,
            end,
            config.kab_segments,
        ),
        label: destination_point(center, config.kab_label_bearing, r * config.kab_label_ratio),
        radius_km: r,
    }
}

/// Cardinal offset `(dlat, dlon)` of the origin named in a direction hint.
///
/// "півд" south, "північ" north, "сход" east, "зах" west; combinations
/// like "півд-сходу" yield a diagonal. Unrecognized hints yield `None`.
pub fn hint_offset(hint: &str, step_deg: f64) -> Option<(f64, f64)> {
    let hint = hint.to_lowercase();
    let mut dlat = 0.0;
    let mut dlon = 0.0;
    if hint.contains("півд") {
        dlat = -step_deg;
    }
    if hint.contains("північ") || hint.contains("півн") {
        dlat = step_deg;
    }
    // The hint names where the threat comes from: "зі сходу" puts the
    // origin east of the track (+lon), not west of it.
    if hint.contains("сход") {
        dlon = step_deg;
    }
    if hint.contains("зах") {
        dlon = -step_deg;
    }
    (dlat != 0.0 || dlon != 0.0).then_some((dlat, dlon))
}

/// Approach visuals for a track with a `←direction` hint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApproachArc {
    pub track_id: String,
    /// Short straight hint from the origin side to the marker
    pub hint_line: [GeoPoint; 2],
    /// Curved flight arc, only for missiles and drones
    pub arc: Option<Trajectory>,
}

/// Builds the approach visuals, or `None` without a usable hint.
pub fn approach_arc(track: &Track, config: &ZoneConfig) -> Option<ApproachArc> {
    let (dlat, dlon) = hint_offset(track.approach_hint()?, config.hint_offset_deg)?;
    let end = track.position();
    let hint_line = [GeoPoint::new(end.lat + dlat, end.lon + dlon), end];

    let arc = track.threat_type.has_trajectory().then(|| {
        let drone = track.threat_type.is_drone();
        let scale = if drone { config.drone_scale } else { config.missile_scale };
        let start = GeoPoint::new(end.lat + dlat * scale, end.lon + dlon * scale);

        // Unit perpendicular of the (dlon, dlat) direction
        let norm = dlat.hypot(dlon);
        let (perp_x, perp_y) = (-dlat / norm, dlon / norm);
        let curve = config.curve_factor * if drone { config.drone_curve_damping } else { 1.0 };
        let control = GeoPoint::new(
            (start.lat + end.lat) / 2.0 + perp_y * curve,
            (start.lon + end.lon) / 2.0 + perp_x * curve,
        );

        let steps = config.arc_steps.max(1);
        let path = (0..=steps)
            .map(|i| {
                let t = i as f64 / steps as f64;
                let u = 1.0 - t;
                GeoPoint::new(
                    u * u * start.lat + 2.0 * u * t * control.lat + t * t * end.lat,
                    u * u * start.lon + 2.0 * u * t * control.lon + t * t * end.lon,
                )
            })
            .collect();
        Trajectory {
            id: track.id.clone(),
            threat_type: track.threat_type,
            path,
        }
    });

    Some(ApproachArc {
        track_id: track.id.clone(),
        hint_line,
        arc,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geodesy::{haversine_km, is_closed};
    use approx::assert_relative_eq;

    #[test]
    fn test_semi_circle_point_count_and_radius() {
        let center = GeoPoint::new(50.45, 30.52);
        for n in [1, 8, 80, 96] {
            let points = build_semi_circle(center, 0.0, 180.0, 25.0, n);
            assert_eq!(points.len(), n + 2);
            assert_eq!(points[0], center);
            for p in &points[1..] {
                assert_relative_eq!(haversine_km(center, *p), 25.0, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_semi_circle_wraps_through_north() {
        let center = GeoPoint::new(50.0, 36.0);
        let points = build_semi_circle(center, 315.0, 135.0, 120.0, 4);
        // Bearings 315, 0, 45, 90, 135
        let mid = points[3];
        assert!(mid.lat > center.lat);
        assert!(mid.lon > center.lon);
        // Last point at 135 is south-east
        let last = points[5];
        assert!(last.lat < center.lat && last.lon > center.lon);
    }

    #[test]
    fn test_semi_circle_deterministic() {
        let center = GeoPoint::new(48.0, 37.8);
        assert_eq!(
            build_semi_circle(center, 180.0, 360.0, 10.0, 96),
            build_semi_circle(center, 180.0, 360.0, 10.0, 96)
        );
    }

    #[test]
    fn test_zone_rings_closed() {
        let zone = GeoZone::sector(ZoneKind::KabOuter, GeoPoint::new(48.0, 37.8), 10.0, 180.0, 360.0, 96);
        assert!(is_closed(&zone.ring_points));
        assert_eq!(zone.ring_points.len(), 96 + 3);
    }

    #[test]
    fn test_border_shelling_zone() {
        let config = ZoneConfig::default();
        let mut west = Track::new("a", 51.5, 33.0, ThreatType::Obstril);
        west.border_shelling = true;
        let mut east = Track::new("b", 50.0, 36.3, ThreatType::Obstril);
        east.border_shelling = true;

        let zone = border_shelling_zone(&[west.clone(), east.clone()], &config).unwrap();
        assert_eq!(zone.center, west.position());
        assert_eq!((zone.start_bearing_deg, zone.end_bearing_deg), (315.0, 135.0));
        assert_eq!(zone.ring_points.len(), 80 + 3);
        assert!(is_closed(&zone.ring_points));

        let zone = border_shelling_zone(&[east], &config).unwrap();
        assert_eq!((zone.start_bearing_deg, zone.end_bearing_deg), (290.0, 110.0));

        assert!(border_shelling_zone(&[Track::new("c", 50.0, 30.0, ThreatType::Shahed)], &config).is_none());
    }

    #[test]
    fn test_kab_trigger() {
        let mut raketa = Track::new("r", 48.0, 37.8, ThreatType::Raketa);
        assert!(!is_kab_trigger(&raketa));
        raketa.text = "Загроза застосування КАБів".into();
        assert!(is_kab_trigger(&raketa));
        raketa.border_shelling = true;
        assert!(!is_kab_trigger(&raketa));
        assert!(is_kab_trigger(&Track::new("k", 48.0, 37.8, ThreatType::Kab)));
    }

    #[test]
    fn test_kab_cone_geometry() {
        let config = ZoneConfig::default();
        let track = Track::new("k", 48.0, 37.8, ThreatType::Kab);
        let cone = kab_cone(&track, &config);

        let radii: Vec<f64> = cone.rings.iter().map(|z| z.radius_km).collect();
        assert_relative_eq!(radii[0], 10.0);
        assert_relative_eq!(radii[1], 6.6);
        assert_relative_eq!(radii[2], 3.8);
        assert_relative_eq!(cone.scan.radius_km, 9.2);
        assert!(cone.rings.iter().all(|z| is_closed(&z.ring_points)));

        // Label due west at 6.2 km
        assert_relative_eq!(haversine_km(cone.center, cone.label), 6.2, epsilon = 1e-6);
        assert!(cone.label.lon < cone.center.lon);
        assert_relative_eq!(cone.label.lat, cone.center.lat, epsilon = 1e-3);
    }

    #[test]
    fn test_scan_line_is_pure() {
        let center = GeoPoint::new(48.0, 37.8);
        let a = scan_line(center, 9.2, 270.0);
        let b = scan_line(center, 9.2, -90.0);
        assert_eq!(a, b);
        assert_relative_eq!(haversine_km(center, a.to), 9.2, epsilon = 1e-6);
        assert_relative_eq!(haversine_km(center, a.tail), 4.6, epsilon = 1e-6);
    }

    #[test]
    fn test_approach_arc() {
        let config = ZoneConfig::default();
        let mut track = Track::new("s", 49.59, 34.55, ThreatType::Shahed);
        track.place = Some("Полтава ←півд-сходу".into());

        let approach = approach_arc(&track, &config).unwrap();
        assert_relative_eq!(approach.hint_line[0].lat, 49.34, epsilon = 1e-9);
        assert_relative_eq!(approach.hint_line[0].lon, 34.80, epsilon = 1e-9);

        let arc = approach.arc.unwrap();
        assert_eq!(arc.path.len(), 25);
        assert_relative_eq!(arc.path[0].lat, 49.59 - 0.25 * 1.4, epsilon = 1e-9);
        assert_relative_eq!(arc.path[0].lon, 34.55 + 0.25 * 1.4, epsilon = 1e-9);
        assert_eq!(*arc.path.last().unwrap(), track.position());

        // No arc for types without trajectories, still a hint line
        track.threat_type = ThreatType::Kab;
        assert!(approach_arc(&track, &config).unwrap().arc.is_none());

        track.place = Some("Полтава".into());
        assert!(approach_arc(&track, &config).is_none());
        track.place = Some("Полтава ←звідкись".into());
        assert!(approach_arc(&track, &config).is_none());
    }

    #[test]
    fn test_hint_offset_places_origin_on_named_side() {
        assert_eq!(hint_offset("←сходу", 0.25), Some((0.0, 0.25)));
        assert_eq!(hint_offset("←заходу", 0.25), Some((0.0, -0.25)));
        assert_eq!(hint_offset("←півночі", 0.25), Some((0.25, 0.0)));
        assert_eq!(hint_offset("←Півд-Заходу", 0.25), Some((-0.25, -0.25)));
        assert_eq!(hint_offset("←звідкись", 0.25), None);
    }
}
