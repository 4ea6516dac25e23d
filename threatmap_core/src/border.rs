//! Country border rings and the "outside Ukraine" mask.
//!
//! The mask darkens the whole world except the country. Two equivalent
//! representations are produced:
//! - a single polygon (world rectangle with the border rings as holes) for
//!   renderers with even-odd fill
//! - layers (darken the world, then clear each ring) for renderers that
//!   only support inverse alpha

use crate::error::MapError;
use crate::geodesy::{close_ring, GeoPoint};
use geo::Contains;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tracing::{debug, warn};

/// Latitude limit of the world rectangle (web mercator stops near 85°).
const WORLD_LAT: f64 = 85.0;

/// Simplified border used when the GeoJSON asset is unavailable.
const FALLBACK_BORDER: [[f64; 2]; 39] = [
    [52.37, 23.60], [51.90, 23.60], [51.90, 24.00], [51.50, 24.50], [51.90, 25.30],
    [51.90, 26.00], [51.60, 26.60], [51.50, 27.50], [51.60, 28.20], [51.30, 29.20],
    [51.60, 30.60], [52.30, 31.80], [52.10, 32.70], [52.40, 34.40], [52.30, 35.90],
    [52.00, 37.40], [51.20, 38.20], [50.30, 39.70], [49.10, 40.10], [48.30, 39.70],
    [47.10, 38.50], [46.00, 38.20], [45.35, 37.40], [45.40, 36.60], [45.20, 34.90],
    [45.35, 33.30], [46.07, 30.95], [46.58, 30.06], [47.80, 29.48], [48.37, 28.05],
    [48.47, 27.53], [48.27, 26.86], [47.74, 26.63], [47.85, 24.96], [48.15, 23.53],
    [48.62, 22.57], [49.90, 22.09], [51.94, 22.93], [52.37, 23.60],
];

/// A closed border ring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BorderRing {
    pub points: Vec<GeoPoint>,
}

impl BorderRing {
    /// Builds a ring, closing it if needed.
    pub fn new(mut points: Vec<GeoPoint>) -> Self {
        close_ring(&mut points);
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn to_line_string(&self) -> geo::LineString<f64> {
        self.points.iter().map(|p| geo::Coord::from(*p)).collect()
    }

    pub fn to_polygon(&self) -> geo::Polygon<f64> {
        geo::Polygon::new(self.to_line_string(), vec![])
    }
}

/// The hardcoded simplified border.
pub fn fallback_ring() -> BorderRing {
    BorderRing::new(
        FALLBACK_BORDER
            .iter()
            .map(|[lat, lon]| GeoPoint::new(*lat, *lon))
            .collect(),
    )
}

/// Closed world rectangle, clockwise from the north-west corner.
pub fn world_ring() -> Vec<GeoPoint> {
    let mut ring = vec![
        GeoPoint::new(WORLD_LAT, -180.0),
        GeoPoint::new(WORLD_LAT, 180.0),
        GeoPoint::new(-WORLD_LAT, 180.0),
        GeoPoint::new(-WORLD_LAT, -180.0),
    ];
    close_ring(&mut ring);
    ring
}

/// Extracts outer border rings from GeoJSON.
///
/// Accepts a FeatureCollection, a single Feature or a bare geometry.
/// Polygons contribute their outer ring; MultiPolygons contribute the
/// outer ring with the most points (the mainland, not islands).
/// Positions are `[lon, lat]` per GeoJSON.
pub fn parse_border_geojson(json: &str) -> Result<Vec<BorderRing>, MapError> {
    let root: Value = serde_json::from_str(json)?;

    let geometries: Vec<&Value> = match root.get("type").and_then(Value::as_str) {
        Some("FeatureCollection") => root
            .get("features")
            .and_then(Value::as_array)
            .ok_or_else(|| MapError::border("FeatureCollection without features"))?
            .iter()
            .filter_map(|f| f.get("geometry"))
            .collect(),
        Some("Feature") => root.get("geometry").into_iter().collect(),
        Some(_) => vec![&root],
        None => return Err(MapError::border("missing GeoJSON type")),
    };

    let rings: Vec<BorderRing> = geometries.into_iter().filter_map(outer_ring).collect();
    if rings.is_empty() {
        return Err(MapError::border("no polygon rings found"));
    }
    Ok(rings)
}

fn outer_ring(geometry: &Value) -> Option<BorderRing> {
    let coords = geometry.get("coordinates")?;
    let positions = match geometry.get("type")?.as_str()? {
        "Polygon" => coords.get(0)?.as_array()?,
        "MultiPolygon" => coords
            .as_array()?
            .iter()
            .filter_map(|poly| poly.get(0)?.as_array())
            // First of equally long rings wins
            .fold(None::<&Vec<Value>>, |best, ring| match best {
                Some(b) if b.len() >= ring.len() => Some(b),
                _ => Some(ring),
            })?,
        _ => return None,
    };

    let points: Vec<GeoPoint> = positions
        .iter()
        .filter_map(|pos| {
            let pair = pos.as_array()?;
            let lon = pair.first()?.as_f64()?;
            let lat = pair.get(1)?.as_f64()?;
            Some(GeoPoint::new(lat, lon))
        })
        .filter(GeoPoint::is_finite)
        .collect();

    // A ring needs three distinct corners
    (points.len() >= 3).then(|| BorderRing::new(points))
}

/// How a mask layer is filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskFill {
    Darken,
    /// Punch a hole into what was drawn before
    Clear,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskLayer {
    pub fill: MaskFill,
    pub ring: Vec<GeoPoint>,
}

/// World mask with the country cut out.
#[derive(Debug, Clone, PartialEq)]
pub struct BorderMask {
    rings: Vec<BorderRing>,
    is_fallback: bool,
}

impl BorderMask {
    pub fn from_rings(rings: Vec<BorderRing>) -> Self {
        Self {
            rings,
            is_fallback: false,
        }
    }

    pub fn fallback() -> Self {
        Self {
            rings: vec![fallback_ring()],
            is_fallback: true,
        }
    }

    pub fn from_geojson(json: &str) -> Result<Self, MapError> {
        Ok(Self::from_rings(parse_border_geojson(json)?))
    }

    /// Parses the asset, falling back to the simplified border on any error.
    pub fn from_geojson_or_fallback(json: Option<&str>) -> Self {
        let Some(json) = json else {
            warn!("border asset missing, using fallback ring");
            return Self::fallback();
        };
        match Self::from_geojson(json) {
            Ok(mask) => {
                debug!(rings = mask.rings.len(), "border mask loaded");
                mask
            }
            Err(e) => {
                warn!(error = %e, "border asset unusable, using fallback ring");
                Self::fallback()
            }
        }
    }

    /// Loads the asset from disk, falling back on any error.
    pub fn load_or_fallback(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_geojson_or_fallback(Some(&text)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read border asset");
                Self::fallback()
            }
        }
    }

    pub fn rings(&self) -> &[BorderRing] {
        &self.rings
    }

    pub fn is_fallback(&self) -> bool {
        self.is_fallback
    }

    /// World rectangle with the border rings as holes.
    pub fn to_polygon(&self) -> geo::Polygon<f64> {
        let world: geo::LineString<f64> = world_ring().into_iter().map(geo::Coord::from).collect();
        let holes = self.rings.iter().map(BorderRing::to_line_string).collect();
        geo::Polygon::new(world, holes)
    }

    /// Darken the world, then clear each country ring.
    pub fn layers(&self) -> Vec<MaskLayer> {
        std::iter::once(MaskLayer {
            fill: MaskFill::Darken,
            ring: world_ring(),
        })
        .chain(self.rings.iter().map(|r| MaskLayer {
            fill: MaskFill::Clear,
            ring: r.points.clone(),
        }))
        .collect()
    }

    /// Returns true if the point lies inside the country.
    pub fn contains(&self, p: GeoPoint) -> bool {
        let point = geo::Point::new(p.lon, p.lat);
        self.rings.iter().any(|r| r.to_polygon().contains(&point))
    }
}

impl Default for BorderMask {
    fn default() -> Self {
        Self::fallback()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geodesy::is_closed;

    const KYIV: GeoPoint = GeoPoint::new(50.45, 30.52);
    const MINSK: GeoPoint = GeoPoint::new(53.90, 27.56);

    #[test]
    fn test_fallback_ring() {
        let ring = fallback_ring();
        assert_eq!(ring.len(), 39);
        assert!(is_closed(&ring.points));

        let mask = BorderMask::fallback();
        assert!(mask.contains(KYIV));
        assert!(!mask.contains(MINSK));
    }

    #[test]
    fn test_parse_polygon_forces_closure() {
        let json = r#"{"type": "Polygon", "coordinates": [[[30, 50], [31, 50], [31, 51], [30, 51]]]}"#;
        let rings = parse_border_geojson(json).unwrap();
        assert_eq!(rings.len(), 1);
        assert_eq!(rings[0].len(), 5);
        assert!(is_closed(&rings[0].points));
        // [lon, lat] order
        assert_eq!(rings[0].points[1], GeoPoint::new(50.0, 31.0));
    }

    #[test]
    fn test_parse_multipolygon_picks_largest() {
        let json = r#"{
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": {"name": "Ukraine"},
                "geometry": {
                    "type": "MultiPolygon",
                    "coordinates": [
                        [[[33.0, 45.0], [33.1, 45.0], [33.1, 45.1], [33.0, 45.0]]],
                        [[[22.0, 48.0], [40.0, 48.0], [40.0, 52.0], [30.0, 52.5], [22.0, 52.0], [22.0, 48.0]]]
                    ]
                }
            }]
        }"#;
        let rings = parse_border_geojson(json).unwrap();
        assert_eq!(rings.len(), 1);
        assert_eq!(rings[0].len(), 6);

        let mask = BorderMask::from_geojson(json).unwrap();
        assert!(!mask.is_fallback());
        assert!(mask.contains(KYIV));
    }

    #[test]
    fn test_bad_asset_falls_back() {
        for json in [None, Some("not json"), Some(r#"{"type": "Point", "coordinates": [30, 50]}"#), Some("{}")] {
            let mask = BorderMask::from_geojson_or_fallback(json);
            assert!(mask.is_fallback());
            assert!(mask.contains(KYIV));
        }
        assert!(BorderMask::load_or_fallback("/nonexistent/ukraine.geojson").is_fallback());
    }

    #[test]
    fn test_mask_representations() {
        let mask = BorderMask::fallback();

        let polygon = mask.to_polygon();
        assert_eq!(polygon.interiors().len(), 1);
        // Inside the world but outside the country is darkened
        assert!(polygon.contains(&geo::Point::new(MINSK.lon, MINSK.lat)));
        assert!(!polygon.contains(&geo::Point::new(KYIV.lon, KYIV.lat)));

        let layers = mask.layers();
        assert_eq!(layers.len(), 2);
        assert_eq!(layers[0].fill, MaskFill::Darken);
        assert_eq!(layers[1].fill, MaskFill::Clear);
        assert!(layers.iter().all(|l| is_closed(&l.ring)));
    }
}
