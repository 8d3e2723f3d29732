//! Geo-fences for geo-aware schedules
//!
//! Fences arrive as GeoJSON (`Feature`, `FeatureCollection`, `Polygon` or
//! `MultiPolygon`) with `[longitude, latitude]` coordinates. Membership uses
//! the outer ring of each polygon.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct GeoFence {
    /// Outer rings as (longitude, latitude) points
    rings: Vec<Vec<(f64, f64)>>,
}

impl GeoFence {
    pub fn parse(geojson: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(geojson).ok()?;
        let mut rings = Vec::new();
        collect_rings(&value, &mut rings);
        if rings.is_empty() {
            None
        } else {
            Some(Self { rings })
        }
    }

    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        self.rings
            .iter()
            .any(|ring| point_in_ring(ring, longitude, latitude))
    }
}

fn collect_rings(value: &Value, rings: &mut Vec<Vec<(f64, f64)>>) {
    match value.get("type").and_then(Value::as_str) {
        Some("FeatureCollection") => {
            if let Some(features) = value.get("features").and_then(Value::as_array) {
                for feature in features {
                    collect_rings(feature, rings);
                }
            }
        }
        Some("Feature") => {
            if let Some(geometry) = value.get("geometry") {
                collect_rings(geometry, rings);
            }
        }
        Some("Polygon") => {
            if let Some(ring) = value
                .get("coordinates")
                .and_then(Value::as_array)
                .and_then(|rings| rings.first())
                .and_then(parse_ring)
            {
                rings.push(ring);
            }
        }
        Some("MultiPolygon") => {
            if let Some(polygons) = value.get("coordinates").and_then(Value::as_array) {
                for polygon in polygons {
                    if let Some(ring) = polygon
                        .as_array()
                        .and_then(|rings| rings.first())
                        .and_then(parse_ring)
                    {
                        rings.push(ring);
                    }
                }
            }
        }
        _ => {}
    }
}

fn parse_ring(value: &Value) -> Option<Vec<(f64, f64)>> {
    let points: Vec<(f64, f64)> = value
        .as_array()?
        .iter()
        .filter_map(|p| {
            let p = p.as_array()?;
            Some((p.first()?.as_f64()?, p.get(1)?.as_f64()?))
        })
        .collect();
    if points.len() >= 3 {
        Some(points)
    } else {
        None
    }
}

/// Even-odd ray casting
fn point_in_ring(ring: &[(f64, f64)], x: f64, y: f64) -> bool {
    let mut inside = false;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let (xi, yi) = ring[i];
        let (xj, yj) = ring[j];
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQUARE: &str = r#"{"type":"Feature","geometry":{"type":"Polygon",
        "coordinates":[[[-1.0,50.0],[1.0,50.0],[1.0,52.0],[-1.0,52.0],[-1.0,50.0]]]}}"#;

    #[test]
    fn test_point_inside_and_outside() {
        let fence = GeoFence::parse(SQUARE).unwrap();
        assert!(fence.contains(51.0, 0.0));
        assert!(!fence.contains(53.0, 0.0));
        assert!(!fence.contains(51.0, 2.0));
    }

    #[test]
    fn test_multipolygon_any_ring() {
        let multi = r#"{"type":"MultiPolygon","coordinates":[
            [[[0,0],[1,0],[1,1],[0,1]]],
            [[[10,10],[11,10],[11,11],[10,11]]]]}"#;
        let fence = GeoFence::parse(multi).unwrap();
        assert!(fence.contains(10.5, 10.5));
        assert!(fence.contains(0.5, 0.5));
        assert!(!fence.contains(5.0, 5.0));
    }

    #[test]
    fn test_invalid_geojson() {
        assert!(GeoFence::parse("not json").is_none());
        assert!(GeoFence::parse(r#"{"type":"Point","coordinates":[0,0]}"#).is_none());
    }
}
