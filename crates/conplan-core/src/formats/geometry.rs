//! Unit geometry documents.
//!
//! ```json
//! { "crs": "EPSG:6933",
//!   "units": [ { "id": 1, "polygons": [ [ [0,0], [1,0], [1,1], [0,1], [0,0] ] ] } ] }
//! ```
//!
//! `polygons` holds polygons, each a list of rings (first ring exterior,
//! the rest holes), each ring a list of `[x, y]` pairs in projected units.

use crate::{ConplanError, UnitId};
use geo::{Coord, LineString, MultiPolygon, Polygon};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One unit's raw rings as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitGeometry {
    /// Unit identifier.
    pub id: UnitId,
    /// Polygons as lists of rings.
    pub polygons: Vec<Vec<Vec<[f64; 2]>>>,
}

impl UnitGeometry {
    /// Build the `geo` multipolygon for this unit.
    pub fn to_multi_polygon(&self) -> Result<MultiPolygon<f64>, ConplanError> {
        let mut polygons = Vec::with_capacity(self.polygons.len());
        for rings in &self.polygons {
            let mut rings = rings.iter().map(|ring| {
                LineString::from(
                    ring.iter()
                        .map(|[x, y]| Coord { x: *x, y: *y })
                        .collect::<Vec<_>>(),
                )
            });
            let exterior = rings.next().ok_or_else(|| {
                ConplanError::Geometry(format!("Unit {} has a polygon without rings", self.id))
            })?;
            polygons.push(Polygon::new(exterior, rings.collect()));
        }
        Ok(MultiPolygon::new(polygons))
    }
}

/// A set of unit geometries in one coordinate reference system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryDocument {
    /// Label of the (projected, equal-area) coordinate reference system.
    pub crs: String,
    /// Unit geometries.
    pub units: Vec<UnitGeometry>,
}

impl GeometryDocument {
    /// Parse a geometry document from JSON text.
    pub fn parse(text: &str) -> Result<Self, ConplanError> {
        serde_json::from_str(text)
            .map_err(|e| ConplanError::Format(format!("Invalid geometry document: {}", e)))
    }
}

/// Read a geometry document from disk.
pub fn read_geometry(path: impl AsRef<Path>) -> Result<GeometryDocument, ConplanError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|e| ConplanError::Io(format!("Cannot read '{}': {}", path.display(), e)))?;
    GeometryDocument::parse(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Area;

    #[test]
    fn parses_document_and_builds_polygons() {
        let doc = GeometryDocument::parse(
            r#"{"crs":"EPSG:6933","units":[{"id":4,"polygons":[[[[0,0],[2,0],[2,2],[0,2],[0,0]]]]}]}"#,
        )
        .expect("parse");
        assert_eq!(doc.crs, "EPSG:6933");
        let mp = doc.units[0].to_multi_polygon().expect("polygon");
        assert!((mp.unsigned_area() - 4.0).abs() < 1e-12);
    }

    #[test]
    fn empty_polygon_is_a_geometry_error() {
        let unit = UnitGeometry {
            id: UnitId(1),
            polygons: vec![vec![]],
        };
        assert!(matches!(
            unit.to_multi_polygon(),
            Err(ConplanError::Geometry(_))
        ));
    }

    #[test]
    fn malformed_json_is_a_format_error() {
        assert!(matches!(
            GeometryDocument::parse("{\"units\": 3}"),
            Err(ConplanError::Format(_))
        ));
    }
}
