//! Normalizes the flexible GeoJSON inputs accepted at the public boundary.
//!
//! An AOI or extract may arrive as a path to a file on disk, a raw GeoJSON
//! string, a parsed JSON value, or an already-built feature collection. All
//! of these funnel into a [`geojson::FeatureCollection`].

use crate::error::{Result, SplitterError};
use geo_types::{Geometry, Polygon};
use geojson::{Feature, FeatureCollection, GeoJson};
use std::path::Path;
use std::str::FromStr;

// Strings longer than this are never probed as filesystem paths.
const MAX_PATH_PROBE_LEN: usize = 256;

/// Reads a boundary or extract argument that is either a file path or an
/// inline GeoJSON string.
///
/// A short string naming an existing file is read from disk; anything else
/// is parsed directly. A file that exists but does not hold valid JSON is
/// an I/O-class error, while a non-file string that fails to parse is a
/// GeoJSON error.
pub fn read_geojson(input: &str) -> Result<FeatureCollection> {
    let trimmed = input.trim();
    if trimmed.len() < MAX_PATH_PROBE_LEN && Path::new(trimmed).is_file() {
        let contents = std::fs::read_to_string(trimmed)?;
        let value: serde_json::Value = serde_json::from_str(&contents)?;
        return featcol_from_value(&value);
    }

    let geojson = GeoJson::from_str(trimmed)?;
    Ok(normalize(geojson))
}

/// Builds a feature collection from an already-parsed JSON value.
pub fn featcol_from_value(value: &serde_json::Value) -> Result<FeatureCollection> {
    let geojson = GeoJson::from_json_value(value.clone())?;
    Ok(normalize(geojson))
}

/// Wraps a bare geometry or feature into a one-feature collection.
pub fn normalize(geojson: GeoJson) -> FeatureCollection {
    match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        GeoJson::Feature(feature) => FeatureCollection {
            bbox: None,
            features: vec![feature],
            foreign_members: None,
        },
        GeoJson::Geometry(geometry) => FeatureCollection {
            bbox: None,
            features: vec![Feature {
                bbox: None,
                geometry: Some(geometry),
                id: None,
                properties: None,
                foreign_members: None,
            }],
            foreign_members: None,
        },
    }
}

/// Extracts the single AOI polygon from a normalized collection.
///
/// The engine splits exactly one geometry per invocation. Zero features or
/// more than one feature is an input error; multi-feature collections are
/// recursed over by the caller instead. A one-part MultiPolygon is
/// unwrapped, a multi-part one is rejected.
pub fn single_polygon(featcol: &FeatureCollection) -> Result<Polygon<f64>> {
    if featcol.features.is_empty() {
        return Err(SplitterError::InvalidInput(
            "no geometry in input feature collection".to_string(),
        ));
    }
    if featcol.features.len() > 1 {
        return Err(SplitterError::InvalidInput(format!(
            "expected exactly one geometry, got {}; split each sub-geometry separately",
            featcol.features.len()
        )));
    }

    let feature = &featcol.features[0];
    let geometry = feature.geometry.as_ref().ok_or_else(|| {
        SplitterError::InvalidInput("feature carries no geometry".to_string())
    })?;

    match Geometry::<f64>::try_from(geometry.value.clone())? {
        Geometry::Polygon(polygon) => Ok(polygon),
        Geometry::MultiPolygon(multi) if multi.0.len() == 1 => {
            Ok(multi.0.into_iter().next().unwrap())
        }
        Geometry::MultiPolygon(multi) => Err(SplitterError::InvalidInput(format!(
            "multi-part geometry with {} parts; split each part separately",
            multi.0.len()
        ))),
        other => Err(SplitterError::InvalidInput(format!(
            "expected a polygon AOI, got {}",
            geometry_kind(&other)
        ))),
    }
}

fn geometry_kind(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNIT_SQUARE: &str = r#"{"type":"Polygon","coordinates":[[[0.0,0.0],[1.0,0.0],[1.0,1.0],[0.0,1.0],[0.0,0.0]]]}"#;

    #[test]
    fn test_bare_geometry_is_wrapped() {
        let featcol = read_geojson(UNIT_SQUARE).unwrap();
        assert_eq!(featcol.features.len(), 1);
        single_polygon(&featcol).unwrap();
    }

    #[test]
    fn test_feature_is_wrapped() {
        let input = format!(
            r#"{{"type":"Feature","properties":{{}},"geometry":{}}}"#,
            UNIT_SQUARE
        );
        let featcol = read_geojson(&input).unwrap();
        assert_eq!(featcol.features.len(), 1);
    }

    #[test]
    fn test_empty_collection_is_rejected() {
        let featcol = read_geojson(r#"{"type":"FeatureCollection","features":[]}"#).unwrap();
        let err = single_polygon(&featcol).unwrap_err();
        assert!(matches!(err, SplitterError::InvalidInput(_)));
    }

    #[test]
    fn test_multiple_features_are_rejected() {
        let input = format!(
            r#"{{"type":"FeatureCollection","features":[
                {{"type":"Feature","properties":{{}},"geometry":{}}},
                {{"type":"Feature","properties":{{}},"geometry":{}}}
            ]}}"#,
            UNIT_SQUARE, UNIT_SQUARE
        );
        let featcol = read_geojson(&input).unwrap();
        assert!(matches!(
            single_polygon(&featcol),
            Err(SplitterError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_single_part_multipolygon_unwraps() {
        let input = r#"{"type":"MultiPolygon","coordinates":[[[[0.0,0.0],[1.0,0.0],[1.0,1.0],[0.0,1.0],[0.0,0.0]]]]}"#;
        let featcol = read_geojson(input).unwrap();
        single_polygon(&featcol).unwrap();
    }

    #[test]
    fn test_multi_part_multipolygon_rejected() {
        let input = r#"{"type":"MultiPolygon","coordinates":[
            [[[0.0,0.0],[1.0,0.0],[1.0,1.0],[0.0,1.0],[0.0,0.0]]],
            [[[2.0,2.0],[3.0,2.0],[3.0,3.0],[2.0,3.0],[2.0,2.0]]]
        ]}"#;
        let featcol = read_geojson(input).unwrap();
        assert!(matches!(
            single_polygon(&featcol),
            Err(SplitterError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_file_path_input() {
        let path = std::env::temp_dir().join("area_splitter_parse_test.geojson");
        std::fs::write(&path, UNIT_SQUARE).unwrap();
        let featcol = read_geojson(path.to_str().unwrap()).unwrap();
        assert_eq!(featcol.features.len(), 1);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_existing_file_with_bad_json_is_io_class() {
        let path = std::env::temp_dir().join("area_splitter_parse_bad.geojson");
        std::fs::write(&path, "not json at all").unwrap();
        let err = read_geojson(path.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, SplitterError::Json(_)));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_point_aoi_rejected() {
        let featcol = read_geojson(r#"{"type":"Point","coordinates":[0.0,0.0]}"#).unwrap();
        assert!(matches!(
            single_polygon(&featcol),
            Err(SplitterError::InvalidInput(_))
        ));
    }
}
