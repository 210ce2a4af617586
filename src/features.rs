//! Feature-boundary splitting: purely geometric polygonization of
//! caller-supplied features, clipped to the AOI. No building-density or
//! road-alignment reasoning happens here.

use crate::error::{Result, SplitterError};
use geo::{BooleanOps, GeodesicArea, unary_union};
use geo_types::{Geometry, LineString, MultiPolygon, Polygon};
use geojson::FeatureCollection;
use log::{debug, warn};

/// Splits the AOI along the supplied features.
///
/// Polygons and multi-polygons are used directly; a closed line ring
/// becomes a polygon. Open linework cannot contribute a polygon component
/// to the union and is skipped, as is every other geometry type, with a
/// warning rather than an error. The union of everything accepted is
/// clipped to the AOI and each polygon component of the result becomes one
/// task.
pub fn split_polygon(
    aoi: &Polygon<f64>,
    features: &FeatureCollection,
) -> Vec<Polygon<f64>> {
    let mut accepted: Vec<Polygon<f64>> = Vec::new();

    for feature in &features.features {
        let Some(geometry) = feature.geometry.as_ref() else {
            warn!("dropping feature without geometry");
            continue;
        };
        let Ok(geom) = Geometry::<f64>::try_from(geometry.value.clone()) else {
            warn!("dropping feature with unconvertible geometry");
            continue;
        };
        match geom {
            Geometry::Polygon(polygon) => accepted.push(polygon),
            Geometry::MultiPolygon(multi) => accepted.extend(multi.0),
            Geometry::LineString(line) => accept_ring(line, &mut accepted),
            Geometry::MultiLineString(multi) => {
                for line in multi.0 {
                    accept_ring(line, &mut accepted);
                }
            }
            other => {
                warn!("dropping unsupported geometry type {} from split features", kind(&other));
            }
        }
    }

    if accepted.is_empty() {
        return Vec::new();
    }

    let union: MultiPolygon<f64> = unary_union(accepted.iter());
    let clipped = union.intersection(aoi);

    let tasks: Vec<Polygon<f64>> = clipped
        .0
        .into_iter()
        .filter(|polygon| polygon.geodesic_area_unsigned() > 0.0)
        .collect();
    debug!("feature split produced {} task polygons", tasks.len());
    tasks
}

/// Splitting along the rows of a database table is declared by the CLI
/// (`PG:` sources) but not built.
pub fn split_by_db_table(_dburl: &str, _table: &str) -> Result<Vec<Polygon<f64>>> {
    Err(SplitterError::Unimplemented(
        "splitting by database table source",
    ))
}

fn accept_ring(line: LineString<f64>, accepted: &mut Vec<Polygon<f64>>) {
    if line.is_closed() && line.0.len() >= 4 {
        accepted.push(Polygon::new(line, vec![]));
    } else {
        warn!("dropping open linestring; only closed rings polygonize");
    }
}

fn kind(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        _ => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;
    use geo_types::{Coord, Rect};

    fn unit_square() -> Polygon<f64> {
        Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 1.0, y: 1.0 }).to_polygon()
    }

    #[test]
    fn test_point_is_dropped_polygon_is_kept() {
        let features = parse::read_geojson(
            r#"{"type":"FeatureCollection","features":[
                {"type":"Feature","properties":{},
                 "geometry":{"type":"Polygon","coordinates":[[[0.2,0.2],[0.8,0.2],[0.8,0.8],[0.2,0.8],[0.2,0.2]]]}},
                {"type":"Feature","properties":{},
                 "geometry":{"type":"Point","coordinates":[0.5,0.5]}}
            ]}"#,
        )
        .unwrap();

        let tasks = split_polygon(&unit_square(), &features);
        assert_eq!(tasks.len(), 1);
    }

    #[test]
    fn test_result_is_clipped_to_aoi() {
        // The polygon extends past the AOI on two sides.
        let features = parse::read_geojson(
            r#"{"type":"Polygon","coordinates":[[[0.5,0.5],[2.0,0.5],[2.0,2.0],[0.5,2.0],[0.5,0.5]]]}"#,
        )
        .unwrap();

        let tasks = split_polygon(&unit_square(), &features);
        assert_eq!(tasks.len(), 1);

        let expected = Rect::new(Coord { x: 0.5, y: 0.5 }, Coord { x: 1.0, y: 1.0 })
            .to_polygon()
            .geodesic_area_unsigned();
        let got = tasks[0].geodesic_area_unsigned();
        assert!((got - expected).abs() / expected < 1e-6);
    }

    #[test]
    fn test_closed_ring_polygonizes() {
        let features = parse::read_geojson(
            r#"{"type":"LineString","coordinates":[[0.1,0.1],[0.9,0.1],[0.9,0.9],[0.1,0.9],[0.1,0.1]]}"#,
        )
        .unwrap();

        let tasks = split_polygon(&unit_square(), &features);
        assert_eq!(tasks.len(), 1);
    }

    #[test]
    fn test_disjoint_components_become_separate_tasks() {
        let features = parse::read_geojson(
            r#"{"type":"MultiPolygon","coordinates":[
                [[[0.0,0.0],[0.4,0.0],[0.4,0.4],[0.0,0.4],[0.0,0.0]]],
                [[[0.6,0.6],[1.0,0.6],[1.0,1.0],[0.6,1.0],[0.6,0.6]]]
            ]}"#,
        )
        .unwrap();

        let tasks = split_polygon(&unit_square(), &features);
        assert_eq!(tasks.len(), 2);
    }

    #[test]
    fn test_overlapping_polygons_dissolve_into_one_task() {
        let features = parse::read_geojson(
            r#"{"type":"FeatureCollection","features":[
                {"type":"Feature","properties":{},
                 "geometry":{"type":"Polygon","coordinates":[[[0.1,0.1],[0.6,0.1],[0.6,0.6],[0.1,0.6],[0.1,0.1]]]}},
                {"type":"Feature","properties":{},
                 "geometry":{"type":"Polygon","coordinates":[[[0.4,0.4],[0.9,0.4],[0.9,0.9],[0.4,0.9],[0.4,0.4]]]}}
            ]}"#,
        )
        .unwrap();

        let tasks = split_polygon(&unit_square(), &features);
        assert_eq!(tasks.len(), 1, "overlapping inputs should union first");
    }

    #[test]
    fn test_no_accepted_features_yields_empty_result() {
        let features = parse::read_geojson(r#"{"type":"Point","coordinates":[0.5,0.5]}"#).unwrap();
        let tasks = split_polygon(&unit_square(), &features);
        assert!(tasks.is_empty());
    }

    #[test]
    fn test_db_table_source_is_unimplemented() {
        let err = split_by_db_table("postgresql://unused", "ways_poly").unwrap_err();
        assert!(matches!(err, SplitterError::Unimplemented(_)));
    }
}
