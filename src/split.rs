//! Public entry points.
//!
//! Each splitter accepts a normalized AOI feature collection. A collection
//! holding several polygons is split one sub-geometry at a time, strictly
//! sequentially (the clustering scratch tables are shared names, so
//! concurrent runs on one connection would collide), and the per-geometry
//! results are concatenated.

use crate::cluster::{self, DbHandle, SplitParams, SplittingAlgorithm};
use crate::error::{Result, SplitterError};
use crate::{features, grid, parse};
use geo_types::Polygon;
use geojson::{Feature, FeatureCollection, GeoJson, JsonObject};
use log::info;
use postgres::{Client, NoTls};
use std::fs::File;
use std::path::{Path, PathBuf};

/// Splits the AOI into a regular grid of roughly `meters`-sized cells.
///
/// With an extract supplied, cells holding no extract-feature centroid are
/// dropped so no-data task cells do not reach mappers. An AOI that
/// produces no cells yields an empty collection, not an error.
pub fn split_by_square(
    aoi: &FeatureCollection,
    extract: Option<&FeatureCollection>,
    meters: f64,
    outfile: Option<&Path>,
) -> Result<FeatureCollection> {
    if meters <= 0.0 || !meters.is_finite() {
        return Err(SplitterError::InvalidInput(format!(
            "grid edge length must be positive, got {}",
            meters
        )));
    }

    let mut task_id = 0usize;
    run_split(aoi, outfile, |polygon| {
        let cells = grid::split_polygon(polygon, meters, extract);
        Ok(cells
            .into_iter()
            .map(|cell| {
                let feature = cell_feature(&cell, task_id);
                task_id += 1;
                feature
            })
            .collect())
    })
}

/// Splits the AOI by building density through the PostGIS pipeline.
///
/// All validation (extract present, algorithm has a pipeline, required
/// parameters resolved, AOI well-formed) happens before any database
/// round-trip. A URL handle is connected once and dropped before
/// returning; a borrowed client is left open.
pub fn split_by_sql(
    aoi: &FeatureCollection,
    db: DbHandle<'_>,
    extract: Option<&FeatureCollection>,
    algorithm: SplittingAlgorithm,
    params: &SplitParams,
    outfile: Option<&Path>,
) -> Result<FeatureCollection> {
    let extract = extract.ok_or_else(|| {
        SplitterError::InvalidInput(
            "SQL-clustering splitting requires an OSM extract".to_string(),
        )
    })?;
    let pipeline = cluster::prepare(algorithm, params)?;
    // Parse every sub-polygon up front: a malformed AOI must fail before
    // the first database call.
    let _ = polygons_of(aoi)?;

    let mut owned_client;
    let client: &mut Client = match db {
        DbHandle::Client(client) => client,
        DbHandle::Url(url) => {
            owned_client = Client::connect(url, NoTls)?;
            &mut owned_client
        }
    };

    run_split(aoi, outfile, |polygon| {
        pipeline
            .run(&mut *client, polygon, extract)
            .map(|fc| fc.features)
    })
}

/// Splits the AOI along caller-supplied features (polygons and closed
/// rings), purely geometrically.
pub fn split_by_features(
    aoi: &FeatureCollection,
    split_features: &FeatureCollection,
    outfile: Option<&Path>,
) -> Result<FeatureCollection> {
    let mut task_id = 0usize;
    run_split(aoi, outfile, |polygon| {
        let tasks = features::split_polygon(polygon, split_features);
        Ok(tasks
            .into_iter()
            .map(|task| {
                let mut properties = JsonObject::new();
                properties.insert("task_id".to_string(), task_id.into());
                task_id += 1;
                Feature {
                    bbox: None,
                    geometry: Some(geojson::Geometry {
                        bbox: None,
                        value: geojson::Value::from(&task),
                        foreign_members: None,
                    }),
                    id: None,
                    properties: Some(properties),
                    foreign_members: None,
                }
            })
            .collect())
    })
}

/// Runs `split_one` per AOI sub-geometry and concatenates the results.
///
/// A single-geometry AOI writes `<outfile>`; a multi-geometry one writes
/// one `<stem>_<index>.geojson` per sub-geometry.
fn run_split(
    aoi: &FeatureCollection,
    outfile: Option<&Path>,
    mut split_one: impl FnMut(&Polygon<f64>) -> Result<Vec<Feature>>,
) -> Result<FeatureCollection> {
    let polygons = polygons_of(aoi)?;

    if polygons.len() == 1 {
        let featcol = collect(split_one(&polygons[0])?);
        if let Some(path) = outfile {
            write_featcol(path, &featcol)?;
        }
        return Ok(featcol);
    }

    let mut all = Vec::new();
    for (index, polygon) in polygons.iter().enumerate() {
        let task_features = split_one(polygon)?;
        if let Some(path) = outfile {
            write_featcol(&indexed_path(path, index), &collect(task_features.clone()))?;
        }
        all.extend(task_features);
    }
    Ok(collect(all))
}

/// Parses each AOI feature into one polygon; zero features is an input
/// error.
fn polygons_of(aoi: &FeatureCollection) -> Result<Vec<Polygon<f64>>> {
    if aoi.features.is_empty() {
        return Err(SplitterError::InvalidInput(
            "no geometry in input feature collection".to_string(),
        ));
    }
    aoi.features
        .iter()
        .map(|feature| {
            let sub = FeatureCollection {
                bbox: None,
                features: vec![feature.clone()],
                foreign_members: None,
            };
            parse::single_polygon(&sub)
        })
        .collect()
}

fn cell_feature(cell: &grid::TaskCell, task_id: usize) -> Feature {
    // A cell the AOI clipped into one piece serializes as a plain polygon.
    let value = if cell.geom.0.len() == 1 {
        geojson::Value::from(&cell.geom.0[0])
    } else {
        geojson::Value::from(&cell.geom)
    };

    let mut properties = JsonObject::new();
    properties.insert("task_id".to_string(), task_id.into());
    properties.insert("area".to_string(), cell.area_m2.into());

    Feature {
        bbox: None,
        geometry: Some(geojson::Geometry {
            bbox: None,
            value,
            foreign_members: None,
        }),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

fn collect(task_features: Vec<Feature>) -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features: task_features,
        foreign_members: None,
    }
}

fn write_featcol(path: &Path, featcol: &FeatureCollection) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer(file, &GeoJson::FeatureCollection(featcol.clone()))?;
    info!("wrote {} task features to {}", featcol.features.len(), path.display());
    Ok(())
}

fn indexed_path(path: &Path, index: usize) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("split");
    let file_name = match path.extension().and_then(|e| e.to_str()) {
        Some(extension) => format!("{}_{}.{}", stem, index, extension),
        None => format!("{}_{}", stem, index),
    };
    path.with_file_name(file_name)
}
