//! Square-grid splitting.
//!
//! Tiles the AOI bounding box at a pitch derived from the requested edge
//! length in meters, clips every cell to the AOI, optionally drops cells
//! holding no extract data, and merges undersized cells into the neighbor
//! they share the longest boundary with.

use crate::units::meters_to_degrees;
use geo::{BooleanOps, BoundingRect, Centroid, Contains, GeodesicArea};
use geo_types::{Coord, Geometry, MultiPolygon, Point, Polygon, Rect};
use geojson::FeatureCollection;
use log::debug;
use rstar::primitives::GeomWithData;
use rstar::{AABB, RTree};

/// Cells below this fraction of the target cell area get merged away.
pub const SMALL_CELL_FRACTION: f64 = 0.35;

// Below this shared-boundary length (meters) two cells are treated as
// touching at a point only, which does not qualify for merging.
const SHARED_EDGE_EPS_M: f64 = 1e-3;

/// One output task cell: its geometry (possibly multi-part where the AOI
/// clipped a grid square into disjoint pieces) and its ellipsoidal area.
#[derive(Debug, Clone)]
pub struct TaskCell {
    pub geom: MultiPolygon<f64>,
    pub area_m2: f64,
}

/// Splits a single AOI polygon into grid cells of roughly `meters` edge
/// length.
///
/// An empty result (degenerate AOI) is returned as an empty vec, not an
/// error.
pub fn split_polygon(
    aoi: &Polygon<f64>,
    meters: f64,
    extract: Option<&FeatureCollection>,
) -> Vec<TaskCell> {
    let Some(bbox) = aoi.bounding_rect() else {
        return Vec::new();
    };

    let mid_latitude = (bbox.min().y + bbox.max().y) / 2.0;
    let (delta_lat, delta_lon) = meters_to_degrees(meters, mid_latitude);

    let centroids = extract.map(centroid_tree);

    let mut cells: Vec<MultiPolygon<f64>> = Vec::new();
    let mut dropped_no_data = 0usize;

    // Breakpoints span the bbox, inclusive of a final partial cell.
    let mut row = 0;
    loop {
        let y = bbox.min().y + f64::from(row) * delta_lat;
        if y >= bbox.max().y {
            break;
        }
        let mut col = 0;
        loop {
            let x = bbox.min().x + f64::from(col) * delta_lon;
            if x >= bbox.max().x {
                break;
            }

            let cell = Rect::new(
                Coord { x, y },
                Coord {
                    x: x + delta_lon,
                    y: y + delta_lat,
                },
            )
            .to_polygon();

            let clipped = cell.intersection(aoi);
            if clipped.0.is_empty() || clipped.geodesic_area_unsigned() <= 0.0 {
                col += 1;
                continue;
            }

            if let Some(tree) = &centroids {
                if !holds_a_centroid(tree, &clipped) {
                    dropped_no_data += 1;
                    col += 1;
                    continue;
                }
            }

            cells.push(clipped);
            col += 1;
        }
        row += 1;
    }

    debug!(
        "grid: {} cells intersect the AOI, {} dropped for holding no extract data",
        cells.len(),
        dropped_no_data
    );

    merge_small_cells(cells, meters * meters)
}

fn centroid_tree(extract: &FeatureCollection) -> RTree<GeomWithData<[f64; 2], usize>> {
    let points = extract
        .features
        .iter()
        .enumerate()
        .filter_map(|(index, feature)| {
            let geometry = feature.geometry.as_ref()?;
            let geom = Geometry::<f64>::try_from(geometry.value.clone()).ok()?;
            let centroid = geom.centroid()?;
            Some(GeomWithData::new([centroid.x(), centroid.y()], index))
        })
        .collect();
    RTree::bulk_load(points)
}

fn holds_a_centroid(
    tree: &RTree<GeomWithData<[f64; 2], usize>>,
    cell: &MultiPolygon<f64>,
) -> bool {
    let Some(bbox) = cell.bounding_rect() else {
        return false;
    };
    let envelope = AABB::from_corners(
        [bbox.min().x, bbox.min().y],
        [bbox.max().x, bbox.max().y],
    );
    tree.locate_in_envelope_intersecting(&envelope)
        .any(|candidate| {
            let point = Point::new(candidate.geom()[0], candidate.geom()[1]);
            cell.contains(&point)
        })
}

struct MergeEntry {
    geom: MultiPolygon<f64>,
    area_m2: f64,
    perimeter_m: f64,
}

/// Iteratively merges cells below `SMALL_CELL_FRACTION` of the target area
/// into the touching neighbor with the longest shared boundary.
///
/// The shared-boundary length of two cells a and b equals
/// (perim(a) + perim(b) - perim(a ∪ b)) / 2: zero for disjoint or
/// point-touching cells, so those never qualify. Ties on length break to
/// the lowest-numbered neighbor. A small cell with no qualifying neighbor
/// survives as-is.
fn merge_small_cells(cells: Vec<MultiPolygon<f64>>, target_area_m2: f64) -> Vec<TaskCell> {
    let threshold = SMALL_CELL_FRACTION * target_area_m2;

    let mut entries: Vec<Option<MergeEntry>> = cells
        .into_iter()
        .map(|geom| {
            let area_m2 = geom.geodesic_area_unsigned();
            let perimeter_m = geom.geodesic_perimeter();
            Some(MergeEntry {
                geom,
                area_m2,
                perimeter_m,
            })
        })
        .collect();
    let mut isolated = vec![false; entries.len()];
    let mut merges = 0usize;

    loop {
        let Some(small_id) = entries.iter().enumerate().position(|(id, entry)| {
            !isolated[id]
                && entry
                    .as_ref()
                    .is_some_and(|e| e.area_m2 < threshold)
        }) else {
            break;
        };

        let small = entries[small_id].as_ref().unwrap();
        let mut best: Option<(f64, usize, MultiPolygon<f64>, f64)> = None;

        for (neighbor_id, slot) in entries.iter().enumerate() {
            if neighbor_id == small_id {
                continue;
            }
            let Some(neighbor) = slot else {
                continue;
            };
            let union = small.geom.union(&neighbor.geom);
            let union_perimeter = union.geodesic_perimeter();
            let shared = (small.perimeter_m + neighbor.perimeter_m - union_perimeter) / 2.0;
            if shared <= SHARED_EDGE_EPS_M {
                continue;
            }
            // Strict comparison keeps the first (lowest id) neighbor on a tie.
            if best.as_ref().is_none_or(|(len, _, _, _)| shared > *len) {
                best = Some((shared, neighbor_id, union, union_perimeter));
            }
        }

        match best {
            Some((_, neighbor_id, union, union_perimeter)) => {
                let area_m2 = union.geodesic_area_unsigned();
                entries[neighbor_id] = Some(MergeEntry {
                    geom: union,
                    area_m2,
                    perimeter_m: union_perimeter,
                });
                entries[small_id] = None;
                merges += 1;
            }
            None => {
                // No neighbor shares an edge; the fragment stays.
                isolated[small_id] = true;
            }
        }
    }

    debug!("grid: merged {} undersized cells", merges);

    entries
        .into_iter()
        .flatten()
        .map(|entry| TaskCell {
            geom: entry.geom,
            area_m2: entry.area_m2,
        })
        .collect()
}
