//! Classifies OSM extract features into the two sets the clustering
//! pipeline can use: building polygons and non-traversable linear features.
//!
//! Everything else (shops, amenities, landuse, ...) is silently ignored by
//! the pipeline.

use geojson::Feature;
use serde_json::{Map, Value};

/// Tag keys whose mere presence marks a feature as a splitting boundary.
const LINEAR_KEYS: [&str; 4] = ["highway", "waterway", "railway", "aeroway"];

const BARRIER_VALUES: [&str; 5] = ["fence", "wire_fence", "wall", "city_wall", "ditch"];
const NATURAL_VALUES: [&str; 1] = ["cliff"];
const MAN_MADE_VALUES: [&str; 3] = ["embankment", "dyke", "dike"];

/// How a feature participates in the clustering pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    /// A building polygon, loaded into `ways_poly`.
    Building,
    /// A non-traversable linear feature, loaded into `ways_line`.
    SplittingLine,
    /// Neither; dropped.
    Other,
}

/// Reads the `tags` property, which raw-data extracts encode either as an
/// embedded JSON object or as a string-encoded one.
pub fn tags_of(feature: &Feature) -> Option<Map<String, Value>> {
    let tags = feature.properties.as_ref()?.get("tags")?;
    match tags {
        Value::Object(map) => Some(map.clone()),
        Value::String(encoded) => serde_json::from_str::<Value>(encoded)
            .ok()?
            .as_object()
            .cloned(),
        _ => None,
    }
}

/// Reads the `osm_id` property as an integer if present.
pub fn osm_id_of(feature: &Feature) -> Option<i64> {
    let id = feature.properties.as_ref()?.get("osm_id")?;
    match id {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

pub fn is_building(tags: &Map<String, Value>) -> bool {
    tag_value_matches(tags, "building", &["yes"])
}

/// True when the tags mark a feature a task boundary should follow rather
/// than cross: any road, river, railway or runway, plus solid barriers,
/// cliffs and embankments. Value comparison is case-insensitive.
pub fn is_splitting_line(tags: &Map<String, Value>) -> bool {
    if LINEAR_KEYS.iter().any(|key| tags.contains_key(*key)) {
        return true;
    }
    tag_value_matches(tags, "barrier", &BARRIER_VALUES)
        || tag_value_matches(tags, "natural", &NATURAL_VALUES)
        || tag_value_matches(tags, "man_made", &MAN_MADE_VALUES)
}

pub fn classify(feature: &Feature) -> FeatureKind {
    let Some(tags) = tags_of(feature) else {
        return FeatureKind::Other;
    };
    if is_building(&tags) {
        FeatureKind::Building
    } else if is_splitting_line(&tags) {
        FeatureKind::SplittingLine
    } else {
        FeatureKind::Other
    }
}

fn tag_value_matches(tags: &Map<String, Value>, key: &str, allowed: &[&str]) -> bool {
    tags.get(key)
        .and_then(Value::as_str)
        .is_some_and(|value| allowed.iter().any(|a| a.eq_ignore_ascii_case(value)))
}
