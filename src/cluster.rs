//! Building-density task splitting via a PostGIS pipeline.
//!
//! The extract's buildings and non-traversable lines are loaded into
//! scratch tables, then an ordered sequence of SQL templates groups and
//! clusters the buildings, partitions each cluster into a task polygon,
//! aligns task edges with the detected linework and serializes the result
//! as GeoJSON. The scratch tables are dropped on every exit path.

use crate::error::{Result, SplitterError};
use crate::osm_tags::{self, FeatureKind};
use geojson::FeatureCollection;
use log::debug;
use postgres::{Client, NoTls};
use std::collections::BTreeMap;
use std::str::FromStr;

/// The closed set of splitting strategies, each carrying its required
/// parameters and its SQL pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplittingAlgorithm {
    /// Regular grid; runs in-process, declares no SQL pipeline.
    SquareGrid,
    /// Building clusters partitioned along the medial axis of the gaps
    /// between them.
    AverageBuildingSkeleton,
    /// Building clusters partitioned by a Voronoi diagram of building
    /// centroids.
    AverageBuildingVoronoi,
}

impl SplittingAlgorithm {
    pub fn required_params(&self) -> &'static [&'static str] {
        match self {
            SplittingAlgorithm::SquareGrid => &["dimension_meters"],
            SplittingAlgorithm::AverageBuildingSkeleton
            | SplittingAlgorithm::AverageBuildingVoronoi => &["num_buildings"],
        }
    }

    /// The ordered (name, text) pipeline, embedded at compile time.
    /// `SquareGrid` has no SQL pipeline.
    pub fn sql_templates(&self) -> Option<&'static [(&'static str, &'static str)]> {
        const SKELETON: &[(&str, &str)] = &[
            ("1-linear-features.sql", include_str!("../sql/1-linear-features.sql")),
            ("2-group-buildings.sql", include_str!("../sql/2-group-buildings.sql")),
            ("3-cluster-buildings.sql", include_str!("../sql/3-cluster-buildings.sql")),
            ("4-skeleton.sql", include_str!("../sql/4-skeleton.sql")),
            ("5-alignment.sql", include_str!("../sql/5-alignment.sql")),
            ("6-extract.sql", include_str!("../sql/6-extract.sql")),
        ];
        const VORONOI: &[(&str, &str)] = &[
            ("1-linear-features.sql", include_str!("../sql/1-linear-features.sql")),
            ("2-group-buildings.sql", include_str!("../sql/2-group-buildings.sql")),
            ("3-cluster-buildings.sql", include_str!("../sql/3-cluster-buildings.sql")),
            ("4-voronoi.sql", include_str!("../sql/4-voronoi.sql")),
            ("5-alignment.sql", include_str!("../sql/5-alignment.sql")),
            ("6-extract.sql", include_str!("../sql/6-extract.sql")),
        ];
        match self {
            SplittingAlgorithm::SquareGrid => None,
            SplittingAlgorithm::AverageBuildingSkeleton => Some(SKELETON),
            SplittingAlgorithm::AverageBuildingVoronoi => Some(VORONOI),
        }
    }
}

/// A pipeline parameter value. Only integers and booleans exist, which is
/// what makes textual placeholder substitution safe: both render to SQL
/// literals that cannot carry injected text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamValue {
    Int(i64),
    Bool(bool),
}

impl ParamValue {
    fn render(&self) -> String {
        match self {
            ParamValue::Int(v) => v.to_string(),
            ParamValue::Bool(true) => "TRUE".to_string(),
            ParamValue::Bool(false) => "FALSE".to_string(),
        }
    }
}

/// Resolved parameters for one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct SplitParams(BTreeMap<String, ParamValue>);

impl SplitParams {
    pub fn new() -> Self {
        SplitParams(BTreeMap::new())
    }

    pub fn set(mut self, name: &str, value: ParamValue) -> Self {
        self.0.insert(name.to_string(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<ParamValue> {
        self.0.get(name).copied()
    }

    /// The four linework toggles default to on when the caller is silent.
    fn apply_defaults(&mut self) {
        for toggle in [
            "include_roads",
            "include_rivers",
            "include_railways",
            "include_aeroways",
        ] {
            self.0
                .entry(toggle.to_string())
                .or_insert(ParamValue::Bool(true));
        }
    }

    fn validate(&self, algorithm: SplittingAlgorithm) -> Result<()> {
        let missing: Vec<&str> = algorithm
            .required_params()
            .iter()
            .filter(|name| !self.0.contains_key(**name))
            .copied()
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(SplitterError::InvalidInput(format!(
                "missing required parameters for {:?}: {}",
                algorithm,
                missing.join(", ")
            )))
        }
    }

    /// Substitutes `{name}` placeholders with rendered values. Every
    /// placeholder must resolve; a leftover one means the parameter set and
    /// the template disagree.
    fn render(&self, template: &str) -> Result<String> {
        let mut sql = template.to_string();
        for (name, value) in &self.0 {
            sql = sql.replace(&format!("{{{}}}", name), &value.render());
        }
        if let Some(unresolved) = find_placeholder(&sql) {
            return Err(SplitterError::InvalidInput(format!(
                "unresolved SQL template placeholder {{{}}}",
                unresolved
            )));
        }
        Ok(sql)
    }
}

fn find_placeholder(sql: &str) -> Option<&str> {
    let bytes = sql.as_bytes();
    let mut start = None;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'{' => start = Some(i + 1),
            b'}' => {
                if let Some(s) = start.take() {
                    if s < i {
                        return Some(&sql[s..i]);
                    }
                }
            }
            _ if b.is_ascii_lowercase() || b == b'_' => {}
            _ => start = None,
        }
    }
    None
}

/// Either a caller-owned live connection (left open afterwards) or a URL
/// the engine connects with itself (closed before returning).
pub enum DbHandle<'a> {
    Url(&'a str),
    Client(&'a mut Client),
}

/// A validated, fully rendered pipeline, ready to run against one or more
/// AOI polygons. Building it performs every validation the spec requires
/// before any database round-trip.
pub struct Pipeline {
    stages: Vec<(&'static str, String)>,
}

/// Validates the algorithm/parameter combination and renders every SQL
/// template, so template problems cannot abort a half-run pipeline.
pub fn prepare(algorithm: SplittingAlgorithm, params: &SplitParams) -> Result<Pipeline> {
    let templates = algorithm.sql_templates().ok_or_else(|| {
        SplitterError::InvalidInput(format!(
            "algorithm {:?} declares no SQL pipeline",
            algorithm
        ))
    })?;

    let mut resolved = params.clone();
    resolved.apply_defaults();
    resolved.validate(algorithm)?;

    let mut stages = Vec::with_capacity(templates.len());
    for (name, template) in templates {
        stages.push((*name, resolved.render(template)?));
    }
    Ok(Pipeline { stages })
}

impl Pipeline {
    /// Loads the AOI and extract into scratch tables, runs the stages in
    /// order and returns the task collection the final stage serializes.
    ///
    /// The scratch tables go away on success and failure alike; a pipeline
    /// error wins over a cleanup error.
    pub fn run(
        &self,
        client: &mut Client,
        aoi: &geo_types::Polygon<f64>,
        extract: &FeatureCollection,
    ) -> Result<FeatureCollection> {
        create_scratch_tables(client)?;
        let outcome = match load_features(client, aoi, extract) {
            Ok(()) => run_pipeline(client, &self.stages),
            Err(err) => Err(err),
        };

        let cleanup = drop_scratch_tables(client);
        let featcol = outcome?;
        cleanup?;
        Ok(featcol)
    }
}

/// One-shot convenience over [`prepare`] and [`Pipeline::run`] for a single
/// AOI polygon.
pub fn split_polygon(
    aoi: &geo_types::Polygon<f64>,
    db: DbHandle<'_>,
    extract: &FeatureCollection,
    algorithm: SplittingAlgorithm,
    params: &SplitParams,
) -> Result<FeatureCollection> {
    let pipeline = prepare(algorithm, params)?;

    let mut owned_client;
    let client: &mut Client = match db {
        DbHandle::Client(client) => client,
        DbHandle::Url(url) => {
            owned_client = Client::connect(url, NoTls)?;
            &mut owned_client
        }
    };

    pipeline.run(client, aoi, extract)
}

const SCRATCH_TABLES: [&str; 5] = [
    "temp_polygons",
    "small_polygons",
    "ways_line",
    "ways_poly",
    "project_aoi",
];

fn create_scratch_tables(client: &mut Client) -> Result<()> {
    drop_scratch_tables(client)?;
    client.batch_execute(
        "CREATE TABLE project_aoi (
             id SERIAL PRIMARY KEY,
             geom GEOMETRY(GEOMETRY, 4326)
         );
         CREATE TABLE ways_poly (
             id SERIAL PRIMARY KEY,
             osm_id BIGINT,
             tags JSONB,
             geom GEOMETRY(GEOMETRY, 4326)
         );
         CREATE TABLE ways_line (
             id SERIAL PRIMARY KEY,
             osm_id BIGINT,
             tags JSONB,
             geom GEOMETRY(GEOMETRY, 4326)
         );",
    )?;
    Ok(())
}

fn drop_scratch_tables(client: &mut Client) -> Result<()> {
    let drops: String = SCRATCH_TABLES
        .iter()
        .map(|table| format!("DROP TABLE IF EXISTS {};", table))
        .collect();
    client.batch_execute(&drops)?;
    Ok(())
}

/// Classifies every extract feature and loads the usable ones. Features
/// that are neither buildings nor qualifying linework are skipped without
/// complaint.
fn load_features(
    client: &mut Client,
    aoi: &geo_types::Polygon<f64>,
    extract: &FeatureCollection,
) -> Result<()> {
    let aoi_geojson = geojson::Value::from(aoi).to_string();
    client.execute(
        "INSERT INTO project_aoi (geom) VALUES (ST_SetSRID(ST_GeomFromGeoJSON($1), 4326))",
        &[&aoi_geojson],
    )?;

    let mut buildings = 0usize;
    let mut lines = 0usize;
    let mut skipped = 0usize;

    for feature in &extract.features {
        let table = match osm_tags::classify(feature) {
            FeatureKind::Building => {
                buildings += 1;
                "ways_poly"
            }
            FeatureKind::SplittingLine => {
                lines += 1;
                "ways_line"
            }
            FeatureKind::Other => {
                skipped += 1;
                continue;
            }
        };

        let Some(geometry) = feature.geometry.as_ref() else {
            skipped += 1;
            continue;
        };
        let geom_geojson = geometry.value.to_string();
        let osm_id = osm_tags::osm_id_of(feature);
        let tags = osm_tags::tags_of(feature)
            .map(|map| serde_json::Value::Object(map).to_string())
            .unwrap_or_else(|| "{}".to_string());

        let insert = format!(
            "INSERT INTO {} (osm_id, tags, geom)
             VALUES ($1, $2::jsonb, ST_SetSRID(ST_GeomFromGeoJSON($3), 4326))",
            table
        );
        client.execute(insert.as_str(), &[&osm_id, &tags, &geom_geojson])?;
    }

    debug!(
        "loaded {} buildings and {} splitting lines, skipped {} other features",
        buildings, lines, skipped
    );
    Ok(())
}

fn run_pipeline(
    client: &mut Client,
    rendered: &[(&'static str, String)],
) -> Result<FeatureCollection> {
    let mut featcol = None;
    for (name, sql) in rendered {
        debug!("running pipeline stage {}", name);
        if *name == "6-extract.sql" {
            let row = client.query_one(sql.as_str(), &[])?;
            let serialized: String = row.get(0);
            let geojson = geojson::GeoJson::from_str(&serialized)?;
            featcol = Some(crate::parse::normalize(geojson));
        } else {
            client.batch_execute(sql)?;
        }
    }
    featcol.ok_or_else(|| {
        SplitterError::InvalidInput("pipeline ended without an extract stage".to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::{Coord, Rect};

    fn unit_square() -> geo_types::Polygon<f64> {
        Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 1.0, y: 1.0 }).to_polygon()
    }

    fn empty_extract() -> FeatureCollection {
        FeatureCollection {
            bbox: None,
            features: vec![],
            foreign_members: None,
        }
    }

    #[test]
    fn test_square_grid_declares_no_pipeline() {
        assert!(SplittingAlgorithm::SquareGrid.sql_templates().is_none());
        let err = split_polygon(
            &unit_square(),
            DbHandle::Url("postgresql://unused"),
            &empty_extract(),
            SplittingAlgorithm::SquareGrid,
            &SplitParams::new(),
        )
        .unwrap_err();
        assert!(matches!(err, SplitterError::InvalidInput(_)));
    }

    #[test]
    fn test_missing_required_params_fail_before_db() {
        // The URL is unreachable; reaching the database would yield a Db
        // error, so an InvalidInput proves validation came first.
        let err = split_polygon(
            &unit_square(),
            DbHandle::Url("postgresql://nobody@localhost:1/none"),
            &empty_extract(),
            SplittingAlgorithm::AverageBuildingVoronoi,
            &SplitParams::new(),
        )
        .unwrap_err();
        assert!(matches!(err, SplitterError::InvalidInput(_)));
    }

    #[test]
    fn test_toggles_default_on() {
        let mut params = SplitParams::new().set("num_buildings", ParamValue::Int(25));
        params.apply_defaults();
        for toggle in [
            "include_roads",
            "include_rivers",
            "include_railways",
            "include_aeroways",
        ] {
            assert_eq!(params.get(toggle), Some(ParamValue::Bool(true)));
        }
        // A caller override survives.
        let mut params = SplitParams::new().set("include_roads", ParamValue::Bool(false));
        params.apply_defaults();
        assert_eq!(params.get("include_roads"), Some(ParamValue::Bool(false)));
    }

    #[test]
    fn test_render_substitutes_typed_values() {
        let params = SplitParams::new()
            .set("num_buildings", ParamValue::Int(40))
            .set("include_roads", ParamValue::Bool(true));
        let sql = params
            .render("SELECT {num_buildings} WHERE {include_roads}")
            .unwrap();
        assert_eq!(sql, "SELECT 40 WHERE TRUE");
    }

    #[test]
    fn test_render_rejects_unresolved_placeholder() {
        let params = SplitParams::new();
        let err = params.render("SELECT {num_buildings}").unwrap_err();
        assert!(matches!(err, SplitterError::InvalidInput(_)));
    }

    #[test]
    fn test_all_templates_render_with_defaults() {
        for algorithm in [
            SplittingAlgorithm::AverageBuildingSkeleton,
            SplittingAlgorithm::AverageBuildingVoronoi,
        ] {
            let mut params = SplitParams::new().set("num_buildings", ParamValue::Int(25));
            params.apply_defaults();
            for (name, template) in algorithm.sql_templates().unwrap() {
                let rendered = params.render(template);
                assert!(rendered.is_ok(), "template {} failed to render", name);
            }
        }
    }

    #[test]
    fn test_required_params_per_variant() {
        assert_eq!(
            SplittingAlgorithm::SquareGrid.required_params(),
            &["dimension_meters"]
        );
        assert_eq!(
            SplittingAlgorithm::AverageBuildingVoronoi.required_params(),
            &["num_buildings"]
        );
        assert_eq!(
            SplittingAlgorithm::AverageBuildingSkeleton.required_params(),
            &["num_buildings"]
        );
    }
}
