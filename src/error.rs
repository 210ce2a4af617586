use thiserror::Error;

/// Errors surfaced by the splitting engine.
///
/// Validation problems are raised before any work happens; database errors
/// during the clustering pipeline propagate as-is and are not retried.
#[derive(Debug, Error)]
pub enum SplitterError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    GeoJson(#[from] Box<geojson::Error>),

    #[error(transparent)]
    Db(#[from] postgres::Error),

    #[error("not implemented: {0}")]
    Unimplemented(&'static str),
}

impl From<geojson::Error> for SplitterError {
    fn from(err: geojson::Error) -> Self {
        SplitterError::GeoJson(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, SplitterError>;
