use std::path::PathBuf;

use thiserror::Error;

/// Errors emitted by the generation engine.
///
/// Only [`GenerationError::ExternalSource`], sink I/O and compile-time
/// configuration errors abort a run. [`GenerationError::Leaf`] is reported as a
/// diagnostic by the interpreter and never escapes [`crate::generators::Node::generate`].
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Leaf(#[from] LeafError),
    #[error("external source: {0}")]
    ExternalSource(#[from] ExternalSourceError),
    #[error("unsupported record: {0}")]
    UnsupportedRecord(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("worker panicked: {0}")]
    WorkerPanicked(String),
}

/// Per-value failures. They yield an absent value and a diagnostic.
#[derive(Debug, Error)]
pub enum LeafError {
    #[error("const leaf has no value")]
    MissingConst,
    #[error("oneOf has no candidates")]
    EmptyOneOf,
    #[error("candidates mix weighted and unweighted entries")]
    InvalidWeights,
    #[error("alphabet '{0}' is not defined or empty")]
    UnknownAlphabet(String),
    #[error("external leaf has no bound source")]
    MissingSource,
    #[error("reference '{0}' not found")]
    ReferenceNotFound(String),
    #[error("no geometries generated")]
    NoGeometries,
    #[error("asJson value is not valid json: {0}")]
    InvalidRawJson(String),
    #[error("format failed: {0}")]
    Format(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LeafError {
    /// Stable code used to aggregate diagnostics in the run report.
    pub fn code(&self) -> &'static str {
        match self {
            LeafError::MissingConst => "missing_const",
            LeafError::EmptyOneOf => "empty_one_of",
            LeafError::InvalidWeights => "invalid_weights",
            LeafError::UnknownAlphabet(_) => "unknown_alphabet",
            LeafError::MissingSource => "missing_external_source",
            LeafError::ReferenceNotFound(_) => "reference_not_found",
            LeafError::NoGeometries => "no_geometries",
            LeafError::InvalidRawJson(_) => "invalid_raw_json",
            LeafError::Format(_) => "format_failed",
            LeafError::Json(_) => "json_failed",
        }
    }
}

/// Failures while materializing an external CSV column. Cached and replayed to
/// every caller once the first load fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExternalSourceError {
    #[error("open '{}': {message}", path.display())]
    Open { path: PathBuf, message: String },
    #[error("read '{}': {message}", path.display())]
    Read { path: PathBuf, message: String },
    #[error("column '{column}' not found in '{}'", path.display())]
    MissingColumn { path: PathBuf, column: String },
    #[error("column '{column}' in '{}' has no rows", path.display())]
    Empty { path: PathBuf, column: String },
    #[error("invalid separator {0:?}")]
    InvalidSeparator(String),
}
