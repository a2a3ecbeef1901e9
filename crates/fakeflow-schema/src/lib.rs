//! Config contracts and validation for fakeflow.
//!
//! This crate defines the declarative generation config (entities, record
//! shapes, leaf types, alphabets and external sources), emits its JSON Schema
//! and validates documents before they reach the generation engine.

pub mod errors;
pub mod model;
pub mod schema;
pub mod validate;

pub use errors::{IssueSeverity, SchemaError, ShapeError, ValidationIssue, ValidationReport};
pub use model::{
    Alphabet, ArraySpec, Config, Entity, EntityConfig, ExternalCsvSource, Field, FieldShape,
    GeoJsonSpec, GeometrySpec, LeafKind, LeafType, OutputFormat, ReadMode, parse_separator,
};
pub use schema::config_json_schema;
pub use validate::{
    ValidatedConfig, load_config_value, validate_config, validate_config_document,
    validate_config_json,
};

/// Date bounds accepted by `date` leaves.
pub const DATE_BOUND_FORMAT: &str = "%Y-%m-%d";
