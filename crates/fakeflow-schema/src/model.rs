use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ShapeError;

/// Canonical generation config.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Number of records to generate; each record builds one set of shared fields.
    pub total_count: u64,
    /// Seed for the run-wide random source. Drawn from OS entropy when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Fields generated once per record and exposed to `reference` leaves.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shared_fields: Vec<Field>,
    /// Named character sets usable by `string` leaves.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alphabets: Vec<Alphabet>,
    /// Output streams.
    pub entities: Vec<Entity>,
    /// Default source for `external` leaves that do not bind their own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_csv_source: Option<ExternalCsvSource>,
}

/// Named set of characters.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Alphabet {
    pub name: String,
    pub values: String,
}

/// One output stream: a record shape plus its output settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Entity {
    pub field: Field,
    pub config: EntityConfig,
}

/// Admission and output settings for an entity.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EntityConfig {
    /// Hard cap on produced records; 0 disables the cap.
    #[serde(default)]
    pub count: u64,
    /// Admission probability in percent (0..=100).
    #[serde(default)]
    pub rate: u8,
    /// Output file for the entity.
    pub filepath: PathBuf,
    #[serde(default)]
    pub output_format: OutputFormat,
    /// Single ASCII character; defaults to `,`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csv_separator: Option<String>,
}

/// Serialization format of an entity's output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Csv,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
        }
    }
}

/// Schema node. Exactly one of `type`, `fields`, `array`, `oneOfFields` must be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    /// Key used when the node is a member of `fields`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Percent chance (0..=100) that the node resolves to an absent value.
    #[serde(default, skip_serializing_if = "is_zero_u8")]
    pub nil_chance: u8,
    /// Selection weight inside a `oneOfFields` list.
    #[serde(default, skip_serializing_if = "is_zero_f64")]
    pub weight: f64,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub leaf: Option<LeafType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<Field>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array: Option<Box<ArraySpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub one_of_fields: Option<Vec<Field>>,
}

/// Borrowed view of the single shape a field declares.
#[derive(Debug, Clone, Copy)]
pub enum FieldShape<'a> {
    Leaf(&'a LeafType),
    Fields(&'a [Field]),
    Array(&'a ArraySpec),
    OneOf(&'a [Field]),
}

impl Field {
    /// Resolve the single shape this field declares.
    pub fn shape(&self) -> Result<FieldShape<'_>, ShapeError> {
        let set = usize::from(self.leaf.is_some())
            + usize::from(self.fields.is_some())
            + usize::from(self.array.is_some())
            + usize::from(self.one_of_fields.is_some());
        if set > 1 {
            return Err(ShapeError::Multiple(set));
        }

        if let Some(leaf) = &self.leaf {
            Ok(FieldShape::Leaf(leaf))
        } else if let Some(fields) = &self.fields {
            Ok(FieldShape::Fields(fields))
        } else if let Some(array) = &self.array {
            Ok(FieldShape::Array(array))
        } else if let Some(candidates) = &self.one_of_fields {
            Ok(FieldShape::OneOf(candidates))
        } else {
            Err(ShapeError::Missing)
        }
    }
}

/// Array node: either a fixed list of children or a template repeated
/// `minLen..=maxLen` times.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArraySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Field>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed: Option<Vec<Field>>,
    #[serde(default)]
    pub min_len: usize,
    #[serde(default)]
    pub max_len: usize,
}

/// Leaf node: a value kind plus post-processing modifiers.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LeafType {
    #[serde(flatten)]
    pub kind: LeafKind,
    /// Stringify the resolved value.
    #[serde(default, skip_serializing_if = "is_false")]
    pub as_string: bool,
    /// printf-style template (`%v`, `%s`, `%d`) applied to the stringified value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Embed a string value as raw JSON instead of a quoted string.
    #[serde(default, skip_serializing_if = "is_false")]
    pub as_json: bool,
}

/// Value kinds a leaf can produce.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LeafKind {
    /// Random text; `min`/`max` bound the length.
    String {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        alphabet: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<i64>,
    },
    Int {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<i64>,
    },
    /// Bounds are `YYYY-MM-DD`; `dateFormat` is a strftime pattern.
    Date {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<String>,
        #[serde(
            default,
            rename = "dateFormat",
            skip_serializing_if = "Option::is_none"
        )]
        date_format: Option<String>,
    },
    Bool,
    Uuid,
    Email,
    Const {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
    },
    OneOf {
        #[serde(default)]
        values: Vec<Value>,
    },
    /// Monotonic counter starting at `min`, clamped to `max`.
    Sequence {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<i64>,
    },
    /// Column of an external CSV file; falls back to the config-level source.
    External {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<ExternalCsvSource>,
    },
    /// Copy of a shared field generated for the current record.
    Reference { name: String },
    Geometry(GeoJsonSpec),
}

/// Column-backed value source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExternalCsvSource {
    pub filepath: PathBuf,
    /// Header name of the column to load.
    pub target_field: String,
    /// Single ASCII character; defaults to `,`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csv_separator: Option<String>,
    #[serde(default)]
    pub read_mode: ReadMode,
}

/// How values are served from an external column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ReadMode {
    /// Uniformly random row per read.
    #[default]
    Random,
    /// Rows in file order, wrapping around at the end.
    Circular,
}

/// GeoJSON envelope produced by a `geometry` leaf.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GeoJsonSpec {
    /// GeoJSON feature type; `Feature` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_type: Option<String>,
    /// Spatial reference identifier, e.g. `EPSG:4326`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub srs: Option<String>,
    /// `GeometryCollection` forces a collection even for a single geometry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_type: Option<String>,
    #[serde(default)]
    pub geometries: Vec<GeometrySpec>,
}

/// One geometry inside a GeoJSON envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GeometrySpec {
    /// Point, MultiPoint, LineString, MultiLineString, Polygon or MultiPolygon.
    #[serde(rename = "type")]
    pub kind: String,
    /// Explicit coordinates; skips generation when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Value>,
    #[serde(default)]
    pub min_points: usize,
    #[serde(default)]
    pub max_points: usize,
    /// Number of polygons for MultiPolygon; 1 when unset.
    #[serde(default)]
    pub polygons_count: usize,
    #[serde(default)]
    pub min_lon: f64,
    #[serde(default)]
    pub max_lon: f64,
    #[serde(default)]
    pub min_lat: f64,
    #[serde(default)]
    pub max_lat: f64,
}

/// Parse a single-character ASCII separator, falling back to `default` when unset.
pub fn parse_separator(value: Option<&str>, default: u8) -> Option<u8> {
    match value {
        None => Some(default),
        Some(value) => {
            let mut chars = value.chars();
            match (chars.next(), chars.next()) {
                (Some(ch), None) if ch.is_ascii() => Some(ch as u8),
                _ => None,
            }
        }
    }
}

fn is_zero_u8(value: &u8) -> bool {
    *value == 0
}

fn is_zero_f64(value: &f64) -> bool {
    *value == 0.0
}

fn is_false(value: &bool) -> bool {
    !*value
}
