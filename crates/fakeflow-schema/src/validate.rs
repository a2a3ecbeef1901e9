use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use chrono::NaiveDate;
use chrono::format::{Item, StrftimeItems};
use jsonschema::JSONSchema;
use serde_json::Value;

use crate::DATE_BOUND_FORMAT;
use crate::errors::{IssueSeverity, SchemaError, ValidationIssue, ValidationReport};
use crate::model::{
    ArraySpec, Config, Entity, ExternalCsvSource, Field, FieldShape, GeoJsonSpec, LeafKind,
    LeafType, OutputFormat, parse_separator,
};
use crate::schema::config_json_schema;

const GEOMETRY_KINDS: &[&str] = &[
    "Point",
    "MultiPoint",
    "LineString",
    "MultiLineString",
    "Polygon",
    "MultiPolygon",
];

/// Validated config with accumulated warnings.
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    pub config: Config,
    pub warnings: Vec<ValidationIssue>,
}

/// Read a config document; `.toml` files are converted to JSON values.
pub fn load_config_value(path: &Path) -> Result<Value, SchemaError> {
    let contents = std::fs::read_to_string(path)?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    if is_toml {
        Ok(toml::from_str::<Value>(&contents)?)
    } else {
        Ok(serde_json::from_str(&contents)?)
    }
}

/// Validate a config document against the config JSON Schema.
pub fn validate_config_json(config_json: &Value) -> Result<ValidationReport, SchemaError> {
    let schema = serde_json::to_value(config_json_schema())?;
    let compiled = JSONSchema::compile(&schema).map_err(|err| SchemaError::Schema(err.to_string()))?;

    let mut report = ValidationReport::default();

    if let Err(errors) = compiled.validate(config_json) {
        for error in errors {
            let path = normalized_json_pointer(&error.instance_path.to_string());
            report.push_error(ValidationIssue::new(
                IssueSeverity::Error,
                "schema_violation",
                path,
                error.to_string(),
                None,
            ));
        }
    }

    Ok(report)
}

/// Validate the semantic rules the JSON Schema cannot express.
pub fn validate_config(config: &Config) -> ValidationReport {
    let mut validator = Validator::new(config);

    if config.total_count == 0 {
        validator.error(
            "total_count_zero",
            "/totalCount",
            "totalCount must be greater than 0",
            None,
        );
    }
    if config.entities.is_empty() {
        validator.error(
            "no_entities",
            "/entities",
            "at least one entity is required",
            None,
        );
    }

    validator.validate_alphabets(config);
    if let Some(source) = &config.external_csv_source {
        validator.validate_source(source, "/externalCsvSource");
    }

    let mut shared_seen = HashSet::new();
    for (idx, field) in config.shared_fields.iter().enumerate() {
        let path = format!("/sharedFields/{idx}");
        if field.name.is_empty() {
            validator.error(
                "missing_shared_name",
                &path,
                "shared fields must be named",
                Some("set name so reference leaves can find the value".to_string()),
            );
        } else if !shared_seen.insert(field.name.as_str()) {
            validator.error(
                "duplicate_shared_name",
                &path,
                format!("duplicate shared field '{}'", field.name),
                None,
            );
        }
        validator.validate_field(field, &path, Scope::Shared);
    }

    let mut targets = HashSet::new();
    for (idx, entity) in config.entities.iter().enumerate() {
        let path = format!("/entities/{idx}");
        if !targets.insert(entity.config.filepath.clone()) {
            validator.error(
                "duplicate_entity_target",
                format!("{path}/config/filepath"),
                format!(
                    "filepath '{}' is used by more than one entity",
                    entity.config.filepath.display()
                ),
                None,
            );
        }
        validator.validate_entity(entity, &path);
    }

    validator.report
}

/// Validate the config end-to-end, returning structured issues on failure.
pub fn validate_config_document(config_json: &Value) -> Result<ValidatedConfig, ValidationReport> {
    let structural = match validate_config_json(config_json) {
        Ok(report) => report,
        Err(err) => {
            let mut report = ValidationReport::default();
            report.push_error(ValidationIssue::new(
                IssueSeverity::Error,
                "schema_validation_error",
                "/",
                err.to_string(),
                None,
            ));
            return Err(report);
        }
    };

    if !structural.is_ok() {
        return Err(structural);
    }

    let config: Config = match serde_json::from_value(config_json.clone()) {
        Ok(config) => config,
        Err(err) => {
            let mut report = ValidationReport::default();
            report.push_error(ValidationIssue::new(
                IssueSeverity::Error,
                "invalid_config_json",
                "/",
                err.to_string(),
                None,
            ));
            return Err(report);
        }
    };

    let semantic = validate_config(&config);
    if !semantic.is_ok() {
        return Err(semantic);
    }

    Ok(ValidatedConfig {
        config,
        warnings: semantic.warnings,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Shared,
    Entity,
}

struct Validator<'a> {
    report: ValidationReport,
    alphabets: BTreeMap<&'a str, usize>,
    shared_names: HashSet<&'a str>,
    has_default_source: bool,
}

impl<'a> Validator<'a> {
    fn new(config: &'a Config) -> Self {
        Self {
            report: ValidationReport::default(),
            alphabets: config
                .alphabets
                .iter()
                .map(|alphabet| (alphabet.name.as_str(), alphabet.values.chars().count()))
                .collect(),
            shared_names: config
                .shared_fields
                .iter()
                .map(|field| field.name.as_str())
                .filter(|name| !name.is_empty())
                .collect(),
            has_default_source: config.external_csv_source.is_some(),
        }
    }

    fn error(
        &mut self,
        code: &str,
        path: impl Into<String>,
        message: impl Into<String>,
        hint: Option<String>,
    ) {
        self.report.push_error(ValidationIssue::new(
            IssueSeverity::Error,
            code,
            path,
            message,
            hint,
        ));
    }

    fn warning(
        &mut self,
        code: &str,
        path: impl Into<String>,
        message: impl Into<String>,
        hint: Option<String>,
    ) {
        self.report.push_warning(ValidationIssue::new(
            IssueSeverity::Warning,
            code,
            path,
            message,
            hint,
        ));
    }

    fn validate_alphabets(&mut self, config: &Config) {
        let mut seen = HashSet::new();
        for (idx, alphabet) in config.alphabets.iter().enumerate() {
            let path = format!("/alphabets/{idx}");
            if alphabet.name.is_empty() {
                self.error("missing_alphabet_name", &path, "alphabet name is empty", None);
            }
            if !seen.insert(alphabet.name.as_str()) {
                self.warning(
                    "duplicate_alphabet",
                    &path,
                    format!("alphabet '{}' is defined twice; the last one wins", alphabet.name),
                    None,
                );
            }
            if alphabet.values.is_empty() {
                self.error(
                    "empty_alphabet",
                    format!("{path}/values"),
                    format!("alphabet '{}' has no characters", alphabet.name),
                    None,
                );
            }
        }
    }

    fn validate_source(&mut self, source: &ExternalCsvSource, path: &str) {
        if source.filepath.as_os_str().is_empty() {
            self.error(
                "missing_source_path",
                format!("{path}/filepath"),
                "external source filepath is empty",
                None,
            );
        }
        if source.target_field.is_empty() {
            self.error(
                "missing_source_column",
                format!("{path}/targetField"),
                "external source targetField is empty",
                None,
            );
        }
        if parse_separator(source.csv_separator.as_deref(), b',').is_none() {
            self.error(
                "invalid_separator",
                format!("{path}/csvSeparator"),
                "csvSeparator must be a single ASCII character",
                None,
            );
        }
    }

    fn validate_entity(&mut self, entity: &Entity, path: &str) {
        let config = &entity.config;
        if config.rate > 100 {
            self.error(
                "rate_out_of_range",
                format!("{path}/config/rate"),
                format!("rate {} must be within 0..=100", config.rate),
                None,
            );
        }
        if config.filepath.as_os_str().is_empty() {
            self.error(
                "missing_entity_target",
                format!("{path}/config/filepath"),
                "entity filepath is empty",
                None,
            );
        }
        if parse_separator(config.csv_separator.as_deref(), b',').is_none() {
            self.error(
                "invalid_separator",
                format!("{path}/config/csvSeparator"),
                "csvSeparator must be a single ASCII character",
                None,
            );
        }
        if config.output_format == OutputFormat::Csv && !produces_columns(&entity.field) {
            self.warning(
                "csv_without_columns",
                format!("{path}/field"),
                "csv output needs a root with named fields or oneOfFields of named fields",
                Some("records that are not objects are dropped".to_string()),
            );
        }

        self.validate_field(&entity.field, &format!("{path}/field"), Scope::Entity);
    }

    fn validate_field(&mut self, field: &Field, path: &str, scope: Scope) {
        if field.nil_chance > 100 {
            self.error(
                "nil_chance_out_of_range",
                format!("{path}/nilChance"),
                format!("nilChance {} must be within 0..=100", field.nil_chance),
                None,
            );
        }
        if field.weight < 0.0 || !field.weight.is_finite() {
            self.error(
                "invalid_weight",
                format!("{path}/weight"),
                "weight must be a finite, non-negative number",
                None,
            );
        }

        let shape = match field.shape() {
            Ok(shape) => shape,
            Err(err) => {
                self.error("invalid_shape", path, err.to_string(), None);
                return;
            }
        };

        match shape {
            FieldShape::Leaf(leaf) => self.validate_leaf(leaf, &format!("{path}/type"), scope),
            FieldShape::Fields(fields) => {
                let mut names = HashSet::new();
                for (idx, child) in fields.iter().enumerate() {
                    let child_path = format!("{path}/fields/{idx}");
                    if child.name.is_empty() {
                        self.error(
                            "missing_field_name",
                            &child_path,
                            "members of fields must be named",
                            None,
                        );
                    } else if !names.insert(child.name.as_str()) {
                        self.warning(
                            "duplicate_field_name",
                            &child_path,
                            format!("field '{}' is declared twice; the last one wins", child.name),
                            None,
                        );
                    }
                    self.validate_field(child, &child_path, scope);
                }
            }
            FieldShape::Array(array) => self.validate_array(array, &format!("{path}/array"), scope),
            FieldShape::OneOf(candidates) => {
                self.validate_one_of(candidates, &format!("{path}/oneOfFields"), scope)
            }
        }
    }

    fn validate_array(&mut self, array: &ArraySpec, path: &str, scope: Scope) {
        match (&array.value, &array.fixed) {
            (Some(value), None) => {
                if array.min_len > array.max_len {
                    self.error(
                        "invalid_length_range",
                        path,
                        format!(
                            "minLen {} must be <= maxLen {}",
                            array.min_len, array.max_len
                        ),
                        None,
                    );
                }
                if array.max_len == 0 && array.min_len == 0 {
                    self.warning(
                        "zero_array_length",
                        format!("{path}/maxLen"),
                        "maxLen is 0, generated arrays are always empty",
                        Some("set maxLen to the largest array size wanted".to_string()),
                    );
                }
                self.validate_field(value, &format!("{path}/value"), scope);
            }
            (None, Some(fixed)) => {
                for (idx, child) in fixed.iter().enumerate() {
                    self.validate_field(child, &format!("{path}/fixed/{idx}"), scope);
                }
            }
            _ => self.error(
                "invalid_array_mode",
                path,
                "array must set exactly one of value or fixed",
                None,
            ),
        }
    }

    fn validate_one_of(&mut self, candidates: &[Field], path: &str, scope: Scope) {
        if candidates.is_empty() {
            self.error("empty_one_of", path, "oneOfFields must not be empty", None);
            return;
        }
        let weighted = candidates.iter().filter(|field| field.weight > 0.0).count();
        if weighted > 0 && weighted != candidates.len() {
            self.error(
                "mixed_weights",
                path,
                "when one candidate declares a weight, every candidate must",
                Some("give every candidate a non-zero weight or drop all weights".to_string()),
            );
        }
        for (idx, candidate) in candidates.iter().enumerate() {
            self.validate_field(candidate, &format!("{path}/{idx}"), scope);
        }
    }

    fn validate_leaf(&mut self, leaf: &LeafType, path: &str, scope: Scope) {
        match &leaf.kind {
            LeafKind::String { alphabet, min, max } => {
                self.validate_range(*min, *max, path);
                if min.unwrap_or(0) < 0 {
                    self.error("negative_length", path, "string length must be >= 0", None);
                }
                if let Some(alphabet) = alphabet {
                    match self.alphabets.get(alphabet.as_str()) {
                        None => self.error(
                            "unknown_alphabet",
                            format!("{path}/alphabet"),
                            format!("alphabet '{alphabet}' is not defined"),
                            None,
                        ),
                        Some(0) => self.error(
                            "empty_alphabet",
                            format!("{path}/alphabet"),
                            format!("alphabet '{alphabet}' has no characters"),
                            None,
                        ),
                        Some(_) => {}
                    }
                }
            }
            LeafKind::Int { min, max } | LeafKind::Sequence { min, max } => {
                self.validate_range(*min, *max, path);
            }
            LeafKind::Date {
                min,
                max,
                date_format,
            } => {
                self.validate_date_bounds(min.as_deref(), max.as_deref(), path);
                if let Some(format) = date_format
                    && !is_valid_strftime(format)
                {
                    self.error(
                        "invalid_date_format",
                        format!("{path}/dateFormat"),
                        format!("'{format}' is not a valid strftime pattern"),
                        None,
                    );
                }
            }
            LeafKind::Bool | LeafKind::Uuid | LeafKind::Email => {}
            LeafKind::Const { value } => {
                if value.is_none() {
                    self.error(
                        "missing_const",
                        format!("{path}/value"),
                        "const leaf requires a non-null value",
                        None,
                    );
                }
            }
            LeafKind::OneOf { values } => {
                if values.is_empty() {
                    self.error(
                        "empty_one_of",
                        format!("{path}/values"),
                        "oneOf leaf requires at least one value",
                        None,
                    );
                }
            }
            LeafKind::External { source } => match source {
                Some(source) => self.validate_source(source, &format!("{path}/source")),
                None if !self.has_default_source => self.error(
                    "missing_external_source",
                    path,
                    "external leaf has no source and externalCsvSource is not set",
                    None,
                ),
                None => {}
            },
            LeafKind::Reference { name } => {
                if name.is_empty() {
                    self.error("missing_reference", path, "reference name is empty", None);
                } else if scope == Scope::Shared {
                    self.warning(
                        "reference_in_shared_field",
                        path,
                        format!("shared fields are generated without context; '{name}' never resolves"),
                        None,
                    );
                } else if !self.shared_names.contains(name.as_str()) {
                    self.warning(
                        "unknown_reference",
                        path,
                        format!("no shared field named '{name}'"),
                        Some("the leaf will resolve to an absent value".to_string()),
                    );
                }
            }
            LeafKind::Geometry(spec) => self.validate_geometry(spec, path),
        }

        if let Some(template) = &leaf.template
            && !template.contains('%')
        {
            self.warning(
                "template_without_verb",
                format!("{path}/template"),
                "template has no %v placeholder; the generated value is discarded",
                None,
            );
        }
    }

    fn validate_range(&mut self, min: Option<i64>, max: Option<i64>, path: &str) {
        if let (Some(min), Some(max)) = (min, max)
            && min > max
        {
            self.error(
                "invalid_range",
                path,
                format!("min {min} must be <= max {max}"),
                None,
            );
        }
    }

    fn validate_date_bounds(&mut self, min: Option<&str>, max: Option<&str>, path: &str) {
        let parse = |value: &str| NaiveDate::parse_from_str(value, DATE_BOUND_FORMAT).ok();
        match (min, max) {
            (Some(min_raw), Some(max_raw)) => match (parse(min_raw), parse(max_raw)) {
                (Some(min), Some(max)) if min > max => self.error(
                    "invalid_range",
                    path,
                    format!("min {min_raw} must be <= max {max_raw}"),
                    None,
                ),
                (Some(_), Some(_)) => {}
                _ => self.error(
                    "invalid_date",
                    path,
                    "date bounds must be formatted as YYYY-MM-DD",
                    None,
                ),
            },
            (None, None) => {}
            _ => self.warning(
                "partial_date_range",
                path,
                "only one date bound is set; both are ignored",
                None,
            ),
        }
    }

    fn validate_geometry(&mut self, spec: &GeoJsonSpec, path: &str) {
        if spec.geometries.is_empty() {
            self.error(
                "empty_geometries",
                format!("{path}/geometries"),
                "geometry leaf requires at least one geometry",
                None,
            );
        }
        for (idx, geometry) in spec.geometries.iter().enumerate() {
            let geometry_path = format!("{path}/geometries/{idx}");
            if !GEOMETRY_KINDS.contains(&geometry.kind.as_str()) {
                self.warning(
                    "unknown_geometry",
                    &geometry_path,
                    format!("unknown geometry type '{}' is skipped", geometry.kind),
                    None,
                );
            }
            if geometry.max_points > 0 && geometry.min_points > geometry.max_points {
                self.error(
                    "invalid_range",
                    &geometry_path,
                    "minPoints must be <= maxPoints",
                    None,
                );
            }
            if geometry.min_lon > geometry.max_lon || geometry.min_lat > geometry.max_lat {
                self.error(
                    "invalid_bounds",
                    &geometry_path,
                    "minLon/minLat must be <= maxLon/maxLat",
                    None,
                );
            }
            if geometry.min_lon < -180.0
                || geometry.max_lon > 180.0
                || geometry.min_lat < -90.0
                || geometry.max_lat > 90.0
            {
                self.error(
                    "invalid_bounds",
                    &geometry_path,
                    "bounds must lie within [-180,180] x [-90,90]",
                    None,
                );
            }
        }
    }
}

fn produces_columns(root: &Field) -> bool {
    match root.shape() {
        Ok(FieldShape::Fields(fields)) => !fields.is_empty(),
        Ok(FieldShape::OneOf(candidates)) => candidates
            .iter()
            .any(|candidate| candidate.fields.as_ref().is_some_and(|fields| !fields.is_empty())),
        _ => false,
    }
}

fn is_valid_strftime(format: &str) -> bool {
    StrftimeItems::new(format).all(|item| !matches!(item, Item::Error))
}

fn normalized_json_pointer(pointer: &str) -> String {
    if pointer.is_empty() {
        "/".to_string()
    } else {
        pointer.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strftime_patterns_are_checked() {
        assert!(is_valid_strftime("%Y-%m-%d %H:%M"));
        assert!(!is_valid_strftime("%Q"));
    }

    #[test]
    fn empty_pointer_maps_to_root() {
        assert_eq!(normalized_json_pointer(""), "/");
        assert_eq!(normalized_json_pointer("/entities/0"), "/entities/0");
    }
}
