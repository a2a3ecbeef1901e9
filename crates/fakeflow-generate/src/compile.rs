//! Compile a validated [`Config`] into the immutable runtime tree.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, warn};

use crate::diagnostics::Diagnostics;
use crate::errors::GenerationError;
use crate::external::ExternalSource;
use crate::gate::EntityGate;
use crate::generators::{
    GeneratorContext, Leaf, LeafValue, Node, NodeKind, Selection, Sequence, SharedFields,
    TextSource,
};
use crate::random::RandomSource;
use fakeflow_schema::{
    ArraySpec, Config, DATE_BOUND_FORMAT, Entity, ExternalCsvSource, Field, FieldShape, LeafKind,
    LeafType, OutputFormat, parse_separator,
};

const DEFAULT_CSV_SEPARATOR: u8 = b',';

/// Runtime form of a [`Config`].
#[derive(Debug)]
pub struct CompiledSchema {
    total_count: u64,
    seed: Option<u64>,
    shared: Vec<(String, Node)>,
    entities: Vec<CompiledEntity>,
    sources: Vec<Arc<ExternalSource>>,
}

/// One output stream with its admission gate and CSV column cache.
#[derive(Debug)]
pub struct CompiledEntity {
    index: usize,
    target: PathBuf,
    root: Node,
    gate: EntityGate,
    format: OutputFormat,
    separator: u8,
    columns: OnceLock<Vec<String>>,
}

impl CompiledEntity {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn gate(&self) -> &EntityGate {
        &self.gate
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn separator(&self) -> u8 {
        self.separator
    }

    /// Sorted CSV column names, derived once from the root shape.
    pub fn columns(&self) -> &[String] {
        self.columns.get_or_init(|| self.root.field_names())
    }
}

impl CompiledSchema {
    pub fn compile(config: &Config) -> Result<Self, GenerationError> {
        let mut compiler = Compiler::new(config);

        let mut shared = Vec::with_capacity(config.shared_fields.len());
        for field in &config.shared_fields {
            if field.name.is_empty() {
                warn!(event = "shared_field_skipped", "shared field without a name is skipped");
                continue;
            }
            let node = compiler.compile_field(field, &format!("sharedFields.{}", field.name))?;
            shared.push((field.name.clone(), node));
        }

        let mut entities = Vec::with_capacity(config.entities.len());
        for (index, entity) in config.entities.iter().enumerate() {
            entities.push(compiler.compile_entity(index, entity)?);
        }

        debug!(
            event = "schema_compiled",
            shared_fields = shared.len(),
            entities = entities.len(),
            external_sources = compiler.sources.len()
        );
        Ok(Self {
            total_count: config.total_count,
            seed: config.seed,
            shared,
            entities,
            sources: compiler.sources.into_values().collect(),
        })
    }

    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    pub fn entities(&self) -> &[CompiledEntity] {
        &self.entities
    }

    pub fn external_sources(&self) -> &[Arc<ExternalSource>] {
        &self.sources
    }

    /// Build one record's shared fields. Shared fields see no other shared
    /// values, so references inside them never resolve.
    pub fn build_shared_fields(
        &self,
        random: &RandomSource,
        diagnostics: &Diagnostics,
    ) -> Result<SharedFields, GenerationError> {
        let empty = SharedFields::new();
        let ctx = GeneratorContext::new(random, &empty, diagnostics);
        let mut shared = SharedFields::with_capacity(self.shared.len());
        for (name, node) in &self.shared {
            shared.insert(name.clone(), node.generate(&ctx)?);
        }
        Ok(shared)
    }
}

struct Compiler<'a> {
    alphabets: HashMap<&'a str, Arc<[char]>>,
    sources: HashMap<ExternalCsvSource, Arc<ExternalSource>>,
    default_source: Option<&'a ExternalCsvSource>,
}

impl<'a> Compiler<'a> {
    fn new(config: &'a Config) -> Self {
        let mut alphabets = HashMap::new();
        for alphabet in &config.alphabets {
            let chars: Vec<char> = alphabet.values.chars().collect();
            if chars.is_empty() {
                continue;
            }
            alphabets.insert(alphabet.name.as_str(), Arc::from(chars));
        }
        Self {
            alphabets,
            sources: HashMap::new(),
            default_source: config.external_csv_source.as_ref(),
        }
    }

    fn compile_entity(&mut self, index: usize, entity: &Entity) -> Result<CompiledEntity, GenerationError> {
        let config = &entity.config;
        let separator = parse_separator(config.csv_separator.as_deref(), DEFAULT_CSV_SEPARATOR)
            .ok_or_else(|| {
                GenerationError::InvalidConfig(format!(
                    "entities[{index}]: csvSeparator must be a single ASCII character"
                ))
            })?;
        let root = self.compile_field(&entity.field, &format!("entities[{index}]"))?;
        Ok(CompiledEntity {
            index,
            target: config.filepath.clone(),
            root,
            gate: EntityGate::from_config(config),
            format: config.output_format,
            separator,
            columns: OnceLock::new(),
        })
    }

    fn compile_field(&mut self, field: &Field, path: &str) -> Result<Node, GenerationError> {
        if field.nil_chance > 100 {
            return Err(invalid(path, format!("nilChance {} exceeds 100", field.nil_chance)));
        }
        let shape = field.shape().map_err(|err| invalid(path, err))?;
        let kind = match shape {
            FieldShape::Leaf(leaf) => NodeKind::Leaf(self.compile_leaf(leaf, path)?),
            FieldShape::Fields(fields) => {
                let mut children = Vec::with_capacity(fields.len());
                for child in fields {
                    let child_path = format!("{path}.{}", child.name);
                    children.push((child.name.clone(), self.compile_field(child, &child_path)?));
                }
                NodeKind::Object(children)
            }
            FieldShape::Array(array) => self.compile_array(array, path)?,
            FieldShape::OneOf(candidates) => {
                let weights: Vec<f64> = candidates.iter().map(|field| field.weight).collect();
                let mut nodes = Vec::with_capacity(candidates.len());
                for (idx, candidate) in candidates.iter().enumerate() {
                    nodes.push(self.compile_field(candidate, &format!("{path}|{idx}"))?);
                }
                NodeKind::OneOf {
                    candidates: nodes,
                    selection: Selection::from_weights(&weights),
                }
            }
        };
        Ok(Node::new(path, field.nil_chance, kind))
    }

    fn compile_array(&mut self, array: &ArraySpec, path: &str) -> Result<NodeKind, GenerationError> {
        match (&array.value, &array.fixed) {
            (Some(value), None) => {
                if array.min_len > array.max_len {
                    return Err(invalid(
                        path,
                        format!("minLen {} exceeds maxLen {}", array.min_len, array.max_len),
                    ));
                }
                if array.max_len == 0 {
                    warn!(event = "zero_array_length", path, "templated array always yields []");
                }
                let value = self.compile_field(value, &format!("{path}[]"))?;
                Ok(NodeKind::TemplateArray {
                    value: Box::new(value),
                    min_len: array.min_len,
                    max_len: array.max_len,
                })
            }
            (None, Some(children)) => {
                let mut nodes = Vec::with_capacity(children.len());
                for (idx, child) in children.iter().enumerate() {
                    nodes.push(self.compile_field(child, &format!("{path}[{idx}]"))?);
                }
                Ok(NodeKind::FixedArray(nodes))
            }
            _ => Err(invalid(path, "array must set exactly one of value or fixed")),
        }
    }

    fn compile_leaf(&mut self, leaf: &LeafType, path: &str) -> Result<Leaf, GenerationError> {
        let value = match &leaf.kind {
            LeafKind::String { alphabet, min, max } => {
                let (min, max) = length_bounds(*min, *max, path)?;
                let source = match alphabet {
                    None => TextSource::Words,
                    Some(name) => match self.alphabets.get(name.as_str()) {
                        Some(chars) => TextSource::Alphabet(Arc::clone(chars)),
                        None => TextSource::Unresolved(name.clone()),
                    },
                };
                LeafValue::Text { source, min, max }
            }
            LeafKind::Int { min, max } => {
                let min = min.unwrap_or(0);
                let max = max.unwrap_or(min);
                if min > max {
                    return Err(invalid(path, format!("min {min} exceeds max {max}")));
                }
                LeafValue::Int { min, max }
            }
            LeafKind::Date {
                min,
                max,
                date_format,
            } => {
                let range = match (min, max) {
                    (Some(min), Some(max)) => {
                        let min = parse_date_bound(min, path)?;
                        let max = parse_date_bound(max, path)?;
                        if min > max {
                            return Err(invalid(path, "date min is after max"));
                        }
                        Some((min, max))
                    }
                    _ => None,
                };
                if let Some(format) = date_format
                    && StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
                {
                    return Err(invalid(path, format!("invalid dateFormat '{format}'")));
                }
                LeafValue::Date {
                    range,
                    format: date_format.clone(),
                }
            }
            LeafKind::Bool => LeafValue::Bool,
            LeafKind::Uuid => LeafValue::Uuid,
            LeafKind::Email => LeafValue::Email,
            LeafKind::Const { value } => LeafValue::Const(value.clone()),
            LeafKind::OneOf { values } => LeafValue::OneOf(values.clone()),
            LeafKind::Sequence { min, max } => {
                let min = min.unwrap_or(0);
                if let Some(max) = max
                    && min > *max
                {
                    return Err(invalid(path, format!("min {min} exceeds max {max}")));
                }
                LeafValue::Sequence(Sequence::new(min, *max))
            }
            LeafKind::External { source } => {
                let config = source.as_ref().or(self.default_source);
                LeafValue::External(config.map(|config| self.source(config)))
            }
            LeafKind::Reference { name } => LeafValue::Reference(name.clone()),
            LeafKind::Geometry(spec) => LeafValue::Geometry(spec.clone()),
        };

        Ok(Leaf {
            value,
            as_string: leaf.as_string,
            template: leaf.template.clone(),
            as_json: leaf.as_json,
        })
    }

    /// One shared handle per distinct source config.
    fn source(&mut self, config: &ExternalCsvSource) -> Arc<ExternalSource> {
        Arc::clone(
            self.sources
                .entry(config.clone())
                .or_insert_with(|| Arc::new(ExternalSource::new(config.clone()))),
        )
    }
}

fn length_bounds(min: Option<i64>, max: Option<i64>, path: &str) -> Result<(usize, usize), GenerationError> {
    let min = min.unwrap_or(0);
    let max = max.unwrap_or(min);
    if min < 0 || min > max {
        return Err(invalid(path, format!("invalid length range [{min}, {max}]")));
    }
    let to_len = |value: i64| usize::try_from(value).map_err(|err| invalid(path, err));
    Ok((to_len(min)?, to_len(max)?))
}

fn parse_date_bound(value: &str, path: &str) -> Result<DateTime<Utc>, GenerationError> {
    NaiveDate::parse_from_str(value, DATE_BOUND_FORMAT)
        .map(|date| date.and_time(chrono::NaiveTime::MIN).and_utc())
        .map_err(|err| invalid(path, format!("date bound '{value}': {err}")))
}

fn invalid(path: &str, message: impl std::fmt::Display) -> GenerationError {
    GenerationError::InvalidConfig(format!("{path}: {message}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(value: serde_json::Value) -> Config {
        serde_json::from_value(value).expect("parse config")
    }

    #[test]
    fn shape_violations_fail_compilation() {
        let err = CompiledSchema::compile(&config(json!({
            "totalCount": 1,
            "entities": [{
                "field": {"fields": [{"name": "broken"}]},
                "config": {"filepath": "out.json"}
            }]
        })))
        .expect_err("missing shape");
        match err {
            GenerationError::InvalidConfig(message) => {
                assert!(message.starts_with("entities[0].broken"), "{message}")
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn bad_parameters_fail_compilation() {
        for leaf in [
            json!({"type": "int", "min": 3, "max": 1}),
            json!({"type": "date", "min": "2021-01-01", "max": "2020-01-01"}),
            json!({"type": "date", "dateFormat": "%Q"}),
            json!({"type": "string", "min": -1}),
        ] {
            let result = CompiledSchema::compile(&config(json!({
                "totalCount": 1,
                "entities": [{
                    "field": {"fields": [{"name": "x", "type": leaf}]},
                    "config": {"filepath": "out.json"}
                }]
            })));
            assert!(matches!(result, Err(GenerationError::InvalidConfig(_))), "{leaf}");
        }
    }

    #[test]
    fn columns_come_from_fields_or_one_of_branches() {
        let schema = CompiledSchema::compile(&config(json!({
            "totalCount": 1,
            "entities": [
                {
                    "field": {"fields": [
                        {"name": "b", "type": {"type": "bool"}},
                        {"name": "a", "type": {"type": "bool"}}
                    ]},
                    "config": {"filepath": "plain.csv", "outputFormat": "csv"}
                },
                {
                    "field": {"oneOfFields": [
                        {"fields": [{"name": "z", "type": {"type": "bool"}}, {"name": "k", "type": {"type": "bool"}}]},
                        {"fields": [{"name": "k", "type": {"type": "bool"}}, {"name": "m", "type": {"type": "bool"}}]}
                    ]},
                    "config": {"filepath": "union.csv", "outputFormat": "csv", "csvSeparator": ";"}
                }
            ]
        })))
        .expect("compile");

        assert_eq!(schema.entities()[0].columns(), ["a", "b"]);
        assert_eq!(schema.entities()[1].columns(), ["k", "m", "z"]);
        assert_eq!(schema.entities()[1].separator(), b';');
    }

    #[test]
    fn identical_sources_share_one_handle() {
        let source = json!({"filepath": "cities.csv", "targetField": "city"});
        let schema = CompiledSchema::compile(&config(json!({
            "totalCount": 1,
            "externalCsvSource": source,
            "entities": [{
                "field": {"fields": [
                    {"name": "a", "type": {"type": "external"}},
                    {"name": "b", "type": {"type": "external", "source": source}},
                    {"name": "c", "type": {"type": "external", "source": {"filepath": "cities.csv", "targetField": "zip"}}}
                ]},
                "config": {"filepath": "out.json"}
            }]
        })))
        .expect("compile");
        assert_eq!(schema.external_sources().len(), 2);
        assert!(schema.external_sources().iter().all(|source| !source.is_loaded()));
    }
}
