//! Runtime schema tree and the recursive value interpreter.

pub mod geometry;
pub mod leaf;

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use serde_json::Value;
use serde_json::value::RawValue;

use crate::diagnostics::Diagnostics;
use crate::errors::{GenerationError, LeafError};
use crate::random::RandomSource;

pub use leaf::{Leaf, LeafValue, Sequence, TextSource};

/// Value produced by a schema node. `Null` is the absent value.
#[derive(Debug, Clone)]
pub enum GeneratedValue {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Json(Value),
    /// Pre-encoded JSON embedded without quoting.
    RawJson(Box<RawValue>),
    Array(Vec<GeneratedValue>),
    Object(BTreeMap<String, GeneratedValue>),
}

impl GeneratedValue {
    pub fn is_null(&self) -> bool {
        matches!(self, GeneratedValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            GeneratedValue::Int(value) => Some(*value),
            GeneratedValue::Json(value) => value.as_i64(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            GeneratedValue::Text(value) => Some(value.as_str()),
            GeneratedValue::Json(Value::String(value)) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[GeneratedValue]> {
        match self {
            GeneratedValue::Array(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, GeneratedValue>> {
        match self {
            GeneratedValue::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GeneratedValue::Null => "null",
            GeneratedValue::Bool(_) => "bool",
            GeneratedValue::Int(_) => "int",
            GeneratedValue::Text(_) => "text",
            GeneratedValue::Timestamp(_) => "timestamp",
            GeneratedValue::Json(_) => "json",
            GeneratedValue::RawJson(_) => "raw_json",
            GeneratedValue::Array(_) => "array",
            GeneratedValue::Object(_) => "object",
        }
    }
}

impl PartialEq for GeneratedValue {
    fn eq(&self, other: &Self) -> bool {
        use GeneratedValue::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Text(a), Text(b)) => a == b,
            (Timestamp(a), Timestamp(b)) => a == b,
            (Json(a), Json(b)) => a == b,
            (RawJson(a), RawJson(b)) => a.get() == b.get(),
            (Array(a), Array(b)) => a == b,
            (Object(a), Object(b)) => a == b,
            _ => false,
        }
    }
}

impl From<Value> for GeneratedValue {
    fn from(value: Value) -> Self {
        GeneratedValue::Json(value)
    }
}

impl Serialize for GeneratedValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            GeneratedValue::Null => serializer.serialize_unit(),
            GeneratedValue::Bool(value) => serializer.serialize_bool(*value),
            GeneratedValue::Int(value) => serializer.serialize_i64(*value),
            GeneratedValue::Text(value) => serializer.serialize_str(value),
            GeneratedValue::Timestamp(value) => serializer.serialize_str(&format_timestamp(value)),
            GeneratedValue::Json(value) => value.serialize(serializer),
            GeneratedValue::RawJson(value) => value.serialize(serializer),
            GeneratedValue::Array(items) => serializer.collect_seq(items),
            GeneratedValue::Object(map) => serializer.collect_map(map),
        }
    }
}

/// Display string used by `asString`, templates and CSV cells.
impl fmt::Display for GeneratedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeneratedValue::Null => Ok(()),
            GeneratedValue::Bool(value) => write!(f, "{value}"),
            GeneratedValue::Int(value) => write!(f, "{value}"),
            GeneratedValue::Text(value) => f.write_str(value),
            GeneratedValue::Timestamp(value) => f.write_str(&format_timestamp(value)),
            GeneratedValue::Json(Value::Null) => Ok(()),
            GeneratedValue::Json(Value::String(value)) => f.write_str(value),
            GeneratedValue::Json(value) => write!(f, "{value}"),
            GeneratedValue::RawJson(value) => f.write_str(value.get()),
            GeneratedValue::Array(_) | GeneratedValue::Object(_) => {
                let encoded = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                f.write_str(&encoded)
            }
        }
    }
}

pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Shared-field values built once per record.
pub type SharedFields = HashMap<String, GeneratedValue>;

/// Everything a node needs to produce one value.
#[derive(Clone, Copy)]
pub struct GeneratorContext<'a> {
    pub random: &'a RandomSource,
    pub shared: &'a SharedFields,
    pub diagnostics: &'a Diagnostics,
}

impl<'a> GeneratorContext<'a> {
    pub fn new(
        random: &'a RandomSource,
        shared: &'a SharedFields,
        diagnostics: &'a Diagnostics,
    ) -> Self {
        Self {
            random,
            shared,
            diagnostics,
        }
    }
}

/// Compiled schema node: a shape plus its nil chance.
#[derive(Debug)]
pub struct Node {
    path: String,
    nil_chance: u8,
    kind: NodeKind,
}

#[derive(Debug)]
pub enum NodeKind {
    /// Named children in declaration order.
    Object(Vec<(String, Node)>),
    FixedArray(Vec<Node>),
    TemplateArray {
        value: Box<Node>,
        min_len: usize,
        max_len: usize,
    },
    OneOf {
        candidates: Vec<Node>,
        selection: Selection,
    },
    Leaf(Leaf),
}

/// How a one-of list picks its candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Uniform,
    /// Cumulative weights; the last entry is the total.
    Weighted(Vec<f64>),
    /// Some but not all candidates carry a weight.
    InvalidWeights,
}

impl Selection {
    pub fn from_weights(weights: &[f64]) -> Self {
        let weighted = weights.iter().filter(|weight| **weight > 0.0).count();
        if weighted == 0 {
            return Selection::Uniform;
        }
        if weighted != weights.len() || weights.iter().any(|weight| !weight.is_finite()) {
            return Selection::InvalidWeights;
        }
        let mut total = 0.0;
        let cumulative = weights
            .iter()
            .map(|weight| {
                total += weight;
                total
            })
            .collect();
        Selection::Weighted(cumulative)
    }

    fn pick(&self, len: usize, random: &RandomSource) -> Result<usize, LeafError> {
        if len == 0 {
            return Err(LeafError::EmptyOneOf);
        }
        match self {
            Selection::Uniform => Ok(random.index(len)),
            Selection::Weighted(cumulative) => {
                let total = cumulative.last().copied().unwrap_or(0.0);
                let draw = random.unit() * total;
                let idx = cumulative.partition_point(|bound| *bound <= draw);
                Ok(idx.min(len - 1))
            }
            Selection::InvalidWeights => Err(LeafError::InvalidWeights),
        }
    }
}

impl Node {
    pub fn new(path: impl Into<String>, nil_chance: u8, kind: NodeKind) -> Self {
        Self {
            path: path.into(),
            nil_chance,
            kind,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Produce one value. Only external-source failures escape as errors;
    /// every other failure becomes a diagnostic and an absent value.
    pub fn generate(&self, ctx: &GeneratorContext<'_>) -> Result<GeneratedValue, GenerationError> {
        if self.nil_chance > 0 && ctx.random.percent() <= self.nil_chance {
            return Ok(GeneratedValue::Null);
        }

        let result = match &self.kind {
            NodeKind::Object(children) => {
                let mut map = BTreeMap::new();
                for (name, child) in children {
                    map.insert(name.clone(), child.generate(ctx)?);
                }
                Ok(GeneratedValue::Object(map))
            }
            NodeKind::FixedArray(children) => {
                let mut items = Vec::with_capacity(children.len());
                for child in children {
                    let value = child.generate(ctx)?;
                    if !value.is_null() {
                        items.push(value);
                    }
                }
                Ok(GeneratedValue::Array(items))
            }
            NodeKind::TemplateArray {
                value,
                min_len,
                max_len,
            } => {
                let len = ctx.random.range_usize(*min_len, *max_len);
                let mut items = Vec::with_capacity(len);
                for _ in 0..len {
                    let item = value.generate(ctx)?;
                    if !item.is_null() {
                        items.push(item);
                    }
                }
                Ok(GeneratedValue::Array(items))
            }
            NodeKind::OneOf {
                candidates,
                selection,
            } => match selection.pick(candidates.len(), ctx.random) {
                Ok(idx) => candidates[idx].generate(ctx),
                Err(err) => Err(err.into()),
            },
            NodeKind::Leaf(leaf) => leaf.generate(ctx),
        };

        match result {
            Err(GenerationError::Leaf(err)) => {
                ctx.diagnostics.report(err.code(), &self.path, &err);
                Ok(GeneratedValue::Null)
            }
            other => other,
        }
    }

    /// Names of the object keys this node can produce: its own children, or
    /// the union over one-of candidates that are objects.
    pub fn field_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        match &self.kind {
            NodeKind::Object(children) => {
                names.extend(children.iter().map(|(name, _)| name.clone()));
            }
            NodeKind::OneOf { candidates, .. } => {
                for candidate in candidates {
                    if let NodeKind::Object(children) = &candidate.kind {
                        names.extend(children.iter().map(|(name, _)| name.clone()));
                    }
                }
            }
            _ => {}
        }
        names.sort();
        names.dedup();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn display_stringifies_for_csv_cells() {
        assert_eq!(GeneratedValue::Null.to_string(), "");
        assert_eq!(GeneratedValue::Int(-4).to_string(), "-4");
        assert_eq!(GeneratedValue::Text("a,b".into()).to_string(), "a,b");
        assert_eq!(GeneratedValue::Json(json!("plain")).to_string(), "plain");
        assert_eq!(GeneratedValue::Json(json!({"k": 1})).to_string(), r#"{"k":1}"#);

        let list = GeneratedValue::Array(vec![GeneratedValue::Int(1), GeneratedValue::Null]);
        assert_eq!(list.to_string(), "[1,null]");
    }

    #[test]
    fn raw_json_is_embedded_unquoted() {
        let raw = RawValue::from_string(r#"{"x":[1,2]}"#.to_string()).expect("raw");
        let mut map = BTreeMap::new();
        map.insert("geo".to_string(), GeneratedValue::RawJson(raw));
        map.insert(
            "at".to_string(),
            GeneratedValue::Timestamp(DateTime::from_timestamp(0, 0).expect("epoch")),
        );
        let encoded = serde_json::to_string(&GeneratedValue::Object(map)).expect("encode");
        assert_eq!(encoded, r#"{"at":"1970-01-01T00:00:00Z","geo":{"x":[1,2]}}"#);
    }

    #[test]
    fn weights_normalize_to_cumulative_bounds() {
        assert_eq!(Selection::from_weights(&[0.0, 0.0]), Selection::Uniform);
        assert_eq!(Selection::from_weights(&[1.0, 0.0]), Selection::InvalidWeights);
        assert_eq!(
            Selection::from_weights(&[2.0, 6.0]),
            Selection::Weighted(vec![2.0, 8.0])
        );
    }

    #[test]
    fn weighted_pick_respects_boundaries() {
        let random = RandomSource::from_seed(3);
        let selection = Selection::Weighted(vec![1.0, 1.0, 2.0]);
        for _ in 0..100 {
            // the zero-width middle slot is never picked
            let idx = selection.pick(3, &random).expect("pick");
            assert_ne!(idx, 1);
        }
        assert!(matches!(
            Selection::Uniform.pick(0, &random),
            Err(LeafError::EmptyOneOf)
        ));
    }
}
