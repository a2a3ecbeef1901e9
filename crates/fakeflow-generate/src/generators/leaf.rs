use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Duration, Utc};
use fake::Fake;
use fake::faker::internet::en::SafeEmail;
use fake::faker::lorem::en::{Sentence, Word};
use serde_json::Value;
use serde_json::value::RawValue;

use crate::errors::{GenerationError, LeafError};
use crate::external::ExternalSource;
use crate::generators::geometry;
use crate::generators::{GeneratedValue, GeneratorContext};
use fakeflow_schema::GeoJsonSpec;

/// Length range used when an alphabet string draws a zero length.
pub const DEFAULT_STRING_LEN: (usize, usize) = (1, 32);
/// Look-back window for dates without bounds: 2^30 seconds, about 34 years.
pub const DEFAULT_DATE_WINDOW_SECS: i64 = 1 << 30;
const SENTENCE_WORDS: std::ops::Range<usize> = 4..5;

/// Compiled leaf: a value kind plus post-processing modifiers.
#[derive(Debug)]
pub struct Leaf {
    pub value: LeafValue,
    pub as_string: bool,
    pub template: Option<String>,
    pub as_json: bool,
}

#[derive(Debug)]
pub enum LeafValue {
    Text {
        source: TextSource,
        min: usize,
        max: usize,
    },
    Int {
        min: i64,
        max: i64,
    },
    Date {
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
        format: Option<String>,
    },
    Bool,
    Uuid,
    Email,
    Const(Option<Value>),
    OneOf(Vec<Value>),
    Sequence(Sequence),
    External(Option<Arc<ExternalSource>>),
    Reference(String),
    Geometry(GeoJsonSpec),
}

#[derive(Debug)]
pub enum TextSource {
    /// Lorem words and sentences.
    Words,
    Alphabet(Arc<[char]>),
    /// Named alphabet that is undefined or empty.
    Unresolved(String),
}

/// Monotonic counter starting at `min`, pinned to `max` once exceeded.
/// Seeded with `min` at compile time; nothing reads it before the first
/// `next_value`, so this is the same as initializing on first read.
#[derive(Debug)]
pub struct Sequence {
    next: AtomicI64,
    max: Option<i64>,
}

impl Sequence {
    pub fn new(min: i64, max: Option<i64>) -> Self {
        Self {
            next: AtomicI64::new(min),
            max,
        }
    }

    pub fn next_value(&self) -> i64 {
        let current = match self.next.fetch_update(Ordering::AcqRel, Ordering::Acquire, |value| {
            Some(value.saturating_add(1))
        }) {
            Ok(value) | Err(value) => value,
        };
        match self.max {
            Some(max) if current > max => max,
            _ => current,
        }
    }
}

impl Leaf {
    pub fn new(value: LeafValue) -> Self {
        Self {
            value,
            as_string: false,
            template: None,
            as_json: false,
        }
    }

    pub fn generate(&self, ctx: &GeneratorContext<'_>) -> Result<GeneratedValue, GenerationError> {
        let value = self.resolve(ctx)?;
        Ok(self.post_process(value)?)
    }

    fn resolve(&self, ctx: &GeneratorContext<'_>) -> Result<GeneratedValue, GenerationError> {
        let random = ctx.random;
        let value = match &self.value {
            LeafValue::Text { source, min, max } => {
                GeneratedValue::Text(random_text(source, *min, *max, ctx)?)
            }
            LeafValue::Int { min, max } => GeneratedValue::Int(random.range_i64(*min, *max)),
            LeafValue::Date { range, format } => {
                let instant = match range {
                    Some((min, max)) => {
                        let span = (*max - *min).num_seconds();
                        *min + Duration::seconds(random.range_i64(0, span))
                    }
                    None => {
                        Utc::now() - Duration::seconds(random.range_i64(0, DEFAULT_DATE_WINDOW_SECS))
                    }
                };
                match format {
                    Some(format) => {
                        let mut out = String::new();
                        write!(out, "{}", instant.format(format))
                            .map_err(|_| LeafError::Format(format.clone()))?;
                        GeneratedValue::Text(out)
                    }
                    None => GeneratedValue::Timestamp(instant),
                }
            }
            LeafValue::Bool => GeneratedValue::Bool(random.bool()),
            LeafValue::Uuid => GeneratedValue::Text(random_uuid(random.bytes())),
            LeafValue::Email => {
                GeneratedValue::Text(random.with(|rng| SafeEmail().fake_with_rng(rng)))
            }
            LeafValue::Const(value) => match value {
                Some(value) => GeneratedValue::Json(value.clone()),
                None => return Err(LeafError::MissingConst.into()),
            },
            LeafValue::OneOf(values) => {
                if values.is_empty() {
                    return Err(LeafError::EmptyOneOf.into());
                }
                GeneratedValue::Json(values[random.index(values.len())].clone())
            }
            LeafValue::Sequence(sequence) => GeneratedValue::Int(sequence.next_value()),
            LeafValue::External(source) => match source {
                Some(source) => GeneratedValue::Text(source.read(random)?),
                None => return Err(LeafError::MissingSource.into()),
            },
            LeafValue::Reference(name) => match ctx.shared.get(name) {
                Some(value) => value.clone(),
                None => return Err(LeafError::ReferenceNotFound(name.clone()).into()),
            },
            LeafValue::Geometry(spec) => {
                GeneratedValue::Text(geometry::generate_geojson(spec, random)?)
            }
        };
        Ok(value)
    }

    /// Apply `asString`, then `template`, then `asJson`.
    fn post_process(&self, value: GeneratedValue) -> Result<GeneratedValue, LeafError> {
        let mut value = value;
        if self.as_string {
            value = GeneratedValue::Text(value.to_string());
        }
        if let Some(template) = &self.template {
            value = GeneratedValue::Text(apply_template(template, &value.to_string()));
        }
        if self.as_json
            && let Some(text) = value.as_str()
        {
            let raw = RawValue::from_string(text.to_string())
                .map_err(|err| LeafError::InvalidRawJson(err.to_string()))?;
            value = GeneratedValue::RawJson(raw);
        }
        Ok(value)
    }
}

fn random_text(
    source: &TextSource,
    min: usize,
    max: usize,
    ctx: &GeneratorContext<'_>,
) -> Result<String, LeafError> {
    let random = ctx.random;
    let len = random.range_usize(min, max);
    match source {
        TextSource::Alphabet(chars) => {
            let len = if len == 0 {
                random.range_usize(DEFAULT_STRING_LEN.0, DEFAULT_STRING_LEN.1)
            } else {
                len
            };
            Ok((0..len).map(|_| chars[random.index(chars.len())]).collect())
        }
        TextSource::Words if len == 0 => Ok(random.with(|rng| Word().fake_with_rng(rng))),
        TextSource::Words => {
            let sentence: String = random.with(|rng| Sentence(SENTENCE_WORDS).fake_with_rng(rng));
            Ok(sentence.chars().take(len).collect())
        }
        TextSource::Unresolved(name) => Err(LeafError::UnknownAlphabet(name.clone())),
    }
}

fn random_uuid(bytes: [u8; 16]) -> String {
    uuid::Builder::from_random_bytes(bytes)
        .into_uuid()
        .to_string()
}

/// Substitute every `%v`, `%s` and `%d` with `value`; `%%` is a literal `%`.
pub fn apply_template(template: &str, value: &str) -> String {
    let mut out = String::with_capacity(template.len() + value.len());
    let mut chars = template.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '%' {
            out.push(ch);
            continue;
        }
        match chars.peek() {
            Some('v' | 's' | 'd') => {
                chars.next();
                out.push_str(value);
            }
            Some('%') => {
                chars.next();
                out.push('%');
            }
            _ => out.push('%'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Diagnostics;
    use crate::generators::SharedFields;
    use crate::random::RandomSource;
    use serde_json::json;

    fn run(leaf: &Leaf, random: &RandomSource) -> GeneratedValue {
        let shared = SharedFields::new();
        let diagnostics = Diagnostics::new();
        let ctx = GeneratorContext::new(random, &shared, &diagnostics);
        leaf.generate(&ctx).expect("generate")
    }

    #[test]
    fn template_replaces_every_verb() {
        assert_eq!(apply_template("id-%v", "7"), "id-7");
        assert_eq!(apply_template("%s/%d", "x"), "x/x");
        assert_eq!(apply_template("100%% %v%", "ok"), "100% ok%");
        assert_eq!(apply_template("static", "gone"), "static");
    }

    #[test]
    fn sequence_clamps_at_max() {
        let sequence = Sequence::new(5, Some(7));
        let reads: Vec<i64> = (0..5).map(|_| sequence.next_value()).collect();
        assert_eq!(reads, vec![5, 6, 7, 7, 7]);

        let unbounded = Sequence::new(-1, None);
        assert_eq!(unbounded.next_value(), -1);
        assert_eq!(unbounded.next_value(), 0);
    }

    #[test]
    fn alphabet_strings_use_only_alphabet_chars() {
        let random = RandomSource::from_seed(9);
        let leaf = Leaf::new(LeafValue::Text {
            source: TextSource::Alphabet(Arc::from(vec!['a', 'b'])),
            min: 6,
            max: 6,
        });
        for _ in 0..20 {
            let value = run(&leaf, &random);
            let text = value.as_str().expect("text");
            assert_eq!(text.chars().count(), 6);
            assert!(text.chars().all(|ch| ch == 'a' || ch == 'b'));
        }

        let default_len = Leaf::new(LeafValue::Text {
            source: TextSource::Alphabet(Arc::from(vec!['z'])),
            min: 0,
            max: 0,
        });
        let len = run(&default_len, &random).to_string().len();
        assert!((1..=32).contains(&len));
    }

    #[test]
    fn words_are_truncated_to_the_drawn_length() {
        let random = RandomSource::from_seed(4);
        let leaf = Leaf::new(LeafValue::Text {
            source: TextSource::Words,
            min: 3,
            max: 3,
        });
        assert_eq!(run(&leaf, &random).to_string().chars().count(), 3);
    }

    #[test]
    fn bounded_dates_stay_inside_the_range() {
        let min = DateTime::parse_from_rfc3339("2020-01-01T00:00:00Z")
            .expect("min")
            .with_timezone(&Utc);
        let max = DateTime::parse_from_rfc3339("2020-01-02T00:00:00Z")
            .expect("max")
            .with_timezone(&Utc);
        let random = RandomSource::from_seed(2);
        let leaf = Leaf::new(LeafValue::Date {
            range: Some((min, max)),
            format: None,
        });
        for _ in 0..50 {
            match run(&leaf, &random) {
                GeneratedValue::Timestamp(at) => assert!(at >= min && at <= max),
                other => panic!("unexpected value {other:?}"),
            }
        }

        let formatted = Leaf::new(LeafValue::Date {
            range: Some((min, min)),
            format: Some("%Y/%m".to_string()),
        });
        assert_eq!(run(&formatted, &random), GeneratedValue::Text("2020/01".into()));
    }

    #[test]
    fn uuid_is_version_four() {
        let random = RandomSource::from_seed(5);
        let value = run(&Leaf::new(LeafValue::Uuid), &random);
        let parsed = uuid::Uuid::parse_str(value.as_str().expect("text")).expect("uuid");
        assert_eq!(parsed.get_version_num(), 4);
    }

    #[test]
    fn modifiers_apply_in_order() {
        let random = RandomSource::from_seed(1);
        let mut leaf = Leaf::new(LeafValue::Int { min: 3, max: 3 });
        leaf.as_string = true;
        leaf.template = Some(r#"{"n":%v}"#.to_string());
        leaf.as_json = true;

        let value = run(&leaf, &random);
        let encoded = serde_json::to_string(&value).expect("encode");
        assert_eq!(encoded, r#"{"n":3}"#);
    }

    #[test]
    fn leaf_failures_surface_as_leaf_errors() {
        let random = RandomSource::from_seed(1);
        let shared = SharedFields::new();
        let diagnostics = Diagnostics::new();
        let ctx = GeneratorContext::new(&random, &shared, &diagnostics);

        let missing = Leaf::new(LeafValue::Reference("user".into()));
        assert!(matches!(
            missing.generate(&ctx),
            Err(GenerationError::Leaf(LeafError::ReferenceNotFound(_)))
        ));

        let mut bad_json = Leaf::new(LeafValue::Const(Some(json!("{nope"))));
        bad_json.as_json = true;
        assert!(matches!(
            bad_json.generate(&ctx),
            Err(GenerationError::Leaf(LeafError::InvalidRawJson(_)))
        ));
    }
}
