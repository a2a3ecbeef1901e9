use fakeflow_generate::{
    CompiledSchema, Diagnostics, GeneratedValue, GeneratorContext, RandomSource, SharedFields,
};
use fakeflow_schema::Config;
use serde_json::{Value, json};

/// Compile a single-entity config whose root object holds `fields`.
fn compile(fields: Value) -> CompiledSchema {
    compile_config(json!({
        "totalCount": 1,
        "entities": [{"field": {"fields": fields}, "config": {"filepath": "out.json"}}]
    }))
}

fn compile_config(config: Value) -> CompiledSchema {
    let config: Config = serde_json::from_value(config).expect("parse config");
    CompiledSchema::compile(&config).expect("compile config")
}

fn generate_n(schema: &CompiledSchema, n: usize, seed: u64) -> (Vec<GeneratedValue>, Diagnostics) {
    let random = RandomSource::from_seed(seed);
    let diagnostics = Diagnostics::new();
    let mut records = Vec::with_capacity(n);
    for _ in 0..n {
        let shared = schema
            .build_shared_fields(&random, &diagnostics)
            .expect("shared fields");
        let ctx = GeneratorContext::new(&random, &shared, &diagnostics);
        records.push(schema.entities()[0].root().generate(&ctx).expect("generate"));
    }
    (records, diagnostics)
}

fn field<'a>(record: &'a GeneratedValue, name: &str) -> &'a GeneratedValue {
    record
        .as_object()
        .and_then(|map| map.get(name))
        .unwrap_or_else(|| panic!("missing field {name} in {record:?}"))
}

#[test]
fn nil_chance_extremes() {
    let schema = compile(json!([
        {"name": "always", "nilChance": 100, "type": {"type": "bool"}},
        {"name": "never", "type": {"type": "bool"}}
    ]));
    let (records, _) = generate_n(&schema, 200, 1);
    for record in &records {
        assert!(field(record, "always").is_null());
        assert!(!field(record, "never").is_null());
    }
}

#[test]
fn int_with_equal_bounds_is_constant() {
    let schema = compile(json!([{"name": "k", "type": {"type": "int", "min": 42, "max": 42}}]));
    let (records, _) = generate_n(&schema, 50, 2);
    assert!(records.iter().all(|record| field(record, "k").as_i64() == Some(42)));
}

#[test]
fn unset_int_bounds_are_zero() {
    let schema = compile(json!([{"name": "k", "type": {"type": "int"}}]));
    let (records, _) = generate_n(&schema, 10, 2);
    assert!(records.iter().all(|record| field(record, "k").as_i64() == Some(0)));
}

#[test]
fn sequence_counts_then_sticks_at_max() {
    let schema = compile(json!([{"name": "id", "type": {"type": "sequence", "min": 5, "max": 7}}]));
    let (records, _) = generate_n(&schema, 6, 3);
    let ids: Vec<i64> = records
        .iter()
        .filter_map(|record| field(record, "id").as_i64())
        .collect();
    assert_eq!(ids, vec![5, 6, 7, 7, 7, 7]);
}

#[test]
fn weighted_one_of_follows_weights() {
    let schema = compile(json!([{"name": "tier", "oneOfFields": [
        {"weight": 0.2, "type": {"type": "const", "value": "basic"}},
        {"weight": 0.8, "type": {"type": "const", "value": "premium"}}
    ]}]));
    let draws = 100_000;
    let (records, _) = generate_n(&schema, draws, 4);
    let basic = records
        .iter()
        .filter(|record| field(record, "tier").as_str() == Some("basic"))
        .count();
    let share = basic as f64 / draws as f64;
    assert!((share - 0.2).abs() <= 0.02, "basic share {share}");
}

#[test]
fn references_copy_shared_fields() {
    let schema = compile_config(json!({
        "totalCount": 1,
        "sharedFields": [{"name": "userId", "type": {"type": "uuid"}}],
        "entities": [{
            "field": {"fields": [
                {"name": "owner", "type": {"type": "reference", "name": "userId"}},
                {"name": "again", "type": {"type": "reference", "name": "userId"}},
                {"name": "ghost", "type": {"type": "reference", "name": "nobody"}}
            ]},
            "config": {"filepath": "out.json"}
        }]
    }));
    let (records, diagnostics) = generate_n(&schema, 5, 5);
    for record in &records {
        assert_eq!(field(record, "owner"), field(record, "again"));
        assert!(field(record, "owner").as_str().is_some());
        assert!(field(record, "ghost").is_null());
    }
    assert_eq!(diagnostics.count("reference_not_found"), 5);
}

#[test]
fn configuration_gaps_become_absent_values() {
    let schema = compile(json!([
        {"name": "c", "type": {"type": "const"}},
        {"name": "o", "type": {"type": "oneOf", "values": []}},
        {"name": "s", "type": {"type": "string", "alphabet": "nope"}},
        {"name": "w", "oneOfFields": [
            {"weight": 1.0, "type": {"type": "bool"}},
            {"type": {"type": "bool"}}
        ]},
        {"name": "ok", "type": {"type": "oneOf", "values": ["a"]}}
    ]));
    let (records, diagnostics) = generate_n(&schema, 3, 6);
    for record in &records {
        for name in ["c", "o", "s", "w"] {
            assert!(field(record, name).is_null(), "{name} should be absent");
        }
        assert_eq!(field(record, "ok").as_str(), Some("a"));
    }
    for code in ["missing_const", "empty_one_of", "unknown_alphabet", "invalid_weights"] {
        assert_eq!(diagnostics.count(code), 3, "{code}");
    }
}

#[test]
fn arrays_skip_absent_items_and_respect_lengths() {
    let schema = compile(json!([
        {"name": "fixed", "array": {"fixed": [
            {"type": {"type": "const", "value": 1}},
            {"nilChance": 100, "type": {"type": "const", "value": 2}},
            {"type": {"type": "const", "value": 3}}
        ]}},
        {"name": "tags", "array": {"value": {"type": {"type": "email"}}, "minLen": 2, "maxLen": 4}}
    ]));
    let (records, _) = generate_n(&schema, 30, 7);
    for record in &records {
        let fixed = field(record, "fixed").as_array().expect("array");
        assert_eq!(fixed, &[GeneratedValue::Json(json!(1)), GeneratedValue::Json(json!(3))]);
        let tags = field(record, "tags").as_array().expect("array");
        assert!((2..=4).contains(&tags.len()));
        assert!(tags.iter().all(|tag| tag.as_str().is_some_and(|email| email.contains('@'))));
    }
}

#[test]
fn shared_fields_cannot_see_each_other() {
    let schema = compile_config(json!({
        "totalCount": 1,
        "sharedFields": [
            {"name": "a", "type": {"type": "int", "min": 1, "max": 1}},
            {"name": "b", "type": {"type": "reference", "name": "a"}}
        ],
        "entities": [{"field": {"fields": [{"name": "x", "type": {"type": "bool"}}]}, "config": {"filepath": "out.json"}}]
    }));
    let random = RandomSource::from_seed(1);
    let diagnostics = Diagnostics::new();
    let shared: SharedFields = schema
        .build_shared_fields(&random, &diagnostics)
        .expect("shared");
    assert_eq!(shared["a"], GeneratedValue::Int(1));
    assert!(shared["b"].is_null());
}

#[test]
fn geometry_leaf_embeds_geojson_with_as_json() {
    let schema = compile(json!([{"name": "area", "type": {
        "type": "geometry",
        "srs": "EPSG:4326",
        "asJson": true,
        "geometries": [{"type": "Polygon", "minPoints": 6, "maxPoints": 9}]
    }}]));
    let (records, _) = generate_n(&schema, 5, 8);
    for record in &records {
        let encoded: Value = serde_json::to_value(record).expect("encode");
        let ring = encoded["area"]["geometry"]["coordinates"][0]
            .as_array()
            .expect("ring");
        assert!(ring.len() >= 2);
        assert_eq!(ring.first(), ring.last());
        assert_eq!(encoded["area"]["properties"]["srs"], "EPSG:4326");
    }
}
