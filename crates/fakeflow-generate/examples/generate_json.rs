use std::env;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use fakeflow_generate::{CompiledSchema, GenerateOptions, GenerationEngine};
use fakeflow_schema::{Config, load_config_value};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args = env::args().skip(1);
    let config_path = args.next().map(PathBuf::from).ok_or("usage: generate_json <config> [out_dir]")?;
    let out_dir = args.next().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("out"));

    let config: Config = serde_json::from_value(load_config_value(&config_path)?)?;
    let schema = CompiledSchema::compile(&config)?;

    std::fs::create_dir_all(&out_dir)?;
    let mut sinks = Vec::with_capacity(schema.entities().len());
    for entity in schema.entities() {
        let path = out_dir.join(entity.target());
        sinks.push(BufWriter::new(File::create(path)?));
    }

    let report = GenerationEngine::new(GenerateOptions::default()).run(&schema, &mut sinks)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
