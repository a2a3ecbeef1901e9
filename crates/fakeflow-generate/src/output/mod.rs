//! Record serializers and sink helpers.

pub mod csv;
pub mod json;

use std::io::Write;

use crate::compile::CompiledEntity;
use crate::errors::GenerationError;
use crate::generators::GeneratedValue;
use fakeflow_schema::OutputFormat;

pub use self::csv::CountingWriter;

/// Serialize one record in the entity's output format.
pub fn encode_record(
    entity: &CompiledEntity,
    record: &GeneratedValue,
) -> Result<Vec<u8>, GenerationError> {
    match entity.format() {
        OutputFormat::Json => json::encode_line(record),
        OutputFormat::Csv => csv::encode_row(record, entity.columns(), entity.separator()),
    }
}

/// Write the header row for CSV entities; JSON entities have none.
pub fn write_header<W: Write>(entity: &CompiledEntity, sink: &mut W) -> Result<u64, GenerationError> {
    if entity.format() != OutputFormat::Csv {
        return Ok(0);
    }
    let header = csv::encode_header(entity.columns(), entity.separator())?;
    sink.write_all(&header)?;
    Ok(header.len() as u64)
}
