use std::io::Write;

use serde_json::Value;

use crate::errors::GenerationError;
use crate::generators::GeneratedValue;

/// Encode one record as a CSV row in `columns` order. Missing keys become
/// empty cells; nested values are written as compact JSON.
pub fn encode_row(
    record: &GeneratedValue,
    columns: &[String],
    delimiter: u8,
) -> Result<Vec<u8>, GenerationError> {
    let cells: Vec<String> = match record {
        GeneratedValue::Object(map) => columns
            .iter()
            .map(|column| map.get(column).map(ToString::to_string).unwrap_or_default())
            .collect(),
        GeneratedValue::Json(Value::Object(map)) => columns
            .iter()
            .map(|column| map.get(column).map(json_cell).unwrap_or_default())
            .collect(),
        other => {
            return Err(GenerationError::UnsupportedRecord(format!(
                "csv output requires an object record, got {}",
                other.kind()
            )));
        }
    };
    encode_cells(&cells, delimiter)
}

/// Encode the header row.
pub fn encode_header(columns: &[String], delimiter: u8) -> Result<Vec<u8>, GenerationError> {
    encode_cells(columns, delimiter)
}

fn json_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(value) => value.clone(),
        other => other.to_string(),
    }
}

fn encode_cells<S: AsRef<[u8]>>(cells: &[S], delimiter: u8) -> Result<Vec<u8>, GenerationError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .from_writer(Vec::with_capacity(128));
    writer.write_record(cells)?;
    writer
        .into_inner()
        .map_err(|err| GenerationError::Io(err.into_error()))
}

/// Sink adapter that counts bytes accepted by the inner writer.
pub struct CountingWriter<W: Write> {
    inner: W,
    bytes: u64,
}

impl<W: Write> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, bytes: 0 }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let size = self.inner.write(buf)?;
        self.bytes = self.bytes.saturating_add(size as u64);
        Ok(size)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn row_follows_column_order_and_quotes() {
        let mut map = BTreeMap::new();
        map.insert("b".to_string(), GeneratedValue::Int(1));
        map.insert("a".to_string(), GeneratedValue::Text("x, y".to_string()));
        map.insert("c".to_string(), GeneratedValue::Null);
        let row = encode_row(
            &GeneratedValue::Object(map),
            &columns(&["a", "b", "c", "missing"]),
            b',',
        )
        .expect("encode");
        assert_eq!(String::from_utf8(row).expect("utf8"), "\"x, y\",1,,\n");
    }

    #[test]
    fn json_objects_and_custom_delimiters() {
        let row = encode_row(
            &GeneratedValue::Json(json!({"k": "v", "n": [1, 2]})),
            &columns(&["k", "n"]),
            b';',
        )
        .expect("encode");
        assert_eq!(String::from_utf8(row).expect("utf8"), "v;[1,2]\n");
        let header = encode_header(&columns(&["k", "n"]), b'\t').expect("header");
        assert_eq!(header, b"k\tn\n");
    }

    #[test]
    fn scalars_are_rejected() {
        let err = encode_row(&GeneratedValue::Int(1), &columns(&["a"]), b',').expect_err("scalar");
        assert!(matches!(err, GenerationError::UnsupportedRecord(_)));
    }

    #[test]
    fn counting_writer_tracks_bytes() {
        let mut sink = CountingWriter::new(Vec::new());
        sink.write_all(b"abc").expect("write");
        sink.write_all(b"de").expect("write");
        assert_eq!(sink.bytes_written(), 5);
    }
}
