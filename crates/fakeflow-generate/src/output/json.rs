use crate::errors::GenerationError;
use crate::generators::GeneratedValue;

/// Encode one record as a compact JSON line.
pub fn encode_line(record: &GeneratedValue) -> Result<Vec<u8>, GenerationError> {
    let mut buf = serde_json::to_vec(record)?;
    buf.push(b'\n');
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn one_compact_object_per_line() {
        let mut map = BTreeMap::new();
        map.insert("name".to_string(), GeneratedValue::Text("ana".to_string()));
        map.insert("age".to_string(), GeneratedValue::Null);
        let line = encode_line(&GeneratedValue::Object(map)).expect("encode");
        assert_eq!(line, b"{\"age\":null,\"name\":\"ana\"}\n");
    }
}
