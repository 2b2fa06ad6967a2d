use std::io::ErrorKind;
use std::path::Path;

use serde_json::Value;
use tokio::fs;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StatusDocument {
    Error(String),
    Data(Vec<(String, String)>),
}

pub(crate) async fn load_document(path: &Path) -> StatusDocument {
    let raw = match fs::read(path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return StatusDocument::Error(format!("File not found: {}", path.display()));
        }
        Err(err) => {
            return StatusDocument::Error(format!("Failed to read {}: {err}", path.display()));
        }
    };

    parse_document(&raw, path)
}

pub(crate) fn parse_document(raw: &[u8], path: &Path) -> StatusDocument {
    let value = match serde_json::from_slice::<Value>(raw) {
        Ok(value) => value,
        Err(err) => {
            return StatusDocument::Error(format!("Malformed JSON in {}: {err}", path.display()));
        }
    };

    let Value::Object(map) = value else {
        return StatusDocument::Error(format!(
            "Expected a JSON object at the top level of {}",
            path.display()
        ));
    };

    let pairs = map
        .into_iter()
        .map(|(key, value)| (key, display_value(&value)))
        .collect();
    StatusDocument::Data(pairs)
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
