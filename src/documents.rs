//! Hotel document files.
//!
//! Input and output files hold a top-level JSON array of objects. Documents
//! are kept as loose JSON maps since only a handful of fields are ever
//! inspected.

use mongodb::bson::oid::ObjectId;
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

use crate::error::{Result, VectorSearchError};

/// A single JSON document.
pub type JsonDocument = Map<String, Value>;

/// Read a JSON array of objects from `path`.
pub fn read_documents(path: impl AsRef<Path>) -> Result<Vec<JsonDocument>> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).map_err(|source| VectorSearchError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let value: Value = serde_json::from_str(&raw).map_err(|e| VectorSearchError::InvalidData {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let Value::Array(items) = value else {
        return Err(VectorSearchError::InvalidData {
            path: path.to_path_buf(),
            message: "expected a top-level array".to_string(),
        });
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::Object(map) => Ok(map),
            _ => Err(VectorSearchError::InvalidData {
                path: path.to_path_buf(),
                message: format!("element {} is not an object", i),
            }),
        })
        .collect()
}

/// Write documents to `path` as pretty-printed JSON, creating parent
/// directories as needed.
pub fn write_documents(data: &[JsonDocument], path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let io_err = |source| VectorSearchError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let json = serde_json::to_string_pretty(data)?;
    fs::write(path, json).map_err(io_err)?;
    tracing::info!(path = %path.display(), documents = data.len(), "Wrote documents");
    Ok(())
}

/// The non-empty string value of `field`.
pub fn text_field<'a>(doc: &'a JsonDocument, field: &str) -> Option<&'a str> {
    doc.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// The numeric array stored in `field`.
///
/// Returns `None` when the field is missing, not an array, or contains a
/// non-numeric element.
pub fn vector_field(doc: &JsonDocument, field: &str) -> Option<Vec<f32>> {
    doc.get(field)?
        .as_array()?
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

/// Identifier used in log messages.
pub fn document_label(doc: &JsonDocument) -> String {
    match doc.get("HotelId") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => "unknown".to_string(),
        Some(other) => other.to_string(),
    }
}

/// Documents carrying a non-empty vector in `field`.
pub fn documents_with_vectors(data: Vec<JsonDocument>, field: &str) -> Vec<JsonDocument> {
    data.into_iter()
        .filter(|doc| vector_field(doc, field).is_some_and(|v| !v.is_empty()))
        .collect()
}

/// Copy of `doc` carrying a fixed `_id`.
///
/// An existing `_id` is kept; otherwise a string or numeric `HotelId` is
/// used, falling back to a fresh ObjectId. Every write attempt of the copy
/// then targets the same primary key.
pub fn with_document_id(doc: &JsonDocument) -> JsonDocument {
    let mut doc = doc.clone();
    if !doc.contains_key("_id") {
        let id = match doc.get("HotelId") {
            Some(id @ (Value::String(_) | Value::Number(_))) => id.clone(),
            _ => Value::String(ObjectId::new().to_hex()),
        };
        doc.insert("_id".to_string(), id);
    }
    doc
}
