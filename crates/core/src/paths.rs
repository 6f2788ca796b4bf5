//! Dot-separated path extraction over JSON values.
//!
//! Used by transform nodes and by ingest drivers that pull fields out of
//! source-specific payload shapes. Array elements are addressed by numeric
//! index (`items.0.name`).

/// Walk a dot-separated path into a JSON value.
///
/// Returns `None` when any segment is missing or the current value is not
/// indexable.
#[must_use]
pub fn extract_path<'a>(value: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut current = value;
    for part in path.split('.') {
        match current {
            serde_json::Value::Object(map) => {
                current = map.get(part)?;
            }
            serde_json::Value::Array(arr) => {
                let idx: usize = part.parse().ok()?;
                current = arr.get(idx)?;
            }
            _ => return None,
        }
    }
    Some(current)
}

/// Extract a path and return it as a string slice, when the target is a JSON
/// string.
#[must_use]
pub fn path_str<'a>(value: &'a serde_json::Value, path: &str) -> Option<&'a str> {
    extract_path(value, path).and_then(serde_json::Value::as_str)
}
