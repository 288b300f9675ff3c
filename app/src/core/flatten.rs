//! Generic JSON flattening into dotted leaf paths.
//!
//! Objects contribute their keys as path segments, arrays contribute a 1-based,
//! zero-padded index (`items.01`, `items.02`, ...). Scalars (including `null`)
//! become leaves. Traversal follows the insertion order of the source document.

use serde_json::Value;

pub fn flatten(prefix: &str, value: &Value) -> Vec<(String, Value)> {
    let mut leaves = vec![];
    visit(prefix.to_owned(), value, &mut leaves);
    leaves
}

fn visit(path: String, value: &Value, leaves: &mut Vec<(String, Value)>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                visit(join(&path, &sanitize_segment(key)), child, leaves);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                visit(join(&path, &format!("{:02}", index + 1)), child, leaves);
            }
        }
        scalar => leaves.push((path, scalar.clone())),
    }
}

fn join(path: &str, segment: &str) -> String {
    if path.is_empty() {
        segment.to_owned()
    } else {
        format!("{}.{}", path, segment)
    }
}

/// Replaces every character outside `[A-Za-z0-9_-]` with `_`.
pub fn sanitize_segment(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}
