//! Dotted field paths over JSON documents.
//!
//! `a.b` addresses a nested object field, `a.2.b` an array element, and the
//! pattern `a.*.b` every element of the array at `a`.

use serde_json::Value;

pub const WILDCARD: &str = "*";

fn child<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

fn child_mut<'a>(value: &'a mut Value, segment: &str) -> Option<&'a mut Value> {
    match value {
        Value::Object(map) => map.get_mut(segment),
        Value::Array(items) => segment
            .parse::<usize>()
            .ok()
            .and_then(move |i| items.get_mut(i)),
        _ => None,
    }
}

pub fn get<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, child)
}

/// Write `value` at `path`. Intermediate containers must exist; the last
/// segment may be a new object key. `false` when the path cannot be reached.
pub fn set(doc: &mut Value, path: &str, value: Value) -> bool {
    let (parent_path, last) = match path.rsplit_once('.') {
        Some((parent, last)) => (Some(parent), last),
        None => (None, path),
    };
    let parent = match parent_path {
        Some(parent_path) => parent_path
            .split('.')
            .try_fold(doc, |current, segment| child_mut(current, segment)),
        None => Some(doc),
    };

    match parent {
        Some(Value::Object(map)) => {
            map.insert(last.to_string(), value);
            true
        }
        Some(Value::Array(items)) => match last.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        },
        _ => false,
    }
}

/// Concrete paths of `pattern` that exist in `doc`, in document order.
pub fn expand(doc: &Value, pattern: &str) -> Vec<String> {
    let segments: Vec<&str> = pattern.split('.').collect();
    let mut found = Vec::new();
    expand_into(doc, &segments, String::new(), &mut found);
    found
}

fn expand_into(value: &Value, segments: &[&str], prefix: String, found: &mut Vec<String>) {
    let Some((segment, rest)) = segments.split_first() else {
        found.push(prefix);
        return;
    };
    let join = |key: &str| {
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}.{key}")
        }
    };

    if *segment == WILDCARD {
        if let Value::Array(items) = value {
            for (i, item) in items.iter().enumerate() {
                expand_into(item, rest, join(&i.to_string()), found);
            }
        }
        return;
    }
    if let Some(next) = child(value, segment) {
        expand_into(next, rest, join(segment), found);
    }
}
