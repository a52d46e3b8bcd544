//! Dotted attribute paths (`router.0.router_id`, `tags.env`).

use serde_json::{Map, Value};

/// Split a path into its segments. The empty path has no segments.
pub fn split(path: &str) -> Vec<&str> {
    if path.is_empty() {
        Vec::new()
    } else {
        path.split('.').collect()
    }
}

/// Append a segment to a path.
pub fn join(base: &str, segment: &str) -> String {
    if base.is_empty() {
        segment.to_string()
    } else {
        format!("{}.{}", base, segment)
    }
}

/// The value at `path`, if every segment exists.
pub fn get<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in split(path) {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// The value at `path`, treating null as absent.
pub fn get_present<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    get(root, path).filter(|v| !v.is_null())
}

/// Write `value` at `path`, creating intermediate objects and padding arrays
/// with nulls.
pub fn set(root: &mut Value, path: &str, value: Value) -> Result<(), String> {
    let segments = split(path);
    if segments.is_empty() {
        *root = value;
        return Ok(());
    }
    set_segments(root, &segments, value, path)
}

fn set_segments(current: &mut Value, segments: &[&str], value: Value, path: &str) -> Result<(), String> {
    let (first, rest) = match segments.split_first() {
        Some(split) => split,
        None => {
            *current = value;
            return Ok(());
        },
    };

    if current.is_null() {
        *current = if first.parse::<usize>().is_ok() {
            Value::Array(Vec::new())
        } else {
            Value::Object(Map::new())
        };
    }

    match current {
        Value::Object(map) => {
            let slot = map.entry(first.to_string()).or_insert(Value::Null);
            set_segments(slot, rest, value, path)
        },
        Value::Array(items) => {
            let index: usize = first
                .parse()
                .map_err(|_| format!("'{}' is not a list index in '{}'", first, path))?;
            if items.len() <= index {
                items.resize(index + 1, Value::Null);
            }
            set_segments(&mut items[index], rest, value, path)
        },
        _ => Err(format!("cannot descend into scalar at '{}' in '{}'", first, path)),
    }
}

/// Remove the value at `path`; returns what was removed.
pub fn remove(root: &mut Value, path: &str) -> Option<Value> {
    let segments = split(path);
    let (last, parents) = segments.split_last()?;
    let mut current = root;
    for segment in parents {
        current = match current {
            Value::Object(map) => map.get_mut(*segment)?,
            Value::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    match current {
        Value::Object(map) => map.remove(*last),
        Value::Array(items) => {
            let index = last.parse::<usize>().ok()?;
            items.get_mut(index).map(Value::take)
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_nested() {
        let value = json!({"router": [{"router_id": "r1"}], "tags": {"env": "prod"}});
        assert_eq!(get(&value, "router.0.router_id"), Some(&json!("r1")));
        assert_eq!(get(&value, "tags.env"), Some(&json!("prod")));
        assert_eq!(get(&value, "router.1"), None);
        assert_eq!(get(&value, "router.x"), None);
        assert_eq!(get(&value, ""), Some(&value));
    }

    #[test]
    fn test_set_creates_intermediates() {
        let mut value = Value::Null;
        set(&mut value, "router.1.router_id", json!("r2")).unwrap();
        assert_eq!(value, json!({"router": [null, {"router_id": "r2"}]}));

        set(&mut value, "name", json!("example.com.")).unwrap();
        assert_eq!(get(&value, "name"), Some(&json!("example.com.")));
    }

    #[test]
    fn test_set_rejects_scalar_descent() {
        let mut value = json!({"name": "zone"});
        assert!(set(&mut value, "name.inner", json!(1)).is_err());
    }

    #[test]
    fn test_remove() {
        let mut value = json!({"tags": {"env": "prod", "team": "core"}});
        assert_eq!(remove(&mut value, "tags.env"), Some(json!("prod")));
        assert_eq!(value, json!({"tags": {"team": "core"}}));
        assert_eq!(remove(&mut value, "missing.key"), None);
    }
}
