//! Structural hashing and schema-aware equality.
//!
//! Sets are compared by the hashes of their elements, so element order never
//! matters. Integers and integral floats hash the same, and a missing field
//! hashes the same as an explicit null.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde_json::Value;

use super::{AttributeType, Block, BlockNestingMode, NestedBlock, NULL};

/// Hash a value without schema knowledge. Arrays are ordered.
pub fn hash_value(value: &Value) -> u64 {
    let mut hasher = DefaultHasher::new();
    write_value(value, &mut hasher);
    hasher.finish()
}

fn write_value(value: &Value, hasher: &mut DefaultHasher) {
    match value {
        Value::Null => 0u8.hash(hasher),
        Value::Bool(b) => {
            1u8.hash(hasher);
            b.hash(hasher);
        },
        Value::Number(n) => {
            2u8.hash(hasher);
            match n.as_i64() {
                Some(i) => i.hash(hasher),
                None => match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                        (f as i64).hash(hasher)
                    },
                    Some(f) => f.to_bits().hash(hasher),
                    None => n.to_string().hash(hasher),
                },
            }
        },
        Value::String(s) => {
            3u8.hash(hasher);
            s.hash(hasher);
        },
        Value::Array(items) => {
            4u8.hash(hasher);
            items.len().hash(hasher);
            for item in items {
                write_value(item, hasher);
            }
        },
        Value::Object(map) => {
            5u8.hash(hasher);
            let mut keys: Vec<&String> = map.keys().filter(|k| !map[*k].is_null()).collect();
            keys.sort();
            for key in keys {
                key.hash(hasher);
                write_value(&map[key], hasher);
            }
        },
    }
}

/// Hash a value of the given attribute type.
pub fn hash_typed(attr_type: &AttributeType, value: &Value) -> u64 {
    match (attr_type, value) {
        (AttributeType::Set(elem), Value::Array(items)) => {
            let mut hashes = element_hashes(items, |v| hash_typed(elem, v));
            hashes.dedup();
            combine(6, &hashes)
        },
        (AttributeType::List(elem), Value::Array(items)) => {
            let hashes: Vec<u64> = items.iter().map(|v| hash_typed(elem, v)).collect();
            combine(4, &hashes)
        },
        (AttributeType::Map(elem), Value::Object(map)) => {
            let mut hasher = DefaultHasher::new();
            5u8.hash(&mut hasher);
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                key.hash(&mut hasher);
                hash_typed(elem, &map[key]).hash(&mut hasher);
            }
            hasher.finish()
        },
        _ => hash_value(value),
    }
}

/// Structural hash of one block item, walking the schema so nested sets are
/// order-insensitive.
pub fn hash_block(block: &Block, value: &Value) -> u64 {
    let mut hasher = DefaultHasher::new();
    7u8.hash(&mut hasher);
    for name in block.field_names() {
        let field = value.get(name).unwrap_or(&NULL);
        if field.is_null() {
            continue;
        }
        name.hash(&mut hasher);
        let h = match (block.attributes.get(name), block.blocks.get(name)) {
            (Some(attr), _) => hash_typed(&attr.attr_type, field),
            (None, Some(nested)) => hash_nested(nested, field),
            (None, None) => hash_value(field),
        };
        h.hash(&mut hasher);
    }
    hasher.finish()
}

/// Hash a whole nested block value according to its nesting mode.
pub fn hash_nested(nested: &NestedBlock, value: &Value) -> u64 {
    match (nested.nesting_mode, value) {
        (BlockNestingMode::Set, Value::Array(items)) => {
            let mut hashes = element_hashes(items, |v| hash_block(&nested.block, v));
            hashes.dedup();
            combine(6, &hashes)
        },
        (BlockNestingMode::List, Value::Array(items)) => {
            let hashes: Vec<u64> = items.iter().map(|v| hash_block(&nested.block, v)).collect();
            combine(4, &hashes)
        },
        (BlockNestingMode::Map, Value::Object(map)) => {
            let mut hasher = DefaultHasher::new();
            5u8.hash(&mut hasher);
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                key.hash(&mut hasher);
                hash_block(&nested.block, &map[key]).hash(&mut hasher);
            }
            hasher.finish()
        },
        (BlockNestingMode::Single, v) if v.is_object() => hash_block(&nested.block, v),
        (_, v) => hash_value(v),
    }
}

fn element_hashes(items: &[Value], f: impl Fn(&Value) -> u64) -> Vec<u64> {
    let mut hashes: Vec<u64> = items.iter().map(f).collect();
    hashes.sort_unstable();
    hashes
}

fn combine(tag: u8, hashes: &[u64]) -> u64 {
    let mut hasher = DefaultHasher::new();
    tag.hash(&mut hasher);
    hashes.len().hash(&mut hasher);
    for h in hashes {
        h.hash(&mut hasher);
    }
    hasher.finish()
}

/// Whether two values of `attr_type` are equal. Null equals an empty
/// collection.
pub fn typed_equal(attr_type: &AttributeType, a: &Value, b: &Value) -> bool {
    let a = normalize_empty(a);
    let b = normalize_empty(b);
    hash_typed(attr_type, a) == hash_typed(attr_type, b)
}

/// Whether two values of a nested block are equal.
pub fn nested_equal(nested: &NestedBlock, a: &Value, b: &Value) -> bool {
    let a = normalize_empty(a);
    let b = normalize_empty(b);
    hash_nested(nested, a) == hash_nested(nested, b)
}

fn normalize_empty(value: &Value) -> &Value {
    match value {
        Value::Array(items) if items.is_empty() => &NULL,
        Value::Object(map) if map.is_empty() => &NULL,
        other => other,
    }
}

/// Drop duplicate set elements, keeping the first occurrence.
pub fn dedup_set(items: Vec<Value>, hash: impl Fn(&Value) -> u64) -> Vec<Value> {
    let mut seen = std::collections::HashSet::new();
    items.into_iter().filter(|item| seen.insert(hash(item))).collect()
}
