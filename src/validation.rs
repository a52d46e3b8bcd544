//! Schema validation helpers.
//!
//! This module provides utilities to validate `serde_json::Value` against a [`Schema`].
//! It helps providers validate input before processing and gives detailed error messages.
//!
//! # Example
//!
//! ```
//! use hemmer_provider_otc::schema::{Schema, Attribute};
//! use hemmer_provider_otc::validation::validate;
//! use serde_json::json;
//!
//! let schema = Schema::v0()
//!     .with_attribute("name", Attribute::required_string())
//!     .with_attribute("ttl", Attribute::optional_int64());
//!
//! // Valid input
//! let input = json!({
//!     "name": "example.com.",
//!     "ttl": 300
//! });
//! let diagnostics = validate(&schema, &input);
//! assert!(diagnostics.is_empty());
//!
//! // Invalid input - wrong type for ttl
//! let input = json!({
//!     "name": "example.com.",
//!     "ttl": "five minutes"
//! });
//! let diagnostics = validate(&schema, &input);
//! assert_eq!(diagnostics.len(), 1);
//! assert_eq!(diagnostics[0].attribute, Some("ttl".to_string()));
//! ```

use crate::schema::{
    is_int64, path::join as join_path, Attribute, AttributeType, Block, BlockNestingMode,
    Diagnostic, DiagnosticSeverity, NestedBlock, Schema,
};
use serde_json::Value;

/// Validate a JSON value against a schema.
///
/// Returns a list of diagnostics for any validation errors found.
/// An empty list means the value is valid.
///
/// # Validation Rules
///
/// - Required attributes must be present and non-null
/// - Optional attributes may be absent or null
/// - Computed attributes are skipped (provider sets these)
/// - Attribute types must match the schema
/// - Attribute validators run on configured values
/// - Deprecated attributes produce a warning when set
/// - Attributes may not be set together with the ones they conflict with
/// - Unknown attributes are rejected
/// - Nested blocks are validated recursively with min/max item constraints
pub fn validate(schema: &Schema, value: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    validate_block(&schema.block, value, "", &mut diagnostics);
    diagnostics
}

/// Validate a JSON value against a schema, returning Ok if valid or Err with diagnostics.
///
/// This is a convenience wrapper around [`validate`] that returns a Result.
pub fn validate_result(schema: &Schema, value: &Value) -> Result<(), Vec<Diagnostic>> {
    let diagnostics = validate(schema, value);
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(diagnostics)
    }
}

/// Check if a JSON value is valid against a schema.
///
/// Returns `true` if there are no errors; warnings are ignored.
/// Use [`validate`] to get detailed error information.
pub fn is_valid(schema: &Schema, value: &Value) -> bool {
    !crate::schema::has_errors(&validate(schema, value))
}

/// Fill in defaults for unset optional attributes, recursing into nested blocks.
///
/// Computed-only attributes are left alone; the provider sets those.
pub fn apply_defaults(schema: &Schema, value: &mut Value) {
    apply_block_defaults(&schema.block, value);
}

fn apply_block_defaults(block: &Block, value: &mut Value) {
    let obj = match value {
        Value::Object(map) => map,
        _ => return,
    };
    for (name, attr) in &block.attributes {
        if attr.flags.required || attr.flags.is_computed_only() {
            continue;
        }
        let unset = obj.get(name).map_or(true, Value::is_null);
        if unset {
            if let Some(default) = attr.default_value() {
                obj.insert(name.clone(), default);
            }
        }
    }
    for (name, nested) in &block.blocks {
        match (nested.nesting_mode, obj.get_mut(name)) {
            (BlockNestingMode::Single, Some(item)) => apply_block_defaults(&nested.block, item),
            (BlockNestingMode::List | BlockNestingMode::Set, Some(Value::Array(items))) => {
                for item in items {
                    apply_block_defaults(&nested.block, item);
                }
            },
            (BlockNestingMode::Map, Some(Value::Object(items))) => {
                for item in items.values_mut() {
                    apply_block_defaults(&nested.block, item);
                }
            },
            _ => {},
        }
    }
}

fn validate_block(block: &Block, value: &Value, path: &str, diagnostics: &mut Vec<Diagnostic>) {
    let obj = match value {
        Value::Object(map) => map,
        Value::Null => {
            // Null is valid for optional blocks, but we can't validate further
            return;
        },
        _ => {
            diagnostics.push(
                Diagnostic::error("Expected object")
                    .with_detail(format!("Got {}", value_type_name(value)))
                    .with_attribute_if_not_empty(path),
            );
            return;
        },
    };

    for key in obj.keys() {
        if key == "id" && path.is_empty() {
            continue;
        }
        if !block.attributes.contains_key(key) && !block.blocks.contains_key(key) {
            diagnostics.push(
                Diagnostic::error(format!("Unsupported attribute '{}'", join_path(path, key)))
                    .with_detail("An attribute by this name is not expected here")
                    .with_attribute(join_path(path, key)),
            );
        }
    }

    // Validate attributes
    for (name, attr) in &block.attributes {
        let attr_path = join_path(path, name);
        let attr_value = obj.get(name);
        validate_attribute(attr, attr_value, &attr_path, diagnostics);

        if is_set(attr_value) {
            for other in &attr.conflicts_with {
                if is_set(obj.get(other)) {
                    diagnostics.push(
                        Diagnostic::error(format!(
                            "Conflicting attributes '{}' and '{}'",
                            attr_path,
                            join_path(path, other)
                        ))
                        .with_detail(format!("'{}' cannot be set together with '{}'", name, other))
                        .with_attribute(attr_path.clone()),
                    );
                }
            }
        }
    }

    // Validate nested blocks
    for (name, nested_block) in &block.blocks {
        let block_path = join_path(path, name);
        let block_value = obj.get(name);
        validate_nested_block(nested_block, block_value, &block_path, diagnostics);
    }
}

fn validate_attribute(
    attr: &Attribute,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    // Skip computed-only attributes (provider sets these)
    if attr.flags.computed && !attr.flags.optional && !attr.flags.required {
        return;
    }

    match value {
        None | Some(Value::Null) => {
            // Check if required
            if attr.flags.required {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required attribute '{}'", path))
                        .with_detail("This attribute is required and must be provided")
                        .with_attribute(path),
                );
            }
            // Optional attributes can be missing/null
        },
        Some(v) => {
            let before = diagnostics.len();
            validate_attribute_type(&attr.attr_type, v, path, diagnostics);
            if diagnostics.len() > before {
                return;
            }

            for validator in &attr.validators {
                if let Err(message) = validator.call(v) {
                    diagnostics.push(
                        Diagnostic::error(format!("Invalid value for attribute '{}'", path))
                            .with_detail(message)
                            .with_attribute(path),
                    );
                }
            }

            if let Some(message) = &attr.deprecated {
                diagnostics.push(
                    Diagnostic::warning(format!("Attribute '{}' is deprecated", path))
                        .with_detail(message.clone())
                        .with_attribute(path),
                );
            }
        },
    }
}

fn validate_attribute_type(
    attr_type: &AttributeType,
    value: &Value,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match attr_type {
        AttributeType::String => {
            if !value.is_string() {
                diagnostics.push(type_error(path, "string", value));
            }
        },
        AttributeType::Int64 => {
            if !is_int64(value) {
                diagnostics.push(type_error(path, "int64", value));
            }
        },
        AttributeType::Float64 => {
            if !value.is_number() {
                diagnostics.push(type_error(path, "float64", value));
            }
        },
        AttributeType::Bool => {
            if !value.is_boolean() {
                diagnostics.push(type_error(path, "bool", value));
            }
        },
        AttributeType::List(element_type) => {
            if let Some(arr) = value.as_array() {
                for (i, elem) in arr.iter().enumerate() {
                    let elem_path = format!("{}.{}", path, i);
                    validate_attribute_type(element_type, elem, &elem_path, diagnostics);
                }
            } else {
                diagnostics.push(type_error(path, "list", value));
            }
        },
        AttributeType::Set(element_type) => {
            // Sets are represented as arrays in JSON
            if let Some(arr) = value.as_array() {
                for (i, elem) in arr.iter().enumerate() {
                    let elem_path = format!("{}.{}", path, i);
                    validate_attribute_type(element_type, elem, &elem_path, diagnostics);
                }
            } else {
                diagnostics.push(type_error(path, "set", value));
            }
        },
        AttributeType::Map(value_type) => {
            if let Some(obj) = value.as_object() {
                for (key, val) in obj {
                    let key_path = format!("{}.{}", path, key);
                    validate_attribute_type(value_type, val, &key_path, diagnostics);
                }
            } else {
                diagnostics.push(type_error(path, "map", value));
            }
        },
    }
}

fn validate_nested_block(
    nested: &NestedBlock,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match nested.nesting_mode {
        BlockNestingMode::Single => {
            validate_single_block(nested, value, path, diagnostics);
        },
        BlockNestingMode::List => {
            validate_list_block(nested, value, path, diagnostics);
        },
        BlockNestingMode::Set => {
            // Sets are validated the same as lists for our purposes
            validate_list_block(nested, value, path, diagnostics);
        },
        BlockNestingMode::Map => {
            validate_map_block(nested, value, path, diagnostics);
        },
    }
}

fn validate_single_block(
    nested: &NestedBlock,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match value {
        None | Some(Value::Null) => {
            if nested.min_items > 0 {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required block '{}'", path))
                        .with_detail("At least one block is required")
                        .with_attribute(path),
                );
            }
        },
        Some(v) => {
            validate_block(&nested.block, v, path, diagnostics);
        },
    }
}

fn validate_list_block(
    nested: &NestedBlock,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match value {
        None | Some(Value::Null) => {
            if nested.min_items > 0 {
                diagnostics.push(
                    Diagnostic::error(format!(
                        "Block '{}' requires at least {} item(s)",
                        path, nested.min_items
                    ))
                    .with_attribute(path),
                );
            }
        },
        Some(Value::Array(arr)) => {
            let len = arr.len() as u32;

            // Check min_items
            if len < nested.min_items {
                diagnostics.push(
                    Diagnostic::error(format!(
                        "Block '{}' requires at least {} item(s), got {}",
                        path, nested.min_items, len
                    ))
                    .with_attribute(path),
                );
            }

            // Check max_items (0 means unlimited)
            if nested.max_items > 0 && len > nested.max_items {
                diagnostics.push(
                    Diagnostic::error(format!(
                        "Block '{}' allows at most {} item(s), got {}",
                        path, nested.max_items, len
                    ))
                    .with_attribute(path),
                );
            }

            // Validate each block
            for (i, item) in arr.iter().enumerate() {
                let item_path = format!("{}.{}", path, i);
                validate_block(&nested.block, item, &item_path, diagnostics);
            }
        },
        Some(v) => {
            diagnostics.push(
                Diagnostic::error(format!("Expected list for block '{}'", path))
                    .with_detail(format!("Got {}", value_type_name(v)))
                    .with_attribute(path),
            );
        },
    }
}

fn validate_map_block(
    nested: &NestedBlock,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match value {
        None | Some(Value::Null) => {
            if nested.min_items > 0 {
                diagnostics.push(
                    Diagnostic::error(format!(
                        "Block '{}' requires at least {} item(s)",
                        path, nested.min_items
                    ))
                    .with_attribute(path),
                );
            }
        },
        Some(Value::Object(obj)) => {
            let len = obj.len() as u32;

            // Check min_items
            if len < nested.min_items {
                diagnostics.push(
                    Diagnostic::error(format!(
                        "Block '{}' requires at least {} item(s), got {}",
                        path, nested.min_items, len
                    ))
                    .with_attribute(path),
                );
            }

            // Check max_items (0 means unlimited)
            if nested.max_items > 0 && len > nested.max_items {
                diagnostics.push(
                    Diagnostic::error(format!(
                        "Block '{}' allows at most {} item(s), got {}",
                        path, nested.max_items, len
                    ))
                    .with_attribute(path),
                );
            }

            // Validate each block
            for (key, item) in obj {
                let item_path = format!("{}.{}", path, key);
                validate_block(&nested.block, item, &item_path, diagnostics);
            }
        },
        Some(v) => {
            diagnostics.push(
                Diagnostic::error(format!("Expected map for block '{}'", path))
                    .with_detail(format!("Got {}", value_type_name(v)))
                    .with_attribute(path),
            );
        },
    }
}

// Helper functions

fn is_set(value: Option<&Value>) -> bool {
    value.is_some_and(|v| !v.is_null())
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn type_error(path: &str, expected: &str, got: &Value) -> Diagnostic {
    Diagnostic {
        severity: DiagnosticSeverity::Error,
        summary: format!("Invalid type for attribute '{}'", path),
        detail: Some(format!(
            "Expected {}, got {}",
            expected,
            value_type_name(got)
        )),
        attribute: Some(path.to_string()),
    }
}

trait DiagnosticExt {
    fn with_attribute_if_not_empty(self, path: &str) -> Self;
}

impl DiagnosticExt for Diagnostic {
    fn with_attribute_if_not_empty(self, path: &str) -> Self {
        if path.is_empty() {
            self
        } else {
            self.with_attribute(path)
        }
    }
}

/// Validator accepting only the listed strings.
pub fn string_in(allowed: &'static [&'static str]) -> impl Fn(&Value) -> Result<(), String> + Send + Sync {
    move |value| match value.as_str() {
        Some(s) if allowed.contains(&s) => Ok(()),
        Some(s) => Err(format!("expected one of [{}], got \"{}\"", allowed.join(", "), s)),
        None => Ok(()),
    }
}

/// Validator for integers within `min..=max`.
pub fn int_between(min: i64, max: i64) -> impl Fn(&Value) -> Result<(), String> + Send + Sync {
    move |value| match value.as_i64().or_else(|| value.as_f64().map(|f| f as i64)) {
        Some(n) if (min..=max).contains(&n) => Ok(()),
        Some(n) => Err(format!("expected a value between {} and {}, got {}", min, max, n)),
        None => Ok(()),
    }
}

/// Validator for string length within `min..=max` characters.
pub fn string_len_between(min: usize, max: usize) -> impl Fn(&Value) -> Result<(), String> + Send + Sync {
    move |value| match value.as_str() {
        Some(s) if (min..=max).contains(&s.chars().count()) => Ok(()),
        Some(s) => Err(format!(
            "expected length between {} and {}, got {}",
            min,
            max,
            s.chars().count()
        )),
        None => Ok(()),
    }
}
