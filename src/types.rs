//! Results exchanged between the lifecycle driver and the RPC layer.
//!
//! These wrap the protobuf messages in `serde_json` values; null stands for
//! "no state" everywhere.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::{AttributeDiff, Diagnostic};

/// A change to a single attribute during a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeChange {
    /// Dotted path of the attribute.
    pub path: String,
    /// Value before the change, `None` when the attribute is new.
    pub before: Option<Value>,
    /// Value after the change, `None` when the attribute is removed.
    pub after: Option<Value>,
    /// Whether this change destroys and recreates the resource.
    pub requires_replace: bool,
}

fn present(value: Value) -> Option<Value> {
    if value.is_null() {
        None
    } else {
        Some(value)
    }
}

impl From<AttributeDiff> for AttributeChange {
    fn from(diff: AttributeDiff) -> Self {
        Self {
            path: diff.path,
            before: present(diff.old),
            after: present(diff.new),
            requires_replace: diff.requires_replace,
        }
    }
}

impl From<AttributeChange> for crate::generated::AttributeChange {
    fn from(change: AttributeChange) -> Self {
        Self {
            path: change.path,
            before: encode_state(&change.before.unwrap_or(Value::Null)),
            after: encode_state(&change.after.unwrap_or(Value::Null)),
            requires_replace: change.requires_replace,
        }
    }
}

/// Encode a value for the wire; null becomes empty bytes.
pub fn encode_state(value: &Value) -> Vec<u8> {
    if value.is_null() {
        Vec::new()
    } else {
        serde_json::to_vec(value).unwrap_or_default()
    }
}

/// Decode a value from the wire; empty bytes become null.
pub fn decode_state(bytes: &[u8]) -> Result<Value, crate::ProviderError> {
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(bytes)?)
}

/// The result of planning one resource change.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanResult {
    /// Expected state after apply; null for a destroy plan.
    pub planned_state: Value,
    /// Attribute changes, sorted by path.
    pub changes: Vec<AttributeChange>,
    /// Whether apply destroys and recreates the resource.
    pub requires_replace: bool,
    /// Warnings, or errors that make the plan unusable.
    pub diagnostics: Vec<Diagnostic>,
}

impl PlanResult {
    /// A plan that cannot be applied.
    pub fn failed(diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            planned_state: Value::Null,
            changes: Vec::new(),
            requires_replace: false,
            diagnostics,
        }
    }

    /// Whether the plan is empty.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// The outcome of applying a change or reading a resource.
///
/// `new_state` is what the host should record, even when the diagnostics
/// contain errors: a resource that was created but failed to initialise is
/// still returned so the next apply can converge.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyResult {
    /// State to record; null when the resource does not exist.
    pub new_state: Value,
    /// Warnings and errors.
    pub diagnostics: Vec<Diagnostic>,
}

impl ApplyResult {
    /// A result without diagnostics.
    pub fn ok(new_state: Value) -> Self {
        Self {
            new_state,
            diagnostics: Vec::new(),
        }
    }

    /// Whether any diagnostic is an error.
    pub fn has_errors(&self) -> bool {
        crate::schema::has_errors(&self.diagnostics)
    }
}

/// The outcome of a refresh.
pub type ReadResult = ApplyResult;

/// An imported resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedResource {
    /// The resource type.
    pub resource_type: String,
    /// The imported state.
    pub state: Value,
}

impl ImportedResource {
    /// Create a new imported resource.
    pub fn new(resource_type: impl Into<String>, state: Value) -> Self {
        Self {
            resource_type: resource_type.into(),
            state,
        }
    }
}

/// The result of an import: the imported objects and any warnings.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImportResult {
    /// Imported objects, usually exactly one.
    pub imported: Vec<ImportedResource>,
    /// Warnings raised while reading the objects.
    pub diagnostics: Vec<Diagnostic>,
}

/// Provider metadata returned by GetMetadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProviderMetadata {
    /// Resource type names.
    pub resources: Vec<String>,
    /// Server capabilities.
    pub capabilities: ServerCapabilities,
}

/// Server capability flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ServerCapabilities {
    /// Whether the provider supports planning destroy operations.
    pub plan_destroy: bool,
}

/// The protocol version for the handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// The handshake prefix output by providers.
pub const HANDSHAKE_PREFIX: &str = "HEMMER_PROVIDER";

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_change_from_diff() {
        let change: AttributeChange = AttributeDiff {
            path: "ttl".to_string(),
            old: Value::Null,
            new: json!(300),
            requires_replace: false,
        }
        .into();
        assert!(change.before.is_none());
        assert_eq!(change.after, Some(json!(300)));

        let proto: crate::generated::AttributeChange = change.into();
        assert!(proto.before.is_empty());
        assert_eq!(proto.after, b"300".to_vec());
    }

    #[test]
    fn test_null_state_is_empty_bytes() {
        assert!(encode_state(&Value::Null).is_empty());
        assert_eq!(decode_state(&[]).unwrap(), Value::Null);
        let bytes = encode_state(&json!({"id": "z-1"}));
        assert_eq!(decode_state(&bytes).unwrap()["id"], "z-1");
        assert!(decode_state(b"{not json").is_err());
    }

    #[test]
    fn test_apply_result_errors() {
        let mut result = ApplyResult::ok(json!({"id": "x"}));
        assert!(!result.has_errors());
        result.diagnostics.push(Diagnostic::warning("partially created"));
        assert!(!result.has_errors());
        result.diagnostics.push(Diagnostic::error("boom"));
        assert!(result.has_errors());
    }

    #[test]
    fn test_protocol_constants() {
        assert_eq!(PROTOCOL_VERSION, 1);
        assert_eq!(HANDSHAKE_PREFIX, "HEMMER_PROVIDER");
    }
}
