//! Typed access to one resource instance during a lifecycle operation.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use super::hash::{dedup_set, hash_block, hash_typed, nested_equal, typed_equal};
use super::{path, AttributeType, BlockNestingMode, Diagnostic, ResourceTimeouts, Schema, SchemaNode};
use crate::error::ProviderError;

/// The state a callback reads from and writes to.
///
/// `get` reads the working copy: the planned values for create and update,
/// the stored state for read and delete. `set` writes the working copy after
/// type-checking against the schema. `has_change` compares prior state with
/// the plan and is unaffected by writes.
#[derive(Debug, Clone)]
pub struct ResourceData {
    schema: Arc<Schema>,
    prior: Value,
    planned: Value,
    current: Value,
    id: String,
    timeouts: ResourceTimeouts,
    warnings: Vec<Diagnostic>,
}

fn id_of(value: &Value) -> Option<&str> {
    value.get("id").and_then(Value::as_str).filter(|id| !id.is_empty())
}

impl ResourceData {
    /// Data for an operation moving from `prior` to `planned`.
    pub fn new(schema: Arc<Schema>, prior: Value, planned: Value) -> Self {
        let id = id_of(&planned)
            .or_else(|| id_of(&prior))
            .unwrap_or_default()
            .to_string();
        let current = if planned.is_null() {
            prior.clone()
        } else {
            planned.clone()
        };
        Self {
            schema,
            prior,
            planned,
            current,
            id,
            timeouts: ResourceTimeouts::default(),
            warnings: Vec::new(),
        }
    }

    /// Data for reading or deleting stored state.
    pub fn from_state(schema: Arc<Schema>, state: Value) -> Self {
        Self::new(schema, state.clone(), state)
    }

    /// Data seeded with nothing but an ID, as import starts out.
    pub fn for_import(schema: Arc<Schema>, id: impl Into<String>) -> Self {
        let id = id.into();
        Self::from_state(schema, serde_json::json!({ "id": id }))
    }

    /// Attach resolved timeouts.
    pub fn with_timeouts(mut self, timeouts: ResourceTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// The schema this data is checked against.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The resource ID; empty means the resource does not exist.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Record the resource ID. Setting the empty ID marks the resource gone.
    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    /// Whether the operation is creating the resource.
    pub fn is_new_resource(&self) -> bool {
        self.prior.is_null()
    }

    /// Per-operation timeouts.
    pub fn timeouts(&self) -> &ResourceTimeouts {
        &self.timeouts
    }

    /// Value at `path`, or the zero value of its type when unset.
    pub fn get(&self, path: &str) -> Value {
        if let Some(value) = path::get_present(&self.current, path) {
            return value.clone();
        }
        self.schema
            .lookup(path)
            .map(|node| node.zero_value())
            .unwrap_or(Value::Null)
    }

    /// Value at `path` when it is set, even to a zero value.
    pub fn get_ok(&self, path: &str) -> Option<Value> {
        path::get_present(&self.current, path).cloned()
    }

    /// String at `path`, empty when unset.
    pub fn get_str(&self, path: &str) -> String {
        self.get(path).as_str().unwrap_or_default().to_string()
    }

    /// Non-empty string at `path`.
    pub fn get_opt_str(&self, path: &str) -> Option<String> {
        self.get_ok(path)
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|s| !s.is_empty())
    }

    /// Integer at `path`, zero when unset.
    pub fn get_i64(&self, path: &str) -> i64 {
        let value = self.get(path);
        value
            .as_i64()
            .or_else(|| value.as_f64().map(|f| f as i64))
            .unwrap_or_default()
    }

    /// Boolean at `path`, false when unset.
    pub fn get_bool(&self, path: &str) -> bool {
        self.get(path).as_bool().unwrap_or_default()
    }

    /// Strings of a list or set at `path`.
    pub fn get_string_list(&self, path: &str) -> Vec<String> {
        match self.get(path) {
            Value::Array(items) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// String map at `path`, e.g. tags.
    pub fn get_string_map(&self, path: &str) -> BTreeMap<String, String> {
        match self.get(path) {
            Value::Object(map) => map
                .into_iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k, s.to_string())))
                .collect(),
            _ => BTreeMap::new(),
        }
    }

    /// Write `value` at `path` after checking it against the schema.
    ///
    /// Set values are de-duplicated. Writing null clears the attribute.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) -> Result<(), ProviderError> {
        let value = value.into();
        let node = self.schema.lookup(path).ok_or_else(|| {
            ProviderError::Validation(format!("cannot set unknown attribute '{}'", path))
        })?;
        if !node.accepts(&value) {
            return Err(ProviderError::Validation(format!(
                "cannot set '{}': {} does not match the attribute type",
                path,
                value_kind(&value)
            )));
        }

        let value = match (node, value) {
            (SchemaNode::Attribute(attr), Value::Array(items)) => match &attr.attr_type {
                AttributeType::Set(elem) => Value::Array(dedup_set(items, |v| hash_typed(elem, v))),
                _ => Value::Array(items),
            },
            (SchemaNode::Block(nested), Value::Array(items))
                if nested.nesting_mode == BlockNestingMode::Set =>
            {
                Value::Array(dedup_set(items, |v| hash_block(&nested.block, v)))
            },
            (_, value) => value,
        };

        if self.current.is_null() {
            self.current = Value::Object(serde_json::Map::new());
        }
        path::set(&mut self.current, path, value).map_err(ProviderError::Validation)
    }

    /// Whether the plan changes `path`.
    pub fn has_change(&self, path: &str) -> bool {
        let (old, new) = self.get_change(path);
        match self.schema.lookup(path) {
            Some(SchemaNode::Attribute(attr)) => !typed_equal(&attr.attr_type, &old, &new),
            Some(SchemaNode::Element(elem)) => !typed_equal(elem, &old, &new),
            Some(SchemaNode::Block(nested)) => !nested_equal(nested, &old, &new),
            _ => old != new,
        }
    }

    /// Prior and planned values at `path`.
    pub fn get_change(&self, path: &str) -> (Value, Value) {
        let old = path::get(&self.prior, path).cloned().unwrap_or(Value::Null);
        let new = path::get(&self.planned, path).cloned().unwrap_or(Value::Null);
        (old, new)
    }

    /// Surface a warning alongside the operation's result.
    pub fn add_warning(&mut self, diagnostic: Diagnostic) {
        self.warnings.push(diagnostic);
    }

    /// Warnings recorded so far.
    pub fn warnings(&self) -> &[Diagnostic] {
        &self.warnings
    }

    /// Remove and return recorded warnings.
    pub fn take_warnings(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.warnings)
    }

    /// The resulting state: null when the ID is empty, otherwise the working
    /// copy with the ID recorded.
    pub fn state(&self) -> Value {
        if self.id.is_empty() {
            return Value::Null;
        }
        let mut state = match &self.current {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        state.insert("id".to_string(), Value::String(self.id.clone()));
        Value::Object(state)
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, AttributeFlags, Block, NestedBlock};
    use serde_json::json;

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::v0()
                .with_attribute("name", Attribute::required_string())
                .with_attribute("ttl", Attribute::optional_int64())
                .with_attribute("status", Attribute::computed_string())
                .with_attribute("tags", Attribute::optional_string_map())
                .with_attribute(
                    "masters",
                    Attribute::new(AttributeType::set(AttributeType::String), AttributeFlags::optional()),
                )
                .with_block(
                    "router",
                    NestedBlock::set(Block::new().with_attribute("router_id", Attribute::required_string())),
                ),
        )
    }

    #[test]
    fn test_get_falls_back_to_zero_value() {
        let data = ResourceData::new(schema(), Value::Null, json!({"name": "example.com."}));
        assert_eq!(data.get("name"), json!("example.com."));
        assert_eq!(data.get("ttl"), json!(0));
        assert_eq!(data.get("tags"), json!({}));
        assert_eq!(data.get_ok("ttl"), None);
        assert!(data.is_new_resource());
    }

    #[test]
    fn test_get_ok_distinguishes_zero_from_unset() {
        let data = ResourceData::new(schema(), Value::Null, json!({"name": "a.", "ttl": 0}));
        assert_eq!(data.get_ok("ttl"), Some(json!(0)));
    }

    #[test]
    fn test_set_type_checks() {
        let mut data = ResourceData::new(schema(), Value::Null, json!({"name": "a."}));
        data.set("status", "ACTIVE").unwrap();
        assert_eq!(data.get_str("status"), "ACTIVE");

        let err = data.set("ttl", "three hundred").unwrap_err();
        assert!(err.to_string().contains("ttl"));
        assert!(data.set("unknown", 1).is_err());
    }

    #[test]
    fn test_set_dedups_sets() {
        let mut data = ResourceData::new(schema(), Value::Null, json!({"name": "a."}));
        data.set("masters", json!(["10.0.0.1", "10.0.0.2", "10.0.0.1"])).unwrap();
        assert_eq!(data.get_string_list("masters"), vec!["10.0.0.1", "10.0.0.2"]);

        data.set("router", json!([{"router_id": "r1"}, {"router_id": "r1"}]))
            .unwrap();
        assert_eq!(data.get("router"), json!([{"router_id": "r1"}]));
    }

    #[test]
    fn test_has_change_ignores_writes() {
        let prior = json!({"id": "z", "name": "a.", "ttl": 300, "masters": ["x", "y"]});
        let planned = json!({"id": "z", "name": "a.", "ttl": 600, "masters": ["y", "x"]});
        let mut data = ResourceData::new(schema(), prior, planned);
        assert!(data.has_change("ttl"));
        assert!(!data.has_change("masters"));
        assert!(!data.has_change("name"));

        data.set("ttl", 300).unwrap();
        assert!(data.has_change("ttl"));
        assert_eq!(data.get_change("ttl"), (json!(300), json!(600)));
    }

    #[test]
    fn test_state_requires_id() {
        let mut data = ResourceData::new(schema(), Value::Null, json!({"name": "a."}));
        assert_eq!(data.state(), Value::Null);

        data.set_id("zone-1");
        assert_eq!(data.state()["id"], "zone-1");
        assert_eq!(data.state()["name"], "a.");

        data.set_id("");
        assert_eq!(data.state(), Value::Null);
    }

    #[test]
    fn test_import_seeds_only_the_id() {
        let data = ResourceData::for_import(schema(), "zone-1/record-1");
        assert_eq!(data.id(), "zone-1/record-1");
        assert!(!data.is_new_resource());
        assert_eq!(data.get_opt_str("name"), None);
    }

    #[test]
    fn test_typed_getters() {
        let data = ResourceData::from_state(
            schema(),
            json!({"id": "z", "name": "a.", "ttl": 300.0, "tags": {"env": "prod"}}),
        );
        assert_eq!(data.get_i64("ttl"), 300);
        assert_eq!(data.get_string_map("tags").get("env"), Some(&"prod".to_string()));
        assert!(!data.get_bool("name"));
    }

    #[test]
    fn test_warnings_are_collected() {
        let mut data = ResourceData::from_state(schema(), json!({"id": "z"}));
        data.add_warning(Diagnostic::warning("reserved tag dropped"));
        assert_eq!(data.warnings().len(), 1);
        assert_eq!(data.take_warnings().len(), 1);
        assert!(data.warnings().is_empty());
    }
}
