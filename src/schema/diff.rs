//! Plan-time diffing of prior state against desired configuration.
//!
//! The walk is schema-directed: lists compare by index, sets by element hash,
//! maps by key. Leaves that differ consult the attribute's diff-suppress
//! predicate before a change is recorded; a suppressed difference keeps the
//! prior value in the planned state. Computed attributes left unset in
//! configuration carry their prior value forward.

use serde_json::{Map, Value};

use super::hash::{nested_equal, typed_equal};
use super::path;
use super::{Attribute, AttributeType, Block, BlockNestingMode, NestedBlock, Schema, SchemaNode, NULL, TIMEOUTS_BLOCK};
use crate::error::ProviderError;

/// One attribute-level change.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDiff {
    /// Dotted path of the changed attribute.
    pub path: String,
    /// Value in prior state (null when absent).
    pub old: Value,
    /// Planned value (null when removed).
    pub new: Value,
    /// Whether applying this change requires destroying the resource.
    pub requires_replace: bool,
}

/// The outcome of diffing one resource instance.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceDiff {
    /// The state the host should expect after apply.
    pub planned: Value,
    /// Attribute changes, sorted by path.
    pub changes: Vec<AttributeDiff>,
    /// Whether the plan destroys the resource.
    pub destroy: bool,
}

impl InstanceDiff {
    /// No attribute changes.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Whether any change forces replacement.
    pub fn requires_replace(&self) -> bool {
        self.changes.iter().any(|c| c.requires_replace)
    }

    /// The change recorded at exactly `path`.
    pub fn get(&self, path: &str) -> Option<&AttributeDiff> {
        self.changes.iter().find(|c| c.path == path)
    }

    /// Whether `path` or anything below it changed.
    pub fn has_change(&self, path: &str) -> bool {
        self.changes.iter().any(|c| is_at_or_below(&c.path, path))
    }

    /// Paths whose changes force replacement.
    pub fn replace_paths(&self) -> Vec<&str> {
        self.changes
            .iter()
            .filter(|c| c.requires_replace)
            .map(|c| c.path.as_str())
            .collect()
    }
}

fn is_at_or_below(candidate: &str, path: &str) -> bool {
    candidate == path
        || (candidate.len() > path.len()
            && candidate.starts_with(path)
            && candidate.as_bytes()[path.len()] == b'.')
}

/// Diff `prior` state against `config`.
///
/// A null `prior` plans a create; a null `config` plans a destroy.
pub fn diff(schema: &Schema, prior: &Value, config: &Value) -> InstanceDiff {
    if config.is_null() {
        return destroy_plan(schema, prior);
    }

    let mut walker = Walker {
        creating: prior.is_null(),
        changes: Vec::new(),
    };
    let mut planned = walker.block(&schema.block, prior, config, "");
    if let Value::Object(map) = &mut planned {
        if let Some(id) = prior.get("id").filter(|v| !v.is_null()) {
            map.insert("id".to_string(), id.clone());
        }
        if let Some(timeouts) = config.get(TIMEOUTS_BLOCK).filter(|v| !v.is_null()) {
            map.insert(TIMEOUTS_BLOCK.to_string(), timeouts.clone());
        }
    }

    let mut changes = walker.changes;
    changes.sort_by(|a, b| a.path.cmp(&b.path));
    InstanceDiff {
        planned,
        changes,
        destroy: false,
    }
}

fn destroy_plan(schema: &Schema, prior: &Value) -> InstanceDiff {
    let mut changes: Vec<AttributeDiff> = schema
        .block
        .field_names()
        .into_iter()
        .filter(|name| *name != TIMEOUTS_BLOCK)
        .filter_map(|name| {
            let old = prior.get(name).filter(|v| !v.is_null())?;
            Some(AttributeDiff {
                path: name.to_string(),
                old: old.clone(),
                new: Value::Null,
                requires_replace: false,
            })
        })
        .collect();
    changes.sort_by(|a, b| a.path.cmp(&b.path));
    InstanceDiff {
        planned: Value::Null,
        changes,
        destroy: true,
    }
}

struct Walker {
    creating: bool,
    changes: Vec<AttributeDiff>,
}

impl Walker {
    fn record(&mut self, path: String, old: &Value, new: &Value, force_new: bool) {
        self.changes.push(AttributeDiff {
            path,
            old: old.clone(),
            new: new.clone(),
            requires_replace: force_new && !self.creating,
        });
    }

    fn block(&mut self, block: &Block, old: &Value, new: &Value, base: &str) -> Value {
        let mut planned = Map::new();
        for name in block.field_names() {
            if base.is_empty() && name == TIMEOUTS_BLOCK {
                continue;
            }
            let field_path = path::join(base, name);
            let old_v = old.get(name).unwrap_or(&NULL);
            let new_v = new.get(name).unwrap_or(&NULL);

            let value = if let Some(attr) = block.attributes.get(name) {
                self.attribute(attr, &field_path, old_v, new_v)
            } else if let Some(nested) = block.blocks.get(name) {
                self.nested(nested, &field_path, old_v, new_v)
            } else {
                Value::Null
            };
            if !value.is_null() {
                planned.insert(name.to_string(), value);
            }
        }
        Value::Object(planned)
    }

    fn attribute(&mut self, attr: &Attribute, path: &str, old: &Value, new: &Value) -> Value {
        if new.is_null() && attr.flags.computed {
            return old.clone();
        }
        if typed_equal(&attr.attr_type, old, new) {
            return new.clone();
        }
        if self.suppressed(attr, path, old, new) {
            return old.clone();
        }

        match (&attr.attr_type, old, new) {
            (AttributeType::List(elem), Value::Array(old_items), Value::Array(new_items))
                if old_items.len() == new_items.len() =>
            {
                let planned = old_items
                    .iter()
                    .zip(new_items)
                    .enumerate()
                    .map(|(i, (o, n))| self.leaf(attr, elem, &path::join(path, &i.to_string()), o, n))
                    .collect();
                Value::Array(planned)
            },
            (AttributeType::Map(elem), _, Value::Object(new_map))
                if old.is_object() || old.is_null() =>
            {
                let empty = Map::new();
                let old_map = old.as_object().unwrap_or(&empty);
                let mut planned = Map::new();
                let mut keys: Vec<&String> = old_map.keys().chain(new_map.keys()).collect();
                keys.sort();
                keys.dedup();
                for key in keys {
                    let o = old_map.get(key).unwrap_or(&NULL);
                    let n = new_map.get(key).unwrap_or(&NULL);
                    let v = self.leaf(attr, elem, &path::join(path, key), o, n);
                    if !v.is_null() {
                        planned.insert(key.clone(), v);
                    }
                }
                Value::Object(planned)
            },
            _ => {
                self.record(path.to_string(), old, new, attr.force_new);
                new.clone()
            },
        }
    }

    fn leaf(&mut self, attr: &Attribute, elem: &AttributeType, path: &str, old: &Value, new: &Value) -> Value {
        if typed_equal(elem, old, new) {
            return new.clone();
        }
        if !new.is_null() && self.suppressed(attr, path, old, new) {
            return old.clone();
        }
        self.record(path.to_string(), old, new, attr.force_new);
        new.clone()
    }

    fn suppressed(&self, attr: &Attribute, path: &str, old: &Value, new: &Value) -> bool {
        if self.creating || old.is_null() {
            return false;
        }
        attr.diff_suppress
            .as_ref()
            .is_some_and(|suppress| suppress.call(path, old, new))
    }

    fn nested(&mut self, nested: &NestedBlock, path: &str, old: &Value, new: &Value) -> Value {
        let force_new = nested.block.has_force_new();
        match nested.nesting_mode {
            BlockNestingMode::Single => match (old, new) {
                (_, Value::Null) if old.is_null() => Value::Null,
                (_, Value::Null) => {
                    self.record(path.to_string(), old, new, force_new);
                    Value::Null
                },
                _ => self.block(&nested.block, old, new, path),
            },
            BlockNestingMode::List => {
                let empty = Vec::new();
                let old_items = old.as_array().unwrap_or(&empty);
                let new_items = match new.as_array() {
                    Some(items) => items,
                    None if old_items.is_empty() => return Value::Null,
                    None => {
                        self.record(path.to_string(), old, new, force_new);
                        return Value::Null;
                    },
                };
                let mut planned = Vec::with_capacity(new_items.len());
                for (i, n) in new_items.iter().enumerate() {
                    let item_path = path::join(path, &i.to_string());
                    match old_items.get(i) {
                        Some(o) => planned.push(self.block(&nested.block, o, n, &item_path)),
                        None => {
                            self.record(item_path, &Value::Null, n, force_new);
                            planned.push(n.clone());
                        },
                    }
                }
                for (i, o) in old_items.iter().enumerate().skip(new_items.len()) {
                    self.record(path::join(path, &i.to_string()), o, &Value::Null, force_new);
                }
                Value::Array(planned)
            },
            BlockNestingMode::Set => {
                if nested_equal(nested, old, new) || set_items_match(&nested.block, old, new) {
                    return if new.is_null() { Value::Null } else { old.clone() };
                }
                self.record(path.to_string(), old, new, force_new);
                merge_set_items(&nested.block, old, new)
            },
            BlockNestingMode::Map => {
                let empty = Map::new();
                let old_map = old.as_object().unwrap_or(&empty);
                let new_map = match new.as_object() {
                    Some(map) => map,
                    None if old_map.is_empty() => return Value::Null,
                    None => {
                        self.record(path.to_string(), old, new, force_new);
                        return Value::Null;
                    },
                };
                let mut planned = Map::new();
                for (key, n) in new_map {
                    let item_path = path::join(path, key);
                    match old_map.get(key) {
                        Some(o) => {
                            planned.insert(key.clone(), self.block(&nested.block, o, n, &item_path));
                        },
                        None => {
                            self.record(item_path, &Value::Null, n, force_new);
                            planned.insert(key.clone(), n.clone());
                        },
                    }
                }
                for (key, o) in old_map {
                    if !new_map.contains_key(key) {
                        self.record(path::join(path, key), o, &Value::Null, force_new);
                    }
                }
                Value::Object(planned)
            },
        }
    }
}

/// Whether a configured set item describes a prior item: every configured
/// field matches, and computed fields left unset are ignored.
fn item_matches(block: &Block, old: &Value, new: &Value) -> bool {
    block.field_names().into_iter().all(|name| {
        let o = old.get(name).unwrap_or(&NULL);
        let n = new.get(name).unwrap_or(&NULL);
        if let Some(attr) = block.attributes.get(name) {
            (n.is_null() && attr.flags.computed) || typed_equal(&attr.attr_type, o, n)
        } else if let Some(nested) = block.blocks.get(name) {
            nested_equal(nested, o, n)
        } else {
            true
        }
    })
}

/// Pair every configured item with a distinct prior item.
fn set_items_match(block: &Block, old: &Value, new: &Value) -> bool {
    let old_items = old.as_array().map(Vec::as_slice).unwrap_or(&[]);
    let new_items = new.as_array().map(Vec::as_slice).unwrap_or(&[]);
    if old_items.len() != new_items.len() {
        return false;
    }
    let mut used = vec![false; old_items.len()];
    new_items.iter().all(|n| {
        let found = old_items
            .iter()
            .enumerate()
            .find(|(i, o)| !used[*i] && item_matches(block, o, n));
        match found {
            Some((i, _)) => {
                used[i] = true;
                true
            },
            None => false,
        }
    })
}

/// New set items, reusing the prior item (with its computed fields) where the
/// configured fields match.
fn merge_set_items(block: &Block, old: &Value, new: &Value) -> Value {
    let new_items = match new.as_array() {
        Some(items) => items,
        None => return Value::Null,
    };
    let old_items = old.as_array().map(Vec::as_slice).unwrap_or(&[]);
    let merged = new_items
        .iter()
        .map(|n| {
            old_items
                .iter()
                .find(|o| item_matches(block, o, n))
                .cloned()
                .unwrap_or_else(|| n.clone())
        })
        .collect();
    Value::Array(merged)
}

/// Second-pass view of a plan handed to a resource's custom-diff hook.
#[derive(Debug, Clone)]
pub struct ResourceDiff<'a> {
    schema: &'a Schema,
    prior: &'a Value,
    diff: InstanceDiff,
}

impl<'a> ResourceDiff<'a> {
    /// Wrap a mechanical diff.
    pub fn new(schema: &'a Schema, prior: &'a Value, diff: InstanceDiff) -> Self {
        Self {
            schema,
            prior,
            diff,
        }
    }

    /// The resource ID, empty when planning a create.
    pub fn id(&self) -> &str {
        self.prior.get("id").and_then(Value::as_str).unwrap_or("")
    }

    /// Whether this plan creates the resource.
    pub fn is_new_resource(&self) -> bool {
        self.prior.is_null()
    }

    /// Planned value at `path`.
    pub fn get(&self, path: &str) -> Value {
        path::get(&self.diff.planned, path).cloned().unwrap_or(Value::Null)
    }

    /// Prior value at `path`.
    pub fn get_old(&self, path: &str) -> Value {
        path::get(self.prior, path).cloned().unwrap_or(Value::Null)
    }

    /// Whether `path` or anything below it changed.
    pub fn has_change(&self, path: &str) -> bool {
        self.diff.has_change(path)
    }

    /// Plan a new value for `path`, e.g. a computed attribute known to change.
    pub fn set_new(&mut self, path: &str, value: Value) -> Result<(), ProviderError> {
        let node = self.schema.lookup(path).ok_or_else(|| {
            ProviderError::Validation(format!("set_new: unknown attribute '{}'", path))
        })?;
        if !node.accepts(&value) {
            return Err(ProviderError::Validation(format!(
                "set_new: value for '{}' does not match its type",
                path
            )));
        }
        let force_new = match node {
            SchemaNode::Attribute(attr) => attr.force_new,
            _ => false,
        };
        path::set(&mut self.diff.planned, path, value.clone()).map_err(ProviderError::Validation)?;

        self.diff.changes.retain(|c| !is_at_or_below(&c.path, path));
        let old = self.get_old(path);
        if old != value {
            self.diff.changes.push(AttributeDiff {
                path: path.to_string(),
                old,
                new: value,
                requires_replace: force_new && !self.is_new_resource(),
            });
            self.diff.changes.sort_by(|a, b| a.path.cmp(&b.path));
        }
        Ok(())
    }

    /// Drop the planned change at `path`, keeping the prior value.
    pub fn clear(&mut self, path: &str) -> Result<(), ProviderError> {
        let old = self.get_old(path);
        if old.is_null() {
            path::remove(&mut self.diff.planned, path);
        } else {
            path::set(&mut self.diff.planned, path, old).map_err(ProviderError::Validation)?;
        }
        self.diff.changes.retain(|c| !is_at_or_below(&c.path, path));
        Ok(())
    }

    /// Require replacement because `path` changed.
    pub fn force_new(&mut self, path: &str) -> Result<(), ProviderError> {
        if self.is_new_resource() {
            return Ok(());
        }
        let mut found = false;
        for change in &mut self.diff.changes {
            if is_at_or_below(&change.path, path) {
                change.requires_replace = true;
                found = true;
            }
        }
        if found {
            Ok(())
        } else {
            Err(ProviderError::Validation(format!(
                "force_new: no planned change at '{}'",
                path
            )))
        }
    }

    /// The adjusted plan.
    pub fn into_diff(self) -> InstanceDiff {
        self.diff
    }
}
