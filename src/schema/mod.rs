//! Schema types for describing provider and resource structure.
//!
//! Schemas describe the shape of provider configuration and resources.
//! Beyond documentation they drive validation, default injection, diffing
//! (including drift suppression) and typed reads and writes of resource
//! state through [`ResourceData`].

mod check;
pub mod data;
pub mod diff;
pub mod hash;
pub mod path;
pub mod suppress;
mod timeouts;

pub use check::check_schema;
pub use data::ResourceData;
pub use diff::{diff, AttributeDiff, InstanceDiff, ResourceDiff};
pub use timeouts::{format_duration, parse_duration, ResourceTimeouts, DEFAULT_TIMEOUT};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Name of the nested block carrying per-operation timeouts.
pub const TIMEOUTS_BLOCK: &str = "timeouts";

pub(crate) static NULL: Value = Value::Null;

/// The type of an attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    /// A string value.
    String,
    /// A 64-bit integer.
    Int64,
    /// A 64-bit floating point number.
    Float64,
    /// A boolean value.
    Bool,
    /// A list of values of a single type.
    List(Box<AttributeType>),
    /// A set of unique values of a single type.
    Set(Box<AttributeType>),
    /// A map from string keys to values of a single type.
    Map(Box<AttributeType>),
}

impl AttributeType {
    /// Create a list type.
    pub fn list(element_type: AttributeType) -> Self {
        Self::List(Box::new(element_type))
    }

    /// Create a set type.
    pub fn set(element_type: AttributeType) -> Self {
        Self::Set(Box::new(element_type))
    }

    /// Create a map type.
    pub fn map(element_type: AttributeType) -> Self {
        Self::Map(Box::new(element_type))
    }

    /// Whether this is a scalar type.
    pub fn is_primitive(&self) -> bool {
        matches!(self, Self::String | Self::Int64 | Self::Float64 | Self::Bool)
    }

    /// The element type of a collection.
    pub fn element(&self) -> Option<&AttributeType> {
        match self {
            Self::List(elem) | Self::Set(elem) | Self::Map(elem) => Some(elem),
            _ => None,
        }
    }

    /// Short name used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int64 => "int64",
            Self::Float64 => "float64",
            Self::Bool => "bool",
            Self::List(_) => "list",
            Self::Set(_) => "set",
            Self::Map(_) => "map",
        }
    }

    /// Whether `value` conforms to this type. Null conforms to every type.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (Self::String, v) => v.is_string(),
            (Self::Int64, v) => is_int64(v),
            (Self::Float64, v) => v.is_number(),
            (Self::Bool, v) => v.is_boolean(),
            (Self::List(elem) | Self::Set(elem), Value::Array(items)) => {
                items.iter().all(|item| !item.is_null() && elem.accepts(item))
            },
            (Self::Map(elem), Value::Object(entries)) => {
                entries.values().all(|item| elem.accepts(item))
            },
            _ => false,
        }
    }

    /// The value `Get` returns for an unset attribute of this type.
    pub fn zero_value(&self) -> Value {
        match self {
            Self::String => Value::String(String::new()),
            Self::Int64 => Value::from(0i64),
            Self::Float64 => Value::from(0.0f64),
            Self::Bool => Value::Bool(false),
            Self::List(_) | Self::Set(_) => Value::Array(Vec::new()),
            Self::Map(_) => Value::Object(serde_json::Map::new()),
        }
    }
}

pub(crate) fn is_int64(value: &Value) -> bool {
    match value {
        Value::Number(n) => {
            if n.as_i64().is_some() {
                true
            } else if let Some(f) = n.as_f64() {
                f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64
            } else {
                false
            }
        },
        _ => false,
    }
}

/// Describes how an attribute can be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AttributeFlags {
    /// The attribute is required in configuration.
    pub required: bool,
    /// The attribute is optional in configuration.
    pub optional: bool,
    /// The attribute is computed by the provider (read-only).
    pub computed: bool,
    /// The attribute is sensitive and should be hidden in logs/UI.
    pub sensitive: bool,
}

impl AttributeFlags {
    /// Create flags for a required attribute.
    pub fn required() -> Self {
        Self {
            required: true,
            ..Default::default()
        }
    }

    /// Create flags for an optional attribute.
    pub fn optional() -> Self {
        Self {
            optional: true,
            ..Default::default()
        }
    }

    /// Create flags for a computed attribute (read-only, set by provider).
    pub fn computed() -> Self {
        Self {
            computed: true,
            ..Default::default()
        }
    }

    /// Create flags for an optional+computed attribute (can be set, but has default from provider).
    pub fn optional_computed() -> Self {
        Self {
            optional: true,
            computed: true,
            ..Default::default()
        }
    }

    /// Mark the attribute as sensitive.
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// Computed and not settable from configuration.
    pub fn is_computed_only(&self) -> bool {
        self.computed && !self.optional && !self.required
    }
}

macro_rules! func_wrapper {
    ($(#[$meta:meta])* $name:ident, $($sig:tt)*) => {
        $(#[$meta])*
        #[derive(Clone)]
        pub struct $name(Arc<dyn $($sig)* + Send + Sync>);

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(stringify!($name))
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                std::ptr::eq(
                    Arc::as_ptr(&self.0) as *const (),
                    Arc::as_ptr(&other.0) as *const (),
                )
            }
        }
    };
}

func_wrapper!(
    /// A pure check run against a configured attribute value.
    ValidateFunc,
    Fn(&Value) -> Result<(), String>
);

func_wrapper!(
    /// Decides whether a difference between `old` and `new` at `path` is benign.
    SuppressFunc,
    Fn(&str, &Value, &Value) -> bool
);

func_wrapper!(
    /// Produces a default for an unset attribute.
    DefaultFunc,
    Fn() -> Option<Value>
);

impl ValidateFunc {
    /// Wrap a validation function.
    pub fn new(f: impl Fn(&Value) -> Result<(), String> + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Run the check.
    pub fn call(&self, value: &Value) -> Result<(), String> {
        (self.0)(value)
    }
}

impl SuppressFunc {
    /// Wrap a suppression predicate.
    pub fn new(f: impl Fn(&str, &Value, &Value) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Evaluate the predicate.
    pub fn call(&self, path: &str, old: &Value, new: &Value) -> bool {
        (self.0)(path, old, new)
    }
}

impl DefaultFunc {
    /// Wrap a default-producing function.
    pub fn new(f: impl Fn() -> Option<Value> + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// A default read from the first set environment variable in `names`.
    pub fn env(names: &'static [&'static str]) -> Self {
        Self::new(move || {
            names
                .iter()
                .filter_map(|name| std::env::var(name).ok())
                .find(|v| !v.is_empty())
                .map(Value::String)
        })
    }

    /// Produce the default.
    pub fn call(&self) -> Option<Value> {
        (self.0)()
    }
}

/// Describes a single attribute in a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    /// The type of the attribute.
    #[serde(rename = "type")]
    pub attr_type: AttributeType,
    /// Flags describing how the attribute can be used.
    #[serde(flatten)]
    pub flags: AttributeFlags,
    /// Human-readable description of the attribute.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// If set, changing this attribute forces resource replacement.
    #[serde(default)]
    pub force_new: bool,
    /// Default value for the attribute (JSON-encoded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Set when the attribute is deprecated; shown as a warning when used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecated: Option<String>,
    /// Sibling attributes that may not be set together with this one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts_with: Vec<String>,
    /// Default computed at plan time.
    #[serde(skip)]
    pub default_func: Option<DefaultFunc>,
    /// Checks run against configured values.
    #[serde(skip)]
    pub validators: Vec<ValidateFunc>,
    /// Drift suppression predicate.
    #[serde(skip)]
    pub diff_suppress: Option<SuppressFunc>,
}

impl Attribute {
    /// Create a new attribute with the given type and flags.
    pub fn new(attr_type: AttributeType, flags: AttributeFlags) -> Self {
        Self {
            attr_type,
            flags,
            description: None,
            force_new: false,
            default: None,
            deprecated: None,
            conflicts_with: Vec::new(),
            default_func: None,
            validators: Vec::new(),
            diff_suppress: None,
        }
    }

    /// Create a required string attribute.
    pub fn required_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::required())
    }

    /// Create an optional string attribute.
    pub fn optional_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::optional())
    }

    /// Create a computed string attribute.
    pub fn computed_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::computed())
    }

    /// Create an optional string the provider fills in when unset.
    pub fn optional_computed_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::optional_computed())
    }

    /// Create a required int64 attribute.
    pub fn required_int64() -> Self {
        Self::new(AttributeType::Int64, AttributeFlags::required())
    }

    /// Create an optional int64 attribute.
    pub fn optional_int64() -> Self {
        Self::new(AttributeType::Int64, AttributeFlags::optional())
    }

    /// Create a computed int64 attribute.
    pub fn computed_int64() -> Self {
        Self::new(AttributeType::Int64, AttributeFlags::computed())
    }

    /// Create a required bool attribute.
    pub fn required_bool() -> Self {
        Self::new(AttributeType::Bool, AttributeFlags::required())
    }

    /// Create an optional bool attribute.
    pub fn optional_bool() -> Self {
        Self::new(AttributeType::Bool, AttributeFlags::optional())
    }

    /// Create a computed bool attribute.
    pub fn computed_bool() -> Self {
        Self::new(AttributeType::Bool, AttributeFlags::computed())
    }

    /// Create an optional string-to-string map, used for tags.
    pub fn optional_string_map() -> Self {
        Self::new(
            AttributeType::map(AttributeType::String),
            AttributeFlags::optional(),
        )
    }

    /// Set the description for this attribute.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark this attribute as forcing resource replacement when changed.
    pub fn with_force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    /// Set a default value for this attribute.
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Compute the default at plan time.
    pub fn with_default_func(mut self, default: DefaultFunc) -> Self {
        self.default_func = Some(default);
        self
    }

    /// Add a validation check.
    pub fn with_validator(
        mut self,
        validator: impl Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.validators.push(ValidateFunc::new(validator));
        self
    }

    /// Register a drift suppression predicate.
    pub fn with_diff_suppress(
        mut self,
        suppress: impl Fn(&str, &Value, &Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.diff_suppress = Some(SuppressFunc::new(suppress));
        self
    }

    /// Mark this attribute as deprecated.
    pub fn with_deprecation(mut self, message: impl Into<String>) -> Self {
        self.deprecated = Some(message.into());
        self
    }

    /// Declare sibling attributes that conflict with this one.
    pub fn with_conflicts_with(mut self, names: &[&str]) -> Self {
        self.conflicts_with = names.iter().map(|n| n.to_string()).collect();
        self
    }

    /// Mark this attribute as sensitive.
    pub fn sensitive(mut self) -> Self {
        self.flags.sensitive = true;
        self
    }

    /// Mark this attribute as computed in addition to its other flags.
    pub fn computed(mut self) -> Self {
        self.flags.computed = true;
        self
    }

    /// The static default, or the result of the default function.
    pub fn default_value(&self) -> Option<Value> {
        self.default
            .clone()
            .or_else(|| self.default_func.as_ref().and_then(|f| f.call()))
    }
}

/// The nesting mode for a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BlockNestingMode {
    /// A single nested block (at most one).
    #[default]
    Single,
    /// A list of nested blocks (zero or more, ordered).
    List,
    /// A set of nested blocks (zero or more, unordered, unique).
    Set,
    /// A map of nested blocks keyed by string.
    Map,
}

/// A nested block within a schema.
///
/// Blocks are used for complex nested structures that have their own
/// set of attributes (e.g., `router` blocks on a private DNS zone).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// The attributes within this block.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, Attribute>,
    /// Nested blocks within this block.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub blocks: HashMap<String, NestedBlock>,
    /// Human-readable description of the block.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Block {
    /// Create a new empty block.
    pub fn new() -> Self {
        Self {
            attributes: HashMap::new(),
            blocks: HashMap::new(),
            description: None,
        }
    }

    /// Add an attribute to this block.
    pub fn with_attribute(mut self, name: impl Into<String>, attr: Attribute) -> Self {
        self.attributes.insert(name.into(), attr);
        self
    }

    /// Add a nested block to this block.
    pub fn with_block(mut self, name: impl Into<String>, block: NestedBlock) -> Self {
        self.blocks.insert(name.into(), block);
        self
    }

    /// Set the description for this block.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Whether any attribute in this block or below forces replacement.
    pub fn has_force_new(&self) -> bool {
        self.attributes.values().any(|a| a.force_new)
            || self.blocks.values().any(|b| b.block.has_force_new())
    }

    /// Attribute names and nested block names, sorted.
    pub fn field_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .attributes
            .keys()
            .chain(self.blocks.keys())
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        names
    }

    /// Resolve a dotted path to the schema node describing it.
    pub fn lookup(&self, path: &str) -> Option<SchemaNode<'_>> {
        let segments = path::split(path);
        lookup_in_block(self, &segments)
    }

    /// Whether `value` conforms to this block: an object whose keys are all
    /// known fields with conforming values.
    pub fn accepts(&self, value: &Value) -> bool {
        match value {
            Value::Null => true,
            Value::Object(fields) => fields.iter().all(|(name, v)| {
                if name == "id" {
                    return v.is_string() || v.is_null();
                }
                if let Some(attr) = self.attributes.get(name) {
                    attr.attr_type.accepts(v)
                } else if let Some(nested) = self.blocks.get(name) {
                    nested.accepts(v)
                } else {
                    false
                }
            }),
            _ => false,
        }
    }
}

impl Default for Block {
    fn default() -> Self {
        Self::new()
    }
}

/// The schema element a path resolves to.
#[derive(Debug, Clone, Copy)]
pub enum SchemaNode<'a> {
    /// A declared attribute.
    Attribute(&'a Attribute),
    /// An element of a list, set or map attribute.
    Element(&'a AttributeType),
    /// A whole nested block value (object, array or map depending on mode).
    Block(&'a NestedBlock),
    /// One item of a repeated nested block.
    BlockItem(&'a Block),
}

impl SchemaNode<'_> {
    /// Whether `value` conforms to the node.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::Attribute(attr) => attr.attr_type.accepts(value),
            Self::Element(elem) => elem.accepts(value),
            Self::Block(nested) => nested.accepts(value),
            Self::BlockItem(block) => block.accepts(value),
        }
    }

    /// The value returned for an unset path.
    pub fn zero_value(&self) -> Value {
        match self {
            Self::Attribute(attr) => attr.attr_type.zero_value(),
            Self::Element(elem) => elem.zero_value(),
            Self::Block(nested) => match nested.nesting_mode {
                BlockNestingMode::Single => Value::Null,
                BlockNestingMode::List | BlockNestingMode::Set => Value::Array(Vec::new()),
                BlockNestingMode::Map => Value::Object(serde_json::Map::new()),
            },
            Self::BlockItem(_) => Value::Null,
        }
    }
}

fn lookup_in_block<'a>(block: &'a Block, segments: &[&str]) -> Option<SchemaNode<'a>> {
    let (first, rest) = segments.split_first()?;
    if let Some(attr) = block.attributes.get(*first) {
        return lookup_in_type(SchemaNode::Attribute(attr), &attr.attr_type, rest);
    }
    let nested = block.blocks.get(*first)?;
    if rest.is_empty() {
        return Some(SchemaNode::Block(nested));
    }
    match nested.nesting_mode {
        BlockNestingMode::Single => lookup_in_block(&nested.block, rest),
        BlockNestingMode::List | BlockNestingMode::Set | BlockNestingMode::Map => {
            if rest.len() == 1 {
                Some(SchemaNode::BlockItem(&nested.block))
            } else {
                lookup_in_block(&nested.block, &rest[1..])
            }
        },
    }
}

fn lookup_in_type<'a>(
    node: SchemaNode<'a>,
    attr_type: &'a AttributeType,
    segments: &[&str],
) -> Option<SchemaNode<'a>> {
    if segments.is_empty() {
        return Some(node);
    }
    let elem = attr_type.element()?;
    lookup_in_type(SchemaNode::Element(elem), elem, &segments[1..])
}

/// A nested block with its nesting mode and constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedBlock {
    /// The block definition.
    #[serde(flatten)]
    pub block: Block,
    /// How the block is nested (single, list, set, map).
    #[serde(default)]
    pub nesting_mode: BlockNestingMode,
    /// Minimum number of blocks required.
    #[serde(default)]
    pub min_items: u32,
    /// Maximum number of blocks allowed (0 = unlimited).
    #[serde(default)]
    pub max_items: u32,
}

impl NestedBlock {
    /// Create a single nested block (0 or 1 allowed).
    pub fn single(block: Block) -> Self {
        Self {
            block,
            nesting_mode: BlockNestingMode::Single,
            min_items: 0,
            max_items: 1,
        }
    }

    /// Create a list of nested blocks.
    pub fn list(block: Block) -> Self {
        Self {
            block,
            nesting_mode: BlockNestingMode::List,
            min_items: 0,
            max_items: 0,
        }
    }

    /// Create a set of nested blocks.
    pub fn set(block: Block) -> Self {
        Self {
            block,
            nesting_mode: BlockNestingMode::Set,
            min_items: 0,
            max_items: 0,
        }
    }

    /// Create a map of nested blocks.
    pub fn map(block: Block) -> Self {
        Self {
            block,
            nesting_mode: BlockNestingMode::Map,
            min_items: 0,
            max_items: 0,
        }
    }

    /// Set the minimum number of blocks required.
    pub fn with_min_items(mut self, min: u32) -> Self {
        self.min_items = min;
        self
    }

    /// Set the maximum number of blocks allowed.
    pub fn with_max_items(mut self, max: u32) -> Self {
        self.max_items = max;
        self
    }

    /// Whether `value` has the shape this nesting mode expects.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self.nesting_mode, value) {
            (_, Value::Null) => true,
            (BlockNestingMode::Single, v) => self.block.accepts(v),
            (BlockNestingMode::List | BlockNestingMode::Set, Value::Array(items)) => {
                items.iter().all(|item| item.is_object() && self.block.accepts(item))
            },
            (BlockNestingMode::Map, Value::Object(items)) => {
                items.values().all(|item| item.is_object() && self.block.accepts(item))
            },
            _ => false,
        }
    }
}

/// Schema for a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// The version of this schema (for state upgrades).
    #[serde(default)]
    pub version: u64,
    /// The root block containing all attributes and nested blocks.
    #[serde(flatten)]
    pub block: Block,
}

impl Schema {
    /// Create a new schema with the given version.
    pub fn new(version: u64) -> Self {
        Self {
            version,
            block: Block::new(),
        }
    }

    /// Create a schema at version 0.
    pub fn v0() -> Self {
        Self::new(0)
    }

    /// Add an attribute to the schema.
    pub fn with_attribute(mut self, name: impl Into<String>, attr: Attribute) -> Self {
        self.block.attributes.insert(name.into(), attr);
        self
    }

    /// Add a nested block to the schema.
    pub fn with_block(mut self, name: impl Into<String>, block: NestedBlock) -> Self {
        self.block.blocks.insert(name.into(), block);
        self
    }

    /// Set the description of the root block.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.block.description = Some(description.into());
        self
    }

    /// Add the `timeouts` block with an optional duration per operation.
    pub fn with_timeouts(self, operations: &[&str]) -> Self {
        let mut block = Block::new();
        for op in operations {
            block = block.with_attribute(
                *op,
                Attribute::optional_string()
                    .with_description(format!("Timeout for the {} operation, e.g. \"20m\"", op))
                    .with_validator(|v| match v.as_str() {
                        Some(s) => parse_duration(s).map(|_| ()).map_err(|e| e.message()),
                        None => Ok(()),
                    }),
            );
        }
        self.with_block(TIMEOUTS_BLOCK, NestedBlock::single(block))
    }

    /// Resolve a dotted path against the root block.
    pub fn lookup(&self, path: &str) -> Option<SchemaNode<'_>> {
        self.block.lookup(path)
    }
}

/// Schema for the provider configuration and every resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProviderSchema {
    /// Schema for provider configuration.
    #[serde(default)]
    pub provider: Schema,
    /// Schemas for each resource type.
    #[serde(default)]
    pub resources: HashMap<String, Schema>,
}

impl ProviderSchema {
    /// Create a new empty provider schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the provider configuration schema.
    pub fn with_provider_config(mut self, schema: Schema) -> Self {
        self.provider = schema;
        self
    }

    /// Add a resource schema.
    pub fn with_resource(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.resources.insert(name.into(), schema);
        self
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::v0()
    }
}

/// Diagnostic severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    /// An error that prevents the operation from completing.
    Error,
    /// A warning that doesn't prevent the operation but should be addressed.
    Warning,
}

/// A diagnostic message from the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// The severity of the diagnostic.
    pub severity: DiagnosticSeverity,
    /// A short summary of the issue.
    pub summary: String,
    /// A detailed description of the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// The attribute path where the issue occurred.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
}

impl Diagnostic {
    /// Create an error diagnostic.
    pub fn error(summary: impl Into<String>) -> Self {
        Self {
            severity: DiagnosticSeverity::Error,
            summary: summary.into(),
            detail: None,
            attribute: None,
        }
    }

    /// Create a warning diagnostic.
    pub fn warning(summary: impl Into<String>) -> Self {
        Self {
            severity: DiagnosticSeverity::Warning,
            summary: summary.into(),
            detail: None,
            attribute: None,
        }
    }

    /// Add detail to this diagnostic.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Set the attribute path for this diagnostic.
    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }

    /// Whether this diagnostic is an error.
    pub fn is_error(&self) -> bool {
        self.severity == DiagnosticSeverity::Error
    }
}

/// Whether any diagnostic in the list is an error.
pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(Diagnostic::is_error)
}
