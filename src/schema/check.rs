use super::{path, Attribute, AttributeType, Block, BlockNestingMode, Schema, TIMEOUTS_BLOCK};
use crate::error::ProviderError;

/// Check the structural invariants of a resource schema.
///
/// `updatable` is false for resources without an update operation; every
/// configurable attribute of such a resource must force replacement.
pub fn check_schema(schema: &Schema, updatable: bool) -> Result<(), ProviderError> {
    let mut problems = Vec::new();
    check_block(&schema.block, "", updatable, &mut problems);
    if problems.is_empty() {
        Ok(())
    } else {
        problems.sort();
        Err(ProviderError::Configuration(problems.join("; ")))
    }
}

fn check_block(block: &Block, base: &str, updatable: bool, problems: &mut Vec<String>) {
    for (name, attr) in &block.attributes {
        check_attribute(attr, &path::join(base, name), updatable, problems);
    }
    for (name, nested) in &block.blocks {
        if base.is_empty() && name == TIMEOUTS_BLOCK {
            continue;
        }
        let block_path = path::join(base, name);
        if nested.nesting_mode == BlockNestingMode::Single && nested.max_items > 1 {
            problems.push(format!("{}: single block cannot allow more than one item", block_path));
        }
        if nested.max_items > 0 && nested.min_items > nested.max_items {
            problems.push(format!("{}: min_items exceeds max_items", block_path));
        }
        check_block(&nested.block, &block_path, updatable, problems);
    }
}

fn check_attribute(attr: &Attribute, path: &str, updatable: bool, problems: &mut Vec<String>) {
    let flags = attr.flags;
    if !flags.required && !flags.optional && !flags.computed {
        problems.push(format!("{}: one of required, optional or computed must be set", path));
    }
    if flags.required && (flags.optional || flags.computed) {
        problems.push(format!("{}: required cannot be combined with optional or computed", path));
    }
    if flags.required && (attr.default.is_some() || attr.default_func.is_some()) {
        problems.push(format!("{}: required attributes cannot have a default", path));
    }
    if attr.force_new && flags.is_computed_only() {
        problems.push(format!("{}: force_new cannot be set on a computed-only attribute", path));
    }
    if let Some(default) = &attr.default {
        if !attr.attr_type.accepts(default) {
            problems.push(format!(
                "{}: default value does not match type {}",
                path,
                attr.attr_type.type_name()
            ));
        }
    }
    if let AttributeType::Set(elem) = &attr.attr_type {
        if !elem.is_primitive() {
            problems.push(format!("{}: set elements must be primitive; use a set block", path));
        }
    }
    if !attr.conflicts_with.is_empty() && flags.required {
        problems.push(format!("{}: required attributes cannot conflict with others", path));
    }
    if !updatable && !flags.is_computed_only() && !attr.force_new {
        problems.push(format!(
            "{}: resource has no update, so configurable attributes must be force_new",
            path
        ));
    }
}
