//! Static checks over schema documents.
//!
//! ## Rules
//!
//! - **Schema invalid** (error): the document fails to parse or resolve.
//! - **Checksum needs hook**: a checksum without a built-in `algorithm` works only with a hook.
//! - **Leaf without id**: an editable leaf without an `id` cannot be addressed by edits or hooks.
//! - **Overlapping fields**: two top-level int fields share bytes (often a typo in an offset).
//! - **Empty validator**: no region is declared, so every buffer fails detection.
//! - **Container without items**: a container with no child template.
//!
//! Run the linter via the `lint_schema` binary: `lint_schema schemas/*.json`.
//! Exit code 1 if any error-level findings.

use crate::parser;
use crate::schema::{Item, Schema};

/// Severity of a lint finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// Identifies which rule produced the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LintRule {
    SchemaInvalid,
    ChecksumNeedsHook,
    LeafWithoutId,
    OverlappingFields,
    EmptyValidator,
    ContainerWithoutItems,
}

impl LintRule {
    pub fn name(self) -> &'static str {
        match self {
            LintRule::SchemaInvalid => "schema-invalid",
            LintRule::ChecksumNeedsHook => "checksum-needs-hook",
            LintRule::LeafWithoutId => "leaf-without-id",
            LintRule::OverlappingFields => "overlapping-fields",
            LintRule::EmptyValidator => "empty-validator",
            LintRule::ContainerWithoutItems => "container-without-items",
        }
    }
}

/// A single lint message, located by item path (`items[2].items[0]`).
#[derive(Debug, Clone)]
pub struct LintMessage {
    pub path: String,
    pub rule: LintRule,
    pub severity: Severity,
    pub message: String,
}

fn warn(out: &mut Vec<LintMessage>, path: &str, rule: LintRule, message: String) {
    out.push(LintMessage { path: path.to_string(), rule, severity: Severity::Warning, message });
}

/// Parse then lint schema source.
pub fn lint_source(source: &str) -> Vec<LintMessage> {
    match parser::parse(source) {
        Ok(schema) => lint(&schema),
        Err(e) => vec![LintMessage {
            path: String::new(),
            rule: LintRule::SchemaInvalid,
            severity: Severity::Error,
            message: e.to_string(),
        }],
    }
}

/// Run every rule on a parsed schema. Messages are in document order.
pub fn lint(schema: &Schema) -> Vec<LintMessage> {
    let mut out = Vec::new();
    if schema.validator.regions.is_empty() {
        warn(
            &mut out,
            "validator",
            LintRule::EmptyValidator,
            "no region declared; every buffer will fail detection".to_string(),
        );
    }
    for (i, item) in schema.items.iter().enumerate() {
        lint_item(item, &format!("items[{}]", i), &mut out);
    }
    overlapping(schema, &mut out);
    out
}

fn lint_item(item: &Item, path: &str, out: &mut Vec<LintMessage>) {
    match item {
        Item::Checksum(c) if c.algorithm.is_none() => warn(
            out,
            path,
            LintRule::ChecksumNeedsHook,
            "checksum has no built-in algorithm; a generate_checksum hook is required".to_string(),
        ),
        Item::Container(c) if c.items.is_empty() => {
            warn(out, path, LintRule::ContainerWithoutItems, "container has no items".to_string())
        }
        _ => {}
    }
    if item.is_leaf() && item.id().is_none() && !matches!(item, Item::Checksum(_)) {
        warn(
            out,
            path,
            LintRule::LeafWithoutId,
            format!("{} field without id cannot be edited", item.kind_name()),
        );
    }
    if let Some(children) = item.children() {
        for (i, child) in children.iter().enumerate() {
            lint_item(child, &format!("{}.items[{}]", path, i), out);
        }
    }
}

fn overlapping(schema: &Schema, out: &mut Vec<LintMessage>) {
    let spans: Vec<(usize, usize, usize, &Item)> = schema
        .items
        .iter()
        .enumerate()
        .filter_map(|(i, item)| match item {
            Item::Int(f) if f.bit_window.is_none() && f.data_type.is_byte_integer() => {
                let end = f.offset.checked_add(f.data_type.bytes())?;
                Some((i, f.offset, end, item))
            }
            _ => None,
        })
        .collect();
    for (a, (i, start_a, end_a, item_a)) in spans.iter().enumerate() {
        for (j, start_b, end_b, item_b) in &spans[a + 1..] {
            if start_a < end_b && start_b < end_a {
                warn(
                    out,
                    &format!("items[{}]", j),
                    LintRule::OverlappingFields,
                    format!(
                        "{} overlaps items[{}] ({})",
                        item_b.id().unwrap_or("field"),
                        i,
                        item_a.id().unwrap_or("field")
                    ),
                );
            }
        }
    }
}
