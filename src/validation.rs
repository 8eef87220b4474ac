//! Validation of configuration values against a [`Schema`].
//!
//! Diagnostics carry dotted attribute paths (`data_view.source_filters.1`)
//! so the host can point at the offending line.
//!
//! # Example
//!
//! ```
//! use hemmer_provider_elasticstack::schema::{Attribute, Schema};
//! use hemmer_provider_elasticstack::validation::validate;
//! use serde_json::json;
//!
//! let schema = Schema::v0()
//!     .with_attribute("username", Attribute::required_string())
//!     .with_attribute("enabled", Attribute::optional_bool());
//!
//! assert!(validate(&schema, &json!({"username": "jane", "enabled": true})).is_empty());
//!
//! let diagnostics = validate(&schema, &json!({"username": "jane", "enabled": "yes"}));
//! assert_eq!(diagnostics.len(), 1);
//! assert_eq!(diagnostics[0].attribute, Some("enabled".to_string()));
//! ```

use std::collections::HashMap;

use serde_json::Value;

use crate::schema::{
    Attribute, AttributeType, Block, BlockNestingMode, Diagnostic, NestedBlock, Schema,
};

/// Validate a configuration value against a schema.
///
/// - required attributes must be present and non-null
/// - computed-only attributes are skipped
/// - values must match the attribute type, recursively
/// - set elements must be unique
/// - nested blocks honor their min/max item counts
pub fn validate(schema: &Schema, value: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    validate_block(&schema.block, value, "", &mut diagnostics);
    diagnostics
}

/// Check that a string attribute holds one of `allowed`.
///
/// Null or absent values pass; presence is checked by [`validate`].
pub fn check_one_of(value: &Value, attribute: &str, allowed: &[&str]) -> Option<Diagnostic> {
    let actual = value.get(attribute)?.as_str()?;
    if allowed.contains(&actual) {
        return None;
    }
    Some(
        Diagnostic::error(format!("Invalid value for attribute '{}'", attribute))
            .with_detail(format!(
                "Expected one of [{}], got {:?}",
                allowed.join(", "),
                actual
            ))
            .with_attribute(attribute),
    )
}

fn validate_block(block: &Block, value: &Value, path: &str, diagnostics: &mut Vec<Diagnostic>) {
    let obj = match value {
        Value::Object(map) => map,
        Value::Null => return,
        _ => {
            let diag =
                Diagnostic::error("Expected object").with_detail(format!("Got {}", type_name(value)));
            diagnostics.push(if path.is_empty() {
                diag
            } else {
                diag.with_attribute(path)
            });
            return;
        },
    };

    for (name, attr) in &block.attributes {
        validate_attribute(attr, obj.get(name), &join_path(path, name), diagnostics);
    }

    for (name, nested) in &block.blocks {
        validate_nested_block(nested, obj.get(name), &join_path(path, name), diagnostics);
    }
}

fn validate_attribute(
    attr: &Attribute,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if attr.flags.computed && !attr.flags.optional && !attr.flags.required {
        return;
    }

    match value {
        None | Some(Value::Null) => {
            if attr.flags.required {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required attribute '{}'", path))
                        .with_detail("This attribute is required and must be provided")
                        .with_attribute(path),
                );
            }
        },
        Some(v) => validate_type(&attr.attr_type, v, path, diagnostics),
    }
}

fn validate_type(
    attr_type: &AttributeType,
    value: &Value,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match attr_type {
        AttributeType::String if !value.is_string() => {
            diagnostics.push(type_error(path, "string", value))
        },
        AttributeType::Int64 if !is_int64(value) => {
            diagnostics.push(type_error(path, "int64", value))
        },
        AttributeType::Float64 if !value.is_number() => {
            diagnostics.push(type_error(path, "float64", value))
        },
        AttributeType::Bool if !value.is_boolean() => {
            diagnostics.push(type_error(path, "bool", value))
        },
        AttributeType::List(element) => match value.as_array() {
            Some(items) => validate_elements(element, items, path, diagnostics),
            None => diagnostics.push(type_error(path, "list", value)),
        },
        AttributeType::Set(element) => match value.as_array() {
            Some(items) => {
                validate_elements(element, items, path, diagnostics);
                for (i, item) in items.iter().enumerate() {
                    if items[..i].contains(item) {
                        diagnostics.push(
                            Diagnostic::error(format!("Duplicate set element in '{}'", path))
                                .with_detail(format!("{} appears more than once", item))
                                .with_attribute(format!("{}.{}", path, i)),
                        );
                    }
                }
            },
            None => diagnostics.push(type_error(path, "set", value)),
        },
        AttributeType::Map(element) => match value.as_object() {
            Some(map) => {
                for (key, item) in map {
                    validate_type(element, item, &format!("{}.{}", path, key), diagnostics);
                }
            },
            None => diagnostics.push(type_error(path, "map", value)),
        },
        AttributeType::Object(attrs) => match value.as_object() {
            Some(map) => validate_object(attrs, map, path, diagnostics),
            None => diagnostics.push(type_error(path, "object", value)),
        },
        _ => {},
    }
}

fn validate_elements(
    element: &AttributeType,
    items: &[Value],
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    for (i, item) in items.iter().enumerate() {
        validate_type(element, item, &format!("{}.{}", path, i), diagnostics);
    }
}

fn validate_object(
    attrs: &HashMap<String, AttributeType>,
    obj: &serde_json::Map<String, Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    // Object members carry no flags, so absent members are accepted.
    for (name, attr_type) in attrs {
        if let Some(value) = obj.get(name).filter(|v| !v.is_null()) {
            validate_type(attr_type, value, &join_path(path, name), diagnostics);
        }
    }
}

fn validate_nested_block(
    nested: &NestedBlock,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let value = match value {
        None | Some(Value::Null) => {
            if nested.min_items > 0 {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required block '{}'", path))
                        .with_detail(format!(
                            "At least {} block(s) required",
                            nested.min_items
                        ))
                        .with_attribute(path),
                );
            }
            return;
        },
        Some(v) => v,
    };

    match (nested.nesting_mode, value) {
        (BlockNestingMode::Single, v) => validate_block(&nested.block, v, path, diagnostics),
        (BlockNestingMode::List | BlockNestingMode::Set, Value::Array(items)) => {
            check_item_count(nested, items.len(), path, diagnostics);
            for (i, item) in items.iter().enumerate() {
                validate_block(&nested.block, item, &format!("{}.{}", path, i), diagnostics);
            }
        },
        (BlockNestingMode::Map, Value::Object(items)) => {
            check_item_count(nested, items.len(), path, diagnostics);
            for (key, item) in items {
                validate_block(&nested.block, item, &format!("{}.{}", path, key), diagnostics);
            }
        },
        (mode, v) => {
            let expected = if mode == BlockNestingMode::Map {
                "map"
            } else {
                "list"
            };
            diagnostics.push(
                Diagnostic::error(format!("Expected {} for block '{}'", expected, path))
                    .with_detail(format!("Got {}", type_name(v)))
                    .with_attribute(path),
            );
        },
    }
}

fn check_item_count(
    nested: &NestedBlock,
    len: usize,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let len = len as u32;
    if len < nested.min_items {
        diagnostics.push(
            Diagnostic::error(format!(
                "Block '{}' requires at least {} item(s), got {}",
                path, nested.min_items, len
            ))
            .with_attribute(path),
        );
    }
    // 0 means unlimited
    if nested.max_items > 0 && len > nested.max_items {
        diagnostics.push(
            Diagnostic::error(format!(
                "Block '{}' allows at most {} item(s), got {}",
                path, nested.max_items, len
            ))
            .with_attribute(path),
        );
    }
}

fn join_path(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", base, name)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn is_int64(value: &Value) -> bool {
    match value {
        Value::Number(n) if n.is_i64() => true,
        Value::Number(n) => n
            .as_f64()
            .map(|f| f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64)
            .unwrap_or(false),
        _ => false,
    }
}

fn type_error(path: &str, expected: &str, got: &Value) -> Diagnostic {
    Diagnostic::error(format!("Invalid type for attribute '{}'", path))
        .with_detail(format!("Expected {}, got {}", expected, type_name(got)))
        .with_attribute(path)
}
