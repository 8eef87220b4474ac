//! Schema-driven planning.
//!
//! Every resource plans the same way: defaults are applied to the proposed
//! configuration, computed attributes keep their prior value, and changes to
//! `force_new` attributes or blocks turn the update into a replacement.

use serde_json::{Map, Value};

use crate::schema::{AttributeType, Block, BlockNestingMode, NestedBlock, Schema};
use crate::types::{AttributeChange, PlanResult};

/// Computed attribute the host keeps across a replacement.
const ID: &str = "id";

/// Plan a create, update or destroy for a resource.
///
/// `prior` is `None` (or null) when the resource does not exist yet;
/// a null `proposed` means the resource is being destroyed.
pub fn plan(schema: &Schema, prior: Option<&Value>, proposed: &Value) -> PlanResult {
    let prior = prior.filter(|p| !p.is_null());

    match (prior, proposed) {
        (Some(prior), Value::Null) => plan_destroy(prior),
        (None, Value::Null) => PlanResult::no_change(Value::Null),
        (None, proposed) => plan_create(schema, proposed),
        (Some(prior), proposed) => plan_update(schema, prior, proposed),
    }
}

fn plan_create(schema: &Schema, proposed: &Value) -> PlanResult {
    let planned = with_defaults(&schema.block, proposed);
    let changes = sorted_entries(&planned)
        .into_iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| AttributeChange::added(k, v.clone()))
        .collect();
    PlanResult::with_changes(planned, changes, false)
}

fn plan_update(schema: &Schema, prior: &Value, proposed: &Value) -> PlanResult {
    let mut planned = with_defaults(&schema.block, proposed);
    let mut carried = Vec::new();
    carry_computed(&schema.block, prior, &mut planned, "", &mut carried);

    let mut changes = Vec::new();
    let requires_replace = diff_block(&schema.block, prior, &planned, "", &mut changes);

    if requires_replace {
        for path in carried.iter().filter(|p| p.as_str() != ID) {
            clear_path(&mut planned, path);
        }
    }

    if changes.is_empty() {
        PlanResult::no_change(planned)
    } else {
        PlanResult::with_changes(planned, changes, requires_replace)
    }
}

fn plan_destroy(prior: &Value) -> PlanResult {
    let changes = sorted_entries(prior)
        .into_iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| AttributeChange::removed(k, v.clone()))
        .collect();
    PlanResult::with_changes(Value::Null, changes, false)
}

/// Apply attribute defaults to a config object, recursing into present single blocks.
fn with_defaults(block: &Block, value: &Value) -> Value {
    let Value::Object(obj) = value else {
        return value.clone();
    };
    let mut out = obj.clone();

    for (name, attr) in &block.attributes {
        if let Some(default) = &attr.default {
            let unset = out.get(name).map_or(true, Value::is_null);
            if unset {
                out.insert(name.clone(), default.clone());
            }
        }
    }

    for (name, nested) in &block.blocks {
        if nested.nesting_mode != BlockNestingMode::Single {
            continue;
        }
        let inner = out
            .get(name)
            .filter(|v| v.is_object())
            .map(|v| with_defaults(&nested.block, v));
        if let Some(inner) = inner {
            out.insert(name.clone(), inner);
        }
    }

    Value::Object(out)
}

/// Copy prior values into computed attributes the config left null.
///
/// Recurses into single blocks present on both sides. The dotted paths of
/// the carried attributes are pushed onto `carried`.
fn carry_computed(
    block: &Block,
    prior: &Value,
    planned: &mut Value,
    prefix: &str,
    carried: &mut Vec<String>,
) {
    let (Value::Object(prior), Value::Object(planned)) = (prior, planned) else {
        return;
    };

    let mut names: Vec<&String> = block.attributes.keys().collect();
    names.sort();
    for name in names {
        if !block.attributes[name].flags.computed {
            continue;
        }
        let unset = planned.get(name).map_or(true, Value::is_null);
        match prior.get(name) {
            Some(value) if unset && !value.is_null() => {
                planned.insert(name.clone(), value.clone());
                carried.push(path(prefix, name));
            },
            _ => {},
        }
    }

    for (name, nested) in &block.blocks {
        if nested.nesting_mode != BlockNestingMode::Single {
            continue;
        }
        if let (Some(before), Some(after)) = (prior.get(name), planned.get_mut(name)) {
            carry_computed(&nested.block, before, after, &path(prefix, name), carried);
        }
    }
}

/// Null out the attribute at a dotted path, if present.
fn clear_path(value: &mut Value, path: &str) {
    let mut target = value;
    let mut parts = path.split('.').peekable();
    while let Some(part) = parts.next() {
        let Value::Object(map) = target else {
            return;
        };
        if parts.peek().is_none() {
            if map.contains_key(part) {
                map.insert(part.to_string(), Value::Null);
            }
            return;
        }
        match map.get_mut(part) {
            Some(next) => target = next,
            None => return,
        }
    }
}

/// Record changes between `prior` and `planned`; returns whether a replacement is needed.
fn diff_block(
    block: &Block,
    prior: &Value,
    planned: &Value,
    prefix: &str,
    changes: &mut Vec<AttributeChange>,
) -> bool {
    let empty = Map::new();
    let prior = prior.as_object().unwrap_or(&empty);
    let planned = planned.as_object().unwrap_or(&empty);
    let mut replace = false;

    let mut names: Vec<&String> = block.attributes.keys().collect();
    names.sort();
    for name in names {
        let attr = &block.attributes[name];
        let before = prior.get(name).unwrap_or(&Value::Null);
        let after = planned.get(name).unwrap_or(&Value::Null);
        if values_equal(&attr.attr_type, before, after) {
            continue;
        }
        changes.push(change(&path(prefix, name), before, after));
        replace |= attr.force_new;
    }

    let mut names: Vec<&String> = block.blocks.keys().collect();
    names.sort();
    for name in names {
        let nested = &block.blocks[name];
        let before = prior.get(name).unwrap_or(&Value::Null);
        let after = planned.get(name).unwrap_or(&Value::Null);
        let block_path = path(prefix, name);

        if nested.nesting_mode == BlockNestingMode::Single
            && before.is_object()
            && after.is_object()
        {
            let mark = changes.len();
            let inner_replace = diff_block(&nested.block, before, after, &block_path, changes);
            replace |= inner_replace || (nested.force_new && changes.len() > mark);
        } else if normalize_nested(nested, before) != normalize_nested(nested, after) {
            changes.push(change(&block_path, before, after));
            replace |= nested.force_new || nested.block.has_force_new();
        }
    }

    replace
}

fn change(path: &str, before: &Value, after: &Value) -> AttributeChange {
    match (before.is_null(), after.is_null()) {
        (true, _) => AttributeChange::added(path, after.clone()),
        (false, true) => AttributeChange::removed(path, before.clone()),
        (false, false) => AttributeChange::modified(path, before.clone(), after.clone()),
    }
}

/// Sets compare without regard to order.
fn values_equal(attr_type: &AttributeType, a: &Value, b: &Value) -> bool {
    a == b || normalize(attr_type, a) == normalize(attr_type, b)
}

/// Canonical form of a value for comparison.
///
/// Object members and block attributes missing on one side are null, and set
/// elements are sorted by their JSON text.
fn normalize(attr_type: &AttributeType, value: &Value) -> Value {
    match (attr_type, value) {
        (AttributeType::Object(members), Value::Object(obj)) => {
            let mut out = Map::new();
            for (name, member) in members {
                let v = obj.get(name).unwrap_or(&Value::Null);
                out.insert(name.clone(), normalize(member, v));
            }
            for (name, v) in obj.iter().filter(|(k, _)| !members.contains_key(*k)) {
                out.insert(name.clone(), v.clone());
            }
            Value::Object(out)
        },
        (AttributeType::List(element), Value::Array(items)) => {
            Value::Array(items.iter().map(|v| normalize(element, v)).collect())
        },
        (AttributeType::Set(element), Value::Array(items)) => {
            sorted(items.iter().map(|v| normalize(element, v)).collect())
        },
        (AttributeType::Map(element), Value::Object(obj)) => Value::Object(
            obj.iter()
                .map(|(k, v)| (k.clone(), normalize(element, v)))
                .collect(),
        ),
        _ => value.clone(),
    }
}

fn normalize_block(block: &Block, value: &Value) -> Value {
    let Value::Object(obj) = value else {
        return value.clone();
    };
    let mut out = obj.clone();
    for (name, attr) in &block.attributes {
        let v = obj.get(name).unwrap_or(&Value::Null);
        out.insert(name.clone(), normalize(&attr.attr_type, v));
    }
    for (name, nested) in &block.blocks {
        let v = obj.get(name).unwrap_or(&Value::Null);
        out.insert(name.clone(), normalize_nested(nested, v));
    }
    Value::Object(out)
}

fn normalize_nested(nested: &NestedBlock, value: &Value) -> Value {
    match (nested.nesting_mode, value) {
        (BlockNestingMode::Single, _) => normalize_block(&nested.block, value),
        (BlockNestingMode::List, Value::Array(items)) => Value::Array(
            items.iter().map(|v| normalize_block(&nested.block, v)).collect(),
        ),
        (BlockNestingMode::Set, Value::Array(items)) => {
            sorted(items.iter().map(|v| normalize_block(&nested.block, v)).collect())
        },
        (BlockNestingMode::Map, Value::Object(obj)) => Value::Object(
            obj.iter()
                .map(|(k, v)| (k.clone(), normalize_block(&nested.block, v)))
                .collect(),
        ),
        _ => value.clone(),
    }
}

fn sorted(mut items: Vec<Value>) -> Value {
    items.sort_by_cached_key(Value::to_string);
    Value::Array(items)
}

fn path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

fn sorted_entries(value: &Value) -> Vec<(&String, &Value)> {
    let mut entries: Vec<_> = value
        .as_object()
        .map(|m| m.iter().collect())
        .unwrap_or_default();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, AttributeFlags};
    use std::collections::HashMap;
    use serde_json::json;

    fn user_schema() -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("username", Attribute::required_string().with_force_new())
            .with_attribute("full_name", Attribute::optional_string())
            .with_attribute("roles", Attribute::optional_string_set())
            .with_attribute(
                "enabled",
                Attribute::optional_bool().with_default(json!(true)),
            )
    }

    fn job_schema() -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("job_id", Attribute::required_string().with_force_new())
            .with_attribute("description", Attribute::optional_string())
            .with_attribute("job_version", Attribute::computed_string())
            .with_block(
                "analysis_config",
                NestedBlock::single(
                    Block::new().with_attribute("bucket_span", Attribute::optional_string()),
                )
                .with_force_new(),
            )
            .with_block(
                "model_plot_config",
                NestedBlock::single(
                    Block::new().with_attribute("enabled", Attribute::optional_bool()),
                ),
            )
    }

    #[test]
    fn test_plan_create_applies_defaults() {
        let result = plan(&user_schema(), None, &json!({"username": "jane", "full_name": null}));

        assert_eq!(result.planned_state["enabled"], json!(true));
        assert!(!result.requires_replace);
        let paths: Vec<_> = result.changes.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["enabled", "username"]);
    }

    #[test]
    fn test_plan_update_carries_computed() {
        let prior =
            json!({"id": "c1/jane", "username": "jane", "enabled": true, "full_name": null});
        let result = plan(
            &user_schema(),
            Some(&prior),
            &json!({"username": "jane", "full_name": "Jane Doe"}),
        );

        assert_eq!(result.planned_state["id"], json!("c1/jane"));
        assert!(!result.requires_replace);
        assert_eq!(result.changes.len(), 1);
        assert_eq!(result.changes[0].path, "full_name");
        assert!(result.changes[0].before.is_none());
    }

    #[test]
    fn test_plan_no_change() {
        let prior = json!({"id": "c1/jane", "username": "jane", "enabled": true});
        let result = plan(&user_schema(), Some(&prior), &json!({"username": "jane"}));
        assert!(result.changes.is_empty());
        assert!(!result.requires_replace);
    }

    #[test]
    fn test_set_order_is_not_a_change() {
        let prior =
            json!({"id": "c1/jane", "username": "jane", "enabled": true, "roles": ["a", "b"]});
        let result = plan(
            &user_schema(),
            Some(&prior),
            &json!({"username": "jane", "roles": ["b", "a"]}),
        );
        assert!(result.changes.is_empty());
    }

    #[test]
    fn test_force_new_attribute_requires_replace() {
        let prior = json!({"id": "c1/jane", "username": "jane", "enabled": true});
        let result = plan(&user_schema(), Some(&prior), &json!({"username": "john"}));
        assert!(result.requires_replace);
        assert_eq!(result.planned_state["id"], json!("c1/jane"));
    }

    #[test]
    fn test_force_new_block_clears_computed() {
        let prior = json!({
            "id": "c1/cpu",
            "job_id": "cpu",
            "job_version": "8.13.0",
            "analysis_config": {"bucket_span": "15m"}
        });
        let proposed = json!({"job_id": "cpu", "analysis_config": {"bucket_span": "1h"}});
        let result = plan(&job_schema(), Some(&prior), &proposed);

        assert!(result.requires_replace);
        assert_eq!(result.changes[0].path, "analysis_config.bucket_span");
        assert_eq!(result.planned_state["job_version"], Value::Null);
        assert_eq!(result.planned_state["id"], json!("c1/cpu"));
    }

    #[test]
    fn test_updatable_block_does_not_replace() {
        let prior = json!({
            "id": "c1/cpu",
            "job_id": "cpu",
            "job_version": "8.13.0",
            "analysis_config": {"bucket_span": "15m"},
            "model_plot_config": null
        });
        let proposed = json!({
            "job_id": "cpu",
            "analysis_config": {"bucket_span": "15m"},
            "model_plot_config": {"enabled": true}
        });
        let result = plan(&job_schema(), Some(&prior), &proposed);

        assert!(!result.requires_replace);
        assert_eq!(result.changes.len(), 1);
        assert_eq!(result.changes[0].path, "model_plot_config");
        assert_eq!(result.planned_state["job_version"], json!("8.13.0"));
    }

    #[test]
    fn test_plan_destroy() {
        let prior = json!({"id": "c1/jane", "username": "jane", "full_name": null});
        let result = plan(&user_schema(), Some(&prior), &Value::Null);

        assert!(result.planned_state.is_null());
        let paths: Vec<_> = result.changes.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["id", "username"]);
        assert!(result.changes.iter().all(|c| c.after.is_none()));
    }

    fn data_view_schema() -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "space_id",
                Attribute::optional_string()
                    .with_default(json!("default"))
                    .with_force_new(),
            )
            .with_block(
                "data_view",
                NestedBlock::single(
                    Block::new()
                        .with_attribute("title", Attribute::required_string())
                        .with_attribute(
                            "id",
                            Attribute::optional_computed_string().with_force_new(),
                        ),
                ),
            )
    }

    #[test]
    fn test_nested_computed_is_carried() {
        let prior = json!({
            "id": "default/dv-1",
            "space_id": "default",
            "data_view": {"title": "logs-*", "id": "dv-1"}
        });
        let proposed = json!({"data_view": {"title": "logs-*"}});
        let result = plan(&data_view_schema(), Some(&prior), &proposed);

        assert!(result.changes.is_empty());
        assert_eq!(result.planned_state["data_view"]["id"], json!("dv-1"));
    }

    #[test]
    fn test_nested_computed_cleared_on_replace() {
        let prior = json!({
            "id": "default/dv-1",
            "space_id": "default",
            "data_view": {"title": "logs-*", "id": "dv-1"}
        });
        let proposed = json!({"space_id": "ops", "data_view": {"title": "logs-*"}});
        let result = plan(&data_view_schema(), Some(&prior), &proposed);

        assert!(result.requires_replace);
        assert_eq!(result.planned_state["data_view"]["id"], Value::Null);
        assert_eq!(result.planned_state["id"], json!("default/dv-1"));
    }

    fn detector_job_schema() -> Schema {
        let detector = Block::new()
            .with_attribute("function", Attribute::required_string())
            .with_attribute("field_name", Attribute::optional_string())
            .with_attribute("use_null", Attribute::optional_bool());
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_block(
                "analysis_config",
                NestedBlock::single(
                    Block::new().with_block("detectors", NestedBlock::list(detector)),
                )
                .with_force_new(),
            )
    }

    #[test]
    fn test_unset_members_of_list_block_items_match_null() {
        let prior = json!({
            "id": "c1/cpu",
            "analysis_config": {
                "detectors": [{"function": "mean", "field_name": "cpu", "use_null": null}]
            }
        });
        let proposed = json!({
            "analysis_config": {"detectors": [{"function": "mean", "field_name": "cpu"}]}
        });
        let result = plan(&detector_job_schema(), Some(&prior), &proposed);

        assert!(result.changes.is_empty());
        assert!(!result.requires_replace);
    }

    #[test]
    fn test_changed_list_block_item_still_replaces() {
        let prior = json!({
            "id": "c1/cpu",
            "analysis_config": {
                "detectors": [{"function": "mean", "field_name": "cpu", "use_null": null}]
            }
        });
        let proposed = json!({
            "analysis_config": {"detectors": [{"function": "max", "field_name": "cpu"}]}
        });
        let result = plan(&detector_job_schema(), Some(&prior), &proposed);

        assert!(result.requires_replace);
        assert_eq!(result.changes[0].path, "analysis_config.detectors");
    }

    #[test]
    fn test_unset_object_members_in_map_match_null() {
        let label = AttributeType::object(HashMap::from([
            ("custom_label".to_string(), AttributeType::String),
            ("count".to_string(), AttributeType::Int64),
        ]));
        let schema = Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "field_attrs",
                Attribute::new(AttributeType::map(label), AttributeFlags::optional()),
            );
        let prior = json!({
            "id": "default/dv-1",
            "field_attrs": {"host": {"custom_label": "Host", "count": null}}
        });

        let proposed = json!({"field_attrs": {"host": {"custom_label": "Host"}}});
        let same = plan(&schema, Some(&prior), &proposed);
        assert!(same.changes.is_empty());

        let proposed = json!({"field_attrs": {"host": {"count": 3}}});
        let changed = plan(&schema, Some(&prior), &proposed);
        assert_eq!(changed.changes.len(), 1);
        assert_eq!(changed.changes[0].path, "field_attrs");
    }
}
