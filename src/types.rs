//! Values the provider hands back to the server layer: plans, imports and metadata.

use serde_json::Value;

/// Protocol version announced in the handshake line.
pub const PROTOCOL_VERSION: u32 = 1;

/// First field of the handshake line.
pub const HANDSHAKE_PREFIX: &str = "HEMMER_PROVIDER";

/// One attribute that differs between prior and planned state.
///
/// `path` is dotted (`analysis_config.bucket_span`, `data_view.source_filters`).
/// `before` is `None` for an added attribute and `after` is `None` for a
/// removed one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeChange {
    pub path: String,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

impl AttributeChange {
    pub fn added(path: impl Into<String>, value: Value) -> Self {
        Self {
            path: path.into(),
            before: None,
            after: Some(value),
        }
    }

    pub fn removed(path: impl Into<String>, value: Value) -> Self {
        Self {
            path: path.into(),
            before: Some(value),
            after: None,
        }
    }

    pub fn modified(path: impl Into<String>, before: Value, after: Value) -> Self {
        Self {
            path: path.into(),
            before: Some(before),
            after: Some(after),
        }
    }
}

/// Absent sides travel as empty byte strings.
impl From<AttributeChange> for crate::generated::AttributeChange {
    fn from(change: AttributeChange) -> Self {
        let bytes = |side: Option<Value>| {
            side.and_then(|v| serde_json::to_vec(&v).ok())
                .unwrap_or_default()
        };
        Self {
            path: change.path,
            before: bytes(change.before),
            after: bytes(change.after),
        }
    }
}

/// Outcome of planning one resource.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanResult {
    pub planned_state: Value,
    pub changes: Vec<AttributeChange>,
    /// The object has to be destroyed and created again.
    pub requires_replace: bool,
}

impl PlanResult {
    /// Nothing to do; `state` is planned as-is.
    pub fn no_change(state: Value) -> Self {
        Self::with_changes(state, Vec::new(), false)
    }

    pub fn with_changes(
        planned_state: Value,
        changes: Vec<AttributeChange>,
        requires_replace: bool,
    ) -> Self {
        Self {
            planned_state,
            changes,
            requires_replace,
        }
    }
}

/// State produced by an import, tagged with its resource type.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedResource {
    pub resource_type: String,
    pub state: Value,
}

impl ImportedResource {
    pub fn new(resource_type: impl Into<String>, state: Value) -> Self {
        Self {
            resource_type: resource_type.into(),
            state,
        }
    }
}

/// Answer to `GetMetadata`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderMetadata {
    pub resources: Vec<String>,
    pub data_sources: Vec<String>,
    pub capabilities: ServerCapabilities,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerCapabilities {
    /// `Plan` accepts a null proposed state and reports the removals.
    pub plan_destroy: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_change_to_proto() {
        let proto: crate::generated::AttributeChange =
            AttributeChange::modified("analysis_config.bucket_span", json!("15m"), json!("1h"))
                .into();
        assert_eq!(proto.path, "analysis_config.bucket_span");
        assert_eq!(proto.before, br#""15m""#.to_vec());
        assert_eq!(proto.after, br#""1h""#.to_vec());
    }

    #[test]
    fn test_missing_sides_are_empty_bytes() {
        let proto: crate::generated::AttributeChange =
            AttributeChange::added("name", json!("Ops")).into();
        assert!(proto.before.is_empty());
        assert_eq!(proto.after, br#""Ops""#.to_vec());

        let proto: crate::generated::AttributeChange =
            AttributeChange::removed("description", json!("old")).into();
        assert!(proto.after.is_empty());
    }

    #[test]
    fn test_no_change_plan() {
        let plan = PlanResult::no_change(json!({"id": "ops"}));
        assert!(plan.changes.is_empty());
        assert!(!plan.requires_replace);
        assert_eq!(plan.planned_state["id"], "ops");
    }

    #[test]
    fn test_handshake_line() {
        assert_eq!(
            format!("{}|{}|127.0.0.1:50051", HANDSHAKE_PREFIX, PROTOCOL_VERSION),
            "HEMMER_PROVIDER|1|127.0.0.1:50051"
        );
    }
}
