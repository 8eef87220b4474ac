//! Kibana REST endpoints: spaces and data views.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::http::space_segments;
use super::{HttpApi, Result};

// ---------------------------------------------------------------------------
// Spaces
// ---------------------------------------------------------------------------

/// A Kibana space, as sent and as returned.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Space {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub disabled_features: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initials: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solution: Option<String>,
}

pub async fn create_space(api: &HttpApi, space: &Space) -> Result<Space> {
    api.post(&["api", "spaces", "space"], space).await
}

/// Fetch a space; `None` when it does not exist.
pub async fn get_space(api: &HttpApi, id: &str) -> Result<Option<Space>> {
    api.get_optional(&["api", "spaces", "space", id]).await
}

pub async fn update_space(api: &HttpApi, space: &Space) -> Result<Space> {
    api.put(&["api", "spaces", "space", space.id.as_str()], space)
        .await
}

pub async fn delete_space(api: &HttpApi, id: &str) -> Result<()> {
    api.delete(&["api", "spaces", "space", id], &[]).await
}

// ---------------------------------------------------------------------------
// Data views
// ---------------------------------------------------------------------------

/// A data view as returned by Kibana and sent on create.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_field_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_filters: Option<Vec<SourceFilter>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_attrs: Option<BTreeMap<String, FieldAttr>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_field_map: Option<BTreeMap<String, RuntimeField>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_formats: Option<BTreeMap<String, FieldFormat>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_no_index: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespaces: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SourceFilter {
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FieldAttr {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RuntimeField {
    #[serde(rename = "type")]
    pub field_type: String,
    pub script: RuntimeScript,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RuntimeScript {
    pub source: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FieldFormat {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// The fields Kibana accepts when updating a data view.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataViewUpdate {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub time_field_name: Option<String>,
    pub source_filters: Vec<SourceFilter>,
    pub runtime_field_map: BTreeMap<String, RuntimeField>,
    pub field_formats: BTreeMap<String, FieldFormat>,
    /// Field attributes (custom labels, popularity); named `fieldAttrs` on read.
    pub fields: BTreeMap<String, FieldAttr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_no_index: Option<bool>,
}

#[derive(Debug, Serialize)]
struct CreateDataView<'a> {
    data_view: &'a DataView,
    #[serde(rename = "override")]
    override_existing: bool,
}

#[derive(Debug, Serialize)]
struct UpdateDataView<'a> {
    data_view: &'a DataViewUpdate,
}

#[derive(Debug, Deserialize)]
struct DataViewEnvelope {
    data_view: DataView,
}

pub async fn create_data_view(
    api: &HttpApi,
    space_id: &str,
    data_view: &DataView,
    override_existing: bool,
) -> Result<DataView> {
    let body = CreateDataView {
        data_view,
        override_existing,
    };
    let envelope: DataViewEnvelope = api
        .post(&space_segments(space_id, &["data_views", "data_view"]), &body)
        .await?;
    Ok(envelope.data_view)
}

/// Fetch a data view; `None` when it does not exist.
pub async fn get_data_view(api: &HttpApi, space_id: &str, id: &str) -> Result<Option<DataView>> {
    let envelope: Option<DataViewEnvelope> = api
        .get_optional(&space_segments(space_id, &["data_views", "data_view", id]))
        .await?;
    Ok(envelope.map(|e| e.data_view))
}

pub async fn update_data_view(
    api: &HttpApi,
    space_id: &str,
    id: &str,
    update: &DataViewUpdate,
) -> Result<DataView> {
    let envelope: DataViewEnvelope = api
        .post(
            &space_segments(space_id, &["data_views", "data_view", id]),
            &UpdateDataView { data_view: update },
        )
        .await?;
    Ok(envelope.data_view)
}

pub async fn delete_data_view(api: &HttpApi, space_id: &str, id: &str) -> Result<()> {
    api.delete(&space_segments(space_id, &["data_views", "data_view", id]), &[])
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_space_uses_camel_case() {
        let space = Space {
            id: "ops".to_string(),
            name: "Operations".to_string(),
            disabled_features: vec!["dev_tools".to_string()],
            image_url: Some("data:image/png;base64,AAAA".to_string()),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&space).unwrap(),
            json!({
                "id": "ops",
                "name": "Operations",
                "disabledFeatures": ["dev_tools"],
                "imageUrl": "data:image/png;base64,AAAA"
            })
        );
    }

    #[test]
    fn test_create_data_view_body() {
        let view = DataView {
            title: "logs-*".to_string(),
            time_field_name: Some("@timestamp".to_string()),
            ..Default::default()
        };
        let body = CreateDataView {
            data_view: &view,
            override_existing: true,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({
                "data_view": {"title": "logs-*", "timeFieldName": "@timestamp"},
                "override": true
            })
        );
    }

    #[test]
    fn test_decode_data_view_with_runtime_fields() {
        let envelope: DataViewEnvelope = serde_json::from_value(json!({
            "data_view": {
                "id": "abc",
                "title": "logs-*",
                "runtimeFieldMap": {
                    "host_upper": {"type": "keyword", "script": {"source": "emit('x')"}}
                },
                "fieldFormats": {"bytes": {"id": "bytes"}},
                "namespaces": ["default"]
            }
        }))
        .unwrap();

        let view = envelope.data_view;
        assert_eq!(view.id.as_deref(), Some("abc"));
        let runtime = view.runtime_field_map.unwrap();
        assert_eq!(runtime["host_upper"].field_type, "keyword");
        assert_eq!(view.field_formats.unwrap()["bytes"].params, None);
    }
}
