//! `elasticstack_kibana_data_view`: a data view inside a Kibana space.
//!
//! The state id is `<space_id>/<data_view_id>`.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::clients::kibana::{
    self, DataView, DataViewUpdate, FieldAttr, FieldFormat, RuntimeField, RuntimeScript,
    SourceFilter,
};
use crate::clients::ApiClient;
use crate::composite_id::CompositeId;
use crate::error::ProviderError;
use crate::resources::{state_id, Resource};
use crate::schema::{Attribute, AttributeFlags, AttributeType, Block, Diagnostic, NestedBlock, Schema};
use crate::typeutils::{
    adopt, from_state, json_string, list_or_null, map_or_null, non_empty, parse_json_string,
    to_state,
};
use crate::validation::{self, check_one_of};

const TYPE_NAME: &str = "elasticstack_kibana_data_view";
const ID_FORMAT: &str = "<space_id>/<data_view_id>";

const DEFAULT_SPACE: &str = "default";

const RUNTIME_FIELD_TYPES: &[&str] = &[
    "boolean",
    "composite",
    "date",
    "double",
    "geo_point",
    "ip",
    "keyword",
    "long",
    "lookup",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataViewState {
    pub id: Option<String>,
    pub space_id: Option<String>,
    #[serde(rename = "override")]
    pub override_existing: Option<bool>,
    pub data_view: DataViewBlock,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataViewBlock {
    pub title: String,
    pub name: Option<String>,
    pub id: Option<String>,
    pub time_field_name: Option<String>,
    pub source_filters: Option<Vec<String>>,
    pub field_attrs: Option<BTreeMap<String, FieldAttrState>>,
    pub runtime_field_map: Option<BTreeMap<String, RuntimeFieldState>>,
    pub field_formats: Option<BTreeMap<String, FieldFormatState>>,
    pub allow_no_index: Option<bool>,
    pub namespaces: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldAttrState {
    pub custom_label: Option<String>,
    pub count: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeFieldState {
    #[serde(rename = "type")]
    pub field_type: String,
    pub script_source: String,
}

/// A field format; `params` is a JSON object string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldFormatState {
    pub id: String,
    pub params: Option<String>,
}

impl DataViewState {
    fn space_id(&self) -> &str {
        self.space_id.as_deref().unwrap_or(DEFAULT_SPACE)
    }
}

impl DataViewBlock {
    fn source_filters(&self) -> Option<Vec<SourceFilter>> {
        self.source_filters.as_ref().map(|filters| {
            filters
                .iter()
                .map(|value| SourceFilter {
                    value: value.clone(),
                })
                .collect()
        })
    }

    fn field_attrs(&self) -> Option<BTreeMap<String, FieldAttr>> {
        self.field_attrs.as_ref().map(|attrs| {
            attrs
                .iter()
                .map(|(name, attr)| {
                    (
                        name.clone(),
                        FieldAttr {
                            custom_label: attr.custom_label.clone(),
                            count: attr.count,
                        },
                    )
                })
                .collect()
        })
    }

    fn runtime_field_map(&self) -> Option<BTreeMap<String, RuntimeField>> {
        self.runtime_field_map.as_ref().map(|fields| {
            fields
                .iter()
                .map(|(name, field)| {
                    (
                        name.clone(),
                        RuntimeField {
                            field_type: field.field_type.clone(),
                            script: RuntimeScript {
                                source: field.script_source.clone(),
                            },
                        },
                    )
                })
                .collect()
        })
    }

    fn field_formats(&self) -> Result<Option<BTreeMap<String, FieldFormat>>, ProviderError> {
        let Some(formats) = &self.field_formats else {
            return Ok(None);
        };
        formats
            .iter()
            .map(|(name, format)| {
                let attribute = format!("data_view.field_formats.{}.params", name);
                Ok((
                    name.clone(),
                    FieldFormat {
                        id: format.id.clone(),
                        params: parse_json_string(&attribute, format.params.as_deref())?,
                    },
                ))
            })
            .collect::<Result<_, ProviderError>>()
            .map(Some)
    }

    fn to_request(&self) -> Result<DataView, ProviderError> {
        Ok(DataView {
            id: self.id.clone(),
            title: self.title.clone(),
            name: self.name.clone(),
            time_field_name: self.time_field_name.clone(),
            source_filters: self.source_filters(),
            field_attrs: self.field_attrs(),
            runtime_field_map: self.runtime_field_map(),
            field_formats: self.field_formats()?,
            allow_no_index: self.allow_no_index,
            namespaces: self.namespaces.clone(),
        })
    }

    fn to_update(&self) -> Result<DataViewUpdate, ProviderError> {
        Ok(DataViewUpdate {
            title: self.title.clone(),
            name: self.name.clone(),
            time_field_name: self.time_field_name.clone(),
            source_filters: self.source_filters().unwrap_or_default(),
            runtime_field_map: self.runtime_field_map().unwrap_or_default(),
            field_formats: self.field_formats()?.unwrap_or_default(),
            fields: self.field_attrs().unwrap_or_default(),
            allow_no_index: self.allow_no_index,
        })
    }
}

/// Map a data view returned by Kibana onto state.
fn data_view_state(
    space_id: &str,
    view: DataView,
    prior: Option<&DataViewState>,
) -> Result<DataViewState, ProviderError> {
    let view_id = view.id.clone().ok_or_else(|| {
        ProviderError::Validation(format!("Kibana returned data view {:?} without an id", view.title))
    })?;
    let block = prior.map(|p| &p.data_view);

    let prior_formats = block.and_then(|b| b.field_formats.as_ref());
    let field_formats = view
        .field_formats
        .map(|formats| {
            formats
                .into_iter()
                .map(|(name, format)| {
                    let prior_params = prior_formats.and_then(|m| m.get(&name)).map(|f| &f.params);
                    let params = json_string(prior_params, format.params.as_ref())?;
                    Ok((
                        name,
                        FieldFormatState {
                            id: format.id,
                            params,
                        },
                    ))
                })
                .collect::<Result<BTreeMap<_, _>, ProviderError>>()
        })
        .transpose()?;

    let field_attrs = view.field_attrs.map(|attrs| {
        attrs
            .into_iter()
            .map(|(name, attr)| {
                (
                    name,
                    FieldAttrState {
                        custom_label: attr.custom_label,
                        count: attr.count,
                    },
                )
            })
            .collect()
    });

    let runtime_field_map = view.runtime_field_map.map(|fields| {
        fields
            .into_iter()
            .map(|(name, field)| {
                (
                    name,
                    RuntimeFieldState {
                        field_type: field.field_type,
                        script_source: field.script.source,
                    },
                )
            })
            .collect()
    });

    Ok(DataViewState {
        id: Some(CompositeId::new(space_id, &view_id).to_string()),
        space_id: Some(space_id.to_string()),
        override_existing: prior.map_or(Some(false), |p| p.override_existing),
        data_view: DataViewBlock {
            title: view.title,
            name: adopt(block.map(|b| &b.name), non_empty(view.name)),
            id: Some(view_id),
            time_field_name: adopt(
                block.map(|b| &b.time_field_name),
                non_empty(view.time_field_name),
            ),
            source_filters: list_or_null(
                block.map(|b| &b.source_filters),
                view.source_filters
                    .map(|filters| filters.into_iter().map(|f| f.value).collect()),
            ),
            field_attrs: map_or_null(block.map(|b| &b.field_attrs), field_attrs),
            runtime_field_map: map_or_null(block.map(|b| &b.runtime_field_map), runtime_field_map),
            field_formats: map_or_null(block.map(|b| &b.field_formats), field_formats),
            allow_no_index: adopt(block.map(|b| &b.allow_no_index), view.allow_no_index),
            namespaces: view.namespaces,
        },
    })
}

fn object(members: &[(&str, AttributeType)]) -> AttributeType {
    AttributeType::object(
        members
            .iter()
            .map(|(name, t)| (name.to_string(), t.clone()))
            .collect::<HashMap<_, _>>(),
    )
}

pub struct KibanaDataView;

impl KibanaDataView {
    async fn refresh(
        &self,
        client: &ApiClient,
        id: &CompositeId,
        prior: Option<&DataViewState>,
    ) -> Result<Option<Value>, ProviderError> {
        let view = kibana::get_data_view(client.kibana()?, &id.scope, &id.resource_id).await?;
        match view {
            Some(view) => to_state(&data_view_state(&id.scope, view, prior)?).map(Some),
            None => {
                debug!(space_id = %id.scope, data_view_id = %id.resource_id, "data view is gone");
                Ok(None)
            },
        }
    }
}

#[async_trait]
impl Resource for KibanaDataView {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
        let data_view = Block::new()
            .with_attribute("title", Attribute::required_string().with_description("Index pattern"))
            .with_attribute("name", Attribute::optional_string())
            .with_attribute("id", Attribute::optional_computed_string().with_force_new())
            .with_attribute("time_field_name", Attribute::optional_string())
            .with_attribute("source_filters", Attribute::optional_string_list())
            .with_attribute(
                "field_attrs",
                Attribute::new(
                    AttributeType::map(object(&[
                        ("custom_label", AttributeType::String),
                        ("count", AttributeType::Int64),
                    ])),
                    AttributeFlags::optional(),
                ),
            )
            .with_attribute(
                "runtime_field_map",
                Attribute::new(
                    AttributeType::map(object(&[
                        ("type", AttributeType::String),
                        ("script_source", AttributeType::String),
                    ])),
                    AttributeFlags::optional(),
                ),
            )
            .with_attribute(
                "field_formats",
                Attribute::new(
                    AttributeType::map(object(&[
                        ("id", AttributeType::String),
                        ("params", AttributeType::String),
                    ])),
                    AttributeFlags::optional(),
                ),
            )
            .with_attribute("allow_no_index", Attribute::optional_bool())
            .with_attribute(
                "namespaces",
                Attribute::new(
                    AttributeType::list(AttributeType::String),
                    AttributeFlags::optional_computed(),
                )
                .with_force_new(),
            );

        Schema::v0()
            .with_attribute(
                "id",
                Attribute::computed_string().with_description(ID_FORMAT),
            )
            .with_attribute(
                "space_id",
                Attribute::optional_string()
                    .with_default(json!(DEFAULT_SPACE))
                    .with_force_new(),
            )
            .with_attribute(
                "override",
                Attribute::optional_bool()
                    .with_default(json!(false))
                    .with_description("Overwrite a data view with the same title on create"),
            )
            .with_block("data_view", NestedBlock::single(data_view).with_min_items(1))
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        let mut diagnostics = validation::validate(&self.schema(), config);

        if let Some(fields) = config
            .pointer("/data_view/runtime_field_map")
            .and_then(Value::as_object)
        {
            for (name, field) in fields {
                if let Some(diag) = check_one_of(field, "type", RUNTIME_FIELD_TYPES) {
                    diagnostics.push(
                        diag.with_attribute(format!("data_view.runtime_field_map.{}.type", name)),
                    );
                }
            }
        }

        if let Some(formats) = config
            .pointer("/data_view/field_formats")
            .and_then(Value::as_object)
        {
            for (name, format) in formats {
                let attribute = format!("data_view.field_formats.{}.params", name);
                if let Err(err) =
                    parse_json_string(&attribute, format.get("params").and_then(Value::as_str))
                {
                    diagnostics.push(err.to_diagnostic().with_attribute(attribute));
                }
            }
        }

        diagnostics
    }

    async fn create(&self, client: &ApiClient, planned: Value) -> Result<Value, ProviderError> {
        let planned: DataViewState = from_state(planned)?;
        let space_id = planned.space_id();
        info!(space_id, title = %planned.data_view.title, "creating data view");

        let view = kibana::create_data_view(
            client.kibana()?,
            space_id,
            &planned.data_view.to_request()?,
            planned.override_existing.unwrap_or(false),
        )
        .await?;
        to_state(&data_view_state(space_id, view, Some(&planned))?)
    }

    async fn read(&self, client: &ApiClient, state: Value) -> Result<Option<Value>, ProviderError> {
        let state: DataViewState = from_state(state)?;
        let id = CompositeId::parse(state_id(state.id.as_deref())?, ID_FORMAT)?;
        self.refresh(client, &id, Some(&state)).await
    }

    async fn update(
        &self,
        client: &ApiClient,
        prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        let prior: DataViewState = from_state(prior)?;
        let planned: DataViewState = from_state(planned)?;
        let id = CompositeId::parse(state_id(prior.id.as_deref())?, ID_FORMAT)?;
        info!(space_id = %id.scope, data_view_id = %id.resource_id, "updating data view");

        let view = kibana::update_data_view(
            client.kibana()?,
            &id.scope,
            &id.resource_id,
            &planned.data_view.to_update()?,
        )
        .await?;
        to_state(&data_view_state(&id.scope, view, Some(&planned))?)
    }

    async fn delete(&self, client: &ApiClient, state: Value) -> Result<(), ProviderError> {
        let state: DataViewState = from_state(state)?;
        let id = CompositeId::parse(state_id(state.id.as_deref())?, ID_FORMAT)?;
        info!(space_id = %id.scope, data_view_id = %id.resource_id, "deleting data view");
        Ok(kibana::delete_data_view(client.kibana()?, &id.scope, &id.resource_id).await?)
    }

    async fn import(&self, client: &ApiClient, id: &str) -> Result<Option<Value>, ProviderError> {
        let id = CompositeId::parse(id, ID_FORMAT)?;
        self.refresh(client, &id, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planned() -> DataViewState {
        from_state(json!({
            "space_id": "ops",
            "override": false,
            "data_view": {
                "title": "logs-*",
                "time_field_name": "@timestamp",
                "source_filters": [],
                "runtime_field_map": {
                    "host_upper": {"type": "keyword", "script_source": "emit(doc['host'].value)"}
                },
                "field_formats": {
                    "bytes": {"id": "bytes", "params": "{ \"pattern\": \"0.0b\" }"}
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_request_body() {
        let request = planned().data_view.to_request().unwrap();
        let body = serde_json::to_value(&request).unwrap();

        assert_eq!(body["title"], "logs-*");
        assert_eq!(body["sourceFilters"], json!([]));
        assert_eq!(
            body["runtimeFieldMap"]["host_upper"]["script"]["source"],
            "emit(doc['host'].value)"
        );
        assert_eq!(body["fieldFormats"]["bytes"]["params"], json!({"pattern": "0.0b"}));
        assert!(body.get("fieldAttrs").is_none());
    }

    #[test]
    fn test_update_body_defaults_collections() {
        let mut planned = planned();
        planned.data_view.source_filters = None;
        let update = planned.data_view.to_update().unwrap();
        let body = serde_json::to_value(&update).unwrap();

        assert_eq!(body["sourceFilters"], json!([]));
        assert_eq!(body["fields"], json!({}));
        assert_eq!(body["timeFieldName"], "@timestamp");
    }

    #[test]
    fn test_state_from_api() {
        let planned = planned();
        let api: DataView = serde_json::from_value(json!({
            "id": "dv-1",
            "title": "logs-*",
            "name": "",
            "timeFieldName": "@timestamp",
            "sourceFilters": [],
            "fieldAttrs": {},
            "runtimeFieldMap": {
                "host_upper": {"type": "keyword", "script": {"source": "emit(doc['host'].value)"}}
            },
            "fieldFormats": {"bytes": {"id": "bytes", "params": {"pattern": "0.0b"}}},
            "allowNoIndex": false,
            "namespaces": ["ops"]
        }))
        .unwrap();

        let state = data_view_state("ops", api, Some(&planned)).unwrap();
        assert_eq!(state.id.as_deref(), Some("ops/dv-1"));
        assert_eq!(state.data_view.id.as_deref(), Some("dv-1"));
        assert_eq!(state.data_view.name, None);
        assert_eq!(state.data_view.source_filters, Some(vec![]));
        assert_eq!(state.data_view.field_attrs, None);
        assert_eq!(state.data_view.allow_no_index, None);
        assert_eq!(
            state.data_view.field_formats.unwrap()["bytes"].params.as_deref(),
            Some("{ \"pattern\": \"0.0b\" }")
        );
        assert_eq!(state.data_view.namespaces, Some(vec!["ops".to_string()]));
    }

    #[test]
    fn test_state_requires_id() {
        let api = DataView {
            title: "logs-*".to_string(),
            ..Default::default()
        };
        assert!(data_view_state("default", api, None).is_err());
    }

    #[test]
    fn test_validate_runtime_type_and_params() {
        let diagnostics = KibanaDataView.validate(&json!({
            "data_view": {
                "title": "logs-*",
                "runtime_field_map": {"x": {"type": "text", "script_source": "emit(1)"}},
                "field_formats": {"bytes": {"id": "bytes", "params": "{oops"}}
            }
        }));
        let attributes: Vec<_> = diagnostics
            .iter()
            .filter_map(|d| d.attribute.as_deref())
            .collect();
        assert!(attributes.contains(&"data_view.runtime_field_map.x.type"));
        assert!(attributes.contains(&"data_view.field_formats.bytes.params"));

        assert!(KibanaDataView
            .validate(&json!({"data_view": {"title": "logs-*"}}))
            .is_empty());
    }
}
