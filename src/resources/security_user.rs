//! `elasticstack_elasticsearch_security_user`: a native realm user.

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::clients::elasticsearch::{self, PutUser};
use crate::clients::ApiClient;
use crate::composite_id::CompositeId;
use crate::error::ProviderError;
use crate::resources::{state_id, written, Resource};
use crate::schema::{Attribute, AttributeFlags, AttributeType, Diagnostic, Schema};
use crate::typeutils::{
    adopt, from_state, json_string, list_or_null, non_empty, parse_json_string, to_state,
    write_only,
};
use crate::validation;

const TYPE_NAME: &str = "elasticstack_elasticsearch_security_user";
const ID_FORMAT: &str = "<cluster_uuid>/<username>";

/// State of a security user.
///
/// `password` and `password_hash` are never returned by Elasticsearch and
/// are carried over from prior state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserState {
    pub id: Option<String>,
    pub username: String,
    pub password: Option<String>,
    pub password_hash: Option<String>,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub roles: Option<Vec<String>>,
    pub metadata: Option<String>,
    pub enabled: Option<bool>,
}

impl UserState {
    fn to_request(&self) -> Result<PutUser, ProviderError> {
        Ok(PutUser {
            password: self.password.clone(),
            password_hash: self.password_hash.clone(),
            roles: self.roles.clone().unwrap_or_default(),
            full_name: self.full_name.clone(),
            email: self.email.clone(),
            metadata: parse_json_string("metadata", self.metadata.as_deref())?,
            enabled: self.enabled.unwrap_or(true),
        })
    }
}

pub struct SecurityUser;

impl SecurityUser {
    async fn refresh(
        &self,
        client: &ApiClient,
        id: &CompositeId,
        prior: Option<&UserState>,
    ) -> Result<Option<UserState>, ProviderError> {
        let api = client.elasticsearch()?;
        let Some(user) = elasticsearch::get_user(api, &id.resource_id).await? else {
            debug!(username = %id.resource_id, "security user is gone");
            return Ok(None);
        };

        Ok(Some(UserState {
            id: Some(id.to_string()),
            username: user.username,
            password: write_only(None, prior.map(|p| &p.password)),
            password_hash: write_only(None, prior.map(|p| &p.password_hash)),
            full_name: adopt(prior.map(|p| &p.full_name), non_empty(user.full_name)),
            email: adopt(prior.map(|p| &p.email), non_empty(user.email)),
            roles: list_or_null(prior.map(|p| &p.roles), Some(user.roles)),
            metadata: json_string(prior.map(|p| &p.metadata), user.metadata.as_ref())?,
            enabled: Some(user.enabled),
        }))
    }
}

#[async_trait]
impl Resource for SecurityUser {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_attribute(
                "id",
                Attribute::computed_string().with_description(ID_FORMAT),
            )
            .with_attribute(
                "username",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("Login name of the user"),
            )
            .with_attribute(
                "password",
                Attribute::optional_string()
                    .sensitive()
                    .with_description("Password; at least 6 characters"),
            )
            .with_attribute(
                "password_hash",
                Attribute::optional_string()
                    .sensitive()
                    .with_description("Pre-hashed password, instead of password"),
            )
            .with_attribute("full_name", Attribute::optional_string())
            .with_attribute("email", Attribute::optional_string())
            .with_attribute(
                "roles",
                Attribute::new(
                    AttributeType::set(AttributeType::String),
                    AttributeFlags::required(),
                ),
            )
            .with_attribute(
                "metadata",
                Attribute::optional_computed_string()
                    .with_description("Arbitrary metadata as a JSON object string"),
            )
            .with_attribute(
                "enabled",
                Attribute::optional_bool().with_default(json!(true)),
            )
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        let mut diagnostics = validation::validate(&self.schema(), config);

        let set = |name: &str| config.get(name).map_or(false, |v| !v.is_null());
        if set("password") && set("password_hash") {
            diagnostics.push(
                Diagnostic::error("Conflicting attributes")
                    .with_detail("Only one of password and password_hash can be set")
                    .with_attribute("password_hash"),
            );
        }
        if let Some(password) = config.get("password").and_then(Value::as_str) {
            if password.chars().count() < 6 {
                diagnostics.push(
                    Diagnostic::error("Password too short")
                        .with_detail("Passwords must be at least 6 characters long")
                        .with_attribute("password"),
                );
            }
        }
        if let Err(err) = parse_json_string("metadata", config.get("metadata").and_then(Value::as_str)) {
            diagnostics.push(err.to_diagnostic().with_attribute("metadata"));
        }

        diagnostics
    }

    async fn create(&self, client: &ApiClient, planned: Value) -> Result<Value, ProviderError> {
        let planned: UserState = from_state(planned)?;
        let api = client.elasticsearch()?;
        let id = CompositeId::new(client.cluster_uuid().await?, &planned.username);

        info!(username = %planned.username, "creating security user");
        elasticsearch::put_user(api, &planned.username, &planned.to_request()?).await?;

        let state = self.refresh(client, &id, Some(&planned)).await?;
        to_state(&written(TYPE_NAME, &id.to_string(), state)?)
    }

    async fn read(&self, client: &ApiClient, state: Value) -> Result<Option<Value>, ProviderError> {
        let state: UserState = from_state(state)?;
        let id = CompositeId::parse(state_id(state.id.as_deref())?, ID_FORMAT)?;
        self.refresh(client, &id, Some(&state))
            .await?
            .map(|s| to_state(&s))
            .transpose()
    }

    async fn update(
        &self,
        client: &ApiClient,
        prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        let prior: UserState = from_state(prior)?;
        let planned: UserState = from_state(planned)?;
        let api = client.elasticsearch()?;
        let id = CompositeId::parse(state_id(prior.id.as_deref())?, ID_FORMAT)?;

        let mut request = planned.to_request()?;
        request.password = None;
        if planned.password_hash == prior.password_hash {
            request.password_hash = None;
        }

        info!(username = %id.resource_id, "updating security user");
        elasticsearch::put_user(api, &id.resource_id, &request).await?;

        if planned.password != prior.password {
            if let Some(password) = &planned.password {
                debug!(username = %id.resource_id, "changing password");
                let password = SecretString::new(password.as_str().into());
                elasticsearch::change_password(api, &id.resource_id, &password).await?;
            }
        }

        let state = self.refresh(client, &id, Some(&planned)).await?;
        to_state(&written(TYPE_NAME, &id.to_string(), state)?)
    }

    async fn delete(&self, client: &ApiClient, state: Value) -> Result<(), ProviderError> {
        let state: UserState = from_state(state)?;
        let id = CompositeId::parse(state_id(state.id.as_deref())?, ID_FORMAT)?;
        info!(username = %id.resource_id, "deleting security user");
        Ok(elasticsearch::delete_user(client.elasticsearch()?, &id.resource_id).await?)
    }

    async fn import(&self, client: &ApiClient, id: &str) -> Result<Option<Value>, ProviderError> {
        let id = CompositeId::parse(id, ID_FORMAT)?;
        self.refresh(client, &id, None)
            .await?
            .map(|s| to_state(&s))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::validate;

    #[test]
    fn test_request_defaults() {
        let state: UserState = from_state(json!({"username": "jane", "roles": null})).unwrap();
        let request = state.to_request().unwrap();
        assert!(request.roles.is_empty());
        assert!(request.enabled);
        assert!(request.metadata.is_none());
    }

    #[test]
    fn test_request_decodes_metadata() {
        let state: UserState = from_state(json!({
            "username": "jane",
            "roles": ["viewer"],
            "metadata": "{\"team\":\"ops\"}",
            "enabled": false
        }))
        .unwrap();
        let request = state.to_request().unwrap();
        assert_eq!(request.metadata, Some(json!({"team": "ops"})));
        assert!(!request.enabled);
    }

    #[test]
    fn test_schema_marks_secrets() {
        let schema = SecurityUser.schema();
        assert!(schema.block.attributes["password"].flags.sensitive);
        assert!(schema.block.attributes["password_hash"].flags.sensitive);
        assert!(schema.block.attributes["username"].force_new);
        assert!(validate(&schema, &json!({"username": "jane", "roles": []})).is_empty());
    }

    #[test]
    fn test_validate_rejects_conflicts_and_bad_metadata() {
        let diagnostics = SecurityUser.validate(&json!({
            "username": "jane",
            "roles": ["viewer"],
            "password": "abc",
            "password_hash": "$2a$10$...",
            "metadata": "{not json"
        }));
        let attributes: Vec<_> = diagnostics
            .iter()
            .filter_map(|d| d.attribute.as_deref())
            .collect();
        assert!(attributes.contains(&"password_hash"));
        assert!(attributes.contains(&"password"));
        assert!(attributes.contains(&"metadata"));
    }

    #[test]
    fn test_state_serializes_nulls() {
        let value = to_state(&UserState {
            username: "jane".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert!(value.get("full_name").unwrap().is_null());
    }
}
