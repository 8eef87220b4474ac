//! `elasticstack_fleet_enrollment_tokens`: enrollment API keys, optionally for one policy.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::clients::fleet::{self, EnrollmentApiKey};
use crate::clients::ApiClient;
use crate::data_sources::DataSource;
use crate::error::ProviderError;
use crate::schema::{Attribute, AttributeFlags, AttributeType, Schema};
use crate::typeutils::{from_state, to_state};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TokensConfig {
    policy_id: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
struct TokenState {
    key_id: String,
    api_key: String,
    api_key_id: String,
    created_at: String,
    name: Option<String>,
    active: bool,
    policy_id: Option<String>,
}

impl From<EnrollmentApiKey> for TokenState {
    fn from(key: EnrollmentApiKey) -> Self {
        Self {
            key_id: key.id,
            api_key: key.api_key,
            api_key_id: key.api_key_id,
            created_at: key.created_at,
            name: key.name,
            active: key.active,
            policy_id: key.policy_id,
        }
    }
}

#[derive(Debug, Serialize)]
struct TokensState {
    id: String,
    policy_id: Option<String>,
    tokens: Vec<TokenState>,
}

pub struct FleetEnrollmentTokens;

#[async_trait]
impl DataSource for FleetEnrollmentTokens {
    fn type_name(&self) -> &'static str {
        "elasticstack_fleet_enrollment_tokens"
    }

    fn schema(&self) -> Schema {
        let token: HashMap<String, AttributeType> = [
            ("key_id", AttributeType::String),
            ("api_key", AttributeType::String),
            ("api_key_id", AttributeType::String),
            ("created_at", AttributeType::String),
            ("name", AttributeType::String),
            ("active", AttributeType::Bool),
            ("policy_id", AttributeType::String),
        ]
        .into_iter()
        .map(|(name, t)| (name.to_string(), t))
        .collect();

        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "policy_id",
                Attribute::optional_string().with_description("Only return tokens of this agent policy"),
            )
            .with_attribute(
                "tokens",
                Attribute::new(
                    AttributeType::list(AttributeType::object(token)),
                    AttributeFlags::computed().sensitive(),
                ),
            )
    }

    async fn read(&self, client: &ApiClient, config: Value) -> Result<Value, ProviderError> {
        let config: TokensConfig = match config {
            Value::Null => TokensConfig::default(),
            config => from_state(config)?,
        };
        let keys =
            fleet::list_enrollment_api_keys(client.fleet()?, config.policy_id.as_deref()).await?;
        debug!(count = keys.len(), policy_id = ?config.policy_id, "read enrollment tokens");

        to_state(&TokensState {
            id: config.policy_id.clone().unwrap_or_else(|| "all".to_string()),
            policy_id: config.policy_id,
            tokens: keys.into_iter().map(TokenState::from).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_token_state() {
        let key: EnrollmentApiKey = serde_json::from_value(json!({
            "id": "k1",
            "api_key_id": "ak1",
            "api_key": "c2VjcmV0",
            "name": "Default (k1)",
            "active": true,
            "policy_id": "p1",
            "created_at": "2024-01-01T00:00:00Z"
        }))
        .unwrap();

        let state = serde_json::to_value(TokenState::from(key)).unwrap();
        assert_eq!(state["key_id"], "k1");
        assert_eq!(state["api_key"], "c2VjcmV0");
        assert_eq!(state["policy_id"], "p1");
    }

    #[test]
    fn test_tokens_are_sensitive() {
        let schema = FleetEnrollmentTokens.schema();
        assert!(schema.block.attributes["tokens"].flags.sensitive);
        assert!(FleetEnrollmentTokens.validate(&json!({"policy_id": "p1"})).is_empty());
    }
}
