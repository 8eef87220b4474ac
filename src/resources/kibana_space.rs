//! `elasticstack_kibana_space`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::clients::kibana::{self, Space};
use crate::clients::ApiClient;
use crate::error::ProviderError;
use crate::resources::{state_id, Resource};
use crate::schema::{Attribute, Diagnostic, Schema};
use crate::typeutils::{adopt, from_state, list_or_null, non_empty, to_state};
use crate::validation::{self, check_one_of};

const TYPE_NAME: &str = "elasticstack_kibana_space";

const SOLUTIONS: &[&str] = &["security", "oblt", "es", "classic"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpaceState {
    pub id: Option<String>,
    pub space_id: String,
    pub name: String,
    pub description: Option<String>,
    pub disabled_features: Option<Vec<String>>,
    pub initials: Option<String>,
    pub color: Option<String>,
    pub image_url: Option<String>,
    pub solution: Option<String>,
}

impl SpaceState {
    fn to_request(&self) -> Space {
        Space {
            id: self.space_id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            disabled_features: self.disabled_features.clone().unwrap_or_default(),
            initials: self.initials.clone(),
            color: self.color.clone(),
            image_url: self.image_url.clone(),
            solution: self.solution.clone(),
        }
    }

    fn from_api(space: Space, prior: Option<&SpaceState>) -> Self {
        Self {
            id: Some(space.id.clone()),
            space_id: space.id,
            name: space.name,
            description: adopt(prior.map(|p| &p.description), non_empty(space.description)),
            disabled_features: list_or_null(
                prior.map(|p| &p.disabled_features),
                Some(space.disabled_features),
            ),
            initials: non_empty(space.initials),
            color: non_empty(space.color),
            image_url: adopt(prior.map(|p| &p.image_url), non_empty(space.image_url)),
            solution: non_empty(space.solution),
        }
    }
}

fn valid_space_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

fn valid_color(color: &str) -> bool {
    color.len() == 7
        && color.starts_with('#')
        && color[1..].chars().all(|c| c.is_ascii_hexdigit())
}

pub struct KibanaSpace;

#[async_trait]
impl Resource for KibanaSpace {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "space_id",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("URL identifier; lowercase letters, digits, _ and -"),
            )
            .with_attribute("name", Attribute::required_string())
            .with_attribute("description", Attribute::optional_string())
            .with_attribute(
                "disabled_features",
                Attribute::optional_string_set().with_description("Kibana features hidden in the space"),
            )
            .with_attribute(
                "initials",
                Attribute::optional_computed_string().with_description("One or two characters for the avatar"),
            )
            .with_attribute(
                "color",
                Attribute::optional_computed_string().with_description("Avatar color as #RRGGBB"),
            )
            .with_attribute(
                "image_url",
                Attribute::optional_string().with_description("Avatar image as a data:image URL"),
            )
            .with_attribute("solution", Attribute::optional_computed_string())
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        let mut diagnostics = validation::validate(&self.schema(), config);
        let string = |name: &str| config.get(name).and_then(Value::as_str);

        if let Some(id) = string("space_id") {
            if !valid_space_id(id) {
                diagnostics.push(
                    Diagnostic::error("Invalid space_id")
                        .with_detail("Only lowercase letters, digits, '_' and '-' are allowed")
                        .with_attribute("space_id"),
                );
            }
        }
        if let Some(initials) = string("initials") {
            if initials.chars().count() > 2 {
                diagnostics.push(
                    Diagnostic::error("Initials too long")
                        .with_detail("At most two characters are allowed")
                        .with_attribute("initials"),
                );
            }
        }
        if let Some(color) = string("color") {
            if !valid_color(color) {
                diagnostics.push(
                    Diagnostic::error("Invalid color")
                        .with_detail(format!("Expected a hex color like #aabbcc, got {:?}", color))
                        .with_attribute("color"),
                );
            }
        }
        if let Some(url) = string("image_url") {
            if !url.starts_with("data:image/") {
                diagnostics.push(
                    Diagnostic::error("Invalid image_url")
                        .with_detail("The image must be a data:image/... URL")
                        .with_attribute("image_url"),
                );
            }
        }
        diagnostics.extend(check_one_of(config, "solution", SOLUTIONS));

        diagnostics
    }

    async fn create(&self, client: &ApiClient, planned: Value) -> Result<Value, ProviderError> {
        let planned: SpaceState = from_state(planned)?;
        info!(space_id = %planned.space_id, "creating Kibana space");
        let space = kibana::create_space(client.kibana()?, &planned.to_request()).await?;
        to_state(&SpaceState::from_api(space, Some(&planned)))
    }

    async fn read(&self, client: &ApiClient, state: Value) -> Result<Option<Value>, ProviderError> {
        let state: SpaceState = from_state(state)?;
        let id = state_id(state.id.as_deref())?;
        match kibana::get_space(client.kibana()?, id).await? {
            Some(space) => to_state(&SpaceState::from_api(space, Some(&state))).map(Some),
            None => {
                debug!(space_id = id, "Kibana space is gone");
                Ok(None)
            },
        }
    }

    async fn update(
        &self,
        client: &ApiClient,
        _prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        let planned: SpaceState = from_state(planned)?;
        info!(space_id = %planned.space_id, "updating Kibana space");
        let space = kibana::update_space(client.kibana()?, &planned.to_request()).await?;
        to_state(&SpaceState::from_api(space, Some(&planned)))
    }

    async fn delete(&self, client: &ApiClient, state: Value) -> Result<(), ProviderError> {
        let state: SpaceState = from_state(state)?;
        let id = state_id(state.id.as_deref())?;
        info!(space_id = id, "deleting Kibana space");
        Ok(kibana::delete_space(client.kibana()?, id).await?)
    }

    async fn import(&self, client: &ApiClient, id: &str) -> Result<Option<Value>, ProviderError> {
        kibana::get_space(client.kibana()?, id)
            .await?
            .map(|space| to_state(&SpaceState::from_api(space, None)))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_and_response_mapping() {
        let planned: SpaceState = from_state(json!({
            "space_id": "ops",
            "name": "Operations",
            "description": null,
            "disabled_features": []
        }))
        .unwrap();

        let request = planned.to_request();
        assert_eq!(request.id, "ops");
        assert!(request.disabled_features.is_empty());

        let api = Space {
            description: Some(String::new()),
            initials: Some("OP".to_string()),
            color: Some("#aabbcc".to_string()),
            ..request
        };
        let state = SpaceState::from_api(api, Some(&planned));
        assert_eq!(state.id.as_deref(), Some("ops"));
        assert_eq!(state.description, None);
        assert_eq!(state.disabled_features, Some(vec![]));
        assert_eq!(state.initials.as_deref(), Some("OP"));
    }

    #[test]
    fn test_disabled_features_null_stays_null() {
        let planned: SpaceState =
            from_state(json!({"space_id": "ops", "name": "Operations"})).unwrap();
        let state = SpaceState::from_api(planned.to_request(), Some(&planned));
        assert_eq!(state.disabled_features, None);
    }

    #[test]
    fn test_validate() {
        let diagnostics = KibanaSpace.validate(&json!({
            "space_id": "Ops Team",
            "name": "Ops",
            "initials": "OPS",
            "color": "blue",
            "image_url": "https://example.com/a.png",
            "solution": "search"
        }));
        let attributes: Vec<_> = diagnostics
            .iter()
            .filter_map(|d| d.attribute.as_deref())
            .collect();
        assert_eq!(
            attributes,
            vec!["space_id", "initials", "color", "image_url", "solution"]
        );

        assert!(KibanaSpace
            .validate(&json!({"space_id": "ops_team-1", "name": "Ops", "color": "#A1B2C3"}))
            .is_empty());
    }
}
