//! `elasticstack_fleet_output`: where Elastic Agents ship their data.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::clients::fleet::{self, Output, OutputSsl};
use crate::clients::ApiClient;
use crate::error::ProviderError;
use crate::resources::{state_id, Resource};
use crate::schema::{Attribute, Block, Diagnostic, NestedBlock, Schema};
use crate::typeutils::{adopt, from_state, list_or_null, non_empty, to_state, write_only};
use crate::validation::{self, check_one_of};

const TYPE_NAME: &str = "elasticstack_fleet_output";

const OUTPUT_TYPES: &[&str] = &["elasticsearch", "logstash"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputState {
    pub id: Option<String>,
    pub output_id: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub output_type: String,
    pub hosts: Option<Vec<String>>,
    pub ca_sha256: Option<String>,
    pub ca_trusted_fingerprint: Option<String>,
    pub default_integrations: Option<bool>,
    pub default_monitoring: Option<bool>,
    pub config_yaml: Option<String>,
    pub ssl: Option<SslState>,
}

/// TLS settings. `key` is write-only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SslState {
    pub certificate_authorities: Option<Vec<String>>,
    pub certificate: Option<String>,
    pub key: Option<String>,
}

impl OutputState {
    fn to_request(&self) -> Output {
        Output {
            id: self.output_id.clone(),
            name: self.name.clone(),
            output_type: self.output_type.clone(),
            hosts: self.hosts.clone(),
            ca_sha256: self.ca_sha256.clone(),
            ca_trusted_fingerprint: self.ca_trusted_fingerprint.clone(),
            is_default: self.default_integrations.unwrap_or(false),
            is_default_monitoring: self.default_monitoring.unwrap_or(false),
            config_yaml: self.config_yaml.clone(),
            ssl: self.ssl.as_ref().map(|ssl| OutputSsl {
                certificate_authorities: ssl.certificate_authorities.clone(),
                certificate: ssl.certificate.clone(),
                key: ssl.key.clone(),
            }),
        }
    }

    fn from_api(output: Output, prior: Option<&OutputState>) -> Result<Self, ProviderError> {
        let output_id = output.id.clone().ok_or_else(|| {
            ProviderError::Validation(format!("Fleet returned output {:?} without an id", output.name))
        })?;

        let ssl = match prior.map(|p| &p.ssl) {
            Some(None) => None,
            block => {
                let prior = block.and_then(Option::as_ref);
                let api = output.ssl.unwrap_or_default();
                let ssl = SslState {
                    certificate_authorities: list_or_null(
                        prior.map(|p| &p.certificate_authorities),
                        api.certificate_authorities,
                    ),
                    certificate: adopt(prior.map(|p| &p.certificate), non_empty(api.certificate)),
                    key: write_only(non_empty(api.key), prior.map(|p| &p.key)),
                };
                (ssl != SslState::default()).then_some(ssl)
            },
        };

        Ok(Self {
            id: Some(output_id.clone()),
            output_id: Some(output_id),
            name: output.name,
            output_type: output.output_type,
            hosts: list_or_null(prior.map(|p| &p.hosts), output.hosts),
            ca_sha256: adopt(prior.map(|p| &p.ca_sha256), non_empty(output.ca_sha256)),
            ca_trusted_fingerprint: adopt(
                prior.map(|p| &p.ca_trusted_fingerprint),
                non_empty(output.ca_trusted_fingerprint),
            ),
            default_integrations: Some(output.is_default),
            default_monitoring: Some(output.is_default_monitoring),
            config_yaml: adopt(prior.map(|p| &p.config_yaml), non_empty(output.config_yaml)),
            ssl,
        })
    }
}

pub struct FleetOutput;

#[async_trait]
impl Resource for FleetOutput {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "output_id",
                Attribute::optional_computed_string().with_force_new(),
            )
            .with_attribute("name", Attribute::required_string())
            .with_attribute(
                "type",
                Attribute::required_string().with_description("elasticsearch or logstash"),
            )
            .with_attribute("hosts", Attribute::optional_string_list())
            .with_attribute("ca_sha256", Attribute::optional_string())
            .with_attribute("ca_trusted_fingerprint", Attribute::optional_string())
            .with_attribute(
                "default_integrations",
                Attribute::optional_computed_bool()
                    .with_description("Use this output for agent integrations by default"),
            )
            .with_attribute(
                "default_monitoring",
                Attribute::optional_computed_bool()
                    .with_description("Use this output for agent monitoring by default"),
            )
            .with_attribute(
                "config_yaml",
                Attribute::optional_string()
                    .sensitive()
                    .with_description("Advanced YAML settings passed to the agent"),
            )
            .with_block(
                "ssl",
                NestedBlock::single(
                    Block::new()
                        .with_attribute("certificate_authorities", Attribute::optional_string_list())
                        .with_attribute("certificate", Attribute::optional_string())
                        .with_attribute("key", Attribute::optional_string().sensitive()),
                ),
            )
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        let mut diagnostics = validation::validate(&self.schema(), config);
        diagnostics.extend(check_one_of(config, "type", OUTPUT_TYPES));

        if config.get("type").and_then(Value::as_str) == Some("elasticsearch") {
            let hosts = config.get("hosts").and_then(Value::as_array);
            for (i, host) in hosts.into_iter().flatten().enumerate() {
                let Some(host) = host.as_str() else { continue };
                let http = url::Url::parse(host)
                    .map_or(false, |url| matches!(url.scheme(), "http" | "https"));
                if !http {
                    diagnostics.push(
                        Diagnostic::error("Invalid host")
                            .with_detail(format!("{:?} is not an http(s) URL", host))
                            .with_attribute(format!("hosts.{}", i)),
                    );
                }
            }
        }

        diagnostics
    }

    async fn create(&self, client: &ApiClient, planned: Value) -> Result<Value, ProviderError> {
        let planned: OutputState = from_state(planned)?;
        info!(name = %planned.name, output_type = %planned.output_type, "creating Fleet output");
        let output = fleet::create_output(client.fleet()?, &planned.to_request()).await?;
        to_state(&OutputState::from_api(output, Some(&planned))?)
    }

    async fn read(&self, client: &ApiClient, state: Value) -> Result<Option<Value>, ProviderError> {
        let state: OutputState = from_state(state)?;
        let id = state_id(state.id.as_deref())?;
        match fleet::get_output(client.fleet()?, id).await? {
            Some(output) => to_state(&OutputState::from_api(output, Some(&state))?).map(Some),
            None => {
                debug!(output_id = id, "Fleet output is gone");
                Ok(None)
            },
        }
    }

    async fn update(
        &self,
        client: &ApiClient,
        prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        let prior: OutputState = from_state(prior)?;
        let planned: OutputState = from_state(planned)?;
        let id = state_id(prior.id.as_deref())?;
        info!(output_id = id, "updating Fleet output");

        let mut request = planned.to_request();
        request.id = None;
        let output = fleet::update_output(client.fleet()?, id, &request).await?;
        to_state(&OutputState::from_api(output, Some(&planned))?)
    }

    async fn delete(&self, client: &ApiClient, state: Value) -> Result<(), ProviderError> {
        let state: OutputState = from_state(state)?;
        let id = state_id(state.id.as_deref())?;
        info!(output_id = id, "deleting Fleet output");
        Ok(fleet::delete_output(client.fleet()?, id).await?)
    }

    async fn import(&self, client: &ApiClient, id: &str) -> Result<Option<Value>, ProviderError> {
        fleet::get_output(client.fleet()?, id)
            .await?
            .map(|output| OutputState::from_api(output, None).and_then(|s| to_state(&s)))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn planned() -> OutputState {
        from_state(json!({
            "output_id": "es-out",
            "name": "Primary",
            "type": "elasticsearch",
            "hosts": ["https://es:9200"],
            "default_integrations": true,
            "ssl": {"certificate": "CERT", "key": "KEY"}
        }))
        .unwrap()
    }

    #[test]
    fn test_request_body() {
        let body = serde_json::to_value(planned().to_request()).unwrap();
        assert_eq!(body["id"], "es-out");
        assert_eq!(body["type"], "elasticsearch");
        assert_eq!(body["is_default"], true);
        assert_eq!(body["is_default_monitoring"], false);
        assert_eq!(body["ssl"], json!({"certificate": "CERT", "key": "KEY"}));
    }

    #[test]
    fn test_ssl_key_is_restored() {
        let planned = planned();
        let mut api = planned.to_request();
        api.ssl = Some(OutputSsl {
            certificate: Some("CERT".to_string()),
            ..Default::default()
        });

        let state = OutputState::from_api(api, Some(&planned)).unwrap();
        let ssl = state.ssl.unwrap();
        assert_eq!(ssl.key.as_deref(), Some("KEY"));
        assert_eq!(ssl.certificate_authorities, None);
        assert_eq!(state.id.as_deref(), Some("es-out"));
    }

    #[test]
    fn test_import_without_ssl() {
        let api: Output = serde_json::from_value(json!({
            "id": "ls-out",
            "name": "Logstash",
            "type": "logstash",
            "hosts": ["logstash:5044"],
            "is_default": false,
            "is_default_monitoring": false
        }))
        .unwrap();

        let state = OutputState::from_api(api, None).unwrap();
        assert_eq!(state.ssl, None);
        assert_eq!(state.hosts, Some(vec!["logstash:5044".to_string()]));
        assert_eq!(state.default_monitoring, Some(false));
    }

    #[test]
    fn test_validate() {
        let diagnostics = FleetOutput.validate(&json!({
            "name": "Bad",
            "type": "kafka"
        }));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("type"));

        let diagnostics = FleetOutput.validate(&json!({
            "name": "Primary",
            "type": "elasticsearch",
            "hosts": ["https://es:9200", "es:9200 extra"]
        }));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("hosts.1"));
    }
}
