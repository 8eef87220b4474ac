//! The Elastic Stack provider: configuration, planning and dispatch by type name.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::clients::ApiClient;
use crate::config::{Environment, ProviderConfig};
use crate::data_sources::{self, DataSource};
use crate::error::ProviderError;
use crate::resources::{self, Resource};
use crate::schema::{Diagnostic, DiagnosticSeverity, ProviderSchema};
use crate::server::ProviderService;
use crate::types::{ImportedResource, PlanResult, ProviderMetadata, ServerCapabilities};
use crate::{plan, validation};

/// Provider for Elasticsearch, Kibana and Fleet resources.
pub struct ElasticStackProvider {
    environment: Environment,
    resources: BTreeMap<&'static str, Box<dyn Resource>>,
    data_sources: BTreeMap<&'static str, Box<dyn DataSource>>,
    client: RwLock<Option<Arc<ApiClient>>>,
}

impl Default for ElasticStackProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ElasticStackProvider {
    /// A provider reading connection overrides from the process environment.
    pub fn new() -> Self {
        Self::with_environment(Environment::Process)
    }

    /// A provider reading connection overrides from `environment`.
    pub fn with_environment(environment: Environment) -> Self {
        Self {
            environment,
            resources: resources::all()
                .into_iter()
                .map(|r| (r.type_name(), r))
                .collect(),
            data_sources: data_sources::all()
                .into_iter()
                .map(|d| (d.type_name(), d))
                .collect(),
            client: RwLock::new(None),
        }
    }

    fn resource(&self, type_name: &str) -> Result<&dyn Resource, ProviderError> {
        self.resources
            .get(type_name)
            .map(|r| r.as_ref())
            .ok_or_else(|| ProviderError::UnknownResource(type_name.to_string()))
    }

    fn data_source(&self, type_name: &str) -> Result<&dyn DataSource, ProviderError> {
        self.data_sources
            .get(type_name)
            .map(|d| d.as_ref())
            .ok_or_else(|| ProviderError::UnknownResource(type_name.to_string()))
    }

    async fn client(&self) -> Result<Arc<ApiClient>, ProviderError> {
        self.client.read().await.clone().ok_or_else(|| {
            ProviderError::Configuration("the provider has not been configured".to_string())
        })
    }
}

fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics
        .iter()
        .any(|d| d.severity == DiagnosticSeverity::Error)
}

#[async_trait::async_trait]
impl ProviderService for ElasticStackProvider {
    fn schema(&self) -> ProviderSchema {
        let mut schema = ProviderSchema::new().with_provider_config(ProviderConfig::schema());
        for (name, resource) in &self.resources {
            schema = schema.with_resource(*name, resource.schema());
        }
        for (name, data_source) in &self.data_sources {
            schema = schema.with_data_source(*name, data_source.schema());
        }
        schema
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            resources: self.resources.keys().map(|name| name.to_string()).collect(),
            data_sources: self.data_sources.keys().map(|name| name.to_string()).collect(),
            capabilities: ServerCapabilities { plan_destroy: true },
        }
    }

    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let mut diagnostics = validation::validate(&ProviderConfig::schema(), &config);
        if has_errors(&diagnostics) {
            return Ok(diagnostics);
        }

        match ProviderConfig::from_value(config) {
            Ok(parsed) => diagnostics.extend(parsed.validate().iter().map(|e| e.to_diagnostic())),
            Err(err) => diagnostics.push(
                Diagnostic::error("Invalid provider configuration").with_detail(err.to_string()),
            ),
        }
        Ok(diagnostics)
    }

    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let mut diagnostics = self.validate_provider_config(config.clone()).await?;
        if has_errors(&diagnostics) {
            return Ok(diagnostics);
        }

        let resolved = match ProviderConfig::from_value(config)?.resolve(&self.environment) {
            Ok(resolved) => resolved,
            Err(err) => {
                diagnostics.push(err.to_diagnostic());
                return Ok(diagnostics);
            },
        };

        let client = match ApiClient::from_config(&resolved) {
            Ok(client) => client,
            Err(err) => {
                diagnostics.push(
                    Diagnostic::error("Unable to create API clients").with_detail(err.to_string()),
                );
                return Ok(diagnostics);
            },
        };

        if resolved.elasticsearch.is_none() && resolved.kibana.is_none() && resolved.fleet.is_none() {
            warn!("no endpoints configured");
            diagnostics.push(
                Diagnostic::warning("No endpoints configured")
                    .with_detail("Set endpoints in the provider block or through the environment"),
            );
        }

        info!(
            elasticsearch = resolved.elasticsearch.is_some(),
            kibana = resolved.kibana.is_some(),
            fleet = resolved.fleet.is_some(),
            "provider configured"
        );
        *self.client.write().await = Some(Arc::new(client));
        Ok(diagnostics)
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        self.client.write().await.take();
        Ok(())
    }

    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        Ok(self.resource(resource_type)?.validate(&config))
    }

    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        _config: Value,
    ) -> Result<PlanResult, ProviderError> {
        let schema = self.resource(resource_type)?.schema();
        Ok(plan::plan(&schema, prior_state.as_ref(), &proposed_state))
    }

    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
        let resource = self.resource(resource_type)?;
        resource.create(&*self.client().await?, planned_state).await
    }

    async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Option<Value>, ProviderError> {
        let resource = self.resource(resource_type)?;
        resource.read(&*self.client().await?, current_state).await
    }

    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        let resource = self.resource(resource_type)?;
        resource
            .update(&*self.client().await?, prior_state, planned_state)
            .await
    }

    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        let resource = self.resource(resource_type)?;
        resource.delete(&*self.client().await?, current_state).await
    }

    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let resource = self.resource(resource_type)?;
        let state = resource
            .import(&*self.client().await?, id)
            .await?
            .ok_or_else(|| {
                ProviderError::NotFound(format!("{} {:?} does not exist", resource_type, id))
            })?;
        Ok(vec![ImportedResource::new(resource_type, state)])
    }

    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        Ok(self.data_source(data_source_type)?.validate(&config))
    }

    async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let data_source = self.data_source(data_source_type)?;
        data_source.read(&*self.client().await?, config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider() -> ElasticStackProvider {
        ElasticStackProvider::with_environment(Environment::empty())
    }

    #[test]
    fn test_schema_lists_all_types() {
        let schema = provider().schema();
        let resources: Vec<_> = schema.resources.keys().map(String::as_str).collect();
        for name in [
            "elasticstack_elasticsearch_security_user",
            "elasticstack_elasticsearch_ml_anomaly_detection_job",
            "elasticstack_kibana_space",
            "elasticstack_kibana_data_view",
            "elasticstack_fleet_output",
        ] {
            assert!(resources.contains(&name), "missing {}", name);
        }
        assert_eq!(schema.data_sources.len(), 2);
        assert!(schema.provider.block.blocks.contains_key("elasticsearch"));
    }

    #[test]
    fn test_metadata_advertises_destroy_plans() {
        let metadata = provider().metadata();
        assert!(metadata.capabilities.plan_destroy);
        assert_eq!(metadata.resources.len(), 5);
        assert_eq!(
            metadata.data_sources,
            vec!["elasticstack_elasticsearch_info", "elasticstack_fleet_enrollment_tokens"]
        );
    }

    #[tokio::test]
    async fn test_calls_before_configure_fail() {
        let err = provider()
            .read("elasticstack_kibana_space", json!({"id": "ops"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_unknown_type() {
        let err = provider().plan("elasticstack_nope", None, json!({}), json!({})).await.unwrap_err();
        assert!(matches!(err, ProviderError::UnknownResource(name) if name == "elasticstack_nope"));

        let err = provider()
            .read_data_source("elasticstack_nope", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnknownResource(_)));
    }

    #[tokio::test]
    async fn test_configure_reports_config_errors() {
        let diagnostics = provider()
            .configure(json!({"kibana": {"endpoints": ["http://a:5601", "http://b:5601"]}}))
            .await
            .unwrap();
        assert!(has_errors(&diagnostics));
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("kibana.endpoints"));
    }

    #[tokio::test]
    async fn test_configure_without_endpoints_warns() {
        let provider = provider();
        let diagnostics = provider.configure(Value::Null).await.unwrap();
        assert!(!has_errors(&diagnostics));
        assert_eq!(diagnostics[0].severity, DiagnosticSeverity::Warning);

        let err = provider
            .read("elasticstack_kibana_space", json!({"id": "ops"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_stop_drops_clients() {
        let provider = provider();
        provider
            .configure(json!({"elasticsearch": {"endpoints": ["http://localhost:9200"]}}))
            .await
            .unwrap();
        assert!(provider.client().await.is_ok());

        provider.stop().await.unwrap();
        assert!(provider.client().await.is_err());
    }
}
