//! Read-only data sources.

use async_trait::async_trait;
use serde_json::Value;

use crate::clients::ApiClient;
use crate::error::ProviderError;
use crate::schema::{Diagnostic, Schema};
use crate::validation;

pub mod elasticsearch_info;
pub mod fleet_enrollment_tokens;

pub use elasticsearch_info::ElasticsearchInfo;
pub use fleet_enrollment_tokens::FleetEnrollmentTokens;

/// A data source type the provider can read.
#[async_trait]
pub trait DataSource: Send + Sync + 'static {
    fn type_name(&self) -> &'static str;

    fn schema(&self) -> Schema;

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        validation::validate(&self.schema(), config)
    }

    /// Resolve the configuration into a full state object.
    async fn read(&self, client: &ApiClient, config: Value) -> Result<Value, ProviderError>;
}

pub fn all() -> Vec<Box<dyn DataSource>> {
    vec![Box::new(ElasticsearchInfo), Box::new(FleetEnrollmentTokens)]
}
