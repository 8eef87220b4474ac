//! Managed resource types.
//!
//! Every resource runs the same pipeline: decode state into a typed model,
//! turn the model into an API request, call the client, then map the API
//! response back onto the model. A 404 on read means the object is gone.

use async_trait::async_trait;
use serde_json::Value;

use crate::clients::ApiClient;
use crate::error::ProviderError;
use crate::schema::{Diagnostic, Schema};
use crate::validation;

pub mod fleet_output;
pub mod kibana_data_view;
pub mod kibana_space;
pub mod ml_anomaly_detection_job;
pub mod security_user;

pub use fleet_output::FleetOutput;
pub use kibana_data_view::KibanaDataView;
pub use kibana_space::KibanaSpace;
pub use ml_anomaly_detection_job::MlAnomalyDetectionJob;
pub use security_user::SecurityUser;

/// A resource type the provider manages.
#[async_trait]
pub trait Resource: Send + Sync + 'static {
    /// Type name as used in configuration, e.g. `elasticstack_kibana_space`.
    fn type_name(&self) -> &'static str;

    fn schema(&self) -> Schema;

    /// Check a configuration before planning. Schema checks run by default.
    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        validation::validate(&self.schema(), config)
    }

    async fn create(&self, client: &ApiClient, planned: Value) -> Result<Value, ProviderError>;

    /// Refresh state. `Ok(None)` means the object no longer exists.
    async fn read(&self, client: &ApiClient, state: Value) -> Result<Option<Value>, ProviderError>;

    async fn update(
        &self,
        client: &ApiClient,
        prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError>;

    async fn delete(&self, client: &ApiClient, state: Value) -> Result<(), ProviderError>;

    /// Build state for an existing object from its import id.
    ///
    /// With no prior state every value comes from the API.
    async fn import(&self, client: &ApiClient, id: &str) -> Result<Option<Value>, ProviderError>;
}

/// All resource types, in registration order.
pub fn all() -> Vec<Box<dyn Resource>> {
    vec![
        Box::new(SecurityUser),
        Box::new(MlAnomalyDetectionJob),
        Box::new(KibanaSpace),
        Box::new(KibanaDataView),
        Box::new(FleetOutput),
    ]
}

/// The `id` attribute of a state object.
pub(crate) fn state_id(id: Option<&str>) -> Result<&str, ProviderError> {
    id.filter(|id| !id.is_empty())
        .ok_or_else(|| ProviderError::Validation("resource state has no id".to_string()))
}

/// Turn a missing object right after a write into an error.
pub(crate) fn written<T>(type_name: &str, id: &str, value: Option<T>) -> Result<T, ProviderError> {
    value.ok_or_else(|| {
        ProviderError::NotFound(format!(
            "{} {:?} was not found after it was written",
            type_name, id
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_type_names_are_unique_and_prefixed() {
        let names: Vec<_> = all().iter().map(|r| r.type_name()).collect();
        let unique: HashSet<_> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
        assert!(names.iter().all(|n| n.starts_with("elasticstack_")));
    }

    #[test]
    fn test_every_schema_has_computed_id() {
        for resource in all() {
            let schema = resource.schema();
            let id = &schema.block.attributes["id"];
            assert!(id.flags.computed, "{} id must be computed", resource.type_name());
        }
    }

    #[test]
    fn test_state_id() {
        assert_eq!(state_id(Some("c1/jane")).unwrap(), "c1/jane");
        assert!(state_id(Some("")).is_err());
        assert!(state_id(None).is_err());
    }
}
