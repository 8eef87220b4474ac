//! Drive a [`ProviderService`] through its lifecycle without a gRPC server.
//!
//! # Example
//!
//! ```ignore
//! use hemmer_provider_elasticstack::config::Environment;
//! use hemmer_provider_elasticstack::testing::ProviderTester;
//! use hemmer_provider_elasticstack::ElasticStackProvider;
//! use serde_json::json;
//!
//! let tester = ProviderTester::new(ElasticStackProvider::with_environment(Environment::empty()));
//! tester
//!     .configure(json!({"kibana": {"endpoints": [server.uri()]}}))
//!     .await
//!     .unwrap();
//! let state = tester
//!     .lifecycle_create("elasticstack_kibana_space", json!({"space_id": "ops", "name": "Ops"}))
//!     .await
//!     .unwrap();
//! assert_eq!(state["id"], "ops");
//! ```

use serde_json::Value;

use crate::error::ProviderError;
use crate::schema::{Diagnostic, DiagnosticSeverity, ProviderSchema};
use crate::server::ProviderService;
use crate::types::{ImportedResource, PlanResult};

/// A test harness wrapping a provider.
pub struct ProviderTester<P: ProviderService> {
    provider: P,
}

impl<P: ProviderService> ProviderTester<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    pub fn resource_types(&self) -> Vec<String> {
        self.provider.metadata().resources
    }

    pub fn data_source_types(&self) -> Vec<String> {
        self.provider.metadata().data_sources
    }

    /// Validate provider configuration; error diagnostics become `Err`.
    pub async fn validate_provider_config(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.validate_provider_config(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Configure the provider; error diagnostics become `Err`.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.configure(config).await?;
        check_diagnostics(diagnostics)
    }

    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_resource_config(resource_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Plan a create; the config doubles as the proposed state.
    pub async fn plan_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, None, config.clone(), config)
            .await
    }

    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        config: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), config.clone(), config)
            .await
    }

    pub async fn plan_delete(
        &self,
        resource_type: &str,
        prior_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), Value::Null, Value::Null)
            .await
    }

    pub async fn create(
        &self,
        resource_type: &str,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider.create(resource_type, planned_state).await
    }

    /// Refresh state; `None` means the object is gone.
    pub async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Option<Value>, ProviderError> {
        self.provider.read(resource_type, current_state).await
    }

    pub async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .update(resource_type, prior_state, planned_state)
            .await
    }

    pub async fn delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ProviderError> {
        self.provider.delete(resource_type, current_state).await
    }

    pub async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        self.provider.import_resource(resource_type, id).await
    }

    pub async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .read_data_source(data_source_type, config)
            .await
    }

    /// Plan, create, then read back. A missing object after create is an error.
    pub async fn lifecycle_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let plan = self.plan_create(resource_type, config).await?;
        let created = self.create(resource_type, plan.planned_state).await?;
        self.read_existing(resource_type, created).await
    }

    /// Plan, update, then read back.
    pub async fn lifecycle_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let plan = self
            .plan_update(resource_type, prior_state.clone(), config)
            .await?;
        let updated = self
            .update(resource_type, prior_state, plan.planned_state)
            .await?;
        self.read_existing(resource_type, updated).await
    }

    /// Plan the destroy, then delete.
    pub async fn lifecycle_delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ProviderError> {
        self.plan_delete(resource_type, current_state.clone())
            .await?;
        self.delete(resource_type, current_state).await
    }

    async fn read_existing(&self, resource_type: &str, state: Value) -> Result<Value, ProviderError> {
        self.read(resource_type, state).await?.ok_or_else(|| {
            ProviderError::NotFound(format!("{} disappeared right after apply", resource_type))
        })
    }
}

/// A failed test operation.
#[derive(Debug)]
pub enum TestError {
    /// The operation returned error diagnostics.
    Diagnostics(Vec<Diagnostic>),
    /// The operation returned a provider error.
    Provider(ProviderError),
}

impl TestError {
    /// The error diagnostics, if the failure carried any.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            Self::Diagnostics(diags) => diags,
            Self::Provider(_) => &[],
        }
    }
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Diagnostics(diags) => {
                writeln!(f, "Operation failed with {} diagnostic(s):", diags.len())?;
                for diag in diags {
                    write!(f, "  [{:?}] {}", diag.severity, diag.summary)?;
                    if let Some(detail) = &diag.detail {
                        write!(f, ": {}", detail)?;
                    }
                    if let Some(attr) = &diag.attribute {
                        write!(f, " (at {})", attr)?;
                    }
                    writeln!(f)?;
                }
                Ok(())
            },
            TestError::Provider(e) => write!(f, "Provider error: {}", e),
        }
    }
}

impl std::error::Error for TestError {}

impl From<ProviderError> for TestError {
    fn from(e: ProviderError) -> Self {
        TestError::Provider(e)
    }
}

fn check_diagnostics(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    let errors: Vec<_> = diagnostics
        .into_iter()
        .filter(|d| d.severity == DiagnosticSeverity::Error)
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

/// Assert that a plan creates the resource.
///
/// # Panics
///
/// Panics if the plan has no changes or requires replacement.
pub fn assert_plan_creates(plan: &PlanResult) {
    assert!(
        !plan.changes.is_empty(),
        "Expected plan to have changes for create, but got no changes"
    );
    assert!(!plan.requires_replace, "Expected plan to create, not replace");
}

/// # Panics
///
/// Panics if the plan has any changes.
pub fn assert_plan_no_changes(plan: &PlanResult) {
    assert!(
        plan.changes.is_empty(),
        "Expected no changes, but got {} change(s): {:?}",
        plan.changes.len(),
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// # Panics
///
/// Panics if the plan does not require replacement.
pub fn assert_plan_replaces(plan: &PlanResult) {
    assert!(
        plan.requires_replace,
        "Expected plan to require replacement, but it does not"
    );
}

/// # Panics
///
/// Panics if the plan requires replacement.
pub fn assert_plan_updates_in_place(plan: &PlanResult) {
    assert!(
        !plan.requires_replace,
        "Expected plan to update in place, but it requires replacement"
    );
}

/// Assert that a plan changes the attribute at `path`.
///
/// # Panics
///
/// Panics if no change has that path.
pub fn assert_plan_changes_attribute(plan: &PlanResult, path: &str) {
    assert!(
        plan.changes.iter().any(|c| c.path == path),
        "Expected plan to change attribute '{}'. Changed attributes: {:?}",
        path,
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// # Panics
///
/// Panics if there are any error diagnostics.
pub fn assert_no_errors(diagnostics: &[Diagnostic]) {
    let errors: Vec<_> = diagnostics
        .iter()
        .filter(|d| d.severity == DiagnosticSeverity::Error)
        .collect();

    assert!(
        errors.is_empty(),
        "Expected no errors, but got {} error(s): {:?}",
        errors.len(),
        errors.iter().map(|d| &d.summary).collect::<Vec<_>>()
    );
}

/// Assert that some error diagnostic's summary contains `substring`.
///
/// # Panics
///
/// Panics if none does.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    let found = diagnostics
        .iter()
        .any(|d| d.severity == DiagnosticSeverity::Error && d.summary.contains(substring));

    assert!(
        found,
        "Expected an error containing '{}'. Errors: {:?}",
        substring,
        diagnostics
            .iter()
            .filter(|d| d.severity == DiagnosticSeverity::Error)
            .map(|d| &d.summary)
            .collect::<Vec<_>>()
    );
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;
    use crate::schema::{Attribute, Schema};
    use serde_json::json;

    /// Keeps spaces in memory, keyed by `space_id`.
    #[derive(Default)]
    struct InMemorySpaces {
        spaces: Mutex<HashMap<String, Value>>,
    }

    #[async_trait::async_trait]
    impl ProviderService for InMemorySpaces {
        fn schema(&self) -> ProviderSchema {
            ProviderSchema::new().with_resource(
                "elasticstack_kibana_space",
                Schema::v0()
                    .with_attribute("id", Attribute::computed_string())
                    .with_attribute("space_id", Attribute::required_string().with_force_new())
                    .with_attribute("name", Attribute::required_string()),
            )
        }

        async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
            if config.get("kibana").is_none() {
                return Ok(vec![Diagnostic::error("kibana block missing")]);
            }
            Ok(vec![Diagnostic::warning("using a fake Kibana")])
        }

        async fn plan(
            &self,
            resource_type: &str,
            prior_state: Option<Value>,
            proposed_state: Value,
            _config: Value,
        ) -> Result<PlanResult, ProviderError> {
            let schema = &self.schema().resources[resource_type];
            Ok(crate::plan::plan(schema, prior_state.as_ref(), &proposed_state))
        }

        async fn create(&self, _resource_type: &str, planned: Value) -> Result<Value, ProviderError> {
            let mut state = planned;
            let id = state["space_id"].clone();
            state["id"] = id.clone();
            self.spaces
                .lock()
                .unwrap()
                .insert(id.as_str().unwrap_or_default().to_string(), state.clone());
            Ok(state)
        }

        async fn read(&self, _resource_type: &str, state: Value) -> Result<Option<Value>, ProviderError> {
            let id = state["id"].as_str().unwrap_or_default();
            Ok(self.spaces.lock().unwrap().get(id).cloned())
        }

        async fn update(
            &self,
            resource_type: &str,
            _prior: Value,
            planned: Value,
        ) -> Result<Value, ProviderError> {
            self.create(resource_type, planned).await
        }

        async fn delete(&self, _resource_type: &str, state: Value) -> Result<(), ProviderError> {
            let id = state["id"].as_str().unwrap_or_default();
            self.spaces.lock().unwrap().remove(id);
            Ok(())
        }
    }

    const SPACE: &str = "elasticstack_kibana_space";

    #[tokio::test]
    async fn test_configure_reports_error_diagnostics() {
        let tester = ProviderTester::new(InMemorySpaces::default());
        assert!(tester.configure(json!({"kibana": {}})).await.is_ok());

        let err = tester.configure(json!({})).await.unwrap_err();
        assert_error_contains(err.diagnostics(), "kibana block missing");
    }

    #[tokio::test]
    async fn test_resource_types() {
        let tester = ProviderTester::new(InMemorySpaces::default());
        assert_eq!(tester.resource_types(), vec![SPACE.to_string()]);
        assert!(tester.data_source_types().is_empty());
    }

    #[tokio::test]
    async fn test_lifecycle_create_update_delete() {
        let tester = ProviderTester::new(InMemorySpaces::default());

        let created = tester
            .lifecycle_create(SPACE, json!({"space_id": "ops", "name": "Ops"}))
            .await
            .unwrap();
        assert_eq!(created["id"], "ops");

        let plan = tester
            .plan_update(SPACE, created.clone(), json!({"space_id": "ops", "name": "Operations"}))
            .await
            .unwrap();
        assert_plan_changes_attribute(&plan, "name");
        assert_plan_updates_in_place(&plan);

        let updated = tester
            .lifecycle_update(SPACE, created, json!({"space_id": "ops", "name": "Operations"}))
            .await
            .unwrap();
        assert_eq!(updated["name"], "Operations");

        tester.lifecycle_delete(SPACE, updated.clone()).await.unwrap();
        assert_eq!(tester.read(SPACE, updated).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_plan_helpers() {
        let tester = ProviderTester::new(InMemorySpaces::default());
        let prior = json!({"id": "ops", "space_id": "ops", "name": "Ops"});

        let plan = tester
            .plan_create(SPACE, json!({"space_id": "ops", "name": "Ops"}))
            .await
            .unwrap();
        assert_plan_creates(&plan);

        let plan = tester
            .plan_update(SPACE, prior.clone(), json!({"space_id": "ops", "name": "Ops"}))
            .await
            .unwrap();
        assert_plan_no_changes(&plan);

        let plan = tester
            .plan_update(SPACE, prior, json!({"space_id": "dev", "name": "Ops"}))
            .await
            .unwrap();
        assert_plan_replaces(&plan);
    }

    #[test]
    fn test_assert_no_errors_ignores_warnings() {
        assert_no_errors(&[Diagnostic::warning("using a fake Kibana")]);
    }

    #[test]
    #[should_panic(expected = "Expected no errors")]
    fn test_assert_no_errors_fails() {
        assert_no_errors(&[Diagnostic::error("Wrong resource ID.")]);
    }

    #[test]
    fn test_test_error_display() {
        let err = TestError::Diagnostics(vec![
            Diagnostic::error("Missing required attribute 'name'").with_attribute("name"),
            Diagnostic::error("PUT /api/spaces/space/ops failed with status 400")
                .with_detail(r#"{"message":"bad"}"#),
        ]);

        let display = err.to_string();
        assert!(display.contains("(at name)"));
        assert!(display.contains(r#"{"message":"bad"}"#));
        assert_eq!(err.diagnostics().len(), 2);
    }
}
