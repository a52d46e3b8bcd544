//! Drive a [`ProviderService`] in-process, without the gRPC server.
//!
//! # Example
//!
//! ```ignore
//! use hemmer_provider_otc::testing::ProviderTester;
//! use serde_json::json;
//!
//! #[tokio::test]
//! async fn test_zone() {
//!     let tester = ProviderTester::new(provider);
//!     tester.configure(json!({"auth_url": "...", "token": "t"})).await.unwrap();
//!
//!     let state = tester
//!         .lifecycle_create("opentelekomcloud_dns_zone_v2", json!({"name": "example.com."}))
//!         .await
//!         .unwrap();
//!     assert_eq!(state["status"], "ACTIVE");
//! }
//! ```

use serde_json::Value;

use crate::context::OperationContext;
use crate::error::ProviderError;
use crate::quota::{Booking, Quota, QuotaRegistry};
use crate::schema::{Diagnostic, DiagnosticSeverity, ProviderSchema};
use crate::server::ProviderService;
use crate::types::{ApplyResult, PlanResult};

/// Host version reported by [`ProviderTester::configure`].
pub const TEST_HOST_VERSION: &str = "test";

/// A test harness wrapping a provider.
///
/// Each method runs one host call and turns error diagnostics into
/// [`TestError::Diagnostics`], so tests can use `?` or `unwrap` throughout.
pub struct ProviderTester<P: ProviderService> {
    provider: P,
}

impl<P: ProviderService> ProviderTester<P> {
    /// Create a new tester for the given provider.
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Get a reference to the underlying provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Get a mutable reference to the underlying provider.
    pub fn provider_mut(&mut self) -> &mut P {
        &mut self.provider
    }

    /// Get the provider's schema.
    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    /// Get the list of resource type names.
    pub fn resource_types(&self) -> Vec<String> {
        self.provider.metadata().resources
    }

    /// Validate provider configuration.
    pub async fn validate_provider_config(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.validate_provider_config(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Configure the provider.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.configure(config, TEST_HOST_VERSION).await?;
        check_diagnostics(diagnostics)
    }

    /// Stop the provider.
    pub async fn stop(&self) -> Result<(), ProviderError> {
        self.provider.stop().await
    }

    /// Validate a resource configuration.
    pub async fn validate_resource_config(&self, resource_type: &str, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.validate_resource_config(resource_type, config).await?;
        check_diagnostics(diagnostics)
    }

    /// Upgrade a stored state written at schema `version`.
    pub async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: i64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider.upgrade_resource_state(resource_type, version, state).await
    }

    /// Plan creating a resource from `config`.
    pub async fn plan_create(&self, resource_type: &str, config: Value) -> Result<PlanResult, TestError> {
        self.plan(resource_type, Value::Null, config).await
    }

    /// Plan moving `prior_state` to `config`.
    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        config: Value,
    ) -> Result<PlanResult, TestError> {
        self.plan(resource_type, prior_state, config).await
    }

    /// Plan destroying `current_state`.
    pub async fn plan_delete(&self, resource_type: &str, current_state: Value) -> Result<PlanResult, TestError> {
        self.plan(resource_type, current_state, Value::Null).await
    }

    /// Plan a change; error diagnostics fail the call.
    pub async fn plan(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<PlanResult, TestError> {
        let plan = self
            .provider
            .plan(resource_type, prior_state, proposed_state.clone(), proposed_state)
            .await?;
        check_diagnostics(plan.diagnostics.clone())?;
        Ok(plan)
    }

    /// Apply a planned state and return the raw result, errors included.
    pub async fn apply(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
        config: Value,
    ) -> Result<ApplyResult, ProviderError> {
        self.provider
            .apply(resource_type, prior_state, planned_state, config)
            .await
    }

    /// Refresh a state; error diagnostics fail the call.
    pub async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, TestError> {
        let result = self.provider.read(resource_type, current_state).await?;
        check_diagnostics(result.diagnostics)?;
        Ok(result.new_state)
    }

    /// Import an object by ID and return its state.
    pub async fn import_resource(&self, resource_type: &str, id: &str) -> Result<Value, TestError> {
        let result = self.provider.import_resource(resource_type, id).await?;
        check_diagnostics(result.diagnostics)?;
        result
            .imported
            .into_iter()
            .next()
            .map(|imported| imported.state)
            .ok_or_else(|| TestError::Provider(ProviderError::NotFound(format!("{} {}", resource_type, id))))
    }

    /// Plan and apply a create, then read the result back.
    pub async fn lifecycle_create(&self, resource_type: &str, config: Value) -> Result<Value, TestError> {
        let plan = self.plan_create(resource_type, config.clone()).await?;
        let created = self.apply(resource_type, Value::Null, plan.planned_state, config).await?;
        check_diagnostics(created.diagnostics)?;
        self.read(resource_type, created.new_state).await
    }

    /// Plan and apply an update of `prior_state` to `config`, then read the
    /// result back.
    ///
    /// A plan that requires replacement is carried out as the host does it:
    /// destroy the old object, then create the new one.
    pub async fn lifecycle_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        config: Value,
    ) -> Result<Value, TestError> {
        let plan = self
            .plan_update(resource_type, prior_state.clone(), config.clone())
            .await?;
        if plan.requires_replace {
            self.lifecycle_delete(resource_type, prior_state).await?;
            return self.lifecycle_create(resource_type, config).await;
        }
        let updated = self
            .apply(resource_type, prior_state, plan.planned_state, config)
            .await?;
        check_diagnostics(updated.diagnostics)?;
        self.read(resource_type, updated.new_state).await
    }

    /// Plan and apply a destroy.
    pub async fn lifecycle_delete(&self, resource_type: &str, current_state: Value) -> Result<(), TestError> {
        let plan = self.plan_delete(resource_type, current_state.clone()).await?;
        let deleted = self
            .apply(resource_type, current_state, plan.planned_state, Value::Null)
            .await?;
        check_diagnostics(deleted.diagnostics)?;
        if !deleted.new_state.is_null() {
            return Err(TestError::Provider(ProviderError::UnexpectedState {
                state: format!("{} still has state after delete", resource_type),
                target: crate::waiter::DELETED.to_string(),
            }));
        }
        Ok(())
    }

    /// Create, check that a re-plan is empty, update and delete.
    ///
    /// Returns the state after the update.
    pub async fn lifecycle_crud(
        &self,
        resource_type: &str,
        initial_config: Value,
        updated_config: Value,
    ) -> Result<Value, TestError> {
        let created = self.lifecycle_create(resource_type, initial_config.clone()).await?;
        let replan = self
            .plan_update(resource_type, created.clone(), initial_config)
            .await?;
        if !replan.is_empty() {
            return Err(TestError::Drift(
                replan.changes.into_iter().map(|c| c.path).collect(),
            ));
        }

        let updated = self
            .lifecycle_update(resource_type, created, updated_config)
            .await?;
        self.lifecycle_delete(resource_type, updated.clone()).await?;
        Ok(updated)
    }
}

/// Reserve quota units for the rest of a test.
///
/// Holding the returned booking makes concurrent operations in the same
/// registry queue behind it; dropping it frees the units.
pub async fn book_quotas_for_test(
    registry: &QuotaRegistry,
    requests: &[(Quota, u32)],
) -> Result<Booking, ProviderError> {
    registry.book_many(&OperationContext::background(), requests).await
}

/// Error type for test operations that may fail with diagnostics.
#[derive(Debug)]
pub enum TestError {
    /// The operation failed with diagnostics.
    Diagnostics(Vec<Diagnostic>),
    /// The operation failed with a provider error.
    Provider(ProviderError),
    /// Planning right after apply still showed changes at these paths.
    Drift(Vec<String>),
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
            TestError::Drift(paths) => write!(f, "Plan after apply is not empty: {}", paths.join(", ")),
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
        .filter(|d| matches!(d.severity, DiagnosticSeverity::Error))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

/// Assert that a plan creates a resource.
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

/// Assert that a plan destroys the resource.
///
/// # Panics
///
/// Panics if the planned state is not null.
pub fn assert_plan_destroys(plan: &PlanResult) {
    assert!(
        plan.planned_state.is_null(),
        "Expected a destroy plan, but the planned state is {}",
        plan.planned_state
    );
}

/// Assert that a plan result indicates no changes.
///
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

/// Assert that a plan requires resource replacement.
///
/// # Panics
///
/// Panics if the plan does not require replacement.
pub fn assert_plan_replaces(plan: &PlanResult) {
    assert!(
        plan.requires_replace,
        "Expected plan to require replacement, but it does not"
    );
}

/// Assert that a plan has changes and updates in place.
///
/// # Panics
///
/// Panics if the plan is empty or requires replacement.
pub fn assert_plan_updates_in_place(plan: &PlanResult) {
    assert!(!plan.changes.is_empty(), "Expected plan to have changes, but got no changes");
    assert!(
        !plan.requires_replace,
        "Expected plan to update in place, but it requires replacement"
    );
}

/// Assert that a plan changes the attribute at `path`.
///
/// # Panics
///
/// Panics if the plan does not change `path`.
pub fn assert_plan_changes_attribute(plan: &PlanResult, path: &str) {
    let has_change = plan.changes.iter().any(|c| c.path == path);
    assert!(
        has_change,
        "Expected plan to change attribute '{}', but it was not changed. Changed attributes: {:?}",
        path,
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that diagnostics contain no errors.
///
/// # Panics
///
/// Panics if there are any error diagnostics.
pub fn assert_no_errors(diagnostics: &[Diagnostic]) {
    let errors: Vec<_> = diagnostics.iter().filter(|d| d.is_error()).collect();

    assert!(
        errors.is_empty(),
        "Expected no errors, but got {} error(s): {:?}",
        errors.len(),
        errors.iter().map(|d| &d.summary).collect::<Vec<_>>()
    );
}

/// Assert that diagnostics contain at least one error.
///
/// # Panics
///
/// Panics if there are no error diagnostics.
pub fn assert_has_errors(diagnostics: &[Diagnostic]) {
    assert!(
        diagnostics.iter().any(Diagnostic::is_error),
        "Expected at least one error, but got none"
    );
}

/// Assert that an error diagnostic mentions `substring` in its summary or
/// detail.
///
/// # Panics
///
/// Panics if no error diagnostic matches.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    let matches = |d: &Diagnostic| {
        d.summary.contains(substring) || d.detail.as_deref().is_some_and(|detail| detail.contains(substring))
    };
    assert!(
        diagnostics.iter().any(|d| d.is_error() && matches(d)),
        "Expected an error containing '{}', but no matching error found. Errors: {:?}",
        substring,
        diagnostics
            .iter()
            .filter(|d| d.is_error())
            .map(|d| &d.summary)
            .collect::<Vec<_>>()
    );
}
