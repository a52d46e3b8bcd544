//! The contract every managed resource type implements.
//!
//! A resource describes its schema and maps the four lifecycle callbacks onto
//! vendor calls. Everything around the callbacks (diffing, timeouts, partial
//! failure handling, not-found handling on read and delete) lives in
//! [`crate::lifecycle`] and is shared by all resources.
//!
//! Callback rules:
//!
//! - `create` calls [`ResourceData::set_id`] as soon as the vendor returns
//!   an ID, before waiting for the object to settle. If it fails after that
//!   point the ID is kept and the failure is reported as a warning.
//! - `read` populates every attribute, or clears the ID when the object is
//!   gone. Returning a not-found error has the same effect.
//! - `update` may use [`ResourceData::has_change`] to skip no-op calls and
//!   must not change the ID.
//! - `delete` returns once the vendor no longer reports the object. A
//!   not-found error counts as success.
//! - `import` turns the ID the user passed into the minimum state `read`
//!   needs. The default keeps the ID as it is.

use serde_json::Value;

use crate::client::ClientFactory;
use crate::context::OperationContext;
use crate::error::ProviderError;
use crate::schema::{ResourceData, ResourceDiff, ResourceTimeouts, Schema};

/// A managed resource type.
#[async_trait::async_trait]
pub trait Resource: Send + Sync + 'static {
    /// Type name as written in configuration, e.g. `opentelekomcloud_vpc_v1`.
    fn type_name(&self) -> &'static str;

    /// The attribute tree. Called once when the catalog is built.
    fn schema(&self) -> Schema;

    /// Default per-operation timeouts, before the `timeouts` block.
    fn timeouts(&self) -> ResourceTimeouts {
        ResourceTimeouts::default()
    }

    /// Whether the resource can be changed in place. When false, every
    /// configurable attribute must force replacement.
    fn updatable(&self) -> bool {
        true
    }

    /// Second pass over the mechanical plan.
    fn customize_diff(&self, diff: &mut ResourceDiff<'_>) -> Result<(), ProviderError> {
        let _ = diff;
        Ok(())
    }

    /// Migrate state written by schema `version` to the current version.
    fn upgrade_state(&self, version: u64, state: Value) -> Result<Value, ProviderError> {
        let _ = version;
        Ok(state)
    }

    /// Create the object and record its ID.
    async fn create(
        &self,
        ctx: &OperationContext,
        data: &mut ResourceData,
        clients: &ClientFactory,
    ) -> Result<(), ProviderError>;

    /// Refresh every attribute from the vendor.
    async fn read(
        &self,
        ctx: &OperationContext,
        data: &mut ResourceData,
        clients: &ClientFactory,
    ) -> Result<(), ProviderError>;

    /// Apply in-place changes.
    async fn update(
        &self,
        ctx: &OperationContext,
        data: &mut ResourceData,
        clients: &ClientFactory,
    ) -> Result<(), ProviderError> {
        let _ = (ctx, data, clients);
        Err(ProviderError::Unimplemented(format!(
            "{} cannot be updated in place",
            self.type_name()
        )))
    }

    /// Delete the object and wait until it is gone.
    async fn delete(
        &self,
        ctx: &OperationContext,
        data: &mut ResourceData,
        clients: &ClientFactory,
    ) -> Result<(), ProviderError>;

    /// Seed state from an import ID.
    async fn import(
        &self,
        ctx: &OperationContext,
        data: &mut ResourceData,
        clients: &ClientFactory,
    ) -> Result<(), ProviderError> {
        let _ = (ctx, data, clients);
        Ok(())
    }
}
