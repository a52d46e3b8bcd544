//! Tag reconciliation.
//!
//! Resources that support tags declare a `tags` string map. On create and
//! update the desired map is compared with what the service reports and the
//! difference is applied with at most one batch delete and one batch create.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::client::ServiceClient;
use crate::context::OperationContext;
use crate::error::ProviderError;
use crate::schema::{Attribute, Diagnostic};

/// A tag map.
pub type Tags = BTreeMap<String, String>;

/// Key prefixes reserved by the vendor.
pub const RESERVED_PREFIXES: &[&str] = &["_sys_"];

/// Whether the vendor reserves `key`.
pub fn is_reserved(key: &str) -> bool {
    RESERVED_PREFIXES.iter().any(|prefix| key.starts_with(prefix))
}

/// The `tags` attribute shared by every taggable resource.
pub fn tags_attribute() -> Attribute {
    Attribute::optional_string_map().with_description("Key/value tags")
}

/// Remove reserved keys.
pub fn strip_reserved(tags: &Tags) -> Tags {
    tags.iter()
        .filter(|(k, _)| !is_reserved(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// The calls needed to turn one tag map into another.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagPlan {
    /// Tags to delete, with the values they currently have.
    pub remove: Tags,
    /// Tags to create.
    pub add: Tags,
}

impl TagPlan {
    /// Compare `desired` with `actual`, ignoring reserved keys on both sides.
    ///
    /// A key whose value changed is removed and re-added.
    pub fn new(desired: &Tags, actual: &Tags) -> Self {
        let mut plan = TagPlan::default();
        for (key, value) in actual.iter().filter(|(k, _)| !is_reserved(k)) {
            if desired.get(key) != Some(value) {
                plan.remove.insert(key.clone(), value.clone());
            }
        }
        for (key, value) in desired.iter().filter(|(k, _)| !is_reserved(k)) {
            if actual.get(key) != Some(value) {
                plan.add.insert(key.clone(), value.clone());
            }
        }
        plan
    }

    /// Whether nothing needs to be sent.
    pub fn is_empty(&self) -> bool {
        self.remove.is_empty() && self.add.is_empty()
    }
}

/// A service's tag endpoint.
#[async_trait]
pub trait TagApi: Send + Sync {
    /// Current tags of the object.
    async fn list(&self, ctx: &OperationContext) -> Result<Tags, ProviderError>;

    /// Delete tags in one call.
    async fn batch_delete(&self, ctx: &OperationContext, tags: &Tags) -> Result<(), ProviderError>;

    /// Create tags in one call.
    async fn batch_create(&self, ctx: &OperationContext, tags: &Tags) -> Result<(), ProviderError>;
}

/// Bring the object's tags to `desired`.
///
/// Reserved keys in `desired` are dropped with a warning.
pub async fn reconcile(
    ctx: &OperationContext,
    api: &dyn TagApi,
    desired: &Tags,
    actual: &Tags,
) -> Result<Vec<Diagnostic>, ProviderError> {
    let mut warnings = Vec::new();
    for key in desired.keys().filter(|k| is_reserved(k)) {
        warnings.push(
            Diagnostic::warning(format!("Tag \"{}\" uses a reserved prefix and was ignored", key))
                .with_attribute(format!("tags.{}", key)),
        );
    }

    let plan = TagPlan::new(desired, actual);
    if plan.is_empty() {
        return Ok(warnings);
    }
    debug!(remove = plan.remove.len(), add = plan.add.len(), "reconciling tags");
    if !plan.remove.is_empty() {
        api.batch_delete(ctx, &plan.remove).await?;
    }
    if !plan.add.is_empty() {
        api.batch_create(ctx, &plan.add).await?;
    }
    Ok(warnings)
}

/// The `tags/action` API shared by DNS, VPC and other services:
/// `GET {path}` lists, `POST {path}/action` creates or deletes.
#[derive(Debug, Clone)]
pub struct ResourceTags {
    client: ServiceClient,
    path: String,
}

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    key: String,
    #[serde(default)]
    value: String,
}

impl ResourceTags {
    /// Tags at `path`, e.g. `/v2.0/{project}/vpcs/{id}/tags`.
    pub fn new(client: ServiceClient, path: impl Into<String>) -> Self {
        Self {
            client,
            path: path.into(),
        }
    }

    async fn action(&self, ctx: &OperationContext, action: &str, tags: &Tags) -> Result<(), ProviderError> {
        let tags: Vec<Value> = tags
            .iter()
            .map(|(key, value)| json!({"key": key, "value": value}))
            .collect();
        let body = json!({"action": action, "tags": tags});
        self.client
            .post::<Value>(ctx, &format!("{}/action", self.path), &body)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl TagApi for ResourceTags {
    async fn list(&self, ctx: &OperationContext) -> Result<Tags, ProviderError> {
        let list: TagList = self.client.get(ctx, &self.path).await?;
        Ok(list.tags.into_iter().map(|t| (t.key, t.value)).collect())
    }

    async fn batch_delete(&self, ctx: &OperationContext, tags: &Tags) -> Result<(), ProviderError> {
        self.action(ctx, "delete", tags).await
    }

    async fn batch_create(&self, ctx: &OperationContext, tags: &Tags) -> Result<(), ProviderError> {
        self.action(ctx, "create", tags).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    /// Keeps tags in memory and counts calls.
    #[derive(Default)]
    struct MemoryTags {
        tags: Mutex<Tags>,
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl TagApi for MemoryTags {
        async fn list(&self, _ctx: &OperationContext) -> Result<Tags, ProviderError> {
            Ok(self.tags.lock().unwrap().clone())
        }

        async fn batch_delete(&self, _ctx: &OperationContext, tags: &Tags) -> Result<(), ProviderError> {
            *self.calls.lock().unwrap() += 1;
            let mut current = self.tags.lock().unwrap();
            for key in tags.keys() {
                current.remove(key);
            }
            Ok(())
        }

        async fn batch_create(&self, _ctx: &OperationContext, tags: &Tags) -> Result<(), ProviderError> {
            *self.calls.lock().unwrap() += 1;
            self.tags.lock().unwrap().extend(tags.clone());
            Ok(())
        }
    }

    #[test]
    fn test_plan_changed_value_is_removed_and_added() {
        let plan = TagPlan::new(
            &tags(&[("env", "prod"), ("team", "dns")]),
            &tags(&[("env", "dev"), ("old", "x")]),
        );
        assert_eq!(plan.remove, tags(&[("env", "dev"), ("old", "x")]));
        assert_eq!(plan.add, tags(&[("env", "prod"), ("team", "dns")]));
    }

    #[test]
    fn test_plan_ignores_reserved_keys() {
        let plan = TagPlan::new(
            &tags(&[("_sys_owner", "me")]),
            &tags(&[("_sys_enterprise_project_id", "0")]),
        );
        assert!(plan.is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_is_minimal_and_idempotent() {
        let api = MemoryTags::default();
        *api.tags.lock().unwrap() = tags(&[("env", "dev"), ("old", "x"), ("_sys_enterprise_project_id", "0")]);
        let desired = tags(&[("env", "prod"), ("new", "y"), ("_sys_owner", "me")]);
        let ctx = OperationContext::background();

        let actual = api.list(&ctx).await.unwrap();
        let warnings = reconcile(&ctx, &api, &desired, &actual).await.unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].attribute.as_deref(), Some("tags._sys_owner"));
        assert!(*api.calls.lock().unwrap() <= 2);

        let read_back = strip_reserved(&api.list(&ctx).await.unwrap());
        assert_eq!(read_back, strip_reserved(&desired));

        *api.calls.lock().unwrap() = 0;
        let actual = api.list(&ctx).await.unwrap();
        reconcile(&ctx, &api, &desired, &actual).await.unwrap();
        assert_eq!(*api.calls.lock().unwrap(), 0);
    }
}
