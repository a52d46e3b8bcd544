//! Drives resource callbacks for the plan, apply, read and import RPCs.
//!
//! The driver owns the rules shared by every resource: defaults and
//! validation before diffing, dispatch of an apply to create, update or
//! delete, per-operation deadlines, partial-create recovery, not-found
//! handling, and turning errors and panics into diagnostics.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::catalog::RegisteredResource;
use crate::classify::is_not_found;
use crate::client::ClientFactory;
use crate::context::OperationContext;
use crate::error::ProviderError;
use crate::schema::{diff, has_errors, Diagnostic, ResourceData, ResourceDiff, ResourceTimeouts};
use crate::types::{ApplyResult, AttributeChange, PlanResult, ReadResult};
use crate::validation::{apply_defaults, validate as validate_value};

/// The diagnostic reported for a failed operation.
pub fn error_diagnostic(err: &ProviderError) -> Diagnostic {
    Diagnostic::error(err.to_string())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run a callback, turning a panic into an error.
async fn guarded<F>(type_name: &str, operation: &str, fut: F) -> Result<(), ProviderError>
where
    F: Future<Output = Result<(), ProviderError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(resource_type = type_name, operation, panic = %message, "resource callback panicked");
            Err(ProviderError::Sdk(format!(
                "{} {} panicked: {}",
                type_name, operation, message
            )))
        },
    }
}

/// Validate a resource configuration.
pub fn validate(entry: &RegisteredResource, config: &Value) -> Vec<Diagnostic> {
    let mut config = config.clone();
    apply_defaults(entry.schema(), &mut config);
    validate_value(entry.schema(), &config)
}

/// Plan the change from `prior` to `proposed`.
///
/// A null `proposed` plans a destroy. A plan that needs replacement carries
/// the state a fresh create would produce.
pub fn plan(entry: &RegisteredResource, prior: &Value, proposed: &Value) -> PlanResult {
    let schema = entry.schema();
    if proposed.is_null() {
        let destroy = diff(schema, prior, &Value::Null);
        return PlanResult {
            planned_state: Value::Null,
            changes: destroy.changes.into_iter().map(AttributeChange::from).collect(),
            requires_replace: false,
            diagnostics: Vec::new(),
        };
    }

    let mut config = proposed.clone();
    apply_defaults(schema, &mut config);
    let diagnostics = validate_value(schema, &config);
    if has_errors(&diagnostics) {
        return PlanResult::failed(diagnostics);
    }

    let mut custom = ResourceDiff::new(schema, prior, diff(schema, prior, &config));
    if let Err(err) = entry.resource().customize_diff(&mut custom) {
        let mut diagnostics = diagnostics;
        diagnostics.push(error_diagnostic(&err));
        return PlanResult::failed(diagnostics);
    }
    let planned = custom.into_diff();
    let requires_replace = planned.requires_replace();
    let planned_state = if requires_replace {
        diff(schema, &Value::Null, &config).planned
    } else {
        planned.planned
    };

    debug!(
        resource_type = entry.type_name(),
        changes = planned.changes.len(),
        requires_replace,
        "planned"
    );
    PlanResult {
        planned_state,
        changes: planned.changes.into_iter().map(AttributeChange::from).collect(),
        requires_replace,
        diagnostics,
    }
}

/// Apply a planned change.
///
/// A null `prior` creates, a null `planned` deletes, anything else updates.
/// `config` supplies the `timeouts` block; when null the planned or prior
/// state is used instead.
pub async fn apply(
    entry: &RegisteredResource,
    clients: &ClientFactory,
    cancel: &CancellationToken,
    prior: &Value,
    planned: &Value,
    config: &Value,
) -> ApplyResult {
    let timeout_source = if !config.is_null() {
        config
    } else if !planned.is_null() {
        planned
    } else {
        prior
    };
    let timeouts = match entry.timeouts(timeout_source) {
        Ok(timeouts) => timeouts,
        Err(err) => {
            return ApplyResult {
                new_state: prior.clone(),
                diagnostics: vec![error_diagnostic(&err)],
            }
        },
    };

    match (prior.is_null(), planned.is_null()) {
        (true, true) => ApplyResult::ok(Value::Null),
        (true, false) => create(entry, clients, cancel, planned, timeouts).await,
        (false, true) => delete(entry, clients, cancel, prior, timeouts).await,
        (false, false) => update(entry, clients, cancel, prior, planned, timeouts).await,
    }
}

async fn create(
    entry: &RegisteredResource,
    clients: &ClientFactory,
    cancel: &CancellationToken,
    planned: &Value,
    timeouts: ResourceTimeouts,
) -> ApplyResult {
    let type_name = entry.type_name();
    let mut data = ResourceData::new(entry.schema().clone(), Value::Null, planned.clone()).with_timeouts(timeouts);
    let ctx = OperationContext::with_token(timeouts.create, cancel.child_token());
    let outcome = guarded(type_name, "create", entry.resource().create(&ctx, &mut data, clients)).await;

    let mut diagnostics = data.take_warnings();
    let new_state = match outcome {
        Ok(()) if data.id().is_empty() => {
            diagnostics.push(Diagnostic::error(format!(
                "{} create finished without setting an ID",
                type_name
            )));
            Value::Null
        },
        Ok(()) => {
            info!(resource_type = type_name, id = data.id(), "created");
            data.state()
        },
        Err(err) if data.id().is_empty() => {
            warn!(resource_type = type_name, error = %err, "create failed");
            diagnostics.push(error_diagnostic(&err));
            Value::Null
        },
        // The object exists. Keep it in state so the next apply converges.
        Err(err) if matches!(err.root(), ProviderError::DeadlineExceeded(_) | ProviderError::Cancelled(_)) => {
            warn!(resource_type = type_name, id = data.id(), error = %err, "create interrupted after the object was created");
            diagnostics.push(error_diagnostic(&err));
            data.state()
        },
        Err(err) => {
            warn!(resource_type = type_name, id = data.id(), error = %err, "created but not initialised");
            diagnostics.push(
                Diagnostic::warning(format!(
                    "{} {} was created but did not finish initialising",
                    type_name,
                    data.id()
                ))
                .with_detail(err.to_string()),
            );
            data.state()
        },
    };
    ApplyResult {
        new_state,
        diagnostics,
    }
}

async fn update(
    entry: &RegisteredResource,
    clients: &ClientFactory,
    cancel: &CancellationToken,
    prior: &Value,
    planned: &Value,
    timeouts: ResourceTimeouts,
) -> ApplyResult {
    let type_name = entry.type_name();
    let mut data = ResourceData::new(entry.schema().clone(), prior.clone(), planned.clone()).with_timeouts(timeouts);
    if !entry.resource().updatable() {
        return ApplyResult::ok(data.state());
    }

    let id = data.id().to_string();
    let ctx = OperationContext::with_token(timeouts.update, cancel.child_token());
    let outcome = guarded(type_name, "update", entry.resource().update(&ctx, &mut data, clients)).await;

    let mut diagnostics = data.take_warnings();
    let new_state = match outcome {
        Ok(()) if data.id() != id => {
            diagnostics.push(Diagnostic::error(format!(
                "{} update changed the ID from \"{}\" to \"{}\"",
                type_name,
                id,
                data.id()
            )));
            prior.clone()
        },
        Ok(()) => {
            info!(resource_type = type_name, id = %id, "updated");
            data.state()
        },
        Err(err) => {
            warn!(resource_type = type_name, id = %id, error = %err, "update failed");
            diagnostics.push(error_diagnostic(&err));
            prior.clone()
        },
    };
    ApplyResult {
        new_state,
        diagnostics,
    }
}

async fn delete(
    entry: &RegisteredResource,
    clients: &ClientFactory,
    cancel: &CancellationToken,
    prior: &Value,
    timeouts: ResourceTimeouts,
) -> ApplyResult {
    let type_name = entry.type_name();
    let mut data = ResourceData::from_state(entry.schema().clone(), prior.clone()).with_timeouts(timeouts);
    if data.id().is_empty() {
        return ApplyResult::ok(Value::Null);
    }
    let id = data.id().to_string();
    let ctx = OperationContext::with_token(timeouts.delete, cancel.child_token());
    let outcome = guarded(type_name, "delete", entry.resource().delete(&ctx, &mut data, clients)).await;

    let mut diagnostics = data.take_warnings();
    let new_state = match outcome {
        Ok(()) => {
            info!(resource_type = type_name, id = %id, "deleted");
            Value::Null
        },
        Err(err) if is_not_found(&err) => {
            info!(resource_type = type_name, id = %id, "already deleted");
            Value::Null
        },
        Err(err) => {
            warn!(resource_type = type_name, id = %id, error = %err, "delete failed");
            diagnostics.push(error_diagnostic(&err));
            prior.clone()
        },
    };
    ApplyResult {
        new_state,
        diagnostics,
    }
}

/// Refresh stored state. A resource that no longer exists reads as null.
pub async fn read(
    entry: &RegisteredResource,
    clients: &ClientFactory,
    cancel: &CancellationToken,
    state: &Value,
) -> ReadResult {
    if state.is_null() {
        return ReadResult::ok(Value::Null);
    }
    let type_name = entry.type_name();
    let timeouts = entry.timeouts(state).unwrap_or_else(|_| entry.resource().timeouts());
    let mut data = ResourceData::from_state(entry.schema().clone(), state.clone()).with_timeouts(timeouts);
    let id = data.id().to_string();
    let ctx = OperationContext::with_token(timeouts.read, cancel.child_token());
    let outcome = guarded(type_name, "read", entry.resource().read(&ctx, &mut data, clients)).await;

    let mut diagnostics = data.take_warnings();
    let new_state = match outcome {
        Ok(()) => {
            if data.id().is_empty() {
                info!(resource_type = type_name, id = %id, "resource is gone");
            }
            data.state()
        },
        Err(err) if is_not_found(&err) => {
            info!(resource_type = type_name, id = %id, "resource is gone");
            Value::Null
        },
        Err(err) => {
            warn!(resource_type = type_name, id = %id, error = %err, "read failed");
            diagnostics.push(error_diagnostic(&err));
            state.clone()
        },
    };
    ReadResult {
        new_state,
        diagnostics,
    }
}

/// Import an existing object by ID: seed state, then read it.
pub async fn import(
    entry: &RegisteredResource,
    clients: &ClientFactory,
    cancel: &CancellationToken,
    id: &str,
) -> Result<ReadResult, ProviderError> {
    let type_name = entry.type_name();
    let id = id.trim();
    if id.is_empty() {
        return Err(ProviderError::InvalidRequest(format!(
            "cannot import {}: the ID is empty",
            type_name
        )));
    }
    let timeouts = entry.resource().timeouts();
    let mut data = ResourceData::for_import(entry.schema().clone(), id).with_timeouts(timeouts);
    let ctx = OperationContext::with_token(timeouts.read, cancel.child_token());

    guarded(type_name, "import", entry.resource().import(&ctx, &mut data, clients)).await?;
    let read = guarded(type_name, "read", entry.resource().read(&ctx, &mut data, clients)).await;
    match read {
        Ok(()) if !data.id().is_empty() => {},
        Ok(()) => return Err(gone(type_name, id)),
        Err(err) if is_not_found(&err) => return Err(gone(type_name, id)),
        Err(err) => return Err(err),
    }

    info!(resource_type = type_name, id = data.id(), "imported");
    Ok(ReadResult {
        new_state: data.state(),
        diagnostics: data.take_warnings(),
    })
}

fn gone(type_name: &str, id: &str) -> ProviderError {
    ProviderError::NotFound(format!(
        "cannot import {} \"{}\": the object does not exist",
        type_name, id
    ))
}

/// Bring state written by an older schema version up to date.
pub fn upgrade(entry: &RegisteredResource, version: i64, state: Value) -> Result<Value, ProviderError> {
    if state.is_null() {
        return Ok(state);
    }
    let current = entry.schema().version;
    let version = u64::try_from(version)
        .map_err(|_| ProviderError::InvalidRequest(format!("invalid state version {}", version)))?;
    if version > current {
        return Err(ProviderError::FailedPrecondition(format!(
            "state of {} has version {}, newer than schema version {}",
            entry.type_name(),
            version,
            current
        )));
    }
    if version == current {
        return Ok(state);
    }
    match std::panic::catch_unwind(AssertUnwindSafe(|| entry.resource().upgrade_state(version, state))) {
        Ok(result) => result,
        Err(panic) => Err(ProviderError::Sdk(format!(
            "{} upgrade panicked: {}",
            entry.type_name(),
            panic_message(panic.as_ref())
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Environment};
    use crate::resource::Resource;
    use crate::schema::{Attribute, Schema};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// A resource backed by a map, with switches for failure modes.
    #[derive(Default)]
    struct Memory {
        objects: Mutex<HashMap<String, Value>>,
        next: Mutex<u32>,
        fail_after_create: bool,
        panic_on_update: bool,
        change_id_on_update: bool,
    }

    #[async_trait::async_trait]
    impl Resource for Arc<Memory> {
        fn type_name(&self) -> &'static str {
            "test_memory"
        }

        fn schema(&self) -> Schema {
            Schema::new(1)
                .with_attribute("name", Attribute::required_string().with_force_new())
                .with_attribute("size", Attribute::optional_int64().with_default(json!(1)))
                .with_attribute("status", Attribute::computed_string())
                .with_timeouts(&["create", "delete"])
        }

        fn upgrade_state(&self, version: u64, mut state: Value) -> Result<Value, ProviderError> {
            assert_eq!(version, 0);
            if let Some(size) = state.as_object_mut().and_then(|m| m.remove("capacity")) {
                state["size"] = size;
            }
            Ok(state)
        }

        async fn create(
            &self,
            _ctx: &OperationContext,
            data: &mut ResourceData,
            _clients: &ClientFactory,
        ) -> Result<(), ProviderError> {
            let id = {
                let mut next = self.next.lock().unwrap();
                *next += 1;
                format!("m-{}", next)
            };
            self.objects.lock().unwrap().insert(
                id.clone(),
                json!({"name": data.get_str("name"), "size": data.get_i64("size")}),
            );
            data.set_id(&id);
            if self.fail_after_create {
                return Err(ProviderError::Unavailable("never became ACTIVE".to_string()));
            }
            data.set("status", "ACTIVE")
        }

        async fn read(
            &self,
            _ctx: &OperationContext,
            data: &mut ResourceData,
            _clients: &ClientFactory,
        ) -> Result<(), ProviderError> {
            let object = self.objects.lock().unwrap().get(data.id()).cloned();
            let Some(object) = object else {
                return Err(ProviderError::NotFound(data.id().to_string()));
            };
            data.set("name", object["name"].clone())?;
            data.set("size", object["size"].clone())?;
            data.set("status", "ACTIVE")
        }

        async fn update(
            &self,
            _ctx: &OperationContext,
            data: &mut ResourceData,
            _clients: &ClientFactory,
        ) -> Result<(), ProviderError> {
            if self.panic_on_update {
                panic!("size went negative");
            }
            if self.change_id_on_update {
                data.set_id("other");
            }
            if data.has_change("size") {
                let mut objects = self.objects.lock().unwrap();
                if let Some(object) = objects.get_mut(data.id()) {
                    object["size"] = json!(data.get_i64("size"));
                }
            }
            Ok(())
        }

        async fn delete(
            &self,
            _ctx: &OperationContext,
            data: &mut ResourceData,
            _clients: &ClientFactory,
        ) -> Result<(), ProviderError> {
            match self.objects.lock().unwrap().remove(data.id()) {
                Some(_) => Ok(()),
                None => Err(ProviderError::NotFound(data.id().to_string())),
            }
        }
    }

    fn entry(memory: &Arc<Memory>) -> RegisteredResource {
        RegisteredResource::new(Arc::new(memory.clone())).unwrap()
    }

    fn clients() -> ClientFactory {
        let config = Config::resolve(
            &json!({"auth_url": "http://127.0.0.1:9/v3", "region": "eu-de", "token": "t"}),
            &Environment::default(),
        )
        .unwrap();
        ClientFactory::new(config).unwrap()
    }

    async fn create_one(entry: &RegisteredResource, config: Value) -> ApplyResult {
        let plan = plan(entry, &Value::Null, &config);
        assert!(plan.diagnostics.is_empty(), "{:?}", plan.diagnostics);
        apply(
            entry,
            &clients(),
            &CancellationToken::new(),
            &Value::Null,
            &plan.planned_state,
            &config,
        )
        .await
    }

    #[tokio::test]
    async fn test_create_then_replan_is_empty() {
        let memory = Arc::new(Memory::default());
        let entry = entry(&memory);
        let config = json!({"name": "a"});

        let created = create_one(&entry, config.clone()).await;
        assert!(created.diagnostics.is_empty());
        assert_eq!(created.new_state["id"], "m-1");
        assert_eq!(created.new_state["size"], 1);

        let refreshed = read(&entry, &clients(), &CancellationToken::new(), &created.new_state).await;
        assert_eq!(refreshed.new_state, created.new_state);

        let replan = plan(&entry, &refreshed.new_state, &config);
        assert!(replan.is_empty(), "{:?}", replan.changes);
        assert_eq!(replan.planned_state, refreshed.new_state);
    }

    #[tokio::test]
    async fn test_update_in_place_and_replace() {
        let memory = Arc::new(Memory::default());
        let entry = entry(&memory);
        let state = create_one(&entry, json!({"name": "a"})).await.new_state;

        let resize = plan(&entry, &state, &json!({"name": "a", "size": 3}));
        assert!(!resize.requires_replace);
        let updated = apply(
            &entry,
            &clients(),
            &CancellationToken::new(),
            &state,
            &resize.planned_state,
            &json!({"name": "a", "size": 3}),
        )
        .await;
        assert!(updated.diagnostics.is_empty());
        assert_eq!(updated.new_state["size"], 3);
        assert_eq!(memory.objects.lock().unwrap()["m-1"]["size"], 3);

        let rename = plan(&entry, &updated.new_state, &json!({"name": "b", "size": 3}));
        assert!(rename.requires_replace);
        assert!(rename.planned_state.get("id").is_none());
        assert!(rename.changes.iter().any(|c| c.path == "name" && c.requires_replace));
    }

    #[tokio::test]
    async fn test_destroy_plan_and_double_delete() {
        let memory = Arc::new(Memory::default());
        let entry = entry(&memory);
        let state = create_one(&entry, json!({"name": "a"})).await.new_state;

        let destroy = plan(&entry, &state, &Value::Null);
        assert!(destroy.planned_state.is_null());
        assert!(destroy.changes.iter().all(|c| c.after.is_none()));

        for _ in 0..2 {
            let deleted = apply(
                &entry,
                &clients(),
                &CancellationToken::new(),
                &state,
                &Value::Null,
                &Value::Null,
            )
            .await;
            assert!(deleted.diagnostics.is_empty());
            assert!(deleted.new_state.is_null());
        }
    }

    #[tokio::test]
    async fn test_partial_create_keeps_id_with_warning() {
        let memory = Arc::new(Memory {
            fail_after_create: true,
            ..Default::default()
        });
        let entry = entry(&memory);
        let result = create_one(&entry, json!({"name": "a"})).await;
        assert_eq!(result.new_state["id"], "m-1");
        assert!(!result.has_errors());
        assert_eq!(result.diagnostics.len(), 1);
        assert!(result.diagnostics[0].summary.contains("did not finish initialising"));
        assert!(result.diagnostics[0]
            .detail
            .as_deref()
            .unwrap()
            .contains("never became ACTIVE"));
    }

    #[tokio::test]
    async fn test_read_of_missing_object_clears_state() {
        let memory = Arc::new(Memory::default());
        let entry = entry(&memory);
        let state = create_one(&entry, json!({"name": "a"})).await.new_state;
        memory.objects.lock().unwrap().clear();

        let result = read(&entry, &clients(), &CancellationToken::new(), &state).await;
        assert!(result.diagnostics.is_empty());
        assert!(result.new_state.is_null());
    }

    #[tokio::test]
    async fn test_panic_becomes_diagnostic() {
        let memory = Arc::new(Memory {
            panic_on_update: true,
            ..Default::default()
        });
        let entry = entry(&memory);
        let state = create_one(&entry, json!({"name": "a"})).await.new_state;
        let resize = plan(&entry, &state, &json!({"name": "a", "size": 2}));
        let result = apply(
            &entry,
            &clients(),
            &CancellationToken::new(),
            &state,
            &resize.planned_state,
            &json!({"name": "a", "size": 2}),
        )
        .await;
        assert!(result.has_errors());
        assert!(result.diagnostics[0].summary.contains("test_memory update panicked: size went negative"));
        assert_eq!(result.new_state, state);
    }

    #[tokio::test]
    async fn test_update_must_keep_id() {
        let memory = Arc::new(Memory {
            change_id_on_update: true,
            ..Default::default()
        });
        let entry = entry(&memory);
        let state = create_one(&entry, json!({"name": "a"})).await.new_state;
        let resize = plan(&entry, &state, &json!({"name": "a", "size": 2}));
        let result = apply(
            &entry,
            &clients(),
            &CancellationToken::new(),
            &state,
            &resize.planned_state,
            &Value::Null,
        )
        .await;
        assert!(result.has_errors());
        assert_eq!(result.new_state, state);
    }

    #[tokio::test]
    async fn test_import_matches_create() {
        let memory = Arc::new(Memory::default());
        let entry = entry(&memory);
        let created = create_one(&entry, json!({"name": "a", "size": 4})).await.new_state;

        let imported = import(&entry, &clients(), &CancellationToken::new(), "m-1").await.unwrap();
        assert_eq!(imported.new_state, created);

        let err = import(&entry, &clients(), &CancellationToken::new(), "m-9").await.unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
        assert!(import(&entry, &clients(), &CancellationToken::new(), " ").await.is_err());
    }

    #[test]
    fn test_plan_reports_validation_errors() {
        let memory = Arc::new(Memory::default());
        let entry = entry(&memory);
        let result = plan(&entry, &Value::Null, &json!({"size": "big"}));
        assert!(has_errors(&result.diagnostics));
        assert!(result.planned_state.is_null());

        let diags = validate(&entry, &json!({"name": "a", "timeouts": {"create": "soon"}}));
        assert!(has_errors(&diags));
    }

    #[test]
    fn test_upgrade_versions() {
        let memory = Arc::new(Memory::default());
        let entry = entry(&memory);
        let upgraded = upgrade(&entry, 0, json!({"id": "m-1", "name": "a", "capacity": 2})).unwrap();
        assert_eq!(upgraded, json!({"id": "m-1", "name": "a", "size": 2}));

        let current = json!({"id": "m-1", "size": 2});
        assert_eq!(upgrade(&entry, 1, current.clone()).unwrap(), current);
        assert!(matches!(
            upgrade(&entry, 2, current).unwrap_err(),
            ProviderError::FailedPrecondition(_)
        ));
    }
}
