//! The Open Telekom Cloud provider: catalog, configuration and dispatch.

use std::sync::{Arc, RwLock};

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::catalog::{default_catalog, Catalog};
use crate::client::ClientFactory;
use crate::config::{Config, Environment, SETTINGS};
use crate::error::ProviderError;
use crate::lifecycle;
use crate::quota::QuotaRegistry;
use crate::schema::{Attribute, AttributeFlags, AttributeType, DefaultFunc, Diagnostic, ProviderSchema, Schema};
use crate::server::ProviderService;
use crate::types::{ApplyResult, ImportResult, ImportedResource, PlanResult, ProviderMetadata, ReadResult, ServerCapabilities};
use crate::validation::validate;

/// The provider served by the plugin binary.
#[derive(Debug)]
pub struct OtcProvider {
    catalog: Catalog,
    env: Environment,
    quotas: Arc<QuotaRegistry>,
    clients: RwLock<Option<ClientFactory>>,
    cancel: CancellationToken,
}

impl OtcProvider {
    /// A provider with every shipped resource, reading the process
    /// environment.
    pub fn new() -> Result<Self, ProviderError> {
        Ok(Self::with_catalog(default_catalog()?, Environment::from_process()))
    }

    /// A provider over an explicit catalog and environment.
    pub fn with_catalog(catalog: Catalog, env: Environment) -> Self {
        Self {
            catalog,
            env,
            quotas: QuotaRegistry::global(),
            clients: RwLock::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Book quotas from `quotas` instead of the process-wide registry.
    pub fn with_quotas(mut self, quotas: Arc<QuotaRegistry>) -> Self {
        self.quotas = quotas;
        self
    }

    /// The registered resource types.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// The configured client factory.
    pub fn clients(&self) -> Result<ClientFactory, ProviderError> {
        let guard = self
            .clients
            .read()
            .map_err(|_| ProviderError::Sdk("client factory lock poisoned".to_string()))?;
        guard
            .clone()
            .ok_or_else(|| ProviderError::FailedPrecondition("the provider has not been configured".to_string()))
    }

    /// Whether `stop` has been called.
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// The provider block schema.
pub fn provider_schema() -> Schema {
    let mut schema = Schema::v0().with_description("Open Telekom Cloud credentials and settings");
    for setting in SETTINGS {
        let mut attr = Attribute::optional_string()
            .with_description(setting.description)
            .with_default_func(DefaultFunc::env(setting.env));
        if setting.sensitive {
            attr = attr.sensitive();
        }
        schema = schema.with_attribute(setting.name, attr);
    }
    schema
        .with_attribute(
            "insecure",
            Attribute::optional_bool()
                .with_default_func(DefaultFunc::env(&["OS_INSECURE"]))
                .with_description("Skip TLS certificate verification"),
        )
        .with_attribute(
            "cloud",
            Attribute::optional_string()
                .with_default_func(DefaultFunc::env(&["OS_CLOUD"]))
                .with_description("Entry in clouds.yaml to read settings from"),
        )
        .with_attribute(
            "max_retries",
            Attribute::optional_int64().with_description("Attempts for transient HTTP failures"),
        )
        .with_attribute(
            "endpoints",
            Attribute::new(AttributeType::map(AttributeType::String), AttributeFlags::optional())
                .with_description("Endpoint overrides keyed by service, e.g. dns"),
        )
}

#[async_trait::async_trait]
impl ProviderService for OtcProvider {
    fn schema(&self) -> ProviderSchema {
        let mut schema = ProviderSchema::new().with_provider_config(provider_schema());
        for (name, resource) in self.catalog.schemas() {
            schema = schema.with_resource(name, resource);
        }
        schema
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            resources: self.catalog.names(),
            capabilities: ServerCapabilities { plan_destroy: true },
        }
    }

    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        Ok(validate(&provider_schema(), &config))
    }

    async fn configure(&self, config: Value, host_version: &str) -> Result<Vec<Diagnostic>, ProviderError> {
        let resolved = Config::resolve(&config, &self.env)?;
        info!(
            region = %resolved.region,
            auth = ?resolved.auth_method(),
            host_version,
            "configuring provider"
        );
        let factory = ClientFactory::new(resolved)?.with_quotas(self.quotas.clone());
        let mut guard = self
            .clients
            .write()
            .map_err(|_| ProviderError::Sdk("client factory lock poisoned".to_string()))?;
        if guard.is_some() {
            warn!("provider configured twice, replacing clients");
        }
        *guard = Some(factory);
        Ok(vec![])
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        info!("cancelling in-flight operations");
        self.cancel.cancel();
        Ok(())
    }

    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let entry = self.catalog.get(resource_type)?;
        Ok(lifecycle::validate(entry, &config))
    }

    async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: i64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        let entry = self.catalog.get(resource_type)?;
        lifecycle::upgrade(entry, version, state)
    }

    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
        _config: Value,
    ) -> Result<PlanResult, ProviderError> {
        let entry = self.catalog.get(resource_type)?;
        Ok(lifecycle::plan(entry, &prior_state, &proposed_state))
    }

    async fn apply(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
        config: Value,
    ) -> Result<ApplyResult, ProviderError> {
        let entry = self.catalog.get(resource_type)?;
        let clients = self.clients()?;
        Ok(lifecycle::apply(entry, &clients, &self.cancel, &prior_state, &planned_state, &config).await)
    }

    async fn read(&self, resource_type: &str, current_state: Value) -> Result<ReadResult, ProviderError> {
        let entry = self.catalog.get(resource_type)?;
        let clients = self.clients()?;
        Ok(lifecycle::read(entry, &clients, &self.cancel, &current_state).await)
    }

    async fn import_resource(&self, resource_type: &str, id: &str) -> Result<ImportResult, ProviderError> {
        let entry = self.catalog.get(resource_type)?;
        let clients = self.clients()?;
        let read = lifecycle::import(entry, &clients, &self.cancel, id).await?;
        Ok(ImportResult {
            imported: vec![ImportedResource::new(resource_type, read.new_state)],
            diagnostics: read.diagnostics,
        })
    }
}
