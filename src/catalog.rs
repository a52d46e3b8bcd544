//! Registry of resource types served by the plugin.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{ProviderError, ResultExt};
use crate::resource::Resource;
use crate::schema::{check_schema, ResourceTimeouts, Schema};
use crate::services::{DisStream, DnatRule, DnsRecordSet, DnsZone, FloatingIp, Vpc};

/// A resource together with its checked schema.
#[derive(Clone)]
pub struct RegisteredResource {
    resource: Arc<dyn Resource>,
    schema: Arc<Schema>,
}

impl fmt::Debug for RegisteredResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredResource")
            .field("type_name", &self.resource.type_name())
            .field("version", &self.schema.version)
            .finish()
    }
}

impl RegisteredResource {
    /// Build the schema of `resource` and check it.
    pub fn new(resource: Arc<dyn Resource>) -> Result<Self, ProviderError> {
        let schema = resource.schema();
        check_schema(&schema, resource.updatable())
            .with_context(|| format!("invalid schema for {}", resource.type_name()))?;
        Ok(Self {
            resource,
            schema: Arc::new(schema),
        })
    }

    /// The configuration type name.
    pub fn type_name(&self) -> &'static str {
        self.resource.type_name()
    }

    /// The resource implementation.
    pub fn resource(&self) -> &dyn Resource {
        self.resource.as_ref()
    }

    /// The checked schema.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Timeouts for a configuration, honouring its `timeouts` block.
    pub fn timeouts(&self, config: &Value) -> Result<ResourceTimeouts, ProviderError> {
        self.resource.timeouts().with_overrides(config)
    }
}

/// Resource types by name.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: BTreeMap<&'static str, RegisteredResource>,
}

impl Catalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource type.
    ///
    /// Fails if the schema breaks a structural rule or the name is taken.
    pub fn register(&mut self, resource: impl Resource) -> Result<(), ProviderError> {
        let entry = RegisteredResource::new(Arc::new(resource))?;
        let name = entry.type_name();
        if self.entries.contains_key(name) {
            return Err(ProviderError::Configuration(format!(
                "resource type {} registered twice",
                name
            )));
        }
        self.entries.insert(name, entry);
        Ok(())
    }

    /// Builder form of [`Catalog::register`].
    pub fn with(mut self, resource: impl Resource) -> Result<Self, ProviderError> {
        self.register(resource)?;
        Ok(self)
    }

    /// Look up a resource type.
    pub fn get(&self, type_name: &str) -> Result<&RegisteredResource, ProviderError> {
        self.entries
            .get(type_name)
            .ok_or_else(|| ProviderError::UnknownResource(type_name.to_string()))
    }

    /// Registered type names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().map(|k| k.to_string()).collect()
    }

    /// Schemas of every registered type.
    pub fn schemas(&self) -> HashMap<String, Schema> {
        self.entries
            .iter()
            .map(|(name, entry)| (name.to_string(), entry.schema.as_ref().clone()))
            .collect()
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Every resource type this provider ships.
pub fn default_catalog() -> Result<Catalog, ProviderError> {
    Catalog::new()
        .with(DnsZone)?
        .with(DnsRecordSet)?
        .with(DisStream)?
        .with(FloatingIp)?
        .with(DnatRule)?
        .with(Vpc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientFactory;
    use crate::context::OperationContext;
    use crate::schema::{Attribute, ResourceData};

    struct Fixed {
        name: &'static str,
        schema: fn() -> Schema,
        updatable: bool,
    }

    #[async_trait::async_trait]
    impl Resource for Fixed {
        fn type_name(&self) -> &'static str {
            self.name
        }

        fn schema(&self) -> Schema {
            (self.schema)()
        }

        fn updatable(&self) -> bool {
            self.updatable
        }

        async fn create(
            &self,
            _ctx: &OperationContext,
            data: &mut ResourceData,
            _clients: &ClientFactory,
        ) -> Result<(), ProviderError> {
            data.set_id("x");
            Ok(())
        }

        async fn read(
            &self,
            _ctx: &OperationContext,
            _data: &mut ResourceData,
            _clients: &ClientFactory,
        ) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn delete(
            &self,
            _ctx: &OperationContext,
            _data: &mut ResourceData,
            _clients: &ClientFactory,
        ) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    fn named() -> Schema {
        Schema::v0().with_attribute("name", Attribute::required_string())
    }

    #[test]
    fn test_default_catalog() {
        let catalog = default_catalog().unwrap();
        assert_eq!(
            catalog.names(),
            vec![
                "opentelekomcloud_dis_stream_v2",
                "opentelekomcloud_dns_recordset_v2",
                "opentelekomcloud_dns_zone_v2",
                "opentelekomcloud_nat_dnat_rule_v2",
                "opentelekomcloud_networking_floatingip_v2",
                "opentelekomcloud_vpc_v1",
            ]
        );
        assert_eq!(catalog.schemas().len(), 6);
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let mut catalog = Catalog::new();
        let fixed = || Fixed {
            name: "test_thing",
            schema: named,
            updatable: true,
        };
        catalog.register(fixed()).unwrap();
        let err = catalog.register(fixed()).unwrap_err();
        assert!(err.to_string().contains("registered twice"));
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_schema_checked_on_register() {
        // Without update, `name` would have to force replacement.
        let err = Catalog::new()
            .with(Fixed {
                name: "test_thing",
                schema: named,
                updatable: false,
            })
            .unwrap_err();
        assert!(err.to_string().starts_with("invalid schema for test_thing: "));
    }

    #[test]
    fn test_unknown_type() {
        let catalog = Catalog::new();
        assert!(catalog.is_empty());
        let err = catalog.get("opentelekomcloud_nope").unwrap_err();
        assert!(matches!(err, ProviderError::UnknownResource(_)));
    }
}
