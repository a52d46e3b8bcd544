//! Resource mappings onto Open Telekom Cloud APIs.

pub mod dis_stream;
pub mod dns_recordset;
pub mod dns_zone;
pub mod floatingip;
pub mod nat_dnat_rule;
pub mod vpc;

pub use dis_stream::DisStream;
pub use dns_recordset::DnsRecordSet;
pub use dns_zone::DnsZone;
pub use floatingip::FloatingIp;
pub use nat_dnat_rule::DnatRule;
pub use vpc::Vpc;

use serde_json::Value;

use crate::classify::is_not_found;
use crate::client::{ClientFactory, ServiceClient, ServiceKind};
use crate::context::OperationContext;
use crate::error::ProviderError;
use crate::schema::{Attribute, ResourceData};
use crate::tags::{self, TagApi, Tags};

/// The `region` attribute every resource carries.
pub(crate) fn region_attribute() -> Attribute {
    Attribute::optional_computed_string()
        .with_force_new()
        .with_description("Region of the resource; defaults to the provider region")
}

/// The region an operation targets, recording the default when unset.
pub(crate) fn resolve_region(data: &mut ResourceData, clients: &ClientFactory) -> Result<String, ProviderError> {
    match data.get_opt_str("region") {
        Some(region) => Ok(region),
        None => {
            let region = clients.region().to_string();
            data.set("region", region.as_str())?;
            Ok(region)
        },
    }
}

/// The client for `kind` in the resource's region.
pub(crate) async fn client_for(
    ctx: &OperationContext,
    data: &mut ResourceData,
    clients: &ClientFactory,
    kind: ServiceKind,
) -> Result<ServiceClient, ProviderError> {
    let region = resolve_region(data, clients)?;
    clients.service_in(ctx, kind, &region).await
}

/// Treat "already gone" as success.
pub(crate) fn ignore_not_found(result: Result<(), ProviderError>) -> Result<(), ProviderError> {
    match result {
        Err(err) if is_not_found(&err) => Ok(()),
        other => other,
    }
}

/// A string for state, null when empty.
pub(crate) fn non_empty(value: &str) -> Value {
    if value.is_empty() {
        Value::Null
    } else {
        Value::String(value.to_string())
    }
}

/// Record tags read from the vendor, without reserved keys.
pub(crate) fn set_tags(data: &mut ResourceData, actual: &Tags) -> Result<(), ProviderError> {
    let visible = tags::strip_reserved(actual);
    if visible.is_empty() {
        return data.set("tags", Value::Null);
    }
    data.set("tags", serde_json::to_value(visible)?)
}

/// Bring the vendor's tags in line with the `tags` attribute.
pub(crate) async fn apply_tags(
    ctx: &OperationContext,
    data: &mut ResourceData,
    api: &dyn TagApi,
) -> Result<(), ProviderError> {
    let desired = data.get_string_map("tags");
    let actual = api.list(ctx).await?;
    for warning in tags::reconcile(ctx, api, &desired, &actual).await? {
        data.add_warning(warning);
    }
    Ok(())
}
