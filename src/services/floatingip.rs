//! `opentelekomcloud_networking_floatingip_v2`: Neutron floating IPs.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{client_for, ignore_not_found, non_empty, region_attribute};
use crate::classify::{is_not_found, retry_on_conflict};
use crate::client::{ClientFactory, ServiceClient, ServiceKind};
use crate::context::OperationContext;
use crate::error::{ProviderError, ResultExt};
use crate::quota::FLOATING_IP;
use crate::resource::Resource;
use crate::schema::{Attribute, ResourceData, Schema};
use crate::validation::string_len_between;
use crate::waiter::WaitFor;

/// Pool used when the configuration names none.
pub const DEFAULT_POOL: &str = "admin_external_net";

#[derive(Debug, Deserialize)]
struct FloatingIpEnvelope {
    floatingip: Fip,
}

#[derive(Debug, Clone, Deserialize)]
struct Fip {
    id: String,
    #[serde(default)]
    floating_network_id: String,
    #[serde(default)]
    floating_ip_address: String,
    #[serde(default)]
    port_id: Option<String>,
    #[serde(default)]
    fixed_ip_address: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct NetworkList {
    #[serde(default)]
    networks: Vec<Network>,
}

#[derive(Debug, Deserialize)]
struct NetworkEnvelope {
    network: Network,
}

#[derive(Debug, Deserialize)]
struct Network {
    id: String,
    #[serde(default)]
    name: String,
}

/// An elastic IP allocated from an external network.
#[derive(Debug, Clone, Copy, Default)]
pub struct FloatingIp;

fn fip_path(id: &str) -> String {
    format!("/v2.0/floatingips/{}", id)
}

/// The external network ID of `pool`.
async fn network_id(ctx: &OperationContext, client: &ServiceClient, pool: &str) -> Result<String, ProviderError> {
    let list: NetworkList = client
        .get_query(ctx, "/v2.0/networks", &[("name", pool)])
        .await
        .with_context(|| format!("looking up floating IP pool \"{}\"", pool))?;
    match list.networks.as_slice() {
        [network] => Ok(network.id.clone()),
        [] => Err(ProviderError::NotFound(format!("floating IP pool \"{}\"", pool))),
        _ => Err(ProviderError::Validation(format!(
            "floating IP pool \"{}\" matches {} networks",
            pool,
            list.networks.len()
        ))),
    }
}

fn create_body(data: &ResourceData, network_id: &str) -> Value {
    let mut fip = Map::new();
    fip.insert("floating_network_id".to_string(), json!(network_id));
    for (attribute, field) in [
        ("address", "floating_ip_address"),
        ("port_id", "port_id"),
        ("fixed_ip", "fixed_ip_address"),
        ("description", "description"),
    ] {
        if let Some(value) = data.get_opt_str(attribute) {
            fip.insert(field.to_string(), json!(value));
        }
    }
    json!({ "floatingip": fip })
}

/// Association body binding the address to `port`.
fn association_body(port: &str, fixed_ip: Option<String>) -> Value {
    let mut fip = json!({"port_id": port});
    if let Some(fixed) = fixed_ip {
        fip["fixed_ip_address"] = json!(fixed);
    }
    json!({ "floatingip": fip })
}

async fn get_fip(ctx: &OperationContext, client: &ServiceClient, id: &str) -> Result<Fip, ProviderError> {
    let envelope: FloatingIpEnvelope = client.get(ctx, &fip_path(id)).await?;
    Ok(envelope.floatingip)
}

#[async_trait::async_trait]
impl Resource for FloatingIp {
    fn type_name(&self) -> &'static str {
        "opentelekomcloud_networking_floatingip_v2"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("A floating IP address")
            .with_attribute(
                "pool",
                Attribute::optional_string()
                    .with_default(json!(DEFAULT_POOL))
                    .with_force_new()
                    .with_description("Name of the external network to allocate from"),
            )
            .with_attribute("floating_network_id", Attribute::computed_string())
            .with_attribute("address", Attribute::optional_computed_string().with_force_new())
            .with_attribute(
                "port_id",
                Attribute::optional_computed_string()
                    .with_description("Port the address is bound to; removing it keeps the current binding"),
            )
            .with_attribute("fixed_ip", Attribute::optional_computed_string())
            .with_attribute(
                "description",
                Attribute::optional_string().with_validator(string_len_between(0, 255)),
            )
            .with_attribute("status", Attribute::computed_string())
            .with_attribute("region", region_attribute())
            .with_timeouts(&["create", "delete"])
    }

    async fn create(
        &self,
        ctx: &OperationContext,
        data: &mut ResourceData,
        clients: &ClientFactory,
    ) -> Result<(), ProviderError> {
        let _booking = clients.quotas().book_one(ctx, FLOATING_IP).await?;
        let client = client_for(ctx, data, clients, ServiceKind::Network).await?;
        let pool = data.get_str("pool");
        let network = network_id(ctx, &client, &pool).await?;

        let body = create_body(data, &network);
        let created: FloatingIpEnvelope = client
            .post(ctx, "/v2.0/floatingips", &body)
            .await
            .with_context(|| format!("allocating floating IP from pool \"{}\"", pool))?;
        let id = created.floatingip.id;
        data.set_id(id.as_str());

        WaitFor::new(&["BUILD", "PENDING_CREATE"], &["ACTIVE", "DOWN"])
            .with_delay(Duration::from_secs(1))
            .with_min_interval(Duration::from_secs(1))
            .wait(ctx, "floating IP", || async {
                let fip = get_fip(ctx, &client, &id).await?;
                let status = fip.status.clone();
                Ok((fip, status))
            })
            .await
            .with_context(|| format!("waiting for floating IP {} to become ACTIVE", id))?;
        self.read(ctx, data, clients).await
    }

    async fn read(
        &self,
        ctx: &OperationContext,
        data: &mut ResourceData,
        clients: &ClientFactory,
    ) -> Result<(), ProviderError> {
        let client = client_for(ctx, data, clients, ServiceKind::Network).await?;
        let id = data.id().to_string();
        let fip = match get_fip(ctx, &client, &id).await {
            Ok(fip) => fip,
            Err(err) if is_not_found(&err) => {
                data.set_id("");
                return Ok(());
            },
            Err(err) => return Err(err.context(format!("reading floating IP {}", id))),
        };

        if data.get_opt_str("pool").is_none() && !fip.floating_network_id.is_empty() {
            let network: NetworkEnvelope = client
                .get(ctx, &format!("/v2.0/networks/{}", fip.floating_network_id))
                .await
                .with_context(|| format!("reading network {}", fip.floating_network_id))?;
            data.set("pool", network.network.name)?;
        }
        data.set("floating_network_id", fip.floating_network_id)?;
        data.set("address", fip.floating_ip_address)?;
        data.set("port_id", non_empty(fip.port_id.as_deref().unwrap_or_default()))?;
        data.set("fixed_ip", non_empty(fip.fixed_ip_address.as_deref().unwrap_or_default()))?;
        data.set("description", non_empty(fip.description.as_deref().unwrap_or_default()))?;
        data.set("status", fip.status)
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        data: &mut ResourceData,
        clients: &ClientFactory,
    ) -> Result<(), ProviderError> {
        let client = client_for(ctx, data, clients, ServiceKind::Network).await?;
        let id = data.id().to_string();
        let path = fip_path(&id);

        // `port_id` is optional+computed: dropping it from the configuration
        // keeps the current binding, so there is no detach here.
        let rebind = data.has_change("port_id") || data.has_change("fixed_ip");
        if let Some(port) = data.get_opt_str("port_id").filter(|_| rebind) {
            let body = association_body(&port, data.get_opt_str("fixed_ip"));
            retry_on_conflict(ctx, "floating IP association", || {
                client.put::<Value>(ctx, &path, &body)
            })
            .await
            .with_context(|| format!("associating floating IP {}", id))?;
        }
        if data.has_change("description") {
            let body = json!({"floatingip": {"description": data.get_str("description")}});
            client
                .put::<Value>(ctx, &path, &body)
                .await
                .with_context(|| format!("updating floating IP {}", id))?;
        }
        self.read(ctx, data, clients).await
    }

    async fn delete(
        &self,
        ctx: &OperationContext,
        data: &mut ResourceData,
        clients: &ClientFactory,
    ) -> Result<(), ProviderError> {
        let client = client_for(ctx, data, clients, ServiceKind::Network).await?;
        let id = data.id().to_string();
        ignore_not_found(client.delete(ctx, &fip_path(&id)).await)
            .with_context(|| format!("releasing floating IP {}", id))?;

        WaitFor::deleted(&["ACTIVE", "DOWN", "PENDING_DELETE"])
            .with_min_interval(Duration::from_secs(1))
            .wait(ctx, "floating IP", || async {
                let fip = get_fip(ctx, &client, &id).await?;
                let status = fip.status.clone();
                Ok((fip, status))
            })
            .await
            .with_context(|| format!("waiting for floating IP {} to be released", id))?;
        data.set_id("");
        Ok(())
    }
}
