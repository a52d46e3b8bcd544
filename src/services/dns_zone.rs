//! `opentelekomcloud_dns_zone_v2`: public and private DNS zones.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use super::{apply_tags, client_for, ignore_not_found, non_empty, region_attribute, set_tags};
use crate::classify::is_not_found;
use crate::client::{ClientFactory, ServiceClient, ServiceKind};
use crate::context::OperationContext;
use crate::error::{ProviderError, ResultExt};
use crate::resource::Resource;
use crate::schema::{
    suppress, Attribute, AttributeFlags, AttributeType, Block, NestedBlock, ResourceData, ResourceDiff, Schema,
};
use crate::tags::{tags_attribute, ResourceTags, TagApi};
use crate::validation::{int_between, string_in, string_len_between};
use crate::waiter::WaitFor;

#[derive(Debug, Clone, Deserialize)]
struct Zone {
    id: String,
    name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    ttl: i64,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    zone_type: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    masters: Vec<String>,
    #[serde(default)]
    routers: Vec<ZoneRouter>,
}

#[derive(Debug, Clone, Deserialize)]
struct ZoneRouter {
    router_id: String,
    #[serde(default)]
    router_region: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RouterRef {
    router_id: String,
    router_region: String,
}

impl RouterRef {
    fn body(&self) -> Value {
        json!({"router_id": self.router_id, "router_region": self.router_region})
    }
}

/// A DNS zone.
#[derive(Debug, Clone, Copy, Default)]
pub struct DnsZone;

fn zone_path(id: &str) -> String {
    format!("/v2/zones/{}", id)
}

fn tag_api(client: &ServiceClient, zone_type: &str, id: &str) -> ResourceTags {
    let kind = if zone_type == "private" {
        "DNS-private_zone"
    } else {
        "DNS-public_zone"
    };
    ResourceTags::new(
        client.clone(),
        format!("/v2/{}/{}/{}/tags", client.project_id(), kind, id),
    )
}

/// Router blocks of a value, defaulting each region to `region`.
fn routers_of(value: &Value, region: &str) -> Vec<RouterRef> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let router_id = item.get("router_id")?.as_str()?.to_string();
                    let router_region = item
                        .get("router_region")
                        .and_then(Value::as_str)
                        .filter(|r| !r.is_empty())
                        .unwrap_or(region)
                        .to_string();
                    Some(RouterRef {
                        router_id,
                        router_region,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

async fn get_zone(ctx: &OperationContext, client: &ServiceClient, id: &str) -> Result<Zone, ProviderError> {
    client.get(ctx, &zone_path(id)).await
}

/// Wait until the zone leaves `pending` for ACTIVE.
async fn wait_active(
    ctx: &OperationContext,
    client: &ServiceClient,
    id: &str,
    pending: &[&str],
) -> Result<(), ProviderError> {
    WaitFor::new(pending, &["ACTIVE"])
        .with_delay(Duration::from_secs(2))
        .with_min_interval(Duration::from_secs(2))
        .wait(ctx, "DNS zone", || async {
            let zone = get_zone(ctx, client, id).await?;
            let status = zone.status.clone();
            Ok((zone, status))
        })
        .await
        .with_context(|| format!("waiting for DNS zone {} to become ACTIVE", id))
        .map(|_| ())
}

async fn associate(
    ctx: &OperationContext,
    client: &ServiceClient,
    id: &str,
    router: &RouterRef,
    action: &str,
) -> Result<(), ProviderError> {
    client
        .post::<Value>(
            ctx,
            &format!("{}/{}", zone_path(id), action),
            &json!({"router": router.body()}),
        )
        .await
        .with_context(|| format!("{} router {} for DNS zone {}", action, router.router_id, id))
        .map(|_| ())
}

#[async_trait::async_trait]
impl Resource for DnsZone {
    fn type_name(&self) -> &'static str {
        "opentelekomcloud_dns_zone_v2"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("A public or private DNS zone")
            .with_attribute(
                "name",
                Attribute::required_string()
                    .with_force_new()
                    .with_diff_suppress(suppress::dns_trailing_dot)
                    .with_description("Zone name, e.g. \"example.com.\""),
            )
            .with_attribute(
                "email",
                Attribute::optional_computed_string().with_description("Administrator email"),
            )
            .with_attribute(
                "type",
                Attribute::optional_string()
                    .with_default(json!("public"))
                    .with_force_new()
                    .with_validator(string_in(&["public", "private"])),
            )
            .with_attribute(
                "ttl",
                Attribute::optional_int64()
                    .with_default(json!(300))
                    .with_validator(int_between(1, 2_147_483_647)),
            )
            .with_attribute(
                "description",
                Attribute::optional_string().with_validator(string_len_between(0, 255)),
            )
            .with_attribute(
                "masters",
                Attribute::new(AttributeType::list(AttributeType::String), AttributeFlags::computed()),
            )
            .with_attribute("status", Attribute::computed_string())
            .with_attribute("region", region_attribute())
            .with_attribute("tags", tags_attribute())
            .with_block(
                "router",
                NestedBlock::set(
                    Block::new()
                        .with_attribute("router_id", Attribute::required_string())
                        .with_attribute("router_region", Attribute::optional_computed_string())
                        .with_description("VPCs a private zone is visible in"),
                ),
            )
            .with_timeouts(&["create", "update", "delete"])
    }

    fn customize_diff(&self, diff: &mut ResourceDiff<'_>) -> Result<(), ProviderError> {
        let private = diff.get("type").as_str() == Some("private");
        let has_routers = diff.get("router").as_array().is_some_and(|r| !r.is_empty());
        match (private, has_routers) {
            (true, false) => Err(ProviderError::Validation(
                "a private zone needs at least one router block".to_string(),
            )),
            (false, true) => Err(ProviderError::Validation(
                "router blocks are only allowed on private zones".to_string(),
            )),
            _ => Ok(()),
        }
    }

    async fn create(
        &self,
        ctx: &OperationContext,
        data: &mut ResourceData,
        clients: &ClientFactory,
    ) -> Result<(), ProviderError> {
        let client = client_for(ctx, data, clients, ServiceKind::Dns).await?;
        let name = data.get_str("name");
        let zone_type = data.get_str("type");
        let routers = routers_of(&data.get("router"), client.region());

        let mut body = json!({
            "name": name,
            "zone_type": zone_type,
            "ttl": data.get_i64("ttl"),
        });
        if let Some(email) = data.get_opt_str("email") {
            body["email"] = json!(email);
        }
        if let Some(description) = data.get_opt_str("description") {
            body["description"] = json!(description);
        }
        if let Some(first) = routers.first() {
            body["router"] = first.body();
        }

        let zone: Zone = client
            .post(ctx, "/v2/zones", &body)
            .await
            .with_context(|| format!("creating DNS zone \"{}\"", name))?;
        data.set_id(&zone.id);

        wait_active(ctx, &client, &zone.id, &["PENDING_CREATE"]).await?;
        for router in routers.iter().skip(1) {
            associate(ctx, &client, &zone.id, router, "associaterouter").await?;
        }
        if !data.get_string_map("tags").is_empty() {
            apply_tags(ctx, data, &tag_api(&client, &zone_type, &zone.id)).await?;
        }
        self.read(ctx, data, clients).await
    }

    async fn read(
        &self,
        ctx: &OperationContext,
        data: &mut ResourceData,
        clients: &ClientFactory,
    ) -> Result<(), ProviderError> {
        let client = client_for(ctx, data, clients, ServiceKind::Dns).await?;
        let id = data.id().to_string();
        let zone = match get_zone(ctx, &client, &id).await {
            Ok(zone) => zone,
            Err(err) if is_not_found(&err) => {
                data.set_id("");
                return Ok(());
            },
            Err(err) => return Err(err.context(format!("reading DNS zone {}", id))),
        };

        data.set("name", zone.name.as_str())?;
        data.set("email", non_empty(&zone.email))?;
        data.set("ttl", zone.ttl)?;
        data.set("description", non_empty(zone.description.as_deref().unwrap_or_default()))?;
        data.set("type", zone.zone_type.as_str())?;
        data.set("status", zone.status.as_str())?;
        data.set("masters", json!(zone.masters))?;

        let routers: Vec<Value> = zone
            .routers
            .iter()
            .map(|r| json!({"router_id": r.router_id, "router_region": r.router_region}))
            .collect();
        data.set("router", if routers.is_empty() { Value::Null } else { Value::Array(routers) })?;

        let tags = tag_api(&client, &zone.zone_type, &id).list(ctx).await?;
        set_tags(data, &tags)
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        data: &mut ResourceData,
        clients: &ClientFactory,
    ) -> Result<(), ProviderError> {
        let client = client_for(ctx, data, clients, ServiceKind::Dns).await?;
        let id = data.id().to_string();

        if data.has_change("email") || data.has_change("ttl") || data.has_change("description") {
            let mut body = json!({
                "ttl": data.get_i64("ttl"),
                "description": data.get_str("description"),
            });
            if let Some(email) = data.get_opt_str("email") {
                body["email"] = json!(email);
            }
            client
                .patch::<Value>(ctx, &zone_path(&id), &body)
                .await
                .with_context(|| format!("updating DNS zone {}", id))?;
            wait_active(ctx, &client, &id, &["PENDING_UPDATE", "ACTIVE"]).await?;
        }

        if data.has_change("router") {
            let (old, new) = data.get_change("router");
            let old = routers_of(&old, client.region());
            let new = routers_of(&new, client.region());
            for router in new.iter().filter(|r| !old.contains(r)) {
                associate(ctx, &client, &id, router, "associaterouter").await?;
            }
            for router in old.iter().filter(|r| !new.contains(r)) {
                associate(ctx, &client, &id, router, "disassociaterouter").await?;
            }
            wait_active(ctx, &client, &id, &["PENDING_UPDATE", "ACTIVE"]).await?;
        }

        if data.has_change("tags") {
            let zone_type = data.get_str("type");
            apply_tags(ctx, data, &tag_api(&client, &zone_type, &id)).await?;
        }
        self.read(ctx, data, clients).await
    }

    async fn delete(
        &self,
        ctx: &OperationContext,
        data: &mut ResourceData,
        clients: &ClientFactory,
    ) -> Result<(), ProviderError> {
        let client = client_for(ctx, data, clients, ServiceKind::Dns).await?;
        let id = data.id().to_string();
        ignore_not_found(client.delete(ctx, &zone_path(&id)).await)
            .with_context(|| format!("deleting DNS zone {}", id))?;

        WaitFor::deleted(&["ACTIVE", "PENDING_DELETE"])
            .with_delay(Duration::from_secs(2))
            .with_min_interval(Duration::from_secs(2))
            .wait(ctx, "DNS zone", || async {
                let zone = get_zone(ctx, &client, &id).await?;
                let status = zone.status.clone();
                Ok((zone, status))
            })
            .await
            .with_context(|| format!("waiting for DNS zone {} to be deleted", id))?;
        data.set_id("");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routers_default_region() {
        let routers = routers_of(
            &json!([{"router_id": "r-1"}, {"router_id": "r-2", "router_region": "eu-nl"}]),
            "eu-de",
        );
        assert_eq!(routers[0].router_region, "eu-de");
        assert_eq!(routers[1].router_region, "eu-nl");
        assert!(routers_of(&Value::Null, "eu-de").is_empty());
    }

    #[test]
    fn test_private_zone_requires_router() {
        let schema = DnsZone.schema();
        let prior = Value::Null;
        let config = json!({"name": "internal.", "type": "private"});
        let mut diff = ResourceDiff::new(&schema, &prior, crate::schema::diff(&schema, &prior, &config));
        assert!(DnsZone.customize_diff(&mut diff).is_err());

        let config = json!({"name": "example.com.", "router": [{"router_id": "r-1"}]});
        let mut diff = ResourceDiff::new(&schema, &prior, crate::schema::diff(&schema, &prior, &config));
        let err = DnsZone.customize_diff(&mut diff).unwrap_err();
        assert!(err.to_string().contains("only allowed on private zones"));
    }
}
