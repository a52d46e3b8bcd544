//! `opentelekomcloud_vpc_v1`: virtual private clouds.

use std::net::Ipv4Addr;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use super::{apply_tags, client_for, ignore_not_found, non_empty, region_attribute, set_tags};
use crate::classify::is_not_found;
use crate::client::{ClientFactory, ServiceClient, ServiceKind};
use crate::context::OperationContext;
use crate::error::{ProviderError, ResultExt};
use crate::quota::ROUTER;
use crate::resource::Resource;
use crate::schema::{suppress, Attribute, ResourceData, Schema};
use crate::tags::{tags_attribute, ResourceTags, TagApi};
use crate::validation::string_len_between;
use crate::waiter::WaitFor;

#[derive(Debug, Deserialize)]
struct VpcEnvelope {
    vpc: VpcBody,
}

#[derive(Debug, Clone, Deserialize)]
struct VpcBody {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    cidr: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    enterprise_project_id: Option<String>,
    #[serde(default)]
    status: String,
}

/// A VPC.
#[derive(Debug, Clone, Copy, Default)]
pub struct Vpc;

fn vpc_path(client: &ServiceClient, id: &str) -> String {
    format!("/v1/{}/vpcs/{}", client.project_id(), id)
}

fn tag_api(client: &ServiceClient, id: &str) -> ResourceTags {
    ResourceTags::new(client.clone(), format!("/v2.0/{}/vpcs/{}/tags", client.project_id(), id))
}

/// Accepts IPv4 CIDR blocks such as `192.168.0.0/16`.
fn ipv4_cidr(value: &Value) -> Result<(), String> {
    let Some(cidr) = value.as_str() else {
        return Ok(());
    };
    let invalid = || format!("\"{}\" is not an IPv4 CIDR block", cidr);
    let (address, prefix) = cidr.split_once('/').ok_or_else(invalid)?;
    address.parse::<Ipv4Addr>().map_err(|_| invalid())?;
    match prefix.parse::<u8>() {
        Ok(bits) if bits <= 32 => Ok(()),
        _ => Err(invalid()),
    }
}

async fn get_vpc(ctx: &OperationContext, client: &ServiceClient, path: &str) -> Result<VpcBody, ProviderError> {
    let envelope: VpcEnvelope = client.get(ctx, path).await?;
    Ok(envelope.vpc)
}

#[async_trait::async_trait]
impl Resource for Vpc {
    fn type_name(&self) -> &'static str {
        "opentelekomcloud_vpc_v1"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("A virtual private cloud")
            .with_attribute(
                "name",
                Attribute::required_string().with_validator(string_len_between(1, 64)),
            )
            .with_attribute(
                "cidr",
                Attribute::required_string()
                    .with_validator(ipv4_cidr)
                    .with_description("Address range of the VPC"),
            )
            .with_attribute(
                "description",
                Attribute::optional_string().with_validator(string_len_between(0, 255)),
            )
            .with_attribute(
                "enterprise_project_id",
                Attribute::optional_computed_string()
                    .with_force_new()
                    .with_diff_suppress(suppress::case_insensitive),
            )
            .with_attribute("tags", tags_attribute())
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
        let _booking = clients.quotas().book_one(ctx, ROUTER).await?;
        let client = client_for(ctx, data, clients, ServiceKind::Vpc).await?;
        let name = data.get_str("name");

        let mut vpc = json!({"name": name, "cidr": data.get_str("cidr")});
        for key in ["description", "enterprise_project_id"] {
            if let Some(value) = data.get_opt_str(key) {
                vpc[key] = json!(value);
            }
        }
        let created: VpcEnvelope = client
            .post(ctx, &format!("/v1/{}/vpcs", client.project_id()), &json!({ "vpc": vpc }))
            .await
            .with_context(|| format!("creating VPC \"{}\"", name))?;
        let id = created.vpc.id;
        data.set_id(id.as_str());

        let path = vpc_path(&client, &id);
        WaitFor::new(&["CREATING"], &["OK"])
            .with_delay(Duration::from_secs(1))
            .with_min_interval(Duration::from_secs(1))
            .wait(ctx, "VPC", || async {
                let vpc = get_vpc(ctx, &client, &path).await?;
                let status = vpc.status.clone();
                Ok((vpc, status))
            })
            .await
            .with_context(|| format!("waiting for VPC {} to become OK", id))?;

        if !data.get_string_map("tags").is_empty() {
            apply_tags(ctx, data, &tag_api(&client, &id)).await?;
        }
        self.read(ctx, data, clients).await
    }

    async fn read(
        &self,
        ctx: &OperationContext,
        data: &mut ResourceData,
        clients: &ClientFactory,
    ) -> Result<(), ProviderError> {
        let client = client_for(ctx, data, clients, ServiceKind::Vpc).await?;
        let id = data.id().to_string();
        let vpc = match get_vpc(ctx, &client, &vpc_path(&client, &id)).await {
            Ok(vpc) => vpc,
            Err(err) if is_not_found(&err) => {
                data.set_id("");
                return Ok(());
            },
            Err(err) => return Err(err.context(format!("reading VPC {}", id))),
        };

        data.set("name", vpc.name)?;
        data.set("cidr", vpc.cidr)?;
        data.set("description", non_empty(vpc.description.as_deref().unwrap_or_default()))?;
        data.set(
            "enterprise_project_id",
            non_empty(vpc.enterprise_project_id.as_deref().unwrap_or_default()),
        )?;
        data.set("status", vpc.status)?;

        let tags = tag_api(&client, &id).list(ctx).await?;
        set_tags(data, &tags)
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        data: &mut ResourceData,
        clients: &ClientFactory,
    ) -> Result<(), ProviderError> {
        let client = client_for(ctx, data, clients, ServiceKind::Vpc).await?;
        let id = data.id().to_string();

        if data.has_change("name") || data.has_change("cidr") || data.has_change("description") {
            let body = json!({"vpc": {
                "name": data.get_str("name"),
                "cidr": data.get_str("cidr"),
                "description": data.get_str("description"),
            }});
            client
                .put::<Value>(ctx, &vpc_path(&client, &id), &body)
                .await
                .with_context(|| format!("updating VPC {}", id))?;
        }
        if data.has_change("tags") {
            apply_tags(ctx, data, &tag_api(&client, &id)).await?;
        }
        self.read(ctx, data, clients).await
    }

    async fn delete(
        &self,
        ctx: &OperationContext,
        data: &mut ResourceData,
        clients: &ClientFactory,
    ) -> Result<(), ProviderError> {
        let client = client_for(ctx, data, clients, ServiceKind::Vpc).await?;
        let id = data.id().to_string();
        let path = vpc_path(&client, &id);

        ignore_not_found(client.delete(ctx, &path).await).with_context(|| format!("deleting VPC {}", id))?;
        WaitFor::deleted(&["OK", "CREATING", "PENDING_DELETE"])
            .with_min_interval(Duration::from_secs(1))
            .wait(ctx, "VPC", || async {
                let vpc = get_vpc(ctx, &client, &path).await?;
                let status = vpc.status.clone();
                Ok((vpc, status))
            })
            .await
            .with_context(|| format!("waiting for VPC {} to be deleted", id))?;
        data.set_id("");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::diff;

    #[test]
    fn test_ipv4_cidr() {
        assert!(ipv4_cidr(&json!("192.168.0.0/16")).is_ok());
        assert!(ipv4_cidr(&json!("10.0.0.0/33")).is_err());
        assert!(ipv4_cidr(&json!("10.0.0.0")).is_err());
        assert!(ipv4_cidr(&json!("fd00::/8")).is_err());
    }

    #[test]
    fn test_enterprise_project_case_does_not_force_replacement() {
        let schema = Vpc.schema();
        let prior = json!({
            "id": "vpc-1",
            "name": "main",
            "cidr": "192.168.0.0/16",
            "enterprise_project_id": "ABC-123",
            "status": "OK",
            "region": "eu-de",
        });
        let config = json!({
            "name": "main",
            "cidr": "192.168.0.0/16",
            "enterprise_project_id": "abc-123",
        });
        assert!(diff(&schema, &prior, &config).is_empty());

        let renamed = json!({"name": "other", "cidr": "192.168.0.0/16"});
        let plan = diff(&schema, &prior, &renamed);
        assert!(plan.has_change("name"));
        assert!(!plan.requires_replace());
    }
}
