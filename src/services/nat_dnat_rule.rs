//! `opentelekomcloud_nat_dnat_rule_v2`: DNAT rules on a NAT gateway.
//!
//! Rules cannot be changed in place; every configurable attribute forces a
//! new rule.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{client_for, non_empty, region_attribute};
use crate::classify::{is_not_found, retry_on_conflict};
use crate::client::{ClientFactory, ServiceClient, ServiceKind};
use crate::context::OperationContext;
use crate::error::{ProviderError, ResultExt};
use crate::resource::Resource;
use crate::schema::{Attribute, ResourceData, ResourceDiff, Schema};
use crate::validation::{int_between, string_in};
use crate::waiter::WaitFor;

#[derive(Debug, Deserialize)]
struct RuleEnvelope {
    dnat_rule: Rule,
}

#[derive(Debug, Clone, Deserialize)]
struct Rule {
    id: String,
    #[serde(default)]
    nat_gateway_id: String,
    #[serde(default)]
    floating_ip_id: String,
    #[serde(default)]
    floating_ip_address: String,
    #[serde(default)]
    protocol: String,
    #[serde(default)]
    internal_service_port: i64,
    #[serde(default)]
    external_service_port: i64,
    #[serde(default)]
    port_id: Option<String>,
    #[serde(default)]
    private_ip: Option<String>,
    #[serde(default)]
    status: String,
    #[serde(default)]
    created_at: String,
}

/// A destination NAT rule.
#[derive(Debug, Clone, Copy, Default)]
pub struct DnatRule;

fn rule_path(id: &str) -> String {
    format!("/v2.0/dnat_rules/{}", id)
}

fn create_body(data: &ResourceData) -> Value {
    let mut rule = Map::new();
    for key in ["nat_gateway_id", "floating_ip_id", "protocol", "port_id", "private_ip"] {
        if let Some(value) = data.get_opt_str(key) {
            rule.insert(key.to_string(), json!(value));
        }
    }
    for key in ["internal_service_port", "external_service_port"] {
        rule.insert(key.to_string(), json!(data.get_i64(key)));
    }
    json!({ "dnat_rule": rule })
}

async fn get_rule(ctx: &OperationContext, client: &ServiceClient, id: &str) -> Result<Rule, ProviderError> {
    let envelope: RuleEnvelope = client.get(ctx, &rule_path(id)).await?;
    Ok(envelope.dnat_rule)
}

fn port() -> Attribute {
    Attribute::required_int64()
        .with_force_new()
        .with_validator(int_between(0, 65535))
}

#[async_trait::async_trait]
impl Resource for DnatRule {
    fn type_name(&self) -> &'static str {
        "opentelekomcloud_nat_dnat_rule_v2"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("A DNAT rule forwarding a floating IP port to a private address")
            .with_attribute("nat_gateway_id", Attribute::required_string().with_force_new())
            .with_attribute("floating_ip_id", Attribute::required_string().with_force_new())
            .with_attribute(
                "protocol",
                Attribute::required_string()
                    .with_force_new()
                    .with_validator(string_in(&["tcp", "udp", "any"])),
            )
            .with_attribute("internal_service_port", port())
            .with_attribute("external_service_port", port())
            .with_attribute(
                "port_id",
                Attribute::optional_computed_string()
                    .with_force_new()
                    .with_conflicts_with(&["private_ip"]),
            )
            .with_attribute(
                "private_ip",
                Attribute::optional_computed_string()
                    .with_force_new()
                    .with_conflicts_with(&["port_id"]),
            )
            .with_attribute("floating_ip_address", Attribute::computed_string())
            .with_attribute("status", Attribute::computed_string())
            .with_attribute("created_at", Attribute::computed_string())
            .with_attribute("region", region_attribute())
            .with_timeouts(&["create", "delete"])
    }

    fn updatable(&self) -> bool {
        false
    }

    fn customize_diff(&self, diff: &mut ResourceDiff<'_>) -> Result<(), ProviderError> {
        if !diff.is_new_resource() {
            return Ok(());
        }
        let set = |v: Value| v.as_str().is_some_and(|s| !s.is_empty());
        if !set(diff.get("port_id")) && !set(diff.get("private_ip")) {
            return Err(ProviderError::Validation(
                "one of port_id or private_ip must be set".to_string(),
            ));
        }
        Ok(())
    }

    async fn create(
        &self,
        ctx: &OperationContext,
        data: &mut ResourceData,
        clients: &ClientFactory,
    ) -> Result<(), ProviderError> {
        let client = client_for(ctx, data, clients, ServiceKind::Nat).await?;
        let body = create_body(data);

        // The gateway rejects concurrent rule changes with "port in use".
        let created: RuleEnvelope = retry_on_conflict(ctx, "DNAT rule create", || {
            client.post(ctx, "/v2.0/dnat_rules", &body)
        })
        .await
        .with_context(|| format!("creating DNAT rule on NAT gateway {}", data.get_str("nat_gateway_id")))?;
        let id = created.dnat_rule.id;
        data.set_id(id.as_str());

        WaitFor::new(&["PENDING_CREATE"], &["ACTIVE"])
            .with_delay(Duration::from_secs(2))
            .with_min_interval(Duration::from_secs(2))
            .wait(ctx, "DNAT rule", || async {
                let rule = get_rule(ctx, &client, &id).await?;
                let status = rule.status.clone();
                Ok((rule, status))
            })
            .await
            .with_context(|| format!("waiting for DNAT rule {} to become ACTIVE", id))?;
        self.read(ctx, data, clients).await
    }

    async fn read(
        &self,
        ctx: &OperationContext,
        data: &mut ResourceData,
        clients: &ClientFactory,
    ) -> Result<(), ProviderError> {
        let client = client_for(ctx, data, clients, ServiceKind::Nat).await?;
        let id = data.id().to_string();
        let rule = match get_rule(ctx, &client, &id).await {
            Ok(rule) => rule,
            Err(err) if is_not_found(&err) => {
                data.set_id("");
                return Ok(());
            },
            Err(err) => return Err(err.context(format!("reading DNAT rule {}", id))),
        };

        data.set("nat_gateway_id", rule.nat_gateway_id)?;
        data.set("floating_ip_id", rule.floating_ip_id)?;
        data.set("floating_ip_address", rule.floating_ip_address)?;
        data.set("protocol", rule.protocol)?;
        data.set("internal_service_port", rule.internal_service_port)?;
        data.set("external_service_port", rule.external_service_port)?;
        data.set("port_id", non_empty(rule.port_id.as_deref().unwrap_or_default()))?;
        data.set("private_ip", non_empty(rule.private_ip.as_deref().unwrap_or_default()))?;
        data.set("status", rule.status)?;
        data.set("created_at", rule.created_at)
    }

    async fn delete(
        &self,
        ctx: &OperationContext,
        data: &mut ResourceData,
        clients: &ClientFactory,
    ) -> Result<(), ProviderError> {
        let client = client_for(ctx, data, clients, ServiceKind::Nat).await?;
        let id = data.id().to_string();
        let path = format!("/v2.0/nat_gateways/{}/dnat_rules/{}", data.get_str("nat_gateway_id"), id);

        let deleted = retry_on_conflict(ctx, "DNAT rule delete", || client.delete(ctx, &path)).await;
        match deleted {
            Err(err) if !is_not_found(&err) => {
                return Err(err.context(format!("deleting DNAT rule {}", id)));
            },
            _ => {},
        }

        WaitFor::deleted(&["ACTIVE", "PENDING_DELETE"])
            .with_min_interval(Duration::from_secs(2))
            .wait(ctx, "DNAT rule", || async {
                let rule = get_rule(ctx, &client, &id).await?;
                let status = rule.status.clone();
                Ok((rule, status))
            })
            .await
            .with_context(|| format!("waiting for DNAT rule {} to be deleted", id))?;
        data.set_id("");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::schema::{check_schema, diff};

    fn config() -> Value {
        json!({
            "nat_gateway_id": "gw-1",
            "floating_ip_id": "fip-1",
            "protocol": "tcp",
            "internal_service_port": 22,
            "external_service_port": 2222,
            "private_ip": "192.168.0.10",
        })
    }

    #[test]
    fn test_every_attribute_forces_replacement() {
        check_schema(&DnatRule.schema(), false).unwrap();
    }

    #[test]
    fn test_requires_a_target() {
        let schema = DnatRule.schema();
        let prior = Value::Null;
        let mut config = config();
        config.as_object_mut().unwrap().remove("private_ip");
        let mut custom = ResourceDiff::new(&schema, &prior, diff(&schema, &prior, &config));
        let err = DnatRule.customize_diff(&mut custom).unwrap_err();
        assert!(err.to_string().contains("port_id or private_ip"));
    }

    #[test]
    fn test_create_body() {
        let data = ResourceData::new(Arc::new(DnatRule.schema()), Value::Null, config());
        assert_eq!(
            create_body(&data),
            json!({"dnat_rule": {
                "nat_gateway_id": "gw-1",
                "floating_ip_id": "fip-1",
                "protocol": "tcp",
                "private_ip": "192.168.0.10",
                "internal_service_port": 22,
                "external_service_port": 2222,
            }})
        );
    }
}
