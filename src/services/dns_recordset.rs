//! `opentelekomcloud_dns_recordset_v2`: record sets inside a DNS zone.
//!
//! The state ID is `<zone_id>/<recordset_id>`, which is also the import ID.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use super::{client_for, ignore_not_found, non_empty, region_attribute};
use crate::classify::is_not_found;
use crate::client::{ClientFactory, ServiceClient, ServiceKind};
use crate::context::OperationContext;
use crate::error::{ProviderError, ResultExt};
use crate::import::{composite_id, parse_composite_id};
use crate::resource::Resource;
use crate::schema::{suppress, Attribute, AttributeFlags, AttributeType, ResourceData, Schema};
use crate::validation::{int_between, string_len_between};
use crate::waiter::WaitFor;

const RECORD_TYPES: &[&str] = &["A", "AAAA", "MX", "CNAME", "TXT", "NS", "SRV", "CAA", "PTR"];

#[derive(Debug, Clone, Deserialize)]
struct RecordSet {
    id: String,
    name: String,
    #[serde(rename = "type")]
    record_type: String,
    #[serde(default)]
    records: Vec<String>,
    #[serde(default)]
    ttl: i64,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    status: String,
    #[serde(default)]
    zone_id: String,
}

/// A record set in a DNS zone.
#[derive(Debug, Clone, Copy, Default)]
pub struct DnsRecordSet;

fn split_id(id: &str) -> Result<(String, String), ProviderError> {
    let [zone, recordset] = parse_composite_id(id, ["zone_id", "recordset_id"])?;
    Ok((zone, recordset))
}

fn recordset_path(zone: &str, recordset: &str) -> String {
    format!("/v2/zones/{}/recordsets/{}", zone, recordset)
}

fn record_type(value: &Value) -> Result<(), String> {
    match value.as_str() {
        Some(t) if !RECORD_TYPES.iter().any(|known| known.eq_ignore_ascii_case(t)) => Err(format!(
            "expected one of [{}], got \"{}\"",
            RECORD_TYPES.join(", "),
            t
        )),
        _ => Ok(()),
    }
}

fn records_not_empty(value: &Value) -> Result<(), String> {
    match value.as_array() {
        Some(items) if items.is_empty() => Err("at least one record is required".to_string()),
        _ => Ok(()),
    }
}

async fn get_recordset(ctx: &OperationContext, client: &ServiceClient, path: &str) -> Result<RecordSet, ProviderError> {
    client.get(ctx, path).await
}

async fn wait_active(ctx: &OperationContext, client: &ServiceClient, path: &str) -> Result<(), ProviderError> {
    WaitFor::new(&["PENDING_CREATE", "PENDING_UPDATE"], &["ACTIVE"])
        .with_delay(Duration::from_secs(1))
        .with_min_interval(Duration::from_secs(1))
        .wait(ctx, "DNS record set", || async {
            let recordset = get_recordset(ctx, client, path).await?;
            let status = recordset.status.clone();
            Ok((recordset, status))
        })
        .await
        .map(|_| ())
}

#[async_trait::async_trait]
impl Resource for DnsRecordSet {
    fn type_name(&self) -> &'static str {
        "opentelekomcloud_dns_recordset_v2"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("A record set in a DNS zone")
            .with_attribute("zone_id", Attribute::required_string().with_force_new())
            .with_attribute(
                "name",
                Attribute::required_string()
                    .with_force_new()
                    .with_diff_suppress(suppress::dns_trailing_dot),
            )
            .with_attribute(
                "type",
                Attribute::required_string()
                    .with_force_new()
                    .with_validator(record_type)
                    .with_diff_suppress(suppress::case_insensitive),
            )
            .with_attribute(
                "records",
                Attribute::new(AttributeType::list(AttributeType::String), AttributeFlags::required())
                    .with_validator(records_not_empty)
                    .with_diff_suppress(suppress::order_insensitive)
                    .with_description("Record values; order is not significant"),
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
            .with_attribute("status", Attribute::computed_string())
            .with_attribute("region", region_attribute())
            .with_timeouts(&["create", "update", "delete"])
    }

    async fn create(
        &self,
        ctx: &OperationContext,
        data: &mut ResourceData,
        clients: &ClientFactory,
    ) -> Result<(), ProviderError> {
        let client = client_for(ctx, data, clients, ServiceKind::Dns).await?;
        let zone_id = data.get_str("zone_id");
        let name = data.get_str("name");

        let mut body = json!({
            "name": name,
            "type": data.get_str("type").to_uppercase(),
            "records": data.get_string_list("records"),
            "ttl": data.get_i64("ttl"),
        });
        if let Some(description) = data.get_opt_str("description") {
            body["description"] = json!(description);
        }

        let recordset: RecordSet = client
            .post(ctx, &format!("/v2/zones/{}/recordsets", zone_id), &body)
            .await
            .with_context(|| format!("creating DNS record set \"{}\" in zone {}", name, zone_id))?;
        data.set_id(composite_id(&[&zone_id, &recordset.id]));

        let path = recordset_path(&zone_id, &recordset.id);
        wait_active(ctx, &client, &path)
            .await
            .with_context(|| format!("waiting for DNS record set {} to become ACTIVE", recordset.id))?;
        self.read(ctx, data, clients).await
    }

    async fn read(
        &self,
        ctx: &OperationContext,
        data: &mut ResourceData,
        clients: &ClientFactory,
    ) -> Result<(), ProviderError> {
        let (zone_id, recordset_id) = split_id(data.id())?;
        let client = client_for(ctx, data, clients, ServiceKind::Dns).await?;
        let recordset = match get_recordset(ctx, &client, &recordset_path(&zone_id, &recordset_id)).await {
            Ok(recordset) => recordset,
            Err(err) if is_not_found(&err) => {
                data.set_id("");
                return Ok(());
            },
            Err(err) => return Err(err.context(format!("reading DNS record set {}", recordset_id))),
        };

        let zone = if recordset.zone_id.is_empty() {
            zone_id
        } else {
            recordset.zone_id
        };
        data.set("zone_id", zone)?;
        data.set("name", recordset.name)?;
        data.set("type", recordset.record_type)?;
        data.set("records", json!(recordset.records))?;
        data.set("ttl", recordset.ttl)?;
        data.set("description", non_empty(recordset.description.as_deref().unwrap_or_default()))?;
        data.set("status", recordset.status)
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        data: &mut ResourceData,
        clients: &ClientFactory,
    ) -> Result<(), ProviderError> {
        let (zone_id, recordset_id) = split_id(data.id())?;
        let client = client_for(ctx, data, clients, ServiceKind::Dns).await?;
        let path = recordset_path(&zone_id, &recordset_id);

        if data.has_change("records") || data.has_change("ttl") || data.has_change("description") {
            let body = json!({
                "records": data.get_string_list("records"),
                "ttl": data.get_i64("ttl"),
                "description": data.get_str("description"),
            });
            client
                .put::<Value>(ctx, &path, &body)
                .await
                .with_context(|| format!("updating DNS record set {}", recordset_id))?;
            wait_active(ctx, &client, &path)
                .await
                .with_context(|| format!("waiting for DNS record set {} to become ACTIVE", recordset_id))?;
        }
        self.read(ctx, data, clients).await
    }

    async fn delete(
        &self,
        ctx: &OperationContext,
        data: &mut ResourceData,
        clients: &ClientFactory,
    ) -> Result<(), ProviderError> {
        let (zone_id, recordset_id) = split_id(data.id())?;
        let client = client_for(ctx, data, clients, ServiceKind::Dns).await?;
        let path = recordset_path(&zone_id, &recordset_id);

        ignore_not_found(client.delete(ctx, &path).await)
            .with_context(|| format!("deleting DNS record set {}", recordset_id))?;
        WaitFor::deleted(&["ACTIVE", "PENDING_DELETE"])
            .with_delay(Duration::from_secs(1))
            .with_min_interval(Duration::from_secs(1))
            .wait(ctx, "DNS record set", || async {
                let recordset = get_recordset(ctx, &client, &path).await?;
                let status = recordset.status.clone();
                Ok((recordset, status))
            })
            .await
            .with_context(|| format!("waiting for DNS record set {} to be deleted", recordset_id))?;
        data.set_id("");
        Ok(())
    }

    async fn import(
        &self,
        _ctx: &OperationContext,
        data: &mut ResourceData,
        _clients: &ClientFactory,
    ) -> Result<(), ProviderError> {
        let (zone_id, _) = split_id(data.id())?;
        data.set("zone_id", zone_id)
    }
}
