//! `opentelekomcloud_dis_stream_v2`: Data Ingestion Service streams.
//!
//! Streams are addressed by name; the name is the state ID. Scaling the
//! partition count is the only in-place change besides tags.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use super::{apply_tags, client_for, ignore_not_found, region_attribute, set_tags};
use crate::classify::is_not_found;
use crate::client::{ClientFactory, ServiceClient, ServiceKind};
use crate::context::OperationContext;
use crate::error::{ProviderError, ResultExt};
use crate::resource::Resource;
use crate::schema::{Attribute, ResourceData, ResourceDiff, ResourceTimeouts, Schema};
use crate::tags::{tags_attribute, ResourceTags, TagApi};
use crate::validation::{int_between, string_in};
use crate::waiter::WaitFor;

const SCALING: &str = "SCALING";
const SCALED: &str = "SCALED";

#[derive(Debug, Clone, Deserialize)]
struct Stream {
    stream_name: String,
    #[serde(default)]
    stream_id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    stream_type: String,
    #[serde(default)]
    data_type: String,
    #[serde(default)]
    retention_period: i64,
    #[serde(default)]
    writable_partition_count: i64,
    #[serde(default)]
    readable_partition_count: i64,
}

/// A DIS stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisStream;

fn stream_path(client: &ServiceClient, name: &str) -> String {
    format!("/v2/{}/streams/{}", client.project_id(), name)
}

fn tag_api(client: &ServiceClient, stream_id: &str) -> ResourceTags {
    ResourceTags::new(
        client.clone(),
        format!("/v2/{}/stream/{}/tags", client.project_id(), stream_id),
    )
}

fn create_body(data: &ResourceData) -> Value {
    json!({
        "stream_name": data.get_str("name"),
        "partition_count": data.get_i64("partition_count"),
        "stream_type": data.get_str("stream_type"),
        "data_type": data.get_str("data_type"),
        "data_duration": data.get_i64("retention_period"),
    })
}

async fn get_stream(ctx: &OperationContext, client: &ServiceClient, path: &str) -> Result<Stream, ProviderError> {
    client.get(ctx, path).await
}

#[async_trait::async_trait]
impl Resource for DisStream {
    fn type_name(&self) -> &'static str {
        "opentelekomcloud_dis_stream_v2"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("A Data Ingestion Service stream")
            .with_attribute("name", Attribute::required_string().with_force_new())
            .with_attribute(
                "partition_count",
                Attribute::required_int64()
                    .with_validator(int_between(1, 50))
                    .with_description("Number of partitions; changing it rescales the stream"),
            )
            .with_attribute(
                "stream_type",
                Attribute::optional_string()
                    .with_default(json!("COMMON"))
                    .with_force_new()
                    .with_validator(string_in(&["COMMON", "ADVANCED"])),
            )
            .with_attribute(
                "data_type",
                Attribute::optional_string()
                    .with_default(json!("BLOB"))
                    .with_force_new()
                    .with_validator(string_in(&["BLOB", "JSON", "CSV"])),
            )
            .with_attribute(
                "retention_period",
                Attribute::optional_int64()
                    .with_default(json!(24))
                    .with_force_new()
                    .with_validator(int_between(24, 168))
                    .with_description("Hours records are kept"),
            )
            .with_attribute("tags", tags_attribute())
            .with_attribute("stream_id", Attribute::computed_string())
            .with_attribute("status", Attribute::computed_string())
            .with_attribute("readable_partition_count", Attribute::computed_int64())
            .with_attribute("writable_partition_count", Attribute::computed_int64())
            .with_attribute("region", region_attribute())
            .with_timeouts(&["create", "update", "delete"])
    }

    fn timeouts(&self) -> ResourceTimeouts {
        ResourceTimeouts::default().with_update(Duration::from_secs(20 * 60))
    }

    fn customize_diff(&self, diff: &mut ResourceDiff<'_>) -> Result<(), ProviderError> {
        if diff.has_change("partition_count") {
            let target = diff.get("partition_count");
            diff.set_new("writable_partition_count", target)?;
        }
        Ok(())
    }

    async fn create(
        &self,
        ctx: &OperationContext,
        data: &mut ResourceData,
        clients: &ClientFactory,
    ) -> Result<(), ProviderError> {
        let client = client_for(ctx, data, clients, ServiceKind::Dis).await?;
        let name = data.get_str("name");
        client
            .post::<Value>(ctx, &format!("/v2/{}/streams", client.project_id()), &create_body(data))
            .await
            .with_context(|| format!("creating DIS stream \"{}\"", name))?;
        data.set_id(name.as_str());

        let path = stream_path(&client, &name);
        let stream = WaitFor::new(&["CREATING"], &["RUNNING"])
            .with_delay(Duration::from_secs(3))
            .with_min_interval(Duration::from_secs(2))
            .wait(ctx, "DIS stream", || async {
                let stream = get_stream(ctx, &client, &path).await?;
                let status = stream.status.clone();
                Ok((stream, status))
            })
            .await
            .with_context(|| format!("waiting for DIS stream {} to become RUNNING", name))?
            .ok_or_else(|| ProviderError::NotFound(format!("DIS stream {} disappeared after create", name)))?;

        if !data.get_string_map("tags").is_empty() {
            apply_tags(ctx, data, &tag_api(&client, &stream.stream_id)).await?;
        }
        self.read(ctx, data, clients).await
    }

    async fn read(
        &self,
        ctx: &OperationContext,
        data: &mut ResourceData,
        clients: &ClientFactory,
    ) -> Result<(), ProviderError> {
        let client = client_for(ctx, data, clients, ServiceKind::Dis).await?;
        let name = data.id().to_string();
        let stream = match get_stream(ctx, &client, &stream_path(&client, &name)).await {
            Ok(stream) => stream,
            Err(err) if is_not_found(&err) => {
                data.set_id("");
                return Ok(());
            },
            Err(err) => return Err(err.context(format!("reading DIS stream {}", name))),
        };

        data.set("name", stream.stream_name.as_str())?;
        data.set("stream_id", stream.stream_id.as_str())?;
        data.set("status", stream.status.as_str())?;
        if !stream.stream_type.is_empty() {
            data.set("stream_type", stream.stream_type.as_str())?;
        }
        if !stream.data_type.is_empty() {
            data.set("data_type", stream.data_type.as_str())?;
        }
        if stream.retention_period > 0 {
            data.set("retention_period", stream.retention_period)?;
        }
        data.set("partition_count", stream.writable_partition_count)?;
        data.set("writable_partition_count", stream.writable_partition_count)?;
        data.set("readable_partition_count", stream.readable_partition_count)?;

        let tags = tag_api(&client, &stream.stream_id).list(ctx).await?;
        set_tags(data, &tags)
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        data: &mut ResourceData,
        clients: &ClientFactory,
    ) -> Result<(), ProviderError> {
        let client = client_for(ctx, data, clients, ServiceKind::Dis).await?;
        let name = data.id().to_string();
        let path = stream_path(&client, &name);

        if data.has_change("partition_count") {
            let target = data.get_i64("partition_count");
            client
                .put::<Value>(
                    ctx,
                    &path,
                    &json!({"stream_name": name, "target_partition_count": target}),
                )
                .await
                .with_context(|| format!("scaling DIS stream {} to {} partitions", name, target))?;

            WaitFor::new(&[SCALING], &[SCALED])
                .with_delay(Duration::from_secs(5))
                .with_min_interval(Duration::from_secs(3))
                .wait(ctx, "DIS stream", || async {
                    let stream = get_stream(ctx, &client, &path).await?;
                    let state = if stream.writable_partition_count == target {
                        SCALED
                    } else {
                        SCALING
                    };
                    Ok((stream, state.to_string()))
                })
                .await
                .with_context(|| format!("waiting for DIS stream {} to reach {} partitions", name, target))?;
        }

        if data.has_change("tags") {
            let stream_id = data.get_str("stream_id");
            apply_tags(ctx, data, &tag_api(&client, &stream_id)).await?;
        }
        self.read(ctx, data, clients).await
    }

    async fn delete(
        &self,
        ctx: &OperationContext,
        data: &mut ResourceData,
        clients: &ClientFactory,
    ) -> Result<(), ProviderError> {
        let client = client_for(ctx, data, clients, ServiceKind::Dis).await?;
        let name = data.id().to_string();
        let path = stream_path(&client, &name);

        ignore_not_found(client.delete(ctx, &path).await)
            .with_context(|| format!("deleting DIS stream {}", name))?;
        WaitFor::deleted(&["RUNNING", "TERMINATING"])
            .with_min_interval(Duration::from_secs(2))
            .wait(ctx, "DIS stream", || async {
                let stream = get_stream(ctx, &client, &path).await?;
                let status = stream.status.clone();
                Ok((stream, status))
            })
            .await
            .with_context(|| format!("waiting for DIS stream {} to be deleted", name))?;
        data.set_id("");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::schema::diff;
    use crate::validation::apply_defaults;

    #[test]
    fn test_create_body_uses_defaults() {
        let schema = Arc::new(DisStream.schema());
        let mut config = json!({"name": "clicks", "partition_count": 3});
        apply_defaults(&schema, &mut config);
        let planned = diff(&schema, &Value::Null, &config).planned;
        let data = ResourceData::new(schema, Value::Null, planned);
        assert_eq!(
            create_body(&data),
            json!({
                "stream_name": "clicks",
                "partition_count": 3,
                "stream_type": "COMMON",
                "data_type": "BLOB",
                "data_duration": 24,
            })
        );
    }

    #[test]
    fn test_partition_change_plans_writable_count() {
        let schema = DisStream.schema();
        let prior = json!({
            "id": "clicks",
            "name": "clicks",
            "partition_count": 3,
            "stream_type": "COMMON",
            "data_type": "BLOB",
            "retention_period": 24,
            "stream_id": "s-1",
            "status": "RUNNING",
            "readable_partition_count": 3,
            "writable_partition_count": 3,
            "region": "eu-de",
        });
        let mut config = json!({"name": "clicks", "partition_count": 5});
        apply_defaults(&schema, &mut config);

        let mut custom = ResourceDiff::new(&schema, &prior, diff(&schema, &prior, &config));
        DisStream.customize_diff(&mut custom).unwrap();
        let plan = custom.into_diff();
        assert!(!plan.requires_replace());
        assert_eq!(plan.planned["writable_partition_count"], 5);
        assert!(plan.has_change("writable_partition_count"));
    }
}
