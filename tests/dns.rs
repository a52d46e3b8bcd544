//! DNS zones and record sets against a mock vendor.

mod common;

use std::sync::Arc;

use common::{not_found, token_response, tester, vendor, without_nulls, PROJECT};
use hemmer_provider_otc::quota::QuotaRegistry;
use hemmer_provider_otc::testing::{assert_plan_destroys, assert_plan_no_changes, TestError};
use hemmer_provider_otc::ProviderError;
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ZONE: &str = "opentelekomcloud_dns_zone_v2";
const RECORDSET: &str = "opentelekomcloud_dns_recordset_v2";

fn zone(status: &str) -> Value {
    json!({
        "id": "z-1",
        "name": "example.com.",
        "email": "hostmaster@example.com",
        "ttl": 300,
        "zone_type": "public",
        "status": status,
        "masters": [],
        "routers": [],
    })
}

async fn mount_zone(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v2/zones"))
        .and(body_partial_json(json!({"zone_type": "public", "ttl": 300})))
        .respond_with(ResponseTemplate::new(202).set_body_json(zone("PENDING_CREATE")))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/zones/z-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(zone("ACTIVE")))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v2/{}/DNS-public_zone/z-1/tags", PROJECT)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"tags": []})))
        .mount(server)
        .await;
}

fn recordset(status: &str) -> Value {
    json!({
        "id": "r-1",
        "zone_id": "z-1",
        "name": "a.example.com.",
        "type": "A",
        "records": ["1.2.3.4"],
        "ttl": 300,
        "status": status,
    })
}

#[tokio::test]
async fn test_zone_create_reads_back_canonical_name() {
    let server = vendor().await;
    mount_zone(&server).await;
    let tester = tester(&server, Arc::new(QuotaRegistry::new())).await;

    let config = json!({"name": "example.com", "ttl": 300});
    let state = tester.lifecycle_create(ZONE, config.clone()).await.unwrap();

    assert_eq!(state["id"], "z-1");
    assert_eq!(state["status"], "ACTIVE");
    assert_eq!(state["name"], "example.com.");
    assert_eq!(state["region"], "eu-de");
    assert_eq!(state["tags"], Value::Null);

    let replan = tester.plan_update(ZONE, state, config).await.unwrap();
    assert_plan_no_changes(&replan);
}

#[tokio::test]
async fn test_zone_import_matches_create() {
    let server = vendor().await;
    mount_zone(&server).await;
    let tester = tester(&server, Arc::new(QuotaRegistry::new())).await;

    let config = json!({"name": "example.com.", "email": "hostmaster@example.com"});
    let created = tester.lifecycle_create(ZONE, config.clone()).await.unwrap();
    let imported = tester.import_resource(ZONE, "z-1").await.unwrap();
    assert_eq!(imported["type"], "public");
    assert_eq!(imported["ttl"], 300);
    assert_eq!(without_nulls(&imported), without_nulls(&created));

    let replan = tester.plan_update(ZONE, imported, config).await.unwrap();
    assert_plan_no_changes(&replan);
}

#[tokio::test]
async fn test_private_zone_without_router_is_rejected_at_plan() {
    let server = vendor().await;
    let tester = tester(&server, Arc::new(QuotaRegistry::new())).await;

    let err = tester
        .plan_create(ZONE, json!({"name": "internal.example.", "type": "private"}))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("router"), "{}", err);
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_delete_of_vanished_zone_succeeds_twice() {
    let server = vendor().await;
    Mock::given(method("DELETE"))
        .and(path("/v2/zones/z-1"))
        .respond_with(not_found("Zone not found"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/zones/z-1"))
        .respond_with(not_found("Zone not found"))
        .mount(&server)
        .await;
    let tester = tester(&server, Arc::new(QuotaRegistry::new())).await;

    let state = json!({
        "id": "z-1",
        "name": "example.com.",
        "type": "public",
        "ttl": 300,
        "status": "ACTIVE",
        "region": "eu-de",
    });
    let plan = tester.plan_delete(ZONE, state.clone()).await.unwrap();
    assert_plan_destroys(&plan);

    for _ in 0..2 {
        let deleted = tester
            .apply(ZONE, state.clone(), Value::Null, Value::Null)
            .await
            .unwrap();
        assert!(deleted.diagnostics.is_empty(), "{:?}", deleted.diagnostics);
        assert_eq!(deleted.new_state, Value::Null);
    }
}

#[tokio::test]
async fn test_read_of_vanished_zone_clears_state() {
    let server = vendor().await;
    Mock::given(method("GET"))
        .and(path("/v2/zones/z-1"))
        .respond_with(not_found("Zone not found"))
        .mount(&server)
        .await;
    let tester = tester(&server, Arc::new(QuotaRegistry::new())).await;

    let state = tester
        .read(ZONE, json!({"id": "z-1", "name": "example.com.", "region": "eu-de"}))
        .await
        .unwrap();
    assert_eq!(state, Value::Null);
}

#[tokio::test]
async fn test_expired_token_is_replaced_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v3/auth/tokens"))
        .respond_with(token_response("tok-old"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v3/auth/tokens"))
        .respond_with(token_response("tok-new"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/zones/z-1"))
        .and(header("X-Auth-Token", "tok-old"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "token expired"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/zones/z-1"))
        .and(header("X-Auth-Token", "tok-new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(zone("ACTIVE")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v2/{}/DNS-public_zone/z-1/tags", PROJECT)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"tags": [{"key": "env", "value": "prod"}]})))
        .mount(&server)
        .await;
    let tester = tester(&server, Arc::new(QuotaRegistry::new())).await;

    let state = tester
        .read(ZONE, json!({"id": "z-1", "name": "example.com.", "region": "eu-de"}))
        .await
        .unwrap();
    assert_eq!(state["status"], "ACTIVE");
    assert_eq!(state["tags"], json!({"env": "prod"}));
    assert_eq!(tester.provider().clients().unwrap().tokens_issued(), 2);
}

#[tokio::test]
async fn test_recordset_import_matches_create() {
    let server = vendor().await;
    Mock::given(method("POST"))
        .and(path("/v2/zones/z-1/recordsets"))
        .and(body_partial_json(json!({"type": "A", "records": ["1.2.3.4"]})))
        .respond_with(ResponseTemplate::new(202).set_body_json(recordset("PENDING_CREATE")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/zones/z-1/recordsets/r-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(recordset("ACTIVE")))
        .mount(&server)
        .await;
    let tester = tester(&server, Arc::new(QuotaRegistry::new())).await;

    let config = json!({
        "zone_id": "z-1",
        "name": "a.example.com.",
        "type": "a",
        "records": ["1.2.3.4"],
    });
    let created = tester.lifecycle_create(RECORDSET, config.clone()).await.unwrap();
    assert_eq!(created["id"], "z-1/r-1");

    let imported = tester.import_resource(RECORDSET, "z-1/r-1").await.unwrap();
    assert_eq!(imported["records"], json!(["1.2.3.4"]));
    assert_eq!(imported, created);

    let replan = tester.plan_update(RECORDSET, imported, config).await.unwrap();
    assert_plan_no_changes(&replan);
}

#[tokio::test]
async fn test_recordset_import_rejects_malformed_id() {
    let server = vendor().await;
    let tester = tester(&server, Arc::new(QuotaRegistry::new())).await;

    let err = tester.import_resource(RECORDSET, "r-1").await.unwrap_err();
    assert!(
        matches!(err, TestError::Provider(ProviderError::InvalidRequest(_))),
        "{}",
        err
    );
}
