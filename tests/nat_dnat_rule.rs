//! DNAT rules: conflict retries and partially created rules.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use common::{tester, vendor, without_nulls, Collection};
use hemmer_provider_otc::quota::QuotaRegistry;
use hemmer_provider_otc::schema::DiagnosticSeverity;
use hemmer_provider_otc::testing::{
    assert_error_contains, assert_no_errors, assert_plan_no_changes, assert_plan_replaces,
};
use serde_json::{json, Value};
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const DNAT: &str = "opentelekomcloud_nat_dnat_rule_v2";

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

fn rule(status: &str) -> Value {
    json!({"dnat_rule": {
        "id": "rule-1",
        "nat_gateway_id": "gw-1",
        "floating_ip_id": "fip-1",
        "floating_ip_address": "80.158.0.1",
        "protocol": "tcp",
        "internal_service_port": 22,
        "external_service_port": 2222,
        "private_ip": "192.168.0.10",
        "port_id": "",
        "status": status,
        "created_at": "2026-10-18 09:00:00.000000",
    }})
}

fn port_in_use() -> ResponseTemplate {
    ResponseTemplate::new(409).set_body_json(json!({
        "error_code": "NAT.0010",
        "error_msg": "port in use",
    }))
}

/// Answer the create with `409 port in use` `conflicts` times, then accept.
async fn mount_create(server: &MockServer, conflicts: u32) -> Arc<AtomicU32> {
    let attempts = Arc::new(AtomicU32::new(0));
    let seen = attempts.clone();
    Mock::given(method("POST"))
        .and(path("/v2.0/dnat_rules"))
        .respond_with(move |_: &Request| {
            let attempt = seen.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= conflicts {
                port_in_use()
            } else {
                ResponseTemplate::new(201).set_body_json(rule("PENDING_CREATE"))
            }
        })
        .mount(server)
        .await;
    attempts
}

async fn mount_rule(server: &MockServer, status: &str) {
    Mock::given(method("GET"))
        .and(path("/v2.0/dnat_rules/rule-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(rule(status)))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_create_retries_port_in_use() {
    let server = vendor().await;
    let attempts = mount_create(&server, 2).await;
    mount_rule(&server, "ACTIVE").await;
    let tester = tester(&server, Arc::new(QuotaRegistry::new())).await;

    let state = tester.lifecycle_create(DNAT, config()).await.unwrap();
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(state["id"], "rule-1");
    assert_eq!(state["status"], "ACTIVE");
    assert_eq!(state["port_id"], Value::Null);
    assert_eq!(state["floating_ip_address"], "80.158.0.1");

    let mut moved = config();
    moved["external_service_port"] = json!(2223);
    let plan = tester.plan_update(DNAT, state, moved).await.unwrap();
    assert_plan_replaces(&plan);
}

#[tokio::test]
async fn test_persistent_conflict_surfaces_vendor_message_once() {
    let server = vendor().await;
    let attempts = mount_create(&server, u32::MAX).await;
    let tester = tester(&server, Arc::new(QuotaRegistry::new())).await;

    let mut config = config();
    config["timeouts"] = json!({"create": "4s"});
    let plan = tester.plan_create(DNAT, config.clone()).await.unwrap();
    let result = tester
        .apply(DNAT, Value::Null, plan.planned_state, config)
        .await
        .unwrap();

    assert!(attempts.load(Ordering::SeqCst) >= 2);
    assert_eq!(result.new_state, Value::Null);
    assert_eq!(result.diagnostics.len(), 1, "{:?}", result.diagnostics);
    assert_error_contains(&result.diagnostics, "port in use");
}

#[tokio::test]
async fn test_rule_that_never_activates_is_kept_with_warning() {
    let server = vendor().await;
    mount_create(&server, 0).await;
    mount_rule(&server, "ERROR").await;
    let tester = tester(&server, Arc::new(QuotaRegistry::new())).await;

    let plan = tester.plan_create(DNAT, config()).await.unwrap();
    let result = tester
        .apply(DNAT, Value::Null, plan.planned_state, config())
        .await
        .unwrap();

    assert_eq!(result.new_state["id"], "rule-1");
    assert_no_errors(&result.diagnostics);
    assert!(result
        .diagnostics
        .iter()
        .any(|d| d.severity == DiagnosticSeverity::Warning && d.summary.contains("rule-1")));
}

#[tokio::test]
async fn test_delete_goes_through_the_gateway() {
    let server = vendor().await;
    Mock::given(method("DELETE"))
        .and(path("/v2.0/nat_gateways/gw-1/dnat_rules/rule-1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2.0/dnat_rules/rule-1"))
        .respond_with(common::not_found("DNAT rule not found"))
        .mount(&server)
        .await;
    let tester = tester(&server, Arc::new(QuotaRegistry::new())).await;

    let mut state = rule("ACTIVE")["dnat_rule"].clone();
    state["region"] = json!("eu-de");
    tester.lifecycle_delete(DNAT, state).await.unwrap();
}

/// Rules held in memory; deletes go through the owning gateway.
async fn mount_rules(server: &MockServer) -> Collection {
    let rules = Collection::new("dnat_rule", "rule", |rule, n| {
        rule["floating_ip_address"] = json!(format!("80.158.0.{}", n));
        rule["status"] = json!("ACTIVE");
        rule["created_at"] = json!("2026-10-18 09:00:00.000000");
    });
    Mock::given(method("POST"))
        .and(path("/v2.0/dnat_rules"))
        .respond_with(rules.create())
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/v2\.0/dnat_rules/[^/]+$"))
        .respond_with(rules.get())
        .mount(server)
        .await;
    Mock::given(method("DELETE"))
        .and(path_regex(r"^/v2\.0/nat_gateways/gw-1/dnat_rules/[^/]+$"))
        .respond_with(rules.delete())
        .mount(server)
        .await;
    rules
}

#[tokio::test]
async fn test_rule_lifecycle_crud_replaces_on_change() {
    let server = vendor().await;
    let rules = mount_rules(&server).await;
    let tester = tester(&server, Arc::new(QuotaRegistry::new())).await;

    let mut moved = config();
    moved["external_service_port"] = json!(2223);
    let updated = tester.lifecycle_crud(DNAT, config(), moved).await.unwrap();

    assert_eq!(updated["id"], "rule-2");
    assert_eq!(updated["external_service_port"], 2223);
    assert_eq!(updated["private_ip"], "192.168.0.10");
    assert_eq!(updated["port_id"], Value::Null);
    assert_eq!(updated["status"], "ACTIVE");
    assert_eq!(rules.len(), 0);
}

#[tokio::test]
async fn test_rule_import_matches_create() {
    let server = vendor().await;
    mount_rules(&server).await;
    let tester = tester(&server, Arc::new(QuotaRegistry::new())).await;

    let created = tester.lifecycle_create(DNAT, config()).await.unwrap();
    let imported = tester.import_resource(DNAT, "rule-1").await.unwrap();
    assert_eq!(imported["floating_ip_address"], "80.158.0.1");
    assert_eq!(without_nulls(&imported), without_nulls(&created));

    let replan = tester.plan_update(DNAT, imported, config()).await.unwrap();
    assert_plan_no_changes(&replan);
}
