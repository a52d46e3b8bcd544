//! Floating IP allocation under a tight quota.

mod common;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use common::{tester, vendor, without_nulls, Collection};
use hemmer_provider_otc::quota::{QuotaRegistry, FLOATING_IP};
use hemmer_provider_otc::services::floatingip::DEFAULT_POOL;
use hemmer_provider_otc::testing::{assert_plan_no_changes, assert_plan_updates_in_place, book_quotas_for_test};
use serde_json::json;
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const FIP: &str = "opentelekomcloud_networking_floatingip_v2";

/// Neutron mock that hands out addresses and records when each allocation
/// started. Addresses echo every field they were created or updated with.
async fn mount_neutron(server: &MockServer) -> (Collection, Arc<Mutex<Vec<Instant>>>) {
    Mock::given(method("GET"))
        .and(path("/v2.0/networks"))
        .and(query_param("name", DEFAULT_POOL))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"networks": [{"id": "net-ext", "name": DEFAULT_POOL}]})),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2.0/networks/net-ext"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"network": {"id": "net-ext", "name": DEFAULT_POOL}})),
        )
        .mount(server)
        .await;

    let started = Arc::new(Mutex::new(Vec::new()));
    let record = started.clone();
    let fips = Collection::new("floatingip", "fip", move |fip, n| {
        record.lock().unwrap().push(Instant::now());
        if fip.get("floating_ip_address").is_none() {
            fip["floating_ip_address"] = json!(format!("80.158.0.{}", n));
        }
        fip["status"] = json!("DOWN");
    });
    Mock::given(method("POST"))
        .and(path("/v2.0/floatingips"))
        .respond_with(fips.create())
        .mount(server)
        .await;
    let item = r"^/v2\.0/floatingips/fip-\d+$";
    Mock::given(method("GET"))
        .and(path_regex(item))
        .respond_with(fips.get())
        .mount(server)
        .await;
    Mock::given(method("PUT"))
        .and(path_regex(item))
        .respond_with(fips.update())
        .mount(server)
        .await;
    Mock::given(method("DELETE"))
        .and(path_regex(item))
        .respond_with(fips.delete())
        .mount(server)
        .await;
    (fips, started)
}

#[tokio::test]
async fn test_concurrent_allocations_queue_on_quota() {
    let server = vendor().await;
    let (_, started) = mount_neutron(&server).await;
    let quotas = Arc::new(QuotaRegistry::new().with_capacity(FLOATING_IP, 1));
    let tester = tester(&server, quotas.clone()).await;

    let config = json!({"description": "web"});
    let (first, second) = tokio::join!(
        tester.lifecycle_create(FIP, config.clone()),
        tester.lifecycle_create(FIP, config.clone()),
    );
    let first = first.unwrap();
    let second = second.unwrap();

    let mut addresses = vec![
        first["address"].as_str().unwrap().to_string(),
        second["address"].as_str().unwrap().to_string(),
    ];
    addresses.sort();
    assert_eq!(addresses, vec!["80.158.0.1", "80.158.0.2"]);
    assert_eq!(first["pool"], DEFAULT_POOL);

    // Each create holds the quota through its one-second status wait, so
    // the second allocation cannot start until the first has finished.
    let started = started.lock().unwrap().clone();
    assert_eq!(started.len(), 2);
    assert!(started[1].duration_since(started[0]) >= Duration::from_secs(1));

    assert_eq!(quotas.available(FLOATING_IP).unwrap(), 1);
}

#[tokio::test]
async fn test_create_waits_for_quota_held_elsewhere() {
    let server = vendor().await;
    let (_, started) = mount_neutron(&server).await;
    let quotas = Arc::new(QuotaRegistry::new().with_capacity(FLOATING_IP, 1));
    let tester = tester(&server, quotas.clone()).await;

    let booking = book_quotas_for_test(&quotas, &[(FLOATING_IP, 1)]).await.unwrap();
    let create = tester.lifecycle_create(FIP, json!({}));
    tokio::pin!(create);

    let blocked = tokio::time::timeout(Duration::from_millis(300), &mut create).await;
    assert!(blocked.is_err(), "create ran while the quota was held");
    assert!(started.lock().unwrap().is_empty());

    drop(booking);
    let state = create.await.unwrap();
    assert_eq!(state["address"], "80.158.0.1");
    assert_eq!(quotas.available(FLOATING_IP).unwrap(), 1);
}

#[tokio::test]
async fn test_floatingip_lifecycle_crud_is_stable() {
    let server = vendor().await;
    let (fips, _) = mount_neutron(&server).await;
    let tester = tester(&server, Arc::new(QuotaRegistry::new())).await;

    let rebound = json!({"description": "api", "port_id": "port-9", "fixed_ip": "192.168.0.10"});
    let created = tester.lifecycle_create(FIP, json!({"description": "web"})).await.unwrap();
    let plan = tester.plan_update(FIP, created, rebound.clone()).await.unwrap();
    assert_plan_updates_in_place(&plan);

    let updated = tester
        .lifecycle_crud(FIP, json!({"description": "web"}), rebound)
        .await
        .unwrap();

    assert_eq!(updated["id"], "fip-2");
    assert_eq!(updated["description"], "api");
    assert_eq!(updated["port_id"], "port-9");
    assert_eq!(updated["fixed_ip"], "192.168.0.10");
    assert_eq!(updated["pool"], DEFAULT_POOL);
    assert!(fips.object("fip-2").is_none());
    assert_eq!(fips.object("fip-1").unwrap()["description"], "web");
}

#[tokio::test]
async fn test_floatingip_import_matches_create() {
    let server = vendor().await;
    mount_neutron(&server).await;
    let tester = tester(&server, Arc::new(QuotaRegistry::new())).await;

    let config = json!({"description": "web"});
    let created = tester.lifecycle_create(FIP, config.clone()).await.unwrap();
    let imported = tester.import_resource(FIP, "fip-1").await.unwrap();
    assert_eq!(imported["pool"], DEFAULT_POOL);
    assert_eq!(without_nulls(&imported), without_nulls(&created));

    let replan = tester.plan_update(FIP, imported, config).await.unwrap();
    assert_plan_no_changes(&replan);
}
