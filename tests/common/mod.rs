//! Shared setup for the end-to-end tests: a mock vendor API and a provider
//! configured against it.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use hemmer_provider_otc::config::Environment;
use hemmer_provider_otc::quota::QuotaRegistry;
use hemmer_provider_otc::testing::ProviderTester;
use hemmer_provider_otc::{default_catalog, OtcProvider};
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

pub const PROJECT: &str = "p-1";
pub const TOKEN: &str = "tok-1";

/// A mock vendor with a working identity endpoint.
pub async fn vendor() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v3/auth/tokens"))
        .respond_with(token_response(TOKEN))
        .mount(&server)
        .await;
    server
}

pub fn token_response(token: &str) -> ResponseTemplate {
    ResponseTemplate::new(201)
        .insert_header("X-Subject-Token", token)
        .set_body_json(json!({
            "token": {
                "expires_at": "2999-01-01T00:00:00Z",
                "project": {"id": PROJECT},
                "catalog": []
            }
        }))
}

/// Provider block pointing every service at `server`.
pub fn provider_config(server: &MockServer) -> Value {
    let uri = server.uri();
    json!({
        "auth_url": format!("{}/v3", uri),
        "region": "eu-de",
        "token": "t",
        "tenant_id": PROJECT,
        "max_retries": 2,
        "endpoints": {
            "dns": uri,
            "dis": uri,
            "network": uri,
            "vpc": uri,
            "nat": uri,
        },
    })
}

/// A configured provider with its own quota registry.
pub async fn tester(server: &MockServer, quotas: Arc<QuotaRegistry>) -> ProviderTester<OtcProvider> {
    hemmer_provider_otc::try_init_logging();
    let provider = OtcProvider::with_catalog(default_catalog().unwrap(), Environment::default()).with_quotas(quotas);
    let tester = ProviderTester::new(provider);
    tester.configure(provider_config(server)).await.unwrap();
    tester
}

pub fn not_found(message: &str) -> ResponseTemplate {
    ResponseTemplate::new(404).set_body_json(json!({"code": "404", "message": message}))
}

/// `state` without null attributes, recursively.
///
/// Created state records unset attributes as null while imported state may
/// omit them; both mean the same to the host.
pub fn without_nulls(state: &Value) -> Value {
    match state {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), without_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(without_nulls).collect()),
        other => other.clone(),
    }
}

type Complete = dyn Fn(&mut Value, u32) + Send + Sync;

/// An in-memory vendor collection whose objects echo every field they were
/// created or updated with.
///
/// Objects live under `{envelope: {...}}` bodies and are addressed by the
/// last path segment. `complete` fills in what the vendor computes on
/// create.
#[derive(Clone)]
pub struct Collection {
    envelope: &'static str,
    prefix: &'static str,
    objects: Arc<Mutex<BTreeMap<String, Value>>>,
    created: Arc<Mutex<u32>>,
    complete: Arc<Complete>,
}

impl Collection {
    pub fn new(
        envelope: &'static str,
        prefix: &'static str,
        complete: impl Fn(&mut Value, u32) + Send + Sync + 'static,
    ) -> Self {
        Self {
            envelope,
            prefix,
            objects: Arc::new(Mutex::new(BTreeMap::new())),
            created: Arc::new(Mutex::new(0)),
            complete: Arc::new(complete),
        }
    }

    /// Stored object by ID.
    pub fn object(&self, id: &str) -> Option<Value> {
        self.objects.lock().unwrap().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    fn id_of(req: &Request) -> String {
        req.url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or_default()
            .to_string()
    }

    fn fields(&self, req: &Request) -> serde_json::Map<String, Value> {
        serde_json::from_slice::<Value>(&req.body)
            .ok()
            .and_then(|body| body.get(self.envelope).and_then(Value::as_object).cloned())
            .unwrap_or_default()
    }

    fn reply(&self, status: u16, object: Value) -> ResponseTemplate {
        ResponseTemplate::new(status).set_body_json(json!({ (self.envelope): object }))
    }

    /// `POST` on the collection path.
    pub fn create(&self) -> impl Fn(&Request) -> ResponseTemplate + Send + Sync + 'static {
        let this = self.clone();
        move |req: &Request| {
            let n = {
                let mut created = this.created.lock().unwrap();
                *created += 1;
                *created
            };
            let id = format!("{}-{}", this.prefix, n);
            let mut object = Value::Object(this.fields(req));
            object["id"] = json!(id);
            (this.complete)(&mut object, n);
            this.objects.lock().unwrap().insert(id, object.clone());
            this.reply(201, object)
        }
    }

    /// `GET` on an object path.
    pub fn get(&self) -> impl Fn(&Request) -> ResponseTemplate + Send + Sync + 'static {
        let this = self.clone();
        move |req: &Request| match this.object(&Self::id_of(req)) {
            Some(object) => this.reply(200, object),
            None => not_found("resource not found"),
        }
    }

    /// `PUT` on an object path, merging the sent fields.
    pub fn update(&self) -> impl Fn(&Request) -> ResponseTemplate + Send + Sync + 'static {
        let this = self.clone();
        move |req: &Request| {
            let fields = this.fields(req);
            let mut objects = this.objects.lock().unwrap();
            match objects.get_mut(&Self::id_of(req)) {
                Some(object) => {
                    for (key, value) in fields {
                        object[key.as_str()] = value;
                    }
                    this.reply(200, object.clone())
                },
                None => not_found("resource not found"),
            }
        }
    }

    /// `DELETE` on an object path.
    pub fn delete(&self) -> impl Fn(&Request) -> ResponseTemplate + Send + Sync + 'static {
        let this = self.clone();
        move |req: &Request| match this.objects.lock().unwrap().remove(&Self::id_of(req)) {
            Some(_) => ResponseTemplate::new(204),
            None => not_found("resource not found"),
        }
    }
}
