//! Authenticated vendor clients.
//!
//! A [`ClientFactory`] lives as long as the provider configuration. It
//! authenticates once, shares the token with every [`ServiceClient`] it
//! builds, and builds each (service, region) client at most once.

pub mod auth;
pub mod endpoint;
pub mod signer;

pub use auth::Credential;
pub use endpoint::ServiceKind;
pub use signer::Signer;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info};

use crate::classify::{classify, ApiError, ErrorKind};
use crate::config::{AuthMethod, Config};
use crate::context::OperationContext;
use crate::error::ProviderError;
use crate::quota::QuotaRegistry;
use crate::waiter::Backoff;

const USER_AGENT: &str = concat!("hemmer-provider-otc/", env!("CARGO_PKG_VERSION"));
const PROJECT_HEADER: &str = "X-Project-Id";
const SECURITY_TOKEN_HEADER: &str = "X-Security-Token";

#[derive(Debug)]
struct CachedToken {
    credential: Arc<Credential>,
    generation: u64,
}

/// The shared token, refreshed at most once per expiry or rejection.
#[derive(Debug, Default)]
struct TokenCache {
    slot: RwLock<Option<CachedToken>>,
    generation: AtomicU64,
    issued: AtomicU64,
}

impl TokenCache {
    async fn get(&self, shared: &Shared) -> Result<(Arc<Credential>, u64), ProviderError> {
        {
            let slot = self.slot.read().await;
            if let Some(cached) = slot.as_ref() {
                if !cached.credential.is_stale(chrono::Utc::now()) {
                    return Ok((cached.credential.clone(), cached.generation));
                }
            }
        }

        let mut slot = self.slot.write().await;
        if let Some(cached) = slot.as_ref() {
            if !cached.credential.is_stale(chrono::Utc::now()) {
                return Ok((cached.credential.clone(), cached.generation));
            }
        }
        let credential = Arc::new(auth::authenticate(&shared.http, &shared.config).await?);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.issued.fetch_add(1, Ordering::SeqCst);
        *slot = Some(CachedToken {
            credential: credential.clone(),
            generation,
        });
        Ok((credential, generation))
    }

    /// Drop the token if it is still the one that was rejected.
    async fn invalidate(&self, generation: u64) {
        let mut slot = self.slot.write().await;
        if slot.as_ref().map(|c| c.generation) == Some(generation) {
            info!("token rejected, re-authenticating");
            *slot = None;
        }
    }
}

/// State shared by the factory and every client it hands out.
#[derive(Debug)]
struct Shared {
    config: Config,
    http: reqwest::Client,
    tokens: TokenCache,
    signer: Option<Signer>,
    project_id: OnceCell<String>,
}

type ClientKey = (ServiceKind, String);

/// Builds and caches region-scoped service clients.
#[derive(Debug, Clone)]
pub struct ClientFactory {
    shared: Arc<Shared>,
    clients: Arc<Mutex<HashMap<ClientKey, Arc<OnceCell<ServiceClient>>>>>,
    quotas: Arc<QuotaRegistry>,
}

impl ClientFactory {
    /// A factory for resolved settings. Nothing is sent until a client is
    /// requested.
    pub fn new(config: Config) -> Result<Self, ProviderError> {
        let http = build_http_client(&config)?;
        let signer = match (config.auth_method(), &config.access_key, &config.secret_key) {
            (AuthMethod::AkSk, Some(ak), Some(sk)) => Some(Signer::new(ak, sk)),
            _ => None,
        };
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                http,
                tokens: TokenCache::default(),
                signer,
                project_id: OnceCell::new(),
            }),
            clients: Arc::new(Mutex::new(HashMap::new())),
            quotas: QuotaRegistry::global(),
        })
    }

    /// Book quotas from `quotas` instead of the process-wide registry.
    pub fn with_quotas(mut self, quotas: Arc<QuotaRegistry>) -> Self {
        self.quotas = quotas;
        self
    }

    /// The quota registry resources book from.
    pub fn quotas(&self) -> &QuotaRegistry {
        &self.quotas
    }

    /// The settings this factory was built from.
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// The default region.
    pub fn region(&self) -> &str {
        &self.shared.config.region
    }

    /// How many tokens have been issued so far.
    pub fn tokens_issued(&self) -> u64 {
        self.shared.tokens.issued.load(Ordering::SeqCst)
    }

    /// The client for `kind` in the default region.
    pub async fn service(&self, ctx: &OperationContext, kind: ServiceKind) -> Result<ServiceClient, ProviderError> {
        let region = self.shared.config.region.clone();
        self.service_in(ctx, kind, &region).await
    }

    /// The client for `kind` in `region`, built on first use.
    pub async fn service_in(
        &self,
        ctx: &OperationContext,
        kind: ServiceKind,
        region: &str,
    ) -> Result<ServiceClient, ProviderError> {
        let cell = {
            let mut clients = self
                .clients
                .lock()
                .map_err(|_| ProviderError::Sdk("client cache lock poisoned".to_string()))?;
            clients
                .entry((kind, region.to_string()))
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };
        let client = cell
            .get_or_try_init(|| async {
                let client = self.build(ctx, kind, region).await?;
                debug!(service = %kind, region, endpoint = %client.endpoint, "built service client");
                Ok::<_, ProviderError>(client)
            })
            .await?;
        Ok(client.clone())
    }

    async fn build(&self, ctx: &OperationContext, kind: ServiceKind, region: &str) -> Result<ServiceClient, ProviderError> {
        let config = &self.shared.config;
        let override_url = config.endpoint_override(kind.key());
        let endpoint = if self.shared.signer.is_some() {
            endpoint::resolve(override_url, None, kind, region, true)?
        } else {
            let catalog = match override_url {
                Some(_) => None,
                None => Some(ctx.run(self.shared.tokens.get(&self.shared)).await?.0),
            };
            endpoint::resolve(
                override_url,
                catalog.as_ref().map(|c| c.catalog.as_slice()),
                kind,
                region,
                false,
            )?
        };
        let project_id = self.project_id(ctx).await?;
        Ok(ServiceClient {
            kind,
            region: region.to_string(),
            endpoint,
            project_id,
            shared: self.shared.clone(),
        })
    }

    /// The project ID requests are scoped to.
    pub async fn project_id(&self, ctx: &OperationContext) -> Result<String, ProviderError> {
        let shared = self.shared.clone();
        let id = self
            .shared
            .project_id
            .get_or_try_init(|| async move {
                if let Some(id) = &shared.config.tenant_id {
                    if !shared.config.uses_agency() {
                        return Ok(id.clone());
                    }
                }
                if shared.signer.is_some() {
                    return lookup_project(ctx, &shared).await;
                }
                let (credential, _) = ctx.run(shared.tokens.get(&shared)).await?;
                credential.project_id.clone().ok_or_else(|| {
                    ProviderError::MissingInput("tenant_id (OS_TENANT_ID)".to_string())
                })
            })
            .await?;
        Ok(id.clone())
    }
}

/// Find the project ID by name with a signed identity request.
async fn lookup_project(ctx: &OperationContext, shared: &Arc<Shared>) -> Result<String, ProviderError> {
    let config = &shared.config;
    let name = config
        .tenant_name
        .clone()
        .unwrap_or_else(|| config.region.clone());
    let endpoint = match (config.endpoint_override("identity"), &config.auth_url) {
        (Some(url), _) => url.to_string(),
        (None, Some(url)) => url.trim_end_matches('/').trim_end_matches("/v3").to_string(),
        (None, None) => return Err(ProviderError::MissingInput("auth_url (OS_AUTH_URL)".to_string())),
    };
    let identity = ServiceClient {
        kind: ServiceKind::Identity,
        region: config.region.clone(),
        endpoint,
        project_id: String::new(),
        shared: shared.clone(),
    };

    #[derive(serde::Deserialize)]
    struct Projects {
        projects: Vec<Project>,
    }
    #[derive(serde::Deserialize)]
    struct Project {
        id: String,
    }

    let projects: Projects = identity
        .get_query(ctx, "/v3/projects", &[("name", name.as_str())])
        .await?;
    projects
        .projects
        .into_iter()
        .next()
        .map(|p| p.id)
        .ok_or_else(|| ProviderError::MissingInput(format!("project \"{}\" not found; set tenant_id (OS_TENANT_ID)", name)))
}

fn build_http_client(config: &Config) -> Result<reqwest::Client, ProviderError> {
    let mut builder = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(30));

    if config.insecure {
        builder = builder.danger_accept_invalid_certs(true);
    }
    if let Some(path) = &config.cacert_file {
        let pem = std::fs::read(path)
            .map_err(|e| ProviderError::Configuration(format!("reading cacert_file {}: {}", path, e)))?;
        let cert = reqwest::Certificate::from_pem(&pem)
            .map_err(|e| ProviderError::Configuration(format!("parsing cacert_file {}: {}", path, e)))?;
        builder = builder.add_root_certificate(cert);
    }
    if let (Some(cert), Some(key)) = (&config.cert, &config.key) {
        let mut pem = std::fs::read(cert)
            .map_err(|e| ProviderError::Configuration(format!("reading cert {}: {}", cert, e)))?;
        let key_pem = std::fs::read(key)
            .map_err(|e| ProviderError::Configuration(format!("reading key {}: {}", key, e)))?;
        pem.push(b'\n');
        pem.extend_from_slice(&key_pem);
        let identity = reqwest::Identity::from_pem(&pem)
            .map_err(|e| ProviderError::Configuration(format!("parsing client certificate: {}", e)))?;
        builder = builder.identity(identity);
    }
    builder
        .build()
        .map_err(|e| ProviderError::Configuration(format!("building HTTP client: {}", e)))
}

/// A client for one service in one region.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    kind: ServiceKind,
    region: String,
    endpoint: String,
    project_id: String,
    shared: Arc<Shared>,
}

impl ServiceClient {
    /// The service this client talks to.
    pub fn kind(&self) -> ServiceKind {
        self.kind
    }

    /// The region this client is scoped to.
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Base URL, without trailing slash.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Project the requests are scoped to.
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Absolute URL of `path`.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    /// `GET` and decode.
    pub async fn get<T: DeserializeOwned>(&self, ctx: &OperationContext, path: &str) -> Result<T, ProviderError> {
        let value = self.request(ctx, Method::GET, path, None).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// `GET` with query parameters and decode. Keys and values are
    /// percent-encoded.
    pub async fn get_query<T: DeserializeOwned>(
        &self,
        ctx: &OperationContext,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ProviderError> {
        let url = self.url_with_query(path, query)?;
        let value = self.send(ctx, Method::GET, url, None).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Absolute URL of `path` with `query` appended.
    pub fn url_with_query(&self, path: &str, query: &[(&str, &str)]) -> Result<String, ProviderError> {
        let raw = self.url(path);
        let mut url = reqwest::Url::parse(&raw)
            .map_err(|e| ProviderError::Configuration(format!("invalid URL {}: {}", raw, e)))?;
        url.query_pairs_mut().extend_pairs(query);
        Ok(url.into())
    }

    /// `POST` a JSON body and decode the response.
    pub async fn post<T: DeserializeOwned>(
        &self,
        ctx: &OperationContext,
        path: &str,
        body: &Value,
    ) -> Result<T, ProviderError> {
        let value = self.request(ctx, Method::POST, path, Some(body)).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// `PUT` a JSON body and decode the response.
    pub async fn put<T: DeserializeOwned>(
        &self,
        ctx: &OperationContext,
        path: &str,
        body: &Value,
    ) -> Result<T, ProviderError> {
        let value = self.request(ctx, Method::PUT, path, Some(body)).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// `PATCH` a JSON body and decode the response.
    pub async fn patch<T: DeserializeOwned>(
        &self,
        ctx: &OperationContext,
        path: &str,
        body: &Value,
    ) -> Result<T, ProviderError> {
        let value = self.request(ctx, Method::PATCH, path, Some(body)).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// `DELETE`, ignoring any response body.
    pub async fn delete(&self, ctx: &OperationContext, path: &str) -> Result<(), ProviderError> {
        self.request(ctx, Method::DELETE, path, None).await.map(|_| ())
    }

    /// Send a request and return the JSON response (`null` when empty).
    ///
    /// Transient failures are retried up to `max_retries` within the
    /// context's deadline. A 401 invalidates the token and the request is sent
    /// once more with a fresh one; a second 401 is fatal.
    pub async fn request(
        &self,
        ctx: &OperationContext,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, ProviderError> {
        self.send(ctx, method, self.url(path), body).await
    }

    async fn send(
        &self,
        ctx: &OperationContext,
        method: Method,
        url: String,
        body: Option<&Value>,
    ) -> Result<Value, ProviderError> {
        let body = match body {
            Some(value) => Some(serde_json::to_vec(value)?),
            None => None,
        };
        let max_attempts = self.shared.config.max_retries.max(1);
        let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(5));
        let mut attempt = 0u32;
        let mut reauthenticated = false;

        loop {
            attempt += 1;
            let (request, generation) = self.prepare(ctx, &method, &url, body.as_deref()).await?;
            let started = Instant::now();

            let outcome = ctx
                .run(async {
                    let response = request.send().await?;
                    let status = response.status().as_u16();
                    let text = response.text().await?;
                    Ok::<_, ProviderError>((status, text))
                })
                .await;

            let (status, text) = match outcome {
                Ok(done) => done,
                Err(err) => {
                    if self.should_retry(ctx, &err, attempt, max_attempts, &mut backoff).await {
                        continue;
                    }
                    return Err(err);
                },
            };
            debug!(
                method = %method,
                url = %url,
                status,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "vendor request"
            );

            if (200..300).contains(&status) {
                if text.trim().is_empty() {
                    return Ok(Value::Null);
                }
                return Ok(serde_json::from_str(&text)?);
            }

            let api = ApiError::new(method.as_str(), &url, status, &text);
            if status == 401 {
                if let (Some(generation), false) = (generation, reauthenticated) {
                    self.shared.tokens.invalidate(generation).await;
                    reauthenticated = true;
                    continue;
                }
                return Err(ProviderError::AuthFailed(api.to_string()));
            }

            let err = ProviderError::Api(api);
            if self.should_retry(ctx, &err, attempt, max_attempts, &mut backoff).await {
                continue;
            }
            return Err(err);
        }
    }

    async fn should_retry(
        &self,
        ctx: &OperationContext,
        err: &ProviderError,
        attempt: u32,
        max_attempts: u32,
        backoff: &mut Backoff,
    ) -> bool {
        if classify(err) != ErrorKind::Transient || attempt >= max_attempts {
            return false;
        }
        let delay = backoff.next_delay();
        if ctx.remaining() <= delay {
            return false;
        }
        debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying vendor request");
        ctx.sleep(delay).await.is_ok()
    }

    /// Attach credentials. Returns the token generation used, if any.
    async fn prepare(
        &self,
        ctx: &OperationContext,
        method: &Method,
        url: &str,
        body: Option<&[u8]>,
    ) -> Result<(reqwest::RequestBuilder, Option<u64>), ProviderError> {
        let shared = &self.shared;
        let mut request = shared.http.request(method.clone(), url);
        if let Some(body) = body {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.to_vec());
        }

        if let Some(signer) = &shared.signer {
            let parsed = reqwest::Url::parse(url)
                .map_err(|e| ProviderError::Configuration(format!("invalid URL {}: {}", url, e)))?;
            let host = match parsed.port() {
                Some(port) => format!("{}:{}", parsed.host_str().unwrap_or_default(), port),
                None => parsed.host_str().unwrap_or_default().to_string(),
            };
            let mut headers: Vec<(&str, &str)> = vec![("host", host.as_str())];
            if body.is_some() {
                headers.push(("content-type", "application/json"));
            }
            if !self.project_id.is_empty() {
                headers.push((PROJECT_HEADER, self.project_id.as_str()));
                request = request.header(PROJECT_HEADER, &self.project_id);
            }
            if let Some(token) = &shared.config.security_token {
                headers.push((SECURITY_TOKEN_HEADER, token.as_str()));
                request = request.header(SECURITY_TOKEN_HEADER, token);
            }
            let signature = signer.sign(
                method.as_str(),
                &parsed,
                &headers,
                body.unwrap_or_default(),
                chrono::Utc::now(),
            )?;
            request = request
                .header(signer::DATE_HEADER, signature.date)
                .header(reqwest::header::AUTHORIZATION, signature.authorization);
            return Ok((request, None));
        }

        let (credential, generation) = ctx.run(shared.tokens.get(shared)).await?;
        request = request.header(auth::TOKEN_HEADER, &credential.token);
        Ok((request, Some(generation)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use serde_json::json;
    use wiremock::matchers::{header, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn token_response(token: &str) -> ResponseTemplate {
        ResponseTemplate::new(201)
            .insert_header("X-Subject-Token", token)
            .set_body_json(json!({
                "token": {
                    "expires_at": "2999-01-01T00:00:00Z",
                    "project": {"id": "p-1"},
                    "catalog": []
                }
            }))
    }

    fn factory(server: &MockServer) -> ClientFactory {
        let block = json!({
            "auth_url": format!("{}/v3", server.uri()),
            "region": "eu-de",
            "user_name": "alice",
            "password": "pw",
            "domain_name": "dom",
            "tenant_name": "eu-de",
            "max_retries": 3,
            "endpoints": {"dns": server.uri()},
        });
        ClientFactory::new(Config::resolve(&block, &Environment::default()).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/auth/tokens"))
            .respond_with(token_response("tok-1"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/zones"))
            .and(header("X-Auth-Token", "tok-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"zones": []})))
            .mount(&server)
            .await;

        let factory = factory(&server);
        let ctx = OperationContext::background();
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let factory = factory.clone();
            let ctx = ctx.clone();
            tasks.push(tokio::spawn(async move {
                let dns = factory.service(&ctx, ServiceKind::Dns).await.unwrap();
                dns.get::<Value>(&ctx, "/v2/zones").await.unwrap()
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap(), json!({"zones": []}));
        }
        assert_eq!(factory.tokens_issued(), 1);
    }

    #[tokio::test]
    async fn test_unauthorized_reauthenticates_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/auth/tokens"))
            .respond_with(token_response("tok-1"))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v3/auth/tokens"))
            .respond_with(token_response("tok-2"))
            .with_priority(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/zones/z1"))
            .and(header("X-Auth-Token", "tok-1"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/zones/z1"))
            .and(header("X-Auth-Token", "tok-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "z1"})))
            .mount(&server)
            .await;

        let factory = factory(&server);
        let ctx = OperationContext::background();
        let dns = factory.service(&ctx, ServiceKind::Dns).await.unwrap();
        let zone: Value = dns.get(&ctx, "/v2/zones/z1").await.unwrap();
        assert_eq!(zone["id"], "z1");
        assert_eq!(factory.tokens_issued(), 2);
    }

    #[tokio::test]
    async fn test_second_unauthorized_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/auth/tokens"))
            .respond_with(token_response("tok"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/zones/z1"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "token expired"})))
            .expect(2)
            .mount(&server)
            .await;

        let factory = factory(&server);
        let ctx = OperationContext::background();
        let dns = factory.service(&ctx, ServiceKind::Dns).await.unwrap();
        let err = dns.get::<Value>(&ctx, "/v2/zones/z1").await.unwrap_err();
        assert!(matches!(err, ProviderError::AuthFailed(ref m) if m.contains("token expired")));
    }

    #[tokio::test]
    async fn test_rejected_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/auth/tokens"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {"code": 401, "message": "The request you have made requires authentication."}
            })))
            .mount(&server)
            .await;

        let factory = factory(&server);
        let ctx = OperationContext::background();
        let err = factory.project_id(&ctx).await.unwrap_err();
        assert!(matches!(err, ProviderError::AuthFailed(ref m) if m.contains("requires authentication")));
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/auth/tokens"))
            .respond_with(token_response("tok"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/zones"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/zones"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"zones": []})))
            .with_priority(2)
            .mount(&server)
            .await;

        let factory = factory(&server);
        let ctx = OperationContext::background();
        let dns = factory.service(&ctx, ServiceKind::Dns).await.unwrap();
        let zones: Value = dns.get(&ctx, "/v2/zones").await.unwrap();
        assert_eq!(zones, json!({"zones": []}));
    }

    #[tokio::test]
    async fn test_endpoint_from_catalog() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/auth/tokens"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("X-Subject-Token", "tok")
                    .set_body_json(json!({"token": {
                        "expires_at": "2999-01-01T00:00:00Z",
                        "project": {"id": "p-1"},
                        "catalog": [{"type": "nat", "endpoints": [
                            {"interface": "public", "region": "eu-de", "url": "https://nat.eu-de.otc.t-systems.com/v2.0"}
                        ]}]
                    }})),
            )
            .mount(&server)
            .await;

        let factory = factory(&server);
        let ctx = OperationContext::background();
        let nat = factory.service(&ctx, ServiceKind::Nat).await.unwrap();
        assert_eq!(nat.endpoint(), "https://nat.eu-de.otc.t-systems.com");
        assert_eq!(nat.project_id(), "p-1");

        let err = factory.service(&ctx, ServiceKind::Dis).await.unwrap_err();
        assert!(matches!(err, ProviderError::EndpointNotFound(_)));
    }

    #[tokio::test]
    async fn test_aksk_requests_are_signed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/p-9/vpcs"))
            .and(header_exists("X-Sdk-Date"))
            .and(header_exists("Authorization"))
            .and(header("X-Project-Id", "p-9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"vpcs": []})))
            .expect(1)
            .mount(&server)
            .await;

        let block = json!({
            "region": "eu-de",
            "access_key": "AK",
            "secret_key": "SK",
            "tenant_id": "p-9",
            "endpoints": {"vpc": server.uri()},
        });
        let factory = ClientFactory::new(Config::resolve(&block, &Environment::default()).unwrap()).unwrap();
        let ctx = OperationContext::background();
        let vpc = factory.service(&ctx, ServiceKind::Vpc).await.unwrap();
        let vpcs: Value = vpc.get(&ctx, "/v1/p-9/vpcs").await.unwrap();
        assert_eq!(vpcs, json!({"vpcs": []}));
        assert_eq!(factory.tokens_issued(), 0);
    }

    #[tokio::test]
    async fn test_project_lookup_encodes_the_name() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3/projects"))
            .and(query_param("name", "dev & test #1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"projects": [{"id": "p-7"}]})))
            .expect(1)
            .mount(&server)
            .await;

        let block = json!({
            "region": "eu-de",
            "access_key": "AK",
            "secret_key": "SK",
            "tenant_name": "dev & test #1",
            "endpoints": {"identity": server.uri()},
        });
        let factory = ClientFactory::new(Config::resolve(&block, &Environment::default()).unwrap()).unwrap();
        let ctx = OperationContext::background();
        assert_eq!(factory.project_id(&ctx).await.unwrap(), "p-7");
    }
}
