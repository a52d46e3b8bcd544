//! Keystone v3 token exchange.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::endpoint::CatalogEntry;
use crate::classify::ApiError;
use crate::config::{AuthMethod, Config};
use crate::error::ProviderError;

/// Header carrying a token on requests.
pub const TOKEN_HEADER: &str = "X-Auth-Token";
/// Header carrying the issued token on `POST /auth/tokens`.
pub const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";

/// A token is refreshed this long before it expires.
const EXPIRY_MARGIN_MINUTES: i64 = 5;

/// A scoped token with its catalog.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// The token itself.
    pub token: String,
    /// When the token stops working, if the identity service said so.
    pub expires_at: Option<DateTime<Utc>>,
    /// Project the token is scoped to.
    pub project_id: Option<String>,
    /// Service catalog.
    pub catalog: Vec<CatalogEntry>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("expires_at", &self.expires_at)
            .field("project_id", &self.project_id)
            .field("catalog_entries", &self.catalog.len())
            .finish_non_exhaustive()
    }
}

impl Credential {
    /// Whether the token should be replaced at `now`.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires) => now + ChronoDuration::minutes(EXPIRY_MARGIN_MINUTES) >= expires,
            None => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: TokenBody,
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    project: Option<ProjectRef>,
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct ProjectRef {
    id: String,
}

/// The scope block of a token request.
fn project_scope(config: &Config) -> Value {
    match (&config.tenant_id, &config.tenant_name) {
        (Some(id), _) => json!({"project": {"id": id}}),
        (None, Some(name)) => {
            let domain = domain_ref(config);
            json!({"project": {"name": name, "domain": domain}})
        },
        (None, None) => match (&config.domain_id, &config.domain_name) {
            (Some(id), _) => json!({"domain": {"id": id}}),
            (None, Some(name)) => json!({"domain": {"name": name}}),
            (None, None) => Value::Null,
        },
    }
}

fn domain_ref(config: &Config) -> Value {
    match (&config.domain_id, &config.domain_name) {
        (Some(id), _) => json!({"id": id}),
        (None, Some(name)) => json!({"name": name}),
        (None, None) => Value::Null,
    }
}

/// Body of `POST /v3/auth/tokens` for password or token credentials.
pub fn token_request(config: &Config) -> Result<Value, ProviderError> {
    let identity = match config.auth_method() {
        AuthMethod::Token => json!({
            "methods": ["token"],
            "token": {"id": config.token},
        }),
        AuthMethod::Password => {
            let mut user = json!({"password": config.password});
            match (&config.user_id, &config.user_name) {
                (Some(id), _) => user["id"] = json!(id),
                (None, Some(name)) => {
                    user["name"] = json!(name);
                    user["domain"] = domain_ref(config);
                },
                (None, None) => {
                    return Err(ProviderError::MissingInput("user_name (OS_USERNAME)".to_string()))
                },
            }
            json!({"methods": ["password"], "password": {"user": user}})
        },
        AuthMethod::AkSk => {
            return Err(ProviderError::Sdk(
                "AK/SK credentials do not use tokens".to_string(),
            ))
        },
    };

    let mut auth = json!({"identity": identity});
    let scope = if config.uses_agency() {
        // The first token only needs to be able to assume the agency.
        match domain_ref(config) {
            Value::Null => project_scope(config),
            domain => json!({"domain": domain}),
        }
    } else {
        project_scope(config)
    };
    if !scope.is_null() {
        auth["scope"] = scope;
    }
    Ok(json!({"auth": auth}))
}

/// Body of the agency assume-role exchange.
pub fn assume_role_request(config: &Config) -> Value {
    json!({
        "auth": {
            "identity": {
                "methods": ["assume_role"],
                "assume_role": {
                    "domain_name": config.agency_domain_name,
                    "agency_name": config.agency_name,
                },
            },
            "scope": {"project": {"name": config.delegated_project}},
        }
    })
}

/// Exchange credentials for a token.
///
/// `subject` is a token to send along, used by the assume-role exchange.
pub async fn issue_token(
    http: &reqwest::Client,
    auth_url: &str,
    body: &Value,
    subject: Option<&str>,
) -> Result<Credential, ProviderError> {
    let url = format!("{}/auth/tokens", auth_url.trim_end_matches('/'));
    let mut request = http.post(&url).json(body);
    if let Some(token) = subject {
        request = request.header(TOKEN_HEADER, token);
    }
    let response = request.send().await?;
    let status = response.status();
    let token = response
        .headers()
        .get(SUBJECT_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let text = response.text().await?;

    if status.as_u16() == 401 || status.as_u16() == 403 {
        let api = ApiError::new("POST", &url, status.as_u16(), &text);
        return Err(ProviderError::AuthFailed(api.message));
    }
    if !status.is_success() {
        return Err(ApiError::new("POST", &url, status.as_u16(), &text).into());
    }

    let token = token.ok_or_else(|| {
        ProviderError::AuthFailed(format!("{} did not return {}", url, SUBJECT_TOKEN_HEADER))
    })?;
    let parsed: TokenResponse = serde_json::from_str(&text)?;
    info!(
        project_id = parsed.token.project.as_ref().map(|p| p.id.as_str()),
        expires_at = ?parsed.token.expires_at,
        "obtained token"
    );
    Ok(Credential {
        token,
        expires_at: parsed.token.expires_at,
        project_id: parsed.token.project.map(|p| p.id),
        catalog: parsed.token.catalog,
    })
}

/// Authenticate with `config`, including the agency exchange when set.
pub async fn authenticate(http: &reqwest::Client, config: &Config) -> Result<Credential, ProviderError> {
    let auth_url = config
        .auth_url
        .as_deref()
        .ok_or_else(|| ProviderError::MissingInput("auth_url (OS_AUTH_URL)".to_string()))?;
    let credential = issue_token(http, auth_url, &token_request(config)?, None).await?;
    if !config.uses_agency() {
        return Ok(credential);
    }
    issue_token(http, auth_url, &assume_role_request(config), Some(&credential.token)).await
}
