//! Provider configuration.
//!
//! Settings are resolved from, highest precedence first: the provider block,
//! `OS_*` environment variables, the named `clouds.yaml` entry (with its
//! `secure.yaml` overlay) and the vendor profile that entry points at.

mod clouds;
mod env;

pub use clouds::{lookup as cloud_lookup, merge as merge_yaml, CloudFiles};
pub use env::Environment;

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde_json::Value;

use crate::error::ProviderError;

/// One scalar provider setting and where it may come from.
#[derive(Debug, Clone, Copy)]
pub struct Setting {
    /// Attribute name in the provider block.
    pub name: &'static str,
    /// Environment variables, in order of preference.
    pub env: &'static [&'static str],
    /// Dotted keys in a `clouds.yaml` entry, in order of preference.
    pub cloud: &'static [&'static str],
    /// Never logged or echoed back.
    pub sensitive: bool,
    /// Human-readable description for the schema.
    pub description: &'static str,
}

macro_rules! setting {
    ($name:literal, [$($env:literal),*], [$($cloud:literal),*], $sensitive:literal, $desc:literal) => {
        Setting {
            name: $name,
            env: &[$($env),*],
            cloud: &[$($cloud),*],
            sensitive: $sensitive,
            description: $desc,
        }
    };
}

/// Every scalar string setting of the provider block.
pub const SETTINGS: &[Setting] = &[
    setting!("auth_url", ["OS_AUTH_URL"], ["auth.auth_url"], false, "Identity endpoint, e.g. https://iam.eu-de.otc.t-systems.com/v3"),
    setting!("region", ["OS_REGION_NAME"], ["region_name"], false, "Region to manage resources in"),
    setting!("user_name", ["OS_USERNAME"], ["auth.username"], false, "User name for password authentication"),
    setting!("user_id", ["OS_USER_ID"], ["auth.user_id"], false, "User ID for password authentication"),
    setting!("password", ["OS_PASSWORD"], ["auth.password"], true, "Password for password authentication"),
    setting!("domain_name", ["OS_DOMAIN_NAME", "OS_USER_DOMAIN_NAME"], ["auth.user_domain_name", "auth.domain_name"], false, "Domain (account) name"),
    setting!("domain_id", ["OS_DOMAIN_ID", "OS_USER_DOMAIN_ID"], ["auth.user_domain_id", "auth.domain_id"], false, "Domain (account) ID"),
    setting!("tenant_name", ["OS_TENANT_NAME", "OS_PROJECT_NAME"], ["auth.project_name", "auth.tenant_name"], false, "Project name"),
    setting!("tenant_id", ["OS_TENANT_ID", "OS_PROJECT_ID"], ["auth.project_id", "auth.tenant_id"], false, "Project ID"),
    setting!("token", ["OS_TOKEN", "OS_AUTH_TOKEN"], ["auth.token"], true, "Existing token to re-scope"),
    setting!("access_key", ["OS_ACCESS_KEY"], ["auth.ak", "auth.access_key"], false, "Access key for AK/SK signing"),
    setting!("secret_key", ["OS_SECRET_KEY"], ["auth.sk", "auth.secret_key"], true, "Secret key for AK/SK signing"),
    setting!("security_token", ["OS_SECURITY_TOKEN"], ["auth.security_token"], true, "Security token for temporary AK/SK"),
    setting!("agency_name", ["OS_AGENCY_NAME"], ["auth.agency_name"], false, "Agency to assume"),
    setting!("agency_domain_name", ["OS_AGENCY_DOMAIN_NAME"], ["auth.agency_domain_name"], false, "Domain that owns the agency"),
    setting!("delegated_project", ["OS_DELEGATED_PROJECT"], ["auth.delegated_project"], false, "Project to scope the agency token to"),
    setting!("cacert_file", ["OS_CACERT"], ["cacert"], false, "PEM file with additional CA certificates"),
    setting!("cert", ["OS_CERT"], ["cert"], false, "PEM client certificate"),
    setting!("key", ["OS_KEY"], ["key"], true, "PEM client key"),
];

/// How requests are authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// Keystone v3 password.
    Password,
    /// Re-scope an existing Keystone token.
    Token,
    /// Sign every request with an access key pair.
    AkSk,
}

/// Fully resolved provider settings.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Config {
    /// Identity endpoint.
    pub auth_url: Option<String>,
    /// Default region.
    pub region: String,
    /// User name.
    pub user_name: Option<String>,
    /// User ID.
    pub user_id: Option<String>,
    /// Password.
    pub password: Option<String>,
    /// Domain name.
    pub domain_name: Option<String>,
    /// Domain ID.
    pub domain_id: Option<String>,
    /// Project name.
    pub tenant_name: Option<String>,
    /// Project ID.
    pub tenant_id: Option<String>,
    /// Existing token.
    pub token: Option<String>,
    /// Access key.
    pub access_key: Option<String>,
    /// Secret key.
    pub secret_key: Option<String>,
    /// Security token accompanying temporary keys.
    pub security_token: Option<String>,
    /// Agency to assume.
    pub agency_name: Option<String>,
    /// Domain owning the agency.
    pub agency_domain_name: Option<String>,
    /// Project the agency token is scoped to.
    pub delegated_project: Option<String>,
    /// Skip TLS verification.
    pub insecure: bool,
    /// Extra CA bundle.
    pub cacert_file: Option<String>,
    /// Client certificate.
    pub cert: Option<String>,
    /// Client key.
    pub key: Option<String>,
    /// Named `clouds.yaml` entry.
    pub cloud: Option<String>,
    /// Attempts for transient HTTP failures.
    pub max_retries: u32,
    /// Service endpoint overrides keyed by service name.
    pub endpoints: BTreeMap<String, String>,
}

/// Default number of attempts for transient HTTP failures.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

impl Config {
    /// Resolve settings from a provider block and an environment.
    pub fn resolve(block: &Value, env: &Environment) -> Result<Self, ProviderError> {
        Self::resolve_with_files(block, env, None)
    }

    /// Like [`Config::resolve`] with explicit cloud files instead of the
    /// default search.
    pub fn resolve_with_files(
        block: &Value,
        env: &Environment,
        files: Option<CloudFiles>,
    ) -> Result<Self, ProviderError> {
        let mut values: HashMap<&'static str, String> = HashMap::new();
        for setting in SETTINGS {
            let from_block = block
                .get(setting.name)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string);
            if let Some(value) = from_block.or_else(|| env.first(setting.env).map(str::to_string)) {
                values.insert(setting.name, value);
            }
        }

        let cloud_name = block
            .get("cloud")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| env.get("OS_CLOUD").map(str::to_string));

        let mut insecure = block
            .get("insecure")
            .and_then(Value::as_bool)
            .or_else(|| env.get("OS_INSECURE").map(parse_bool));

        if let Some(name) = &cloud_name {
            let files = files.unwrap_or_else(|| CloudFiles::locate(env));
            let cloud = files.load(name)?;
            for setting in SETTINGS {
                if values.contains_key(setting.name) {
                    continue;
                }
                if let Some(value) = setting.cloud.iter().find_map(|k| clouds::lookup(&cloud, k)) {
                    values.insert(setting.name, value);
                }
            }
            if insecure.is_none() {
                insecure = clouds::lookup(&cloud, "verify").map(|v| !parse_bool(&v));
            }
        }

        let max_retries = match block.get("max_retries").and_then(Value::as_i64) {
            Some(n) => u32::try_from(n).map_err(|_| {
                ProviderError::Validation(format!(
                    "max_retries must be between 0 and {}, got {}",
                    u32::MAX,
                    n
                ))
            })?,
            None => DEFAULT_MAX_RETRIES,
        };

        let endpoints = block
            .get("endpoints")
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.trim_end_matches('/').to_string())))
                    .collect()
            })
            .unwrap_or_default();

        let mut take = |name: &str| values.remove(name);
        let mut config = Config {
            auth_url: take("auth_url"),
            region: take("region").unwrap_or_default(),
            user_name: take("user_name"),
            user_id: take("user_id"),
            password: take("password"),
            domain_name: take("domain_name"),
            domain_id: take("domain_id"),
            tenant_name: take("tenant_name"),
            tenant_id: take("tenant_id"),
            token: take("token"),
            access_key: take("access_key"),
            secret_key: take("secret_key"),
            security_token: take("security_token"),
            agency_name: take("agency_name"),
            agency_domain_name: take("agency_domain_name"),
            delegated_project: take("delegated_project"),
            insecure: insecure.unwrap_or(false),
            cacert_file: take("cacert_file"),
            cert: take("cert"),
            key: take("key"),
            cloud: cloud_name,
            max_retries,
            endpoints,
        };

        if config.region.is_empty() {
            if let Some(prefix) = config.tenant_name.as_deref().and_then(|t| t.split_once('_')) {
                config.region = prefix.0.to_string();
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// The authentication method these settings select.
    ///
    /// A token wins over a key pair, which wins over a password.
    pub fn auth_method(&self) -> AuthMethod {
        if self.token.is_some() {
            AuthMethod::Token
        } else if self.access_key.is_some() && self.secret_key.is_some() {
            AuthMethod::AkSk
        } else {
            AuthMethod::Password
        }
    }

    /// Whether the agency assume-role exchange is configured.
    pub fn uses_agency(&self) -> bool {
        self.agency_name.is_some()
    }

    /// The configured endpoint override for a service.
    pub fn endpoint_override(&self, service: &str) -> Option<&str> {
        self.endpoints.get(service).map(String::as_str)
    }

    /// Check that the resolved settings are usable.
    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.auth_url.is_none() && self.endpoints.is_empty() {
            return Err(missing("auth_url", "OS_AUTH_URL"));
        }
        if self.region.is_empty() {
            return Err(missing("region", "OS_REGION_NAME"));
        }

        match self.auth_method() {
            AuthMethod::Token => {},
            AuthMethod::AkSk => {},
            AuthMethod::Password => {
                if self.access_key.is_some() != self.secret_key.is_some() {
                    return Err(ProviderError::MissingInput(
                        "access_key and secret_key must be set together (OS_ACCESS_KEY, OS_SECRET_KEY)"
                            .to_string(),
                    ));
                }
                if self.user_name.is_none() && self.user_id.is_none() {
                    return Err(ProviderError::MissingInput(
                        "one of token (OS_TOKEN), user_name or user_id with password (OS_USERNAME, OS_PASSWORD), or access_key with secret_key (OS_ACCESS_KEY, OS_SECRET_KEY)"
                            .to_string(),
                    ));
                }
                if self.password.is_none() {
                    return Err(missing("password", "OS_PASSWORD"));
                }
                if self.user_id.is_none() && self.domain_name.is_none() && self.domain_id.is_none() {
                    return Err(missing("domain_name", "OS_DOMAIN_NAME"));
                }
            },
        }

        if self.auth_method() != AuthMethod::AkSk
            && self.tenant_name.is_none()
            && self.tenant_id.is_none()
            && !self.uses_agency()
        {
            return Err(missing("tenant_name", "OS_TENANT_NAME"));
        }

        if self.uses_agency() {
            if self.agency_domain_name.is_none() {
                return Err(missing("agency_domain_name", "OS_AGENCY_DOMAIN_NAME"));
            }
            if self.delegated_project.is_none() {
                return Err(missing("delegated_project", "OS_DELEGATED_PROJECT"));
            }
        }

        if self.cert.is_some() != self.key.is_some() {
            return Err(ProviderError::MissingInput(
                "cert and key must be set together (OS_CERT, OS_KEY)".to_string(),
            ));
        }
        Ok(())
    }
}

fn missing(field: &str, var: &str) -> ProviderError {
    ProviderError::MissingInput(format!("{} ({})", field, var))
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn redact(value: &Option<String>) -> Option<&'static str> {
    value.as_ref().map(|_| "<redacted>")
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("auth_url", &self.auth_url)
            .field("region", &self.region)
            .field("user_name", &self.user_name)
            .field("user_id", &self.user_id)
            .field("password", &redact(&self.password))
            .field("domain_name", &self.domain_name)
            .field("domain_id", &self.domain_id)
            .field("tenant_name", &self.tenant_name)
            .field("tenant_id", &self.tenant_id)
            .field("token", &redact(&self.token))
            .field("access_key", &self.access_key)
            .field("secret_key", &redact(&self.secret_key))
            .field("security_token", &redact(&self.security_token))
            .field("agency_name", &self.agency_name)
            .field("agency_domain_name", &self.agency_domain_name)
            .field("delegated_project", &self.delegated_project)
            .field("insecure", &self.insecure)
            .field("cacert_file", &self.cacert_file)
            .field("cert", &self.cert)
            .field("key", &redact(&self.key))
            .field("cloud", &self.cloud)
            .field("max_retries", &self.max_retries)
            .field("endpoints", &self.endpoints)
            .finish()
    }
}
