use std::fmt;

use serde::Deserialize;

use crate::error::ProviderError;

/// The vendor services this provider talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ServiceKind {
    /// IAM (Keystone v3).
    Identity,
    /// DNS.
    Dns,
    /// Data Ingestion Service.
    Dis,
    /// Neutron networking (floating IPs).
    Network,
    /// VPC v1.
    Vpc,
    /// NAT gateway.
    Nat,
}

impl ServiceKind {
    /// Key used in the provider's `endpoints` block.
    pub fn key(self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Dns => "dns",
            Self::Dis => "dis",
            Self::Network => "network",
            Self::Vpc => "vpc",
            Self::Nat => "nat",
        }
    }

    /// Service types that identify this service in the token catalog.
    fn catalog_types(self) -> &'static [&'static str] {
        match self {
            Self::Identity => &["identity"],
            Self::Dns => &["dns"],
            Self::Dis => &["disv2", "dis"],
            Self::Network => &["network"],
            Self::Vpc => &["vpc"],
            Self::Nat => &["nat"],
        }
    }

    /// Host prefix of the public endpoint, e.g. `dns` in
    /// `https://dns.eu-de.otc.t-systems.com`.
    fn host(self) -> &'static str {
        match self {
            Self::Identity => "iam",
            Self::Dns => "dns",
            Self::Dis => "dis",
            Self::Network | Self::Vpc => "vpc",
            Self::Nat => "nat",
        }
    }

    /// The endpoint derived from the public naming scheme.
    pub fn default_endpoint(self, region: &str) -> String {
        format!("https://{}.{}.otc.t-systems.com", self.host(), region)
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A service entry of a Keystone token catalog.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Service type.
    #[serde(rename = "type")]
    pub service_type: String,
    /// Endpoints of the service.
    #[serde(default)]
    pub endpoints: Vec<CatalogEndpoint>,
}

/// One endpoint of a catalog entry.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CatalogEndpoint {
    /// `public`, `internal` or `admin`.
    pub interface: String,
    /// Region name.
    #[serde(default)]
    pub region: Option<String>,
    /// Region ID.
    #[serde(default)]
    pub region_id: Option<String>,
    /// Endpoint URL.
    pub url: String,
}

/// Find the public endpoint of `kind` in `region`.
///
/// Catalog URLs may carry a version or project suffix; only the origin is
/// kept, since request paths are written out in full.
pub fn from_catalog(catalog: &[CatalogEntry], kind: ServiceKind, region: &str) -> Option<String> {
    kind.catalog_types().iter().find_map(|service_type| {
        catalog
            .iter()
            .filter(|entry| entry.service_type == *service_type)
            .flat_map(|entry| entry.endpoints.iter())
            .find(|ep| {
                ep.interface == "public"
                    && (ep.region.as_deref() == Some(region)
                        || ep.region_id.as_deref() == Some(region)
                        || (ep.region.is_none() && ep.region_id.is_none()))
            })
            .map(|ep| origin(&ep.url))
    })
}

fn origin(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(parsed) => parsed.origin().ascii_serialization(),
        Err(_) => url.trim_end_matches('/').to_string(),
    }
}

/// Resolve the endpoint of `kind` in `region`.
///
/// Order: explicit override, token catalog, then the public naming scheme
/// when `allow_default` is set (signed requests carry no catalog).
pub fn resolve(
    override_url: Option<&str>,
    catalog: Option<&[CatalogEntry]>,
    kind: ServiceKind,
    region: &str,
    allow_default: bool,
) -> Result<String, ProviderError> {
    if let Some(url) = override_url {
        return Ok(url.trim_end_matches('/').to_string());
    }
    if let Some(url) = catalog.and_then(|c| from_catalog(c, kind, region)) {
        return Ok(url);
    }
    if allow_default {
        return Ok(kind.default_endpoint(region));
    }
    Err(ProviderError::EndpointNotFound(format!(
        "no public {} endpoint in region {}",
        kind, region
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn catalog() -> Vec<CatalogEntry> {
        serde_json::from_value(json!([
            {"type": "dns", "endpoints": [
                {"interface": "public", "region": "eu-de", "region_id": "eu-de", "url": "https://dns.eu-de.otc.t-systems.com/v2"},
                {"interface": "public", "region": "eu-nl", "region_id": "eu-nl", "url": "https://dns.eu-nl.otc.t-systems.com"}
            ]},
            {"type": "disv2", "endpoints": [
                {"interface": "internal", "region": "eu-de", "url": "https://dis.internal"},
                {"interface": "public", "region": "eu-de", "url": "https://dis.eu-de.otc.t-systems.com/v2/abc"}
            ]}
        ]))
        .unwrap()
    }

    #[test]
    fn test_catalog_lookup_by_region() {
        let catalog = catalog();
        assert_eq!(
            from_catalog(&catalog, ServiceKind::Dns, "eu-nl").as_deref(),
            Some("https://dns.eu-nl.otc.t-systems.com")
        );
        assert_eq!(
            from_catalog(&catalog, ServiceKind::Dns, "eu-de").as_deref(),
            Some("https://dns.eu-de.otc.t-systems.com")
        );
        assert_eq!(
            from_catalog(&catalog, ServiceKind::Dis, "eu-de").as_deref(),
            Some("https://dis.eu-de.otc.t-systems.com")
        );
        assert_eq!(from_catalog(&catalog, ServiceKind::Nat, "eu-de"), None);
    }

    #[test]
    fn test_resolution_order() {
        let catalog = catalog();
        assert_eq!(
            resolve(Some("http://127.0.0.1:8080/"), Some(&catalog), ServiceKind::Dns, "eu-de", false).unwrap(),
            "http://127.0.0.1:8080"
        );
        assert_eq!(
            resolve(None, None, ServiceKind::Nat, "eu-de", true).unwrap(),
            "https://nat.eu-de.otc.t-systems.com"
        );
        let err = resolve(None, Some(&catalog), ServiceKind::Nat, "eu-de", false).unwrap_err();
        assert!(matches!(err, ProviderError::EndpointNotFound(_)));
        assert!(err.to_string().contains("nat endpoint in region eu-de"));
    }
}
