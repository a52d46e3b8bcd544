//! AK/SK request signing (`SDK-HMAC-SHA256`).
//!
//! The signature covers the method, path, sorted query, the signed headers
//! and the SHA-256 of the body. It is sent as
//! `Authorization: SDK-HMAC-SHA256 Access=<ak>, SignedHeaders=<h1;h2>, Signature=<hex>`
//! together with the `X-Sdk-Date` timestamp it was computed for.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::ProviderError;

type HmacSha256 = Hmac<Sha256>;

/// Signing algorithm name.
pub const ALGORITHM: &str = "SDK-HMAC-SHA256";
/// Header carrying the signing timestamp.
pub const DATE_HEADER: &str = "X-Sdk-Date";
const DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Headers to add to a signed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// Value of `X-Sdk-Date`.
    pub date: String,
    /// Value of `Authorization`.
    pub authorization: String,
}

/// Signs requests with an access key pair.
#[derive(Clone)]
pub struct Signer {
    access_key: String,
    secret_key: String,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("access_key", &self.access_key)
            .finish_non_exhaustive()
    }
}

impl Signer {
    /// A signer for the given key pair.
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    /// Sign a request.
    ///
    /// `headers` are the headers to cover besides `x-sdk-date`; `host` must be
    /// among them.
    pub fn sign(
        &self,
        method: &str,
        url: &reqwest::Url,
        headers: &[(&str, &str)],
        body: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Signature, ProviderError> {
        let date = now.format(DATE_FORMAT).to_string();

        let mut signed: Vec<(String, String)> = headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.trim().to_string()))
            .collect();
        signed.push((DATE_HEADER.to_ascii_lowercase(), date.clone()));
        signed.sort();

        let canonical = canonical_request(method, url, &signed, body);
        let string_to_sign = format!("{}\n{}\n{}", ALGORITHM, date, hex_sha256(canonical.as_bytes()));

        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .map_err(|e| ProviderError::Sdk(format!("initialising request signer: {}", e)))?;
        mac.update(string_to_sign.as_bytes());
        let signature = hex(&mac.finalize().into_bytes());

        let names: Vec<&str> = signed.iter().map(|(k, _)| k.as_str()).collect();
        Ok(Signature {
            date,
            authorization: format!(
                "{} Access={}, SignedHeaders={}, Signature={}",
                ALGORITHM,
                self.access_key,
                names.join(";"),
                signature
            ),
        })
    }
}

/// The canonical request: method, path with trailing slash, sorted query,
/// `name:value` header lines, signed header names and the body hash.
fn canonical_request(method: &str, url: &reqwest::Url, headers: &[(String, String)], body: &[u8]) -> String {
    let mut path = url.path().to_string();
    if !path.ends_with('/') {
        path.push('/');
    }

    let mut query: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (encode(&k), encode(&v)))
        .collect();
    query.sort();
    let query = query
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    let mut header_lines = String::new();
    for (name, value) in headers {
        let _ = writeln!(header_lines, "{}:{}", name, value);
    }
    let names: Vec<&str> = headers.iter().map(|(k, _)| k.as_str()).collect();

    format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method.to_ascii_uppercase(),
        path,
        query,
        header_lines,
        names.join(";"),
        hex_sha256(body)
    )
}

fn encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
            _ => {
                let _ = write!(out, "%{:02X}", byte);
            },
        }
    }
    out
}

fn hex_sha256(data: &[u8]) -> String {
    hex(&Sha256::digest(data))
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 45).unwrap()
    }

    #[test]
    fn test_canonical_request_layout() {
        let url = reqwest::Url::parse("https://vpc.eu-de.otc.t-systems.com/v1/p1/vpcs?name=a b&limit=10").unwrap();
        let headers = vec![
            ("host".to_string(), "vpc.eu-de.otc.t-systems.com".to_string()),
            ("x-sdk-date".to_string(), "20240301T123045Z".to_string()),
        ];
        let canonical = canonical_request("get", &url, &headers, b"");
        let lines: Vec<&str> = canonical.split('\n').collect();
        assert_eq!(lines[0], "GET");
        assert_eq!(lines[1], "/v1/p1/vpcs/");
        assert_eq!(lines[2], "limit=10&name=a%20b");
        assert_eq!(lines[3], "host:vpc.eu-de.otc.t-systems.com");
        assert_eq!(lines[4], "x-sdk-date:20240301T123045Z");
        assert_eq!(lines[6], "host;x-sdk-date");
        // SHA-256 of the empty string.
        assert_eq!(
            lines[7],
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_sign_is_deterministic_and_covers_body() {
        let signer = Signer::new("AK", "SK");
        let url = reqwest::Url::parse("https://vpc.eu-de.otc.t-systems.com/v1/p1/vpcs").unwrap();
        let headers = [("Host", "vpc.eu-de.otc.t-systems.com"), ("Content-Type", "application/json")];

        let a = signer.sign("POST", &url, &headers, b"{}", now()).unwrap();
        let b = signer.sign("POST", &url, &headers, b"{}", now()).unwrap();
        let c = signer.sign("POST", &url, &headers, b"{\"vpc\":{}}", now()).unwrap();

        assert_eq!(a, b);
        assert_ne!(a.authorization, c.authorization);
        assert_eq!(a.date, "20240301T123045Z");
        assert!(a.authorization.starts_with(
            "SDK-HMAC-SHA256 Access=AK, SignedHeaders=content-type;host;x-sdk-date, Signature="
        ));
        let signature = a.authorization.rsplit('=').next().unwrap();
        assert_eq!(signature.len(), 64);
    }

    #[test]
    fn test_debug_hides_secret() {
        let debug = format!("{:?}", Signer::new("AK", "very-secret"));
        assert!(!debug.contains("very-secret"));
    }
}
