//! Vendor error classification and classifier-driven retries.
//!
//! Every vendor failure is sorted into an [`ErrorKind`]. Callers branch on the
//! kind rather than on status codes: `read` clears the ID on
//! [`ErrorKind::NotFound`], `delete` treats it as success, and [`retry`]
//! repeats transient and conflicting calls until the operation deadline.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::context::OperationContext;
use crate::error::ProviderError;
use crate::waiter::Backoff;

/// What a caller should do about an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The object does not exist (HTTP 404).
    NotFound,
    /// Worth retrying: throttling, gateway errors, dropped connections.
    Transient,
    /// Another operation holds the object, e.g. a port in use.
    Conflict,
    /// The request itself is wrong; retrying cannot help.
    InvalidInput,
    /// The token was rejected (HTTP 401).
    Authentication,
    /// Anything else.
    Fatal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFound => "not found",
            Self::Transient => "transient",
            Self::Conflict => "conflict",
            Self::InvalidInput => "invalid input",
            Self::Authentication => "authentication",
            Self::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

/// Vendor messages and codes that mean "busy, try again later" even when the
/// status is not 409.
const CONFLICT_MARKERS: &[&str] = &[
    "port in use",
    "portinuse",
    "in use by",
    "is in use",
    "is being used",
    "is busy",
    "concurrent",
    "please try again later",
    "nat.0010",
    "vpc.0202",
];

/// An error response from a vendor API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    /// HTTP method of the failed request.
    pub method: String,
    /// URL of the failed request.
    pub url: String,
    /// HTTP status code.
    pub status: u16,
    /// Vendor error code, when the body carried one.
    pub code: Option<String>,
    /// Vendor message, verbatim.
    pub message: String,
}

impl ApiError {
    /// Build an error from a response, extracting code and message from the
    /// body formats the vendor services use.
    pub fn new(method: impl Into<String>, url: impl Into<String>, status: u16, body: &str) -> Self {
        let (code, message) = parse_error_body(body);
        let message = message.unwrap_or_else(|| fallback_message(status, body));
        Self {
            method: method.into(),
            url: url.into(),
            status,
            code,
            message,
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self.status {
            404 => ErrorKind::NotFound,
            401 => ErrorKind::Authentication,
            409 => ErrorKind::Conflict,
            429 | 502 | 503 | 504 => ErrorKind::Transient,
            400 | 422 | 500 if self.has_conflict_marker() => ErrorKind::Conflict,
            400 | 422 => ErrorKind::InvalidInput,
            _ => ErrorKind::Fatal,
        }
    }

    fn has_conflict_marker(&self) -> bool {
        let message = self.message.to_ascii_lowercase();
        let code = self.code.as_deref().unwrap_or_default().to_ascii_lowercase();
        CONFLICT_MARKERS
            .iter()
            .any(|marker| message.contains(marker) || code == *marker)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: HTTP {}", self.method, self.url, self.status)?;
        if let Some(code) = &self.code {
            write!(f, " ({})", code)?;
        }
        write!(f, ": {}", self.message)
    }
}

impl std::error::Error for ApiError {}

fn fallback_message(status: u16, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("unknown error")
            .to_string()
    } else {
        body.chars().take(512).collect()
    }
}

/// Extract `(code, message)` from the error body shapes used across the
/// vendor services:
///
/// - `{"code": "DNS.0302", "message": "..."}`
/// - `{"error_code": "NAT.0010", "error_msg": "..."}`
/// - `{"errorCode": "DIS.4301", "message": "..."}`
/// - `{"error": {"code": "...", "message": "..."}}`
/// - `{"NeutronError": {"type": "...", "message": "..."}}`
/// - `{"itemNotFound": {"code": 404, "message": "..."}}`
pub fn parse_error_body(body: &str) -> (Option<String>, Option<String>) {
    let value: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(_) => return (None, None),
    };
    let obj = match value.as_object() {
        Some(obj) => obj,
        None => return (None, None),
    };

    let flat = extract(&value);
    if flat.1.is_some() {
        return flat;
    }

    for inner in obj.values().filter(|v| v.is_object()) {
        let nested = extract(inner);
        if nested.1.is_some() {
            return nested;
        }
    }
    (flat.0, None)
}

fn extract(value: &Value) -> (Option<String>, Option<String>) {
    let text = |keys: &[&str]| {
        keys.iter().find_map(|k| match value.get(*k) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
    };
    let code = text(&["code", "error_code", "errorCode", "type"]);
    let message = text(&["message", "error_msg", "errorMessage", "errorMsg", "msg"]);
    (code, message)
}

/// Classify any provider error.
pub fn classify(err: &ProviderError) -> ErrorKind {
    match err {
        ProviderError::Api(api) => api.kind(),
        ProviderError::Http(e) => {
            if e.is_connect() || e.is_timeout() || e.is_request() {
                ErrorKind::Transient
            } else {
                ErrorKind::Fatal
            }
        },
        ProviderError::NotFound(_) => ErrorKind::NotFound,
        ProviderError::Unavailable(_) | ProviderError::ResourceExhausted(_) => ErrorKind::Transient,
        ProviderError::AlreadyExists(_) => ErrorKind::Conflict,
        ProviderError::AuthFailed(_) => ErrorKind::Authentication,
        ProviderError::Validation(_)
        | ProviderError::InvalidRequest(_)
        | ProviderError::MissingInput(_) => ErrorKind::InvalidInput,
        ProviderError::Context { source, .. } => classify(source),
        _ => ErrorKind::Fatal,
    }
}

/// Whether the error means the object is gone.
pub fn is_not_found(err: &ProviderError) -> bool {
    classify(err) == ErrorKind::NotFound
}

/// Which error kinds a retry loop repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    retry_conflict: bool,
    retry_transient: bool,
    initial: Duration,
    max: Duration,
}

impl RetryPolicy {
    /// Retry transient failures only.
    pub fn transient() -> Self {
        Self {
            retry_conflict: false,
            retry_transient: true,
            initial: Duration::from_secs(1),
            max: Duration::from_secs(10),
        }
    }

    /// Retry conflicts and transient failures.
    pub fn conflict() -> Self {
        Self {
            retry_conflict: true,
            ..Self::transient()
        }
    }

    /// Override the backoff bounds.
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial = initial;
        self.max = max;
        self
    }

    fn retries(&self, kind: ErrorKind) -> bool {
        match kind {
            ErrorKind::Conflict => self.retry_conflict,
            ErrorKind::Transient => self.retry_transient,
            _ => false,
        }
    }
}

/// Run `op` until it succeeds, fails with a non-retryable kind, or the
/// context's deadline leaves no room for another attempt.
///
/// The loop shares the caller's deadline; it never extends it. When it gives
/// up, the last vendor error is returned unchanged.
pub async fn retry<T, F, Fut>(
    ctx: &OperationContext,
    what: &str,
    policy: RetryPolicy,
    mut op: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut backoff = Backoff::new(policy.initial, policy.max);
    let mut attempt = 1u32;
    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        let kind = classify(&err);
        if !policy.retries(kind) {
            return Err(err);
        }

        let delay = backoff.next_delay();
        if ctx.is_cancelled() || ctx.remaining() <= delay {
            debug!(what, attempt, %kind, "giving up, deadline reached");
            return Err(err);
        }
        debug!(what, attempt, %kind, delay_ms = delay.as_millis() as u64, error = %err, "retrying");
        if ctx.sleep(delay).await.is_err() {
            return Err(err);
        }
        attempt += 1;
    }
}

/// [`retry`] with [`RetryPolicy::conflict`].
pub async fn retry_on_conflict<T, F, Fut>(
    ctx: &OperationContext,
    what: &str,
    op: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    retry(ctx, what, RetryPolicy::conflict(), op).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn api(status: u16, body: &str) -> ProviderError {
        ProviderError::Api(ApiError::new("POST", "https://nat.example/v2.0/dnat_rules", status, body))
    }

    #[test]
    fn test_parse_error_body_formats() {
        assert_eq!(
            parse_error_body(r#"{"code":"DNS.0302","message":"Zone name is invalid"}"#),
            (Some("DNS.0302".into()), Some("Zone name is invalid".into()))
        );
        assert_eq!(
            parse_error_body(r#"{"error_code":"NAT.0010","error_msg":"port in use"}"#),
            (Some("NAT.0010".into()), Some("port in use".into()))
        );
        assert_eq!(
            parse_error_body(r#"{"NeutronError":{"type":"FloatingIPNotFound","message":"gone","detail":""}}"#),
            (Some("FloatingIPNotFound".into()), Some("gone".into()))
        );
        assert_eq!(
            parse_error_body(r#"{"error":{"code":"VPC.0101","message":"bad cidr"}}"#),
            (Some("VPC.0101".into()), Some("bad cidr".into()))
        );
        assert_eq!(
            parse_error_body(r#"{"errorCode":"DIS.4301","message":"Stream not found"}"#),
            (Some("DIS.4301".into()), Some("Stream not found".into()))
        );
        assert_eq!(parse_error_body("<html>502</html>"), (None, None));
    }

    #[test]
    fn test_api_error_keeps_vendor_message() {
        let err = ApiError::new("GET", "https://dns.example/v2/zones/z", 500, "");
        assert_eq!(err.message, "Internal Server Error");

        let err = ApiError::new("GET", "https://dns.example/v2/zones/z", 404, r#"{"code":"DNS.0101","message":"Zone not found"}"#);
        assert_eq!(
            err.to_string(),
            "GET https://dns.example/v2/zones/z: HTTP 404 (DNS.0101): Zone not found"
        );
    }

    #[test]
    fn test_classification() {
        assert_eq!(classify(&api(404, "")), ErrorKind::NotFound);
        assert_eq!(classify(&api(401, "")), ErrorKind::Authentication);
        assert_eq!(classify(&api(409, "")), ErrorKind::Conflict);
        assert_eq!(classify(&api(429, "")), ErrorKind::Transient);
        assert_eq!(classify(&api(503, "")), ErrorKind::Transient);
        assert_eq!(classify(&api(400, r#"{"message":"bad cidr"}"#)), ErrorKind::InvalidInput);
        assert_eq!(classify(&api(422, "")), ErrorKind::InvalidInput);
        assert_eq!(
            classify(&api(400, r#"{"error_code":"NAT.0010","error_msg":"Port in use"}"#)),
            ErrorKind::Conflict
        );
        assert_eq!(classify(&api(403, "")), ErrorKind::Fatal);
        assert_eq!(
            classify(&api(404, "").context("reading DNS zone \"z\"")),
            ErrorKind::NotFound
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_on_conflict_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let ctx = OperationContext::new(Duration::from_secs(600));
        let counter = calls.clone();
        let result = retry_on_conflict(&ctx, "creating DNAT rule", || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err(api(409, r#"{"error_msg":"port in use"}"#))
                } else {
                    Ok("rule-1")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "rule-1");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_surfaces_last_error_at_deadline() {
        let ctx = OperationContext::new(Duration::from_secs(30));
        let result: Result<(), _> = retry_on_conflict(&ctx, "creating DNAT rule", || async {
            Err(api(409, r#"{"error_msg":"port in use"}"#))
        })
        .await;
        let err = result.unwrap_err();
        assert!(err.to_string().contains("port in use"));
        assert!(ctx.remaining() < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_does_not_repeat_invalid_input() {
        let calls = Arc::new(AtomicU32::new(0));
        let ctx = OperationContext::new(Duration::from_secs(600));
        let counter = calls.clone();
        let result: Result<(), _> = retry(&ctx, "creating VPC", RetryPolicy::conflict(), || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(api(400, r#"{"message":"bad cidr"}"#)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_policy_does_not_retry_conflict() {
        let calls = Arc::new(AtomicU32::new(0));
        let ctx = OperationContext::new(Duration::from_secs(600));
        let counter = calls.clone();
        let result: Result<(), _> = retry(&ctx, "updating zone", RetryPolicy::transient(), || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(api(409, "")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
