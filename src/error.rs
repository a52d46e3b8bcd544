//! Error types for the Open Telekom Cloud provider.

use thiserror::Error;

use crate::classify::ApiError;

/// Errors that can occur while serving the provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The requested resource was not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// A validation error occurred.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An internal error occurred.
    #[error("SDK error: {0}")]
    Sdk(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested resource type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A gRPC transport error occurred.
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// Resource already exists (create conflict).
    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    /// Permission denied (authorization failure).
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Quota or rate limit exceeded.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Service temporarily unavailable.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Operation timed out.
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Operation failed due to current state (precondition not met).
    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    /// Operation not implemented.
    #[error("Unimplemented: {0}")]
    Unimplemented(String),

    /// Invalid request from client.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A credential or setting needed to reach the cloud is missing.
    #[error("Missing required input: {0}")]
    MissingInput(String),

    /// The identity service rejected the credentials.
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// No endpoint could be resolved for a service in a region.
    #[error("Endpoint not found: {0}")]
    EndpointNotFound(String),

    /// The vendor API answered with an error status.
    #[error("{0}")]
    Api(#[from] ApiError),

    /// The HTTP request never produced a response.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A polled resource reported a state outside the pending and target sets.
    #[error("Unexpected state '{state}', wanted target '{target}'")]
    UnexpectedState {
        /// The state reported by the vendor.
        state: String,
        /// The target states, comma separated.
        target: String,
    },

    /// The operation was cancelled by the host.
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// A quota booking can never succeed.
    #[error("Quota error: {0}")]
    Quota(String),

    /// An error wrapped with the operation that produced it.
    #[error("{context}: {source}")]
    Context {
        /// What was being done, e.g. `creating DNS zone "example.com."`.
        context: String,
        /// The underlying error.
        #[source]
        source: Box<ProviderError>,
    },
}

impl ProviderError {
    /// Get the error message as a string.
    ///
    /// Context wrappers are unwrapped to the innermost message.
    pub fn message(&self) -> String {
        match self {
            Self::NotFound(msg)
            | Self::Validation(msg)
            | Self::Sdk(msg)
            | Self::Configuration(msg)
            | Self::UnknownResource(msg)
            | Self::AlreadyExists(msg)
            | Self::PermissionDenied(msg)
            | Self::ResourceExhausted(msg)
            | Self::Unavailable(msg)
            | Self::DeadlineExceeded(msg)
            | Self::FailedPrecondition(msg)
            | Self::Unimplemented(msg)
            | Self::InvalidRequest(msg)
            | Self::MissingInput(msg)
            | Self::AuthFailed(msg)
            | Self::EndpointNotFound(msg)
            | Self::Cancelled(msg)
            | Self::Quota(msg) => msg.clone(),
            Self::Serialization(err) => err.to_string(),
            Self::Transport(err) => err.to_string(),
            Self::Http(err) => err.to_string(),
            Self::Api(err) => err.message.clone(),
            Self::UnexpectedState { state, target } => {
                format!("unexpected state '{}', wanted target '{}'", state, target)
            }
            Self::Context { source, .. } => source.message(),
        }
    }

    /// Wrap this error with the operation that produced it.
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping context wrappers.
    pub fn root(&self) -> &ProviderError {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Adds operation context to results.
pub trait ResultExt<T> {
    /// Prefix the error, if any, with `context`.
    fn context(self, context: impl Into<String>) -> Result<T, ProviderError>;

    /// Like [`ResultExt::context`], building the prefix lazily.
    fn with_context<F, S>(self, f: F) -> Result<T, ProviderError>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E: Into<ProviderError>> ResultExt<T> for Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T, ProviderError> {
        self.map_err(|e| e.into().context(context))
    }

    fn with_context<F, S>(self, f: F) -> Result<T, ProviderError>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.into().context(f()))
    }
}

impl From<serde_yaml::Error> for ProviderError {
    fn from(err: serde_yaml::Error) -> Self {
        ProviderError::Configuration(err.to_string())
    }
}

impl From<std::io::Error> for ProviderError {
    fn from(err: std::io::Error) -> Self {
        ProviderError::Configuration(err.to_string())
    }
}

impl From<ProviderError> for tonic::Status {
    fn from(err: ProviderError) -> Self {
        let code = status_code(&err);
        let message = match &err {
            ProviderError::Serialization(_)
            | ProviderError::Transport(_)
            | ProviderError::Http(_)
            | ProviderError::Api(_)
            | ProviderError::UnexpectedState { .. }
            | ProviderError::Context { .. } => err.to_string(),
            _ => err.message(),
        };
        tonic::Status::new(code, message)
    }
}

/// The gRPC status code for an error, looking through context wrappers.
pub fn status_code(err: &ProviderError) -> tonic::Code {
    match err {
        ProviderError::NotFound(_) | ProviderError::UnknownResource(_) => tonic::Code::NotFound,
        ProviderError::Validation(_)
        | ProviderError::InvalidRequest(_)
        | ProviderError::Serialization(_) => tonic::Code::InvalidArgument,
        ProviderError::AlreadyExists(_) => tonic::Code::AlreadyExists,
        ProviderError::PermissionDenied(_) => tonic::Code::PermissionDenied,
        ProviderError::AuthFailed(_) => tonic::Code::Unauthenticated,
        ProviderError::ResourceExhausted(_) | ProviderError::Quota(_) => {
            tonic::Code::ResourceExhausted
        },
        ProviderError::Unavailable(_) | ProviderError::Http(_) | ProviderError::Transport(_) => {
            tonic::Code::Unavailable
        },
        ProviderError::DeadlineExceeded(_) => tonic::Code::DeadlineExceeded,
        ProviderError::Cancelled(_) => tonic::Code::Cancelled,
        ProviderError::Unimplemented(_) => tonic::Code::Unimplemented,
        ProviderError::Configuration(_)
        | ProviderError::FailedPrecondition(_)
        | ProviderError::MissingInput(_)
        | ProviderError::EndpointNotFound(_)
        | ProviderError::UnexpectedState { .. } => tonic::Code::FailedPrecondition,
        ProviderError::Api(api) => match api.status {
            404 => tonic::Code::NotFound,
            401 => tonic::Code::Unauthenticated,
            403 => tonic::Code::PermissionDenied,
            409 => tonic::Code::AlreadyExists,
            400 | 422 => tonic::Code::InvalidArgument,
            429 => tonic::Code::ResourceExhausted,
            _ => tonic::Code::Unknown,
        },
        ProviderError::Sdk(_) => tonic::Code::Internal,
        ProviderError::Context { source, .. } => status_code(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProviderError::NotFound("resource-123".to_string());
        assert_eq!(format!("{}", err), "Resource not found: resource-123");

        let err = ProviderError::MissingInput("auth_url (OS_AUTH_URL)".to_string());
        assert_eq!(
            format!("{}", err),
            "Missing required input: auth_url (OS_AUTH_URL)"
        );

        let err = ProviderError::UnknownResource("custom_resource".to_string());
        assert_eq!(format!("{}", err), "Unknown resource type: custom_resource");
    }

    #[test]
    fn test_error_to_status() {
        let err = ProviderError::NotFound("test".to_string());
        let status: tonic::Status = err.into();
        assert_eq!(status.code(), tonic::Code::NotFound);

        let err = ProviderError::Validation("test".to_string());
        let status: tonic::Status = err.into();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let err = ProviderError::AuthFailed("test".to_string());
        let status: tonic::Status = err.into();
        assert_eq!(status.code(), tonic::Code::Unauthenticated);

        let err = ProviderError::EndpointNotFound("dns in eu-de".to_string());
        let status: tonic::Status = err.into();
        assert_eq!(status.code(), tonic::Code::FailedPrecondition);
    }

    #[test]
    fn test_context_prefixes_message() {
        let err = ProviderError::Api(ApiError::new(
            "POST",
            "https://dns.example/v2/zones",
            400,
            r#"{"code":"DNS.0302","message":"Zone name is invalid"}"#,
        ))
        .context("creating DNS zone \"bad..\"");

        let display = err.to_string();
        assert!(display.starts_with("creating DNS zone \"bad..\": "));
        assert!(display.contains("Zone name is invalid"));
        assert_eq!(err.message(), "Zone name is invalid");
    }

    #[test]
    fn test_context_status_uses_root_code() {
        let err = ProviderError::DeadlineExceeded("10m0s".to_string())
            .context("waiting for zone to become ACTIVE");
        let status: tonic::Status = err.into();
        assert_eq!(status.code(), tonic::Code::DeadlineExceeded);
        assert!(status.message().starts_with("waiting for zone"));
    }

    #[test]
    fn test_result_ext() {
        let result: Result<(), ProviderError> =
            Err(ProviderError::Unavailable("busy".to_string()));
        let err = result.context("deleting stream").unwrap_err();
        assert_eq!(err.to_string(), "deleting stream: Service unavailable: busy");
        assert!(matches!(err.root(), ProviderError::Unavailable(_)));
    }

    #[test]
    fn test_unexpected_state_display() {
        let err = ProviderError::UnexpectedState {
            state: "ERROR".to_string(),
            target: "ACTIVE".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Unexpected state 'ERROR', wanted target 'ACTIVE'"
        );
    }
}
