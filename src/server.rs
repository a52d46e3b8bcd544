//! gRPC server for the provider protocol.
//!
//! This module provides the `ProviderService` trait the provider implements
//! and the `serve` functions that start a gRPC server with the handshake
//! protocol.
//!
//! # Signal Handling
//!
//! The server handles OS signals (SIGTERM, SIGINT) for graceful shutdown.
//! When a signal is received, the server:
//! 1. Stops accepting new connections
//! 2. Waits for in-flight requests to complete, up to the shutdown timeout
//! 3. Calls the provider's `stop()` method
//! 4. Exits cleanly

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::{debug, error, info, instrument, warn};

use crate::error::ProviderError;
use crate::generated;
use crate::schema::{has_errors, Block, BlockNestingMode, Diagnostic, DiagnosticSeverity, ProviderSchema, Schema};
use crate::types::{
    decode_state, encode_state, ApplyResult, ImportResult, PlanResult, ProviderMetadata, ReadResult,
    HANDSHAKE_PREFIX, PROTOCOL_VERSION,
};

/// The provider side of the protocol, in terms of `serde_json` values.
///
/// Null values stand for "no state": a null prior state plans or applies a
/// create, a null proposed or planned state a destroy.
#[async_trait::async_trait]
pub trait ProviderService: Send + Sync + 'static {
    // =========================================================================
    // Schema & Metadata
    // =========================================================================

    /// The provider configuration schema and every resource schema.
    fn schema(&self) -> ProviderSchema;

    /// Resource names and capabilities. By default derived from the schema.
    fn metadata(&self) -> ProviderMetadata {
        let mut resources: Vec<String> = self.schema().resources.keys().cloned().collect();
        resources.sort();
        ProviderMetadata {
            resources,
            capabilities: Default::default(),
        }
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Validate the provider block before configuring.
    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = config;
        Ok(vec![])
    }

    /// Configure credentials and settings.
    async fn configure(&self, config: Value, host_version: &str) -> Result<Vec<Diagnostic>, ProviderError>;

    /// Cancel in-flight work and stop.
    async fn stop(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Validate a resource configuration before planning.
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError>;

    /// Upgrade state written by an older schema version.
    async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: i64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        let _ = (resource_type, version);
        Ok(state)
    }

    /// Plan the change from `prior_state` to `proposed_state`.
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
        config: Value,
    ) -> Result<PlanResult, ProviderError>;

    /// Apply a planned change: create, update or delete.
    async fn apply(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
        config: Value,
    ) -> Result<ApplyResult, ProviderError>;

    /// Refresh stored state.
    async fn read(&self, resource_type: &str, current_state: Value) -> Result<ReadResult, ProviderError>;

    /// Import an existing object by ID.
    async fn import_resource(&self, resource_type: &str, id: &str) -> Result<ImportResult, ProviderError>;
}

/// Wrapper that implements the generated gRPC trait.
struct ProviderGrpcService<P: ProviderService> {
    provider: Arc<P>,
}

fn diagnostics_to_proto(diagnostics: Vec<Diagnostic>) -> Vec<generated::Diagnostic> {
    diagnostics
        .into_iter()
        .map(|d| generated::Diagnostic {
            severity: match d.severity {
                DiagnosticSeverity::Error => generated::diagnostic::Severity::Error as i32,
                DiagnosticSeverity::Warning => generated::diagnostic::Severity::Warning as i32,
            },
            summary: d.summary,
            detail: d.detail.unwrap_or_default(),
            attribute: d.attribute.unwrap_or_default(),
        })
        .collect()
}

fn error_to_diagnostics(err: &ProviderError) -> Vec<generated::Diagnostic> {
    diagnostics_to_proto(vec![Diagnostic::error(err.to_string())])
}

fn log_diagnostics(rpc: &str, resource_type: &str, diagnostics: &[Diagnostic]) {
    if has_errors(diagnostics) {
        warn!(resource_type, diagnostics = diagnostics.len(), "{} completed with errors", rpc);
    } else {
        debug!(resource_type, diagnostics = diagnostics.len(), "{} completed", rpc);
    }
}

fn schema_to_proto(schema: &Schema) -> generated::Schema {
    generated::Schema {
        version: schema.version as i64,
        block: Some(block_to_proto(&schema.block)),
    }
}

fn block_to_proto(block: &Block) -> generated::Block {
    let mut attributes: Vec<generated::Attribute> = block
        .attributes
        .iter()
        .map(|(name, attr)| generated::Attribute {
            name: name.clone(),
            r#type: serde_json::to_vec(&attr.attr_type).unwrap_or_default(),
            required: attr.flags.required,
            optional: attr.flags.optional,
            computed: attr.flags.computed,
            sensitive: attr.flags.sensitive,
            description: attr.description.clone().unwrap_or_default(),
            force_new: attr.force_new,
            default_value: attr.default.as_ref().map(encode_state).unwrap_or_default(),
            deprecation_message: attr.deprecated.clone().unwrap_or_default(),
        })
        .collect();
    attributes.sort_by(|a, b| a.name.cmp(&b.name));

    let mut block_types: Vec<generated::NestedBlock> = block
        .blocks
        .iter()
        .map(|(name, nested)| generated::NestedBlock {
            type_name: name.clone(),
            block: Some(block_to_proto(&nested.block)),
            nesting_mode: match nested.nesting_mode {
                BlockNestingMode::Single => generated::nested_block::NestingMode::Single as i32,
                BlockNestingMode::List => generated::nested_block::NestingMode::List as i32,
                BlockNestingMode::Set => generated::nested_block::NestingMode::Set as i32,
                BlockNestingMode::Map => generated::nested_block::NestingMode::Map as i32,
            },
            min_items: nested.min_items as i32,
            max_items: nested.max_items as i32,
        })
        .collect();
    block_types.sort_by(|a, b| a.type_name.cmp(&b.type_name));

    generated::Block {
        attributes,
        block_types,
        description: block.description.clone().unwrap_or_default(),
    }
}

/// Decode a request payload, naming the field on failure.
fn decode(field: &str, bytes: &[u8]) -> Result<Value, ProviderError> {
    decode_state(bytes).map_err(|e| ProviderError::InvalidRequest(format!("decoding {}: {}", field, e)))
}

#[tonic::async_trait]
impl<P: ProviderService> generated::provider_server::Provider for ProviderGrpcService<P> {
    #[instrument(skip(self, _request), name = "grpc.get_metadata")]
    async fn get_metadata(
        &self,
        _request: tonic::Request<generated::GetMetadataRequest>,
    ) -> Result<tonic::Response<generated::GetMetadataResponse>, tonic::Status> {
        let metadata = self.provider.metadata();
        debug!(resources = metadata.resources.len(), "GetMetadata completed");
        Ok(tonic::Response::new(generated::GetMetadataResponse {
            server_capabilities: Some(generated::ServerCapabilities {
                plan_destroy: metadata.capabilities.plan_destroy,
            }),
            resources: metadata.resources,
            diagnostics: vec![],
        }))
    }

    #[instrument(skip(self, _request), name = "grpc.get_schema")]
    async fn get_schema(
        &self,
        _request: tonic::Request<generated::GetSchemaRequest>,
    ) -> Result<tonic::Response<generated::GetSchemaResponse>, tonic::Status> {
        let schema = self.provider.schema();
        debug!(resources = schema.resources.len(), "GetSchema completed");
        Ok(tonic::Response::new(generated::GetSchemaResponse {
            provider: Some(schema_to_proto(&schema.provider)),
            resources: schema
                .resources
                .iter()
                .map(|(k, v)| (k.clone(), schema_to_proto(v)))
                .collect(),
            diagnostics: vec![],
        }))
    }

    #[instrument(skip(self, request), name = "grpc.validate_provider_config")]
    async fn validate_provider_config(
        &self,
        request: tonic::Request<generated::ValidateProviderConfigRequest>,
    ) -> Result<tonic::Response<generated::ValidateProviderConfigResponse>, tonic::Status> {
        let req = request.into_inner();
        let result = match decode("config", &req.config) {
            Ok(config) => self.provider.validate_provider_config(config).await,
            Err(e) => Err(e),
        };
        let diagnostics = match result {
            Ok(diagnostics) => {
                log_diagnostics("ValidateProviderConfig", "", &diagnostics);
                diagnostics_to_proto(diagnostics)
            },
            Err(e) => {
                error!(error = %e, "ValidateProviderConfig failed");
                error_to_diagnostics(&e)
            },
        };
        Ok(tonic::Response::new(generated::ValidateProviderConfigResponse { diagnostics }))
    }

    #[instrument(skip(self, request), name = "grpc.configure_provider")]
    async fn configure_provider(
        &self,
        request: tonic::Request<generated::ConfigureProviderRequest>,
    ) -> Result<tonic::Response<generated::ConfigureProviderResponse>, tonic::Status> {
        let req = request.into_inner();
        let result = match decode("config", &req.config) {
            Ok(config) => self.provider.configure(config, &req.host_version).await,
            Err(e) => Err(e),
        };
        let diagnostics = match result {
            Ok(diagnostics) => {
                if has_errors(&diagnostics) {
                    warn!(diagnostics = diagnostics.len(), "ConfigureProvider completed with errors");
                } else {
                    info!(host_version = %req.host_version, "provider configured");
                }
                diagnostics_to_proto(diagnostics)
            },
            Err(e) => {
                error!(error = %e, "ConfigureProvider failed");
                error_to_diagnostics(&e)
            },
        };
        Ok(tonic::Response::new(generated::ConfigureProviderResponse { diagnostics }))
    }

    #[instrument(skip(self, _request), name = "grpc.stop")]
    async fn stop(
        &self,
        _request: tonic::Request<generated::StopRequest>,
    ) -> Result<tonic::Response<generated::StopResponse>, tonic::Status> {
        info!("Stop called");
        let error = match self.provider.stop().await {
            Ok(()) => String::new(),
            Err(e) => {
                error!(error = %e, "Stop failed");
                e.to_string()
            },
        };
        Ok(tonic::Response::new(generated::StopResponse { error }))
    }

    #[instrument(skip(self, request), fields(resource_type = %request.get_ref().resource_type), name = "grpc.validate_resource_config")]
    async fn validate_resource_config(
        &self,
        request: tonic::Request<generated::ValidateResourceConfigRequest>,
    ) -> Result<tonic::Response<generated::ValidateResourceConfigResponse>, tonic::Status> {
        let req = request.into_inner();
        let result = match decode("config", &req.config) {
            Ok(config) => self.provider.validate_resource_config(&req.resource_type, config).await,
            Err(e) => Err(e),
        };
        let diagnostics = match result {
            Ok(diagnostics) => {
                log_diagnostics("ValidateResourceConfig", &req.resource_type, &diagnostics);
                diagnostics_to_proto(diagnostics)
            },
            Err(e) => {
                error!(error = %e, "ValidateResourceConfig failed");
                error_to_diagnostics(&e)
            },
        };
        Ok(tonic::Response::new(generated::ValidateResourceConfigResponse { diagnostics }))
    }

    #[instrument(skip(self, request), fields(resource_type = %request.get_ref().resource_type), name = "grpc.upgrade_resource_state")]
    async fn upgrade_resource_state(
        &self,
        request: tonic::Request<generated::UpgradeResourceStateRequest>,
    ) -> Result<tonic::Response<generated::UpgradeResourceStateResponse>, tonic::Status> {
        let req = request.into_inner();
        let result = match decode("raw_state", &req.raw_state) {
            Ok(state) => {
                self.provider
                    .upgrade_resource_state(&req.resource_type, req.version, state)
                    .await
            },
            Err(e) => Err(e),
        };
        let response = match result {
            Ok(upgraded) => {
                debug!(from_version = req.version, "UpgradeResourceState completed");
                generated::UpgradeResourceStateResponse {
                    upgraded_state: encode_state(&upgraded),
                    diagnostics: vec![],
                }
            },
            Err(e) => {
                error!(version = req.version, error = %e, "UpgradeResourceState failed");
                generated::UpgradeResourceStateResponse {
                    upgraded_state: vec![],
                    diagnostics: error_to_diagnostics(&e),
                }
            },
        };
        Ok(tonic::Response::new(response))
    }

    #[instrument(skip(self, request), fields(resource_type = %request.get_ref().resource_type), name = "grpc.plan_resource_change")]
    async fn plan_resource_change(
        &self,
        request: tonic::Request<generated::PlanResourceChangeRequest>,
    ) -> Result<tonic::Response<generated::PlanResourceChangeResponse>, tonic::Status> {
        let req = request.into_inner();
        let decoded = decode("prior_state", &req.prior_state).and_then(|prior| {
            Ok((
                prior,
                decode("proposed_new_state", &req.proposed_new_state)?,
                decode("config", &req.config)?,
            ))
        });
        let result = match decoded {
            Ok((prior, proposed, config)) => {
                self.provider
                    .plan(&req.resource_type, prior, proposed, config)
                    .await
            },
            Err(e) => Err(e),
        };
        let response = match result {
            Ok(result) => {
                debug!(
                    changes = result.changes.len(),
                    requires_replace = result.requires_replace,
                    "PlanResourceChange completed"
                );
                generated::PlanResourceChangeResponse {
                    planned_state: encode_state(&result.planned_state),
                    changes: result.changes.into_iter().map(Into::into).collect(),
                    requires_replace: result.requires_replace,
                    diagnostics: diagnostics_to_proto(result.diagnostics),
                }
            },
            Err(e) => {
                error!(error = %e, "PlanResourceChange failed");
                generated::PlanResourceChangeResponse {
                    planned_state: vec![],
                    changes: vec![],
                    requires_replace: false,
                    diagnostics: error_to_diagnostics(&e),
                }
            },
        };
        Ok(tonic::Response::new(response))
    }

    #[instrument(skip(self, request), fields(resource_type = %request.get_ref().resource_type), name = "grpc.apply_resource_change")]
    async fn apply_resource_change(
        &self,
        request: tonic::Request<generated::ApplyResourceChangeRequest>,
    ) -> Result<tonic::Response<generated::ApplyResourceChangeResponse>, tonic::Status> {
        let req = request.into_inner();
        let decoded = decode("prior_state", &req.prior_state).and_then(|prior| {
            Ok((
                prior,
                decode("planned_state", &req.planned_state)?,
                decode("config", &req.config)?,
            ))
        });
        let (prior, planned, config) = match decoded {
            Ok(values) => values,
            Err(e) => {
                error!(error = %e, "ApplyResourceChange failed");
                return Ok(tonic::Response::new(generated::ApplyResourceChangeResponse {
                    new_state: req.prior_state,
                    diagnostics: error_to_diagnostics(&e),
                }));
            },
        };

        let response = match self
            .provider
            .apply(&req.resource_type, prior.clone(), planned, config)
            .await
        {
            Ok(result) => {
                log_diagnostics("ApplyResourceChange", &req.resource_type, &result.diagnostics);
                generated::ApplyResourceChangeResponse {
                    new_state: encode_state(&result.new_state),
                    diagnostics: diagnostics_to_proto(result.diagnostics),
                }
            },
            Err(e) => {
                error!(error = %e, "ApplyResourceChange failed");
                generated::ApplyResourceChangeResponse {
                    new_state: encode_state(&prior),
                    diagnostics: error_to_diagnostics(&e),
                }
            },
        };
        Ok(tonic::Response::new(response))
    }

    #[instrument(skip(self, request), fields(resource_type = %request.get_ref().resource_type), name = "grpc.read_resource")]
    async fn read_resource(
        &self,
        request: tonic::Request<generated::ReadResourceRequest>,
    ) -> Result<tonic::Response<generated::ReadResourceResponse>, tonic::Status> {
        let req = request.into_inner();
        let result = match decode("current_state", &req.current_state) {
            Ok(state) => self.provider.read(&req.resource_type, state).await,
            Err(e) => Err(e),
        };
        let response = match result {
            Ok(result) => {
                log_diagnostics("ReadResource", &req.resource_type, &result.diagnostics);
                generated::ReadResourceResponse {
                    new_state: encode_state(&result.new_state),
                    diagnostics: diagnostics_to_proto(result.diagnostics),
                }
            },
            Err(e) => {
                error!(error = %e, "ReadResource failed");
                generated::ReadResourceResponse {
                    new_state: req.current_state,
                    diagnostics: error_to_diagnostics(&e),
                }
            },
        };
        Ok(tonic::Response::new(response))
    }

    #[instrument(skip(self, request), fields(resource_type = %request.get_ref().resource_type), name = "grpc.import_resource_state")]
    async fn import_resource_state(
        &self,
        request: tonic::Request<generated::ImportResourceStateRequest>,
    ) -> Result<tonic::Response<generated::ImportResourceStateResponse>, tonic::Status> {
        let req = request.into_inner();
        let response = match self.provider.import_resource(&req.resource_type, &req.id).await {
            Ok(result) => {
                info!(id = %req.id, imported = result.imported.len(), "ImportResourceState completed");
                generated::ImportResourceStateResponse {
                    imported: result
                        .imported
                        .into_iter()
                        .map(|r| generated::ImportedResource {
                            resource_type: r.resource_type,
                            state: encode_state(&r.state),
                        })
                        .collect(),
                    diagnostics: diagnostics_to_proto(result.diagnostics),
                }
            },
            Err(e) => {
                error!(id = %req.id, error = %e, "ImportResourceState failed");
                generated::ImportResourceStateResponse {
                    imported: vec![],
                    diagnostics: error_to_diagnostics(&e),
                }
            },
        };
        Ok(tonic::Response::new(response))
    }
}

/// Options for configuring the provider server.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// How long in-flight requests may run after a shutdown signal.
    /// Default: 30 seconds.
    pub shutdown_timeout: Duration,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl ServeOptions {
    /// Create new serve options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// On Unix, this waits for SIGTERM or SIGINT.
/// On Windows, this waits for CTRL+C.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
            }
            _ = sigint.recv() => {
                info!("received SIGINT, shutting down");
            }
        }
    }

    #[cfg(windows)]
    {
        tokio::signal::ctrl_c().await.expect("Failed to install CTRL+C handler");
        info!("received CTRL+C, shutting down");
    }

    #[cfg(not(any(unix, windows)))]
    {
        std::future::pending::<()>().await;
    }
}

/// Serve a provider as a gRPC server.
///
/// This function:
/// 1. Binds a free loopback port
/// 2. Starts the gRPC server
/// 3. Prints the handshake line to stdout
/// 4. Handles shutdown signals (SIGTERM/SIGINT) gracefully
///
/// The handshake format is: `HEMMER_PROVIDER|<version>|<address>`
pub async fn serve<P: ProviderService>(provider: P) -> Result<(), Box<dyn std::error::Error>> {
    serve_with_options(provider, ServeOptions::default()).await
}

/// Serve a provider with custom options.
pub async fn serve_with_options<P: ProviderService>(
    provider: P,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    serve_on_listener(provider, listener, options, wait_for_shutdown_signal()).await
}

/// Serve a provider on a specific address.
pub async fn serve_on<P: ProviderService>(provider: P, addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(addr).await?;
    serve_on_listener(provider, listener, ServeOptions::default(), wait_for_shutdown_signal()).await
}

/// Serve on an already-bound listener until `shutdown` resolves.
///
/// The handshake is printed before the first request is accepted. Once
/// `shutdown` resolves, in-flight requests get `shutdown_timeout` to finish
/// before the provider is stopped.
pub async fn serve_on_listener<P, S>(
    provider: P,
    listener: TcpListener,
    options: ServeOptions,
    shutdown: S,
) -> Result<(), Box<dyn std::error::Error>>
where
    P: ProviderService,
    S: Future<Output = ()> + Send,
{
    let addr = listener.local_addr()?;
    println!("{}|{}|{}", HANDSHAKE_PREFIX, PROTOCOL_VERSION, addr);
    info!(address = %addr, "provider server starting");

    let provider = Arc::new(provider);
    let grpc_service = ProviderGrpcService {
        provider: Arc::clone(&provider),
    };

    let draining = CancellationToken::new();
    let drain_signal = draining.clone();
    let server = Server::builder()
        .add_service(generated::provider_server::ProviderServer::new(grpc_service))
        .serve_with_incoming_shutdown(
            tokio_stream::wrappers::TcpListenerStream::new(listener),
            async move { drain_signal.cancelled().await },
        );
    tokio::pin!(server);
    tokio::pin!(shutdown);

    // The timeout only bounds the drain, not the server's lifetime.
    let outcome = tokio::select! {
        result = &mut server => Some(result),
        _ = &mut shutdown => {
            draining.cancel();
            match tokio::time::timeout(options.shutdown_timeout, &mut server).await {
                Ok(result) => Some(result),
                Err(_) => {
                    warn!(timeout = ?options.shutdown_timeout, "in-flight requests did not finish, forcing shutdown");
                    None
                },
            }
        }
    };

    debug!("stopping provider");
    if let Err(e) = provider.stop().await {
        warn!(error = %e, "provider stop returned an error");
    }

    match outcome {
        Some(Err(e)) => {
            error!(error = %e, "server error");
            Err(e.into())
        },
        _ => {
            info!("provider shutdown complete");
            Ok(())
        },
    }
}
