//! Hemmer provider for Open Telekom Cloud.
//!
//! The crate is a Hemmer plugin: the host starts the `hemmer-provider-otc`
//! binary, reads the handshake line from its stdout and drives it over gRPC.
//! Behind the protocol sits a small resource core:
//!
//! - **Schema engine** ([`schema`], [`validation`]): typed attribute
//!   schemas, defaults, validation and diffing into plans.
//! - **Resource contract** ([`resource`], [`lifecycle`]): each resource type
//!   implements create, read, update and delete over a [`schema::ResourceData`];
//!   the lifecycle driver turns host calls into those callbacks with
//!   deadlines, cancellation and partial-state handling.
//! - **Vendor plumbing** ([`config`], [`client`], [`classify`]): credential
//!   resolution, token and AK/SK authentication, endpoint discovery and
//!   error classification with retries.
//! - **Helpers** ([`waiter`], [`quota`], [`tags`], [`import`]): status
//!   polling, process-wide quota booking, tag reconciliation and composite
//!   IDs.
//! - **Resources** ([`services`]): DNS zones and record sets, DIS streams,
//!   floating IPs, NAT DNAT rules and VPCs.
//!
//! # Handshake Protocol
//!
//! When the provider starts via [`serve`], it writes one line to stdout:
//!
//! ```text
//! HEMMER_PROVIDER|1|127.0.0.1:50051
//! ```
//!
//! Format: `HEMMER_PROVIDER|<protocol_version>|<address>`. Logs go to stderr.
//!
//! # Provider Protocol
//!
//! - **GetMetadata** / **GetSchema**: resource type names and schemas
//! - **ValidateProviderConfig** / **ConfigureProvider**: credentials
//! - **Stop**: cancels in-flight operations
//! - **ValidateResourceConfig**: schema validation of one resource block
//! - **UpgradeResourceState**: migrates state from older schema versions
//! - **PlanResourceChange**: diff prior state against configuration
//! - **ApplyResourceChange**: create, update or delete
//! - **ReadResource**: refresh and drift detection
//! - **ImportResourceState**: adopt an existing object by ID

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod catalog;
pub mod classify;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod import;
pub mod lifecycle;
pub mod logging;
pub mod provider;
pub mod quota;
pub mod resource;
pub mod schema;
pub mod server;
pub mod services;
pub mod tags;
pub mod testing;
pub mod types;
pub mod validation;
pub mod waiter;

#[allow(missing_docs)]
#[allow(clippy::all)]
pub mod generated;

pub use catalog::{default_catalog, Catalog};
pub use error::ProviderError;
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use provider::OtcProvider;
pub use resource::Resource;
pub use schema::ProviderSchema;
pub use server::{serve, serve_on, serve_on_listener, serve_with_options, ProviderService, ServeOptions};
pub use types::{
    ApplyResult, AttributeChange, ImportResult, ImportedResource, PlanResult, ProviderMetadata, ReadResult,
    ServerCapabilities, HANDSHAKE_PREFIX, PROTOCOL_VERSION,
};
pub use validation::{is_valid, validate, validate_result};

pub use async_trait::async_trait;

pub use serde_json;
pub use tonic;
pub use tracing;
