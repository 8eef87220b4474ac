//! Hemmer provider for the Elastic Stack.
//!
//! Manages Elasticsearch security users and anomaly detection jobs, Kibana
//! spaces and data views, and Fleet outputs, and reads cluster info and Fleet
//! enrollment tokens.
//!
//! # Handshake Protocol
//!
//! The binary serves `hemmer.provider.v1.Provider` on a local port and prints
//! one line to stdout once it is listening:
//!
//! ```text
//! HEMMER_PROVIDER|1|127.0.0.1:50051
//! ```
//!
//! Format: `HEMMER_PROVIDER|<protocol_version>|<address>`
//!
//! # Configuration
//!
//! The provider block has one nested block per service (`elasticsearch`,
//! `kibana`, `fleet`). `ELASTICSEARCH_*`, `KIBANA_*` and `FLEET_*`
//! environment variables override what the block sets; see [`config`].
//!
//! # Resource identity
//!
//! Elasticsearch objects are identified as `<cluster_uuid>/<name>` and Kibana
//! objects living in a space as `<space_id>/<object_id>`; see
//! [`composite_id::CompositeId`].

#![warn(clippy::all)]

pub mod clients;
pub mod composite_id;
pub mod config;
pub mod data_sources;
pub mod error;
pub mod logging;
pub mod plan;
pub mod provider;
pub mod resources;
pub mod schema;
pub mod server;
pub mod testing;
pub mod types;
pub mod typeutils;
pub mod validation;

#[allow(missing_docs)]
#[allow(clippy::all)]
pub mod generated;

pub use error::ProviderError;
pub use logging::{init_logging, try_init_logging};
pub use provider::ElasticStackProvider;
pub use schema::ProviderSchema;
pub use server::{
    serve, serve_on, serve_on_with_options, serve_with_options, ProviderService, ServeOptions,
};
pub use types::{
    AttributeChange, ImportedResource, PlanResult, ProviderMetadata, ServerCapabilities,
    HANDSHAKE_PREFIX, PROTOCOL_VERSION,
};
pub use validation::validate;

pub use async_trait::async_trait;
