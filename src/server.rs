//! The gRPC side of the provider.
//!
//! [`ProviderService`] is the typed lifecycle the Elastic Stack provider
//! implements; [`serve`] exposes it over `hemmer.provider.v1.Provider` and
//! prints the handshake line the host waits for.
//!
//! Failures never surface as gRPC statuses. They are turned into error
//! diagnostics on the response, with API response bodies as detail.
//!
//! On SIGTERM or SIGINT the server stops accepting connections, gives
//! in-flight requests up to [`ServeOptions::shutdown_timeout`] to finish,
//! then calls [`ProviderService::stop`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tonic::transport::Server;
use tracing::{debug, error, info, instrument, warn};

use crate::error::ProviderError;
use crate::schema::{Diagnostic, DiagnosticSeverity, ProviderSchema};
use crate::types::{
    ImportedResource, PlanResult, ProviderMetadata, HANDSHAKE_PREFIX, PROTOCOL_VERSION,
};

/// The provider lifecycle, in terms of JSON values rather than protobuf messages.
///
/// Config and state travel as JSON; an empty state on the wire is `null` here.
#[async_trait::async_trait]
pub trait ProviderService: Send + Sync + 'static {
    /// Provider block plus every resource and data source schema.
    fn schema(&self) -> ProviderSchema;

    /// Type names the host can ask about, taken from [`Self::schema`] unless overridden.
    fn metadata(&self) -> ProviderMetadata {
        let schema = self.schema();
        ProviderMetadata {
            resources: schema.resources.keys().cloned().collect(),
            data_sources: schema.data_sources.keys().cloned().collect(),
            capabilities: Default::default(),
        }
    }

    /// Check a provider block without connecting to anything.
    async fn validate_provider_config(
        &self,
        config: serde_json::Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = config;
        Ok(vec![])
    }

    /// Resolve the provider block against the environment and build API clients.
    async fn configure(&self, config: serde_json::Value) -> Result<Vec<Diagnostic>, ProviderError>;

    /// Release clients. Called once the server has drained.
    async fn stop(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: serde_json::Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = (resource_type, config);
        Ok(vec![])
    }

    /// Migrate state written under an older schema version.
    async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: i64,
        state: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError> {
        let _ = (resource_type, version);
        Ok(state)
    }

    /// Compute the planned state and whether the object must be replaced.
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<serde_json::Value>,
        proposed_state: serde_json::Value,
        config: serde_json::Value,
    ) -> Result<PlanResult, ProviderError>;

    async fn create(
        &self,
        resource_type: &str,
        planned_state: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError>;

    /// Refresh the state of a resource.
    ///
    /// `None` means the remote object is gone and should be dropped from state.
    async fn read(
        &self,
        resource_type: &str,
        current_state: serde_json::Value,
    ) -> Result<Option<serde_json::Value>, ProviderError>;

    /// Apply an in-place update. The returned state is what the API reports afterwards.
    async fn update(
        &self,
        resource_type: &str,
        prior_state: serde_json::Value,
        planned_state: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError>;

    /// Remove the remote object. A missing object counts as deleted.
    async fn delete(
        &self,
        resource_type: &str,
        current_state: serde_json::Value,
    ) -> Result<(), ProviderError>;

    /// Adopt an existing object by its import id.
    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let _ = id;
        Err(ProviderError::InvalidRequest(format!(
            "{} cannot be imported",
            resource_type
        )))
    }

    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: serde_json::Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = (data_source_type, config);
        Ok(vec![])
    }

    /// Query a data source.
    async fn read_data_source(
        &self,
        data_source_type: &str,
        config: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError> {
        let _ = config;
        Err(ProviderError::UnknownResource(data_source_type.to_string()))
    }
}

/// Adapts a [`ProviderService`] to the generated gRPC trait.
struct ProviderGrpcService<P: ProviderService> {
    provider: Arc<P>,
}

type GrpcResult<T> = Result<tonic::Response<T>, tonic::Status>;

/// Decode a JSON payload from the wire. An empty payload is `null`.
fn decode(field: &str, bytes: &[u8]) -> Result<serde_json::Value, ProviderError> {
    if bytes.is_empty() {
        return Ok(serde_json::Value::Null);
    }
    serde_json::from_slice(bytes)
        .map_err(|e| ProviderError::InvalidRequest(format!("Malformed JSON in {}: {}", field, e)))
}

fn encode(value: &serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_default()
}

fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics
        .iter()
        .any(|d| d.severity == DiagnosticSeverity::Error)
}

fn diagnostics_to_proto(diagnostics: Vec<Diagnostic>) -> Vec<crate::generated::Diagnostic> {
    use crate::generated::diagnostic::Severity;

    diagnostics
        .into_iter()
        .map(|d| crate::generated::Diagnostic {
            severity: match d.severity {
                DiagnosticSeverity::Error => Severity::Error as i32,
                DiagnosticSeverity::Warning => Severity::Warning as i32,
            },
            summary: d.summary,
            detail: d.detail.unwrap_or_default(),
            attribute: d.attribute.unwrap_or_default(),
        })
        .collect()
}

/// Log the outcome of an operation that answers with diagnostics, then convert them.
fn report(
    operation: &str,
    type_name: &str,
    result: Result<Vec<Diagnostic>, ProviderError>,
) -> Vec<crate::generated::Diagnostic> {
    match result {
        Ok(diagnostics) if has_errors(&diagnostics) => {
            warn!(operation, type_name, diagnostics = diagnostics.len(), "Completed with errors");
            diagnostics_to_proto(diagnostics)
        },
        Ok(diagnostics) => {
            debug!(operation, type_name, "Completed");
            diagnostics_to_proto(diagnostics)
        },
        Err(e) => failure(operation, type_name, e),
    }
}

/// Log a failed operation and render the error as diagnostics.
fn failure(
    operation: &str,
    type_name: &str,
    err: ProviderError,
) -> Vec<crate::generated::Diagnostic> {
    error!(operation, type_name, error = %err, "Failed");
    diagnostics_to_proto(vec![err.to_diagnostic()])
}

fn schema_to_proto(schema: &crate::schema::Schema) -> crate::generated::Schema {
    crate::generated::Schema {
        version: schema.version as i64,
        block: Some(block_to_proto(&schema.block)),
    }
}

fn block_to_proto(block: &crate::schema::Block) -> crate::generated::Block {
    use crate::generated::nested_block::NestingMode;
    use crate::schema::BlockNestingMode;

    crate::generated::Block {
        attributes: block
            .attributes
            .iter()
            .map(|(name, attr)| crate::generated::Attribute {
                name: name.clone(),
                r#type: serde_json::to_vec(&attr.attr_type).unwrap_or_default(),
                required: attr.flags.required,
                optional: attr.flags.optional,
                computed: attr.flags.computed,
                sensitive: attr.flags.sensitive,
                description: attr.description.clone().unwrap_or_default(),
                force_new: attr.force_new,
                default_value: attr.default.as_ref().map(encode).unwrap_or_default(),
            })
            .collect(),
        block_types: block
            .blocks
            .iter()
            .map(|(name, nested)| crate::generated::NestedBlock {
                type_name: name.clone(),
                block: Some(block_to_proto(&nested.block)),
                nesting_mode: match nested.nesting_mode {
                    BlockNestingMode::Single => NestingMode::Single as i32,
                    BlockNestingMode::List => NestingMode::List as i32,
                    BlockNestingMode::Set => NestingMode::Set as i32,
                    BlockNestingMode::Map => NestingMode::Map as i32,
                },
                min_items: nested.min_items as i32,
                max_items: nested.max_items as i32,
                force_new: nested.force_new,
            })
            .collect(),
        description: block.description.clone().unwrap_or_default(),
    }
}

#[tonic::async_trait]
impl<P: ProviderService> crate::generated::provider_server::Provider for ProviderGrpcService<P> {
    #[instrument(skip_all, name = "grpc.get_metadata")]
    async fn get_metadata(
        &self,
        _request: tonic::Request<crate::generated::GetMetadataRequest>,
    ) -> GrpcResult<crate::generated::GetMetadataResponse> {
        let metadata = self.provider.metadata();
        debug!(
            resources = metadata.resources.len(),
            data_sources = metadata.data_sources.len(),
            "GetMetadata"
        );
        Ok(tonic::Response::new(crate::generated::GetMetadataResponse {
            server_capabilities: Some(crate::generated::ServerCapabilities {
                plan_destroy: metadata.capabilities.plan_destroy,
            }),
            resources: metadata.resources,
            data_sources: metadata.data_sources,
            diagnostics: vec![],
        }))
    }

    #[instrument(skip_all, name = "grpc.get_schema")]
    async fn get_schema(
        &self,
        _request: tonic::Request<crate::generated::GetSchemaRequest>,
    ) -> GrpcResult<crate::generated::GetSchemaResponse> {
        let schema = self.provider.schema();
        debug!(
            resources = schema.resources.len(),
            data_sources = schema.data_sources.len(),
            "GetSchema"
        );
        let to_proto = |schemas: &std::collections::HashMap<String, crate::schema::Schema>| {
            schemas
                .iter()
                .map(|(name, schema)| (name.clone(), schema_to_proto(schema)))
                .collect()
        };
        Ok(tonic::Response::new(crate::generated::GetSchemaResponse {
            provider: Some(schema_to_proto(&schema.provider)),
            resources: to_proto(&schema.resources),
            data_sources: to_proto(&schema.data_sources),
            diagnostics: vec![],
        }))
    }

    #[instrument(skip_all, name = "grpc.validate_provider_config")]
    async fn validate_provider_config(
        &self,
        request: tonic::Request<crate::generated::ValidateProviderConfigRequest>,
    ) -> GrpcResult<crate::generated::ValidateProviderConfigResponse> {
        let req = request.into_inner();
        let result = async {
            let config = decode("config", &req.config)?;
            self.provider.validate_provider_config(config).await
        }
        .await;
        Ok(tonic::Response::new(
            crate::generated::ValidateProviderConfigResponse {
                diagnostics: report("validate_provider_config", "provider", result),
            },
        ))
    }

    #[instrument(skip_all, name = "grpc.configure")]
    async fn configure(
        &self,
        request: tonic::Request<crate::generated::ConfigureRequest>,
    ) -> GrpcResult<crate::generated::ConfigureResponse> {
        let req = request.into_inner();
        let result = async {
            let config = decode("config", &req.config)?;
            self.provider.configure(config).await
        }
        .await;
        Ok(tonic::Response::new(crate::generated::ConfigureResponse {
            diagnostics: report("configure", "provider", result),
        }))
    }

    #[instrument(skip_all, name = "grpc.stop")]
    async fn stop(
        &self,
        _request: tonic::Request<crate::generated::StopRequest>,
    ) -> GrpcResult<crate::generated::StopResponse> {
        info!("Stop requested");
        let error = match self.provider.stop().await {
            Ok(()) => String::new(),
            Err(e) => {
                error!(error = %e, "Stop failed");
                e.to_string()
            },
        };
        Ok(tonic::Response::new(crate::generated::StopResponse { error }))
    }

    #[instrument(skip_all, name = "grpc.validate_resource_config", fields(resource_type))]
    async fn validate_resource_config(
        &self,
        request: tonic::Request<crate::generated::ValidateResourceConfigRequest>,
    ) -> GrpcResult<crate::generated::ValidateResourceConfigResponse> {
        let req = request.into_inner();
        tracing::Span::current().record("resource_type", req.resource_type.as_str());
        let result = async {
            let config = decode("config", &req.config)?;
            self.provider
                .validate_resource_config(&req.resource_type, config)
                .await
        }
        .await;
        Ok(tonic::Response::new(
            crate::generated::ValidateResourceConfigResponse {
                diagnostics: report("validate_resource_config", &req.resource_type, result),
            },
        ))
    }

    #[instrument(skip_all, name = "grpc.upgrade_resource_state", fields(resource_type))]
    async fn upgrade_resource_state(
        &self,
        request: tonic::Request<crate::generated::UpgradeResourceStateRequest>,
    ) -> GrpcResult<crate::generated::UpgradeResourceStateResponse> {
        let req = request.into_inner();
        tracing::Span::current().record("resource_type", req.resource_type.as_str());
        let result = async {
            let state = decode("raw_state", &req.raw_state)?;
            self.provider
                .upgrade_resource_state(&req.resource_type, req.version, state)
                .await
        }
        .await;

        let response = match result {
            Ok(upgraded) => crate::generated::UpgradeResourceStateResponse {
                upgraded_state: encode(&upgraded),
                diagnostics: vec![],
            },
            Err(e) => crate::generated::UpgradeResourceStateResponse {
                upgraded_state: vec![],
                diagnostics: failure("upgrade_resource_state", &req.resource_type, e),
            },
        };
        Ok(tonic::Response::new(response))
    }

    #[instrument(skip_all, name = "grpc.plan", fields(resource_type))]
    async fn plan(
        &self,
        request: tonic::Request<crate::generated::PlanRequest>,
    ) -> GrpcResult<crate::generated::PlanResponse> {
        let req = request.into_inner();
        tracing::Span::current().record("resource_type", req.resource_type.as_str());
        let result = async {
            let prior_state = decode("prior_state", &req.prior_state)?;
            let prior_state = Some(prior_state).filter(|v| !v.is_null());
            let proposed_state = decode("proposed_state", &req.proposed_state)?;
            let config = decode("config", &req.config)?;
            self.provider
                .plan(&req.resource_type, prior_state, proposed_state, config)
                .await
        }
        .await;

        let response = match result {
            Ok(result) => {
                info!(
                    changes = result.changes.len(),
                    requires_replace = result.requires_replace,
                    "Planned"
                );
                crate::generated::PlanResponse {
                    planned_state: encode(&result.planned_state),
                    changes: result.changes.into_iter().map(Into::into).collect(),
                    requires_replace: result.requires_replace,
                    diagnostics: vec![],
                }
            },
            Err(e) => crate::generated::PlanResponse {
                planned_state: vec![],
                changes: vec![],
                requires_replace: false,
                diagnostics: failure("plan", &req.resource_type, e),
            },
        };
        Ok(tonic::Response::new(response))
    }

    #[instrument(skip_all, name = "grpc.create", fields(resource_type))]
    async fn create(
        &self,
        request: tonic::Request<crate::generated::CreateRequest>,
    ) -> GrpcResult<crate::generated::CreateResponse> {
        let req = request.into_inner();
        tracing::Span::current().record("resource_type", req.resource_type.as_str());
        let result = async {
            let planned_state = decode("planned_state", &req.planned_state)?;
            self.provider.create(&req.resource_type, planned_state).await
        }
        .await;

        let response = match result {
            Ok(state) => {
                info!("Created");
                crate::generated::CreateResponse {
                    state: encode(&state),
                    diagnostics: vec![],
                }
            },
            Err(e) => crate::generated::CreateResponse {
                state: vec![],
                diagnostics: failure("create", &req.resource_type, e),
            },
        };
        Ok(tonic::Response::new(response))
    }

    #[instrument(skip_all, name = "grpc.read", fields(resource_type))]
    async fn read(
        &self,
        request: tonic::Request<crate::generated::ReadRequest>,
    ) -> GrpcResult<crate::generated::ReadResponse> {
        let req = request.into_inner();
        tracing::Span::current().record("resource_type", req.resource_type.as_str());
        let result = async {
            let current_state = decode("current_state", &req.current_state)?;
            self.provider.read(&req.resource_type, current_state).await
        }
        .await;

        let response = match result {
            Ok(Some(state)) => crate::generated::ReadResponse {
                state: encode(&state),
                diagnostics: vec![],
            },
            Ok(None) => {
                warn!("Object no longer exists, removing it from state");
                crate::generated::ReadResponse {
                    state: vec![],
                    diagnostics: vec![],
                }
            },
            Err(e) => crate::generated::ReadResponse {
                state: vec![],
                diagnostics: failure("read", &req.resource_type, e),
            },
        };
        Ok(tonic::Response::new(response))
    }

    #[instrument(skip_all, name = "grpc.update", fields(resource_type))]
    async fn update(
        &self,
        request: tonic::Request<crate::generated::UpdateRequest>,
    ) -> GrpcResult<crate::generated::UpdateResponse> {
        let req = request.into_inner();
        tracing::Span::current().record("resource_type", req.resource_type.as_str());
        let result = async {
            let prior_state = decode("prior_state", &req.prior_state)?;
            let planned_state = decode("planned_state", &req.planned_state)?;
            self.provider
                .update(&req.resource_type, prior_state, planned_state)
                .await
        }
        .await;

        let response = match result {
            Ok(state) => {
                info!("Updated");
                crate::generated::UpdateResponse {
                    state: encode(&state),
                    diagnostics: vec![],
                }
            },
            Err(e) => crate::generated::UpdateResponse {
                state: vec![],
                diagnostics: failure("update", &req.resource_type, e),
            },
        };
        Ok(tonic::Response::new(response))
    }

    #[instrument(skip_all, name = "grpc.delete", fields(resource_type))]
    async fn delete(
        &self,
        request: tonic::Request<crate::generated::DeleteRequest>,
    ) -> GrpcResult<crate::generated::DeleteResponse> {
        let req = request.into_inner();
        tracing::Span::current().record("resource_type", req.resource_type.as_str());
        let result = async {
            let current_state = decode("current_state", &req.current_state)?;
            self.provider.delete(&req.resource_type, current_state).await
        }
        .await;

        let diagnostics = match result {
            Ok(()) => {
                info!("Deleted");
                vec![]
            },
            Err(e) => failure("delete", &req.resource_type, e),
        };
        Ok(tonic::Response::new(crate::generated::DeleteResponse { diagnostics }))
    }

    #[instrument(skip_all, name = "grpc.import_resource_state", fields(resource_type))]
    async fn import_resource_state(
        &self,
        request: tonic::Request<crate::generated::ImportResourceStateRequest>,
    ) -> GrpcResult<crate::generated::ImportResourceStateResponse> {
        let req = request.into_inner();
        tracing::Span::current().record("resource_type", req.resource_type.as_str());

        let response = match self.provider.import_resource(&req.resource_type, &req.id).await {
            Ok(imported) => {
                info!(id = %req.id, count = imported.len(), "Imported");
                crate::generated::ImportResourceStateResponse {
                    imported: imported
                        .into_iter()
                        .map(|r| crate::generated::ImportedResource {
                            state: encode(&r.state),
                            resource_type: r.resource_type,
                        })
                        .collect(),
                    diagnostics: vec![],
                }
            },
            Err(e) => crate::generated::ImportResourceStateResponse {
                imported: vec![],
                diagnostics: failure("import", &req.resource_type, e),
            },
        };
        Ok(tonic::Response::new(response))
    }

    #[instrument(skip_all, name = "grpc.validate_data_source_config", fields(data_source_type))]
    async fn validate_data_source_config(
        &self,
        request: tonic::Request<crate::generated::ValidateDataSourceConfigRequest>,
    ) -> GrpcResult<crate::generated::ValidateDataSourceConfigResponse> {
        let req = request.into_inner();
        tracing::Span::current().record("data_source_type", req.data_source_type.as_str());
        let result = async {
            let config = decode("config", &req.config)?;
            self.provider
                .validate_data_source_config(&req.data_source_type, config)
                .await
        }
        .await;
        Ok(tonic::Response::new(
            crate::generated::ValidateDataSourceConfigResponse {
                diagnostics: report("validate_data_source_config", &req.data_source_type, result),
            },
        ))
    }

    #[instrument(skip_all, name = "grpc.read_data_source", fields(data_source_type))]
    async fn read_data_source(
        &self,
        request: tonic::Request<crate::generated::ReadDataSourceRequest>,
    ) -> GrpcResult<crate::generated::ReadDataSourceResponse> {
        let req = request.into_inner();
        tracing::Span::current().record("data_source_type", req.data_source_type.as_str());
        let result = async {
            let config = decode("config", &req.config)?;
            self.provider
                .read_data_source(&req.data_source_type, config)
                .await
        }
        .await;

        let response = match result {
            Ok(state) => crate::generated::ReadDataSourceResponse {
                state: encode(&state),
                diagnostics: vec![],
            },
            Err(e) => crate::generated::ReadDataSourceResponse {
                state: vec![],
                diagnostics: failure("read_data_source", &req.data_source_type, e),
            },
        };
        Ok(tonic::Response::new(response))
    }
}

/// Server knobs.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// How long in-flight requests may run after a shutdown signal. Defaults to 30 seconds.
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
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Wait for SIGTERM or SIGINT (CTRL+C on Windows).
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            _ = sigint.recv() => info!("Received SIGINT, shutting down"),
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received CTRL+C, shutting down");
        Ok(())
    }
}

/// Bind an ephemeral loopback port, print `HEMMER_PROVIDER|<version>|<address>`
/// and serve until SIGTERM or SIGINT.
pub async fn serve<P: ProviderService>(provider: P) -> Result<(), Box<dyn std::error::Error>> {
    serve_with_options(provider, ServeOptions::default()).await
}

/// [`serve`] with explicit [`ServeOptions`].
pub async fn serve_with_options<P: ProviderService>(
    provider: P,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    serve_on_listener(provider, listener, addr, options).await
}

/// Like [`serve`], on a fixed address.
pub async fn serve_on<P: ProviderService>(
    provider: P,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error>> {
    serve_on_with_options(provider, addr, ServeOptions::default()).await
}

pub async fn serve_on_with_options<P: ProviderService>(
    provider: P,
    addr: SocketAddr,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    serve_on_listener(provider, listener, actual_addr, options).await
}

async fn serve_on_listener<P: ProviderService>(
    provider: P,
    listener: TcpListener,
    addr: SocketAddr,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries nothing but the handshake line.
    println!("{}|{}|{}", HANDSHAKE_PREFIX, PROTOCOL_VERSION, addr);

    info!(address = %addr, "Provider server starting");

    let provider = Arc::new(provider);
    let grpc_service = ProviderGrpcService {
        provider: Arc::clone(&provider),
    };

    let (signalled_tx, signalled_rx) = tokio::sync::oneshot::channel::<()>();
    let shutdown = async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Failed to install signal handlers");
            std::future::pending::<()>().await;
        }
        let _ = signalled_tx.send(());
    };

    let server_future = Server::builder()
        .add_service(crate::generated::provider_server::ProviderServer::new(
            grpc_service,
        ))
        .serve_with_incoming_shutdown(
            tokio_stream::wrappers::TcpListenerStream::new(listener),
            shutdown,
        );
    tokio::pin!(server_future);

    // The timeout only bounds the drain after a signal.
    tokio::select! {
        result = &mut server_future => {
            if let Err(e) = result {
                error!(error = %e, "Server error");
                return Err(e.into());
            }
        }
        _ = signalled_rx => {
            match tokio::time::timeout(options.shutdown_timeout, &mut server_future).await {
                Ok(Ok(())) => info!("Server shutdown complete"),
                Ok(Err(e)) => {
                    error!(error = %e, "Server error during shutdown");
                    return Err(e.into());
                }
                Err(_) => warn!(
                    timeout = ?options.shutdown_timeout,
                    "Shutdown timeout exceeded, forcing shutdown"
                ),
            }
        }
    }

    if let Err(e) = provider.stop().await {
        warn!(error = %e, "Releasing clients failed");
    }
    info!("Provider stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generated::provider_server::Provider;
    use crate::schema::{Attribute, Block, NestedBlock, Schema};
    use serde_json::{json, Value};

    struct GoneProvider;

    #[async_trait::async_trait]
    impl ProviderService for GoneProvider {
        fn schema(&self) -> ProviderSchema {
            ProviderSchema::new().with_resource(
                "elasticstack_kibana_space",
                Schema::v0().with_attribute("space_id", Attribute::required_string()),
            )
        }

        async fn configure(&self, _config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
            Ok(vec![])
        }

        async fn plan(
            &self,
            _resource_type: &str,
            _prior_state: Option<Value>,
            proposed_state: Value,
            _config: Value,
        ) -> Result<PlanResult, ProviderError> {
            Ok(PlanResult::no_change(proposed_state))
        }

        async fn create(
            &self,
            _resource_type: &str,
            _planned: Value,
        ) -> Result<Value, ProviderError> {
            Err(ProviderError::Api {
                summary: "POST /api/spaces/space failed with status 400".to_string(),
                status: 400,
                body: r#"{"message":"bad space"}"#.to_string(),
            })
        }

        async fn read(
            &self,
            _resource_type: &str,
            _current_state: Value,
        ) -> Result<Option<Value>, ProviderError> {
            Ok(None)
        }

        async fn update(
            &self,
            _resource_type: &str,
            _prior: Value,
            planned: Value,
        ) -> Result<Value, ProviderError> {
            Ok(planned)
        }

        async fn delete(&self, _resource_type: &str, _state: Value) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    fn service() -> ProviderGrpcService<GoneProvider> {
        ProviderGrpcService {
            provider: Arc::new(GoneProvider),
        }
    }

    #[tokio::test]
    async fn test_read_of_missing_object_returns_empty_state() {
        let response = service()
            .read(tonic::Request::new(crate::generated::ReadRequest {
                resource_type: "elasticstack_kibana_space".to_string(),
                current_state: serde_json::to_vec(&json!({"space_id": "ops"})).unwrap(),
            }))
            .await
            .unwrap()
            .into_inner();

        assert!(response.state.is_empty());
        assert!(response.diagnostics.is_empty());
    }

    #[tokio::test]
    async fn test_api_failure_becomes_diagnostic_with_body() {
        let response = service()
            .create(tonic::Request::new(crate::generated::CreateRequest {
                resource_type: "elasticstack_kibana_space".to_string(),
                planned_state: serde_json::to_vec(&json!({"space_id": "ops"})).unwrap(),
            }))
            .await
            .unwrap()
            .into_inner();

        assert!(response.state.is_empty());
        assert_eq!(response.diagnostics.len(), 1);
        let diag = &response.diagnostics[0];
        assert_eq!(
            diag.severity,
            crate::generated::diagnostic::Severity::Error as i32
        );
        assert_eq!(diag.summary, "POST /api/spaces/space failed with status 400");
        assert_eq!(diag.detail, r#"{"message":"bad space"}"#);
    }

    #[test]
    fn test_serve_options_timeout() {
        assert_eq!(ServeOptions::new().shutdown_timeout, Duration::from_secs(30));
        let options = ServeOptions::new().with_shutdown_timeout(Duration::from_secs(5));
        assert_eq!(options.shutdown_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_decode_empty_is_null_and_garbage_is_rejected() {
        assert_eq!(decode("config", b"").unwrap(), Value::Null);
        assert_eq!(decode("config", br#"{"a":1}"#).unwrap(), json!({"a": 1}));
        let err = decode("config", b"{not json").unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest(_)), "{:?}", err);
        assert!(err.to_string().contains("config"));
    }

    #[tokio::test]
    async fn test_truncated_proposed_state_is_an_error_not_a_destroy() {
        let response = service()
            .plan(tonic::Request::new(crate::generated::PlanRequest {
                resource_type: "elasticstack_kibana_space".to_string(),
                prior_state: serde_json::to_vec(&json!({"space_id": "ops"})).unwrap(),
                proposed_state: br#"{"space_id": "o"#.to_vec(),
                config: vec![],
            }))
            .await
            .unwrap()
            .into_inner();

        assert!(response.planned_state.is_empty());
        assert!(response.changes.is_empty());
        assert_eq!(response.diagnostics.len(), 1);
        let diag = &response.diagnostics[0];
        assert_eq!(
            diag.severity,
            crate::generated::diagnostic::Severity::Error as i32
        );
        assert!(diag.summary.contains("proposed_state"), "{}", diag.summary);
    }

    #[tokio::test]
    async fn test_malformed_config_is_reported_on_validate() {
        let response = service()
            .validate_resource_config(tonic::Request::new(
                crate::generated::ValidateResourceConfigRequest {
                    resource_type: "elasticstack_kibana_space".to_string(),
                    config: b"[1,".to_vec(),
                },
            ))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(response.diagnostics.len(), 1);
        assert!(response.diagnostics[0].summary.contains("config"));
    }

    #[test]
    fn test_block_to_proto_carries_force_new() {
        let block = Block::new()
            .with_attribute("job_id", Attribute::required_string().with_force_new())
            .with_block(
                "analysis_config",
                NestedBlock::single(Block::new()).with_force_new(),
            );

        let proto = block_to_proto(&block);
        assert!(proto.attributes[0].force_new);
        assert_eq!(proto.block_types[0].type_name, "analysis_config");
        assert!(proto.block_types[0].force_new);
        assert_eq!(
            proto.block_types[0].nesting_mode,
            crate::generated::nested_block::NestingMode::Single as i32
        );
    }
}
