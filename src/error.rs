//! Error types for the Elastic Stack provider.

use thiserror::Error;

use crate::clients::ClientError;
use crate::schema::Diagnostic;

/// Errors that can occur while serving a provider operation.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The requested object was not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// A validation error occurred.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An API response could not be understood.
    #[error("Provider error: {0}")]
    Internal(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested resource type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The Elastic Stack API rejected a request.
    ///
    /// `body` holds the raw response body and is surfaced as diagnostic detail.
    #[error("{summary}")]
    Api {
        /// Short description of the failed call.
        summary: String,
        /// HTTP status returned by the API.
        status: u16,
        /// Raw response body.
        body: String,
    },

    /// The service could not be reached.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Invalid request from the host.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ProviderError {
    /// Render this error as an error diagnostic.
    ///
    /// API failures keep the raw response body as the diagnostic detail.
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            Self::Api { summary, status, body } => {
                let detail = if body.is_empty() {
                    format!("HTTP status {}", status)
                } else {
                    body.clone()
                };
                Diagnostic::error(summary.clone()).with_detail(detail)
            },
            other => Diagnostic::error(other.to_string()),
        }
    }
}

impl From<ClientError> for ProviderError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::NotConfigured(service) => Self::Configuration(format!(
                "the {} connection is not configured on the provider",
                service
            )),
            ClientError::NotFound(path) => Self::NotFound(path),
            ClientError::Api {
                method,
                path,
                status,
                body,
            } => Self::Api {
                summary: format!("{} {} failed with status {}", method, path, status),
                status,
                body,
            },
            ClientError::Http(err) => Self::Unavailable(err.to_string()),
            ClientError::Decode { path, source } => {
                Self::Internal(format!("failed to decode response from {}: {}", path, source))
            },
            ClientError::InvalidUrl(msg) => Self::Configuration(msg),
            ClientError::Tls(msg) => Self::Configuration(msg),
        }
    }
}

impl From<ProviderError> for tonic::Status {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotFound(msg) => tonic::Status::not_found(msg),
            ProviderError::Validation(msg) => tonic::Status::invalid_argument(msg),
            ProviderError::Configuration(msg) => tonic::Status::failed_precondition(msg),
            ProviderError::UnknownResource(msg) => tonic::Status::not_found(msg),
            ProviderError::Internal(msg) => tonic::Status::internal(msg),
            ProviderError::Serialization(err) => {
                tonic::Status::invalid_argument(format!("Serialization error: {}", err))
            },
            ProviderError::Api { summary, status, .. } => match status {
                401 | 403 => tonic::Status::permission_denied(summary),
                409 => tonic::Status::already_exists(summary),
                _ => tonic::Status::unknown(summary),
            },
            ProviderError::Unavailable(msg) => tonic::Status::unavailable(msg),
            ProviderError::InvalidRequest(msg) => tonic::Status::invalid_argument(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(status: u16, body: &str) -> ProviderError {
        ClientError::Api {
            method: "PUT".to_string(),
            path: "/_ml/anomaly_detectors/job-1".to_string(),
            status,
            body: body.to_string(),
        }
        .into()
    }

    #[test]
    fn test_error_display() {
        let err = ProviderError::NotFound("default/logs-*".to_string());
        assert_eq!(format!("{}", err), "Resource not found: default/logs-*");

        let err = ProviderError::UnknownResource("elasticstack_kibana_alert".to_string());
        assert_eq!(
            format!("{}", err),
            "Unknown resource type: elasticstack_kibana_alert"
        );
    }

    #[test]
    fn test_error_to_status() {
        let status: tonic::Status = ProviderError::NotFound("x".to_string()).into();
        assert_eq!(status.code(), tonic::Code::NotFound);

        let status: tonic::Status = ProviderError::Configuration("x".to_string()).into();
        assert_eq!(status.code(), tonic::Code::FailedPrecondition);

        let status: tonic::Status = api_error(403, "").into();
        assert_eq!(status.code(), tonic::Code::PermissionDenied);

        let status: tonic::Status = api_error(409, "").into();
        assert_eq!(status.code(), tonic::Code::AlreadyExists);
    }

    #[test]
    fn test_api_error_diagnostic_embeds_body() {
        let diag = api_error(400, r#"{"error":{"type":"illegal_argument_exception"}}"#).to_diagnostic();
        assert_eq!(
            diag.summary,
            "PUT /_ml/anomaly_detectors/job-1 failed with status 400"
        );
        assert_eq!(
            diag.detail.as_deref(),
            Some(r#"{"error":{"type":"illegal_argument_exception"}}"#)
        );
    }

    #[test]
    fn test_auth_failures_keep_body_too() {
        let diag = api_error(401, r#"{"error":"missing authentication credentials"}"#).to_diagnostic();
        assert!(diag.summary.ends_with("401"));
        assert_eq!(
            diag.detail.as_deref(),
            Some(r#"{"error":"missing authentication credentials"}"#)
        );

        let diag = api_error(502, "").to_diagnostic();
        assert_eq!(diag.detail.as_deref(), Some("HTTP status 502"));
    }

    #[test]
    fn test_client_error_mapping() {
        assert!(matches!(api_error(500, ""), ProviderError::Api { status: 500, .. }));
        assert!(matches!(
            ProviderError::from(ClientError::NotConfigured("fleet")),
            ProviderError::Configuration(_)
        ));
        assert!(matches!(
            ProviderError::from(ClientError::NotFound("/api/fleet/outputs/x".to_string())),
            ProviderError::NotFound(_)
        ));
    }
}
