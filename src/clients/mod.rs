//! REST clients for Elasticsearch, Kibana and Fleet.
//!
//! Each service gets one [`HttpApi`]. Endpoint functions live in one module
//! per service and take the matching `HttpApi`.

pub mod elasticsearch;
pub mod error;
pub mod fleet;
pub mod http;
pub mod kibana;

pub use error::{ClientError, Result};
pub use http::HttpApi;

use tokio::sync::OnceCell;
use tracing::debug;

use crate::config::ResolvedConfig;

/// The set of service clients built from the provider configuration.
#[derive(Debug, Default)]
pub struct ApiClient {
    elasticsearch: Option<HttpApi>,
    kibana: Option<HttpApi>,
    fleet: Option<HttpApi>,
    cluster_uuid: OnceCell<String>,
}

impl ApiClient {
    /// Build clients for every configured service.
    pub fn from_config(config: &ResolvedConfig) -> Result<Self> {
        Ok(Self {
            elasticsearch: config
                .elasticsearch
                .as_ref()
                .map(|c| HttpApi::new("elasticsearch", c))
                .transpose()?,
            kibana: config
                .kibana
                .as_ref()
                .map(|c| HttpApi::new("kibana", c))
                .transpose()?,
            fleet: config
                .fleet
                .as_ref()
                .map(|c| HttpApi::new("fleet", c))
                .transpose()?,
            cluster_uuid: OnceCell::new(),
        })
    }

    pub fn elasticsearch(&self) -> Result<&HttpApi> {
        self.elasticsearch
            .as_ref()
            .ok_or(ClientError::NotConfigured("elasticsearch"))
    }

    pub fn kibana(&self) -> Result<&HttpApi> {
        self.kibana.as_ref().ok_or(ClientError::NotConfigured("kibana"))
    }

    pub fn fleet(&self) -> Result<&HttpApi> {
        self.fleet.as_ref().ok_or(ClientError::NotConfigured("fleet"))
    }

    /// The Elasticsearch cluster UUID, fetched on first use.
    pub async fn cluster_uuid(&self) -> Result<String> {
        let es = self.elasticsearch()?;
        let uuid = self
            .cluster_uuid
            .get_or_try_init(|| async {
                let info = elasticsearch::cluster_info(es).await?;
                debug!(cluster_uuid = %info.cluster_uuid, "Cached cluster UUID");
                Ok::<_, ClientError>(info.cluster_uuid)
            })
            .await?;
        Ok(uuid.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unconfigured_services() {
        let client = ApiClient::from_config(&ResolvedConfig::default()).unwrap();
        assert!(matches!(
            client.elasticsearch(),
            Err(ClientError::NotConfigured("elasticsearch"))
        ));
        assert!(matches!(
            client.kibana(),
            Err(ClientError::NotConfigured("kibana"))
        ));
        assert!(matches!(
            client.fleet(),
            Err(ClientError::NotConfigured("fleet"))
        ));
    }

    #[tokio::test]
    async fn test_cluster_uuid_requires_elasticsearch() {
        let client = ApiClient::default();
        assert!(matches!(
            client.cluster_uuid().await,
            Err(ClientError::NotConfigured("elasticsearch"))
        ));
    }
}
