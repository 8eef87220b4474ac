//! `elasticstack_elasticsearch_info`: what `GET /` reports about the cluster.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::clients::elasticsearch::{self, ClusterInfo, ClusterVersion};
use crate::clients::ApiClient;
use crate::data_sources::DataSource;
use crate::error::ProviderError;
use crate::schema::{Attribute, AttributeFlags, AttributeType, Schema};
use crate::typeutils::to_state;

#[derive(Debug, Serialize, PartialEq)]
struct InfoState {
    id: String,
    cluster_name: String,
    cluster_uuid: String,
    name: String,
    tagline: String,
    version: Vec<ClusterVersion>,
}

impl From<ClusterInfo> for InfoState {
    fn from(info: ClusterInfo) -> Self {
        Self {
            id: info.cluster_uuid.clone(),
            cluster_name: info.cluster_name,
            cluster_uuid: info.cluster_uuid,
            name: info.name,
            tagline: info.tagline,
            version: vec![info.version],
        }
    }
}

fn version_type() -> AttributeType {
    let string_fields = [
        "number",
        "build_flavor",
        "build_type",
        "build_hash",
        "build_date",
        "lucene_version",
        "minimum_wire_compatibility_version",
        "minimum_index_compatibility_version",
    ];
    let mut members: HashMap<String, AttributeType> = string_fields
        .iter()
        .map(|name| (name.to_string(), AttributeType::String))
        .collect();
    members.insert("build_snapshot".to_string(), AttributeType::Bool);
    AttributeType::list(AttributeType::object(members))
}

pub struct ElasticsearchInfo;

#[async_trait]
impl DataSource for ElasticsearchInfo {
    fn type_name(&self) -> &'static str {
        "elasticstack_elasticsearch_info"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("cluster_name", Attribute::computed_string())
            .with_attribute("cluster_uuid", Attribute::computed_string())
            .with_attribute("name", Attribute::computed_string().with_description("Node name"))
            .with_attribute("tagline", Attribute::computed_string())
            .with_attribute(
                "version",
                Attribute::new(version_type(), AttributeFlags::computed()),
            )
    }

    async fn read(&self, client: &ApiClient, _config: Value) -> Result<Value, ProviderError> {
        let info = elasticsearch::cluster_info(client.elasticsearch()?).await?;
        debug!(cluster = %info.cluster_name, version = %info.version.number, "read cluster info");
        to_state(&InfoState::from(info))
    }
}
