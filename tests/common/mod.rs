//! Shared fixtures for the integration tests.
//!
//! Every test gets its own [`MockServer`] standing in for Elasticsearch,
//! Kibana and Fleet at once, and a provider that ignores the caller's shell
//! environment.

#![allow(dead_code)]

pub use hemmer_provider_elasticstack::config::Environment;
pub use hemmer_provider_elasticstack::testing::ProviderTester;
pub use hemmer_provider_elasticstack::ElasticStackProvider;
pub use serde_json::{json, Value};
pub use wiremock::{Mock, MockServer, ResponseTemplate};

use wiremock::matchers::{method, path};

pub const CLUSTER_UUID: &str = "a1b2c3d4";

/// A provider with every service pointed at `server`.
pub async fn configured(server: &MockServer) -> ProviderTester<ElasticStackProvider> {
    let tester = ProviderTester::new(ElasticStackProvider::with_environment(Environment::empty()));
    tester
        .configure(json!({
            "elasticsearch": {
                "endpoints": [server.uri()],
                "username": "elastic",
                "password": "changeme"
            },
            "kibana": {"endpoints": [server.uri()]}
        }))
        .await
        .expect("provider configures");
    tester
}

/// `GET /` answering with a fixed cluster identity.
pub async fn mount_cluster_info(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "node-1",
            "cluster_name": "test-cluster",
            "cluster_uuid": CLUSTER_UUID,
            "version": {
                "number": "8.13.4",
                "build_flavor": "default",
                "build_type": "docker",
                "build_snapshot": false,
                "lucene_version": "9.10.0"
            },
            "tagline": "You Know, for Search"
        })))
        .mount(server)
        .await;
}

/// A 404 in the shape Elasticsearch and Kibana use.
pub fn not_found() -> ResponseTemplate {
    ResponseTemplate::new(404).set_body_json(json!({
        "statusCode": 404,
        "error": "Not Found",
        "message": "Saved object not found"
    }))
}
