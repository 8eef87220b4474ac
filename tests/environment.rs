//! Provider configuration read from the real process environment.

mod common;

use common::*;
use hemmer_provider_elasticstack::config::env;
use serial_test::serial;
use wiremock::matchers::{header, method, path};

const INFO: &str = "elasticstack_elasticsearch_info";

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Runtime::new().unwrap()
}

#[test]
#[serial]
fn test_env_endpoint_overrides_block() {
    let rt = runtime();
    let server = rt.block_on(MockServer::start());
    rt.block_on(mount_cluster_info(&server));

    let tester = ProviderTester::new(ElasticStackProvider::new());
    let uri = server.uri();
    temp_env::with_vars(
        [
            (env::ELASTICSEARCH_ENDPOINTS, Some(uri.as_str())),
            (env::ELASTICSEARCH_API_KEY, None),
            (env::ELASTICSEARCH_USERNAME, None),
            (env::ELASTICSEARCH_PASSWORD, None),
            (env::ELASTICSEARCH_BEARER_TOKEN, None),
        ],
        || {
            rt.block_on(tester.configure(json!({
                "elasticsearch": {"endpoints": ["http://127.0.0.1:1"]}
            })))
            .unwrap();
        },
    );

    let state = rt.block_on(tester.read_data_source(INFO, Value::Null)).unwrap();
    assert_eq!(state["cluster_uuid"], CLUSTER_UUID);
}

#[test]
#[serial]
fn test_env_api_key_beats_block_basic_auth() {
    let rt = runtime();
    let server = rt.block_on(MockServer::start());
    rt.block_on(
        Mock::given(method("GET"))
            .and(path("/"))
            .and(header("authorization", "ApiKey from-env"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "node-1",
                "cluster_name": "test-cluster",
                "cluster_uuid": CLUSTER_UUID,
                "version": {"number": "8.13.4"}
            })))
            .expect(1)
            .mount(&server),
    );

    let tester = ProviderTester::new(ElasticStackProvider::new());
    temp_env::with_vars(
        [
            (env::ELASTICSEARCH_ENDPOINTS, None),
            (env::ELASTICSEARCH_API_KEY, Some("from-env")),
            (env::ELASTICSEARCH_USERNAME, None),
            (env::ELASTICSEARCH_PASSWORD, None),
            (env::ELASTICSEARCH_BEARER_TOKEN, None),
        ],
        || {
            rt.block_on(tester.configure(json!({
                "elasticsearch": {
                    "endpoints": [server.uri()],
                    "username": "elastic",
                    "password": "changeme"
                }
            })))
            .unwrap();
        },
    );

    let state = rt.block_on(tester.read_data_source(INFO, Value::Null)).unwrap();
    assert_eq!(state["cluster_name"], "test-cluster");
}

#[test]
#[serial]
fn test_malformed_env_value_is_a_diagnostic() {
    let rt = runtime();
    let tester = ProviderTester::new(ElasticStackProvider::new());

    let err = temp_env::with_var(env::ELASTICSEARCH_INSECURE, Some("sometimes"), || {
        rt.block_on(tester.configure(json!({
            "elasticsearch": {"endpoints": ["http://localhost:9200"]}
        })))
        .unwrap_err()
    });

    assert!(err.to_string().contains(env::ELASTICSEARCH_INSECURE), "{}", err);
}

#[test]
#[serial]
fn test_kibana_env_basic_auth_beats_inherited_api_key() {
    let rt = runtime();
    let server = rt.block_on(MockServer::start());
    rt.block_on(
        Mock::given(method("GET"))
            .and(path("/api/spaces/space/ops"))
            // kb:kb-pass
            .and(header("authorization", "Basic a2I6a2ItcGFzcw=="))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "ops",
                "name": "Operations",
                "disabledFeatures": []
            })))
            .expect(1)
            .mount(&server),
    );

    let tester = ProviderTester::new(ElasticStackProvider::new());
    temp_env::with_vars(
        [
            (env::KIBANA_ENDPOINT, None),
            (env::KIBANA_USERNAME, Some("kb")),
            (env::KIBANA_PASSWORD, Some("kb-pass")),
            (env::KIBANA_API_KEY, None),
            (env::ELASTICSEARCH_API_KEY, None),
            (env::ELASTICSEARCH_USERNAME, None),
            (env::ELASTICSEARCH_PASSWORD, None),
            (env::ELASTICSEARCH_BEARER_TOKEN, None),
        ],
        || {
            rt.block_on(tester.configure(json!({
                "elasticsearch": {"endpoints": ["http://127.0.0.1:1"], "api_key": "es-key"},
                "kibana": {"endpoints": [server.uri()]}
            })))
            .unwrap();
        },
    );

    let imported = rt
        .block_on(tester.import_resource("elasticstack_kibana_space", "ops"))
        .unwrap();
    assert_eq!(imported[0].state["name"], "Operations");
}
