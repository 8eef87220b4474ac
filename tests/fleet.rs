mod common;

use common::*;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};

const OUTPUT: &str = "elasticstack_fleet_output";
const TOKENS: &str = "elasticstack_fleet_enrollment_tokens";

fn es_output() -> Value {
    json!({
        "item": {
            "id": "es-out",
            "name": "Primary",
            "type": "elasticsearch",
            "hosts": ["https://es:9200"],
            "is_default": true,
            "is_default_monitoring": false,
            "ssl": {"certificate": "CERT"}
        }
    })
}

#[tokio::test]
async fn test_output_create_keeps_ssl_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/fleet/outputs"))
        .and(header("kbn-xsrf", "true"))
        .and(body_partial_json(json!({
            "id": "es-out",
            "type": "elasticsearch",
            "is_default": true,
            "ssl": {"certificate": "CERT", "key": "KEY"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(es_output()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/fleet/outputs/es-out"))
        .respond_with(ResponseTemplate::new(200).set_body_json(es_output()))
        .mount(&server)
        .await;

    let tester = configured(&server).await;
    let state = tester
        .lifecycle_create(
            OUTPUT,
            json!({
                "output_id": "es-out",
                "name": "Primary",
                "type": "elasticsearch",
                "hosts": ["https://es:9200"],
                "default_integrations": true,
                "ssl": {"certificate": "CERT", "key": "KEY"}
            }),
        )
        .await
        .unwrap();

    assert_eq!(state["id"], "es-out");
    assert_eq!(state["default_monitoring"], false);
    assert_eq!(state["ssl"]["certificate"], "CERT");
    assert_eq!(state["ssl"]["key"], "KEY");
}

fn es_output_config() -> Value {
    json!({
        "output_id": "es-out",
        "name": "Primary",
        "type": "elasticsearch",
        "hosts": ["https://es:9200"],
        "default_integrations": true,
        "ssl": {"certificate": "CERT", "key": "KEY"}
    })
}

#[tokio::test]
async fn test_output_replan_after_apply_is_a_no_op() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/fleet/outputs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(es_output()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/fleet/outputs/es-out"))
        .respond_with(ResponseTemplate::new(200).set_body_json(es_output()))
        .mount(&server)
        .await;

    let tester = configured(&server).await;
    let state = tester.lifecycle_create(OUTPUT, es_output_config()).await.unwrap();
    let refreshed = tester.read(OUTPUT, state).await.unwrap().unwrap();
    assert_eq!(refreshed["ssl"]["key"], "KEY");

    let plan = tester
        .plan_update(OUTPUT, refreshed, es_output_config())
        .await
        .unwrap();
    hemmer_provider_elasticstack::testing::assert_plan_no_changes(&plan);
    assert!(!plan.requires_replace);
}

#[tokio::test]
async fn test_output_import_leaves_ssl_key_unset() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/fleet/outputs/es-out"))
        .respond_with(ResponseTemplate::new(200).set_body_json(es_output()))
        .mount(&server)
        .await;

    let tester = configured(&server).await;
    let imported = tester.import_resource(OUTPUT, "es-out").await.unwrap();

    assert_eq!(imported.len(), 1);
    let state = &imported[0].state;
    assert_eq!(state["id"], "es-out");
    assert_eq!(state["output_id"], "es-out");
    assert_eq!(state["default_integrations"], true);
    assert_eq!(state["ssl"]["certificate"], "CERT");
    assert_eq!(state["ssl"]["key"], Value::Null);
}

#[tokio::test]
async fn test_output_update_puts_without_id() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/fleet/outputs/es-out"))
        .and(body_partial_json(json!({"name": "Primary", "hosts": ["https://es:9200"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(es_output()))
        .expect(1)
        .mount(&server)
        .await;

    let tester = configured(&server).await;
    let state = tester
        .update(
            OUTPUT,
            json!({"id": "es-out", "output_id": "es-out", "name": "Old", "type": "elasticsearch"}),
            json!({
                "id": "es-out",
                "output_id": "es-out",
                "name": "Primary",
                "type": "elasticsearch",
                "hosts": ["https://es:9200"],
                "default_integrations": true,
                "ssl": {"certificate": "CERT", "key": "KEY"}
            }),
        )
        .await
        .unwrap();
    assert_eq!(state["name"], "Primary");
    assert_eq!(state["ssl"]["key"], "KEY");

    let requests = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert!(body.get("id").is_none(), "{}", body);
}

#[tokio::test]
async fn test_output_delete() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/fleet/outputs/es-out"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "es-out"})))
        .expect(1)
        .mount(&server)
        .await;

    let tester = configured(&server).await;
    tester
        .lifecycle_delete(OUTPUT, json!({"id": "es-out", "name": "Primary", "type": "elasticsearch"}))
        .await
        .unwrap();
}

fn token(id: &str, policy_id: &str) -> Value {
    json!({
        "id": id,
        "api_key_id": format!("{}-key", id),
        "api_key": "c2VjcmV0",
        "name": format!("Default ({})", id),
        "active": true,
        "policy_id": policy_id,
        "created_at": "2024-05-01T10:00:00.000Z"
    })
}

#[tokio::test]
async fn test_enrollment_tokens_follow_pages() {
    let server = MockServer::start().await;
    let first: Vec<Value> = (0..100).map(|i| token(&format!("t{}", i), "p1")).collect();
    Mock::given(method("GET"))
        .and(path("/api/fleet/enrollment_api_keys"))
        .and(query_param("page", "1"))
        .and(query_param("kuery", "policy_id:\"p1\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": first,
            "total": 101,
            "page": 1,
            "perPage": 100
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/fleet/enrollment_api_keys"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [token("t100", "p1")],
            "total": 101,
            "page": 2,
            "perPage": 100
        })))
        .expect(1)
        .mount(&server)
        .await;

    let tester = configured(&server).await;
    let state = tester
        .read_data_source(TOKENS, json!({"policy_id": "p1"}))
        .await
        .unwrap();

    assert_eq!(state["id"], "p1");
    let tokens = state["tokens"].as_array().unwrap();
    assert_eq!(tokens.len(), 101);
    assert_eq!(tokens[100]["key_id"], "t100");
    assert_eq!(tokens[0]["api_key"], "c2VjcmV0");
}

#[tokio::test]
async fn test_enrollment_tokens_without_policy() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/fleet/enrollment_api_keys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [token("a", "p1"), token("b", "p2")],
            "total": 2
        })))
        .mount(&server)
        .await;

    let tester = configured(&server).await;
    let state = tester.read_data_source(TOKENS, Value::Null).await.unwrap();
    assert_eq!(state["id"], "all");
    assert_eq!(state["policy_id"], Value::Null);
    assert_eq!(state["tokens"].as_array().unwrap().len(), 2);
}
