mod common;

use common::*;
use wiremock::matchers::{body_json, body_partial_json, method, path};

const USER: &str = "elasticstack_elasticsearch_security_user";

fn alice(full_name: &str) -> Value {
    json!({
        "alice": {
            "username": "alice",
            "roles": ["viewer", "editor"],
            "full_name": full_name,
            "email": "alice@example.com",
            "metadata": {"team": "search"},
            "enabled": true
        }
    })
}

async fn mount_get_alice(server: &MockServer, full_name: &str) {
    Mock::given(method("GET"))
        .and(path("/_security/user/alice"))
        .respond_with(ResponseTemplate::new(200).set_body_json(alice(full_name)))
        .mount(server)
        .await;
}

fn config(full_name: &str, password: &str) -> Value {
    json!({
        "username": "alice",
        "password": password,
        "roles": ["editor", "viewer"],
        "full_name": full_name,
        "email": "alice@example.com",
        "metadata": "{\"team\": \"search\"}"
    })
}

#[tokio::test]
async fn test_create_uses_composite_id_and_keeps_password() {
    let server = MockServer::start().await;
    mount_cluster_info(&server).await;
    mount_get_alice(&server, "Alice").await;
    Mock::given(method("PUT"))
        .and(path("/_security/user/alice"))
        .and(body_partial_json(json!({
            "password": "s3cret-pw",
            "roles": ["editor", "viewer"],
            "metadata": {"team": "search"},
            "enabled": true
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"created": true})))
        .expect(1)
        .mount(&server)
        .await;

    let tester = configured(&server).await;
    let state = tester
        .lifecycle_create(USER, config("Alice", "s3cret-pw"))
        .await
        .unwrap();

    assert_eq!(state["id"], format!("{}/alice", CLUSTER_UUID));
    assert_eq!(state["password"], "s3cret-pw");
    assert_eq!(state["password_hash"], Value::Null);
    assert_eq!(state["metadata"], "{\"team\": \"search\"}");
    let mut roles: Vec<_> = state["roles"].as_array().unwrap().iter().collect();
    roles.sort_by_key(|r| r.as_str());
    assert_eq!(roles, [&json!("editor"), &json!("viewer")]);
    assert_eq!(state["enabled"], true);
}

#[tokio::test]
async fn test_replan_after_apply_is_a_no_op() {
    let server = MockServer::start().await;
    mount_cluster_info(&server).await;
    mount_get_alice(&server, "Alice").await;
    Mock::given(method("PUT"))
        .and(path("/_security/user/alice"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"created": true})))
        .expect(1)
        .mount(&server)
        .await;

    let tester = configured(&server).await;
    let state = tester
        .lifecycle_create(USER, config("Alice", "s3cret-pw"))
        .await
        .unwrap();
    let refreshed = tester.read(USER, state).await.unwrap().unwrap();

    let plan = tester
        .plan_update(USER, refreshed, config("Alice", "s3cret-pw"))
        .await
        .unwrap();
    hemmer_provider_elasticstack::testing::assert_plan_no_changes(&plan);
    assert!(!plan.requires_replace);
}

#[tokio::test]
async fn test_password_change_uses_password_endpoint() {
    let server = MockServer::start().await;
    mount_get_alice(&server, "Alice Liddell").await;
    Mock::given(method("PUT"))
        .and(path("/_security/user/alice"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"created": false})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/_security/user/alice/_password"))
        .and(body_json(json!({"password": "n3w-secret"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let tester = configured(&server).await;
    let mut prior = config("Alice", "s3cret-pw");
    prior["id"] = json!(format!("{}/alice", CLUSTER_UUID));
    prior["enabled"] = json!(true);

    let state = tester
        .lifecycle_update(USER, prior, config("Alice Liddell", "n3w-secret"))
        .await
        .unwrap();

    assert_eq!(state["full_name"], "Alice Liddell");
    assert_eq!(state["password"], "n3w-secret");
    assert_eq!(state["id"], format!("{}/alice", CLUSTER_UUID));
}

#[tokio::test]
async fn test_read_missing_user_drops_it_from_state() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/_security/user/alice"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({})))
        .mount(&server)
        .await;

    let tester = configured(&server).await;
    let state = tester
        .read(USER, json!({"id": format!("{}/alice", CLUSTER_UUID), "username": "alice"}))
        .await
        .unwrap();
    assert!(state.is_none());
}

#[tokio::test]
async fn test_delete_tolerates_missing_user() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/_security/user/alice"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"found": false})))
        .expect(1)
        .mount(&server)
        .await;

    let tester = configured(&server).await;
    tester
        .lifecycle_delete(USER, json!({"id": format!("{}/alice", CLUSTER_UUID), "username": "alice"}))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_import_by_composite_id() {
    let server = MockServer::start().await;
    mount_get_alice(&server, "Alice").await;

    let tester = configured(&server).await;
    let imported = tester
        .import_resource(USER, &format!("{}/alice", CLUSTER_UUID))
        .await
        .unwrap();

    assert_eq!(imported.len(), 1);
    let state = &imported[0].state;
    assert_eq!(state["username"], "alice");
    assert_eq!(state["password"], Value::Null);
    assert_eq!(state["metadata"], "{\"team\":\"search\"}");
}

#[tokio::test]
async fn test_import_rejects_plain_name() {
    let server = MockServer::start().await;
    let tester = configured(&server).await;

    let err = tester.import_resource(USER, "alice").await.unwrap_err();
    assert!(err.to_string().contains("alice"), "{}", err);
}

#[tokio::test]
async fn test_validation_errors() {
    let server = MockServer::start().await;
    let tester = configured(&server).await;

    let err = tester
        .validate_resource_config(
            USER,
            json!({
                "username": "bob",
                "roles": ["viewer"],
                "password": "short",
                "password_hash": "$2a$10$abc"
            }),
        )
        .await
        .unwrap_err();
    let attributes: Vec<_> = err
        .diagnostics()
        .iter()
        .filter_map(|d| d.attribute.as_deref())
        .collect();
    assert!(attributes.contains(&"password"));
    assert!(attributes.contains(&"password_hash"));
}
