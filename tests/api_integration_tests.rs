//! Integration Tests for Admin Endpoints
//!
//! Tests the full request/response cycle for each endpoint.

use std::sync::Arc;

use api_cache::{api::create_router, AppState, CacheConfig, CacheManager};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

// == Helper Functions ==

fn test_manager() -> Arc<CacheManager> {
    Arc::new(CacheManager::new(CacheConfig::default()))
}

fn test_app(manager: Arc<CacheManager>) -> Router {
    create_router(AppState::new(manager).with_config_source(CacheConfig::default))
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

// == HEALTH Endpoint Tests ==

#[tokio::test]
async fn test_health_endpoint() {
    let response = test_app(test_manager())
        .oneshot(empty_request("GET", "/health"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["enabled"], true);
    assert!(json.get("timestamp").is_some());
}

// == STATS Endpoint Tests ==

#[tokio::test]
async fn test_stats_endpoint() {
    let manager = test_manager();
    manager.set("entities:state:id=a", json!({"state": "on"}), 60).await;
    manager.get("entities:state:id=a").await;
    manager.get("entities:state:id=b").await;

    let response = test_app(manager)
        .oneshot(empty_request("GET", "/stats"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["hits"], 1);
    assert_eq!(json["misses"], 1);
    assert_eq!(json["sets"], 1);
    assert_eq!(json["size"], 1);
    assert_eq!(json["backend"], "memory");
    assert_eq!(json["hit_rate"], 0.5);
    assert!(json["operations"].is_object());
}

// == INVALIDATE Endpoint Tests ==

#[tokio::test]
async fn test_invalidate_endpoint_expands_namespace() {
    let manager = test_manager();
    manager.set("entities:state:id=a", json!(1), 60).await;
    manager.set("entities:list:all", json!(2), 60).await;
    manager.set("devices:list:all", json!(3), 60).await;

    let response = test_app(manager.clone())
        .oneshot(json_request(
            "POST",
            "/invalidate",
            json!({"patterns": ["entities:*"]}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["keys_removed"], 2);
    assert!(json["patterns"]
        .as_array()
        .unwrap()
        .contains(&json!("entities:state:*")));
    assert!(manager.get("devices:list:all").await.is_some());
}

#[tokio::test]
async fn test_invalidate_endpoint_rejects_bad_pattern() {
    let response = test_app(test_manager())
        .oneshot(json_request(
            "POST",
            "/invalidate",
            json!({"patterns": ["entities:*:all"]}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_to_json(response.into_body()).await;
    assert!(json["error"].as_str().unwrap().contains("entities:*:all"));
}

#[tokio::test]
async fn test_invalid_json_request() {
    let response = test_app(test_manager())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/invalidate")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"invalid json"#))
                .unwrap(),
        )
        .await
        .unwrap();

    // Axum returns 400 or 422 for body parsing errors
    assert!(
        response.status() == StatusCode::BAD_REQUEST
            || response.status() == StatusCode::UNPROCESSABLE_ENTITY
    );
}

// == CHAIN Endpoint Tests ==

#[tokio::test]
async fn test_chain_endpoint() {
    let manager = test_manager();
    manager.set("entities:state:id=light.kitchen", json!(1), 60).await;
    manager.set("entities:state:id=light.hall", json!(2), 60).await;
    manager.set("entities:search:q=light", json!(3), 60).await;

    let response = test_app(manager.clone())
        .oneshot(json_request(
            "POST",
            "/invalidate/chain",
            json!({"chain": "entity_update", "vars": {"entity_id": "light.kitchen"}}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["keys_removed"], 2);
    assert!(manager.get("entities:state:id=light.hall").await.is_some());
}

#[tokio::test]
async fn test_chain_endpoint_unknown_chain() {
    let response = test_app(test_manager())
        .oneshot(json_request(
            "POST",
            "/invalidate/chain",
            json!({"chain": "does_not_exist"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// == DELETE Endpoint Tests ==

#[tokio::test]
async fn test_delete_endpoint() {
    let manager = test_manager();
    manager.set("entities:list:all", json!([1]), 60).await;
    let app = test_app(manager.clone());

    let response = app
        .clone()
        .oneshot(empty_request("DELETE", "/del/entities:list:all"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["key"], "entities:list:all");

    let response = app
        .oneshot(empty_request("DELETE", "/del/entities:list:all"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// == CLEAR Endpoint Tests ==

#[tokio::test]
async fn test_clear_endpoint() {
    let manager = test_manager();
    manager.set("a", json!(1), 60).await;
    manager.get("a").await;

    let response = test_app(manager.clone())
        .oneshot(empty_request("DELETE", "/clear"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let stats = manager.get_statistics().await;
    assert_eq!(stats.size, 0);
    assert_eq!(stats.hits, 0);
}

// == RELOAD Endpoint Tests ==

#[tokio::test]
async fn test_reload_endpoint() {
    let manager = test_manager();
    let app = create_router(
        AppState::new(manager.clone())
            .with_config_source(|| CacheConfig::default().with_enabled(false)),
    );

    let response = app.oneshot(empty_request("POST", "/reload")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(!manager.is_enabled());
}
