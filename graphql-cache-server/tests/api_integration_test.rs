//! Integration tests for the GraphQL endpoint with optional JWT identity

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use graphql_cache::{
    CacheConfig, CacheManager, ExecutionResult, ManagerSettings, MemoryBackend, Operation,
    QueryExecutor, RequestContext,
};
use graphql_cache_server::{router, ApiServer, ApiServerConfig, AuthState, JwtAuth};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

const SECRET: &str = "test_secret_key_12345";

/// Engine stand-in: counts calls and echoes the caller
#[derive(Default)]
struct CountingExecutor {
    calls: AtomicUsize,
}

#[async_trait]
impl QueryExecutor for CountingExecutor {
    async fn execute(&self, operation: &Operation, ctx: &mut RequestContext) -> ExecutionResult {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);

        if operation.query.contains("menu") {
            let menu = match ctx.read_field("menu", None).await {
                Some(menu) => menu,
                None => {
                    let menu = json!(["home"]);
                    ctx.write_field("menu", None, &menu).await;
                    menu
                }
            };
            return ExecutionResult::data(json!({ "menu": menu }));
        }

        ExecutionResult::data(json!({ "call": call, "user": ctx.identity() }))
    }
}

async fn test_app() -> (Router, Arc<CountingExecutor>) {
    let executor = Arc::new(CountingExecutor::default());
    let manager = CacheManager::new(ManagerSettings::default(), executor.clone())
        .with_backend(Arc::new(MemoryBackend::new()));
    manager.init().await;

    manager
        .register_query_cache("Posts", CacheConfig::builder().zone("posts").build())
        .await
        .unwrap();
    manager
        .register_query_cache("Me", CacheConfig::builder().per_user(true).build())
        .await
        .unwrap();
    manager
        .register_field_cache("menu", CacheConfig::default())
        .await
        .unwrap();
    manager.activate().await;

    (router(Arc::new(manager), AuthState::new(SECRET)), executor)
}

fn graphql_request(body: Value, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/graphql")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn header_value<'a>(response: &'a axum::response::Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

#[tokio::test]
async fn test_health_check() {
    let (app, _) = test_app().await;

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["caching"], true);
}

#[tokio::test]
async fn test_login_issues_verifiable_token() {
    let (app, _) = test_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({ "username": "alice", "password": "secret" }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let claims = JwtAuth::new(SECRET)
        .verify(body["token"].as_str().unwrap())
        .unwrap();
    assert_eq!(claims.sub, "alice");
}

#[tokio::test]
async fn test_login_rejects_empty_credentials() {
    let (app, _) = test_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({ "username": "", "password": "" }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_query_cache_headers_miss_then_hit() {
    let (app, executor) = test_app().await;
    let body = json!({ "query": "query Posts { posts { id } }" });

    let response = app
        .clone()
        .oneshot(graphql_request(body.clone(), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_value(&response, "x-graphql-query-cache"), Some("MISS"));
    assert!(header_value(&response, "x-graphql-field-cache").is_none());
    let first = json_body(response).await;

    let response = app.oneshot(graphql_request(body, None)).await.unwrap();
    assert_eq!(header_value(&response, "x-graphql-query-cache"), Some("HIT"));
    let second = json_body(response).await;

    assert_eq!(first, second);
    assert_eq!(first["data"]["call"], 0);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_batch_gets_one_aggregated_header() {
    let (app, _) = test_app().await;

    app.clone()
        .oneshot(graphql_request(json!({ "query": "query Posts { posts { id } }" }), None))
        .await
        .unwrap();

    let batch = json!([
        { "query": "query Posts { posts { id } }" },
        { "query": "query Other { other }" },
    ]);
    let response = app.oneshot(graphql_request(batch, None)).await.unwrap();

    assert_eq!(response.headers().get_all("x-graphql-query-cache").iter().count(), 1);
    // Other matches no query cache, so only the Posts hit is counted
    assert_eq!(header_value(&response, "x-graphql-query-cache"), Some("HIT"));

    let body = json_body(response).await;
    assert!(body.is_array());
    assert_eq!(body.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_field_cache_header() {
    let (app, _) = test_app().await;
    let body = json!({ "query": "query Nav { menu }" });

    let response = app
        .clone()
        .oneshot(graphql_request(body.clone(), None))
        .await
        .unwrap();
    assert_eq!(header_value(&response, "x-graphql-field-cache"), Some("MISS:menu"));

    let response = app.oneshot(graphql_request(body, None)).await.unwrap();
    assert_eq!(header_value(&response, "x-graphql-field-cache"), Some("HIT:menu"));
}

#[tokio::test]
async fn test_invalid_token_is_rejected() {
    let (app, executor) = test_app().await;

    let response = app
        .oneshot(graphql_request(
            json!({ "query": "query Posts { posts { id } }" }),
            Some("not.a.token"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_per_user_cache_uses_token_subject() {
    let (app, executor) = test_app().await;
    let auth = JwtAuth::new(SECRET);
    let alice = auth.issue("alice", 1).unwrap();
    let bob = auth.issue("bob", 1).unwrap();
    let body = json!({ "query": "query Me { me { id } }" });

    for token in [&alice, &bob, &alice] {
        let response = app
            .clone()
            .oneshot(graphql_request(body.clone(), Some(token)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    // Alice's second request was served from her own entry
    assert_eq!(executor.calls.load(Ordering::SeqCst), 2);

    let response = app
        .oneshot(graphql_request(body, Some(&bob)))
        .await
        .unwrap();
    let result = json_body(response).await;
    assert_eq!(result["data"]["user"], "bob");
}

fn server_with_rules(dir: &tempfile::TempDir, yaml: &str) -> ApiServer {
    let path = dir.path().join("rules.yaml");
    std::fs::write(&path, yaml).unwrap();

    ApiServer::new(ApiServerConfig {
        rules_file: Some(path),
        ..Default::default()
    })
}

#[tokio::test]
async fn test_server_rejects_field_caches_it_cannot_serve() {
    let dir = tempfile::TempDir::new().unwrap();
    let server = server_with_rules(
        &dir,
        "query_caches:\n  - query_name: Posts\nfield_caches:\n  - field_name: menu\n",
    );

    let err = server.build_manager().await.err().unwrap();
    assert!(err.to_string().contains("field caches"));
}

#[tokio::test]
async fn test_server_accepts_query_caches() {
    let dir = tempfile::TempDir::new().unwrap();
    let server = server_with_rules(&dir, "query_caches:\n  - query_name: Posts\n    zone: posts\n");

    let manager = server.build_manager().await.unwrap();
    assert_eq!(manager.registered().await, 1);
}
