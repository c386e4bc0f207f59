use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use serde_json::{Value, json};
use tower::ServiceExt;

use iam_proxy::auth::AuthorizationComponents;
use iam_proxy::config::CacheSettings;
use iam_proxy::server::{AppState, create_router};
use iam_proxy::services::{UpstreamClient, UpstreamError};

/// Provider stand-in that serves a fixed grant list and records dispatches.
#[derive(Default)]
struct FakeProvider {
    calls: Mutex<Vec<String>>,
}

impl FakeProvider {
    fn count(&self, action: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|a| a.as_str() == action).count()
    }
}

#[async_trait]
impl UpstreamClient for FakeProvider {
    async fn dispatch(&self, action: &str, _payload: Value) -> Result<Value, UpstreamError> {
        self.calls.lock().unwrap().push(action.to_string());
        match action {
            "api.application.iam.access.build" => Ok(json!([
                "iam:billing:1100:u1:invoice#42",
                "iam:reports:0100:u1:",
            ])),
            "api.application.iam.access.grant" => Ok(json!({"granted": true})),
            "api.application.profile.read" => Ok(json!({"id": "p1", "name": "Ada"})),
            _ => Ok(Value::Null),
        }
    }
}

async fn app() -> Result<(Router, Arc<FakeProvider>, AuthorizationComponents)> {
    let provider = Arc::new(FakeProvider::default());
    let components = AuthorizationComponents::with_upstream(&CacheSettings::default(), provider.clone()).await?;
    Ok((create_router(AppState::new(components.clone())), provider, components))
}

async fn post(app: &Router, uri: &str, body: Value) -> Result<(StatusCode, Value)> {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))?;
    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let value = serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
    Ok((status, value))
}

#[tokio::test]
async fn test_liveness_and_readiness() -> Result<()> {
    let (app, _, components) = app().await?;

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(to_bytes(response.into_body(), usize::MAX).await?, "OK");

    let response = app
        .oneshot(Request::builder().uri("/health/ready").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    components.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_ping_aliases() -> Result<()> {
    let (app, provider, components) = app().await?;

    for uri in ["/", "/api", "/ping", "/check/uiamp"] {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK, "{}", uri);
        assert_eq!(to_bytes(response.into_body(), usize::MAX).await?, "OK");
    }
    assert!(provider.calls.lock().unwrap().is_empty());

    components.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_custom_action_passthrough() -> Result<()> {
    let (app, provider, components) = app().await?;

    let (status, body) = post(
        &app,
        "/custom",
        json!({"action": "api.application.profile.read", "payload": {"profile_id": "p1"}}),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"id": "p1", "name": "Ada"}));
    assert_eq!(provider.count("api.application.profile.read"), 1);

    let (status, _) = post(&app, "/custom", json!({"action": "api.application.profile.read"})).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = post(&app, "/custom", json!({"payload": {}})).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(provider.count("api.application.profile.read"), 1);

    components.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_verify_matches_and_caches() -> Result<()> {
    let (app, provider, components) = app().await?;
    let request = json!({
        "access_id": "a1",
        "user_id": "u1",
        "category": "billing",
        "action": ["create"],
        "entity_type": "invoice",
        "entity_id": "42"
    });

    let (status, body) = post(&app, "/iam/verify", request).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"match": true, "permission": "iam:billing:1100:u1:invoice#42", "entity_field": "invoice"})
    );

    let (_, body) = post(
        &app,
        "/iam/verify",
        json!({"access_id": "a1", "user_id": "u1", "category": "billing", "action": ["READ"]}),
    )
    .await?;
    assert_eq!(body["match"], false);

    assert_eq!(provider.count("api.application.iam.access.build"), 1);
    components.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_verify_without_scope_is_bad_request() -> Result<()> {
    let (app, provider, components) = app().await?;

    let (status, body) = post(&app, "/iam/verify", json!({"access_id": "a1"})).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.as_str().unwrap_or_default().contains("role_id or user_id"));
    assert!(provider.calls.lock().unwrap().is_empty());

    components.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_grant_invalidates_cached_user() -> Result<()> {
    let (app, provider, components) = app().await?;
    let verify = json!({"access_id": "a1", "user_id": "u1", "category": "reports"});

    post(&app, "/iam/verify", verify.clone()).await?;
    let (status, body) = post(
        &app,
        "/iam/grant",
        json!({"access_id": "a1", "user_id": "u1", "role": "admin"}),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"granted": true}));

    post(&app, "/iam/verify", verify).await?;
    assert_eq!(provider.count("api.application.iam.access.build"), 2);

    components.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_webhook_event_invalidates_access() -> Result<()> {
    let (app, provider, components) = app().await?;
    let verify = json!({"access_id": "a1", "role_id": "r1"});

    let (_, entries) = post(&app, "/iam/verify", verify.clone()).await?;
    assert_eq!(entries.as_array().map(Vec::len), Some(2));

    let (status, body) = post(
        &app,
        "/events",
        json!({"type": "permission.delete", "payload": {"access_id": "a1"}}),
    )
    .await?;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["delivered"], 2);

    let mut rebuilt = false;
    for _ in 0..100 {
        post(&app, "/iam/verify", verify.clone()).await?;
        if provider.count("api.application.iam.access.build") > 1 {
            rebuilt = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(rebuilt);

    components.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_permission_routes_validate_and_forward() -> Result<()> {
    let (app, _, components) = app().await?;

    let (status, _) = post(&app, "/permission/grant", json!({"access_id": "a1", "role": "admin"})).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = post(
        &app,
        "/permission/revoke",
        json!({"access_id": "a1", "category": "billing"}),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({}));

    components.shutdown().await;
    Ok(())
}
