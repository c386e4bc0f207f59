//! IAM and webhook routes.

use axum::{Json, extract::State, http::StatusCode};
use serde_json::{Value, json};
use tracing::debug;

use super::AppState;
use crate::error::AppError;
use crate::events::FeedEvent;
use crate::services::{AccessGrantRequest, CustomRequest, PermissionGrantRequest, PermissionTarget, VerifyRequest, VerifyResponse};

/// POST /iam/verify
pub async fn verify(
    State(state): State<AppState>,
    Json(request): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, AppError> {
    state.components.iam.verify(request).await.map(Json)
}

/// POST /iam/grant
pub async fn grant_access(
    State(state): State<AppState>,
    Json(request): Json<AccessGrantRequest>,
) -> Result<Json<Value>, AppError> {
    state.components.iam.grant_access(request).await.map(Json)
}

/// POST /iam/revoke
pub async fn revoke_access(
    State(state): State<AppState>,
    Json(request): Json<AccessGrantRequest>,
) -> Result<Json<Value>, AppError> {
    state.components.iam.revoke_access(request).await.map(Json)
}

/// POST /permission/grant
pub async fn grant_permission(
    State(state): State<AppState>,
    Json(request): Json<PermissionGrantRequest>,
) -> Result<Json<Value>, AppError> {
    state.components.iam.grant_permission(request).await.map(Json)
}

/// POST /permission/revoke
pub async fn revoke_permission(
    State(state): State<AppState>,
    Json(request): Json<PermissionTarget>,
) -> Result<Json<Value>, AppError> {
    state.components.iam.revoke_permission(request).await.map(Json)
}

/// POST /custom: pass an arbitrary action through to the provider.
pub async fn custom(
    State(state): State<AppState>,
    Json(request): Json<CustomRequest>,
) -> Result<Json<Value>, AppError> {
    state.components.iam.custom(request).await.map(Json)
}

/// POST /events: secondary ingress into the event feed, next to the gateway connector.
pub async fn publish_event(
    State(state): State<AppState>,
    Json(event): Json<FeedEvent>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    if event.event_type.is_empty() {
        return Err(AppError::InvalidInput("Missing event type".to_string()));
    }
    debug!(namespace = %event.namespace, event_type = %event.event_type, "Webhook event received");

    let delivered = state.components.feed.publish(event);
    Ok((StatusCode::ACCEPTED, Json(json!({"delivered": delivered}))))
}
