use std::collections::HashMap;

use axum::{extract::State, http::StatusCode, response::Json};
use tracing::debug;

use super::{HealthResponse, HealthStatus, ServiceHealth};
use crate::config::CacheKind;
use crate::server::AppState;

/// Liveness check at /health. Answers as long as the process serves requests.
pub async fn liveness_handler() -> &'static str {
    "OK"
}

/// Readiness check at /health/ready.
///
/// 503 until the invalidation router has registered its event subscriptions
/// and while the event gateway stream is down, since cached grants could
/// otherwise go stale without notice.
pub async fn readiness_handler(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, (StatusCode, Json<HealthResponse>)> {
    debug!("Readiness check requested");

    let mut services = HashMap::new();
    let cache_kind = match state.components.cache.kind() {
        CacheKind::Memory => "memory",
        CacheKind::Remote => "remote",
    };
    services.insert(
        "cache".to_string(),
        ServiceHealth::new(HealthStatus::Healthy, cache_kind),
    );

    let events = if state.components.router.is_ready() {
        ServiceHealth::new(HealthStatus::Healthy, "subscribed")
    } else {
        ServiceHealth::new(HealthStatus::Starting, "subscribing to provider events")
    };
    services.insert("events".to_string(), events);

    let gateway = match &state.components.gateway {
        Some(gateway) if gateway.is_connected() => ServiceHealth::new(HealthStatus::Healthy, "connected"),
        Some(_) => ServiceHealth::new(HealthStatus::Starting, "connecting to event gateway"),
        None => ServiceHealth::new(HealthStatus::Healthy, "webhook only"),
    };
    services.insert("gateway".to_string(), gateway);

    let response = HealthResponse::from_services(services, state.uptime().as_secs());
    match response.status {
        HealthStatus::Healthy => Ok(Json(response)),
        HealthStatus::Starting => Err((StatusCode::SERVICE_UNAVAILABLE, Json(response))),
    }
}
