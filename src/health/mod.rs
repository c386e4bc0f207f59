//! Liveness and readiness checks.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub mod handlers;

pub use handlers::{liveness_handler, readiness_handler};

/// Health status for individual services
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Starting,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub status: HealthStatus,
    pub message: String,
}

impl ServiceHealth {
    fn new(status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Readiness check body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Worst of all services
    pub status: HealthStatus,
    pub services: HashMap<String, ServiceHealth>,
    pub uptime_seconds: u64,
}

impl HealthResponse {
    pub fn from_services(services: HashMap<String, ServiceHealth>, uptime_seconds: u64) -> Self {
        let status = if services.values().all(|s| s.status == HealthStatus::Healthy) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Starting
        };
        Self {
            status,
            services,
            uptime_seconds,
        }
    }
}
