use std::time::Duration;

use tokio::time::Instant;

use crate::auth::AuthorizationComponents;

pub mod handlers;
pub mod runtime;

pub use runtime::{create_router, start_server};

/// State shared by every route.
#[derive(Clone)]
pub struct AppState {
    pub components: AuthorizationComponents,
    started_at: Instant,
}

impl AppState {
    pub fn new(components: AuthorizationComponents) -> Self {
        Self {
            components,
            started_at: Instant::now(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}
