pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod health;
pub mod logging;
pub mod server;
pub mod services;

pub use config::*;
pub use error::*;
pub use server::*;

use anyhow::Result;
use std::panic;
use crate::auth::components::AuthorizationComponents;

/// Main server entry point for library usage
pub async fn run_server() -> Result<()> {
    let app_config = config::load_config()?;

    logging::setup_tracing(&app_config.logging)?;

    // Set up panic handler (so it can use logging)
    panic::set_hook(Box::new(|panic_info| {
        ::tracing::error!(?panic_info, "FATAL: Panic occurred");
        std::process::exit(1);
    }));

    ::tracing::info!(
        environment = ?app_config.environment,
        cache = ?app_config.cache.kind,
        "IAM proxy starting up"
    );

    let components = AuthorizationComponents::new_production(&app_config).await?;

    server::start_server(app_config, components).await?;

    Ok(())
}
