//! Authorization components for dependency injection
//!
//! Everything the HTTP layer needs is built once at startup and shared by
//! clone: the permission cache, the provider client, the event feed, the
//! connector to the provider's event gateway and the invalidation router.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cache::CacheFacade;
use crate::config::{AppConfig, CacheSettings, Environment, UpstreamConfig};
use crate::events::{BroadcastFeed, GatewayFeed, InvalidationRouter};
use crate::services::{HttpUpstreamClient, IamService, UpstreamClient};

/// Bundle of all authorization system components
#[derive(Clone)]
pub struct AuthorizationComponents {
    pub cache: CacheFacade,
    pub upstream: Arc<dyn UpstreamClient>,
    pub feed: Arc<BroadcastFeed>,
    /// Connector feeding `feed` from the provider. `None` leaves the webhook as the only source.
    pub gateway: Option<Arc<GatewayFeed>>,
    pub router: InvalidationRouter,
    pub iam: IamService,
}

impl AuthorizationComponents {
    /// Create production components talking to the configured provider.
    ///
    /// Outside development the provider must accept the configured key, and a
    /// configured event gateway must be reachable, or startup fails.
    pub async fn new_production(config: &AppConfig) -> Result<Self> {
        let client = HttpUpstreamClient::new(&config.upstream).context("Invalid upstream configuration")?;
        info!(endpoint = %client.endpoint(), "Provider client configured");
        let components = Self::with_upstream(&config.cache, Arc::new(client)).await?;

        if config.environment != Environment::Development {
            components
                .iam
                .verify_key()
                .await
                .context("Provider rejected the configured key")?;
            info!("Provider key verified");
        }

        if config.upstream.events.is_some() {
            components.connect_gateway(&config.upstream).await
        } else {
            warn!("No event gateway configured, only the /events webhook invalidates cached grants");
            Ok(components)
        }
    }

    /// Connect to the provider's event gateway and feed its events to the router.
    pub async fn connect_gateway(mut self, config: &UpstreamConfig) -> Result<Self> {
        let gateway = GatewayFeed::new(config, self.feed.clone()).context("Invalid event gateway configuration")?;
        gateway
            .connect()
            .await
            .context("Failed to connect to the event gateway")?;
        self.gateway = Some(Arc::new(gateway));
        Ok(self)
    }

    /// True when invalidations can arrive: the router is subscribed and the
    /// gateway stream, if any, is open.
    pub fn events_ready(&self) -> bool {
        self.router.is_ready() && self.gateway.as_ref().is_none_or(|gateway| gateway.is_connected())
    }

    /// Create components around any provider client.
    ///
    /// The invalidation router is subscribed before this returns.
    pub async fn with_upstream(settings: &CacheSettings, upstream: Arc<dyn UpstreamClient>) -> Result<Self> {
        let cache = CacheFacade::from_settings(settings).context("Invalid cache configuration")?;
        let feed = Arc::new(BroadcastFeed::default());
        let router = InvalidationRouter::new(cache.clone());

        router
            .start(feed.as_ref())
            .await
            .context("Failed to subscribe to provider events")?;

        let iam = IamService::new(cache.clone(), upstream.clone());

        Ok(Self {
            cache,
            upstream,
            feed,
            gateway: None,
            router,
            iam,
        })
    }

    /// Stop background work: the gateway stream, event dispatch and the cache sweep.
    pub async fn shutdown(&self) {
        if let Some(gateway) = &self.gateway {
            gateway.shutdown();
        }
        self.feed.shutdown();
        self.cache.shutdown().await;
        info!("Authorization components shut down");
    }
}
