//! Provider event feed
//!
//! The IAM provider publishes mutation events on a namespaced feed. Consumers
//! register a handler for a set of event types through [`EventFeed`]; the
//! in-process [`BroadcastFeed`] fans events out over a tokio broadcast channel.
//! It is fed by the [`GatewayFeed`] connector and, secondarily, by the
//! `/events` webhook.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

pub mod gateway;
pub mod router;

pub use gateway::GatewayFeed;
pub use router::InvalidationRouter;

/// Namespace the provider publishes IAM events on.
pub const IAM_NAMESPACE: &str = "iam";

/// Events after which everything cached for an access may be stale.
pub const ACCESS_EVENTS: &[&str] = &[
    "access.update",
    "access.delete",
    "access.type.update",
    "access.type.delete",
    "category.update",
    "category.delete",
    "entity.save",
    "entity.delete",
    "entity.type.delete",
    "permission.save",
    "permission.update",
    "permission.delete",
    "role.update",
    "role.delete",
];

/// Events that change a single user's grants within an access.
pub const USER_GRANT_EVENTS: &[&str] = &["access.user.grant", "access.user.revoke"];

fn default_namespace() -> String {
    IAM_NAMESPACE.to_string()
}

/// One event as published by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedEvent {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub payload: Value,
}

impl FeedEvent {
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            namespace: default_namespace(),
            event_type: event_type.into(),
            payload,
        }
    }
}

/// Async callback invoked once per matching event.
pub type EventHandler = Arc<dyn Fn(FeedEvent) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("Event feed is closed")]
    Closed,

    #[error("Subscription rejected: {0}")]
    Rejected(String),

    #[error("Event gateway unavailable: {0}")]
    Unavailable(String),
}

/// Source of provider events.
#[async_trait]
pub trait EventFeed: Send + Sync {
    /// Register `handler` for `types` on `namespace`.
    ///
    /// Returns once the subscription is live; events published afterwards reach the handler.
    async fn subscribe(
        &self,
        namespace: &str,
        types: &[&str],
        handler: EventHandler,
    ) -> Result<(), FeedError>;
}

/// In-process feed on a tokio broadcast channel.
///
/// Each subscription owns a dispatch task that filters by namespace and type.
/// Slow handlers lag rather than block publishers. Lagged events are dropped
/// with a warning and counted in `iam_feed_lagged_events_total`.
pub struct BroadcastFeed {
    sender: broadcast::Sender<FeedEvent>,
    capacity: usize,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BroadcastFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            capacity,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Publish an event. Returns the number of live subscriptions it was delivered to.
    pub fn publish(&self, event: FeedEvent) -> usize {
        match self.sender.send(event) {
            Ok(count) => {
                debug!(subscribers = count, "Event published");
                count
            }
            Err(broadcast::error::SendError(event)) => {
                trace!(event_type = %event.event_type, "No subscribers, event dropped");
                0
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stop every dispatch task.
    pub fn shutdown(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

impl Default for BroadcastFeed {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl Drop for BroadcastFeed {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[async_trait]
impl EventFeed for BroadcastFeed {
    async fn subscribe(
        &self,
        namespace: &str,
        types: &[&str],
        handler: EventHandler,
    ) -> Result<(), FeedError> {
        let mut receiver = self.sender.subscribe();
        let namespace = namespace.to_string();
        let types: Vec<String> = types.iter().map(|t| t.to_string()).collect();

        let task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        if event.namespace == namespace && types.contains(&event.event_type) {
                            handler(event).await;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        metrics::counter!("iam_feed_lagged_events_total", "namespace" => namespace.clone())
                            .increment(skipped);
                        warn!(skipped, namespace = %namespace, "Event subscription lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        self.tasks
            .lock()
            .map_err(|_| FeedError::Closed)?
            .push(task);
        Ok(())
    }
}
