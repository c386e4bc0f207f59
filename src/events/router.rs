//! Translates provider events into cache invalidations.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, info};

use super::{ACCESS_EVENTS, EventFeed, EventHandler, FeedError, FeedEvent, IAM_NAMESPACE, USER_GRANT_EVENTS};
use crate::cache::{CacheFacade, InvalidationRequest};

/// Read an id from the payload. Providers send ids as strings or numbers.
fn id_field(payload: &Value, name: &str) -> Option<String> {
    match payload.get(name)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Whole-access invalidation for an access-class event.
pub fn access_invalidation(payload: &Value) -> Option<InvalidationRequest> {
    let access_id = id_field(payload, "access_id").or_else(|| id_field(payload, "id"))?;
    Some(InvalidationRequest::access(access_id))
}

/// `(access, user)` invalidation for a user-grant event.
pub fn user_invalidation(payload: &Value) -> Option<InvalidationRequest> {
    let access_id = id_field(payload, "access_id")?;
    let user_id = id_field(payload, "profile_id").or_else(|| id_field(payload, "user_id"))?;
    Some(InvalidationRequest::user(access_id, user_id))
}

#[derive(Clone)]
pub struct InvalidationRouter {
    cache: CacheFacade,
    ready: Arc<AtomicBool>,
}

impl InvalidationRouter {
    pub fn new(cache: CacheFacade) -> Self {
        Self {
            cache,
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// True once both subscriptions are registered.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Register the access and user-grant subscriptions, in that order.
    ///
    /// A failure leaves the router not ready; retrying is up to the feed connector.
    pub async fn start(&self, feed: &dyn EventFeed) -> Result<(), FeedError> {
        feed.subscribe(IAM_NAMESPACE, ACCESS_EVENTS, self.handler(access_invalidation))
            .await?;
        feed.subscribe(IAM_NAMESPACE, USER_GRANT_EVENTS, self.handler(user_invalidation))
            .await?;

        self.ready.store(true, Ordering::Release);
        info!(namespace = IAM_NAMESPACE, "Invalidation router ready");
        Ok(())
    }

    fn handler(&self, extract: fn(&Value) -> Option<InvalidationRequest>) -> EventHandler {
        let router = self.clone();
        Arc::new(move |event: FeedEvent| {
            let router = router.clone();
            async move { router.handle(event, extract).await }.boxed()
        })
    }

    async fn handle(&self, event: FeedEvent, extract: fn(&Value) -> Option<InvalidationRequest>) {
        match extract(&event.payload) {
            Some(request) => {
                debug!(event_type = %event.event_type, access_id = %request.access_id, "Invalidation event");
                self.cache.invalidate(&request).await;
            }
            None => {
                debug!(event_type = %event.event_type, "Ignoring event without required ids");
            }
        }
    }
}
