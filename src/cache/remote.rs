//! Permission store on an external key-value service.
//!
//! Layout: one hash per access and scope kind,
//! `{namespace}access:{access_id}:role` and `{namespace}access:{access_id}:user`,
//! with the role or user id as field and the JSON-encoded entry list as value.
//! Freshness relies on the service's native key TTL, refreshed at most once per
//! `ttl / 2` per hash key.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{trace, warn};

use super::hash_client::HashClient;
use super::{CacheKey, InvalidationRequest, InvalidationTarget, PermissionStore};
use crate::error::CacheError;

pub struct RemoteStore {
    client: Arc<dyn HashClient>,
    namespace: String,
    ttl: Duration,
    timeout: Duration,
    refreshing: Arc<Mutex<HashSet<String>>>,
}

impl RemoteStore {
    pub fn new(client: Arc<dyn HashClient>, namespace: String, ttl: Duration, timeout: Duration) -> Self {
        Self {
            client,
            namespace,
            ttl,
            timeout,
            refreshing: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn hash_key(&self, access_id: &str, kind: &str) -> String {
        format!("{}access:{}:{}", self.namespace, access_id, kind)
    }

    /// Run one remote call under the store timeout, absorbing any failure.
    async fn guarded<T, F>(&self, op: &'static str, key: &str, call: F) -> Option<T>
    where
        F: Future<Output = Result<T, CacheError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                warn!(op, key = %key, error = %e, "Remote store call failed");
                metrics::counter!("iam_cache_store_errors_total", "op" => op).increment(1);
                None
            }
            Err(_) => {
                warn!(op, key = %key, timeout_ms = self.timeout.as_millis() as u64, "Remote store call timed out");
                metrics::counter!("iam_cache_store_errors_total", "op" => op).increment(1);
                None
            }
        }
    }

    /// Claim the refresh marker for `hash_key`. Returns false while a previous claim is live.
    fn claim_refresh(&self, hash_key: &str) -> bool {
        let Ok(mut refreshing) = self.refreshing.lock() else {
            return false;
        };
        if !refreshing.insert(hash_key.to_string()) {
            return false;
        }
        drop(refreshing);

        let refreshing = self.refreshing.clone();
        let hash_key = hash_key.to_string();
        let window = self.ttl / 2;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if let Ok(mut refreshing) = refreshing.lock() {
                refreshing.remove(&hash_key);
            }
        });
        true
    }

    async fn refresh_ttl(&self, hash_key: &str) {
        if !self.claim_refresh(hash_key) {
            trace!(key = %hash_key, "TTL refresh throttled");
            return;
        }
        self.guarded("expire", hash_key, self.client.expire(hash_key, self.ttl))
            .await;
    }
}

#[async_trait]
impl PermissionStore for RemoteStore {
    async fn hit(&self, key: &CacheKey) -> Option<Vec<String>> {
        let hash_key = self.hash_key(&key.access_id, key.scope.kind());
        let raw = self
            .guarded("hget", &hash_key, self.client.hget(&hash_key, key.scope.id()))
            .await
            .flatten()?;

        let entries = match serde_json::from_str::<Vec<String>>(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(key = %hash_key, error = %e, "Discarding undecodable cached entries");
                metrics::counter!("iam_cache_store_errors_total", "op" => "decode").increment(1);
                return None;
            }
        };

        self.refresh_ttl(&hash_key).await;
        Some(entries)
    }

    async fn save(&self, key: &CacheKey, entries: Vec<String>) {
        let hash_key = self.hash_key(&key.access_id, key.scope.kind());
        let value = match serde_json::to_string(&entries) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %hash_key, error = %e, "Failed to encode entries");
                return;
            }
        };

        if self
            .guarded("hset", &hash_key, self.client.hset(&hash_key, key.scope.id(), &value))
            .await
            .is_some()
        {
            self.refresh_ttl(&hash_key).await;
        }
    }

    async fn invalidate(&self, request: &InvalidationRequest) {
        match request.target() {
            InvalidationTarget::Access => {
                let keys = vec![
                    self.hash_key(&request.access_id, "role"),
                    self.hash_key(&request.access_id, "user"),
                ];
                self.guarded("del", &keys[0], self.client.del_keys(&keys)).await;
            }
            InvalidationTarget::Role(role_id) => {
                let hash_key = self.hash_key(&request.access_id, "role");
                self.guarded("hdel", &hash_key, self.client.hdel(&hash_key, role_id))
                    .await;
            }
            InvalidationTarget::User(user_id) => {
                let hash_key = self.hash_key(&request.access_id, "user");
                self.guarded("hdel", &hash_key, self.client.hdel(&hash_key, user_id))
                    .await;
            }
        }
    }
}
