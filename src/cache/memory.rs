//! Process-local permission store.
//!
//! Entries live in per-access buckets. A bucket carries one freshness deadline
//! shared by all of its role and user entries: any hit or save inside the
//! bucket pushes the deadline to `now + ttl`, and the sweep drops whole buckets.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::{CacheKey, InvalidationRequest, InvalidationTarget, PermissionStore, Scope};

/// All cached grants for one access.
#[derive(Debug, Clone)]
struct AccessBucket {
    roles: HashMap<String, Vec<String>>,
    users: HashMap<String, Vec<String>>,
    expires_at: Instant,
}

impl AccessBucket {
    fn new(ttl: Duration) -> Self {
        Self {
            roles: HashMap::new(),
            users: HashMap::new(),
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }

    fn touch(&mut self, ttl: Duration) {
        self.expires_at = Instant::now() + ttl;
    }
}

type Buckets = Arc<RwLock<HashMap<String, AccessBucket>>>;

/// In-memory store with a periodic bucket sweep.
///
/// The sweep runs every `ttl` on a background task that is aborted by
/// [`PermissionStore::shutdown`] or when the store is dropped.
pub struct InMemoryStore {
    ttl: Duration,
    buckets: Buckets,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl InMemoryStore {
    /// Create the store and start its sweep task. Must be called inside a tokio runtime.
    pub fn new(ttl: Duration) -> Self {
        let buckets: Buckets = Arc::new(RwLock::new(HashMap::new()));
        let sweeper = tokio::spawn(sweep_task(buckets.clone(), ttl));

        Self {
            ttl,
            buckets,
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of access buckets currently held.
    pub async fn bucket_count(&self) -> usize {
        self.buckets.read().await.len()
    }

    /// Drop every bucket whose deadline has passed. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        sweep_expired(&self.buckets).await
    }

    fn stop_sweeper(&self) {
        if let Ok(mut sweeper) = self.sweeper.lock() {
            if let Some(handle) = sweeper.take() {
                handle.abort();
            }
        }
    }
}

async fn sweep_task(buckets: Buckets, ttl: Duration) {
    let mut interval = tokio::time::interval_at(Instant::now() + ttl, ttl);

    loop {
        interval.tick().await;
        sweep_expired(&buckets).await;
    }
}

async fn sweep_expired(buckets: &Buckets) -> usize {
    let now = Instant::now();
    let mut buckets = buckets.write().await;
    let before = buckets.len();

    buckets.retain(|_, bucket| !bucket.is_expired(now));

    let removed = before - buckets.len();
    if removed > 0 {
        debug!(removed, remaining = buckets.len(), "Swept expired access buckets");
    }
    removed
}

#[async_trait]
impl PermissionStore for InMemoryStore {
    async fn hit(&self, key: &CacheKey) -> Option<Vec<String>> {
        let mut buckets = self.buckets.write().await;
        let bucket = buckets.get_mut(&key.access_id)?;

        if bucket.is_expired(Instant::now()) {
            trace!(access_id = %key.access_id, "Bucket expired before sweep");
            buckets.remove(&key.access_id);
            return None;
        }

        let entries = match &key.scope {
            Scope::Role(role_id) => bucket.roles.get(role_id).cloned(),
            Scope::User(user_id) => bucket.users.get(user_id).cloned(),
        }?;

        bucket.touch(self.ttl);
        Some(entries)
    }

    async fn save(&self, key: &CacheKey, entries: Vec<String>) {
        let now = Instant::now();
        let mut buckets = self.buckets.write().await;

        let bucket = buckets
            .entry(key.access_id.clone())
            .and_modify(|bucket| {
                // A stale bucket must not lend its other entries a new lease
                if bucket.is_expired(now) {
                    *bucket = AccessBucket::new(self.ttl);
                }
            })
            .or_insert_with(|| AccessBucket::new(self.ttl));

        match &key.scope {
            Scope::Role(role_id) => bucket.roles.insert(role_id.clone(), entries),
            Scope::User(user_id) => bucket.users.insert(user_id.clone(), entries),
        };
        bucket.touch(self.ttl);
    }

    async fn invalidate(&self, request: &InvalidationRequest) {
        let mut buckets = self.buckets.write().await;

        match request.target() {
            InvalidationTarget::Access => {
                buckets.remove(&request.access_id);
            }
            InvalidationTarget::Role(role_id) => {
                if let Some(bucket) = buckets.get_mut(&request.access_id) {
                    bucket.roles.remove(role_id);
                }
            }
            InvalidationTarget::User(user_id) => {
                if let Some(bucket) = buckets.get_mut(&request.access_id) {
                    bucket.users.remove(user_id);
                }
            }
        }
    }

    async fn shutdown(&self) {
        self.stop_sweeper();
    }
}

impl Drop for InMemoryStore {
    fn drop(&mut self) {
        self.stop_sweeper();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(10);

    fn entries(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_then_hit_returns_entries() {
        let store = InMemoryStore::new(TTL);
        let key = CacheKey::role("a1", "r1");
        let saved = entries(&["iam:billing:1111:u1:", "iam:reports:0100:u1:chart#3"]);

        store.save(&key, saved.clone()).await;
        assert_eq!(store.hit(&key).await, Some(saved));
    }

    #[tokio::test(start_paused = true)]
    async fn test_role_and_user_are_separate() {
        let store = InMemoryStore::new(TTL);
        store.save(&CacheKey::role("a1", "x"), entries(&["iam:a:1000"])).await;

        assert!(store.hit(&CacheKey::user("a1", "x")).await.is_none());
        assert!(store.hit(&CacheKey::role("a1", "x")).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_overwrites() {
        let store = InMemoryStore::new(TTL);
        let key = CacheKey::user("a1", "u1");

        store.save(&key, entries(&["iam:a:1000"])).await;
        store.save(&key, entries(&["iam:b:0100"])).await;
        assert_eq!(store.hit(&key).await, Some(entries(&["iam:b:0100"])));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let store = InMemoryStore::new(TTL);
        let key = CacheKey::role("a1", "r1");
        store.save(&key, entries(&["iam:a:1000"])).await;

        tokio::time::advance(TTL + Duration::from_millis(1)).await;
        assert!(store.hit(&key).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_on_one_scope_extends_whole_bucket() {
        let store = InMemoryStore::new(TTL);
        let role = CacheKey::role("a1", "r1");
        let user = CacheKey::user("a1", "u1");

        store.save(&role, entries(&["iam:a:1000"])).await;
        store.save(&user, entries(&["iam:b:1000"])).await;

        // Just before the role's own deadline, touch the unrelated user
        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(store.hit(&user).await.is_some());

        // Past the role's original deadline it is still alive
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(store.hit(&role).await, Some(entries(&["iam:a:1000"])));
    }

    #[tokio::test(start_paused = true)]
    async fn test_miss_does_not_extend_bucket() {
        let store = InMemoryStore::new(TTL);
        let role = CacheKey::role("a1", "r1");
        store.save(&role, entries(&["iam:a:1000"])).await;

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(store.hit(&CacheKey::user("a1", "unknown")).await.is_none());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.hit(&role).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweep_drops_whole_bucket() {
        let store = InMemoryStore::new(TTL);
        store.save(&CacheKey::role("a1", "r1"), entries(&["iam:a:1000"])).await;
        store.save(&CacheKey::user("a1", "u1"), entries(&["iam:a:1000"])).await;
        store.save(&CacheKey::role("a2", "r1"), entries(&["iam:a:1000"])).await;
        assert_eq!(store.bucket_count().await, 2);

        // Two sweep periods guarantee one tick observed the expired deadline
        tokio::time::sleep(TTL * 2 + Duration::from_millis(1)).await;
        assert_eq!(store.bucket_count().await, 0);
        store.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_sweep_keeps_fresh_buckets() {
        let store = InMemoryStore::new(TTL);
        store.save(&CacheKey::role("old", "r1"), entries(&["iam:a:1000"])).await;
        tokio::time::advance(Duration::from_secs(6)).await;
        store.save(&CacheKey::role("new", "r1"), entries(&["iam:a:1000"])).await;
        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(store.sweep().await, 1);
        assert!(store.hit(&CacheKey::role("new", "r1")).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_scopes() {
        let store = InMemoryStore::new(TTL);
        let role = CacheKey::role("a1", "r1");
        let user = CacheKey::user("a1", "u1");
        store.save(&role, entries(&["iam:a:1000"])).await;
        store.save(&user, entries(&["iam:a:1000"])).await;

        store.invalidate(&InvalidationRequest::role("a1", "r1")).await;
        assert!(store.hit(&role).await.is_none());
        assert!(store.hit(&user).await.is_some());
        assert_eq!(store.bucket_count().await, 1);

        store.invalidate(&InvalidationRequest::user("a1", "u1")).await;
        assert!(store.hit(&user).await.is_none());

        store.save(&role, entries(&["iam:a:1000"])).await;
        store.invalidate(&InvalidationRequest::access("a1")).await;
        assert_eq!(store.bucket_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_absent_is_noop() {
        let store = InMemoryStore::new(TTL);
        store.invalidate(&InvalidationRequest::access("missing")).await;
        store.invalidate(&InvalidationRequest::user("missing", "u1")).await;
        assert_eq!(store.bucket_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_and_invalidate_last_writer_wins() {
        let store = InMemoryStore::new(TTL);
        let key = CacheKey::user("a1", "u1");

        store.save(&key, entries(&["iam:a:1000"])).await;
        store.invalidate(&InvalidationRequest::user("a1", "u1")).await;
        assert!(store.hit(&key).await.is_none());

        store.invalidate(&InvalidationRequest::user("a1", "u1")).await;
        store.save(&key, entries(&["iam:a:1000"])).await;
        assert!(store.hit(&key).await.is_some());
    }
}
