//! Permission grant cache
//!
//! Caches the grant list the IAM provider returns for an `(access, role)` or
//! `(access, user)` pair so repeated verification skips the network round trip.
//!
//! The cache is an optimization layer only:
//! - A store failure degrades to "no cached data", never to an error
//! - The provider stays authoritative; invalidation events keep us close to it
//! - The one caller-visible error is a lookup with neither role nor user
//!
//! Two interchangeable backends sit behind [`PermissionStore`]:
//! [`InMemoryStore`] (process-local, bucket-granular sweep) and
//! [`RemoteStore`] (hash per access and scope kind in a key-value service).

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{CacheKind, CacheSettings};
use crate::error::CacheError;

pub mod memory;
pub mod hash_client;
pub mod remote;

pub use memory::InMemoryStore;
pub use hash_client::{HashClient, RedisHashClient};
pub use remote::RemoteStore;

/// Whether an entry is keyed by role or by an individual user.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Role(String),
    User(String),
}

impl Scope {
    pub fn kind(&self) -> &'static str {
        match self {
            Scope::Role(_) => "role",
            Scope::User(_) => "user",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Scope::Role(id) | Scope::User(id) => id,
        }
    }
}

/// Normalized cache key: one access plus exactly one scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub access_id: String,
    pub scope: Scope,
}

impl CacheKey {
    pub fn role(access_id: impl Into<String>, role_id: impl Into<String>) -> Self {
        Self {
            access_id: access_id.into(),
            scope: Scope::Role(role_id.into()),
        }
    }

    pub fn user(access_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            access_id: access_id.into(),
            scope: Scope::User(user_id.into()),
        }
    }
}

/// Raw lookup as callers supply it. `role_id` wins when both ids are present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheLookup {
    pub access_id: String,
    #[serde(default)]
    pub role_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl CacheLookup {
    pub fn role(access_id: impl Into<String>, role_id: impl Into<String>) -> Self {
        Self {
            access_id: access_id.into(),
            role_id: Some(role_id.into()),
            user_id: None,
        }
    }

    pub fn user(access_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            access_id: access_id.into(),
            role_id: None,
            user_id: Some(user_id.into()),
        }
    }
}

impl TryFrom<&CacheLookup> for CacheKey {
    type Error = CacheError;

    fn try_from(lookup: &CacheLookup) -> Result<Self, Self::Error> {
        let present = |id: &Option<String>| id.as_deref().filter(|id| !id.is_empty()).map(str::to_string);

        let scope = match (present(&lookup.role_id), present(&lookup.user_id)) {
            (Some(role_id), _) => Scope::Role(role_id),
            (None, Some(user_id)) => Scope::User(user_id),
            (None, None) => return Err(CacheError::InvalidFilter),
        };

        Ok(CacheKey {
            access_id: lookup.access_id.clone(),
            scope,
        })
    }
}

/// Scope of an invalidation. Without role or user the whole access goes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationRequest {
    pub access_id: String,
    #[serde(default)]
    pub role_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Resolved target of an [`InvalidationRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationTarget<'a> {
    Access,
    Role(&'a str),
    User(&'a str),
}

impl InvalidationRequest {
    pub fn access(access_id: impl Into<String>) -> Self {
        Self {
            access_id: access_id.into(),
            ..Default::default()
        }
    }

    pub fn role(access_id: impl Into<String>, role_id: impl Into<String>) -> Self {
        Self {
            access_id: access_id.into(),
            role_id: Some(role_id.into()),
            user_id: None,
        }
    }

    pub fn user(access_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            access_id: access_id.into(),
            role_id: None,
            user_id: Some(user_id.into()),
        }
    }

    pub fn target(&self) -> InvalidationTarget<'_> {
        match (
            self.role_id.as_deref().filter(|id| !id.is_empty()),
            self.user_id.as_deref().filter(|id| !id.is_empty()),
        ) {
            (Some(role_id), _) => InvalidationTarget::Role(role_id),
            (None, Some(user_id)) => InvalidationTarget::User(user_id),
            (None, None) => InvalidationTarget::Access,
        }
    }
}

/// Backend holding cached grant lists.
///
/// Every operation is best-effort: implementations absorb their own failures
/// and report them through logs only.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// Cached entries for `key`, or `None` when absent, expired or unreachable.
    async fn hit(&self, key: &CacheKey) -> Option<Vec<String>>;

    /// Replace whatever is stored under `key`.
    async fn save(&self, key: &CacheKey, entries: Vec<String>);

    /// Drop the scope described by `request`. Absent keys are a no-op.
    async fn invalidate(&self, request: &InvalidationRequest);

    /// Stop background work owned by the store.
    async fn shutdown(&self) {}
}

/// The configured backend, chosen once at startup.
pub enum CacheStore {
    Memory(InMemoryStore),
    Remote(RemoteStore),
}

impl CacheStore {
    pub fn kind(&self) -> CacheKind {
        match self {
            CacheStore::Memory(_) => CacheKind::Memory,
            CacheStore::Remote(_) => CacheKind::Remote,
        }
    }
}

#[async_trait]
impl PermissionStore for CacheStore {
    async fn hit(&self, key: &CacheKey) -> Option<Vec<String>> {
        match self {
            CacheStore::Memory(store) => store.hit(key).await,
            CacheStore::Remote(store) => store.hit(key).await,
        }
    }

    async fn save(&self, key: &CacheKey, entries: Vec<String>) {
        match self {
            CacheStore::Memory(store) => store.save(key, entries).await,
            CacheStore::Remote(store) => store.save(key, entries).await,
        }
    }

    async fn invalidate(&self, request: &InvalidationRequest) {
        match self {
            CacheStore::Memory(store) => store.invalidate(request).await,
            CacheStore::Remote(store) => store.invalidate(request).await,
        }
    }

    async fn shutdown(&self) {
        match self {
            CacheStore::Memory(store) => store.shutdown().await,
            CacheStore::Remote(store) => store.shutdown().await,
        }
    }
}

/// The only entry point callers use. Cheap to clone.
#[derive(Clone)]
pub struct CacheFacade {
    store: Arc<CacheStore>,
}

impl CacheFacade {
    pub fn new(store: CacheStore) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    /// Build the configured backend.
    ///
    /// Fails only on configuration problems; an unreachable remote service is
    /// tolerated and surfaces as misses.
    pub fn from_settings(settings: &CacheSettings) -> Result<Self, CacheError> {
        let store = match settings.kind {
            CacheKind::Memory => CacheStore::Memory(InMemoryStore::new(settings.ttl())),
            CacheKind::Remote => {
                let client = RedisHashClient::connect(&settings.remote)?;
                CacheStore::Remote(RemoteStore::new(
                    Arc::new(client),
                    settings.remote.namespace.clone(),
                    settings.ttl(),
                    settings.remote.timeout(),
                ))
            }
        };

        info!(
            kind = ?settings.kind,
            ttl_secs = settings.ttl_seconds,
            "Permission cache initialized"
        );
        Ok(Self::new(store))
    }

    pub fn kind(&self) -> CacheKind {
        self.store.kind()
    }

    fn kind_label(&self) -> &'static str {
        match self.kind() {
            CacheKind::Memory => "memory",
            CacheKind::Remote => "remote",
        }
    }

    /// Cached entries for `lookup`.
    ///
    /// Errors only with [`CacheError::InvalidFilter`] when neither role nor user is given.
    pub async fn hit(&self, lookup: &CacheLookup) -> Result<Option<Vec<String>>, CacheError> {
        let key = CacheKey::try_from(lookup)?;
        let entries = self.store.hit(&key).await;

        if entries.is_some() {
            metrics::counter!("iam_cache_hits_total", "store" => self.kind_label()).increment(1);
            debug!(access_id = %key.access_id, scope = key.scope.kind(), "Cache hit");
        } else {
            metrics::counter!("iam_cache_misses_total", "store" => self.kind_label()).increment(1);
            debug!(access_id = %key.access_id, scope = key.scope.kind(), "Cache miss");
        }

        Ok(entries)
    }

    /// Store `entries` under `lookup`, replacing any previous value.
    pub async fn save(&self, lookup: &CacheLookup, entries: Vec<String>) -> Result<(), CacheError> {
        let key = CacheKey::try_from(lookup)?;
        self.store.save(&key, entries).await;
        Ok(())
    }

    pub async fn invalidate(&self, request: &InvalidationRequest) {
        if request.access_id.is_empty() {
            warn!("Ignoring invalidation without access_id");
            return;
        }
        debug!(
            access_id = %request.access_id,
            target = ?request.target(),
            "Invalidating cached permissions"
        );
        self.store.invalidate(request).await;
    }

    pub async fn shutdown(&self) {
        self.store.shutdown().await;
    }
}
