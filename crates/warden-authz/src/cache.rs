//! Read-side cache: an in-memory TTL store, the key families used by the
//! authorization engine, and best-effort typed access on top of any
//! [`CacheStore`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use uuid::Uuid;
use warden_core::cache::{CacheError, CacheStore, pattern_matches};
use warden_core::models::endpoint::normalize_method;

/// Cache key families.
pub mod keys {
    use super::*;

    /// Prefix shared by every permission-name-based read-model.
    pub const AUTH_PREFIX: &str = "auth:";

    pub fn has_permission(user_id: &str, system_name: &str) -> String {
        format!("auth:has_perm:{user_id}:{system_name}")
    }

    /// Every per-(user, permission) boolean of one user.
    pub fn has_permission_of_user(user_id: &str) -> String {
        format!("auth:has_perm:{user_id}:*")
    }

    pub fn user_permissions(user_id: &str) -> String {
        format!("auth:user_perms:{user_id}")
    }

    pub fn endpoint(controller: &str, action: &str, http_method: &str) -> String {
        format!(
            "auth:endpoint:{controller}:{action}:{}",
            normalize_method(http_method)
        )
    }

    /// Every cached endpoint lookup.
    pub fn all_endpoints() -> String {
        "auth:endpoint:*".to_string()
    }

    pub fn permission(id: Uuid) -> String {
        format!("auth:permission:{id}")
    }

    pub fn all_auth() -> String {
        format!("{AUTH_PREFIX}*")
    }

    pub fn policy(policy_name: &str) -> String {
        format!("auth_policy:{policy_name}")
    }
}

struct CacheEntry {
    bytes: Vec<u8>,
    expires_at: Instant,
}

/// Process-local TTL cache backed by a concurrent map.
///
/// Expired entries are dropped lazily on read. Writers race with
/// last-writer-wins semantics; there is no locking beyond the map's shards.
#[derive(Clone, Default)]
pub struct MemoryCache {
    inner: Arc<DashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Whether a live entry exists for `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.inner
            .get(key)
            .is_some_and(|entry| entry.expires_at > Instant::now())
    }
}

impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let now = Instant::now();
        let Some(entry) = self.inner.get(key) else {
            return Ok(None);
        };
        if entry.expires_at <= now {
            drop(entry);
            self.inner.remove(key);
            return Ok(None);
        }
        Ok(Some(entry.bytes.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        self.inner.insert(
            key.to_string(),
            CacheEntry {
                bytes: value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.inner.remove(key);
        Ok(())
    }

    async fn remove_matching(&self, pattern: &str) -> Result<u64, CacheError> {
        let matching: Vec<String> = self
            .inner
            .iter()
            .filter(|entry| pattern_matches(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for key in matching {
            if self.inner.remove(&key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.inner.clear();
        Ok(())
    }
}

/// Typed, best-effort access to a shared [`CacheStore`].
///
/// No method here ever returns an error: failures are logged at `warn` and
/// turned into a miss (reads) or a no-op (writes and invalidations).
pub struct AuthzCache<C> {
    store: Arc<C>,
}

impl<C> Clone for AuthzCache<C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<C: CacheStore> AuthzCache<C> {
    pub fn new(store: Arc<C>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &C {
        &self.store
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = match self.store.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!(key, "Cache miss");
                return None;
            }
            Err(e) => {
                warn!(key, error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => {
                debug!(key, "Cache hit");
                Some(value)
            }
            Err(e) => {
                warn!(key, error = %e, "Discarding undecodable cache entry");
                self.remove(key).await;
                None
            }
        }
    }

    pub async fn put_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key, error = %e, "Cache serialization failed");
                return;
            }
        };
        if let Err(e) = self.store.set(key, bytes, ttl).await {
            warn!(key, error = %e, "Cache write failed");
        }
    }

    pub async fn remove(&self, key: &str) {
        if let Err(e) = self.store.remove(key).await {
            warn!(key, error = %e, "Cache remove failed");
        }
    }

    pub async fn remove_matching(&self, pattern: &str) -> u64 {
        match self.store.remove_matching(pattern).await {
            Ok(removed) => {
                debug!(pattern, removed, "Cache entries invalidated");
                removed
            }
            Err(e) => {
                warn!(pattern, error = %e, "Cache pattern remove failed");
                0
            }
        }
    }

    pub async fn clear(&self) {
        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "Cache clear failed");
        }
    }

    // -----------------------------------------------------------------------
    // Invalidation primitives
    // -----------------------------------------------------------------------

    /// A user's permission-name list and every per-permission boolean.
    pub async fn invalidate_user(&self, user_id: &str) {
        self.remove(&keys::user_permissions(user_id)).await;
        self.remove_matching(&keys::has_permission_of_user(user_id))
            .await;
    }

    /// The permission's id-scoped entry.
    pub async fn invalidate_permission_id(&self, permission_id: Uuid) {
        self.remove(&keys::permission(permission_id)).await;
    }

    pub async fn invalidate_endpoint(&self, controller: &str, action: &str, http_method: &str) {
        self.remove(&keys::endpoint(controller, action, http_method))
            .await;
    }

    pub async fn invalidate_all_endpoints(&self) {
        self.remove_matching(&keys::all_endpoints()).await;
    }

    pub async fn invalidate_policy(&self, policy_name: &str) {
        self.remove(&keys::policy(policy_name)).await;
    }

    /// Sweep every permission-name-based read-model.
    pub async fn invalidate_all_permission_caches(&self) {
        self.remove_matching(&keys::all_auth()).await;
    }
}
