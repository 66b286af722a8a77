//! Short-lived identity cache
//!
//! Inspecting a credential costs a TokenReview or a TLS round trip to the
//! API server. Results are memoized per credential hash for a fixed TTL.
//! Expired entries are evicted when a read finds them, and every insert
//! sweeps the whole map so rotated credentials do not accumulate.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use crate::credential::Info;
use crate::identity::{Identity, IdentityProvider};
use crate::Result;

/// Default lifetime of a cached identity
pub const DEFAULT_IDENTITY_TTL: Duration = Duration::from_secs(120);

#[derive(Clone, Debug)]
struct CacheEntry {
    identity: Identity,
    expires_at: Instant,
}

/// Concurrent TTL cache from credential hash to identity
#[derive(Debug)]
pub struct IdentityCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl IdentityCache {
    /// Create an empty cache whose entries live for `ttl`
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Entry lifetime
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Live identity for `key`, evicting it if expired
    pub fn get(&self, key: &str) -> Option<Identity> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                return Some(entry.identity.clone());
            }
        }

        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        None
    }

    /// Store an identity, restarting its TTL
    ///
    /// Expired entries for other keys are dropped first.
    pub fn insert(&self, key: impl Into<String>, identity: Identity) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
        let entry = CacheEntry {
            identity,
            expires_at: now + self.ttl,
        };
        self.entries.insert(key.into(), entry);
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    /// Number of stored entries, including expired ones not yet evicted
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for IdentityCache {
    fn default() -> Self {
        Self::new(DEFAULT_IDENTITY_TTL)
    }
}

/// [`IdentityProvider`] that memoizes another provider
///
/// Only successful inspections are cached, so a rejected credential is
/// re-inspected on every request.
pub struct CachingIdentityProvider {
    inner: Arc<dyn IdentityProvider>,
    cache: Arc<IdentityCache>,
}

impl CachingIdentityProvider {
    /// Wrap `inner` with a shared cache
    pub fn new(inner: Arc<dyn IdentityProvider>, cache: Arc<IdentityCache>) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl IdentityProvider for CachingIdentityProvider {
    async fn get_identity(&self, info: &Info) -> Result<Identity> {
        let key = info.hash();

        if let Some(identity) = self.cache.get(&key) {
            debug!(scheme = %info.scheme(), identity = %identity, "Identity cache hit");
            return Ok(identity);
        }

        let identity = self.inner.get_identity(info).await?;
        debug!(scheme = %info.scheme(), identity = %identity, "Caching resolved identity");
        self.cache.insert(key, identity.clone());
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::MockIdentityProvider;
    use crate::Error;

    fn provider(inner: MockIdentityProvider, ttl: Duration) -> CachingIdentityProvider {
        CachingIdentityProvider::new(Arc::new(inner), Arc::new(IdentityCache::new(ttl)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_inspects_once_within_ttl() {
        let mut inner = MockIdentityProvider::new();
        inner
            .expect_get_identity()
            .times(1)
            .returning(|_| Ok(Identity::user("alice")));

        let provider = provider(inner, DEFAULT_IDENTITY_TTL);
        let info = Info::token("tok");

        assert_eq!(provider.get_identity(&info).await.unwrap(), Identity::user("alice"));
        tokio::time::advance(Duration::from_secs(119)).await;
        assert_eq!(provider.get_identity(&info).await.unwrap(), Identity::user("alice"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reinspects_after_expiry() {
        let mut inner = MockIdentityProvider::new();
        inner
            .expect_get_identity()
            .times(2)
            .returning(|_| Ok(Identity::user("alice")));

        let provider = provider(inner, DEFAULT_IDENTITY_TTL);
        let info = Info::token("tok");

        provider.get_identity(&info).await.unwrap();
        tokio::time::advance(Duration::from_secs(121)).await;
        provider.get_identity(&info).await.unwrap();
    }

    #[tokio::test]
    async fn test_distinct_credentials_cached_separately() {
        let mut inner = MockIdentityProvider::new();
        inner
            .expect_get_identity()
            .times(2)
            .returning(|info| match info {
                Info::Token(t) if t.as_str() == "a" => Ok(Identity::user("alice")),
                _ => Ok(Identity::user("bob")),
            });

        let provider = provider(inner, DEFAULT_IDENTITY_TTL);
        let alice = provider.get_identity(&Info::token("a")).await.unwrap();
        let bob = provider.get_identity(&Info::token("b")).await.unwrap();
        assert_eq!(alice.name, "alice");
        assert_eq!(bob.name, "bob");
        // Both are now served from the cache
        assert_eq!(provider.get_identity(&Info::token("a")).await.unwrap().name, "alice");
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let mut inner = MockIdentityProvider::new();
        inner
            .expect_get_identity()
            .times(2)
            .returning(|_| Err(Error::invalid_auth("token expired")));

        let cache = Arc::new(IdentityCache::default());
        let provider = CachingIdentityProvider::new(Arc::new(inner), cache.clone());
        let info = Info::token("expired");

        assert!(provider.get_identity(&info).await.is_err());
        assert!(provider.get_identity(&info).await.is_err());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_evicted_lazily() {
        let cache = IdentityCache::new(Duration::from_secs(10));
        cache.insert("a", Identity::user("alice"));
        cache.insert("b", Identity::user("bob"));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_insert_sweeps_expired_entries() {
        let cache = IdentityCache::new(DEFAULT_IDENTITY_TTL);
        for i in 0..1000 {
            cache.insert(format!("old-{i}"), Identity::user("alice"));
        }
        tokio::time::advance(Duration::from_secs(3600)).await;

        for i in 0..1000 {
            cache.insert(format!("new-{i}"), Identity::user("bob"));
        }
        assert_eq!(cache.len(), 1000);
        assert!(cache.get("old-0").is_none());
        assert_eq!(cache.get("new-999"), Some(Identity::user("bob")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_insert_keeps_live_entries() {
        let cache = IdentityCache::new(Duration::from_secs(10));
        cache.insert("a", Identity::user("alice"));
        tokio::time::advance(Duration::from_secs(5)).await;
        cache.insert("b", Identity::user("bob"));
        assert_eq!(cache.len(), 2);

        tokio::time::advance(Duration::from_secs(6)).await;
        cache.insert("c", Identity::user("carol"));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
        assert_eq!(cache.get("b"), Some(Identity::user("bob")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_insert_restarts_ttl() {
        let cache = IdentityCache::new(Duration::from_secs(10));
        cache.insert("a", Identity::user("alice"));
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.insert("a", Identity::user("alice"));
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(cache.get("a"), Some(Identity::user("alice")));
    }
}
