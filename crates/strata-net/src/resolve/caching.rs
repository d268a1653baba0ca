//! Memoising resolver.
//!
//! Successful answers are kept for `positive_ttl`; `NotFound` answers for
//! `negative_ttl`. Any other failure (timeouts, loops, I/O) is never cached.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use strata_cache::TimeBoundCache;
use tracing::trace;

use super::NameResolver;
use crate::{NetAddress, NetError, Result};

/// Default number of names remembered per direction.
pub const DEFAULT_CACHE_ENTRIES: usize = 1024;
/// Default lifetime of a successful answer.
pub const DEFAULT_POSITIVE_TTL: Duration = Duration::from_secs(600);
/// Default lifetime of a `NotFound` answer.
pub const DEFAULT_NEGATIVE_TTL: Duration = Duration::from_secs(30);

enum Answer<T> {
    Found(T),
    Missing(String),
}

/// Resolver that caches its lower resolver's answers.
pub struct CachingResolver {
    lower: Arc<dyn NameResolver>,
    forward: TimeBoundCache<String, Vec<NetAddress>>,
    forward_missing: TimeBoundCache<String, String>,
    reverse: TimeBoundCache<NetAddress, Vec<String>>,
    reverse_missing: TimeBoundCache<NetAddress, String>,
}

impl CachingResolver {
    /// Cache with the default sizes and lifetimes.
    pub fn new(lower: Arc<dyn NameResolver>) -> Self {
        Self::with_ttls(
            lower,
            DEFAULT_CACHE_ENTRIES,
            DEFAULT_POSITIVE_TTL,
            DEFAULT_NEGATIVE_TTL,
        )
    }

    /// Cache with explicit sizes and lifetimes.
    pub fn with_ttls(
        lower: Arc<dyn NameResolver>,
        max_entries: usize,
        positive_ttl: Duration,
        negative_ttl: Duration,
    ) -> Self {
        Self {
            lower,
            forward: TimeBoundCache::new(max_entries, positive_ttl),
            forward_missing: TimeBoundCache::new(max_entries, negative_ttl),
            reverse: TimeBoundCache::new(max_entries, positive_ttl),
            reverse_missing: TimeBoundCache::new(max_entries, negative_ttl),
        }
    }

    /// Forget every cached answer.
    pub fn clear(&self) {
        self.forward.clear();
        self.forward_missing.clear();
        self.reverse.clear();
        self.reverse_missing.clear();
    }

    /// Number of cached answers, positive and negative, in both directions.
    pub fn size(&self) -> usize {
        self.forward.size()
            + self.forward_missing.size()
            + self.reverse.size()
            + self.reverse_missing.size()
    }

    fn lookup<K, T>(
        found: &TimeBoundCache<K, T>,
        missing: &TimeBoundCache<K, String>,
        key: &K,
    ) -> Option<Answer<T>>
    where
        K: Eq + std::hash::Hash + Clone,
        T: Clone,
    {
        if let Some(value) = found.get(key) {
            return Some(Answer::Found(value));
        }
        missing.get(key).map(Answer::Missing)
    }
}

fn remember<K, T>(
    found: &TimeBoundCache<K, T>,
    missing: &TimeBoundCache<K, String>,
    key: K,
    result: &Result<T>,
) where
    K: Eq + std::hash::Hash + Clone,
    T: Clone,
{
    match result {
        Ok(value) => {
            missing.remove(&key);
            found.put(key, value.clone());
        }
        Err(NetError::NotFound(msg)) => {
            found.remove(&key);
            missing.put(key, msg.clone());
        }
        Err(_) => {}
    }
}

#[async_trait]
impl NameResolver for CachingResolver {
    async fn resolve_addresses(&self, name: &str) -> Result<Vec<NetAddress>> {
        let key = name.to_ascii_lowercase();
        match Self::lookup(&self.forward, &self.forward_missing, &key) {
            Some(Answer::Found(addresses)) => {
                trace!(%name, "resolver cache hit");
                return Ok(addresses);
            }
            Some(Answer::Missing(msg)) => {
                trace!(%name, "resolver negative cache hit");
                return Err(NetError::NotFound(msg));
            }
            None => {}
        }

        let result = self.lower.resolve_addresses(name).await;
        remember(&self.forward, &self.forward_missing, key, &result);
        result
    }

    async fn resolve_names(&self, address: &NetAddress) -> Result<Vec<String>> {
        match Self::lookup(&self.reverse, &self.reverse_missing, address) {
            Some(Answer::Found(names)) => return Ok(names),
            Some(Answer::Missing(msg)) => return Err(NetError::NotFound(msg)),
            None => {}
        }

        let result = self.lower.resolve_names(address).await;
        remember(&self.reverse, &self.reverse_missing, address.clone(), &result);
        result
    }
}
