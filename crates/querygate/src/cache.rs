//! Result cache for serialized list payloads.
//!
//! Entries are grouped by namespace (an entity's cache key, e.g.
//! `posts-list`). Invalidation is coarse: a successful write to an entity drops
//! its whole namespace, whatever filters the cached pages used.
//!
//! ## Generations
//!
//! Each namespace carries a generation that every invalidation bumps. A list
//! reads the generation before it queries the store and hands it back to
//! [`ResultCache::put`]; a put whose generation is no longer current is
//! dropped, so a page computed before a write never lands after it.
//!
//! The cache is injected into the [`Gateway`](crate::gateway::Gateway) as an
//! `Arc<dyn ResultCache>`; [`MemoryCache`] is the process-wide default and
//! [`NoCache`] disables caching.

use crate::error::Result;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub namespace: String,
    pub digest: String,
}

impl CacheKey {
    /// Deterministic key for a list request. `filters` are sorted here, so the
    /// order in which the caller sent them does not matter.
    pub fn for_listing(
        namespace: &str,
        alias: &str,
        version: Option<&str>,
        filters: &[(String, String, String)],
        sort: &str,
        pagination: &str,
    ) -> Self {
        let mut filters = filters.to_vec();
        filters.sort();

        let mut hasher = Sha256::new();
        hasher.update(alias.as_bytes());
        hasher.update([0]);
        hasher.update(version.unwrap_or("baseline").as_bytes());
        hasher.update([0]);
        for (field, operator, value) in &filters {
            hasher.update(field.as_bytes());
            hasher.update([1]);
            hasher.update(operator.as_bytes());
            hasher.update([1]);
            hasher.update(value.as_bytes());
            hasher.update([0]);
        }
        hasher.update(sort.as_bytes());
        hasher.update([0]);
        hasher.update(pagination.as_bytes());

        Self {
            namespace: namespace.to_string(),
            digest: hex::encode(hasher.finalize()),
        }
    }
}

pub trait ResultCache: Send + Sync {
    fn get(&self, key: &CacheKey) -> Result<Option<String>>;

    /// Current generation of `namespace`.
    fn generation(&self, namespace: &str) -> Result<u64>;

    /// Stores `payload` unless `namespace` was invalidated after `generation`
    /// was read.
    fn put(&self, key: &CacheKey, generation: u64, payload: String, ttl: Duration) -> Result<()>;

    /// Drops every entry in `namespace` and bumps its generation.
    fn invalidate(&self, namespace: &str) -> Result<()>;
}

struct Entry {
    payload: String,
    expires_at: Instant,
}

#[derive(Default)]
struct Namespace {
    generation: u64,
    entries: HashMap<String, Entry>,
}

#[derive(Default)]
pub struct MemoryCache {
    namespaces: RwLock<HashMap<String, Namespace>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live entries across all namespaces.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.namespaces
            .read()
            .values()
            .flat_map(|namespace| namespace.entries.values())
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultCache for MemoryCache {
    fn get(&self, key: &CacheKey) -> Result<Option<String>> {
        let namespaces = self.namespaces.read();
        let entry = namespaces
            .get(&key.namespace)
            .and_then(|namespace| namespace.entries.get(&key.digest));
        Ok(match entry {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.payload.clone()),
            _ => None,
        })
    }

    fn generation(&self, namespace: &str) -> Result<u64> {
        Ok(self
            .namespaces
            .read()
            .get(namespace)
            .map_or(0, |namespace| namespace.generation))
    }

    fn put(&self, key: &CacheKey, generation: u64, payload: String, ttl: Duration) -> Result<()> {
        let mut namespaces = self.namespaces.write();
        let namespace = namespaces.entry(key.namespace.clone()).or_default();
        if namespace.generation != generation {
            debug!(namespace = %key.namespace, generation, "stale cache put dropped");
            return Ok(());
        }
        let now = Instant::now();
        namespace.entries.retain(|_, entry| entry.expires_at > now);
        namespace.entries.insert(
            key.digest.clone(),
            Entry {
                payload,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    fn invalidate(&self, namespace: &str) -> Result<()> {
        let mut namespaces = self.namespaces.write();
        let namespace = namespaces.entry(namespace.to_string()).or_default();
        namespace.entries.clear();
        namespace.generation += 1;
        Ok(())
    }
}

/// Never stores anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

impl ResultCache for NoCache {
    fn get(&self, _key: &CacheKey) -> Result<Option<String>> {
        Ok(None)
    }

    fn generation(&self, _namespace: &str) -> Result<u64> {
        Ok(0)
    }

    fn put(&self, _key: &CacheKey, _generation: u64, _payload: String, _ttl: Duration) -> Result<()> {
        Ok(())
    }

    fn invalidate(&self, _namespace: &str) -> Result<()> {
        Ok(())
    }
}
