use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::identifiers::{PlatformId, ScopeId};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub scope: ScopeId,
    pub platform: PlatformId,
    pub query: String,
}

impl CacheKey {
    pub fn new(
        scope: impl Into<ScopeId>,
        platform: impl Into<PlatformId>,
        query: impl Into<String>,
    ) -> Self {
        Self {
            scope: scope.into(),
            platform: platform.into(),
            query: query.into(),
        }
    }
}

struct CacheSlot<T> {
    stored_at: Instant,
    value: T,
}

/// Read cache for one reconciliation or discovery run. Entries expire after
/// the TTL; the cache is dropped with the run and never shared across runs.
pub struct SearchCache<T> {
    ttl: Duration,
    entries: Mutex<HashMap<CacheKey, CacheSlot<T>>>,
}

impl<T: Clone> SearchCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<T> {
        let mut entries = self.entries.lock().expect("search cache lock");
        match entries.get(key) {
            Some(slot) if slot.stored_at.elapsed() <= self.ttl => {
                tracing::debug!(
                    scope = key.scope.as_str(),
                    platform = key.platform.as_str(),
                    query = key.query.as_str(),
                    "search cache hit"
                );
                Some(slot.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: CacheKey, value: T) {
        let mut entries = self.entries.lock().expect("search cache lock");
        entries.insert(
            key,
            CacheSlot {
                stored_at: Instant::now(),
                value,
            },
        );
    }

    /// Drops every cached entry for one platform within a scope. Called after
    /// a write invalidates whatever searches previously returned.
    pub fn invalidate_platform(&self, scope: &ScopeId, platform: &PlatformId) {
        let mut entries = self.entries.lock().expect("search cache lock");
        entries.retain(|key, _| !(&key.scope == scope && &key.platform == platform));
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("search cache lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
