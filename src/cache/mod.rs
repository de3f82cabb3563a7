//! TTL-bounded key/value store with an optional LRU size bound.
//!
//! Expiry is enforced lazily on every read; [`CacheManager::clean_expired`]
//! and the optional background sweep only reclaim memory early.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use indexmap::IndexMap;
use log::{debug, info};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::{CacheConfig, CacheMode};
use crate::core::{RouterError, RouterResult};

/// Kinds of artifacts built per route; each owns a key namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Component,
    Script,
    Template,
    Style,
    Layout,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 5] = [
        ArtifactKind::Component,
        ArtifactKind::Script,
        ArtifactKind::Template,
        ArtifactKind::Style,
        ArtifactKind::Layout,
    ];

    pub fn prefix(&self) -> &'static str {
        match self {
            ArtifactKind::Component => "component_",
            ArtifactKind::Script => "script_",
            ArtifactKind::Template => "template_",
            ArtifactKind::Style => "style_",
            ArtifactKind::Layout => "layout_",
        }
    }

    pub fn key(&self, name: &str) -> String {
        format!("{}{name}", self.prefix())
    }
}

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

struct CacheInner<V> {
    /// Least recently touched first
    entries: IndexMap<String, Entry<V>>,
    hits: u64,
    misses: u64,
}

impl<V> CacheInner<V> {
    fn touch(&mut self, key: &str) {
        if let Some(index) = self.entries.get_index_of(key) {
            let last = self.entries.len() - 1;
            self.entries.move_index(index, last);
        }
    }

    fn remove(&mut self, key: &str) -> bool {
        self.entries.shift_remove(key).is_some()
    }

    fn remove_where<F: Fn(&str) -> bool>(&mut self, predicate: F) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !predicate(key));
        before - self.entries.len()
    }
}

/// Per-kind entry counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheCategories {
    pub components: usize,
    pub scripts: usize,
    pub templates: usize,
    pub styles: usize,
    pub layouts: usize,
    pub others: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub mode: CacheMode,
    pub ttl_ms: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
    pub categories: CacheCategories,
}

pub struct CacheManager<V> {
    config: CacheConfig,
    ttl: Duration,
    inner: Mutex<CacheInner<V>>,
    cleanup: Mutex<Option<JoinHandle<()>>>,
}

impl<V: Clone> CacheManager<V> {
    pub fn new(config: CacheConfig) -> Self {
        info!(
            "Cache manager initialized: mode={:?}, ttl={}ms, max_size={}",
            config.mode, config.ttl_ms, config.max_size
        );
        Self {
            ttl: Duration::from_millis(config.ttl_ms),
            config,
            inner: Mutex::new(CacheInner {
                entries: IndexMap::new(),
                hits: 0,
                misses: 0,
            }),
            cleanup: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner<V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_expired(&self, entry: &Entry<V>, now: Instant) -> bool {
        now.duration_since(entry.inserted_at) > self.ttl
    }

    pub fn set(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        let mut inner = self.lock();

        if self.config.mode == CacheMode::Lru
            && !inner.entries.contains_key(&key)
            && inner.entries.len() >= self.config.max_size
        {
            if let Some((oldest, _)) = inner.entries.shift_remove_index(0) {
                debug!("LRU evicted cache key: {oldest}");
            }
        }

        inner.entries.shift_remove(&key);
        inner.entries.insert(
            key.clone(),
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
        debug!("Cache set: {key}");
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut inner = self.lock();

        match inner.entries.get(key).map(|entry| self.is_expired(entry, now)) {
            None => {
                inner.misses += 1;
                return None;
            }
            Some(true) => {
                inner.remove(key);
                inner.misses += 1;
                debug!("Cache expired: {key}");
                return None;
            }
            Some(false) => {}
        }

        if self.config.mode == CacheMode::Lru {
            inner.touch(key);
        }
        inner.hits += 1;
        inner.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Whether `key` holds a live entry; does not touch recency.
    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        let inner = self.lock();
        inner
            .entries
            .get(key)
            .is_some_and(|entry| !self.is_expired(entry, now))
    }

    /// Drop every key containing `pattern`; returns the number removed.
    pub fn invalidate_by_pattern(&self, pattern: &str) -> usize {
        let removed = self.lock().remove_where(|key| key.contains(pattern));
        debug!("Invalidated {removed} cache entries matching: {pattern}");
        removed
    }

    /// Drop every artifact kind built for `route`.
    pub fn invalidate_component_cache(&self, route: &str) -> usize {
        let mut inner = self.lock();
        let mut removed = 0;
        for kind in ArtifactKind::ALL {
            if inner.remove(&kind.key(route)) {
                removed += 1;
            }
        }
        debug!("Invalidated {removed} cached artifacts for route: {route}");
        removed
    }

    pub fn clear_component_cache(&self) -> usize {
        let prefix = ArtifactKind::Component.prefix();
        let removed = self.lock().remove_where(|key| key.starts_with(prefix));
        debug!("Cleared {removed} component cache entries");
        removed
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        let size = inner.entries.len();
        inner.entries.clear();
        debug!("Cache cleared ({size} entries)");
    }

    /// Evict every expired entry; returns the number evicted.
    pub fn clean_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| !self.is_expired(entry, now));
        let evicted = before - inner.entries.len();
        if evicted > 0 {
            debug!("Cleaned {evicted} expired cache entries");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys from least to most recently touched.
    pub fn keys(&self) -> Vec<String> {
        self.lock().entries.keys().cloned().collect()
    }

    pub fn keys_by_pattern(&self, pattern: &str) -> Vec<String> {
        self.lock()
            .entries
            .keys()
            .filter(|k| k.contains(pattern))
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        let mut categories = CacheCategories::default();
        for key in inner.entries.keys() {
            let slot = match ArtifactKind::ALL.iter().find(|k| key.starts_with(k.prefix())) {
                Some(ArtifactKind::Component) => &mut categories.components,
                Some(ArtifactKind::Script) => &mut categories.scripts,
                Some(ArtifactKind::Template) => &mut categories.templates,
                Some(ArtifactKind::Style) => &mut categories.styles,
                Some(ArtifactKind::Layout) => &mut categories.layouts,
                None => &mut categories.others,
            };
            *slot += 1;
        }
        let lookups = inner.hits + inner.misses;
        CacheStats {
            size: inner.entries.len(),
            max_size: self.config.max_size,
            mode: self.config.mode,
            ttl_ms: self.config.ttl_ms,
            hits: inner.hits,
            misses: inner.misses,
            hit_ratio: if lookups == 0 {
                0.0
            } else {
                inner.hits as f64 / lookups as f64
            },
            categories,
        }
    }

    pub fn stop_auto_cleanup(&self) {
        let handle = self
            .cleanup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            debug!("Cache auto cleanup stopped");
        }
    }
}

impl<V: Clone + Send + 'static> CacheManager<V> {
    /// Sweep expired entries every `cleanup_interval_ms` on the current tokio runtime.
    ///
    /// Restarting replaces the previous sweep. The task holds only a weak
    /// reference and ends once the cache is dropped.
    pub fn start_auto_cleanup(self: &Arc<Self>) -> RouterResult<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| RouterError::Internal(format!("No runtime for cache cleanup: {e}")))?;

        self.stop_auto_cleanup();

        let period = Duration::from_millis(self.config.cleanup_interval_ms);
        let cache: Weak<Self> = Arc::downgrade(self);
        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                match cache.upgrade() {
                    Some(cache) => {
                        cache.clean_expired();
                    }
                    None => break,
                }
            }
        });

        *self.cleanup.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        debug!("Cache auto cleanup started every {}ms", period.as_millis());
        Ok(())
    }
}

impl<V> Drop for CacheManager<V> {
    fn drop(&mut self) {
        if let Some(handle) = self
            .cleanup
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lru(max_size: usize) -> CacheManager<u32> {
        CacheManager::new(CacheConfig {
            mode: CacheMode::Lru,
            ttl_ms: 10_000,
            max_size,
            ..CacheConfig::default()
        })
    }

    fn memory(ttl_ms: u64) -> CacheManager<u32> {
        CacheManager::new(CacheConfig {
            ttl_ms,
            ..CacheConfig::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_boundary() {
        let cache = memory(1000);
        cache.set("component_home", 1);

        tokio::time::advance(Duration::from_millis(1000)).await;
        assert_eq!(cache.get("component_home"), Some(1));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(cache.get("component_home"), None);
        // purged on detection
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_has_respects_ttl() {
        let cache = memory(50);
        cache.set("a", 1);
        assert!(cache.has("a"));
        tokio::time::advance(Duration::from_millis(51)).await;
        assert!(!cache.has("a"));
    }

    #[test]
    fn test_lru_evicts_least_recently_touched() {
        let cache = lru(3);
        cache.set("a", 1);
        cache.set("b", 2);
        cache.set("c", 3);
        cache.set("d", 4);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.keys(), vec!["b", "c", "d"]);
    }

    #[test]
    fn test_lru_get_protects_from_eviction() {
        let cache = lru(3);
        cache.set("a", 1);
        cache.set("b", 2);
        cache.set("c", 3);
        assert_eq!(cache.get("a"), Some(1));
        cache.set("d", 4);
        assert_eq!(cache.get("a"), Some(1));
        assert!(!cache.has("b"));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_recency_order_follows_touches() {
        let cache = lru(4);
        for (key, value) in [("a", 0), ("b", 1), ("c", 2), ("d", 3)] {
            cache.set(key, value);
        }
        cache.get("b");
        cache.set("a", 10);
        assert_eq!(cache.keys(), vec!["c", "d", "b", "a"]);

        cache.invalidate_by_pattern("d");
        assert_eq!(cache.keys(), vec!["c", "b", "a"]);
        cache.set("e", 4);
        cache.set("f", 5);
        assert_eq!(cache.keys(), vec!["b", "a", "e", "f"]);
    }

    #[test]
    fn test_lru_overwrite_does_not_evict() {
        let cache = lru(2);
        cache.set("a", 1);
        cache.set("b", 2);
        cache.set("a", 10);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), Some(10));
        assert_eq!(cache.get("b"), Some(2));
    }

    #[test]
    fn test_memory_mode_is_unbounded() {
        let cache = CacheManager::new(CacheConfig {
            max_size: 2,
            ..CacheConfig::default()
        });
        for i in 0..5u32 {
            cache.set(format!("k{i}"), i);
        }
        assert_eq!(cache.len(), 5);
    }

    #[test]
    fn test_invalidation() {
        let cache = memory(10_000);
        for kind in ArtifactKind::ALL {
            cache.set(kind.key("profile"), 1);
            cache.set(kind.key("home"), 2);
        }
        cache.set("component_profile-edit", 3);

        assert_eq!(cache.invalidate_component_cache("profile"), 5);
        assert!(cache.has("component_profile-edit"));
        assert_eq!(cache.stats().categories.components, 2);

        assert_eq!(cache.invalidate_by_pattern("home"), 5);
        assert_eq!(cache.keys(), vec!["component_profile-edit"]);

        cache.set("style_x", 1);
        assert_eq!(cache.clear_component_cache(), 1);
        assert_eq!(cache.keys_by_pattern("style"), vec!["style_x"]);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_expired() {
        let cache = memory(100);
        cache.set("old", 1);
        tokio::time::advance(Duration::from_millis(60)).await;
        cache.set("new", 2);
        tokio::time::advance(Duration::from_millis(50)).await;
        assert_eq!(cache.clean_expired(), 1);
        assert_eq!(cache.keys(), vec!["new"]);
    }

    #[test]
    fn test_stats() {
        let cache = memory(10_000);
        cache.set("component_a", 1);
        cache.set("layout_default", 1);
        cache.set("misc", 1);
        cache.get("component_a");
        cache.get("missing");
        let stats = cache.stats();
        assert_eq!(stats.size, 3);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_ratio - 0.5).abs() < f64::EPSILON);
        assert_eq!(stats.categories.layouts, 1);
        assert_eq!(stats.categories.others, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_cleanup() {
        let cache = Arc::new(CacheManager::new(CacheConfig {
            ttl_ms: 100,
            cleanup_interval_ms: 500,
            ..CacheConfig::default()
        }));
        cache.set("a", 1);
        cache.start_auto_cleanup().unwrap();

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(cache.is_empty());

        cache.stop_auto_cleanup();
        cache.set("b", 2);
        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(cache.len(), 1);
    }
}
