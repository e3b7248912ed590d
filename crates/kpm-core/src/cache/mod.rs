//! Single-flight memoization with dependency-driven invalidation.
//!
//! A [`Cache`] computes each key at most once per generation. Concurrent
//! callers for the same key wait on the first caller's computation; callers
//! for different keys never contend beyond a short map lookup.
//!
//! Factories receive an explicit [`CacheContext`] and register the
//! [`CacheDependency`]s their result was derived from. When any of those
//! changes, the entry is evicted on its next access and recomputed, with the
//! stale value offered to [`Cache::get_with_previous`] factories.

mod dependency;

pub use dependency::{CacheDependency, DirectoryDependency, FileDependency, NamedTriggers};

use std::collections::HashMap;
use std::convert::Infallible;
use std::hash::Hash;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tracing::debug;

/// The usual key for per-library results.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LibraryCacheKey {
    pub name: String,
    pub version: String,
    pub framework: String,
    pub aspect: String,
}

impl LibraryCacheKey {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        framework: impl Into<String>,
        aspect: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            framework: framework.into(),
            aspect: aspect.into(),
        }
    }
}

/// Collects the dependencies of a value while it is being computed.
#[derive(Debug, Default)]
pub struct CacheContext {
    dependencies: Vec<Arc<dyn CacheDependency>>,
}

impl CacheContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the value being computed depends on `dependency`.
    pub fn monitor(&mut self, dependency: Arc<dyn CacheDependency>) {
        self.dependencies.push(dependency);
    }

    #[must_use]
    pub fn dependencies(&self) -> &[Arc<dyn CacheDependency>] {
        &self.dependencies
    }

    fn into_dependencies(self) -> Vec<Arc<dyn CacheDependency>> {
        self.dependencies
    }
}

#[derive(Debug)]
struct Entry<V> {
    value: OnceLock<V>,
    dependencies: Mutex<Vec<Arc<dyn CacheDependency>>>,
    /// Held by the caller computing the value; other callers wait on it.
    init: Mutex<()>,
}

impl<V> Entry<V> {
    fn new() -> Self {
        Self {
            value: OnceLock::new(),
            dependencies: Mutex::new(Vec::new()),
            init: Mutex::new(()),
        }
    }

    fn dependencies(&self) -> Vec<Arc<dyn CacheDependency>> {
        self.dependencies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// In-flight entries are never stale; their dependencies are not known yet.
    fn is_stale(&self) -> bool {
        self.value.get().is_some() && self.dependencies().iter().any(|d| d.has_changed())
    }
}

/// Thread-safe single-flight cache.
#[derive(Debug)]
pub struct Cache<K, V> {
    entries: Mutex<HashMap<K, Arc<Entry<V>>>>,
}

impl<K, V> Default for Cache<K, V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the value for `key`, computing it with `factory` if absent or stale.
    pub fn get(&self, key: K, factory: impl FnOnce(&mut CacheContext) -> V) -> V {
        self.get_with_previous(key, |ctx, _| factory(ctx))
    }

    /// Like [`Cache::get`], but a recomputation receives the stale value.
    pub fn get_with_previous(
        &self,
        key: K,
        factory: impl FnOnce(&mut CacheContext, Option<V>) -> V,
    ) -> V {
        match self.try_get_with_previous(key, |ctx, previous| {
            Ok::<V, Infallible>(factory(ctx, previous))
        }) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// Fallible [`Cache::get`]. A failed computation is not cached; the
    /// next caller for the key runs its own factory.
    pub fn try_get<E>(
        &self,
        key: K,
        factory: impl FnOnce(&mut CacheContext) -> std::result::Result<V, E>,
    ) -> std::result::Result<V, E> {
        self.try_get_with_previous(key, |ctx, _| factory(ctx))
    }

    /// Fallible [`Cache::get_with_previous`].
    pub fn try_get_with_previous<E>(
        &self,
        key: K,
        factory: impl FnOnce(&mut CacheContext, Option<V>) -> std::result::Result<V, E>,
    ) -> std::result::Result<V, E> {
        let (entry, previous) = self.entry(&key);
        if let Some(value) = entry.value.get() {
            return Ok(value.clone());
        }

        let _computing = entry.init.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(value) = entry.value.get() {
            return Ok(value.clone());
        }

        let mut ctx = CacheContext::new();
        let value = factory(&mut ctx, previous)?;
        // dependencies first, so a visible value always has its dependencies
        *entry
            .dependencies
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = ctx.into_dependencies();
        let _ = entry.value.set(value.clone());
        Ok(value)
    }

    /// Nested lookup: the entry's dependencies also become dependencies of
    /// the value `parent` is collecting for.
    pub fn get_in(
        &self,
        parent: &mut CacheContext,
        key: K,
        factory: impl FnOnce(&mut CacheContext) -> V,
    ) -> V {
        let value = self.get(key.clone(), factory);
        if let Some(entry) = self.lock_entries().get(&key).cloned() {
            for dependency in entry.dependencies() {
                parent.monitor(dependency);
            }
        }
        value
    }

    /// Evict `key`. Returns true if an entry was present.
    pub fn invalidate(&self, key: &K) -> bool {
        self.lock_entries().remove(key).is_some()
    }

    /// Evict everything.
    pub fn clear(&self) {
        self.lock_entries().clear();
    }

    /// Number of entries, including in-flight and stale ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<K, Arc<Entry<V>>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Find or create the entry for `key`, replacing it when stale.
    ///
    /// Staleness is checked outside the map lock; the replacement only
    /// happens if no other caller replaced the entry in the meantime.
    fn entry(&self, key: &K) -> (Arc<Entry<V>>, Option<V>) {
        let existing = {
            let mut entries = self.lock_entries();
            Arc::clone(
                entries
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(Entry::new())),
            )
        };

        if !existing.is_stale() {
            return (existing, None);
        }

        debug!(key = ?key, "Cache entry dependency changed, recomputing");
        let previous = existing.value.get().cloned();
        let mut entries = self.lock_entries();
        let current = entries
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Entry::new()));
        if Arc::ptr_eq(current, &existing) {
            *current = Arc::new(Entry::new());
        }
        (Arc::clone(current), previous)
    }
}
