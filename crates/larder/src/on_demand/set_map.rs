// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::{
    fmt::Debug,
    marker::PhantomData,
    sync::Arc,
    time::{Duration, SystemTime},
};

use futures::{FutureExt, future::BoxFuture};
use larder_store::{Error, ExpirableKeyStore, KeyValueStore, KeysEnumerable, Result, SetHandle, SetStore};
use tick::Clock;

use super::{
    sets::{AddTrigger, CachedSetLookup, EmptySet, LazySet, OnDemandCacheSet, TriggeredSet},
    validate_expiration,
};
use crate::{
    CacheOptions, CacheTelemetry,
    expiration::ExpirablePair,
    policy::CachePolicy,
    telemetry::{CacheActivity, CacheOperation},
};

const DEFAULT_NAME: &str = "larder.on_demand_set";

/// A set-valued map that caches a source set store in a cache set store on demand.
///
/// Sets are live collections, so [`get`](KeyValueStore::get) does not hand out a
/// copy. It returns an [`OnDemandCacheSet`] whose element operations keep going
/// through the cache: reads try the cached set first, and additions and removals
/// reach the source set before they are mirrored into the cached one. When the
/// value came from the cache, the source set is only fetched once an element
/// operation needs it.
///
/// A source set that is absent or empty is reported as absent. It is remembered
/// in the cache as an empty set only when the cache store
/// [supports empty sets](SetStore::supports_empty_sets).
///
/// # Examples
///
/// ```
/// use larder::OnDemandCacheSetMap;
/// use larder_store::{KeyValueStore, MemorySet, MemorySetStore, SetStore, StoreSet};
/// use tick::Clock;
/// # futures::executor::block_on(async {
///
/// let clock = Clock::new_frozen();
/// let source = MemorySetStore::<&str, i32>::new(clock.clone());
/// let cache = MemorySetStore::<&str, i32>::new(clock.clone());
/// source.try_add(&"primes", MemorySet::from_iter([2, 3, 5]).into_handle(), false).await?;
///
/// let map = OnDemandCacheSetMap::builder(clock, source, cache.clone()).build()?;
///
/// let primes = map.get(&"primes").await?.expect("the source has the set");
/// primes.add(7).await?;
///
/// let cached = cache.get(&"primes").await?.expect("the set was cached");
/// assert_eq!(cached.len().await?, 4);
/// # Ok::<(), larder_store::Error>(())
/// # });
/// ```
pub struct OnDemandCacheSetMap<K, T, S, C> {
    source: Arc<S>,
    cache: Arc<C>,
    policy: Arc<CachePolicy>,
    clock: Clock,
    _item: PhantomData<fn(K, T)>,
}

impl<K, T, S, C> Debug for OnDemandCacheSetMap<K, T, S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnDemandCacheSetMap")
            .field("name", &self.policy.name)
            .field("options", &self.policy.options)
            .finish_non_exhaustive()
    }
}

impl<K, T, S, C> OnDemandCacheSetMap<K, T, S, C> {
    /// Starts building a set map over `source`, cached in `cache`.
    pub fn builder(clock: Clock, source: S, cache: C) -> OnDemandCacheSetMapBuilder<K, T, S, C> {
        OnDemandCacheSetMapBuilder {
            clock,
            source,
            cache,
            options: CacheOptions::default(),
            telemetry: CacheTelemetry::default(),
            name: DEFAULT_NAME,
            _item: PhantomData,
        }
    }

    /// Returns the source store.
    #[must_use]
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Returns the cache store.
    #[must_use]
    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Returns the options this set map was built with.
    #[must_use]
    pub fn options(&self) -> &CacheOptions {
        &self.policy.options
    }

    pub(crate) fn cache_handle(&self) -> Arc<C> {
        Arc::clone(&self.cache)
    }

    pub(crate) fn policy(&self) -> &CachePolicy {
        &self.policy
    }
}

impl<K, T, S, C> OnDemandCacheSetMap<K, T, S, C>
where
    K: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    S: SetStore<K, T> + 'static,
    C: SetStore<K, T> + 'static,
{
    fn expirable(&self) -> ExpirablePair<'_, K> {
        ExpirablePair {
            source: self.source.as_expirable(),
            cache: self.cache.as_expirable(),
        }
    }

    /// A source set that is only fetched when an element operation needs it.
    fn lazy_source(&self, key: &K) -> LazySet<T> {
        let source = Arc::clone(&self.source);
        let key = key.clone();
        LazySet::new(move || {
            let source = Arc::clone(&source);
            let key = key.clone();
            async move { source.get_or_empty(&key).await }.boxed()
        })
    }

    /// Re-arms the cache lifetime of `key`, if one is configured.
    fn rearm_trigger(&self, key: &K) -> Option<AddTrigger> {
        let ttl = self.policy.options.expiration()?;
        self.cache.as_expirable()?;

        let cache = Arc::clone(&self.cache);
        let key = key.clone();
        Some(Arc::new(move || {
            let cache = Arc::clone(&cache);
            let key = key.clone();
            async move {
                match cache.as_expirable() {
                    Some(expirable) => expirable.set_relative_expiration(&key, ttl).await.map(|_| ()),
                    None => Ok(()),
                }
            }
            .boxed()
        }))
    }

    /// Resolves the cached set of `key` on each call, re-arming its lifetime on additions.
    fn cached_lookup(&self, key: &K) -> CachedSetLookup<T> {
        let cache = Arc::clone(&self.cache);
        let key = key.clone();
        let trigger = self.rearm_trigger(&key);
        Arc::new(move || {
            let cache = Arc::clone(&cache);
            let key = key.clone();
            let trigger = trigger.clone();
            async move {
                let set = cache.get(&key).await?;
                Ok(set.map(|set| match trigger {
                    Some(trigger) => Arc::new(TriggeredSet::new(set, trigger)) as SetHandle<T>,
                    None => set,
                }))
            }
            .boxed()
        })
    }

    fn compose(&self, key: &K, source: LazySet<T>) -> SetHandle<T> {
        Arc::new(OnDemandCacheSet::new(
            source,
            self.cached_lookup(key),
            Arc::clone(&self.policy),
            self.cache.supports_empty_sets(),
        ))
    }

    /// Copies `set` into the cache and applies the cache lifetime.
    async fn write_set(&self, key: &K, set: SetHandle<T>, operation: CacheOperation, activity: CacheActivity) -> Result<()> {
        let cache = &*self.cache;
        let write = async {
            cache.try_add(key, set, true).await?;
            self.policy.arm_expiration(cache.as_expirable(), key).await
        };

        if self.policy.write_cache(operation, write).await?.written().is_some() {
            self.policy.record(operation, activity);
        }
        Ok(())
    }

    /// Reads the source set, treating an empty set as absent.
    async fn source_set(&self, key: &K) -> Result<Option<SetHandle<T>>> {
        match self.source.get(key).await? {
            Some(set) if set.len().await? > 0 => Ok(Some(set)),
            _ => Ok(None),
        }
    }

    /// Expires `key` after `ttl` in the source, mirroring shorter lifetimes into the cache.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::Unsupported`](larder_store::ErrorKind::Unsupported) unless both stores
    /// support key expiration, and with [`ErrorKind::SourceWrite`](larder_store::ErrorKind::SourceWrite)
    /// if the source rejects the change.
    pub async fn set_relative_expiration(&self, key: &K, ttl: Duration) -> Result<bool> {
        self.expirable().set_relative(&self.policy, key, ttl).await
    }

    /// Expires `key` at `at` in the source, mirroring shorter lifetimes into the cache.
    ///
    /// # Errors
    ///
    /// See [`set_relative_expiration`](Self::set_relative_expiration).
    pub async fn set_absolute_expiration(&self, key: &K, at: SystemTime) -> Result<bool> {
        self.expirable().set_absolute(&self.policy, &self.clock, key, at).await
    }

    /// Makes `key` persistent in the source; the cached set returns to its baseline lifetime.
    ///
    /// # Errors
    ///
    /// See [`set_relative_expiration`](Self::set_relative_expiration).
    pub async fn remove_expiration(&self, key: &K) -> Result<bool> {
        self.expirable().remove(&self.policy, key).await
    }
}

impl<K, T, S, C> KeyValueStore<K, SetHandle<T>> for OnDemandCacheSetMap<K, T, S, C>
where
    K: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    S: SetStore<K, T> + 'static,
    C: SetStore<K, T> + 'static,
{
    async fn try_add(&self, key: &K, value: SetHandle<T>, overwrite: bool) -> Result<bool> {
        let added = self
            .source
            .try_add(key, Arc::clone(&value), overwrite)
            .await
            .map_err(Error::source_write)?;
        if !added {
            return Ok(false);
        }

        self.write_set(key, value, CacheOperation::TryAdd, CacheActivity::Written).await?;
        Ok(true)
    }

    async fn get(&self, key: &K) -> Result<Option<SetHandle<T>>> {
        let empty_sets = self.cache.supports_empty_sets();

        if let Some(cached) = self.policy.read_cache(CacheOperation::Get, self.cache.get(key)).await {
            let len = self
                .policy
                .read_cache(CacheOperation::Get, async { cached.len().await.map(Some) })
                .await;
            match len {
                Some(0) if empty_sets => {
                    self.policy.record(CacheOperation::Get, CacheActivity::Hit);
                    return Ok(None);
                }
                Some(len) if len > 0 => {
                    self.policy.record(CacheOperation::Get, CacheActivity::Hit);
                    return Ok(Some(self.compose(key, self.lazy_source(key))));
                }
                _ => {}
            }
        }

        self.policy.record(CacheOperation::Get, CacheActivity::Miss);
        let Some(source_set) = self.source_set(key).await? else {
            if empty_sets {
                self.write_set(key, Arc::new(EmptySet), CacheOperation::Get, CacheActivity::Populated)
                    .await?;
            }
            return Ok(None);
        };

        self.write_set(key, Arc::clone(&source_set), CacheOperation::Get, CacheActivity::Populated)
            .await?;
        Ok(Some(self.compose(key, LazySet::ready(source_set))))
    }

    async fn try_remove(&self, key: &K) -> Result<bool> {
        let removed = self.source.try_remove(key).await.map_err(Error::source_write)?;

        if self.policy.options.invalidate_cache_on_remove
            && self
                .policy
                .write_cache(CacheOperation::TryRemove, self.cache.try_remove(key))
                .await?
                .written()
                == Some(true)
        {
            self.policy.record(CacheOperation::TryRemove, CacheActivity::Invalidated);
        }
        Ok(removed)
    }

    /// Reports whether [`get`](KeyValueStore::get) would find a non-empty set.
    async fn contains_key(&self, key: &K) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    fn as_expirable(&self) -> Option<&dyn ExpirableKeyStore<K>> {
        self.expirable().both().map(|_| self as &dyn ExpirableKeyStore<K>)
    }

    fn as_keys_enumerable(&self) -> Option<&dyn KeysEnumerable<K>> {
        self.source.as_keys_enumerable()
    }
}

impl<K, T, S, C> SetStore<K, T> for OnDemandCacheSetMap<K, T, S, C>
where
    K: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    S: SetStore<K, T> + 'static,
    C: SetStore<K, T> + 'static,
{
    /// Returns the set stored under `key`, or a new empty one attached to it.
    ///
    /// The source set is not created until the first element is added.
    async fn get_or_empty(&self, key: &K) -> Result<SetHandle<T>> {
        if let Some(set) = self.get(key).await? {
            return Ok(set);
        }

        Ok(self.compose(key, self.lazy_source(key)))
    }

    fn supports_empty_sets(&self) -> bool {
        self.source.supports_empty_sets()
    }
}

impl<K, T, S, C> ExpirableKeyStore<K> for OnDemandCacheSetMap<K, T, S, C>
where
    K: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    S: SetStore<K, T> + 'static,
    C: SetStore<K, T> + 'static,
{
    fn set_relative_expiration<'a>(&'a self, key: &'a K, ttl: Duration) -> BoxFuture<'a, Result<bool>> {
        Box::pin(Self::set_relative_expiration(self, key, ttl))
    }

    fn set_absolute_expiration<'a>(&'a self, key: &'a K, expires_at: SystemTime) -> BoxFuture<'a, Result<bool>> {
        Box::pin(Self::set_absolute_expiration(self, key, expires_at))
    }

    fn remove_expiration<'a>(&'a self, key: &'a K) -> BoxFuture<'a, Result<bool>> {
        Box::pin(Self::remove_expiration(self, key))
    }
}

/// Builder for [`OnDemandCacheSetMap`].
pub struct OnDemandCacheSetMapBuilder<K, T, S, C> {
    clock: Clock,
    source: S,
    cache: C,
    options: CacheOptions,
    telemetry: CacheTelemetry,
    name: &'static str,
    _item: PhantomData<fn(K, T)>,
}

impl<K, T, S, C> Debug for OnDemandCacheSetMapBuilder<K, T, S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnDemandCacheSetMapBuilder")
            .field("name", &self.name)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<K, T, S, C> OnDemandCacheSetMapBuilder<K, T, S, C> {
    /// Sets the cache options.
    ///
    /// [`cache_missing_values`](CacheOptions::cache_missing_values) has no effect here;
    /// negative results are cached whenever the cache store supports empty sets.
    #[must_use]
    pub fn options(mut self, options: CacheOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the telemetry sink.
    #[must_use]
    pub fn telemetry(mut self, telemetry: CacheTelemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Sets the name reported in logs and metrics.
    #[must_use]
    pub fn name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Validates the configuration and creates the set map.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::Configuration`](larder_store::ErrorKind::Configuration) when a cache
    /// expiration is configured but the cache store cannot expire keys.
    pub fn build(self) -> Result<OnDemandCacheSetMap<K, T, S, C>>
    where
        C: SetStore<K, T>,
    {
        validate_expiration(&self.options, self.cache.as_expirable().is_some())?;

        Ok(OnDemandCacheSetMap {
            source: Arc::new(self.source),
            cache: Arc::new(self.cache),
            policy: Arc::new(CachePolicy::new(self.options, self.telemetry, self.name)),
            clock: self.clock,
            _item: PhantomData,
        })
    }
}
