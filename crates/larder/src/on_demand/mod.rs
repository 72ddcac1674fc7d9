// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Lazily populated caches.
//!
//! Reads check the cache first and fall back to the source, populating the cache
//! with what they find. Writes go to the source first and are then mirrored into
//! the cache; a failed cache write never undoes a source write.

mod set_map;
mod sets;

use std::{
    fmt::Debug,
    marker::PhantomData,
    sync::Arc,
    time::{Duration, SystemTime},
};

use futures::future::BoxFuture;
use larder_store::{Error, ExpirableKeyStore, KeyValueStore, KeysEnumerable, PropertyStore, Result};
use tick::Clock;

pub use set_map::{OnDemandCacheSetMap, OnDemandCacheSetMapBuilder};
pub use sets::{AddTrigger, LazySet, OnDemandCacheSet, TriggeredSet};

use crate::{
    CacheOptions, CacheTelemetry,
    expiration::ExpirablePair,
    policy::CachePolicy,
    telemetry::{CacheActivity, CacheOperation},
};

const DEFAULT_NAME: &str = "larder.on_demand";

/// The value that stands for "confirmed absent in the source" inside the cache.
struct MissingValue<V> {
    value: V,
    eq: fn(&V, &V) -> bool,
}

impl<V> MissingValue<V> {
    fn matches(&self, value: &V) -> bool {
        (self.eq)(&self.value, value)
    }
}

/// A key/value map that caches a source store in a cache store on demand.
///
/// * [`get`](KeyValueStore::get) returns cached values without touching the source,
///   and populates the cache from the source on a miss.
/// * [`try_add`](KeyValueStore::try_add) writes the source first, then the cache.
/// * [`try_remove`](KeyValueStore::try_remove) removes from the source; the cached
///   copy expires on its own unless
///   [`invalidate_cache_on_remove`](CacheOptions::invalidate_cache_on_remove) is set.
///
/// Cache entries receive the configured [`cache_expiration`](CacheOptions::cache_expiration).
/// Cache read failures count as misses; cache write failures follow
/// [`throw_on_cache_write_errors`](CacheOptions::throw_on_cache_write_errors).
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use larder::{CacheOptions, OnDemandCacheMap};
/// use larder_store::{KeyValueStore, MemoryStore};
/// use tick::Clock;
/// # futures::executor::block_on(async {
///
/// let clock = Clock::new_frozen();
/// let source = MemoryStore::<String, i32>::new(clock.clone());
/// let cache = MemoryStore::<String, i32>::new(clock.clone());
///
/// let map = OnDemandCacheMap::builder(clock, source.clone(), cache.clone())
///     .options(CacheOptions::new().with_cache_expiration(Duration::from_secs(60)))
///     .build()?;
///
/// source.try_add(&"a".to_string(), 1, false).await?;
/// assert_eq!(map.get(&"a".to_string()).await?, Some(1));
/// assert_eq!(cache.get(&"a".to_string()).await?, Some(1));
/// # Ok::<(), larder_store::Error>(())
/// # });
/// ```
pub struct OnDemandCacheMap<K, V, S, C> {
    source: Arc<S>,
    cache: Arc<C>,
    policy: CachePolicy,
    clock: Clock,
    missing: Option<MissingValue<V>>,
    _key: PhantomData<fn(K)>,
}

impl<K, V, S, C> Debug for OnDemandCacheMap<K, V, S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnDemandCacheMap")
            .field("name", &self.policy.name)
            .field("options", &self.policy.options)
            .field("negative_caching", &self.missing.is_some())
            .finish_non_exhaustive()
    }
}

impl<K, V, S, C> OnDemandCacheMap<K, V, S, C> {
    /// Starts building a map over `source`, cached in `cache`.
    pub fn builder(clock: Clock, source: S, cache: C) -> OnDemandCacheBuilder<K, V, S, C> {
        OnDemandCacheBuilder {
            clock,
            source,
            cache,
            options: CacheOptions::default(),
            telemetry: CacheTelemetry::default(),
            name: DEFAULT_NAME,
            missing: None,
            _key: PhantomData,
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

    /// Returns the options this map was built with.
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

    fn is_missing(&self, value: &V) -> bool {
        self.missing.as_ref().is_some_and(|missing| missing.matches(value))
    }
}

impl<K, V, S, C> OnDemandCacheMap<K, V, S, C>
where
    K: Send + Sync,
    V: Clone + Send + Sync,
    S: KeyValueStore<K, V>,
    C: KeyValueStore<K, V>,
{
    fn expirable(&self) -> ExpirablePair<'_, K> {
        ExpirablePair {
            source: self.source.as_expirable(),
            cache: self.cache.as_expirable(),
        }
    }

    /// Writes `value` into the cache and applies the cache lifetime.
    async fn write_entry(&self, key: &K, value: V, operation: CacheOperation, activity: CacheActivity) -> Result<()> {
        let cache = &*self.cache;
        let write = async {
            cache.try_add(key, value, true).await?;
            self.policy.arm_expiration(cache.as_expirable(), key).await
        };

        if self.policy.write_cache(operation, write).await?.written().is_some() {
            self.policy.record(operation, activity);
        }
        Ok(())
    }

    /// Copies what the source returned into the cache.
    ///
    /// An absent value is cached only when negative caching is enabled.
    async fn populate(&self, key: &K, value: Option<V>, operation: CacheOperation) -> Result<()> {
        let value = match (value, &self.missing) {
            (Some(value), _) => value,
            (None, Some(missing)) if self.policy.options.cache_missing_values => missing.value.clone(),
            (None, _) => return Ok(()),
        };
        self.write_entry(key, value, operation, CacheActivity::Populated).await
    }

    /// Mirrors a property change into the cache and applies the cache lifetime.
    async fn write_property(
        &self,
        key: &K,
        change: impl Future<Output = Result<()>>,
        operation: CacheOperation,
        activity: CacheActivity,
    ) -> Result<()> {
        let cache = &*self.cache;
        let write = async {
            change.await?;
            self.policy.arm_expiration(cache.as_expirable(), key).await
        };

        if self.policy.write_cache(operation, write).await?.written().is_some() {
            self.policy.record(operation, activity);
        }
        Ok(())
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

    /// Makes `key` persistent in the source; the cache entry returns to its baseline lifetime.
    ///
    /// # Errors
    ///
    /// See [`set_relative_expiration`](Self::set_relative_expiration).
    pub async fn remove_expiration(&self, key: &K) -> Result<bool> {
        self.expirable().remove(&self.policy, key).await
    }
}

impl<K, V, S, C> KeyValueStore<K, V> for OnDemandCacheMap<K, V, S, C>
where
    K: Send + Sync,
    V: Clone + Send + Sync,
    S: KeyValueStore<K, V>,
    C: KeyValueStore<K, V>,
{
    async fn try_add(&self, key: &K, value: V, overwrite: bool) -> Result<bool> {
        let added = self
            .source
            .try_add(key, value.clone(), overwrite)
            .await
            .map_err(Error::source_write)?;
        if !added {
            return Ok(false);
        }

        self.write_entry(key, value, CacheOperation::TryAdd, CacheActivity::Written).await?;
        Ok(true)
    }

    async fn get(&self, key: &K) -> Result<Option<V>> {
        let cached = self.policy.read_cache(CacheOperation::Get, self.cache.get(key)).await;
        if let Some(value) = cached {
            self.policy.record(CacheOperation::Get, CacheActivity::Hit);
            return Ok((!self.is_missing(&value)).then_some(value));
        }

        self.policy.record(CacheOperation::Get, CacheActivity::Miss);
        let value = self.source.get(key).await?;
        self.populate(key, value.clone(), CacheOperation::Get).await?;
        Ok(value)
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

    async fn contains_key(&self, key: &K) -> Result<bool> {
        let cached = if self.missing.is_some() {
            self.policy
                .read_cache(CacheOperation::ContainsKey, self.cache.get(key))
                .await
                .map(|value| !self.is_missing(&value))
        } else {
            self.policy
                .read_cache(CacheOperation::ContainsKey, self.cache.contains_key(key))
                .await
                .then_some(true)
        };
        if let Some(found) = cached {
            self.policy.record(CacheOperation::ContainsKey, CacheActivity::Hit);
            return Ok(found);
        }

        self.policy.record(CacheOperation::ContainsKey, CacheActivity::Miss);
        if !self.source.contains_key(key).await? {
            self.populate(key, None, CacheOperation::ContainsKey).await?;
            return Ok(false);
        }

        let value = self.source.get(key).await?;
        let found = value.is_some();
        self.populate(key, value, CacheOperation::ContainsKey).await?;
        Ok(found)
    }

    fn as_expirable(&self) -> Option<&dyn ExpirableKeyStore<K>> {
        self.expirable().both().map(|_| self as &dyn ExpirableKeyStore<K>)
    }

    fn as_keys_enumerable(&self) -> Option<&dyn KeysEnumerable<K>> {
        self.source.as_keys_enumerable()
    }
}

impl<K, V, S, C> ExpirableKeyStore<K> for OnDemandCacheMap<K, V, S, C>
where
    K: Send + Sync,
    V: Clone + Send + Sync,
    S: KeyValueStore<K, V>,
    C: KeyValueStore<K, V>,
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

impl<K, V, P, S, C> PropertyStore<K, V> for OnDemandCacheMap<K, V, S, C>
where
    K: Send + Sync,
    V: Clone + Send + Sync,
    P: Clone + Send + Sync,
    S: KeyValueStore<K, V> + PropertyStore<K, V, Property = P>,
    C: KeyValueStore<K, V> + PropertyStore<K, V, Property = P>,
{
    type Property = P;

    async fn set_property(&self, key: &K, name: &str, value: P) -> Result<()> {
        self.source
            .set_property(key, name, value.clone())
            .await
            .map_err(Error::source_write)?;
        self.write_property(
            key,
            self.cache.set_property(key, name, value),
            CacheOperation::SetProperty,
            CacheActivity::Written,
        )
        .await
    }

    async fn get_property(&self, key: &K, name: &str) -> Result<Option<P>> {
        let cached = self
            .policy
            .read_cache(CacheOperation::GetProperty, self.cache.get_property(key, name))
            .await;
        if cached.is_some() {
            self.policy.record(CacheOperation::GetProperty, CacheActivity::Hit);
            return Ok(cached);
        }

        self.policy.record(CacheOperation::GetProperty, CacheActivity::Miss);
        let value = self.source.get_property(key, name).await?;
        if let Some(value) = &value {
            self.write_property(
                key,
                self.cache.set_property(key, name, value.clone()),
                CacheOperation::GetProperty,
                CacheActivity::Populated,
            )
            .await?;
        }
        Ok(value)
    }

    async fn merge(&self, key: &K, value: V) -> Result<()> {
        self.source.merge(key, value.clone()).await.map_err(Error::source_write)?;
        self.write_property(key, self.cache.merge(key, value), CacheOperation::Merge, CacheActivity::Written)
            .await
    }
}

/// Builder for [`OnDemandCacheMap`].
pub struct OnDemandCacheBuilder<K, V, S, C> {
    clock: Clock,
    source: S,
    cache: C,
    options: CacheOptions,
    telemetry: CacheTelemetry,
    name: &'static str,
    missing: Option<MissingValue<V>>,
    _key: PhantomData<fn(K)>,
}

impl<K, V, S, C> Debug for OnDemandCacheBuilder<K, V, S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnDemandCacheBuilder")
            .field("name", &self.name)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<K, V, S, C> OnDemandCacheBuilder<K, V, S, C> {
    /// Sets the cache options.
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

    /// Sets the value cached in place of a value the source does not have.
    ///
    /// Required when [`cache_missing_values`](CacheOptions::cache_missing_values) is enabled.
    /// Reads that find the sentinel in the cache report the key as absent.
    #[must_use]
    pub fn missing_value(mut self, value: V) -> Self
    where
        V: PartialEq,
    {
        self.missing = Some(MissingValue { value, eq: V::eq });
        self
    }

    /// Validates the configuration and creates the map.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::Configuration`](larder_store::ErrorKind::Configuration) when a cache
    /// expiration is configured but the cache store cannot expire keys, or when missing values
    /// are to be cached without a [`missing_value`](Self::missing_value) sentinel.
    pub fn build(self) -> Result<OnDemandCacheMap<K, V, S, C>>
    where
        C: KeyValueStore<K, V>,
    {
        validate_expiration(&self.options, self.cache.as_expirable().is_some())?;
        if self.options.cache_missing_values && self.missing.is_none() {
            return Err(Error::configuration(
                "caching missing values requires a sentinel value, set one with `missing_value`",
            ));
        }

        Ok(OnDemandCacheMap {
            source: Arc::new(self.source),
            cache: Arc::new(self.cache),
            policy: CachePolicy::new(self.options, self.telemetry, self.name),
            clock: self.clock,
            missing: self.missing,
            _key: PhantomData,
        })
    }
}

pub(crate) fn validate_expiration(options: &CacheOptions, cache_expirable: bool) -> Result<()> {
    if options.expiration().is_some() && !cache_expirable {
        return Err(Error::configuration(
            "a cache expiration is configured but the cache store does not support key expiration",
        ));
    }
    Ok(())
}
