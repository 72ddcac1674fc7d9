// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The eager strategy: a cache kept fully synchronized with its source.

use std::{
    fmt::Debug,
    marker::PhantomData,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, SystemTime},
};

use futures::future::BoxFuture;
use larder_store::{Error, ExpirableKeyStore, KeyValueStore, KeysEnumerable, PropertyStore, Result};
use tokio::sync::Semaphore;

use crate::{
    CacheTelemetry, Synchronizer,
    telemetry::{CacheActivity, CacheOperation},
};

const DEFAULT_NAME: &str = "larder.synchronized";

/// Called with the cache error whenever a [`SynchronizedCache`] falls out of sync.
pub type CacheFailedListener = Arc<dyn Fn(&Error) + Send + Sync>;

/// Whether the cache of a [`SynchronizedCache`] mirrors its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncState {
    /// The cache must be synchronized before it can answer.
    Unsynchronized,
    /// The cache mirrors the source.
    Synchronized,
}

/// A cache that mirrors its source completely.
///
/// The first operation synchronizes the cache with the source; concurrent first
/// callers wait for that single run instead of starting their own. After that:
///
/// * queries read the cache only and never touch the source,
/// * writes go to the source first and are then repeated on the cache.
///
/// When a repeated write fails on the cache, or the cache disagrees with the
/// source about its outcome, the source write stands. The cache is marked
/// [`Unsynchronized`](SyncState::Unsynchronized), the failure listener is
/// notified, and the next operation synchronizes again.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use larder::{OverwriteSynchronizer, SyncState, SynchronizedCache};
/// use larder_store::{KeyValueStore, MemoryStore};
/// use tick::Clock;
/// # futures::executor::block_on(async {
///
/// let clock = Clock::new_frozen();
/// let source = MemoryStore::<&str, i32>::new(clock.clone());
/// source.try_add(&"a", 1, false).await?;
///
/// let cache = SynchronizedCache::builder(
///     source,
///     MemoryStore::new(clock.clone()),
///     OverwriteSynchronizer::new(clock, Duration::from_secs(30)),
/// )
/// .build()?;
///
/// assert_eq!(cache.state(), SyncState::Unsynchronized);
/// assert_eq!(cache.get(&"a").await?, Some(1));
/// assert_eq!(cache.state(), SyncState::Synchronized);
/// # Ok::<(), larder_store::Error>(())
/// # });
/// ```
pub struct SynchronizedCache<K, V, S, C, Y> {
    source: S,
    cache: C,
    synchronizer: Y,
    synchronized: AtomicBool,
    gate: Semaphore,
    on_cache_failed: Option<CacheFailedListener>,
    telemetry: CacheTelemetry,
    name: &'static str,
    _entry: PhantomData<fn(K, V)>,
}

impl<K, V, S, C, Y: Debug> Debug for SynchronizedCache<K, V, S, C, Y> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynchronizedCache")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("synchronizer", &self.synchronizer)
            .finish_non_exhaustive()
    }
}

impl<K, V, S, C, Y> SynchronizedCache<K, V, S, C, Y> {
    /// Starts building a cache of `source` held in `cache`, filled by `synchronizer`.
    pub fn builder(source: S, cache: C, synchronizer: Y) -> SynchronizedCacheBuilder<K, V, S, C, Y> {
        SynchronizedCacheBuilder {
            source,
            cache,
            synchronizer,
            on_cache_failed: None,
            telemetry: CacheTelemetry::default(),
            name: DEFAULT_NAME,
            _entry: PhantomData,
        }
    }

    /// Returns the current synchronization state.
    #[must_use]
    pub fn state(&self) -> SyncState {
        if self.synchronized.load(Ordering::Acquire) {
            SyncState::Synchronized
        } else {
            SyncState::Unsynchronized
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

    fn desynchronize(&self, operation: CacheOperation, error: &Error) {
        self.synchronized.store(false, Ordering::Release);
        self.telemetry
            .record_failure(self.name, operation, CacheActivity::Desynchronized, error);
        if let Some(listener) = &self.on_cache_failed {
            listener(error);
        }
    }
}

impl<K, V, S, C, Y> SynchronizedCache<K, V, S, C, Y>
where
    K: Send + Sync,
    V: Clone + Send + Sync,
    S: KeyValueStore<K, V>,
    C: KeyValueStore<K, V>,
    Y: Synchronizer<K, V>,
{
    /// Synchronizes the cache unless it already mirrors the source.
    ///
    /// Every operation does this implicitly; calling it up front moves the cost
    /// of the first run out of the first request.
    ///
    /// # Errors
    ///
    /// Returns the synchronizer error; the cache stays unsynchronized.
    pub async fn synchronize(&self) -> Result<()> {
        if self.synchronized.load(Ordering::Acquire) {
            return Ok(());
        }

        let _permit = self.gate.acquire().await.map_err(Error::store)?;
        if self.synchronized.load(Ordering::Acquire) {
            return Ok(());
        }

        if let Err(error) = self.synchronizer.synchronize(&self.source, &self.cache).await {
            self.telemetry
                .record_failure(self.name, CacheOperation::Synchronize, CacheActivity::Desynchronized, &error);
            return Err(error);
        }

        self.synchronized.store(true, Ordering::Release);
        self.telemetry
            .record(self.name, CacheOperation::Synchronize, CacheActivity::Synchronized);
        Ok(())
    }

    /// Runs a conditional write on the source, then on the cache if the source accepted it.
    async fn write_if<F>(
        &self,
        operation: CacheOperation,
        source: impl Future<Output = Result<bool>>,
        cache: impl FnOnce() -> F,
    ) -> Result<bool>
    where
        F: Future<Output = Result<bool>>,
    {
        self.synchronize().await?;
        if !source.await.map_err(Error::source_write)? {
            return Ok(false);
        }

        match cache().await {
            Ok(true) => self.telemetry.record(self.name, operation, CacheActivity::Written),
            Ok(false) => self.desynchronize(
                operation,
                &Error::cache_write(Error::store("the cache rejected a write the source accepted")),
            ),
            Err(error) => self.desynchronize(operation, &Error::cache_write(error)),
        }
        Ok(true)
    }

    /// Runs a write on the source, then on the cache.
    async fn write_all<F>(
        &self,
        operation: CacheOperation,
        source: impl Future<Output = Result<()>>,
        cache: impl FnOnce() -> F,
    ) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        self.synchronize().await?;
        source.await.map_err(Error::source_write)?;

        match cache().await {
            Ok(()) => self.telemetry.record(self.name, operation, CacheActivity::Written),
            Err(error) => self.desynchronize(operation, &Error::cache_write(error)),
        }
        Ok(())
    }

    fn expirable_pair(&self) -> Result<(&dyn ExpirableKeyStore<K>, &dyn ExpirableKeyStore<K>)> {
        self.source
            .as_expirable()
            .zip(self.cache.as_expirable())
            .ok_or_else(|| Error::unsupported("key expiration requires both the source and the cache to support it"))
    }
}

impl<K, V, S, C, Y> KeyValueStore<K, V> for SynchronizedCache<K, V, S, C, Y>
where
    K: Send + Sync,
    V: Clone + Send + Sync,
    S: KeyValueStore<K, V>,
    C: KeyValueStore<K, V>,
    Y: Synchronizer<K, V>,
{
    async fn try_add(&self, key: &K, value: V, overwrite: bool) -> Result<bool> {
        self.write_if(
            CacheOperation::TryAdd,
            self.source.try_add(key, value.clone(), overwrite),
            || self.cache.try_add(key, value, overwrite),
        )
        .await
    }

    async fn get(&self, key: &K) -> Result<Option<V>> {
        self.synchronize().await?;
        self.cache.get(key).await
    }

    async fn try_remove(&self, key: &K) -> Result<bool> {
        self.write_if(CacheOperation::TryRemove, self.source.try_remove(key), || {
            self.cache.try_remove(key)
        })
        .await
    }

    async fn contains_key(&self, key: &K) -> Result<bool> {
        self.synchronize().await?;
        self.cache.contains_key(key).await
    }

    fn as_expirable(&self) -> Option<&dyn ExpirableKeyStore<K>> {
        self.expirable_pair().ok().map(|_| self as &dyn ExpirableKeyStore<K>)
    }

    fn as_keys_enumerable(&self) -> Option<&dyn KeysEnumerable<K>> {
        self.source.as_keys_enumerable()
    }
}

impl<K, V, S, C, Y> ExpirableKeyStore<K> for SynchronizedCache<K, V, S, C, Y>
where
    K: Send + Sync,
    V: Clone + Send + Sync,
    S: KeyValueStore<K, V>,
    C: KeyValueStore<K, V>,
    Y: Synchronizer<K, V>,
{
    fn set_relative_expiration<'a>(&'a self, key: &'a K, ttl: Duration) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let (source, cache) = self.expirable_pair()?;
            self.write_if(
                CacheOperation::SetExpiration,
                source.set_relative_expiration(key, ttl),
                || cache.set_relative_expiration(key, ttl),
            )
            .await
        })
    }

    fn set_absolute_expiration<'a>(&'a self, key: &'a K, expires_at: SystemTime) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let (source, cache) = self.expirable_pair()?;
            self.write_if(
                CacheOperation::SetExpiration,
                source.set_absolute_expiration(key, expires_at),
                || cache.set_absolute_expiration(key, expires_at),
            )
            .await
        })
    }

    fn remove_expiration<'a>(&'a self, key: &'a K) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let (source, cache) = self.expirable_pair()?;
            self.write_if(CacheOperation::RemoveExpiration, source.remove_expiration(key), || {
                cache.remove_expiration(key)
            })
            .await
        })
    }
}

impl<K, V, P, S, C, Y> PropertyStore<K, V> for SynchronizedCache<K, V, S, C, Y>
where
    K: Send + Sync,
    V: Clone + Send + Sync,
    P: Clone + Send + Sync,
    S: KeyValueStore<K, V> + PropertyStore<K, V, Property = P>,
    C: KeyValueStore<K, V> + PropertyStore<K, V, Property = P>,
    Y: Synchronizer<K, V>,
{
    type Property = P;

    async fn set_property(&self, key: &K, name: &str, value: P) -> Result<()> {
        self.write_all(
            CacheOperation::SetProperty,
            self.source.set_property(key, name, value.clone()),
            || self.cache.set_property(key, name, value),
        )
        .await
    }

    async fn get_property(&self, key: &K, name: &str) -> Result<Option<P>> {
        self.synchronize().await?;
        self.cache.get_property(key, name).await
    }

    async fn merge(&self, key: &K, value: V) -> Result<()> {
        self.write_all(CacheOperation::Merge, self.source.merge(key, value.clone()), || {
            self.cache.merge(key, value)
        })
        .await
    }
}

/// Builder for [`SynchronizedCache`].
pub struct SynchronizedCacheBuilder<K, V, S, C, Y> {
    source: S,
    cache: C,
    synchronizer: Y,
    on_cache_failed: Option<CacheFailedListener>,
    telemetry: CacheTelemetry,
    name: &'static str,
    _entry: PhantomData<fn(K, V)>,
}

impl<K, V, S, C, Y> Debug for SynchronizedCacheBuilder<K, V, S, C, Y> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynchronizedCacheBuilder")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<K, V, S, C, Y> SynchronizedCacheBuilder<K, V, S, C, Y> {
    /// Registers a listener notified whenever the cache falls out of sync.
    #[must_use]
    pub fn on_cache_failed(mut self, listener: impl Fn(&Error) + Send + Sync + 'static) -> Self {
        self.on_cache_failed = Some(Arc::new(listener));
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

    /// Checks the stores against the synchronizer and creates the cache.
    ///
    /// # Errors
    ///
    /// Returns the [`Configuration`](larder_store::ErrorKind::Configuration) error
    /// reported by [`Synchronizer::check`].
    pub fn build(self) -> Result<SynchronizedCache<K, V, S, C, Y>>
    where
        S: KeyValueStore<K, V>,
        C: KeyValueStore<K, V>,
        Y: Synchronizer<K, V>,
    {
        self.synchronizer.check(&self.source, &self.cache)?;

        Ok(SynchronizedCache {
            source: self.source,
            cache: self.cache,
            synchronizer: self.synchronizer,
            synchronized: AtomicBool::new(false),
            gate: Semaphore::new(1),
            on_cache_failed: self.on_cache_failed,
            telemetry: self.telemetry,
            name: self.name,
            _entry: PhantomData,
        })
    }
}
