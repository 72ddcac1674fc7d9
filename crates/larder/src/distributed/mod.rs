// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Local on-demand caches kept coherent across instances through a message bus.
//!
//! Every instance wraps its own on-demand map. Successful local writes publish a
//! [`SynchronizationEvent`] on a shared channel, and every instance that receives
//! one evicts the key from its local cache so the next read goes back to the
//! source. Staleness is then bounded by bus latency instead of the cache lifetime.
//!
//! Publishing happens after the source write. A failed publish is logged and never
//! fails the write; remote instances then serve their cached copy until it expires.

mod notify;

use std::{
    fmt::Debug,
    marker::PhantomData,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use futures::FutureExt;
use larder_store::{
    Error, ExpirableKeyStore, KeyValueStore, KeysEnumerable, MessageBus, MessageHandler, PropertyStore, Result,
    SetHandle, SetStore,
};
use uuid::Uuid;

pub use notify::{Notifier, NotifyWriteMap, NotifyWriteSet, NotifyWriteSetMap};

use crate::{
    OnDemandCacheMap, OnDemandCacheSetMap,
    policy::CachePolicy,
    telemetry::{CacheActivity, CacheOperation},
};

/// The message announcing that an instance changed a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SynchronizationEvent<K> {
    /// The key that changed.
    pub key: K,
    /// The instance that made the change.
    pub instance: Uuid,
}

/// A distributed on-demand key/value map.
pub type DistributedCacheMap<K, V, S, C, B> = DistributedCache<K, NotifyWriteMap<K, V, OnDemandCacheMap<K, V, S, C>>, B>;

/// A distributed on-demand set map.
pub type DistributedCacheSetMap<K, T, S, C, B> =
    DistributedCache<K, NotifyWriteSetMap<K, T, OnDemandCacheSetMap<K, T, S, C>>, B>;

/// An on-demand map whose local cache is invalidated by writes on other instances.
///
/// Build one through [`DistributedCacheMap::builder`] or [`DistributedCacheSetMap::builder`].
/// Building subscribes to the channel; [`dispose`](Self::dispose) unsubscribes.
///
/// # Examples
///
/// ```
/// use larder::{DistributedCacheMap, OnDemandCacheMap};
/// use larder_store::{InMemoryBus, KeyValueStore, MemoryStore};
/// use tick::Clock;
/// # futures::executor::block_on(async {
///
/// let clock = Clock::new_frozen();
/// let source = MemoryStore::<String, i32>::new(clock.clone());
/// let bus = InMemoryBus::new();
///
/// let instance = |bus: InMemoryBus<_>| {
///     let cache = MemoryStore::<String, i32>::new(clock.clone());
///     let local = OnDemandCacheMap::builder(clock.clone(), source.clone(), cache)
///         .build()
///         .expect("no expiration is configured");
///     DistributedCacheMap::builder(local, bus, "prices").build()
/// };
/// let a = instance(bus.connect()).await?;
/// let b = instance(bus.connect()).await?;
///
/// let key = "apple".to_string();
/// a.try_add(&key, 1, true).await?;
/// assert_eq!(b.get(&key).await?, Some(1));
///
/// a.try_add(&key, 2, true).await?;
/// assert_eq!(b.get(&key).await?, Some(2));
///
/// a.dispose().await?;
/// b.dispose().await?;
/// # Ok::<(), larder_store::Error>(())
/// # });
/// ```
pub struct DistributedCache<K, N, B> {
    map: N,
    bus: Arc<B>,
    channel: String,
    instance_id: Uuid,
    disposed: AtomicBool,
    _key: PhantomData<fn(K)>,
}

impl<K, N: Debug, B> Debug for DistributedCache<K, N, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedCache")
            .field("map", &self.map)
            .field("channel", &self.channel)
            .field("instance_id", &self.instance_id)
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

impl<K, N, B> DistributedCache<K, N, B> {
    /// Returns the identifier stamped on the events this instance publishes.
    #[must_use]
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Returns the synchronization channel.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Returns the local map, decorated to publish its writes.
    #[must_use]
    pub fn map(&self) -> &N {
        &self.map
    }

    /// Returns whether [`dispose`](Self::dispose) has completed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl<K, N, B> DistributedCache<K, N, B>
where
    B: MessageBus<SynchronizationEvent<K>>,
{
    async fn start(map: N, settings: Settings<B>, handler: MessageHandler<SynchronizationEvent<K>>) -> Result<Self> {
        settings
            .bus
            .subscribe(&settings.channel, handler)
            .await
            .map_err(Error::bus)?;

        Ok(Self {
            map,
            bus: settings.bus,
            channel: settings.channel,
            instance_id: settings.instance_id,
            disposed: AtomicBool::new(false),
            _key: PhantomData,
        })
    }

    /// Stops receiving invalidation events.
    ///
    /// Calling it again after it succeeded does nothing. Writes made after disposal
    /// still publish events.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::Bus`](larder_store::ErrorKind::Bus) when the bus cannot
    /// unsubscribe; the instance can then be disposed again.
    pub async fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if let Err(error) = self.bus.unsubscribe(&self.channel).await {
            self.disposed.store(false, Ordering::Release);
            return Err(Error::bus(error));
        }
        Ok(())
    }
}

impl<K, V, S, C, B> DistributedCacheMap<K, V, S, C, B> {
    /// Starts building a distributed map around the local `map`.
    ///
    /// Each instance needs its own bus connection, since disposing an instance
    /// unsubscribes its connection from `channel`.
    pub fn builder(map: OnDemandCacheMap<K, V, S, C>, bus: B, channel: impl Into<String>) -> DistributedCacheBuilder<OnDemandCacheMap<K, V, S, C>, B> {
        DistributedCacheBuilder::new(map, bus, channel.into())
    }
}

impl<K, T, S, C, B> DistributedCacheSetMap<K, T, S, C, B> {
    /// Starts building a distributed set map around the local `map`.
    ///
    /// Each instance needs its own bus connection, since disposing an instance
    /// unsubscribes its connection from `channel`.
    pub fn builder(
        map: OnDemandCacheSetMap<K, T, S, C>,
        bus: B,
        channel: impl Into<String>,
    ) -> DistributedCacheBuilder<OnDemandCacheSetMap<K, T, S, C>, B> {
        DistributedCacheBuilder::new(map, bus, channel.into())
    }
}

impl<K, X, N, B> KeyValueStore<K, X> for DistributedCache<K, N, B>
where
    K: Send + Sync,
    N: KeyValueStore<K, X>,
    B: MessageBus<SynchronizationEvent<K>>,
{
    fn try_add(&self, key: &K, value: X, overwrite: bool) -> impl Future<Output = Result<bool>> + Send {
        self.map.try_add(key, value, overwrite)
    }

    fn get(&self, key: &K) -> impl Future<Output = Result<Option<X>>> + Send {
        self.map.get(key)
    }

    fn try_remove(&self, key: &K) -> impl Future<Output = Result<bool>> + Send {
        self.map.try_remove(key)
    }

    fn contains_key(&self, key: &K) -> impl Future<Output = Result<bool>> + Send {
        self.map.contains_key(key)
    }

    fn as_expirable(&self) -> Option<&dyn ExpirableKeyStore<K>> {
        self.map.as_expirable()
    }

    fn as_keys_enumerable(&self) -> Option<&dyn KeysEnumerable<K>> {
        self.map.as_keys_enumerable()
    }
}

impl<K, T, N, B> SetStore<K, T> for DistributedCache<K, N, B>
where
    K: Send + Sync,
    N: SetStore<K, T>,
    B: MessageBus<SynchronizationEvent<K>>,
{
    fn get_or_empty(&self, key: &K) -> impl Future<Output = Result<SetHandle<T>>> + Send {
        self.map.get_or_empty(key)
    }

    fn supports_empty_sets(&self) -> bool {
        self.map.supports_empty_sets()
    }
}

impl<K, V, N, B> PropertyStore<K, V> for DistributedCache<K, N, B>
where
    K: Send + Sync,
    N: PropertyStore<K, V>,
    B: MessageBus<SynchronizationEvent<K>>,
{
    type Property = N::Property;

    fn set_property(&self, key: &K, name: &str, value: Self::Property) -> impl Future<Output = Result<()>> + Send {
        self.map.set_property(key, name, value)
    }

    fn get_property(&self, key: &K, name: &str) -> impl Future<Output = Result<Option<Self::Property>>> + Send {
        self.map.get_property(key, name)
    }

    fn merge(&self, key: &K, value: V) -> impl Future<Output = Result<()>> + Send {
        self.map.merge(key, value)
    }
}

/// Builder for [`DistributedCacheMap`] and [`DistributedCacheSetMap`].
pub struct DistributedCacheBuilder<M, B> {
    map: M,
    bus: B,
    channel: String,
    ignore_own_events: bool,
    instance_id: Option<Uuid>,
}

impl<M: Debug, B> Debug for DistributedCacheBuilder<M, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedCacheBuilder")
            .field("map", &self.map)
            .field("channel", &self.channel)
            .field("ignore_own_events", &self.ignore_own_events)
            .finish_non_exhaustive()
    }
}

struct Settings<B> {
    bus: Arc<B>,
    channel: String,
    instance_id: Uuid,
    ignore_own_events: bool,
}

impl<B> Settings<B> {
    /// The instance whose events are skipped, if any.
    fn skipped_instance(&self) -> Option<Uuid> {
        self.ignore_own_events.then_some(self.instance_id)
    }
}

impl<M, B> DistributedCacheBuilder<M, B> {
    fn new(map: M, bus: B, channel: String) -> Self {
        Self {
            map,
            bus,
            channel,
            ignore_own_events: false,
            instance_id: None,
        }
    }

    /// Skips events published by this instance.
    ///
    /// Off by default: an instance evicts its own writes too, which costs one extra
    /// source read but keeps the local cache exactly as fresh as remote ones.
    #[must_use]
    pub fn ignore_own_events(mut self, ignore: bool) -> Self {
        self.ignore_own_events = ignore;
        self
    }

    /// Sets the instance identifier; a random one is generated otherwise.
    #[must_use]
    pub fn instance_id(mut self, instance_id: Uuid) -> Self {
        self.instance_id = Some(instance_id);
        self
    }

    fn split(self) -> (M, Settings<B>) {
        let settings = Settings {
            bus: Arc::new(self.bus),
            channel: self.channel,
            instance_id: self.instance_id.unwrap_or_else(Uuid::new_v4),
            ignore_own_events: self.ignore_own_events,
        };
        (self.map, settings)
    }
}

impl<K, V, S, C, B> DistributedCacheBuilder<OnDemandCacheMap<K, V, S, C>, B>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: KeyValueStore<K, V>,
    C: KeyValueStore<K, V> + 'static,
    B: MessageBus<SynchronizationEvent<K>> + 'static,
{
    /// Subscribes to the channel and creates the distributed map.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::Bus`](larder_store::ErrorKind::Bus) when the subscription fails.
    pub async fn build(self) -> Result<DistributedCacheMap<K, V, S, C, B>> {
        let (map, settings) = self.split();
        let handler = evictor::<K, V, C>(map.cache_handle(), map.policy().clone(), settings.skipped_instance());
        let notifier = publisher(map.policy().clone(), &settings);
        DistributedCache::start(NotifyWriteMap::new(map, notifier), settings, handler).await
    }
}

impl<K, T, S, C, B> DistributedCacheBuilder<OnDemandCacheSetMap<K, T, S, C>, B>
where
    K: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    S: SetStore<K, T> + 'static,
    C: SetStore<K, T> + 'static,
    B: MessageBus<SynchronizationEvent<K>> + 'static,
{
    /// Subscribes to the channel and creates the distributed set map.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::Bus`](larder_store::ErrorKind::Bus) when the subscription fails.
    pub async fn build(self) -> Result<DistributedCacheSetMap<K, T, S, C, B>> {
        let (map, settings) = self.split();
        let handler = evictor::<K, SetHandle<T>, C>(map.cache_handle(), map.policy().clone(), settings.skipped_instance());
        let notifier = publisher(map.policy().clone(), &settings);
        DistributedCache::start(NotifyWriteSetMap::new(map, notifier), settings, handler).await
    }
}

/// Publishes a [`SynchronizationEvent`] for every key it is given.
fn publisher<K, B>(policy: CachePolicy, settings: &Settings<B>) -> Notifier<K>
where
    K: Send + 'static,
    B: MessageBus<SynchronizationEvent<K>> + 'static,
{
    let bus = Arc::clone(&settings.bus);
    let channel: Arc<str> = settings.channel.as_str().into();
    let instance = settings.instance_id;

    Arc::new(move |key| {
        let bus = Arc::clone(&bus);
        let channel = Arc::clone(&channel);
        let policy = policy.clone();
        async move {
            match bus.publish(&channel, SynchronizationEvent { key, instance }).await {
                Ok(()) => policy.record(CacheOperation::Publish, CacheActivity::Published),
                Err(error) => policy.record_failure(CacheOperation::Publish, CacheActivity::PublishFailed, &error),
            }
        }
        .boxed()
    })
}

/// Evicts the key of every received event from the local cache.
fn evictor<K, X, C>(cache: Arc<C>, policy: CachePolicy, skipped: Option<Uuid>) -> MessageHandler<SynchronizationEvent<K>>
where
    K: Send + Sync + 'static,
    X: 'static,
    C: KeyValueStore<K, X> + 'static,
{
    Arc::new(move |event: SynchronizationEvent<K>| {
        let cache = Arc::clone(&cache);
        let policy = policy.clone();
        async move {
            if skipped == Some(event.instance) {
                return;
            }
            match cache.try_remove(&event.key).await {
                Ok(_) => policy.record(CacheOperation::Invalidate, CacheActivity::Invalidated),
                Err(error) => policy.record_failure(CacheOperation::Invalidate, CacheActivity::WriteFailed, &error),
            }
        }
        .boxed()
    })
}
