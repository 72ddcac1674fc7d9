// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! In-memory key/value store.

use std::{
    fmt::Debug,
    hash::Hash,
    sync::Arc,
    time::{Duration, SystemTime},
};

use futures::{
    StreamExt,
    future::BoxFuture,
    stream::{self, BoxStream},
};
use tick::Clock;

use super::entries::{Entries, always_visible};
use crate::{ExpirableKeyStore, KeyValueStore, KeysEnumerable, PropertyBag, PropertyStore, Result};

/// An in-memory key/value store.
///
/// The store supports every optional capability: key expiration (evaluated lazily
/// against its [`Clock`]), key enumeration and, for values implementing
/// [`PropertyBag`], property access. Clones share the same underlying data.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use larder_store::{KeyValueStore, MemoryStore};
/// use tick::ClockControl;
/// # futures::executor::block_on(async {
///
/// let control = ClockControl::new();
/// let store = MemoryStore::<String, i32>::new(control.to_clock());
/// let key = "key".to_string();
///
/// store.try_add(&key, 7, false).await?;
/// store
///     .as_expirable()
///     .expect("memory stores support expiration")
///     .set_relative_expiration(&key, Duration::from_secs(1))
///     .await?;
///
/// control.advance(Duration::from_secs(2));
/// assert!(!store.contains_key(&key).await?);
/// # Ok::<(), larder_store::Error>(())
/// # });
/// ```
pub struct MemoryStore<K, V> {
    entries: Arc<Entries<K, V>>,
    clock: Clock,
}

impl<K, V> Debug for MemoryStore<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}

impl<K, V> Clone for MemoryStore<K, V> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            clock: self.clock.clone(),
        }
    }
}

impl<K, V> MemoryStore<K, V>
where
    K: Eq + Hash,
{
    /// Creates an empty store reading time from `clock`.
    #[must_use]
    pub fn new(clock: Clock) -> Self {
        Self {
            entries: Arc::new(Entries::new(always_visible)),
            clock,
        }
    }

    /// Returns the number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len(self.clock.system_time())
    }

    /// Returns `true` if the store holds no live entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns when `key` expires, if it exists and has an expiration.
    #[must_use]
    pub fn expires_at(&self, key: &K) -> Option<SystemTime> {
        self.entries.expires_at(key, self.clock.system_time())
    }

    /// Returns the clock this store reads time from.
    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    fn expire(&self, key: &K, expires_at: Option<SystemTime>) -> bool {
        self.entries.set_expiration(key, self.clock.system_time(), expires_at)
    }
}

impl<K, V> KeyValueStore<K, V> for MemoryStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn try_add(&self, key: &K, value: V, overwrite: bool) -> Result<bool> {
        Ok(self.entries.insert(key.clone(), value, self.clock.system_time(), overwrite))
    }

    async fn get(&self, key: &K) -> Result<Option<V>> {
        Ok(self.entries.with_value(key, self.clock.system_time(), |value| value.clone()))
    }

    async fn try_remove(&self, key: &K) -> Result<bool> {
        Ok(self.entries.remove(key, self.clock.system_time()))
    }

    async fn contains_key(&self, key: &K) -> Result<bool> {
        Ok(self.entries.contains(key, self.clock.system_time()))
    }

    fn as_expirable(&self) -> Option<&dyn ExpirableKeyStore<K>> {
        Some(self)
    }

    fn as_keys_enumerable(&self) -> Option<&dyn KeysEnumerable<K>> {
        Some(self)
    }
}

impl<K, V> ExpirableKeyStore<K> for MemoryStore<K, V>
where
    K: Eq + Hash + Send + Sync,
    V: Send + Sync,
{
    fn set_relative_expiration<'a>(&'a self, key: &'a K, ttl: Duration) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            // An unrepresentable deadline is as good as never expiring.
            let expires_at = self.clock.system_time().checked_add(ttl);
            Ok(self.expire(key, expires_at))
        })
    }

    fn set_absolute_expiration<'a>(&'a self, key: &'a K, expires_at: SystemTime) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move { Ok(self.expire(key, Some(expires_at))) })
    }

    fn remove_expiration<'a>(&'a self, key: &'a K) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move { Ok(self.expire(key, None)) })
    }
}

impl<K, V> KeysEnumerable<K> for MemoryStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Send + Sync,
{
    fn keys(&self) -> BoxStream<'_, Result<K>> {
        let keys = self.entries.keys(self.clock.system_time());
        stream::iter(keys.into_iter().map(Ok)).boxed()
    }
}

impl<K, V> PropertyStore<K, V> for MemoryStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: PropertyBag + Default + Clone + Send + Sync + 'static,
    V::Property: Send,
{
    type Property = V::Property;

    async fn set_property(&self, key: &K, name: &str, value: V::Property) -> Result<()> {
        self.entries
            .upsert(key, self.clock.system_time(), V::default, |bag| bag.set_property(name, value));
        Ok(())
    }

    async fn get_property(&self, key: &K, name: &str) -> Result<Option<V::Property>> {
        Ok(self
            .entries
            .with_value(key, self.clock.system_time(), |bag| bag.property(name))
            .flatten())
    }

    async fn merge(&self, key: &K, value: V) -> Result<()> {
        self.entries
            .upsert(key, self.clock.system_time(), V::default, |bag| bag.merge_from(value));
        Ok(())
    }
}
