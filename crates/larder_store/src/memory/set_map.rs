// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! In-memory set store.

use std::{
    collections::HashSet,
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
use parking_lot::Mutex;
use tick::Clock;

use super::entries::{Entries, always_visible};
use crate::{ExpirableKeyStore, KeyValueStore, KeysEnumerable, Result, SetHandle, SetStore, StoreSet};

/// A thread-safe in-memory set.
///
/// Clones share the same items, so a `MemorySet` handed out by a
/// [`MemorySetStore`] writes straight into the store.
///
/// # Examples
///
/// ```
/// use larder_store::{MemorySet, StoreSet};
/// # futures::executor::block_on(async {
///
/// let set: MemorySet<i32> = [1, 2].into_iter().collect();
/// set.add(3).await?;
///
/// assert!(set.contains(&3).await?);
/// assert_eq!(set.len().await?, 3);
/// # Ok::<(), larder_store::Error>(())
/// # });
/// ```
pub struct MemorySet<T> {
    items: Arc<Mutex<HashSet<T>>>,
}

impl<T: Debug> Debug for MemorySet<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.items.lock().iter()).finish()
    }
}

impl<T> Clone for MemorySet<T> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
        }
    }
}

impl<T> Default for MemorySet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MemorySet<T> {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Returns `true` if the set has no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

impl<T> MemorySet<T>
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
{
    /// Converts the set into a type-erased handle sharing the same items.
    #[must_use]
    pub fn into_handle(self) -> SetHandle<T> {
        Arc::new(self)
    }
}

impl<T: Eq + Hash> FromIterator<T> for MemorySet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            items: Arc::new(Mutex::new(iter.into_iter().collect())),
        }
    }
}

impl<T> StoreSet<T> for MemorySet<T>
where
    T: Clone + Eq + Hash + Send + Sync,
{
    fn add(&self, item: T) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.items.lock().insert(item);
            Ok(())
        })
    }

    fn try_remove<'a>(&'a self, item: &'a T) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move { Ok(self.items.lock().remove(item)) })
    }

    fn contains<'a>(&'a self, item: &'a T) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move { Ok(self.items.lock().contains(item)) })
    }

    fn items(&self) -> BoxFuture<'_, Result<Vec<T>>> {
        Box::pin(async move { Ok(self.items.lock().iter().cloned().collect()) })
    }

    fn len(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async move { Ok(u64::try_from(self.items.lock().len()).unwrap_or(u64::MAX)) })
    }
}

fn non_empty<T>(set: &MemorySet<T>) -> bool {
    !set.is_empty()
}

/// An in-memory store mapping keys to [`MemorySet`]s.
///
/// [`get`](KeyValueStore::get) returns live handles: items added through a handle
/// are visible to every other reader of the same key.
///
/// By default the store keeps explicitly empty sets. A store created with
/// [`without_empty_sets`](Self::without_empty_sets) behaves like backends that
/// delete a collection together with its last item: a key whose set is empty is
/// reported as absent.
pub struct MemorySetStore<K, T> {
    entries: Arc<Entries<K, MemorySet<T>>>,
    clock: Clock,
    empty_sets: bool,
}

impl<K, T> Debug for MemorySetStore<K, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySetStore")
            .field("empty_sets", &self.empty_sets)
            .finish_non_exhaustive()
    }
}

impl<K, T> Clone for MemorySetStore<K, T> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            clock: self.clock.clone(),
            empty_sets: self.empty_sets,
        }
    }
}

impl<K, T> MemorySetStore<K, T>
where
    K: Eq + Hash,
{
    /// Creates an empty store that keeps explicitly empty sets.
    #[must_use]
    pub fn new(clock: Clock) -> Self {
        Self {
            entries: Arc::new(Entries::new(always_visible)),
            clock,
            empty_sets: true,
        }
    }

    /// Creates an empty store that treats empty sets as absent keys.
    #[must_use]
    pub fn without_empty_sets(clock: Clock) -> Self {
        Self {
            entries: Arc::new(Entries::new(non_empty)),
            clock,
            empty_sets: false,
        }
    }

    /// Returns the number of keys holding a visible set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len(self.clock.system_time())
    }

    /// Returns `true` if no key holds a visible set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns when `key` expires, if it exists and has an expiration.
    #[must_use]
    pub fn expires_at(&self, key: &K) -> Option<SystemTime> {
        self.entries.expires_at(key, self.clock.system_time())
    }

    fn expire(&self, key: &K, expires_at: Option<SystemTime>) -> bool {
        self.entries.set_expiration(key, self.clock.system_time(), expires_at)
    }
}

impl<K, T> KeyValueStore<K, SetHandle<T>> for MemorySetStore<K, T>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    T: Clone + Eq + Hash + Send + Sync + 'static,
{
    async fn try_add(&self, key: &K, value: SetHandle<T>, overwrite: bool) -> Result<bool> {
        let items = value.items().await?;
        let set: MemorySet<T> = items.into_iter().collect();
        Ok(self.entries.insert(key.clone(), set, self.clock.system_time(), overwrite))
    }

    async fn get(&self, key: &K) -> Result<Option<SetHandle<T>>> {
        Ok(self
            .entries
            .with_value(key, self.clock.system_time(), |set| set.clone().into_handle()))
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

impl<K, T> SetStore<K, T> for MemorySetStore<K, T>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    T: Clone + Eq + Hash + Send + Sync + 'static,
{
    async fn get_or_empty(&self, key: &K) -> Result<SetHandle<T>> {
        let mut handle = None;
        self.entries
            .upsert(key, self.clock.system_time(), MemorySet::new, |set| handle = Some(set.clone()));
        Ok(handle.unwrap_or_default().into_handle())
    }

    fn supports_empty_sets(&self) -> bool {
        self.empty_sets
    }
}

impl<K, T> ExpirableKeyStore<K> for MemorySetStore<K, T>
where
    K: Eq + Hash + Send + Sync,
    T: Send + Sync,
{
    fn set_relative_expiration<'a>(&'a self, key: &'a K, ttl: Duration) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
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

impl<K, T> KeysEnumerable<K> for MemorySetStore<K, T>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    T: Send + Sync,
{
    fn keys(&self) -> BoxStream<'_, Result<K>> {
        let keys = self.entries.keys(self.clock.system_time());
        stream::iter(keys.into_iter().map(Ok)).boxed()
    }
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;

    use super::*;

    #[test]
    fn handles_write_through_to_the_store() {
        block_on(async {
            let store = MemorySetStore::<&str, i32>::new(Clock::new_frozen());
            let handle = store.get_or_empty(&"key").await.unwrap();
            handle.add(1).await.unwrap();

            let again = store.get(&"key").await.unwrap().unwrap();
            assert!(again.contains(&1).await.unwrap());
        });
    }

    #[test]
    fn empty_sets_are_absent_when_unsupported() {
        block_on(async {
            let store = MemorySetStore::<&str, i32>::without_empty_sets(Clock::new_frozen());
            assert!(!store.supports_empty_sets());

            assert!(store.try_add(&"key", MemorySet::new().into_handle(), false).await.unwrap());
            assert!(!store.contains_key(&"key").await.unwrap());

            let handle = store.get_or_empty(&"key").await.unwrap();
            handle.add(7).await.unwrap();
            assert!(store.contains_key(&"key").await.unwrap());

            handle.try_remove(&7).await.unwrap();
            assert!(store.get(&"key").await.unwrap().is_none());
        });
    }
}
