// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Mock store for testing.
//!
//! [`MockStore`] behaves like a [`MemoryStore`], records every operation and
//! fails operations selected by a predicate, which makes it suitable for testing
//! how strategies react to a misbehaving cache or source.

use std::{
    fmt::Debug,
    hash::Hash,
    sync::Arc,
    time::{Duration, SystemTime},
};

use futures::{
    FutureExt, StreamExt,
    future::{self, BoxFuture},
    stream::BoxStream,
};
use parking_lot::Mutex;
use tick::Clock;

use crate::{Error, ExpirableKeyStore, KeyValueStore, KeysEnumerable, MemoryStore, Result};

/// Recorded store operation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StoreOp<K, V> {
    /// A value was added.
    TryAdd {
        /// The key written.
        key: K,
        /// The value written.
        value: V,
        /// Whether an existing value could be replaced.
        overwrite: bool,
    },
    /// A value was read.
    Get(K),
    /// A key was removed.
    TryRemove(K),
    /// A key was checked for presence.
    ContainsKey(K),
    /// A relative or absolute expiration was set.
    SetExpiration(K),
    /// An expiration was removed.
    RemoveExpiration(K),
    /// The key set was enumerated.
    Keys,
}

impl<K, V> StoreOp<K, V> {
    /// Returns `true` for operations that mutate the store.
    #[must_use]
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::TryAdd { .. } | Self::TryRemove(_) | Self::SetExpiration(_) | Self::RemoveExpiration(_)
        )
    }
}

type FailPredicate<K, V> = Box<dyn Fn(&StoreOp<K, V>) -> bool + Send + Sync>;

/// A configurable mock store.
///
/// Every operation is recorded and can be failed on demand through
/// [`fail_when`](Self::fail_when). Capabilities can be hidden with
/// [`without_expiration`](Self::without_expiration) and
/// [`without_key_enumeration`](Self::without_key_enumeration) to exercise
/// configuration checks.
pub struct MockStore<K, V> {
    inner: MemoryStore<K, V>,
    operations: Arc<Mutex<Vec<StoreOp<K, V>>>>,
    fail_when: Arc<Mutex<Option<FailPredicate<K, V>>>>,
    expirable: bool,
    enumerable: bool,
}

impl<K, V> Debug for MockStore<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockStore")
            .field("operations", &self.operations.lock().len())
            .field("fail_when", &self.fail_when.lock().is_some())
            .field("expirable", &self.expirable)
            .field("enumerable", &self.enumerable)
            .finish_non_exhaustive()
    }
}

impl<K, V> Clone for MockStore<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            operations: Arc::clone(&self.operations),
            fail_when: Arc::clone(&self.fail_when),
            expirable: self.expirable,
            enumerable: self.enumerable,
        }
    }
}

impl<K, V> MockStore<K, V>
where
    K: Eq + Hash,
{
    /// Creates an empty mock store with every capability enabled.
    #[must_use]
    pub fn new(clock: Clock) -> Self {
        Self {
            inner: MemoryStore::new(clock),
            operations: Arc::new(Mutex::new(Vec::new())),
            fail_when: Arc::new(Mutex::new(None)),
            expirable: true,
            enumerable: true,
        }
    }

    /// Hides the key expiration capability.
    #[must_use]
    pub fn without_expiration(mut self) -> Self {
        self.expirable = false;
        self
    }

    /// Hides the key enumeration capability.
    #[must_use]
    pub fn without_key_enumeration(mut self) -> Self {
        self.enumerable = false;
        self
    }

    /// Returns the backing memory store, which bypasses recording and failure injection.
    #[must_use]
    pub fn inner(&self) -> &MemoryStore<K, V> {
        &self.inner
    }

    /// Sets a predicate selecting the operations that fail.
    ///
    /// Failed operations are still recorded but leave the data untouched.
    pub fn fail_when<F>(&self, predicate: F)
    where
        F: Fn(&StoreOp<K, V>) -> bool + Send + Sync + 'static,
    {
        *self.fail_when.lock() = Some(Box::new(predicate));
    }

    /// Clears the failure predicate.
    pub fn clear_failures(&self) {
        *self.fail_when.lock() = None;
    }

    /// Clears all recorded operations.
    pub fn clear_operations(&self) {
        self.operations.lock().clear();
    }

    fn check(&self, op: StoreOp<K, V>) -> Result<()> {
        let fail = self.fail_when.lock().as_ref().is_some_and(|predicate| predicate(&op));
        self.operations.lock().push(op);
        if fail {
            return Err(Error::store("mock: injected failure"));
        }
        Ok(())
    }
}

impl<K, V> MockStore<K, V>
where
    K: Clone,
    V: Clone,
{
    /// Returns a clone of all recorded operations.
    #[must_use]
    pub fn operations(&self) -> Vec<StoreOp<K, V>> {
        self.operations.lock().clone()
    }

    /// Returns the number of recorded operations that mutate the store.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.operations.lock().iter().filter(|op| op.is_write()).count()
    }
}

impl<K, V> KeyValueStore<K, V> for MockStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn try_add(&self, key: &K, value: V, overwrite: bool) -> Result<bool> {
        self.check(StoreOp::TryAdd {
            key: key.clone(),
            value: value.clone(),
            overwrite,
        })?;
        self.inner.try_add(key, value, overwrite).await
    }

    async fn get(&self, key: &K) -> Result<Option<V>> {
        self.check(StoreOp::Get(key.clone()))?;
        self.inner.get(key).await
    }

    async fn try_remove(&self, key: &K) -> Result<bool> {
        self.check(StoreOp::TryRemove(key.clone()))?;
        self.inner.try_remove(key).await
    }

    async fn contains_key(&self, key: &K) -> Result<bool> {
        self.check(StoreOp::ContainsKey(key.clone()))?;
        self.inner.contains_key(key).await
    }

    fn as_expirable(&self) -> Option<&dyn ExpirableKeyStore<K>> {
        if self.expirable { Some(self) } else { None }
    }

    fn as_keys_enumerable(&self) -> Option<&dyn KeysEnumerable<K>> {
        if self.enumerable { Some(self) } else { None }
    }
}

impl<K, V> ExpirableKeyStore<K> for MockStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn set_relative_expiration<'a>(&'a self, key: &'a K, ttl: Duration) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            self.check(StoreOp::SetExpiration(key.clone()))?;
            self.inner.set_relative_expiration(key, ttl).await
        })
    }

    fn set_absolute_expiration<'a>(&'a self, key: &'a K, expires_at: SystemTime) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            self.check(StoreOp::SetExpiration(key.clone()))?;
            self.inner.set_absolute_expiration(key, expires_at).await
        })
    }

    fn remove_expiration<'a>(&'a self, key: &'a K) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            self.check(StoreOp::RemoveExpiration(key.clone()))?;
            self.inner.remove_expiration(key).await
        })
    }
}

impl<K, V> KeysEnumerable<K> for MockStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn keys(&self) -> BoxStream<'_, Result<K>> {
        if let Err(error) = self.check(StoreOp::Keys) {
            return future::ready(Err(error)).into_stream().boxed();
        }
        self.inner.keys()
    }
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;

    use super::*;

    #[test]
    fn failed_operations_are_recorded_and_leave_data_untouched() {
        block_on(async {
            let store = MockStore::<&str, i32>::new(Clock::new_frozen());
            store.fail_when(|op| matches!(op, StoreOp::TryAdd { key: "bad", .. }));

            assert!(store.try_add(&"bad", 1, true).await.is_err());
            assert!(store.try_add(&"good", 2, true).await.unwrap());

            assert_eq!(store.inner().len(), 1);
            assert_eq!(store.write_count(), 2);
        });
    }

    #[test]
    fn capabilities_can_be_hidden() {
        let store = MockStore::<&str, i32>::new(Clock::new_frozen())
            .without_expiration()
            .without_key_enumeration();

        assert!(store.as_expirable().is_none());
        assert!(store.as_keys_enumerable().is_none());
    }
}
