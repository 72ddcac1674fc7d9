// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Store decorators that report every successful mutation.

use std::{
    fmt::Debug,
    marker::PhantomData,
    sync::Arc,
    time::{Duration, SystemTime},
};

use futures::future::BoxFuture;
use larder_store::{
    Error, ExpirableKeyStore, KeyValueStore, KeysEnumerable, PropertyStore, Result, SetHandle, SetStore, StoreSet,
};

/// Called with the key of every entry a decorated store has changed.
pub type Notifier<K> = Arc<dyn Fn(K) -> BoxFuture<'static, ()> + Send + Sync>;

fn expirable<K>(store: Option<&dyn ExpirableKeyStore<K>>) -> Result<&dyn ExpirableKeyStore<K>> {
    store.ok_or_else(|| Error::unsupported("the decorated store does not support key expiration"))
}

async fn notify_if_changed<K: Clone>(notifier: &Notifier<K>, key: &K, change: impl Future<Output = Result<bool>>) -> Result<bool> {
    let changed = change.await?;
    if changed {
        notifier(key.clone()).await;
    }
    Ok(changed)
}

/// A key/value store that notifies after each successful write.
///
/// The notification runs after the decorated store has accepted the write, so a
/// failing notifier can delay other observers but never loses the write.
/// Writes that change nothing (a rejected add, a removal of a missing key) are
/// not reported.
pub struct NotifyWriteMap<K, V, M> {
    inner: M,
    notifier: Notifier<K>,
    _value: PhantomData<fn(V)>,
}

impl<K, V, M: Debug> Debug for NotifyWriteMap<K, V, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyWriteMap").field("inner", &self.inner).finish_non_exhaustive()
    }
}

impl<K, V, M> NotifyWriteMap<K, V, M> {
    /// Decorates `inner`, calling `notifier` after every write.
    pub fn new(inner: M, notifier: Notifier<K>) -> Self {
        Self {
            inner,
            notifier,
            _value: PhantomData,
        }
    }

    /// Returns the decorated store.
    #[must_use]
    pub fn inner(&self) -> &M {
        &self.inner
    }
}

impl<K, V, M> KeyValueStore<K, V> for NotifyWriteMap<K, V, M>
where
    K: Clone + Send + Sync,
    V: Send,
    M: KeyValueStore<K, V>,
{
    async fn try_add(&self, key: &K, value: V, overwrite: bool) -> Result<bool> {
        notify_if_changed(&self.notifier, key, self.inner.try_add(key, value, overwrite)).await
    }

    fn get(&self, key: &K) -> impl Future<Output = Result<Option<V>>> + Send {
        self.inner.get(key)
    }

    async fn try_remove(&self, key: &K) -> Result<bool> {
        notify_if_changed(&self.notifier, key, self.inner.try_remove(key)).await
    }

    fn contains_key(&self, key: &K) -> impl Future<Output = Result<bool>> + Send {
        self.inner.contains_key(key)
    }

    fn as_expirable(&self) -> Option<&dyn ExpirableKeyStore<K>> {
        self.inner.as_expirable().map(|_| self as &dyn ExpirableKeyStore<K>)
    }

    fn as_keys_enumerable(&self) -> Option<&dyn KeysEnumerable<K>> {
        self.inner.as_keys_enumerable()
    }
}

impl<K, V, M> NotifyWriteMap<K, V, M>
where
    K: Clone + Send + Sync,
{
    async fn notify(&self, key: &K) {
        (self.notifier)(key.clone()).await;
    }
}

impl<K, V, M> PropertyStore<K, V> for NotifyWriteMap<K, V, M>
where
    K: Clone + Send + Sync,
    V: Send,
    M: PropertyStore<K, V>,
    M::Property: Send,
{
    type Property = M::Property;

    async fn set_property(&self, key: &K, name: &str, value: Self::Property) -> Result<()> {
        self.inner.set_property(key, name, value).await?;
        self.notify(key).await;
        Ok(())
    }

    fn get_property(&self, key: &K, name: &str) -> impl Future<Output = Result<Option<Self::Property>>> + Send {
        self.inner.get_property(key, name)
    }

    async fn merge(&self, key: &K, value: V) -> Result<()> {
        self.inner.merge(key, value).await?;
        self.notify(key).await;
        Ok(())
    }
}

/// Expiration changes are writes too: remote caches must not outlive a shortened source lifetime.
macro_rules! impl_notify_expirable {
    ($decorator:ident, $store:ident) => {
        impl<K, V, M> ExpirableKeyStore<K> for $decorator<K, V, M>
        where
            K: Clone + Send + Sync,
            M: $store<K, V>,
        {
            fn set_relative_expiration<'a>(&'a self, key: &'a K, ttl: Duration) -> BoxFuture<'a, Result<bool>> {
                Box::pin(async move {
                    let inner = expirable(self.inner.as_expirable())?;
                    notify_if_changed(&self.notifier, key, inner.set_relative_expiration(key, ttl)).await
                })
            }

            fn set_absolute_expiration<'a>(&'a self, key: &'a K, expires_at: SystemTime) -> BoxFuture<'a, Result<bool>> {
                Box::pin(async move {
                    let inner = expirable(self.inner.as_expirable())?;
                    notify_if_changed(&self.notifier, key, inner.set_absolute_expiration(key, expires_at)).await
                })
            }

            fn remove_expiration<'a>(&'a self, key: &'a K) -> BoxFuture<'a, Result<bool>> {
                Box::pin(async move {
                    let inner = expirable(self.inner.as_expirable())?;
                    notify_if_changed(&self.notifier, key, inner.remove_expiration(key)).await
                })
            }
        }
    };
}

impl_notify_expirable!(NotifyWriteMap, KeyValueStore);
impl_notify_expirable!(NotifyWriteSetMap, SetStore);

/// A set-valued store that notifies after each successful write.
///
/// Besides writes to the store itself, the handles it returns are wrapped in
/// [`NotifyWriteSet`], so adding or removing an element notifies as well.
pub struct NotifyWriteSetMap<K, T, M> {
    inner: M,
    notifier: Notifier<K>,
    _item: PhantomData<fn(T)>,
}

impl<K, T, M: Debug> Debug for NotifyWriteSetMap<K, T, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyWriteSetMap").field("inner", &self.inner).finish_non_exhaustive()
    }
}

impl<K, T, M> NotifyWriteSetMap<K, T, M> {
    /// Decorates `inner`, calling `notifier` after every write to it or to one of its sets.
    pub fn new(inner: M, notifier: Notifier<K>) -> Self {
        Self {
            inner,
            notifier,
            _item: PhantomData,
        }
    }

    /// Returns the decorated store.
    #[must_use]
    pub fn inner(&self) -> &M {
        &self.inner
    }
}

impl<K, T, M> NotifyWriteSetMap<K, T, M>
where
    K: Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    fn wrap(&self, key: &K, set: SetHandle<T>) -> SetHandle<T> {
        Arc::new(NotifyWriteSet {
            inner: set,
            key: key.clone(),
            notifier: Arc::clone(&self.notifier),
        })
    }
}

impl<K, T, M> KeyValueStore<K, SetHandle<T>> for NotifyWriteSetMap<K, T, M>
where
    K: Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
    M: SetStore<K, T>,
{
    async fn try_add(&self, key: &K, value: SetHandle<T>, overwrite: bool) -> Result<bool> {
        notify_if_changed(&self.notifier, key, self.inner.try_add(key, value, overwrite)).await
    }

    async fn get(&self, key: &K) -> Result<Option<SetHandle<T>>> {
        Ok(self.inner.get(key).await?.map(|set| self.wrap(key, set)))
    }

    async fn try_remove(&self, key: &K) -> Result<bool> {
        notify_if_changed(&self.notifier, key, self.inner.try_remove(key)).await
    }

    fn contains_key(&self, key: &K) -> impl Future<Output = Result<bool>> + Send {
        self.inner.contains_key(key)
    }

    fn as_expirable(&self) -> Option<&dyn ExpirableKeyStore<K>> {
        self.inner.as_expirable().map(|_| self as &dyn ExpirableKeyStore<K>)
    }

    fn as_keys_enumerable(&self) -> Option<&dyn KeysEnumerable<K>> {
        self.inner.as_keys_enumerable()
    }
}

impl<K, T, M> SetStore<K, T> for NotifyWriteSetMap<K, T, M>
where
    K: Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
    M: SetStore<K, T>,
{
    async fn get_or_empty(&self, key: &K) -> Result<SetHandle<T>> {
        let set = self.inner.get_or_empty(key).await?;
        Ok(self.wrap(key, set))
    }

    fn supports_empty_sets(&self) -> bool {
        self.inner.supports_empty_sets()
    }
}

/// A set handle that notifies with its key after each element change.
pub struct NotifyWriteSet<K, T> {
    inner: SetHandle<T>,
    key: K,
    notifier: Notifier<K>,
}

impl<K: Debug, T> Debug for NotifyWriteSet<K, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyWriteSet").field("key", &self.key).finish_non_exhaustive()
    }
}

impl<K, T> StoreSet<T> for NotifyWriteSet<K, T>
where
    K: Clone + Send + Sync,
    T: Send + Sync,
{
    fn add(&self, item: T) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.inner.add(item).await?;
            (self.notifier)(self.key.clone()).await;
            Ok(())
        })
    }

    fn try_remove<'a>(&'a self, item: &'a T) -> BoxFuture<'a, Result<bool>> {
        Box::pin(notify_if_changed(&self.notifier, &self.key, self.inner.try_remove(item)))
    }

    fn contains<'a>(&'a self, item: &'a T) -> BoxFuture<'a, Result<bool>> {
        self.inner.contains(item)
    }

    fn items(&self) -> BoxFuture<'_, Result<Vec<T>>> {
        self.inner.items()
    }

    fn len(&self) -> BoxFuture<'_, Result<u64>> {
        self.inner.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use futures::{FutureExt, executor::block_on};
    use larder_store::{MemorySet, MemorySetStore, MemoryStore};
    use tick::Clock;

    use super::*;

    fn recorder<K: Send + 'static>() -> (Notifier<K>, Arc<Mutex<Vec<K>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let notifier: Notifier<K> = Arc::new(move |key| {
            sink.lock().unwrap().push(key);
            async {}.boxed()
        });
        (notifier, seen)
    }

    #[test]
    fn only_effective_writes_notify() {
        block_on(async {
            let (notifier, seen) = recorder();
            let map = NotifyWriteMap::<_, i32, _>::new(MemoryStore::<&str, i32>::new(Clock::new_frozen()), notifier);

            assert!(map.try_add(&"a", 1, false).await.unwrap());
            assert!(!map.try_add(&"a", 2, false).await.unwrap());
            assert_eq!(map.get(&"a").await.unwrap(), Some(1));
            assert!(!map.try_remove(&"missing").await.unwrap());
            assert!(map.try_remove(&"a").await.unwrap());

            assert_eq!(*seen.lock().unwrap(), vec!["a", "a"]);
        });
    }

    #[test]
    fn expiration_changes_notify() {
        block_on(async {
            let (notifier, seen) = recorder();
            let map = NotifyWriteMap::<_, i32, _>::new(MemoryStore::<&str, i32>::new(Clock::new_frozen()), notifier);
            map.inner().try_add(&"a", 1, false).await.unwrap();

            let expirable = map.as_expirable().unwrap();
            assert!(expirable.set_relative_expiration(&"a", Duration::from_secs(5)).await.unwrap());
            assert!(!expirable.remove_expiration(&"missing").await.unwrap());

            assert_eq!(*seen.lock().unwrap(), vec!["a"]);
        });
    }

    #[test]
    fn set_handles_notify_on_element_changes() {
        block_on(async {
            let (notifier, seen) = recorder();
            let store = MemorySetStore::<&str, i32>::new(Clock::new_frozen());
            store
                .try_add(&"s", MemorySet::from_iter([1]).into_handle(), false)
                .await
                .unwrap();
            let map = NotifyWriteSetMap::<_, i32, _>::new(store, notifier);

            let set = map.get(&"s").await.unwrap().unwrap();
            set.add(2).await.unwrap();
            assert!(!set.try_remove(&7).await.unwrap());
            assert!(set.contains(&2).await.unwrap());

            let fresh = map.get_or_empty(&"t").await.unwrap();
            fresh.add(1).await.unwrap();

            assert_eq!(*seen.lock().unwrap(), vec!["s", "t"]);
        });
    }
}
