// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Set decorators used by the on-demand set map.

use std::{fmt::Debug, sync::Arc};

use futures::{FutureExt, future::BoxFuture};
use larder_store::{Error, Result, SetHandle, StoreSet};
use tokio::sync::OnceCell;

use crate::{
    policy::CachePolicy,
    telemetry::{CacheActivity, CacheOperation},
};

type SetFactory<T> = Box<dyn Fn() -> BoxFuture<'static, Result<SetHandle<T>>> + Send + Sync>;

/// A callback run after an item has been added to a [`TriggeredSet`].
pub type AddTrigger = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// A set that fetches its backing set from a factory on first use.
///
/// Handing out a `LazySet` costs nothing; the factory runs once, when the first
/// operation needs the items.
///
/// # Examples
///
/// ```
/// use futures::FutureExt;
/// use larder::LazySet;
/// use larder_store::{MemorySet, StoreSet};
/// # futures::executor::block_on(async {
///
/// let lazy = LazySet::new(|| async { Ok(MemorySet::from_iter([1, 2]).into_handle()) }.boxed());
/// assert!(!lazy.is_loaded());
///
/// assert!(lazy.contains(&2).await?);
/// assert!(lazy.is_loaded());
/// # Ok::<(), larder_store::Error>(())
/// # });
/// ```
pub struct LazySet<T> {
    cell: OnceCell<SetHandle<T>>,
    factory: SetFactory<T>,
}

impl<T> Debug for LazySet<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazySet").field("loaded", &self.is_loaded()).finish_non_exhaustive()
    }
}

impl<T: 'static> LazySet<T> {
    /// Creates a set backed by whatever `factory` produces.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, Result<SetHandle<T>>> + Send + Sync + 'static,
    {
        Self {
            cell: OnceCell::new(),
            factory: Box::new(factory),
        }
    }

    /// Creates a set whose backing set is already known.
    #[must_use]
    pub fn ready(handle: SetHandle<T>) -> Self {
        let cell = OnceCell::new_with(Some(Arc::clone(&handle)));
        Self {
            cell,
            factory: Box::new(move || {
                let handle = Arc::clone(&handle);
                async move { Ok(handle) }.boxed()
            }),
        }
    }
}

impl<T> LazySet<T> {
    /// Returns whether the backing set has been fetched.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }

    async fn handle(&self) -> Result<&SetHandle<T>> {
        self.cell.get_or_try_init(|| (self.factory)()).await
    }
}

impl<T> StoreSet<T> for LazySet<T>
where
    T: Send + Sync,
{
    fn add(&self, item: T) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.handle().await?.add(item).await })
    }

    fn try_remove<'a>(&'a self, item: &'a T) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move { self.handle().await?.try_remove(item).await })
    }

    fn contains<'a>(&'a self, item: &'a T) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move { self.handle().await?.contains(item).await })
    }

    fn items(&self) -> BoxFuture<'_, Result<Vec<T>>> {
        Box::pin(async move { self.handle().await?.items().await })
    }

    fn len(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async move { self.handle().await?.len().await })
    }
}

/// A set that runs a trigger every time an item is added.
///
/// The on-demand set map uses it to re-arm the cache lifetime of a set whenever
/// the set grows, the same way overwriting a scalar value would.
pub struct TriggeredSet<T> {
    inner: SetHandle<T>,
    on_add: AddTrigger,
}

impl<T> Debug for TriggeredSet<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggeredSet").finish_non_exhaustive()
    }
}

impl<T> TriggeredSet<T> {
    /// Wraps `inner`, running `on_add` after each successful add.
    pub fn new(inner: SetHandle<T>, on_add: AddTrigger) -> Self {
        Self { inner, on_add }
    }
}

impl<T> StoreSet<T> for TriggeredSet<T>
where
    T: Send + Sync,
{
    fn add(&self, item: T) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.inner.add(item).await?;
            (self.on_add)().await
        })
    }

    fn try_remove<'a>(&'a self, item: &'a T) -> BoxFuture<'a, Result<bool>> {
        self.inner.try_remove(item)
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

/// A set with no items, used to store a negative result.
pub(crate) struct EmptySet;

impl<T: Send + Sync> StoreSet<T> for EmptySet {
    fn add(&self, _item: T) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Err(Error::unsupported("the empty set marker is read-only")) })
    }

    fn try_remove<'a>(&'a self, _item: &'a T) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async { Ok(false) })
    }

    fn contains<'a>(&'a self, _item: &'a T) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async { Ok(false) })
    }

    fn items(&self) -> BoxFuture<'_, Result<Vec<T>>> {
        Box::pin(async { Ok(Vec::new()) })
    }

    fn len(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async { Ok(0) })
    }
}

/// Looks up the cached set of one key; called again for every element operation.
pub(crate) type CachedSetLookup<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<Option<SetHandle<T>>>> + Send + Sync>;

/// A live view of one key of an on-demand set map.
///
/// Element operations keep the on-demand discipline: additions and removals go to
/// the source set and are mirrored into the cached set, membership checks try the
/// cached set first, and the source set is only fetched when the cache cannot
/// answer. The cached set is looked up by key on every operation, so a view keeps
/// following the cache after its entry expires, is evicted or is replaced.
pub struct OnDemandCacheSet<T> {
    source: LazySet<T>,
    cached: CachedSetLookup<T>,
    policy: Arc<CachePolicy>,
    empty_sets: bool,
}

impl<T> Debug for OnDemandCacheSet<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnDemandCacheSet")
            .field("source", &self.source)
            .field("empty_sets", &self.empty_sets)
            .finish_non_exhaustive()
    }
}

impl<T> OnDemandCacheSet<T> {
    pub(crate) fn new(source: LazySet<T>, cached: CachedSetLookup<T>, policy: Arc<CachePolicy>, empty_sets: bool) -> Self {
        Self {
            source,
            cached,
            policy,
            empty_sets,
        }
    }
}

impl<T> OnDemandCacheSet<T>
where
    T: Clone + Send + Sync,
{
    async fn mirror<R>(&self, operation: CacheOperation, write: impl Future<Output = Result<R>>) -> Result<()> {
        if self.policy.write_cache(operation, write).await?.written().is_some() {
            self.policy.record(operation, CacheActivity::Written);
        }
        Ok(())
    }

    /// The set currently cached under this key; `None` when absent or unreadable.
    async fn cached_set(&self) -> Option<SetHandle<T>> {
        self.policy.read_cache(CacheOperation::SetRead, (self.cached)()).await
    }

    /// Reads the cached set, unless it is unreadable or an empty copy that cannot be trusted.
    async fn cached<R>(&self, read: impl Future<Output = Result<R>>, is_empty: impl FnOnce(&R) -> bool) -> Option<R> {
        let value = self
            .policy
            .read_cache(CacheOperation::SetRead, async { read.await.map(Some) })
            .await?;
        (self.empty_sets || !is_empty(&value)).then_some(value)
    }
}

impl<T> StoreSet<T> for OnDemandCacheSet<T>
where
    T: Clone + Send + Sync,
{
    fn add(&self, item: T) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.source.add(item.clone()).await.map_err(Error::source_write)?;
            if let Some(cache) = self.cached_set().await {
                self.mirror(CacheOperation::SetAdd, cache.add(item)).await?;
            }
            Ok(())
        })
    }

    fn try_remove<'a>(&'a self, item: &'a T) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let removed = self.source.try_remove(item).await.map_err(Error::source_write)?;
            if let Some(cache) = self.cached_set().await {
                self.mirror(CacheOperation::SetRemove, cache.try_remove(item)).await?;
            }
            Ok(removed)
        })
    }

    fn contains<'a>(&'a self, item: &'a T) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let cached = self.cached_set().await;
            if let Some(cache) = &cached
                && self.policy.read_cache(CacheOperation::SetRead, cache.contains(item)).await
            {
                self.policy.record(CacheOperation::SetRead, CacheActivity::Hit);
                return Ok(true);
            }

            self.policy.record(CacheOperation::SetRead, CacheActivity::Miss);
            let found = self.source.contains(item).await?;
            if found && let Some(cache) = &cached {
                self.mirror(CacheOperation::SetAdd, cache.add(item.clone())).await?;
            }
            Ok(found)
        })
    }

    fn items(&self) -> BoxFuture<'_, Result<Vec<T>>> {
        Box::pin(async move {
            if let Some(cache) = self.cached_set().await
                && let Some(items) = self.cached(cache.items(), Vec::is_empty).await
            {
                self.policy.record(CacheOperation::SetRead, CacheActivity::Hit);
                return Ok(items);
            }
            self.policy.record(CacheOperation::SetRead, CacheActivity::Miss);
            self.source.items().await
        })
    }

    fn len(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async move {
            if let Some(cache) = self.cached_set().await
                && let Some(len) = self.cached(cache.len(), |len| *len == 0).await
            {
                self.policy.record(CacheOperation::SetRead, CacheActivity::Hit);
                return Ok(len);
            }
            self.policy.record(CacheOperation::SetRead, CacheActivity::Miss);
            self.source.len().await
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::executor::block_on;
    use larder_store::MemorySet;

    use super::*;

    #[test]
    fn lazy_set_runs_factory_once() {
        block_on(async {
            let calls = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&calls);
            let lazy = LazySet::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(MemorySet::<i32>::new().into_handle()) }.boxed()
            });
            assert_eq!(calls.load(Ordering::SeqCst), 0);

            lazy.add(1).await.unwrap();
            lazy.add(2).await.unwrap();
            assert_eq!(lazy.len().await.unwrap(), 2);
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        });
    }

    #[test]
    fn triggered_set_fires_only_on_add() {
        block_on(async {
            let fired = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&fired);
            let set = TriggeredSet::new(
                MemorySet::<i32>::new().into_handle(),
                Arc::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Ok(()) }.boxed()
                }),
            );

            set.add(1).await.unwrap();
            set.contains(&1).await.unwrap();
            set.try_remove(&1).await.unwrap();
            assert_eq!(fired.load(Ordering::SeqCst), 1);
        });
    }

    #[test]
    fn empty_set_has_no_items() {
        block_on(async {
            let set: &dyn StoreSet<i32> = &EmptySet;
            assert_eq!(set.len().await.unwrap(), 0);
            assert!(set.add(1).await.is_err());
        });
    }
}
