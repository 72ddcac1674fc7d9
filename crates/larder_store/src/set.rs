// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Collection-valued stores.
//!
//! A set store maps each key to a live set rather than to a snapshot: the handle
//! returned by [`KeyValueStore::get`] reads and writes the stored collection
//! directly. Handles are type-erased as [`SetHandle`] so that strategies can wrap
//! them in decorators that keep their caching discipline on every element access.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::{KeyValueStore, Result};

/// A shared, type-erased handle to a live set.
pub type SetHandle<T> = Arc<dyn StoreSet<T>>;

/// A mutable set whose operations may suspend.
pub trait StoreSet<T>: Send + Sync {
    /// Adds `item` to the set.
    fn add(&self, item: T) -> BoxFuture<'_, Result<()>>;

    /// Removes `item`, returning whether it was present.
    fn try_remove<'a>(&'a self, item: &'a T) -> BoxFuture<'a, Result<bool>>;

    /// Returns whether `item` is present.
    fn contains<'a>(&'a self, item: &'a T) -> BoxFuture<'a, Result<bool>>;

    /// Returns a snapshot of the items.
    fn items(&self) -> BoxFuture<'_, Result<Vec<T>>>;

    /// Returns the number of items.
    fn len(&self) -> BoxFuture<'_, Result<u64>>;
}

/// A store mapping keys to sets of items.
///
/// [`KeyValueStore::try_add`] copies the items of the given set into the store;
/// [`KeyValueStore::get`] returns a live handle to the stored set.
pub trait SetStore<K, T>: KeyValueStore<K, SetHandle<T>> {
    /// Returns the set under `key`, attaching a new empty set if there is none.
    fn get_or_empty(&self, key: &K) -> impl Future<Output = Result<SetHandle<T>>> + Send;

    /// Returns whether an explicitly empty set survives being stored.
    ///
    /// Stores that drop empty collections (and therefore cannot tell an empty set
    /// from an absent key) return `false`.
    fn supports_empty_sets(&self) -> bool {
        false
    }
}
