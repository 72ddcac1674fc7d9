// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The key/value contract and its optional capabilities.
//!
//! [`KeyValueStore`] is the one contract every store implements. Stores that can
//! expire keys or enumerate their key set advertise it by overriding
//! [`KeyValueStore::as_expirable`] or [`KeyValueStore::as_keys_enumerable`], which lets
//! strategies detect the capability at construction time without knowing the
//! concrete store type.

use std::time::{Duration, SystemTime};

use futures::{future::BoxFuture, stream::BoxStream};

use crate::Result;

/// A store mapping keys to values.
///
/// All methods are asynchronous and fallible. Implementations are expected to be
/// safe for concurrent use; callers never hold locks across calls.
///
/// # Examples
///
/// ```
/// use larder_store::{KeyValueStore, MemoryStore};
/// use tick::Clock;
/// # futures::executor::block_on(async {
///
/// let store = MemoryStore::<String, i32>::new(Clock::new_frozen());
/// assert!(store.try_add(&"a".to_string(), 1, false).await?);
/// assert!(!store.try_add(&"a".to_string(), 2, false).await?);
/// assert_eq!(store.get(&"a".to_string()).await?, Some(1));
/// # Ok::<(), larder_store::Error>(())
/// # });
/// ```
pub trait KeyValueStore<K, V>: Send + Sync {
    /// Adds a value under `key`.
    ///
    /// When `overwrite` is `false` and the key already exists, nothing is written
    /// and `false` is returned.
    fn try_add(&self, key: &K, value: V, overwrite: bool) -> impl Future<Output = Result<bool>> + Send;

    /// Returns the value stored under `key`, if any.
    fn get(&self, key: &K) -> impl Future<Output = Result<Option<V>>> + Send;

    /// Removes `key`, returning whether it existed.
    fn try_remove(&self, key: &K) -> impl Future<Output = Result<bool>> + Send;

    /// Returns whether `key` exists.
    fn contains_key(&self, key: &K) -> impl Future<Output = Result<bool>> + Send;

    /// Returns the key expiration capability, if this store has it.
    fn as_expirable(&self) -> Option<&dyn ExpirableKeyStore<K>> {
        None
    }

    /// Returns the key enumeration capability, if this store has it.
    fn as_keys_enumerable(&self) -> Option<&dyn KeysEnumerable<K>> {
        None
    }
}

/// Key-level time-to-live support.
///
/// Every method returns whether the key existed when the expiration was changed.
pub trait ExpirableKeyStore<K>: Send + Sync {
    /// Expires `key` once `ttl` has elapsed from now.
    fn set_relative_expiration<'a>(&'a self, key: &'a K, ttl: Duration) -> BoxFuture<'a, Result<bool>>;

    /// Expires `key` at the given point in time.
    fn set_absolute_expiration<'a>(&'a self, key: &'a K, expires_at: SystemTime) -> BoxFuture<'a, Result<bool>>;

    /// Makes `key` persistent again.
    fn remove_expiration<'a>(&'a self, key: &'a K) -> BoxFuture<'a, Result<bool>>;
}

/// Enumeration of every key held by a store.
pub trait KeysEnumerable<K>: Send + Sync {
    /// Streams the keys currently present in the store.
    ///
    /// The stream reflects a point-in-time view; keys written concurrently may or
    /// may not be observed.
    fn keys(&self) -> BoxStream<'_, Result<K>>;
}
