// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Bringing a cache store up to date with its source.

use std::{collections::HashSet, hash::Hash, time::Duration};

use futures::{TryStreamExt, future};
use larder_store::{Error, KeyValueStore, Result};
use tick::{Clock, FutureExt};

/// Makes a target store consistent with a source store.
///
/// Used by [`SynchronizedCache`](crate::SynchronizedCache) to fill its cache before
/// the first operation and after the cache has fallen out of sync.
pub trait Synchronizer<K, V>: Send + Sync {
    /// Checks that the stores offer what this synchronizer needs.
    ///
    /// Called once when a strategy is built, so a mismatch surfaces before any data moves.
    ///
    /// # Errors
    ///
    /// Returns a [`Configuration`](larder_store::ErrorKind::Configuration) error when
    /// the stores cannot be synchronized.
    fn check<S, T>(&self, source: &S, target: &T) -> Result<()>
    where
        S: KeyValueStore<K, V>,
        T: KeyValueStore<K, V>,
    {
        let _ = (source, target);
        Ok(())
    }

    /// Makes `target` hold the same keys and values as `source`.
    fn synchronize<S, T>(&self, source: &S, target: &T) -> impl Future<Output = Result<()>> + Send
    where
        S: KeyValueStore<K, V>,
        T: KeyValueStore<K, V>;
}

/// Synchronizes by removing stale target keys and overwriting every source key.
///
/// Both stores must be able to enumerate their keys. Each run is bounded by a
/// time budget; a run that exceeds it fails with
/// [`Timeout`](larder_store::ErrorKind::Timeout) and leaves the target partially updated.
///
/// Writers that touch the stores while a run is in progress get best-effort
/// consistency only.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use larder::{OverwriteSynchronizer, Synchronizer};
/// use larder_store::{KeyValueStore, MemoryStore};
/// use tick::Clock;
/// # futures::executor::block_on(async {
///
/// let clock = Clock::new_frozen();
/// let source = MemoryStore::<&str, i32>::new(clock.clone());
/// let target = MemoryStore::<&str, i32>::new(clock.clone());
/// source.try_add(&"fresh", 1, false).await?;
/// target.try_add(&"stale", 2, false).await?;
///
/// OverwriteSynchronizer::new(clock, Duration::from_secs(30))
///     .synchronize(&source, &target)
///     .await?;
///
/// assert_eq!(target.get(&"fresh").await?, Some(1));
/// assert!(!target.contains_key(&"stale").await?);
/// # Ok::<(), larder_store::Error>(())
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct OverwriteSynchronizer {
    clock: Clock,
    timeout: Duration,
}

impl OverwriteSynchronizer {
    /// Creates a synchronizer whose runs are limited to `timeout`.
    #[must_use]
    pub fn new(clock: Clock, timeout: Duration) -> Self {
        Self { clock, timeout }
    }

    /// The time budget of one run.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn overwrite<K, V, S, T>(source: &S, target: &T) -> Result<()>
    where
        K: Eq + Hash + Send + Sync,
        V: Send + Sync,
        S: KeyValueStore<K, V>,
        T: KeyValueStore<K, V>,
    {
        let (Some(source_keys), Some(target_keys)) = (source.as_keys_enumerable(), target.as_keys_enumerable()) else {
            return Err(enumeration_required());
        };

        let keys: HashSet<K> = source_keys.keys().try_collect().await?;
        let stale: Vec<K> = target_keys
            .keys()
            .try_filter(|key| future::ready(!keys.contains(key)))
            .try_collect()
            .await?;

        for key in &stale {
            target.try_remove(key).await?;
        }

        for key in &keys {
            if let Some(value) = source.get(key).await? {
                target.try_add(key, value, true).await?;
            }
        }
        Ok(())
    }
}

impl<K, V> Synchronizer<K, V> for OverwriteSynchronizer
where
    K: Eq + Hash + Send + Sync,
    V: Send + Sync,
{
    fn check<S, T>(&self, source: &S, target: &T) -> Result<()>
    where
        S: KeyValueStore<K, V>,
        T: KeyValueStore<K, V>,
    {
        if source.as_keys_enumerable().is_none() || target.as_keys_enumerable().is_none() {
            return Err(enumeration_required());
        }
        Ok(())
    }

    async fn synchronize<S, T>(&self, source: &S, target: &T) -> Result<()>
    where
        S: KeyValueStore<K, V>,
        T: KeyValueStore<K, V>,
    {
        Self::overwrite::<K, V, S, T>(source, target)
            .timeout(&self.clock, self.timeout)
            .await
            .map_err(Error::timeout)?
    }
}

fn enumeration_required() -> Error {
    Error::configuration("the source and the cache must support key enumeration to be synchronized")
}
