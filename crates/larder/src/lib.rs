// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Caching strategies that put a cache store in front of an authoritative source store.
//!
//! Stores are anything implementing the [`larder_store`] contracts. A strategy is
//! built around a source and a cache and implements the same contracts itself, so
//! it can be used wherever a plain store is expected.
//!
//! | Strategy | Reads | Writes |
//! |---|---|---|
//! | [`OnDemandCacheMap`], [`OnDemandCacheSetMap`] | cache, then source on a miss (populating the cache) | source, then cache |
//! | [`SynchronizedCache`] | cache only, after a full synchronization | source, then cache; a failed cache write triggers resynchronization |
//! | [`DistributedCacheMap`], [`DistributedCacheSetMap`] | as on-demand | as on-demand, then an invalidation event to every instance |
//!
//! The source always wins. A cache write is only attempted after the source
//! write succeeded, and a failed cache write never undoes it; whether it fails the
//! call is controlled by [`CacheOptions::throw_on_cache_write_errors`].
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//!
//! use larder::{CacheOptions, OnDemandCacheMap};
//! use larder_store::{KeyValueStore, MemoryStore};
//! use tick::ClockControl;
//! # futures::executor::block_on(async {
//!
//! let control = ClockControl::new();
//! let clock = control.to_clock();
//! let source = MemoryStore::<String, i32>::new(clock.clone());
//! let cache = MemoryStore::<String, i32>::new(clock.clone());
//!
//! let map = OnDemandCacheMap::builder(clock, source.clone(), cache.clone())
//!     .options(CacheOptions::new().with_cache_expiration(Duration::from_millis(100)))
//!     .build()?;
//!
//! let key = "z".to_string();
//! map.try_add(&key, 3, false).await?;
//! assert!(cache.contains_key(&key).await?);
//!
//! control.advance(Duration::from_millis(150));
//! assert!(!cache.contains_key(&key).await?);
//! assert!(source.contains_key(&key).await?);
//! # Ok::<(), larder_store::Error>(())
//! # });
//! ```

mod distributed;
mod expiration;
mod on_demand;
mod options;
mod policy;
mod synchronized;
mod synchronizer;
mod telemetry;
#[cfg(any(test, feature = "test-util"))]
#[cfg_attr(docsrs, doc(cfg(feature = "test-util")))]
pub mod testing;

#[doc(inline)]
pub use distributed::{
    DistributedCache, DistributedCacheBuilder, DistributedCacheMap, DistributedCacheSetMap, Notifier, NotifyWriteMap,
    NotifyWriteSet, NotifyWriteSetMap, SynchronizationEvent,
};
#[doc(inline)]
pub use on_demand::{
    AddTrigger, LazySet, OnDemandCacheBuilder, OnDemandCacheMap, OnDemandCacheSet, OnDemandCacheSetMap,
    OnDemandCacheSetMapBuilder, TriggeredSet,
};
#[doc(inline)]
pub use options::CacheOptions;
#[doc(inline)]
pub use synchronized::{CacheFailedListener, SyncState, SynchronizedCache, SynchronizedCacheBuilder};
#[doc(inline)]
pub use synchronizer::{OverwriteSynchronizer, Synchronizer};
#[doc(inline)]
pub use telemetry::CacheTelemetry;
