// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Integration tests for the eagerly synchronized cache.

mod common;

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    task::Poll,
    time::Duration,
};

use common::block_on;
use larder::{OverwriteSynchronizer, SyncState, SynchronizedCache, Synchronizer, testing::LogCapture};
use larder_store::{
    ErrorKind, ExpirableKeyStore, KeyValueStore, MemoryStore, PropertyStore, Result,
    testing::{MockStore, StoreOp},
};
use tick::{Clock, ClockControl};

type TestResult = Result<()>;
type Mock = MockStore<String, i32>;
type Cache = SynchronizedCache<String, i32, Mock, Mock, OverwriteSynchronizer>;

fn key(name: &str) -> String {
    name.to_string()
}

fn synchronized(clock: &Clock, source: &Mock, cache: &Mock) -> Cache {
    SynchronizedCache::builder(
        source.clone(),
        cache.clone(),
        OverwriteSynchronizer::new(clock.clone(), Duration::from_secs(30)),
    )
    .build()
    .unwrap()
}

async fn seeded(clock: &Clock) -> Result<(Mock, Mock)> {
    let source = Mock::new(clock.clone());
    let cache = Mock::new(clock.clone());
    source.inner().try_add(&key("a"), 1, false).await?;
    source.inner().try_add(&key("b"), 2, false).await?;
    cache.inner().try_add(&key("stale"), 9, false).await?;
    Ok((source, cache))
}

/// Counts synchronization runs and yields once per run, so concurrent callers get to wait on it.
struct CountingSynchronizer {
    inner: OverwriteSynchronizer,
    runs: Arc<AtomicUsize>,
}

impl CountingSynchronizer {
    fn new(clock: &Clock) -> Self {
        Self {
            inner: OverwriteSynchronizer::new(clock.clone(), Duration::from_secs(30)),
            runs: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Synchronizer<String, i32> for CountingSynchronizer {
    async fn synchronize<S, T>(&self, source: &S, target: &T) -> Result<()>
    where
        S: KeyValueStore<String, i32>,
        T: KeyValueStore<String, i32>,
    {
        self.runs.fetch_add(1, Ordering::SeqCst);
        yield_once().await;
        self.inner.synchronize(source, target).await
    }
}

async fn yield_once() {
    let mut yielded = false;
    futures::future::poll_fn(|cx| {
        if yielded {
            Poll::Ready(())
        } else {
            yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    })
    .await;
}

#[test]
fn first_query_synchronizes_the_cache() -> TestResult {
    block_on(async {
        let clock = Clock::new_frozen();
        let (source, cache) = seeded(&clock).await?;
        let synchronized = synchronized(&clock, &source, &cache);
        assert_eq!(synchronized.state(), SyncState::Unsynchronized);

        assert_eq!(synchronized.get(&key("a")).await?, Some(1));

        assert_eq!(synchronized.state(), SyncState::Synchronized);
        assert_eq!(cache.inner().len(), 2);
        assert_eq!(cache.inner().get(&key("b")).await?, Some(2));
        assert!(!cache.inner().contains_key(&key("stale")).await?);
        Ok(())
    })
}

#[test]
fn concurrent_first_callers_share_one_synchronization() -> TestResult {
    block_on(async {
        let clock = Clock::new_frozen();
        let (source, cache) = seeded(&clock).await?;
        let synchronizer = CountingSynchronizer::new(&clock);
        let runs = Arc::clone(&synchronizer.runs);
        let synchronized = SynchronizedCache::builder(source, cache.clone(), synchronizer).build()?;

        let (a, b, found, explicit) = futures::join!(
            synchronized.get(&key("a")),
            synchronized.get(&key("b")),
            synchronized.contains_key(&key("a")),
            synchronized.synchronize(),
        );

        assert_eq!(a?, Some(1));
        assert_eq!(b?, Some(2));
        assert!(found?);
        explicit?;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!cache.inner().contains_key(&key("stale")).await?);
        Ok(())
    })
}

#[test]
fn queries_never_reach_the_source_once_synchronized() -> TestResult {
    block_on(async {
        let clock = Clock::new_frozen();
        let (source, cache) = seeded(&clock).await?;
        let synchronized = synchronized(&clock, &source, &cache);
        synchronized.synchronize().await?;
        source.clear_operations();

        assert_eq!(synchronized.get(&key("a")).await?, Some(1));
        assert!(synchronized.contains_key(&key("b")).await?);
        assert_eq!(synchronized.get(&key("missing")).await?, None);

        assert!(source.operations().is_empty());
        Ok(())
    })
}

#[test]
fn writes_reach_source_then_cache() -> TestResult {
    block_on(async {
        let clock = Clock::new_frozen();
        let (source, cache) = seeded(&clock).await?;
        let synchronized = synchronized(&clock, &source, &cache);

        assert!(synchronized.try_add(&key("c"), 3, false).await?);
        assert!(!synchronized.try_add(&key("a"), 10, false).await?);
        assert!(synchronized.try_remove(&key("b")).await?);

        assert_eq!(source.inner().get(&key("c")).await?, Some(3));
        assert_eq!(cache.inner().get(&key("c")).await?, Some(3));
        assert_eq!(cache.inner().get(&key("a")).await?, Some(1));
        assert!(!cache.inner().contains_key(&key("b")).await?);
        assert_eq!(synchronized.state(), SyncState::Synchronized);
        Ok(())
    })
}

#[test]
fn source_write_failure_leaves_cache_untouched() {
    block_on(async {
        let clock = Clock::new_frozen();
        let (source, cache) = seeded(&clock).await.unwrap();
        let synchronized = synchronized(&clock, &source, &cache);
        synchronized.synchronize().await.unwrap();
        cache.clear_operations();
        source.fail_when(StoreOp::is_write);

        let error = synchronized.try_add(&key("c"), 3, false).await.unwrap_err();

        assert_eq!(error.kind(), ErrorKind::SourceWrite);
        assert_eq!(cache.write_count(), 0);
        assert_eq!(synchronized.state(), SyncState::Synchronized);
    });
}

#[test]
fn failed_cache_write_desynchronizes_and_recovers() -> TestResult {
    let capture = LogCapture::new();
    let _guard = tracing::subscriber::set_default(capture.subscriber());

    block_on(async {
        let clock = Clock::new_frozen();
        let (source, cache) = seeded(&clock).await?;
        let failures = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&failures);
        let synchronized = SynchronizedCache::builder(
            source.clone(),
            cache.clone(),
            OverwriteSynchronizer::new(clock.clone(), Duration::from_secs(30)),
        )
        .on_cache_failed(move |error| {
            assert_eq!(error.kind(), ErrorKind::CacheWrite);
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .build()?;
        synchronized.synchronize().await?;

        cache.fail_when(StoreOp::is_write);
        assert!(synchronized.try_add(&key("c"), 3, false).await?);

        assert_eq!(synchronized.state(), SyncState::Unsynchronized);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert_eq!(capture.count("cache.desynchronized"), 1);
        assert_eq!(source.inner().get(&key("c")).await?, Some(3));

        cache.clear_failures();
        assert_eq!(synchronized.get(&key("c")).await?, Some(3));
        assert_eq!(synchronized.state(), SyncState::Synchronized);
        Ok(())
    })
}

#[test]
fn cache_disagreeing_with_source_desynchronizes() -> TestResult {
    block_on(async {
        let clock = Clock::new_frozen();
        let (source, cache) = seeded(&clock).await?;
        let synchronized = synchronized(&clock, &source, &cache);
        synchronized.synchronize().await?;

        // Only the cache knows about this key, so it rejects the add the source accepts.
        cache.inner().try_add(&key("drift"), 5, false).await?;
        assert!(synchronized.try_add(&key("drift"), 6, false).await?);
        assert_eq!(synchronized.state(), SyncState::Unsynchronized);

        assert_eq!(synchronized.get(&key("drift")).await?, Some(6));
        Ok(())
    })
}

#[test]
fn failed_synchronization_is_reported_and_retried() -> TestResult {
    let capture = LogCapture::new();
    let _guard = tracing::subscriber::set_default(capture.subscriber());

    block_on(async {
        let clock = Clock::new_frozen();
        let (source, cache) = seeded(&clock).await?;
        let synchronized = synchronized(&clock, &source, &cache);
        source.fail_when(|op| matches!(op, StoreOp::Keys));

        assert!(synchronized.get(&key("a")).await.is_err());
        assert_eq!(synchronized.state(), SyncState::Unsynchronized);
        assert_eq!(capture.count("cache.desynchronized"), 1);

        source.clear_failures();
        assert_eq!(synchronized.get(&key("a")).await?, Some(1));
        Ok(())
    })
}

#[test]
fn stores_must_enumerate_keys() {
    let clock = Clock::new_frozen();
    let source = Mock::new(clock.clone()).without_key_enumeration();
    let cache = Mock::new(clock.clone());

    let error = SynchronizedCache::builder(source, cache, OverwriteSynchronizer::new(clock, Duration::from_secs(1)))
        .build()
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Configuration);
}

#[test]
fn expiration_is_applied_to_both_stores() -> TestResult {
    block_on(async {
        let clock = ClockControl::new().to_clock();
        let (source, cache) = seeded(&clock).await?;
        let synchronized = synchronized(&clock, &source, &cache);
        let expirable = synchronized.as_expirable().expect("both stores expire keys");

        assert!(expirable.set_relative_expiration(&key("a"), Duration::from_secs(10)).await?);

        let at = clock.system_time() + Duration::from_secs(10);
        assert_eq!(source.inner().expires_at(&key("a")), Some(at));
        assert_eq!(cache.inner().expires_at(&key("a")), Some(at));

        assert!(ExpirableKeyStore::remove_expiration(&synchronized, &key("a")).await?);
        assert_eq!(cache.inner().expires_at(&key("a")), None);
        Ok(())
    })
}

#[test]
fn properties_are_written_through() -> TestResult {
    block_on(async {
        let clock = Clock::new_frozen();
        let source = MemoryStore::<String, HashMap<String, i32>>::new(clock.clone());
        let cache = MemoryStore::<String, HashMap<String, i32>>::new(clock.clone());
        source
            .try_add(&key("user"), HashMap::from([("age".to_string(), 30)]), false)
            .await?;
        let synchronized = SynchronizedCache::builder(
            source.clone(),
            cache.clone(),
            OverwriteSynchronizer::new(clock, Duration::from_secs(30)),
        )
        .build()?;

        assert_eq!(synchronized.get_property(&key("user"), "age").await?, Some(30));
        synchronized.set_property(&key("user"), "score", 7).await?;
        synchronized
            .merge(&key("user"), HashMap::from([("age".to_string(), 31)]))
            .await?;

        assert_eq!(source.get_property(&key("user"), "score").await?, Some(7));
        assert_eq!(cache.get_property(&key("user"), "score").await?, Some(7));
        assert_eq!(cache.get_property(&key("user"), "age").await?, Some(31));
        Ok(())
    })
}
