// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Key expiration across a source and its cache.
//!
//! The source always receives the requested expiration. The cache only follows
//! when the requested lifetime is shorter than its own baseline, and then keeps
//! the entry for the fault tolerance window beyond the source deadline.

use std::time::{Duration, SystemTime};

use larder_store::{Error, ExpirableKeyStore, Result};
use tick::Clock;

use crate::{
    policy::CachePolicy,
    telemetry::{CacheActivity, CacheOperation},
};

/// The expirable views of a source and its cache.
pub(crate) struct ExpirablePair<'a, K> {
    pub(crate) source: Option<&'a dyn ExpirableKeyStore<K>>,
    pub(crate) cache: Option<&'a dyn ExpirableKeyStore<K>>,
}

impl<'a, K: Sync> ExpirablePair<'a, K> {
    pub(crate) fn both(&self) -> Option<(&'a dyn ExpirableKeyStore<K>, &'a dyn ExpirableKeyStore<K>)> {
        self.source.zip(self.cache)
    }

    fn require(&self) -> Result<(&'a dyn ExpirableKeyStore<K>, &'a dyn ExpirableKeyStore<K>)> {
        self.both()
            .ok_or_else(|| Error::unsupported("key expiration requires both the source and the cache to support it"))
    }

    /// Whether a cache entry should follow an expiration `remaining` from now.
    fn cache_follows(policy: &CachePolicy, remaining: Duration) -> bool {
        policy.options.expiration().is_none_or(|baseline| remaining < baseline)
    }

    pub(crate) async fn set_relative(&self, policy: &CachePolicy, key: &K, ttl: Duration) -> Result<bool> {
        let (source, cache) = self.require()?;
        let existed = source
            .set_relative_expiration(key, ttl)
            .await
            .map_err(Error::source_write)?;

        if existed && Self::cache_follows(policy, ttl) {
            let skewed = ttl.saturating_add(policy.options.cache_fault_tolerance);
            policy
                .write_cache(CacheOperation::SetExpiration, cache.set_relative_expiration(key, skewed))
                .await?;
        }
        Ok(existed)
    }

    pub(crate) async fn set_absolute(&self, policy: &CachePolicy, clock: &Clock, key: &K, at: SystemTime) -> Result<bool> {
        let (source, cache) = self.require()?;
        let existed = source
            .set_absolute_expiration(key, at)
            .await
            .map_err(Error::source_write)?;

        let remaining = at.duration_since(clock.system_time()).unwrap_or(Duration::ZERO);
        if existed && Self::cache_follows(policy, remaining) {
            let skewed = at
                .checked_add(policy.options.cache_fault_tolerance)
                .unwrap_or(at);
            policy
                .write_cache(CacheOperation::SetExpiration, cache.set_absolute_expiration(key, skewed))
                .await?;
        }
        Ok(existed)
    }

    pub(crate) async fn remove(&self, policy: &CachePolicy, key: &K) -> Result<bool> {
        let (source, cache) = self.require()?;
        let existed = source.remove_expiration(key).await.map_err(Error::source_write)?;

        if existed {
            // A cache entry never outlives its baseline, even when the source one becomes persistent.
            let rearm = async {
                match policy.options.expiration() {
                    Some(baseline) => cache.set_relative_expiration(key, baseline).await,
                    None => cache.remove_expiration(key).await,
                }
            };
            if policy
                .write_cache(CacheOperation::RemoveExpiration, rearm)
                .await?
                .written()
                .is_some()
            {
                policy.record(CacheOperation::RemoveExpiration, CacheActivity::Written);
            }
        }
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;
    use larder_store::{ErrorKind, KeyValueStore, MemoryStore, testing::MockStore};
    use tick::ClockControl;

    use super::*;
    use crate::{CacheOptions, CacheTelemetry};

    fn policy(options: CacheOptions) -> CachePolicy {
        CachePolicy::new(options, CacheTelemetry::default(), "test")
    }

    #[test]
    fn missing_capability_is_unsupported() {
        let source = MockStore::<&str, i32>::new(Clock::new_frozen()).without_expiration();
        let cache = MemoryStore::<&str, i32>::new(Clock::new_frozen());
        let pair = ExpirablePair {
            source: source.as_expirable(),
            cache: cache.as_expirable(),
        };

        let error = block_on(pair.set_relative(&policy(CacheOptions::new()), &"k", Duration::from_secs(1))).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn shorter_ttl_reaches_cache_with_tolerance() {
        block_on(async {
            let clock = ClockControl::new().to_clock();
            let source = MemoryStore::<&str, i32>::new(clock.clone());
            let cache = MemoryStore::<&str, i32>::new(clock.clone());
            source.try_add(&"k", 1, false).await.unwrap();
            cache.try_add(&"k", 1, false).await.unwrap();

            let options = CacheOptions::new()
                .with_cache_expiration(Duration::from_secs(60))
                .with_cache_fault_tolerance(Duration::from_secs(2));
            let pair = ExpirablePair {
                source: source.as_expirable(),
                cache: cache.as_expirable(),
            };

            assert!(pair.set_relative(&policy(options), &"k", Duration::from_secs(10)).await.unwrap());

            let now = clock.system_time();
            assert_eq!(source.expires_at(&"k"), Some(now + Duration::from_secs(10)));
            assert_eq!(cache.expires_at(&"k"), Some(now + Duration::from_secs(12)));
        });
    }

    #[test]
    fn longer_ttl_leaves_cache_baseline() {
        block_on(async {
            let clock = Clock::new_frozen();
            let source = MemoryStore::<&str, i32>::new(clock.clone());
            let cache = MemoryStore::<&str, i32>::new(clock.clone());
            source.try_add(&"k", 1, false).await.unwrap();
            cache.try_add(&"k", 1, false).await.unwrap();

            let options = CacheOptions::new().with_cache_expiration(Duration::from_secs(5));
            let pair = ExpirablePair {
                source: source.as_expirable(),
                cache: cache.as_expirable(),
            };

            pair.set_relative(&policy(options), &"k", Duration::from_secs(600)).await.unwrap();
            assert!(source.expires_at(&"k").is_some());
            assert_eq!(cache.expires_at(&"k"), None);
        });
    }

    #[test]
    fn removing_expiration_rearms_cache_baseline() {
        block_on(async {
            let clock = Clock::new_frozen();
            let source = MemoryStore::<&str, i32>::new(clock.clone());
            let cache = MemoryStore::<&str, i32>::new(clock.clone());
            source.try_add(&"k", 1, false).await.unwrap();
            cache.try_add(&"k", 1, false).await.unwrap();

            let options = CacheOptions::new().with_cache_expiration(Duration::from_secs(30));
            let pair = ExpirablePair {
                source: source.as_expirable(),
                cache: cache.as_expirable(),
            };

            pair.set_relative(&policy(options.clone()), &"k", Duration::from_secs(1)).await.unwrap();
            assert!(pair.remove(&policy(options), &"k").await.unwrap());

            assert_eq!(source.expires_at(&"k"), None);
            assert_eq!(cache.expires_at(&"k"), Some(clock.system_time() + Duration::from_secs(30)));
        });
    }
}
