// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

/// Behavior switches shared by the on-demand strategies.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use larder::CacheOptions;
///
/// let options = CacheOptions::new()
///     .with_cache_expiration(Duration::from_secs(60))
///     .with_cache_fault_tolerance(Duration::from_secs(5))
///     .with_throw_on_cache_write_errors(false);
///
/// assert_eq!(options.cache_expiration, Some(Duration::from_secs(60)));
/// assert!(!options.throw_on_cache_write_errors);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(default))]
#[non_exhaustive]
pub struct CacheOptions {
    /// Lifetime of entries written into the cache. `None` or zero keeps entries until evicted.
    ///
    /// Requires a cache store with key expiration support.
    pub cache_expiration: Option<Duration>,

    /// Extra lifetime granted to cache entries whose expiration mirrors an explicit
    /// source expiration, so the cache never expires strictly before the source.
    pub cache_fault_tolerance: Duration,

    /// Whether a failed cache write fails the whole operation.
    ///
    /// When `false`, the failure is logged and the source-derived result is returned.
    pub throw_on_cache_write_errors: bool,

    /// Whether a value confirmed absent in the source is cached as a negative result.
    pub cache_missing_values: bool,

    /// Whether removing a key also evicts it from the cache.
    ///
    /// When `false`, a removed key stays readable from the cache until it expires.
    pub invalidate_cache_on_remove: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            cache_expiration: None,
            cache_fault_tolerance: Duration::ZERO,
            throw_on_cache_write_errors: true,
            cache_missing_values: false,
            invalidate_cache_on_remove: false,
        }
    }
}

impl CacheOptions {
    /// Creates the default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets [`cache_expiration`](Self::cache_expiration).
    #[must_use]
    pub fn with_cache_expiration(mut self, expiration: Duration) -> Self {
        self.cache_expiration = Some(expiration);
        self
    }

    /// Sets [`cache_fault_tolerance`](Self::cache_fault_tolerance).
    #[must_use]
    pub fn with_cache_fault_tolerance(mut self, tolerance: Duration) -> Self {
        self.cache_fault_tolerance = tolerance;
        self
    }

    /// Sets [`throw_on_cache_write_errors`](Self::throw_on_cache_write_errors).
    #[must_use]
    pub fn with_throw_on_cache_write_errors(mut self, throw: bool) -> Self {
        self.throw_on_cache_write_errors = throw;
        self
    }

    /// Sets [`cache_missing_values`](Self::cache_missing_values).
    #[must_use]
    pub fn with_cache_missing_values(mut self, cache: bool) -> Self {
        self.cache_missing_values = cache;
        self
    }

    /// Sets [`invalidate_cache_on_remove`](Self::invalidate_cache_on_remove).
    #[must_use]
    pub fn with_invalidate_cache_on_remove(mut self, invalidate: bool) -> Self {
        self.invalidate_cache_on_remove = invalidate;
        self
    }

    /// The effective cache lifetime; a zero duration counts as none.
    pub(crate) fn expiration(&self) -> Option<Duration> {
        self.cache_expiration.filter(|expiration| !expiration.is_zero())
    }
}
