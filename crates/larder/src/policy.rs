// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Failure policy for the cache side of a write-through operation.

use larder_store::{Error, ExpirableKeyStore, Result};

use crate::{
    CacheOptions, CacheTelemetry,
    telemetry::{CacheActivity, CacheOperation},
};

/// Outcome of a best-effort cache write.
#[derive(Debug)]
pub(crate) enum CacheWrite<T> {
    Written(T),
    /// The write failed and the failure was tolerated (and logged).
    Skipped,
}

impl<T> CacheWrite<T> {
    pub(crate) fn written(self) -> Option<T> {
        match self {
            Self::Written(value) => Some(value),
            Self::Skipped => None,
        }
    }
}

/// Options, telemetry and name of one strategy instance.
#[derive(Clone, Debug)]
pub(crate) struct CachePolicy {
    pub(crate) options: CacheOptions,
    pub(crate) telemetry: CacheTelemetry,
    pub(crate) name: &'static str,
}

impl CachePolicy {
    pub(crate) fn new(options: CacheOptions, telemetry: CacheTelemetry, name: &'static str) -> Self {
        Self { options, telemetry, name }
    }

    pub(crate) fn record(&self, operation: CacheOperation, activity: CacheActivity) {
        self.telemetry.record(self.name, operation, activity);
    }

    pub(crate) fn record_failure(&self, operation: CacheOperation, activity: CacheActivity, error: &Error) {
        self.telemetry.record_failure(self.name, operation, activity, error);
    }

    /// Runs a cache mutation that follows a successful source operation.
    ///
    /// A failure is logged once; it is returned as [`ErrorKind::CacheWrite`](larder_store::ErrorKind::CacheWrite)
    /// only when strict cache writes are configured.
    pub(crate) async fn write_cache<T>(
        &self,
        operation: CacheOperation,
        write: impl Future<Output = Result<T>>,
    ) -> Result<CacheWrite<T>> {
        match write.await {
            Ok(value) => Ok(CacheWrite::Written(value)),
            Err(error) => {
                self.record_failure(operation, CacheActivity::WriteFailed, &error);
                if self.options.throw_on_cache_write_errors {
                    Err(Error::cache_write(error))
                } else {
                    Ok(CacheWrite::Skipped)
                }
            }
        }
    }

    /// Runs a cache read; a failure is logged and reported as the default (a miss).
    pub(crate) async fn read_cache<T: Default>(&self, operation: CacheOperation, read: impl Future<Output = Result<T>>) -> T {
        match read.await {
            Ok(value) => value,
            Err(error) => {
                self.record_failure(operation, CacheActivity::ReadFailed, &error);
                T::default()
            }
        }
    }

    /// Applies the configured cache lifetime to a freshly written cache key.
    pub(crate) async fn arm_expiration<K>(&self, cache: Option<&dyn ExpirableKeyStore<K>>, key: &K) -> Result<()> {
        if let (Some(expiration), Some(cache)) = (self.options.expiration(), cache) {
            cache.set_relative_expiration(key, expiration).await?;
        }
        Ok(())
    }
}
