// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Structured logging and metrics for caching strategies.
//!
//! Every strategy reports what it did as a `(cache name, operation, activity)`
//! triple. Routine activities (hits, misses, population) are logged only when
//! logging is enabled. Failures that a strategy tolerates are always logged
//! together with the error that caused them: write, publish and synchronization
//! failures at `WARN`, once per failing call, and cache read failures at `DEBUG`,
//! since the read falls back to the source and a write failure usually follows.

use std::sync::Arc;

#[cfg(any(feature = "metrics", test))]
use opentelemetry::{KeyValue, metrics::Counter};
use tracing::Level;

pub(crate) mod attributes;
#[cfg(any(feature = "metrics", test))]
pub(crate) mod metrics;
#[cfg(test)]
pub(crate) mod testing;

/// Telemetry sink shared by caching strategies.
///
/// Cloning is cheap; clones report into the same instruments.
///
/// # Examples
///
/// ```
/// use larder::CacheTelemetry;
///
/// // Log hits, misses and population in addition to failures.
/// let telemetry = CacheTelemetry::new(true);
/// assert!(telemetry.logging_enabled());
/// ```
#[derive(Clone, Debug, Default)]
pub struct CacheTelemetry {
    inner: Arc<CacheTelemetryInner>,
}

#[derive(Debug, Default)]
struct CacheTelemetryInner {
    logging_enabled: bool,
    #[cfg(any(feature = "metrics", test))]
    event_counter: Option<Counter<u64>>,
}

impl CacheTelemetry {
    /// Creates a telemetry sink without metrics.
    ///
    /// When `logging_enabled` is `false`, only failures are logged.
    #[must_use]
    pub fn new(logging_enabled: bool) -> Self {
        Self {
            inner: Arc::new(CacheTelemetryInner {
                logging_enabled,
                #[cfg(any(feature = "metrics", test))]
                event_counter: None,
            }),
        }
    }

    /// Creates a telemetry sink that also counts every activity on a meter from `provider`.
    #[cfg(any(feature = "metrics", test))]
    #[cfg_attr(docsrs, doc(cfg(feature = "metrics")))]
    #[must_use]
    pub fn with_metrics(logging_enabled: bool, provider: &dyn opentelemetry::metrics::MeterProvider) -> Self {
        let meter = metrics::create_meter(provider);
        Self {
            inner: Arc::new(CacheTelemetryInner {
                logging_enabled,
                event_counter: Some(metrics::create_event_counter(&meter)),
            }),
        }
    }

    /// Returns whether routine activities are logged.
    #[must_use]
    pub fn logging_enabled(&self) -> bool {
        self.inner.logging_enabled
    }

    /// Records a routine activity.
    pub(crate) fn record(&self, cache_name: &'static str, operation: CacheOperation, activity: CacheActivity) {
        self.count(cache_name, operation, activity);

        if self.inner.logging_enabled {
            Self::emit(cache_name, operation, activity);
        }
    }

    /// Records a tolerated failure. Failures are logged regardless of the logging switch.
    pub(crate) fn record_failure(
        &self,
        cache_name: &'static str,
        operation: CacheOperation,
        activity: CacheActivity,
        error: &dyn std::error::Error,
    ) {
        self.count(cache_name, operation, activity);

        let op = operation.as_str();
        let act = activity.as_str();

        macro_rules! emit_failure {
            ($level:ident) => {
                tracing::$level!(
                    cache.name = cache_name,
                    cache.operation = op,
                    cache.activity = act,
                    error = %error,
                    "cache.event"
                )
            };
        }

        if activity.level() == Level::WARN {
            emit_failure!(warn);
        } else {
            emit_failure!(debug);
        }
    }

    #[cfg_attr(
        not(any(feature = "metrics", test)),
        expect(unused_variables, reason = "attributes are only needed for metrics")
    )]
    fn count(&self, cache_name: &'static str, operation: CacheOperation, activity: CacheActivity) {
        #[cfg(any(feature = "metrics", test))]
        if let Some(counter) = &self.inner.event_counter {
            counter.add(
                1,
                &[
                    KeyValue::new(attributes::CACHE_NAME, cache_name),
                    KeyValue::new(attributes::CACHE_OPERATION_NAME, operation.as_str()),
                    KeyValue::new(attributes::CACHE_ACTIVITY_NAME, activity.as_str()),
                ],
            );
        }
    }

    fn emit(cache_name: &'static str, operation: CacheOperation, activity: CacheActivity) {
        let op = operation.as_str();
        let act = activity.as_str();

        // Tracing levels must be constant, hence one macro call per level.
        macro_rules! emit_event {
            ($level:ident) => {
                tracing::$level!(cache.name = cache_name, cache.operation = op, cache.activity = act, "cache.event")
            };
        }

        let level = activity.level();
        if level == Level::WARN {
            emit_event!(warn);
        } else if level == Level::INFO {
            emit_event!(info);
        } else {
            emit_event!(debug);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CacheOperation {
    Get,
    ContainsKey,
    TryAdd,
    TryRemove,
    SetExpiration,
    RemoveExpiration,
    SetProperty,
    GetProperty,
    Merge,
    SetAdd,
    SetRemove,
    SetRead,
    Synchronize,
    Publish,
    Invalidate,
}

impl CacheOperation {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Get => "cache.get",
            Self::ContainsKey => "cache.contains_key",
            Self::TryAdd => "cache.try_add",
            Self::TryRemove => "cache.try_remove",
            Self::SetExpiration => "cache.set_expiration",
            Self::RemoveExpiration => "cache.remove_expiration",
            Self::SetProperty => "cache.set_property",
            Self::GetProperty => "cache.get_property",
            Self::Merge => "cache.merge",
            Self::SetAdd => "cache.set_add",
            Self::SetRemove => "cache.set_remove",
            Self::SetRead => "cache.set_read",
            Self::Synchronize => "cache.synchronize",
            Self::Publish => "cache.publish",
            Self::Invalidate => "cache.invalidate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CacheActivity {
    Hit,
    Miss,
    Populated,
    Written,
    Invalidated,
    Synchronized,
    Published,
    WriteFailed,
    ReadFailed,
    PublishFailed,
    Desynchronized,
}

impl CacheActivity {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "cache.hit",
            Self::Miss => "cache.miss",
            Self::Populated => "cache.populated",
            Self::Written => "cache.written",
            Self::Invalidated => "cache.invalidated",
            Self::Synchronized => "cache.synchronized",
            Self::Published => "cache.published",
            Self::WriteFailed => "cache.write_failed",
            Self::ReadFailed => "cache.read_failed",
            Self::PublishFailed => "cache.publish_failed",
            Self::Desynchronized => "cache.desynchronized",
        }
    }

    pub(crate) fn level(self) -> Level {
        match self {
            Self::Hit | Self::Miss | Self::Written | Self::Published | Self::ReadFailed => Level::DEBUG,
            Self::Populated | Self::Invalidated | Self::Synchronized => Level::INFO,
            Self::WriteFailed | Self::PublishFailed | Self::Desynchronized => Level::WARN,
        }
    }
}

#[cfg(test)]
mod tests {
    use opentelemetry::KeyValue;

    use super::*;
    use crate::{telemetry::testing::MetricTester, testing::LogCapture};

    #[test]
    fn activity_levels() {
        assert_eq!(CacheActivity::Hit.level(), Level::DEBUG);
        assert_eq!(CacheActivity::Populated.level(), Level::INFO);
        assert_eq!(CacheActivity::WriteFailed.level(), Level::WARN);
        assert_eq!(CacheActivity::ReadFailed.level(), Level::DEBUG);
        assert_eq!(CacheActivity::Desynchronized.level(), Level::WARN);
    }

    #[test]
    fn names_are_namespaced() {
        assert_eq!(CacheOperation::TryAdd.as_str(), "cache.try_add");
        assert_eq!(CacheActivity::PublishFailed.as_str(), "cache.publish_failed");
    }

    #[test]
    fn routine_events_respect_logging_switch() {
        let capture = LogCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());

        CacheTelemetry::new(false).record("quiet", CacheOperation::Get, CacheActivity::Hit);
        assert!(capture.output().is_empty());

        CacheTelemetry::new(true).record("loud", CacheOperation::Get, CacheActivity::Hit);
        capture.assert_contains("DEBUG");
        capture.assert_contains("loud");
        capture.assert_contains("cache.hit");
    }

    #[test]
    fn failures_are_logged_even_when_logging_is_disabled() {
        let capture = LogCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());

        let error = larder_store::Error::store("disk full");
        CacheTelemetry::new(false).record_failure("users", CacheOperation::TryAdd, CacheActivity::WriteFailed, &error);

        capture.assert_contains("WARN");
        capture.assert_contains("cache.write_failed");
        capture.assert_contains("disk full");
        assert_eq!(capture.count("cache.write_failed"), 1);
    }

    #[test]
    fn read_failures_are_logged_at_debug() {
        let capture = LogCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());

        let error = larder_store::Error::store("connection reset");
        CacheTelemetry::new(false).record_failure("users", CacheOperation::Get, CacheActivity::ReadFailed, &error);

        capture.assert_contains("DEBUG");
        capture.assert_contains("connection reset");
        assert_eq!(capture.count("WARN"), 0);
    }

    #[test]
    fn metrics_carry_name_operation_and_activity() {
        let tester = MetricTester::new();
        let telemetry = CacheTelemetry::with_metrics(false, tester.meter_provider());

        telemetry.record("users", CacheOperation::Get, CacheActivity::Miss);

        tester.assert_attributes_contain(&[
            KeyValue::new(attributes::CACHE_NAME, "users"),
            KeyValue::new(attributes::CACHE_OPERATION_NAME, "cache.get"),
            KeyValue::new(attributes::CACHE_ACTIVITY_NAME, "cache.miss"),
        ]);
    }
}
