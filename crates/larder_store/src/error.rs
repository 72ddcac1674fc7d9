// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types shared by stores and caching strategies.

use std::fmt;

/// The category of an [`Error`].
///
/// Strategies classify failures so callers can tell an authoritative write failure
/// apart from a failure that only affected the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A store implementation reported a failure.
    Store,
    /// A strategy was configured with stores that lack a required capability.
    Configuration,
    /// An operation needs a capability that the underlying stores do not provide.
    Unsupported,
    /// A mutation of the source store failed.
    SourceWrite,
    /// A mutation of the cache store failed and strict cache writes are enabled.
    CacheWrite,
    /// A message bus operation failed.
    Bus,
    /// An operation did not complete within its time budget.
    Timeout,
}

impl ErrorKind {
    /// Returns a short, stable name for the kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Store => "store error",
            Self::Configuration => "configuration error",
            Self::Unsupported => "operation not supported",
            Self::SourceWrite => "source write failed",
            Self::CacheWrite => "cache write failed",
            Self::Bus => "message bus error",
            Self::Timeout => "operation timed out",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error from a store, bus or caching strategy.
///
/// The [`kind`](Error::kind) tells which part of the system failed; the underlying
/// cause, if any, is available through [`std::error::Error::source()`] and is included
/// in the display output.
///
/// # Examples
///
/// ```
/// use larder_store::{Error, ErrorKind};
///
/// let error = Error::store("connection reset");
/// assert_eq!(error.kind(), ErrorKind::Store);
/// assert!(error.to_string().contains("connection reset"));
/// ```
#[ohno::error]
#[display("{kind}")]
pub struct Error {
    kind: ErrorKind,
}

impl Error {
    /// Returns the category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Creates a [`ErrorKind::Store`] error from a backend-specific cause.
    pub fn store(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(ErrorKind::Store, cause)
    }

    /// Creates a [`ErrorKind::Configuration`] error describing the mismatch.
    pub fn configuration(message: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(ErrorKind::Configuration, message)
    }

    /// Creates a [`ErrorKind::Unsupported`] error naming the missing capability.
    pub fn unsupported(message: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(ErrorKind::Unsupported, message)
    }

    /// Wraps a failed source mutation.
    #[must_use]
    pub fn source_write(cause: Self) -> Self {
        Self::caused_by(ErrorKind::SourceWrite, cause)
    }

    /// Wraps a failed cache mutation.
    #[must_use]
    pub fn cache_write(cause: Self) -> Self {
        Self::caused_by(ErrorKind::CacheWrite, cause)
    }

    /// Creates a [`ErrorKind::Bus`] error from a transport-specific cause.
    pub fn bus(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(ErrorKind::Bus, cause)
    }

    /// Creates a [`ErrorKind::Timeout`] error.
    pub fn timeout(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(ErrorKind::Timeout, cause)
    }
}

/// A specialized [`Result`] type for store and cache operations.
pub type Result<T> = std::result::Result<T, Error>;
