// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types for cache operations.

use std::fmt;

/// Classifies what went wrong in a cache operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A caller-supplied argument was rejected, for example a blank key.
    InvalidArgument,
    /// The builder or declarative configuration was invalid.
    Configuration,
    /// A cache handle failed while executing an operation.
    Handle,
    /// The back-plate transport failed to connect or publish.
    Transport,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidArgument => "invalid argument",
            Self::Configuration => "configuration",
            Self::Handle => "handle",
            Self::Transport => "transport",
        };
        f.write_str(name)
    }
}

/// An error from a cache operation.
///
/// Wraps the underlying cause together with an [`ErrorKind`]. Use
/// [`std::error::Error::source()`] to reach the cause.
///
/// # Example
///
/// ```
/// use strata_tier::{Error, ErrorKind};
///
/// let error = Error::from_message("operation failed");
/// assert_eq!(error.kind(), ErrorKind::Handle);
/// ```
#[ohno::error]
pub struct Error {
    kind: ErrorKind,
}

impl Error {
    /// Creates a handle error from any type that can be converted to an error.
    ///
    /// This is the public API for creating cache errors from external crates.
    pub fn from_message(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(ErrorKind::Handle, cause)
    }

    /// Creates an error of the given kind.
    pub fn with_kind(kind: ErrorKind, cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(kind, cause)
    }

    /// Creates an error for a rejected argument.
    pub fn invalid_argument(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(ErrorKind::InvalidArgument, cause)
    }

    /// Returns what kind of failure this is.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// A specialized [`Result`] type for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Checks that a key is present and not blank.
///
/// # Errors
///
/// Returns an [`ErrorKind::InvalidArgument`] error when the key is empty or whitespace.
pub fn ensure_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(Error::invalid_argument("key must not be blank"));
    }
    Ok(())
}

/// Checks that a region, when given, is not blank.
///
/// # Errors
///
/// Returns an [`ErrorKind::InvalidArgument`] error when the region is empty or whitespace.
pub fn ensure_region(region: Option<&str>) -> Result<()> {
    match region {
        Some(r) if r.trim().is_empty() => Err(Error::invalid_argument("region must not be blank")),
        _ => Ok(()),
    }
}
