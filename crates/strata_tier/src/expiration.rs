// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::{Duration, SystemTime};

/// How long a cache item stays valid.
///
/// # Examples
///
/// ```
/// use strata_tier::Expiration;
/// use std::time::Duration;
///
/// let expiration = Expiration::Sliding(Duration::from_secs(30));
/// assert_eq!(expiration.timeout(), Some(Duration::from_secs(30)));
/// assert!(Expiration::Never.timeout().is_none());
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Expiration {
    /// Use whatever the handle storing the item is configured with.
    #[default]
    Default,
    /// The item never expires.
    Never,
    /// The item expires a fixed duration after it was created.
    Absolute(Duration),
    /// The item expires a fixed duration after it was last accessed.
    Sliding(Duration),
}

impl Expiration {
    /// Returns the timeout, if this mode has one.
    #[must_use]
    pub fn timeout(self) -> Option<Duration> {
        match self {
            Self::Absolute(d) | Self::Sliding(d) => Some(d),
            Self::Default | Self::Never => None,
        }
    }

    /// Replaces [`Expiration::Default`] with `fallback`.
    #[must_use]
    pub fn or(self, fallback: Self) -> Self {
        match self {
            Self::Default => fallback,
            other => other,
        }
    }

    /// Returns `true` when an item with the given timestamps has outlived this expiration.
    ///
    /// A clock that went backwards is treated as "not yet elapsed".
    #[must_use]
    pub fn is_elapsed(self, now: SystemTime, created_at: SystemTime, last_accessed_at: SystemTime) -> bool {
        let (since, timeout) = match self {
            Self::Absolute(d) => (created_at, d),
            Self::Sliding(d) => (last_accessed_at, d),
            Self::Default | Self::Never => return false,
        };
        now.duration_since(since).is_ok_and(|elapsed| elapsed >= timeout)
    }
}
