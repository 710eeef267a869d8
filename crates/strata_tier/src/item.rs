// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::{ops::Deref, time::SystemTime};

use crate::{Expiration, Result, error};

/// A cached value together with its identity and metadata.
///
/// An item is identified by its key and optional region. Keys must not be
/// blank, and a region, when present, must not be blank either. Timestamps are
/// stamped by the handle that stores the item.
///
/// # Examples
///
/// ```
/// use strata_tier::{CacheItem, Expiration};
/// use std::time::Duration;
///
/// let item = CacheItem::new("user:1", 42)?;
/// assert_eq!(*item.value(), 42);
/// assert!(item.region().is_none());
///
/// let item = CacheItem::in_region("user:1", "tenant-a", 7)?
///     .with_expiration(Expiration::Sliding(Duration::from_secs(60)));
/// assert_eq!(item.region(), Some("tenant-a"));
///
/// assert!(CacheItem::new(" ", 1).is_err());
/// # Ok::<(), strata_tier::Error>(())
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheItem<V> {
    key: String,
    region: Option<String>,
    value: V,
    expiration: Expiration,
    created_at: Option<SystemTime>,
    last_accessed_at: Option<SystemTime>,
}

impl<V> CacheItem<V> {
    /// Creates an item without a region.
    ///
    /// # Errors
    ///
    /// Returns an error when the key is blank.
    pub fn new(key: impl Into<String>, value: V) -> Result<Self> {
        let key = key.into();
        error::ensure_key(&key)?;
        Ok(Self {
            key,
            region: None,
            value,
            expiration: Expiration::Default,
            created_at: None,
            last_accessed_at: None,
        })
    }

    /// Creates an item in the given region.
    ///
    /// # Errors
    ///
    /// Returns an error when the key or the region is blank.
    pub fn in_region(key: impl Into<String>, region: impl Into<String>, value: V) -> Result<Self> {
        let region = region.into();
        error::ensure_region(Some(&region))?;
        let mut item = Self::new(key, value)?;
        item.region = Some(region);
        Ok(item)
    }

    /// Sets how long the item stays valid.
    #[must_use]
    pub fn with_expiration(mut self, expiration: Expiration) -> Self {
        self.expiration = expiration;
        self
    }

    /// Sets the creation timestamp.
    #[must_use]
    pub fn with_created_at(mut self, created_at: SystemTime) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Returns a copy of this item carrying `value` instead of the current value.
    ///
    /// Identity, expiration and timestamps are kept.
    #[must_use]
    pub fn with_value<U>(&self, value: U) -> CacheItem<U> {
        CacheItem {
            key: self.key.clone(),
            region: self.region.clone(),
            value,
            expiration: self.expiration,
            created_at: self.created_at,
            last_accessed_at: self.last_accessed_at,
        }
    }

    /// The item key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The item region, if any.
    #[must_use]
    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    /// A reference to the cached value.
    #[must_use]
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Consumes the item and returns the value.
    #[must_use]
    pub fn into_value(self) -> V {
        self.value
    }

    /// The expiration the item was created with.
    #[must_use]
    pub fn expiration(&self) -> Expiration {
        self.expiration
    }

    /// When the item was first stored, if it has been stored.
    #[must_use]
    pub fn created_at(&self) -> Option<SystemTime> {
        self.created_at
    }

    /// When the item was last read, if it has been read.
    #[must_use]
    pub fn last_accessed_at(&self) -> Option<SystemTime> {
        self.last_accessed_at
    }

    /// Records a successful read.
    pub fn set_last_accessed_at(&mut self, at: SystemTime) {
        self.last_accessed_at = Some(at);
    }

    /// Stamps the creation time unless one is already present.
    pub fn ensure_created_at(&mut self, now: SystemTime) {
        if self.created_at.is_none() {
            self.created_at = Some(now);
        }
    }

    /// Returns `true` when the item has outlived its expiration at `now`.
    ///
    /// [`Expiration::Default`] never expires here; handles resolve it first.
    #[must_use]
    pub fn is_expired(&self, now: SystemTime) -> bool {
        let Some(created_at) = self.created_at else {
            return false;
        };
        let accessed = self.last_accessed_at.unwrap_or(created_at);
        self.expiration.is_elapsed(now, created_at, accessed)
    }
}

impl<V> Deref for CacheItem<V> {
    type Target = V;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn new_rejects_blank_key() {
        let err = CacheItem::new("", 1).expect_err("blank key");
        assert_eq!(err.kind(), crate::ErrorKind::InvalidArgument);
    }

    #[test]
    fn in_region_rejects_blank_region() {
        assert!(CacheItem::in_region("k", "  ", 1).is_err());
    }

    #[test]
    fn ensure_created_at_only_stamps_once() {
        let t0 = SystemTime::UNIX_EPOCH;
        let mut item = CacheItem::new("k", 1).unwrap();
        item.ensure_created_at(t0);
        item.ensure_created_at(t0 + Duration::from_secs(5));
        assert_eq!(item.created_at(), Some(t0));
    }

    #[test]
    fn with_value_keeps_metadata() {
        let t0 = SystemTime::UNIX_EPOCH;
        let item = CacheItem::in_region("k", "r", 1)
            .unwrap()
            .with_expiration(Expiration::Never)
            .with_created_at(t0);
        let copy = item.with_value("one");
        assert_eq!(copy.key(), "k");
        assert_eq!(copy.region(), Some("r"));
        assert_eq!(copy.expiration(), Expiration::Never);
        assert_eq!(copy.created_at(), Some(t0));
        assert_eq!(*copy, "one");
    }

    #[test]
    fn unstored_item_is_never_expired() {
        let item = CacheItem::new("k", 1)
            .unwrap()
            .with_expiration(Expiration::Absolute(Duration::ZERO));
        assert!(!item.is_expired(SystemTime::UNIX_EPOCH + Duration::from_secs(60)));
    }
}
