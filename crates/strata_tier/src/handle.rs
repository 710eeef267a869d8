// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The capability contract every cache tier implements.
//!
//! [`CacheHandle`] is the only thing the cache manager knows about a tier. The
//! manager decides which handles to call and in which order; a handle only has
//! to store, find and version its own items.

use crate::{CacheItem, Error, Expiration, UpdateFn, UpdateItemConfig, UpdateItemResult};

/// One tier in a chain of caches.
///
/// Keys are always paired with an optional region. Implementations must
/// tolerate concurrent calls for the same key, since remote invalidations can
/// arrive while a caller is mid-operation.
///
/// `update` is the only method with retry semantics: the handle applies the
/// function to its current value and retries on its own version conflicts up
/// to `config.max_retries()` times.
#[dynosaur::dynosaur(pub(crate) DynCacheHandle = dyn(box) CacheHandle, bridge(none))]
pub trait CacheHandle<V>: Send + Sync {
    /// Looks an item up.
    fn get(&self, key: &str, region: Option<&str>) -> impl Future<Output = Result<Option<CacheItem<V>>, Error>> + Send;

    /// Stores the item only if the key is absent. Returns `false` if it was already present.
    fn add(&self, item: CacheItem<V>) -> impl Future<Output = Result<bool, Error>> + Send;

    /// Stores the item, replacing any existing value.
    fn put(&self, item: CacheItem<V>) -> impl Future<Output = Result<(), Error>> + Send;

    /// Removes an item. Returns `false` if there was nothing to remove.
    fn remove(&self, key: &str, region: Option<&str>) -> impl Future<Output = Result<bool, Error>> + Send;

    /// Removes every item in every region.
    fn clear(&self) -> impl Future<Output = Result<(), Error>> + Send;

    /// Removes every item in one region.
    fn clear_region(&self, region: &str) -> impl Future<Output = Result<(), Error>> + Send;

    /// Changes the expiration of a stored item. Returns `false` if the item is absent.
    fn expire(&self, key: &str, region: Option<&str>, expiration: Expiration) -> impl Future<Output = Result<bool, Error>> + Send;

    /// Replaces the stored value with `update(current)`, retrying on version conflicts.
    fn update(
        &self,
        key: &str,
        region: Option<&str>,
        update: &UpdateFn<'_, V>,
        config: &UpdateItemConfig,
    ) -> impl Future<Output = Result<UpdateItemResult<V>, Error>> + Send;

    /// Returns the number of items, if the tier tracks it.
    fn len(&self) -> Option<u64> {
        None
    }

    /// Returns `true` if the tier holds no items, if the tier tracks it.
    fn is_empty(&self) -> Option<bool> {
        self.len().map(|len| len == 0)
    }
}
