// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Type-erased cache handle.

use std::{fmt::Debug, sync::Arc};

use crate::{CacheHandle, CacheItem, Error, Expiration, UpdateFn, UpdateItemConfig, UpdateItemResult, handle::DynCacheHandle};

/// Extension trait for converting any `CacheHandle` into a `DynamicHandle`.
///
/// # Examples
///
/// ```
/// use strata_tier::{CacheHandle, DynamicHandle, DynamicHandleExt};
///
/// fn erase<H>(handle: H) -> DynamicHandle<i32>
/// where
///     H: CacheHandle<i32> + 'static,
/// {
///     handle.into_dynamic()
/// }
/// ```
pub trait DynamicHandleExt<V>: Sized {
    /// Converts this handle into a `DynamicHandle`.
    fn into_dynamic(self) -> DynamicHandle<V>;
}

impl<V, H> DynamicHandleExt<V> for H
where
    H: CacheHandle<V> + 'static,
{
    fn into_dynamic(self) -> DynamicHandle<V> {
        DynamicHandle::new(self)
    }
}

/// A clonable cache handle with the concrete tier type erased.
///
/// The cache manager keeps its chain as a list of these, so tiers with
/// different storage types can sit side by side.
pub struct DynamicHandle<V>(Arc<DynCacheHandle<'static, V>>);

impl<V> DynamicHandle<V> {
    pub(crate) fn new<H>(handle: H) -> Self
    where
        H: CacheHandle<V> + Send + Sync + 'static,
    {
        Self(DynCacheHandle::new_arc(handle))
    }
}

impl<V> Debug for DynamicHandle<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicHandle").finish()
    }
}

impl<V> Clone for DynamicHandle<V> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<V> CacheHandle<V> for DynamicHandle<V>
where
    V: Send,
{
    async fn get(&self, key: &str, region: Option<&str>) -> Result<Option<CacheItem<V>>, Error> {
        self.0.get(key, region).await
    }

    async fn add(&self, item: CacheItem<V>) -> Result<bool, Error> {
        self.0.add(item).await
    }

    async fn put(&self, item: CacheItem<V>) -> Result<(), Error> {
        self.0.put(item).await
    }

    async fn remove(&self, key: &str, region: Option<&str>) -> Result<bool, Error> {
        self.0.remove(key, region).await
    }

    async fn clear(&self) -> Result<(), Error> {
        self.0.clear().await
    }

    async fn clear_region(&self, region: &str) -> Result<(), Error> {
        self.0.clear_region(region).await
    }

    async fn expire(&self, key: &str, region: Option<&str>, expiration: Expiration) -> Result<bool, Error> {
        self.0.expire(key, region, expiration).await
    }

    async fn update(
        &self,
        key: &str,
        region: Option<&str>,
        update: &UpdateFn<'_, V>,
        config: &UpdateItemConfig,
    ) -> Result<UpdateItemResult<V>, Error> {
        self.0.update(key, region, update, config).await
    }

    fn len(&self) -> Option<u64> {
        self.0.len()
    }

    fn is_empty(&self) -> Option<bool> {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;

    use super::*;
    use crate::testing::MockHandle;

    #[test]
    fn update_accepts_a_borrowing_function() {
        block_on(async {
            let mock = MockHandle::with_items([CacheItem::new("k", 10).unwrap()]);
            let handle = mock.clone().into_dynamic();
            let step = 5;
            let add_step = |v: &i32| Some(v + step);

            let result = handle.update("k", None, &add_step, &UpdateItemConfig::default()).await.unwrap();

            assert_eq!(result.value(), Some(&15));
            assert_eq!(*mock.item("k", None).unwrap().value(), 15);
        });
    }

    #[test]
    fn clones_share_the_erased_handle() {
        block_on(async {
            let handle = MockHandle::<i32>::new().into_dynamic();
            let other = handle.clone();

            handle.put(CacheItem::new("k", 1).unwrap()).await.unwrap();

            assert_eq!(other.get("k", None).await.unwrap().map(|item| *item.value()), Some(1));
            assert_eq!(other.len(), Some(1));
        });
    }
}
