// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! In-memory cache handle implementation using moka.
//!
//! Every stored item carries a version number that changes on each write.
//! Updates read the current version, compute the new value and swap it in only
//! if the version is still the same, retrying otherwise.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::SystemTime,
};

use moka::{
    future::Cache,
    ops::compute::{CompResult, Op},
};
use parking_lot::Mutex;
use strata_tier::{CacheHandle, CacheItem, Error, Expiration, UpdateFn, UpdateItemConfig, UpdateItemResult};
use tick::Clock;

use crate::builder::MemoryHandleBuilder;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StoreKey {
    region: Option<String>,
    key: String,
}

impl StoreKey {
    fn new(key: &str, region: Option<&str>) -> Self {
        Self {
            region: region.map(str::to_owned),
            key: key.to_owned(),
        }
    }
}

#[derive(Debug, Clone)]
struct Slot<V> {
    item: CacheItem<V>,
    version: u64,
    // Shared so a read can slide the expiration without a write.
    last_access: Arc<Mutex<SystemTime>>,
}

impl<V> Slot<V> {
    fn is_expired(&self, now: SystemTime) -> bool {
        let Some(created_at) = self.item.created_at() else {
            return false;
        };
        self.item.expiration().is_elapsed(now, created_at, *self.last_access.lock())
    }

    fn touch(&self, now: SystemTime) -> CacheItem<V>
    where
        V: Clone,
    {
        *self.last_access.lock() = now;
        let mut item = self.item.clone();
        item.set_last_accessed_at(now);
        item
    }
}

/// An in-process cache handle backed by moka.
///
/// Items expire lazily: an expired item is invisible to every operation and is
/// purged the next time it is touched. [`Expiration::Default`] resolves to the
/// handle's configured default expiration when an item is stored.
///
/// # Examples
///
/// ```
/// use strata_memory::MemoryHandle;
/// use strata_tier::{CacheHandle, CacheItem};
/// use tick::Clock;
///
/// # futures::executor::block_on(async {
/// let handle = MemoryHandle::<i32>::new(Clock::new_frozen());
///
/// assert!(handle.add(CacheItem::new("key", 42)?).await?);
/// let item = handle.get("key", None).await?.expect("stored");
/// assert_eq!(*item.value(), 42);
/// # Ok::<(), strata_tier::Error>(())
/// # }).unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct MemoryHandle<V>
where
    V: Clone + Send + Sync + 'static,
{
    inner: Cache<StoreKey, Slot<V>>,
    clock: Clock,
    default_expiration: Expiration,
    versions: Arc<AtomicU64>,
}

impl<V> MemoryHandle<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates an unbounded handle whose items never expire by default.
    #[must_use]
    pub fn new(clock: Clock) -> Self {
        Self::builder(clock).build()
    }

    /// Creates a builder for configuring a memory handle.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use strata_memory::MemoryHandle;
    /// use strata_tier::Expiration;
    /// use tick::Clock;
    ///
    /// let handle = MemoryHandle::<String>::builder(Clock::new_frozen())
    ///     .max_capacity(1000)
    ///     .default_expiration(Expiration::Sliding(Duration::from_secs(60)))
    ///     .build();
    /// ```
    #[must_use]
    pub fn builder(clock: Clock) -> MemoryHandleBuilder<V> {
        MemoryHandleBuilder::new(clock)
    }

    pub(crate) fn from_builder(builder: MemoryHandleBuilder<V>) -> Self {
        let mut moka_builder = Cache::builder();

        if let Some(capacity) = builder.max_capacity {
            moka_builder = moka_builder.max_capacity(capacity);
        }

        if let Some(capacity) = builder.initial_capacity {
            moka_builder = moka_builder.initial_capacity(capacity);
        }

        if let Some(name) = builder.name.as_deref() {
            moka_builder = moka_builder.name(name);
        }

        Self {
            inner: moka_builder.build(),
            clock: builder.clock,
            default_expiration: builder.default_expiration,
            versions: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The expiration applied to items stored with [`Expiration::Default`].
    #[must_use]
    pub fn default_expiration(&self) -> Expiration {
        self.default_expiration
    }

    fn next_version(&self) -> u64 {
        self.versions.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn stamp(&self, mut item: CacheItem<V>) -> Slot<V> {
        let now = self.clock.system_time();
        item.ensure_created_at(now);
        let expiration = item.expiration().or(self.default_expiration);
        Slot {
            item: item.with_expiration(expiration),
            version: self.next_version(),
            last_access: Arc::new(Mutex::new(now)),
        }
    }

    /// Returns the slot unless it is missing or expired; expired slots are purged.
    async fn live_slot(&self, key: &StoreKey) -> Option<Slot<V>> {
        let slot = self.inner.get(key).await?;
        if slot.is_expired(self.clock.system_time()) {
            self.purge(key.clone(), slot.version).await;
            return None;
        }
        Some(slot)
    }

    /// Removes the slot only if it still has the given version.
    async fn purge(&self, key: StoreKey, version: u64) {
        self.inner
            .entry(key)
            .and_compute_with(|existing| {
                let op = match existing {
                    Some(entry) if entry.value().version == version => Op::Remove,
                    _ => Op::Nop,
                };
                std::future::ready(op)
            })
            .await;
    }

    /// Replaces the slot only if it still has the `expected` version.
    async fn swap(&self, key: StoreKey, expected: u64, replacement: Slot<V>) -> bool {
        let outcome = self
            .inner
            .entry(key)
            .and_compute_with(|existing| {
                let op = match existing {
                    Some(entry) if entry.value().version == expected => Op::Put(replacement),
                    _ => Op::Nop,
                };
                std::future::ready(op)
            })
            .await;
        matches!(outcome, CompResult::ReplacedWith(_))
    }
}

impl<V> CacheHandle<V> for MemoryHandle<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str, region: Option<&str>) -> Result<Option<CacheItem<V>>, Error> {
        let slot = self.live_slot(&StoreKey::new(key, region)).await;
        Ok(slot.map(|slot| slot.touch(self.clock.system_time())))
    }

    async fn add(&self, item: CacheItem<V>) -> Result<bool, Error> {
        let key = StoreKey::new(item.key(), item.region());
        // An expired item must not block the add.
        let _ = self.live_slot(&key).await;
        let entry = self.inner.entry(key).or_insert(self.stamp(item)).await;
        Ok(entry.is_fresh())
    }

    async fn put(&self, item: CacheItem<V>) -> Result<(), Error> {
        let key = StoreKey::new(item.key(), item.region());
        self.inner.insert(key, self.stamp(item)).await;
        Ok(())
    }

    async fn remove(&self, key: &str, region: Option<&str>) -> Result<bool, Error> {
        let removed = self.inner.remove(&StoreKey::new(key, region)).await;
        let now = self.clock.system_time();
        Ok(removed.is_some_and(|slot| !slot.is_expired(now)))
    }

    async fn clear(&self) -> Result<(), Error> {
        self.inner.invalidate_all();
        self.inner.run_pending_tasks().await;
        Ok(())
    }

    async fn clear_region(&self, region: &str) -> Result<(), Error> {
        let keys: Vec<Arc<StoreKey>> = self
            .inner
            .iter()
            .filter(|(key, _)| key.region.as_deref() == Some(region))
            .map(|(key, _)| key)
            .collect();
        for key in keys {
            self.inner.invalidate(key.as_ref()).await;
        }
        self.inner.run_pending_tasks().await;
        Ok(())
    }

    async fn expire(&self, key: &str, region: Option<&str>, expiration: Expiration) -> Result<bool, Error> {
        let key = StoreKey::new(key, region);
        let Some(slot) = self.live_slot(&key).await else {
            return Ok(false);
        };

        // The new timeout counts from now.
        let now = self.clock.system_time();
        let item = slot
            .item
            .clone()
            .with_created_at(now)
            .with_expiration(expiration.or(self.default_expiration));
        let replacement = Slot {
            item,
            version: self.next_version(),
            last_access: Arc::new(Mutex::new(now)),
        };
        Ok(self.swap(key, slot.version, replacement).await)
    }

    async fn update(
        &self,
        key: &str,
        region: Option<&str>,
        update: &UpdateFn<'_, V>,
        config: &UpdateItemConfig,
    ) -> Result<UpdateItemResult<V>, Error> {
        let key = StoreKey::new(key, region);
        let mut tries = 0;
        let mut conflict = false;

        loop {
            tries += 1;
            let Some(slot) = self.live_slot(&key).await else {
                return Ok(UpdateItemResult::item_did_not_exist());
            };
            let Some(value) = update(slot.item.value()) else {
                return Ok(UpdateItemResult::factory_returned_none(conflict, tries));
            };

            let replacement = Slot {
                item: slot.item.with_value(value.clone()),
                version: self.next_version(),
                last_access: Arc::clone(&slot.last_access),
            };
            if self.swap(key.clone(), slot.version, replacement).await {
                return Ok(UpdateItemResult::success(value, conflict, tries));
            }

            conflict = true;
            if tries > config.max_retries() {
                return Ok(UpdateItemResult::too_many_retries(tries));
            }
        }
    }

    fn len(&self) -> Option<u64> {
        Some(self.inner.entry_count())
    }
}
