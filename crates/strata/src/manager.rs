// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The cache manager: one logical cache over an ordered chain of handles.

use std::sync::Arc;

use strata_backplate::BackPlate;
use strata_tier::{
    CacheHandle, CacheItem, Error, Expiration, UpdateItemConfig, UpdateItemResult, UpdateItemState,
    error::{ensure_key, ensure_region},
};
use tick::Clock;

use crate::{
    builder::CacheManagerBuilder,
    events::{CacheEvent, EventOrigin, ListenerId, Listeners},
    handle::ManagedHandle,
    mode::{CacheUpdateMode, authority_to_edge, edge_to_authority},
    telemetry::{
        CacheActivity, CacheOperation, CacheTelemetry,
        ext::{CacheTelemetryExt, ClockExt},
    },
};

/// A tiered cache keeping an ordered chain of handles consistent.
///
/// Handles are ordered from the edge (index 0, fastest) to the authority (the
/// last handle, the source of truth):
///
/// - Reads walk edge to authority and copy hits into other handles according
///   to the [`CacheUpdateMode`].
/// - Adds and updates walk authority to edge, so the source of truth accepts a
///   change first. Whenever the chain may disagree about a key, the key is
///   evicted from the handles that could hold a stale copy.
/// - Writes, removals and clears are published on the [`BackPlate`], when one
///   is configured, so other instances evict their copies.
///
/// Cloning is cheap and every clone shares the same chain.
///
/// # Examples
///
/// ```
/// use strata::{CacheItem, CacheManager, MemoryHandle};
/// use tick::Clock;
///
/// # futures::executor::block_on(async {
/// let clock = Clock::new_frozen();
/// let cache = CacheManager::builder(clock.clone())
///     .name("users")
///     .handle(MemoryHandle::builder(clock.clone()).build())
///     .handle(MemoryHandle::builder(clock).build())
///     .build()?;
///
/// assert!(cache.add(CacheItem::new("user:1", 42)?).await?);
/// assert_eq!(cache.get("user:1", None).await?, Some(42));
///
/// let updated = cache.update("user:1", None, |v| Some(v + 1)).await?;
/// assert_eq!(updated, Some(43));
/// # Ok::<(), strata::Error>(())
/// # }).unwrap();
/// ```
#[derive(Debug)]
pub struct CacheManager<V> {
    pub(crate) inner: Arc<ManagerInner<V>>,
}

impl<V> Clone for CacheManager<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[derive(Debug)]
pub(crate) struct ManagerInner<V> {
    pub(crate) name: String,
    pub(crate) clock: Clock,
    pub(crate) handles: Vec<ManagedHandle<V>>,
    pub(crate) update_mode: CacheUpdateMode,
    pub(crate) max_retries: u32,
    pub(crate) back_plate: Option<BackPlate>,
    pub(crate) listeners: Listeners,
    pub(crate) telemetry: Option<CacheTelemetry>,
}

impl CacheManager<()> {
    /// Creates a builder for a manager storing values of type `V`.
    #[must_use]
    pub fn builder<V>(clock: Clock) -> CacheManagerBuilder<V> {
        CacheManagerBuilder::new(clock)
    }
}

impl<V> CacheManager<V> {
    /// The name used in logs and metrics.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The handles, from the edge to the authority.
    #[must_use]
    pub fn handles(&self) -> &[ManagedHandle<V>] {
        &self.inner.handles
    }

    /// How hits are copied into other handles.
    #[must_use]
    pub fn update_mode(&self) -> CacheUpdateMode {
        self.inner.update_mode
    }

    /// The back-plate, if one is configured.
    #[must_use]
    pub fn back_plate(&self) -> Option<&BackPlate> {
        self.inner.back_plate.as_ref()
    }

    /// The update settings used by [`update`](Self::update).
    #[must_use]
    pub fn update_config(&self) -> UpdateItemConfig {
        UpdateItemConfig::new().with_max_retries(self.inner.max_retries)
    }

    /// Registers a callback invoked after every operation that changed or found something.
    ///
    /// Callbacks run on the caller's task once the operation has finished. They
    /// may register or remove listeners themselves.
    pub fn on_event<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.add(Arc::new(callback))
    }

    /// Removes a listener. Returns `false` if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }
}

impl<V> CacheManager<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn from_inner(inner: Arc<ManagerInner<V>>) -> Self {
        Self { inner }
    }

    /// Looks a value up.
    ///
    /// # Errors
    ///
    /// Returns an error for a blank key or region, or when a handle fails.
    pub async fn get(&self, key: &str, region: Option<&str>) -> Result<Option<V>, Error> {
        Ok(self.get_item(key, region).await?.map(CacheItem::into_value))
    }

    /// Looks an item up, walking the handles from the edge to the authority.
    ///
    /// The first handle holding the item wins. The item's last-access time is
    /// set, and the item is copied into other handles according to the
    /// [`CacheUpdateMode`].
    ///
    /// # Errors
    ///
    /// Returns an error for a blank key or region, or when a handle fails.
    pub async fn get_item(&self, key: &str, region: Option<&str>) -> Result<Option<CacheItem<V>>, Error> {
        ensure_key(key)?;
        ensure_region(region)?;
        let inner = &*self.inner;

        for index in edge_to_authority(inner.handles.len()) {
            let managed = &inner.handles[index];
            let found = inner.get_from(managed, key, region).await?;
            managed.stats().on_get(region);

            let Some(mut item) = found else {
                managed.stats().on_miss(region);
                continue;
            };

            item.set_last_accessed_at(inner.clock.system_time());
            inner.add_to_handles(&item, index).await?;
            managed.stats().on_hit(region);
            inner.listeners.emit(&CacheEvent::Get {
                key: key.to_owned(),
                region: region.map(str::to_owned),
            });
            return Ok(Some(item));
        }

        Ok(None)
    }

    /// Writes an item to every handle, replacing what was there.
    ///
    /// # Errors
    ///
    /// Returns an error when a handle fails. Handles written before the
    /// failing one keep the new value.
    pub async fn put(&self, item: CacheItem<V>) -> Result<(), Error> {
        let inner = &*self.inner;

        for index in edge_to_authority(inner.handles.len()) {
            let managed = &inner.handles[index];
            let put = async {
                if managed.stats().is_enabled() {
                    // Counted as part of the put, not as a read.
                    let existing = managed.handle().get(item.key(), item.region()).await?;
                    managed.stats().on_put(&item, existing.is_none());
                }
                managed.handle().put(item.clone()).await
            };
            inner.call(managed, CacheOperation::Put, put, |()| CacheActivity::Stored).await?;
            inner.record_size(managed);
        }

        if let Some(back_plate) = &inner.back_plate {
            inner.warn_on_failure("changed", back_plate.notify_changed(item.key(), item.region()).await);
        }
        inner.listeners.emit(&CacheEvent::Put {
            key: item.key().to_owned(),
            region: item.region().map(str::to_owned),
        });
        Ok(())
    }

    /// Adds an item only if no handle holds its key yet.
    ///
    /// Handles are asked from the authority to the edge. When one of them
    /// already holds the key, the key is evicted from every other handle and
    /// `false` is returned, so no handle is left with a diverging copy.
    ///
    /// # Errors
    ///
    /// Returns an error when a handle fails.
    pub async fn add(&self, item: CacheItem<V>) -> Result<bool, Error> {
        let inner = &*self.inner;

        for index in authority_to_edge(inner.handles.len()) {
            let managed = &inner.handles[index];
            let added = inner
                .call(managed, CacheOperation::Add, managed.handle().add(item.clone()), |added| {
                    if *added { CacheActivity::Added } else { CacheActivity::Rejected }
                })
                .await?;

            if !added {
                inner.evict(item.key(), item.region(), |other, _| other != index).await?;
                return Ok(false);
            }

            managed.stats().on_add(&item);
            inner.record_size(managed);
        }

        inner.listeners.emit(&CacheEvent::Add {
            key: item.key().to_owned(),
            region: item.region().map(str::to_owned),
        });
        Ok(true)
    }

    /// Removes an item from every handle.
    ///
    /// Returns `true` if at least one handle held it.
    ///
    /// # Errors
    ///
    /// Returns an error for a blank key or region, or when a handle fails.
    pub async fn remove(&self, key: &str, region: Option<&str>) -> Result<bool, Error> {
        ensure_key(key)?;
        ensure_region(region)?;
        let inner = &*self.inner;

        let mut removed_any = false;
        for managed in &inner.handles {
            let removed = inner
                .call(managed, CacheOperation::Remove, managed.handle().remove(key, region), |removed| {
                    if *removed { CacheActivity::Removed } else { CacheActivity::NotFound }
                })
                .await?;
            if removed {
                removed_any = true;
                managed.stats().on_remove(region);
            }
        }

        if removed_any {
            if let Some(back_plate) = &inner.back_plate {
                inner.warn_on_failure("removed", back_plate.notify_removed(key, region).await);
            }
            inner.listeners.emit(&CacheEvent::Remove {
                key: key.to_owned(),
                region: region.map(str::to_owned),
                origin: EventOrigin::Local,
            });
        }
        Ok(removed_any)
    }

    /// Updates a value using the manager's retry budget.
    ///
    /// Returns the new value, or `None` if the item does not exist, the
    /// function declined to produce a value or the retries ran out.
    ///
    /// # Errors
    ///
    /// Returns an error for a blank key or region, or when a handle fails.
    pub async fn update<F>(&self, key: &str, region: Option<&str>, update: F) -> Result<Option<V>, Error>
    where
        F: Fn(&V) -> Option<V> + Send + Sync,
    {
        let config = self.update_config();
        Ok(self.try_update(key, region, update, &config).await?.into_value())
    }

    /// Updates a value and reports exactly what happened.
    ///
    /// Handles are asked from the authority to the edge; the first handle
    /// that holds the item decides:
    ///
    /// - On success, the key is evicted from every handle closer to the edge,
    ///   and the fresh item is added to every handle behind the one that
    ///   succeeded.
    /// - When the item exists but cannot be updated, the key is evicted from
    ///   every other handle.
    ///
    /// The result aggregates the tries and conflicts of every handle asked.
    /// Running out of retries is reported as
    /// [`UpdateItemState::TooManyRetries`], not as an error.
    ///
    /// # Errors
    ///
    /// Returns an error for a blank key or region, or when a handle fails.
    pub async fn try_update<F>(
        &self,
        key: &str,
        region: Option<&str>,
        update: F,
        config: &UpdateItemConfig,
    ) -> Result<UpdateItemResult<V>, Error>
    where
        F: Fn(&V) -> Option<V> + Send + Sync,
    {
        ensure_key(key)?;
        ensure_region(region)?;
        let inner = &*self.inner;

        let mut tries: u32 = 1;
        let mut version_conflict = false;
        let mut last: Option<UpdateItemResult<V>> = None;

        for index in authority_to_edge(inner.handles.len()) {
            let managed = &inner.handles[index];
            let result = inner
                .call(
                    managed,
                    CacheOperation::Update,
                    managed.handle().update(key, region, &update, config),
                    update_activity,
                )
                .await?;

            tries = tries.saturating_add(result.tries_needed().saturating_sub(1));
            version_conflict |= result.version_conflict_occurred();
            let state = result.state();
            last = Some(result);

            match state {
                UpdateItemState::Success => {
                    if let Some(result) = &last {
                        managed.stats().on_update(region, result);
                    }
                    inner.evict(key, region, |other, _| other < index).await?;
                    inner.add_to_handles_below(key, region, index).await?;
                    break;
                }
                UpdateItemState::ItemDidNotExist => {}
                _ => {
                    inner.evict(key, region, |other, _| other != index).await?;
                    break;
                }
            }
        }

        let Some(last) = last else {
            return Ok(UpdateItemResult::item_did_not_exist());
        };
        let state = last.state();
        let result = UpdateItemResult::from_parts(last.into_value(), state, version_conflict, tries);

        if result.is_success() {
            if let Some(back_plate) = &inner.back_plate {
                inner.warn_on_failure("changed", back_plate.notify_changed(key, region).await);
            }
        }
        inner.listeners.emit(&CacheEvent::Update {
            key: key.to_owned(),
            region: region.map(str::to_owned),
            success: result.is_success(),
            tries,
            version_conflict,
        });
        Ok(result)
    }

    /// Updates the item if it exists anywhere, adds it otherwise.
    ///
    /// When the add loses a race against another writer, the update is tried
    /// again, at most `config.max_retries()` more times. Returns the stored
    /// value, or `None` once the budget is spent.
    ///
    /// # Errors
    ///
    /// Returns an error when a handle fails.
    pub async fn add_or_update<F>(&self, item: CacheItem<V>, update: F, config: &UpdateItemConfig) -> Result<Option<V>, Error>
    where
        F: Fn(&V) -> Option<V> + Send + Sync,
    {
        let mut tries: u32 = 0;
        loop {
            tries += 1;

            let result = self.try_update(item.key(), item.region(), &update, config).await?;
            if result.is_success() {
                return Ok(result.into_value());
            }

            if self.add(item.clone()).await? {
                return Ok(Some(item.into_value()));
            }

            if tries > config.max_retries() {
                tracing::debug!(cache.name = %self.inner.name, key = item.key(), tries, "add or update gave up");
                return Ok(None);
            }
        }
    }

    /// Removes every item from every handle.
    ///
    /// # Errors
    ///
    /// Returns an error when a handle fails.
    pub async fn clear(&self) -> Result<(), Error> {
        let inner = &*self.inner;
        inner.clear_handles(|_| true).await?;

        if let Some(back_plate) = &inner.back_plate {
            inner.warn_on_failure("clear", back_plate.notify_clear().await);
        }
        inner.listeners.emit(&CacheEvent::Clear {
            origin: EventOrigin::Local,
        });
        Ok(())
    }

    /// Removes every item of one region from every handle.
    ///
    /// # Errors
    ///
    /// Returns an error for a blank region, or when a handle fails.
    pub async fn clear_region(&self, region: &str) -> Result<(), Error> {
        ensure_region(Some(region))?;
        let inner = &*self.inner;
        inner.clear_region_handles(region, |_| true).await?;

        if let Some(back_plate) = &inner.back_plate {
            inner.warn_on_failure("clear region", back_plate.notify_clear_region(region).await);
        }
        inner.listeners.emit(&CacheEvent::ClearRegion {
            region: region.to_owned(),
            origin: EventOrigin::Local,
        });
        Ok(())
    }

    /// Changes the expiration of an item in every handle holding it.
    ///
    /// Returns `true` if at least one handle held the item.
    ///
    /// # Errors
    ///
    /// Returns an error for a blank key or region, or when a handle fails.
    pub async fn expire(&self, key: &str, region: Option<&str>, expiration: Expiration) -> Result<bool, Error> {
        ensure_key(key)?;
        ensure_region(region)?;
        let inner = &*self.inner;

        let mut found = false;
        for managed in &inner.handles {
            found |= inner
                .call(managed, CacheOperation::Expire, managed.handle().expire(key, region, expiration), |found| {
                    if *found { CacheActivity::Expired } else { CacheActivity::NotFound }
                })
                .await?;
        }
        Ok(found)
    }

    /// Flushes pending back-plate messages and stops listening for remote ones.
    ///
    /// # Errors
    ///
    /// Returns the error of the final flush.
    pub async fn dispose(&self) -> Result<(), Error> {
        match &self.inner.back_plate {
            Some(back_plate) => back_plate.dispose().await,
            None => Ok(()),
        }
    }
}

impl<V> ManagerInner<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Runs one handle call, recording how long it took and what it did.
    pub(crate) async fn call<T>(
        &self,
        managed: &ManagedHandle<V>,
        operation: CacheOperation,
        future: impl Future<Output = Result<T, Error>>,
        activity: impl FnOnce(&T) -> CacheActivity,
    ) -> Result<T, Error> {
        let timed = self.clock.timed_async(future).await;
        let activity = match &timed.result {
            Ok(value) => activity(value),
            Err(_) => CacheActivity::Error,
        };
        self.telemetry.record(&self.name, managed.name(), operation, activity, timed.duration);
        timed.result
    }

    pub(crate) fn record_size(&self, managed: &ManagedHandle<V>) {
        if let Some(size) = managed.handle().len() {
            self.telemetry.record_size(&self.name, managed.name(), size);
        }
    }

    pub(crate) fn warn_on_failure(&self, action: &str, result: Result<(), Error>) {
        if let Err(error) = result {
            tracing::warn!(cache.name = %self.name, action, %error, "back-plate notification failed");
        }
    }

    async fn get_from(&self, managed: &ManagedHandle<V>, key: &str, region: Option<&str>) -> Result<Option<CacheItem<V>>, Error> {
        self.call(managed, CacheOperation::Get, managed.handle().get(key, region), |found| {
            if found.is_some() { CacheActivity::Hit } else { CacheActivity::Miss }
        })
        .await
    }

    /// Copies a hit into other handles according to the update mode.
    async fn add_to_handles(&self, item: &CacheItem<V>, found: usize) -> Result<(), Error> {
        for target in self.update_mode.propagation_targets(found, self.handles.len()) {
            let managed = &self.handles[target];
            let added = self
                .call(managed, CacheOperation::Add, managed.handle().add(item.clone()), |added| {
                    if *added { CacheActivity::Added } else { CacheActivity::Rejected }
                })
                .await?;
            if added {
                self.record_size(managed);
            }
        }
        Ok(())
    }

    /// Copies the item stored at `index` into every handle behind it.
    async fn add_to_handles_below(&self, key: &str, region: Option<&str>, index: usize) -> Result<(), Error> {
        let Some(item) = self.get_from(&self.handles[index], key, region).await? else {
            return Ok(());
        };

        for managed in self.handles.iter().skip(index + 1) {
            let added = self
                .call(managed, CacheOperation::Add, managed.handle().add(item.clone()), |added| {
                    if *added { CacheActivity::Added } else { CacheActivity::Rejected }
                })
                .await?;
            if added {
                managed.stats().on_add(&item);
                self.record_size(managed);
            }
        }
        Ok(())
    }

    /// Removes a key from every handle `include` selects.
    pub(crate) async fn evict(
        &self,
        key: &str,
        region: Option<&str>,
        include: impl Fn(usize, &ManagedHandle<V>) -> bool,
    ) -> Result<(), Error> {
        for (index, managed) in self.handles.iter().enumerate() {
            if !include(index, managed) {
                continue;
            }
            let removed = self
                .call(managed, CacheOperation::Evict, managed.handle().remove(key, region), |removed| {
                    if *removed { CacheActivity::Evicted } else { CacheActivity::NotFound }
                })
                .await?;
            if removed {
                managed.stats().on_remove(region);
            }
        }
        Ok(())
    }

    pub(crate) async fn clear_handles(&self, include: impl Fn(&ManagedHandle<V>) -> bool) -> Result<(), Error> {
        for managed in self.handles.iter().filter(|managed| include(managed)) {
            self.call(managed, CacheOperation::Clear, managed.handle().clear(), |()| CacheActivity::Cleared)
                .await?;
            managed.stats().on_clear();
        }
        Ok(())
    }

    pub(crate) async fn clear_region_handles(&self, region: &str, include: impl Fn(&ManagedHandle<V>) -> bool) -> Result<(), Error> {
        for managed in self.handles.iter().filter(|managed| include(managed)) {
            self.call(managed, CacheOperation::ClearRegion, managed.handle().clear_region(region), |()| {
                CacheActivity::Cleared
            })
            .await?;
            managed.stats().on_clear_region(region);
        }
        Ok(())
    }
}

fn update_activity<V>(result: &UpdateItemResult<V>) -> CacheActivity {
    match result.state() {
        UpdateItemState::Success => CacheActivity::Updated,
        UpdateItemState::TooManyRetries => CacheActivity::Conflict,
        _ => CacheActivity::Unchanged,
    }
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;
    use opentelemetry::KeyValue;
    use strata_tier::{StatsCounter, testing::MockHandle};

    use super::*;
    use crate::{
        TelemetryConfig,
        telemetry::{
            attributes,
            testing::{LogCapture, MetricTester},
        },
    };

    fn item(key: &str, value: i32) -> CacheItem<i32> {
        CacheItem::new(key, value).unwrap()
    }

    #[test]
    fn handle_calls_are_recorded_per_handle() {
        block_on(async {
            let tester = MetricTester::new();
            let cache = CacheManager::builder(Clock::new_frozen())
                .name("orders")
                .handle_with(MockHandle::new(), crate::HandleOptions::new("edge"))
                .handle_with(MockHandle::with_items([item("k", 1)]), crate::HandleOptions::new("authority"))
                .telemetry(TelemetryConfig::new().with_metrics(tester.meter_provider()))
                .build()
                .unwrap();

            assert_eq!(cache.get("k", None).await.unwrap(), Some(1));

            tester.assert_attributes_contain(&[
                KeyValue::new(attributes::CACHE_NAME, "orders"),
                KeyValue::new(attributes::HANDLE_NAME, "edge"),
                KeyValue::new(attributes::HANDLE_NAME, "authority"),
                KeyValue::new(attributes::CACHE_ACTIVITY_NAME, CacheActivity::Miss.as_str()),
                KeyValue::new(attributes::CACHE_ACTIVITY_NAME, CacheActivity::Hit.as_str()),
                KeyValue::new(attributes::CACHE_ACTIVITY_NAME, CacheActivity::Added.as_str()),
            ]);
            assert!(tester.metric_names().iter().any(|name| name == "cache.size"));
        });
    }

    #[test]
    fn put_records_no_reads() {
        block_on(async {
            let tester = MetricTester::new();
            let cache = CacheManager::builder(Clock::new_frozen())
                .handle_with(MockHandle::with_items([item("k", 1)]), crate::HandleOptions::new("edge"))
                .handle_with(MockHandle::new(), crate::HandleOptions::new("authority"))
                .telemetry(TelemetryConfig::new().with_metrics(tester.meter_provider()))
                .build()
                .unwrap();

            cache.put(item("k", 2)).await.unwrap();

            tester.assert_attributes_contain(&[KeyValue::new(attributes::CACHE_OPERATION_NAME, CacheOperation::Put.as_str())]);
            tester.assert_attributes_absent(&[
                KeyValue::new(attributes::CACHE_OPERATION_NAME, CacheOperation::Get.as_str()),
                KeyValue::new(attributes::CACHE_ACTIVITY_NAME, CacheActivity::Hit.as_str()),
                KeyValue::new(attributes::CACHE_ACTIVITY_NAME, CacheActivity::Miss.as_str()),
            ]);
            assert_eq!(cache.handles()[0].stats().get(StatsCounter::PutCalls), 1);
            assert_eq!(cache.handles()[1].stats().get(StatsCounter::Items), 1);
        });
    }

    #[test]
    fn handle_failures_are_logged_as_errors() {
        block_on(async {
            let capture = LogCapture::new();
            let _guard = tracing::subscriber::set_default(capture.subscriber());

            let failing = MockHandle::<i32>::new();
            failing.fail_when(|_| true);
            let cache = CacheManager::builder(Clock::new_frozen())
                .handle_with(failing, crate::HandleOptions::new("broken"))
                .telemetry(TelemetryConfig::new().with_logs())
                .build()
                .unwrap();

            assert!(cache.put(item("k", 1)).await.is_err());

            capture.assert_contains("ERROR");
            capture.assert_contains("broken");
            capture.assert_contains(CacheActivity::Error.as_str());
        });
    }

    #[test]
    fn update_activity_follows_state() {
        assert!(matches!(
            update_activity(&UpdateItemResult::success(1, false, 1)),
            CacheActivity::Updated
        ));
        assert!(matches!(
            update_activity(&UpdateItemResult::<i32>::too_many_retries(3)),
            CacheActivity::Conflict
        ));
        assert!(matches!(
            update_activity(&UpdateItemResult::<i32>::item_did_not_exist()),
            CacheActivity::Unchanged
        ));
    }
}
