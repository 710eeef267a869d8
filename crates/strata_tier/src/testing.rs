// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Mock cache handle for testing.
//!
//! This module provides `MockHandle`, an in-memory handle that records every
//! operation and lets tests inject failures, add rejections and update outcomes.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use parking_lot::Mutex;

use crate::{CacheHandle, CacheItem, Error, Expiration, UpdateFn, UpdateItemConfig, UpdateItemResult, UpdateItemState};

/// Recorded handle operation with full context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOp<V> {
    /// A lookup.
    Get {
        /// The key looked up.
        key: String,
        /// The region looked up.
        region: Option<String>,
    },
    /// An add of the given item.
    Add(CacheItem<V>),
    /// A put of the given item.
    Put(CacheItem<V>),
    /// A removal.
    Remove {
        /// The key removed.
        key: String,
        /// The region removed from.
        region: Option<String>,
    },
    /// A clear of everything.
    Clear,
    /// A clear of one region.
    ClearRegion(String),
    /// An expiration change.
    Expire {
        /// The key.
        key: String,
        /// The region.
        region: Option<String>,
        /// The new expiration.
        expiration: Expiration,
    },
    /// An update.
    Update {
        /// The key updated.
        key: String,
        /// The region updated.
        region: Option<String>,
    },
}

type FailPredicate<V> = Box<dyn Fn(&HandleOp<V>) -> bool + Send + Sync>;
type ItemKey = (Option<String>, String);

fn item_key(key: &str, region: Option<&str>) -> ItemKey {
    (region.map(str::to_owned), key.to_owned())
}

/// A configurable mock handle for testing.
///
/// All operations are recorded for later verification. Clones share state, so
/// a test can keep one clone for inspection and hand another to a manager.
///
/// # Examples
///
/// ```
/// use strata_tier::{CacheHandle, CacheItem, testing::{HandleOp, MockHandle}};
///
/// # futures::executor::block_on(async {
/// let handle = MockHandle::<i32>::new();
/// handle.add(CacheItem::new("k", 1).unwrap()).await.unwrap();
///
/// // The next add is rejected as if another writer had won the race.
/// handle.reject_next_add(None);
/// assert!(!handle.add(CacheItem::new("other", 2).unwrap()).await.unwrap());
///
/// // Fail only removals.
/// handle.fail_when(|op| matches!(op, HandleOp::Remove { .. }));
/// assert!(handle.remove("k", None).await.is_err());
/// # });
/// ```
pub struct MockHandle<V> {
    data: Arc<Mutex<HashMap<ItemKey, CacheItem<V>>>>,
    operations: Arc<Mutex<Vec<HandleOp<V>>>>,
    fail_when: Arc<Mutex<Option<FailPredicate<V>>>>,
    add_rejections: Arc<Mutex<VecDeque<Option<V>>>>,
    update_script: Arc<Mutex<VecDeque<UpdateItemState>>>,
}

impl<V> std::fmt::Debug for MockHandle<V>
where
    V: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockHandle")
            .field("data", &self.data)
            .field("operations", &self.operations)
            .field("fail_when", &self.fail_when.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl<V> Clone for MockHandle<V> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            operations: Arc::clone(&self.operations),
            fail_when: Arc::clone(&self.fail_when),
            add_rejections: Arc::clone(&self.add_rejections),
            update_script: Arc::clone(&self.update_script),
        }
    }
}

impl<V> Default for MockHandle<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> MockHandle<V> {
    /// Creates a new empty mock handle.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: Arc::new(Mutex::new(HashMap::new())),
            operations: Arc::new(Mutex::new(Vec::new())),
            fail_when: Arc::new(Mutex::new(None)),
            add_rejections: Arc::new(Mutex::new(VecDeque::new())),
            update_script: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Creates a mock handle holding the given items.
    #[must_use]
    pub fn with_items(items: impl IntoIterator<Item = CacheItem<V>>) -> Self {
        let handle = Self::new();
        handle.data.lock().extend(
            items
                .into_iter()
                .map(|item| (item_key(item.key(), item.region()), item)),
        );
        handle
    }

    /// Returns the number of stored items.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.data.lock().len()
    }

    /// Returns true if the handle holds the key.
    #[must_use]
    pub fn contains(&self, key: &str, region: Option<&str>) -> bool {
        self.data.lock().contains_key(&item_key(key, region))
    }

    /// Sets a predicate that decides which operations fail with an error.
    pub fn fail_when<F>(&self, predicate: F)
    where
        F: Fn(&HandleOp<V>) -> bool + Send + Sync + 'static,
    {
        *self.fail_when.lock() = Some(Box::new(predicate));
    }

    /// Clears the failure predicate.
    pub fn clear_failures(&self) {
        *self.fail_when.lock() = None;
    }

    /// Makes the next add report `false`.
    ///
    /// With `racing_value`, that value is stored under the item's key at the
    /// same moment, as if a concurrent writer had inserted it first.
    pub fn reject_next_add(&self, racing_value: Option<V>) {
        self.add_rejections.lock().push_back(racing_value);
    }

    /// Makes the next update report `state` without touching the stored value.
    pub fn script_update(&self, state: UpdateItemState) {
        self.update_script.lock().push_back(state);
    }

    /// Clears all recorded operations.
    pub fn clear_operations(&self) {
        self.operations.lock().clear();
    }

    fn should_fail(&self, op: &HandleOp<V>) -> bool {
        self.fail_when.lock().as_ref().is_some_and(|predicate| predicate(op))
    }
}

impl<V> MockHandle<V>
where
    V: Clone,
{
    /// Returns a copy of the stored item.
    #[must_use]
    pub fn item(&self, key: &str, region: Option<&str>) -> Option<CacheItem<V>> {
        self.data.lock().get(&item_key(key, region)).cloned()
    }

    /// Returns a clone of all recorded operations.
    #[must_use]
    pub fn operations(&self) -> Vec<HandleOp<V>> {
        self.operations.lock().clone()
    }

    fn check(&self, op: HandleOp<V>, what: &str) -> Result<(), Error> {
        let fail = self.should_fail(&op);
        self.operations.lock().push(op);
        if fail {
            return Err(Error::from_message(format!("mock: {what} failed")));
        }
        Ok(())
    }
}

impl<V> CacheHandle<V> for MockHandle<V>
where
    V: Clone + Send + Sync,
{
    async fn get(&self, key: &str, region: Option<&str>) -> Result<Option<CacheItem<V>>, Error> {
        self.check(
            HandleOp::Get {
                key: key.to_owned(),
                region: region.map(str::to_owned),
            },
            "get",
        )?;
        Ok(self.item(key, region))
    }

    async fn add(&self, item: CacheItem<V>) -> Result<bool, Error> {
        self.check(HandleOp::Add(item.clone()), "add")?;
        let key = item_key(item.key(), item.region());
        if let Some(racing) = self.add_rejections.lock().pop_front() {
            if let Some(value) = racing {
                self.data.lock().insert(key, item.with_value(value));
            }
            return Ok(false);
        }
        let mut data = self.data.lock();
        if data.contains_key(&key) {
            return Ok(false);
        }
        data.insert(key, item);
        Ok(true)
    }

    async fn put(&self, item: CacheItem<V>) -> Result<(), Error> {
        self.check(HandleOp::Put(item.clone()), "put")?;
        self.data.lock().insert(item_key(item.key(), item.region()), item);
        Ok(())
    }

    async fn remove(&self, key: &str, region: Option<&str>) -> Result<bool, Error> {
        self.check(
            HandleOp::Remove {
                key: key.to_owned(),
                region: region.map(str::to_owned),
            },
            "remove",
        )?;
        Ok(self.data.lock().remove(&item_key(key, region)).is_some())
    }

    async fn clear(&self) -> Result<(), Error> {
        self.check(HandleOp::Clear, "clear")?;
        self.data.lock().clear();
        Ok(())
    }

    async fn clear_region(&self, region: &str) -> Result<(), Error> {
        self.check(HandleOp::ClearRegion(region.to_owned()), "clear_region")?;
        self.data.lock().retain(|(r, _), _| r.as_deref() != Some(region));
        Ok(())
    }

    async fn expire(&self, key: &str, region: Option<&str>, expiration: Expiration) -> Result<bool, Error> {
        self.check(
            HandleOp::Expire {
                key: key.to_owned(),
                region: region.map(str::to_owned),
                expiration,
            },
            "expire",
        )?;
        let mut data = self.data.lock();
        let Some(item) = data.remove(&item_key(key, region)) else {
            return Ok(false);
        };
        data.insert(item_key(key, region), item.with_expiration(expiration));
        Ok(true)
    }

    async fn update(
        &self,
        key: &str,
        region: Option<&str>,
        update: &UpdateFn<'_, V>,
        config: &UpdateItemConfig,
    ) -> Result<UpdateItemResult<V>, Error> {
        self.check(
            HandleOp::Update {
                key: key.to_owned(),
                region: region.map(str::to_owned),
            },
            "update",
        )?;

        if let Some(state) = self.update_script.lock().pop_front() {
            let conflict = state == UpdateItemState::TooManyRetries;
            let tries = if conflict { config.max_retries() + 1 } else { 1 };
            return Ok(UpdateItemResult::from_parts(None, state, conflict, tries));
        }

        let mut data = self.data.lock();
        let Some(current) = data.get_mut(&item_key(key, region)) else {
            return Ok(UpdateItemResult::item_did_not_exist());
        };
        match update(current.value()) {
            Some(value) => {
                *current = current.with_value(value.clone());
                Ok(UpdateItemResult::success(value, false, 1))
            }
            None => Ok(UpdateItemResult::factory_returned_none(false, 1)),
        }
    }

    fn len(&self) -> Option<u64> {
        Some(self.data.lock().len() as u64)
    }
}
