// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-handle statistics counters.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
};

use parking_lot::RwLock;

use crate::{CacheItem, UpdateItemResult};

/// A statistics counter kept for every handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatsCounter {
    /// Lookups that found an item.
    Hits,
    /// Lookups that found nothing.
    Misses,
    /// Lookups of any outcome.
    GetCalls,
    /// Successful adds.
    AddCalls,
    /// Puts.
    PutCalls,
    /// Successful removals.
    RemoveCalls,
    /// Clears.
    ClearCalls,
    /// Region clears.
    ClearRegionCalls,
    /// Successful updates.
    UpdateCalls,
    /// Items currently believed to be stored.
    Items,
}

impl StatsCounter {
    /// All counters, in declaration order.
    pub const ALL: [Self; 10] = [
        Self::Hits,
        Self::Misses,
        Self::GetCalls,
        Self::AddCalls,
        Self::PutCalls,
        Self::RemoveCalls,
        Self::ClearCalls,
        Self::ClearRegionCalls,
        Self::UpdateCalls,
        Self::Items,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Default)]
struct Counters([AtomicI64; StatsCounter::ALL.len()]);

impl Counters {
    fn incr(&self, counter: StatsCounter) {
        self.add(counter, 1);
    }

    fn add(&self, counter: StatsCounter, delta: i64) {
        self.0[counter.index()].fetch_add(delta, Ordering::Relaxed);
    }

    fn set(&self, counter: StatsCounter, value: i64) {
        self.0[counter.index()].store(value, Ordering::Relaxed);
    }

    fn get(&self, counter: StatsCounter) -> i64 {
        self.0[counter.index()].load(Ordering::Relaxed)
    }
}

/// Statistics collected for one handle.
///
/// Counters are kept once for the whole handle and once per region. When
/// statistics are disabled every `on_*` call is a no-op.
///
/// # Examples
///
/// ```
/// use strata_tier::{HandleStats, StatsCounter};
///
/// let stats = HandleStats::new(true);
/// stats.on_get(Some("region"));
/// stats.on_miss(Some("region"));
///
/// assert_eq!(stats.get(StatsCounter::Misses), 1);
/// assert_eq!(stats.get_for_region(StatsCounter::Misses, "region"), 1);
/// ```
#[derive(Debug)]
pub struct HandleStats {
    enabled: bool,
    total: Counters,
    regions: RwLock<HashMap<String, Arc<Counters>>>,
}

impl HandleStats {
    /// Creates a statistics sink.
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            total: Counters::default(),
            regions: RwLock::new(HashMap::new()),
        }
    }

    /// Whether counters are being recorded.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Reads a counter for the whole handle.
    #[must_use]
    pub fn get(&self, counter: StatsCounter) -> i64 {
        self.total.get(counter)
    }

    /// Reads a counter for one region. Unknown regions read as zero.
    #[must_use]
    pub fn get_for_region(&self, counter: StatsCounter, region: &str) -> i64 {
        self.regions.read().get(region).map_or(0, |c| c.get(counter))
    }

    /// Records a lookup.
    pub fn on_get(&self, region: Option<&str>) {
        self.record(region, |c| c.incr(StatsCounter::GetCalls));
    }

    /// Records a lookup that found an item.
    pub fn on_hit(&self, region: Option<&str>) {
        self.record(region, |c| c.incr(StatsCounter::Hits));
    }

    /// Records a lookup that found nothing.
    pub fn on_miss(&self, region: Option<&str>) {
        self.record(region, |c| c.incr(StatsCounter::Misses));
    }

    /// Records a successful add.
    pub fn on_add<V>(&self, item: &CacheItem<V>) {
        self.record(item.region(), |c| {
            c.incr(StatsCounter::AddCalls);
            c.incr(StatsCounter::Items);
        });
    }

    /// Records a put. `item_added` tells whether the key was new to this handle.
    pub fn on_put<V>(&self, item: &CacheItem<V>, item_added: bool) {
        self.record(item.region(), |c| {
            c.incr(StatsCounter::PutCalls);
            if item_added {
                c.incr(StatsCounter::Items);
            }
        });
    }

    /// Records a successful removal.
    pub fn on_remove(&self, region: Option<&str>) {
        self.record(region, |c| {
            c.incr(StatsCounter::RemoveCalls);
            c.add(StatsCounter::Items, -1);
        });
    }

    /// Records a clear of the whole handle.
    pub fn on_clear(&self) {
        if !self.enabled {
            return;
        }
        self.total.incr(StatsCounter::ClearCalls);
        self.total.set(StatsCounter::Items, 0);
        for counters in self.regions.read().values() {
            counters.set(StatsCounter::Items, 0);
        }
    }

    /// Records a clear of one region.
    pub fn on_clear_region(&self, region: &str) {
        if !self.enabled {
            return;
        }
        self.total.incr(StatsCounter::ClearRegionCalls);
        let counters = self.region(region);
        let dropped = counters.get(StatsCounter::Items);
        counters.incr(StatsCounter::ClearRegionCalls);
        counters.set(StatsCounter::Items, 0);
        self.total.add(StatsCounter::Items, -dropped);
    }

    /// Records an update. Only successful updates are counted.
    pub fn on_update<V>(&self, region: Option<&str>, result: &UpdateItemResult<V>) {
        if result.is_success() {
            self.record(region, |c| c.incr(StatsCounter::UpdateCalls));
        }
    }

    fn record(&self, region: Option<&str>, apply: impl Fn(&Counters)) {
        if !self.enabled {
            return;
        }
        apply(&self.total);
        if let Some(region) = region {
            apply(&self.region(region));
        }
    }

    fn region(&self, region: &str) -> Arc<Counters> {
        if let Some(existing) = self.regions.read().get(region) {
            return Arc::clone(existing);
        }
        Arc::clone(self.regions.write().entry(region.to_owned()).or_default())
    }
}

impl Default for HandleStats {
    fn default() -> Self {
        Self::new(true)
    }
}
