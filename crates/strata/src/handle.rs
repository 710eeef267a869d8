// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A handle as seen by the cache manager: the tier, its name and its counters.

use strata_tier::{DynamicHandle, HandleStats};

/// Per-handle settings supplied when a handle is added to a manager.
///
/// # Examples
///
/// ```
/// use strata::HandleOptions;
///
/// let options = HandleOptions::new("redis").back_plate_source().without_statistics();
/// assert_eq!(options.name(), "redis");
/// assert!(options.is_back_plate_source());
/// assert!(!options.statistics_enabled());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleOptions {
    name: String,
    enable_statistics: bool,
    back_plate_source: bool,
}

impl HandleOptions {
    /// Options for a handle called `name`, with statistics enabled.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enable_statistics: true,
            back_plate_source: false,
        }
    }

    /// Turns every statistics counter of the handle into a no-op.
    #[must_use]
    pub fn without_statistics(mut self) -> Self {
        self.enable_statistics = false;
        self
    }

    /// Sets whether statistics are recorded.
    #[must_use]
    pub fn with_statistics(mut self, enabled: bool) -> Self {
        self.enable_statistics = enabled;
        self
    }

    /// Marks the handle as the one whose writes every instance already sees.
    ///
    /// Remote invalidations received over the back-plate skip this handle.
    #[must_use]
    pub fn back_plate_source(mut self) -> Self {
        self.back_plate_source = true;
        self
    }

    /// The handle name used in logs and metrics.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether statistics are recorded.
    #[must_use]
    pub fn statistics_enabled(&self) -> bool {
        self.enable_statistics
    }

    /// Whether the handle is the back-plate source.
    #[must_use]
    pub fn is_back_plate_source(&self) -> bool {
        self.back_plate_source
    }
}

/// One handle in a manager's chain.
#[derive(Debug)]
pub struct ManagedHandle<V> {
    handle: DynamicHandle<V>,
    name: String,
    stats: HandleStats,
    back_plate_source: bool,
}

impl<V> ManagedHandle<V> {
    pub(crate) fn new(handle: DynamicHandle<V>, options: HandleOptions) -> Self {
        Self {
            handle,
            stats: HandleStats::new(options.enable_statistics),
            name: options.name,
            back_plate_source: options.back_plate_source,
        }
    }

    /// The handle name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The handle's statistics counters.
    #[must_use]
    pub fn stats(&self) -> &HandleStats {
        &self.stats
    }

    /// Whether remote invalidations skip this handle.
    #[must_use]
    pub fn is_back_plate_source(&self) -> bool {
        self.back_plate_source
    }

    /// The underlying tier.
    ///
    /// Calls made directly on it bypass the manager: no propagation, no
    /// statistics, no events.
    #[must_use]
    pub fn handle(&self) -> &DynamicHandle<V> {
        &self.handle
    }
}
