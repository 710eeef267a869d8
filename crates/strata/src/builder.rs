// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Builder for cache managers.

use std::sync::Arc;

use strata_backplate::BackPlate;
use strata_tier::{CacheHandle, DynamicHandleExt, Error, ErrorKind, UpdateItemConfig};
use tick::Clock;

use crate::{
    events::Listeners,
    handle::{HandleOptions, ManagedHandle},
    manager::{CacheManager, ManagerInner},
    mode::CacheUpdateMode,
    remote::RemoteListener,
    telemetry::config::TelemetryConfig,
};

/// Name given to managers built without one.
pub const DEFAULT_CACHE_NAME: &str = "default";

/// Configures and builds a [`CacheManager`].
///
/// Handles are added in order: the first one is the edge, the last one the
/// authority.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use strata::{BackPlate, CacheManager, CacheUpdateMode, HandleOptions, MemoryHandle, TransportRegistry};
/// use tick::Clock;
///
/// # futures::executor::block_on(async {
/// let clock = Clock::new_frozen();
/// let registry = TransportRegistry::new();
/// let back_plate = BackPlate::builder(clock.clone())
///     .connect(|| std::future::ready(registry.connect("bus")))
///     .await?;
///
/// let cache = CacheManager::builder::<String>(clock.clone())
///     .name("sessions")
///     .update_mode(CacheUpdateMode::Full)
///     .max_retries(10)
///     .handle_with(MemoryHandle::new(clock.clone()), HandleOptions::new("local"))
///     .handle_with(MemoryHandle::new(clock), HandleOptions::new("shared").back_plate_source())
///     .back_plate(back_plate)
///     .build()?;
///
/// assert_eq!(cache.handles().len(), 2);
/// # Ok::<(), strata::Error>(())
/// # }).unwrap();
/// ```
#[derive(Debug)]
pub struct CacheManagerBuilder<V> {
    clock: Clock,
    name: String,
    update_mode: CacheUpdateMode,
    max_retries: u32,
    handles: Vec<ManagedHandle<V>>,
    back_plate: Option<BackPlate>,
    telemetry: Option<TelemetryConfig>,
}

impl<V> CacheManagerBuilder<V> {
    pub(crate) fn new(clock: Clock) -> Self {
        Self {
            clock,
            name: DEFAULT_CACHE_NAME.to_owned(),
            update_mode: CacheUpdateMode::default(),
            max_retries: UpdateItemConfig::DEFAULT_MAX_RETRIES,
            handles: Vec::new(),
            back_plate: None,
            telemetry: None,
        }
    }

    /// Sets the name used in logs and metrics.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets how hits are copied into other handles.
    #[must_use]
    pub fn update_mode(mut self, mode: CacheUpdateMode) -> Self {
        self.update_mode = mode;
        self
    }

    /// Sets the retry budget of [`CacheManager::update`].
    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Appends a handle with default options, named after its position.
    #[must_use]
    pub fn handle<H>(self, handle: H) -> Self
    where
        H: CacheHandle<V> + 'static,
    {
        let name = format!("handle-{}", self.handles.len());
        self.handle_with(handle, HandleOptions::new(name))
    }

    /// Appends a handle with the given options.
    #[must_use]
    pub fn handle_with<H>(mut self, handle: H, options: HandleOptions) -> Self
    where
        H: CacheHandle<V> + 'static,
    {
        self.handles.push(ManagedHandle::new(handle.into_dynamic(), options));
        self
    }

    /// Publishes local changes on `back_plate` and applies the changes other
    /// instances publish.
    ///
    /// Exactly one handle must then be marked with
    /// [`HandleOptions::back_plate_source`].
    #[must_use]
    pub fn back_plate(mut self, back_plate: BackPlate) -> Self {
        self.back_plate = Some(back_plate);
        self
    }

    /// Enables logs and/or metrics for every handle call.
    #[must_use]
    pub fn telemetry(mut self, config: TelemetryConfig) -> Self {
        self.telemetry = Some(config);
        self
    }
}

impl<V> CacheManagerBuilder<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Builds the manager and, when a back-plate is set, starts applying
    /// remote changes.
    ///
    /// Remote messages are only delivered while [`BackPlate::run`] is being
    /// polled.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorKind::Configuration`] error when there are no
    /// handles, a blank name, more than one back-plate source, or a
    /// back-plate without a source handle.
    pub fn build(self) -> Result<CacheManager<V>, Error> {
        if self.name.trim().is_empty() {
            return Err(Error::with_kind(ErrorKind::Configuration, "cache name must not be blank"));
        }
        if self.handles.is_empty() {
            return Err(Error::with_kind(
                ErrorKind::Configuration,
                "a cache manager needs at least one handle",
            ));
        }

        let sources = self.handles.iter().filter(|h| h.is_back_plate_source()).count();
        if sources > 1 {
            return Err(Error::with_kind(
                ErrorKind::Configuration,
                "only one handle can be the back-plate source",
            ));
        }
        if self.back_plate.is_some() && sources == 0 {
            return Err(Error::with_kind(
                ErrorKind::Configuration,
                "a back-plate requires one handle marked as back-plate source",
            ));
        }

        tracing::info!(
            cache.name = %self.name,
            handles = self.handles.len(),
            update_mode = ?self.update_mode,
            back_plate = self.back_plate.is_some(),
            "cache manager created"
        );

        let inner = Arc::new(ManagerInner {
            name: self.name,
            clock: self.clock,
            handles: self.handles,
            update_mode: self.update_mode,
            max_retries: self.max_retries,
            back_plate: self.back_plate,
            listeners: Listeners::default(),
            telemetry: self.telemetry.map(TelemetryConfig::build),
        });

        if let Some(back_plate) = &inner.back_plate {
            back_plate.set_listener(Arc::new(RemoteListener::new(Arc::downgrade(&inner))));
        }

        Ok(CacheManager::from_inner(inner))
    }
}
