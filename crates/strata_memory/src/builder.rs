// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Builder for configuring memory handles.
//!
//! This module provides a builder API for `MemoryHandle` that keeps moka's
//! configuration types out of the public API.

use std::marker::PhantomData;

use strata_tier::Expiration;
use tick::Clock;

use crate::handle::MemoryHandle;

/// Builder for configuring a `MemoryHandle`.
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
/// let handle = MemoryHandle::<i32>::builder(Clock::new_frozen())
///     .max_capacity(1000)
///     .initial_capacity(100)
///     .default_expiration(Expiration::Absolute(Duration::from_secs(300)))
///     .name("orders")
///     .build();
/// ```
#[derive(Debug)]
pub struct MemoryHandleBuilder<V> {
    pub(crate) clock: Clock,
    pub(crate) max_capacity: Option<u64>,
    pub(crate) initial_capacity: Option<usize>,
    pub(crate) default_expiration: Expiration,
    pub(crate) name: Option<String>,
    _phantom: PhantomData<V>,
}

impl<V> MemoryHandleBuilder<V> {
    /// Creates a builder for an unbounded handle whose items never expire by default.
    #[must_use]
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            max_capacity: None,
            initial_capacity: None,
            default_expiration: Expiration::Never,
            name: None,
            _phantom: PhantomData,
        }
    }

    /// Sets the maximum number of items.
    ///
    /// Once the capacity is reached, items are evicted using moka's `TinyLFU`
    /// policy. If not set, the handle is unbounded.
    #[must_use]
    pub fn max_capacity(mut self, capacity: u64) -> Self {
        self.max_capacity = Some(capacity);
        self
    }

    /// Sets the initial capacity (pre-allocation hint).
    #[must_use]
    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = Some(capacity);
        self
    }

    /// Sets the expiration used for items stored with [`Expiration::Default`].
    ///
    /// Passing [`Expiration::Default`] here means "never".
    #[must_use]
    pub fn default_expiration(mut self, expiration: Expiration) -> Self {
        self.default_expiration = expiration.or(Expiration::Never);
        self
    }

    /// Sets a name that shows up in moka's debugging output.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Builds the configured `MemoryHandle`.
    #[must_use]
    pub fn build(self) -> MemoryHandle<V>
    where
        V: Clone + Send + Sync + 'static,
    {
        MemoryHandle::from_builder(self)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn defaults_to_never_expiring() {
        let builder = MemoryHandleBuilder::<i32>::new(Clock::new_frozen());
        assert_eq!(builder.default_expiration, Expiration::Never);
        assert!(builder.max_capacity.is_none());
    }

    #[test]
    fn default_expiration_cannot_stay_default() {
        let builder = MemoryHandleBuilder::<i32>::new(Clock::new_frozen()).default_expiration(Expiration::Default);
        assert_eq!(builder.default_expiration, Expiration::Never);

        let builder = builder.default_expiration(Expiration::Sliding(Duration::from_secs(1)));
        assert_eq!(builder.default_expiration, Expiration::Sliding(Duration::from_secs(1)));
    }

    #[test]
    fn build_carries_settings() {
        let handle = MemoryHandleBuilder::<i32>::new(Clock::new_frozen())
            .max_capacity(10)
            .initial_capacity(5)
            .name("test")
            .default_expiration(Expiration::Absolute(Duration::from_secs(3)))
            .build();
        assert_eq!(handle.default_expiration(), Expiration::Absolute(Duration::from_secs(3)));
    }
}
