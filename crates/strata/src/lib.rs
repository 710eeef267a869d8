// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! One logical cache over an ordered chain of cache handles.
//!
//! A [`CacheManager`] fronts several tiers (a fast in-process map, a shared
//! distributed store, ...) and keeps them consistent:
//!
//! - Reads walk from the edge to the authority and warm faster tiers with
//!   what slower tiers return, as chosen by the [`CacheUpdateMode`].
//! - Adds and optimistic updates start at the authority. Whenever tiers may
//!   disagree about a key, the key is evicted from the tiers that could hold
//!   a stale copy.
//! - With a [`BackPlate`], local writes are published to other instances,
//!   which evict their own copies.
//!
//! # Examples
//!
//! ## Two Tiers
//!
//! ```
//! use strata::{CacheEvent, CacheItem, CacheManager, MemoryHandle};
//! use tick::Clock;
//!
//! # futures::executor::block_on(async {
//! let clock = Clock::new_frozen();
//! let cache = CacheManager::builder(clock.clone())
//!     .handle(MemoryHandle::new(clock.clone()))
//!     .handle(MemoryHandle::new(clock))
//!     .build()?;
//!
//! cache.on_event(|event| {
//!     if let CacheEvent::Put { key, .. } = event {
//!         println!("stored {key}");
//!     }
//! });
//!
//! cache.put(CacheItem::new("answer", 42)?).await?;
//! assert_eq!(cache.get("answer", None).await?, Some(42));
//! # Ok::<(), strata::Error>(())
//! # }).unwrap();
//! ```
//!
//! ## Add or Update
//!
//! ```
//! use strata::{CacheItem, CacheManager, MemoryHandle};
//! use tick::Clock;
//!
//! # futures::executor::block_on(async {
//! let clock = Clock::new_frozen();
//! let cache = CacheManager::builder(clock.clone()).handle(MemoryHandle::new(clock)).build()?;
//! let config = cache.update_config();
//!
//! let first = cache.add_or_update(CacheItem::new("hits", 1)?, |v| Some(v + 1), &config).await?;
//! let second = cache.add_or_update(CacheItem::new("hits", 1)?, |v| Some(v + 1), &config).await?;
//! assert_eq!((first, second), (Some(1), Some(2)));
//! # Ok::<(), strata::Error>(())
//! # }).unwrap();
//! ```
//!
//! # Features
//!
//! - `memory` (default): re-exports [`MemoryHandle`].
//! - `logs`, `metrics`: per-handle telemetry, see [`TelemetryConfig`].
//! - `serde`: declarative configuration through `CacheManagerConfig`.
//! - `tokio`: `BackPlate::spawn_tokio`.
//! - `test-util`: re-exports [`MockHandle`](strata_tier::testing::MockHandle).

mod builder;
#[cfg(feature = "serde")]
#[cfg_attr(docsrs, doc(cfg(feature = "serde")))]
pub mod config;
mod events;
mod handle;
mod manager;
mod mode;
mod remote;
mod telemetry;

#[doc(inline)]
pub use builder::{CacheManagerBuilder, DEFAULT_CACHE_NAME};
#[cfg(feature = "serde")]
#[doc(inline)]
pub use config::CacheManagerConfig;
#[doc(inline)]
pub use events::{CacheEvent, EventOrigin, ListenerId};
#[doc(inline)]
pub use handle::{HandleOptions, ManagedHandle};
#[doc(inline)]
pub use manager::CacheManager;
#[doc(inline)]
pub use mode::CacheUpdateMode;
#[doc(inline)]
pub use strata_backplate::{BackPlate, BackPlateBuilder, BackPlateStats, PublishMode, TransportRegistry};
#[cfg(feature = "memory")]
#[doc(inline)]
pub use strata_memory::MemoryHandle;
#[doc(inline)]
pub use strata_tier::{
    CacheHandle, CacheItem, DynamicHandle, DynamicHandleExt, Error, ErrorKind, Expiration, HandleStats, Result, StatsCounter,
    UpdateItemConfig, UpdateItemResult, UpdateItemState, VersionConflictPolicy,
};
#[cfg(any(feature = "test-util", test))]
#[doc(inline)]
pub use strata_tier::testing::{HandleOp, MockHandle};
#[doc(inline)]
pub use telemetry::config::TelemetryConfig;
