// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Core abstractions for the tiers of a strata cache manager.
//!
//! This crate defines the [`CacheHandle`] trait every tier implements, the
//! [`CacheItem`] stored in it, the [`HandleStats`] counters kept per tier, and
//! the types that describe an optimistic update ([`UpdateItemConfig`],
//! [`UpdateItemResult`]).
//!
//! # Overview
//!
//! A handle is one storage backend: an in-process map, a shared key-value
//! store, a document database. Handles know nothing about each other. The
//! `strata` crate chains them and keeps them consistent.
//!
//! # Implementing a Handle
//!
//! ```
//! use std::collections::HashMap;
//! use std::sync::Mutex;
//!
//! use strata_tier::{CacheHandle, CacheItem, Error, Expiration, UpdateFn, UpdateItemConfig, UpdateItemResult};
//!
//! struct MapHandle(Mutex<HashMap<(Option<String>, String), CacheItem<i32>>>);
//!
//! fn key(k: &str, r: Option<&str>) -> (Option<String>, String) {
//!     (r.map(str::to_owned), k.to_owned())
//! }
//!
//! impl CacheHandle<i32> for MapHandle {
//!     async fn get(&self, k: &str, r: Option<&str>) -> Result<Option<CacheItem<i32>>, Error> {
//!         Ok(self.0.lock().unwrap().get(&key(k, r)).cloned())
//!     }
//!
//!     async fn add(&self, item: CacheItem<i32>) -> Result<bool, Error> {
//!         let mut map = self.0.lock().unwrap();
//!         let k = key(item.key(), item.region());
//!         if map.contains_key(&k) {
//!             return Ok(false);
//!         }
//!         map.insert(k, item);
//!         Ok(true)
//!     }
//!
//!     async fn put(&self, item: CacheItem<i32>) -> Result<(), Error> {
//!         self.0.lock().unwrap().insert(key(item.key(), item.region()), item);
//!         Ok(())
//!     }
//!
//!     async fn remove(&self, k: &str, r: Option<&str>) -> Result<bool, Error> {
//!         Ok(self.0.lock().unwrap().remove(&key(k, r)).is_some())
//!     }
//!
//!     async fn clear(&self) -> Result<(), Error> {
//!         self.0.lock().unwrap().clear();
//!         Ok(())
//!     }
//!
//!     async fn clear_region(&self, region: &str) -> Result<(), Error> {
//!         self.0.lock().unwrap().retain(|(r, _), _| r.as_deref() != Some(region));
//!         Ok(())
//!     }
//!
//!     async fn expire(&self, _: &str, _: Option<&str>, _: Expiration) -> Result<bool, Error> {
//!         Ok(false)
//!     }
//!
//!     async fn update(
//!         &self,
//!         k: &str,
//!         r: Option<&str>,
//!         update: &UpdateFn<'_, i32>,
//!         _config: &UpdateItemConfig,
//!     ) -> Result<UpdateItemResult<i32>, Error> {
//!         let mut map = self.0.lock().unwrap();
//!         let Some(item) = map.get_mut(&key(k, r)) else {
//!             return Ok(UpdateItemResult::item_did_not_exist());
//!         };
//!         match update(item.value()) {
//!             Some(v) => {
//!                 *item = item.with_value(v);
//!                 Ok(UpdateItemResult::success(v, false, 1))
//!             }
//!             None => Ok(UpdateItemResult::factory_returned_none(false, 1)),
//!         }
//!     }
//! }
//! ```
//!
//! # Dynamic Dispatch
//!
//! [`DynamicHandle`] wraps any `CacheHandle` in a type-erased, clonable
//! container so tiers of different types can share one chain.

mod dynamic;
pub mod error;
mod expiration;
mod handle;
mod item;
mod stats;
#[cfg(any(feature = "test-util", test))]
pub mod testing;
mod update;

#[doc(inline)]
pub use dynamic::{DynamicHandle, DynamicHandleExt};
#[doc(inline)]
pub use error::{Error, ErrorKind, Result};
#[doc(inline)]
pub use expiration::Expiration;
#[doc(inline)]
pub use handle::CacheHandle;
#[doc(inline)]
pub use item::CacheItem;
#[doc(inline)]
pub use stats::{HandleStats, StatsCounter};
#[doc(inline)]
pub use update::{UpdateFn, UpdateItemConfig, UpdateItemResult, UpdateItemState, VersionConflictPolicy};
