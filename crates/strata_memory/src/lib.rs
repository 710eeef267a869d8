// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! In-process cache handle backed by moka.
//!
//! This crate provides [`MemoryHandle`], the fast edge tier of a strata cache
//! chain. It keeps a version per item so updates can be applied optimistically,
//! expires items lazily against a [`tick::Clock`], and supports clearing a
//! single region.
//!
//! # Quick Start
//!
//! ```
//! use strata_memory::MemoryHandle;
//! use strata_tier::{CacheHandle, CacheItem, UpdateItemConfig};
//! use tick::Clock;
//!
//! # futures::executor::block_on(async {
//! let handle = MemoryHandle::<i32>::builder(Clock::new_frozen())
//!     .max_capacity(1000)
//!     .build();
//!
//! handle.put(CacheItem::new("counter", 1)?).await?;
//! let result = handle
//!     .update("counter", None, &|v| Some(v + 1), &UpdateItemConfig::default())
//!     .await?;
//! assert_eq!(result.value(), Some(&2));
//! # Ok::<(), strata_tier::Error>(())
//! # }).unwrap();
//! ```

pub mod builder;
pub mod handle;

#[doc(inline)]
pub use builder::MemoryHandleBuilder;
#[doc(inline)]
pub use handle::MemoryHandle;
