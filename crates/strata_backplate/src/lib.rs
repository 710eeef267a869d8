// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Cross-process invalidation for strata caches.
//!
//! When several processes keep their own in-memory tier in front of a shared
//! distributed tier, a write in one process leaves stale copies in the others.
//! The [`BackPlate`] closes that gap: every local mutation is published on a
//! pub/sub channel, and every other instance evicts or clears the matching
//! items when it receives the message.
//!
//! - **Batching**: by default notifications are collected into a deduplicated
//!   set and published together once per interval. A queued clear discards
//!   everything queued before it.
//! - **Loop prevention**: every message carries the identifier of the sending
//!   instance, and an instance ignores its own messages.
//! - **Transport seam**: [`BackPlateTransport`] abstracts the message bus. The
//!   crate ships [`InProcessTransport`], shared by connection string through a
//!   [`TransportRegistry`].
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//!
//! use futures::future::BoxFuture;
//! use strata_backplate::{BackPlate, BackPlateAction, BackPlateListener, PublishMode, TransportRegistry};
//! use tick::Clock;
//!
//! struct PrintListener;
//!
//! impl BackPlateListener for PrintListener {
//!     fn on_action(&self, action: BackPlateAction) -> BoxFuture<'_, ()> {
//!         Box::pin(async move { println!("remote: {action:?}") })
//!     }
//! }
//!
//! # futures::executor::block_on(async {
//! let registry = TransportRegistry::new();
//! let connect = || std::future::ready(registry.connect("bus"));
//!
//! let sender = BackPlate::builder(Clock::new_frozen())
//!     .publish_mode(PublishMode::Immediate)
//!     .connect(connect)
//!     .await?;
//! let receiver = BackPlate::builder(Clock::new_frozen()).connect(connect).await?;
//! receiver.set_listener(Arc::new(PrintListener));
//!
//! sender.notify_removed("user:1", None).await?;
//! # Ok::<(), strata_tier::Error>(())
//! # }).unwrap();
//! ```

mod back_plate;
mod builder;
mod in_process;
pub mod message;
mod retry;
mod transport;

#[doc(inline)]
pub use back_plate::{BackPlate, BackPlateListener, BackPlateStats, DEFAULT_CHANNEL_NAME, DEFAULT_FLUSH_INTERVAL, PublishMode};
#[doc(inline)]
pub use builder::BackPlateBuilder;
#[doc(inline)]
pub use in_process::{InProcessBus, InProcessTransport, TransportRegistry};
#[doc(inline)]
pub use message::{BackPlateAction, BackPlateMessage};
#[doc(inline)]
pub use transport::{BackPlateTransport, MessageStream};
