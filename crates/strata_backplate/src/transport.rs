// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The pub/sub seam the back-plate publishes through.

use futures::stream::BoxStream;
use strata_tier::Error;

/// Payloads delivered on a subscribed channel.
pub type MessageStream = BoxStream<'static, String>;

/// A publish/subscribe transport.
///
/// Implement this to connect the back-plate to a message bus. The transport
/// only moves opaque payloads; batching, deduplication and loop prevention
/// happen in [`BackPlate`](crate::BackPlate).
///
/// A subscription stream should end once the channel is unsubscribed.
#[dynosaur::dynosaur(pub(crate) DynBackPlateTransport = dyn(box) BackPlateTransport, bridge(none))]
pub trait BackPlateTransport: Send + Sync {
    /// Publishes a payload to every subscriber of `channel`.
    fn publish(&self, channel: &str, payload: String) -> impl Future<Output = Result<(), Error>> + Send;

    /// Subscribes to `channel`.
    fn subscribe(&self, channel: &str) -> impl Future<Output = Result<MessageStream, Error>> + Send;

    /// Stops every subscription this transport holds on `channel`.
    fn unsubscribe(&self, channel: &str) -> impl Future<Output = Result<(), Error>> + Send;
}
