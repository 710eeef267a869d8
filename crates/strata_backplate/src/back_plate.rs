// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::{
    collections::HashSet,
    fmt,
    pin::pin,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use futures::{StreamExt, future::BoxFuture};
use parking_lot::{Mutex, RwLock};
use strata_tier::Error;
use tick::{Clock, PeriodicTimer};

use crate::{
    builder::BackPlateBuilder,
    message::{BackPlateAction, BackPlateMessage, join_batch, source_prefix, split_batch},
    transport::{BackPlateTransport, DynBackPlateTransport, MessageStream},
};

/// The default interval between batch flushes.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

/// The default channel name.
pub const DEFAULT_CHANNEL_NAME: &str = "CacheManagerBackPlate";

/// When notifications leave the instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishMode {
    /// Notifications are deduplicated and published together once per interval.
    Batched(Duration),
    /// Every notification is published as soon as it is made.
    Immediate,
}

impl Default for PublishMode {
    fn default() -> Self {
        Self::Batched(DEFAULT_FLUSH_INTERVAL)
    }
}

/// Receives actions published by other instances.
pub trait BackPlateListener: Send + Sync {
    /// Handles one remote action.
    fn on_action(&self, action: BackPlateAction) -> BoxFuture<'_, ()>;
}

/// A snapshot of back-plate activity counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct BackPlateStats {
    /// Messages waiting for the next flush.
    pub pending: usize,
    /// Duplicates dropped since the last successful flush.
    pub skipped: u64,
    /// Payloads published successfully.
    pub sent_batches: u64,
    /// Messages contained in those payloads.
    pub sent_messages: u64,
    /// Messages from other instances handed to the listener.
    pub received_messages: u64,
    /// Publish attempts that failed.
    pub failed_publishes: u64,
}

/// Pending messages in insertion order with set semantics.
#[derive(Debug, Default)]
struct Pending {
    order: Vec<String>,
    seen: HashSet<String>,
    skipped: u64,
}

impl Pending {
    fn insert(&mut self, message: String) -> bool {
        if self.seen.contains(&message) {
            return false;
        }
        self.seen.insert(message.clone());
        self.order.push(message);
        true
    }

    fn discard_all(&mut self) {
        self.order.clear();
        self.seen.clear();
    }

    fn take(&mut self) -> (Vec<String>, u64) {
        self.seen.clear();
        (std::mem::take(&mut self.order), std::mem::take(&mut self.skipped))
    }
}

#[derive(Debug, Default)]
struct Counters {
    sent_batches: AtomicU64,
    sent_messages: AtomicU64,
    received_messages: AtomicU64,
    failed_publishes: AtomicU64,
}

struct BackPlateInner {
    identifier: String,
    own_prefix: String,
    clear_message: String,
    channel: String,
    mode: PublishMode,
    clock: Clock,
    transport: Arc<DynBackPlateTransport<'static>>,
    pending: Mutex<Pending>,
    subscription: Mutex<Option<MessageStream>>,
    listener: RwLock<Option<Arc<dyn BackPlateListener>>>,
    disposed: AtomicBool,
    counters: Counters,
}

/// Propagates cache mutations to other instances over a pub/sub transport.
///
/// Local mutations are reported through the `notify_*` methods. In
/// [`PublishMode::Batched`] they are collected into a deduplicated pending set
/// that [`flush`](Self::flush) publishes as a single payload; a queued
/// [`Clear`](BackPlateAction::Clear) discards everything queued before it.
/// Received payloads go through [`receive`](Self::receive), which drops the
/// instance's own messages and hands the rest to the registered
/// [`BackPlateListener`].
///
/// [`run`](Self::run) drives both directions: it forwards the subscription to
/// `receive` and flushes on every interval tick.
///
/// Cloning is cheap; clones share all state.
#[derive(Clone)]
pub struct BackPlate {
    inner: Arc<BackPlateInner>,
}

impl fmt::Debug for BackPlate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackPlate")
            .field("identifier", &self.inner.identifier)
            .field("channel", &self.inner.channel)
            .field("mode", &self.inner.mode)
            .finish_non_exhaustive()
    }
}

impl BackPlate {
    /// Creates a builder for connecting a back-plate.
    #[must_use]
    pub fn builder(clock: Clock) -> BackPlateBuilder {
        BackPlateBuilder::new(clock)
    }

    pub(crate) fn from_parts(
        identifier: String,
        channel: String,
        mode: PublishMode,
        clock: Clock,
        transport: Arc<DynBackPlateTransport<'static>>,
        subscription: MessageStream,
    ) -> Self {
        let own_prefix = source_prefix(&identifier);
        let clear_message = BackPlateMessage::new(identifier.clone(), BackPlateAction::Clear).encode();
        Self {
            inner: Arc::new(BackPlateInner {
                identifier,
                own_prefix,
                clear_message,
                channel,
                mode,
                clock,
                transport,
                pending: Mutex::new(Pending::default()),
                subscription: Mutex::new(Some(subscription)),
                listener: RwLock::new(None),
                disposed: AtomicBool::new(false),
                counters: Counters::default(),
            }),
        }
    }

    /// The unique identifier this instance stamps on its messages.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.inner.identifier
    }

    /// The channel messages are published to.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.inner.channel
    }

    /// How notifications are published.
    #[must_use]
    pub fn publish_mode(&self) -> PublishMode {
        self.inner.mode
    }

    /// Registers the listener that receives remote actions, replacing any previous one.
    pub fn set_listener(&self, listener: Arc<dyn BackPlateListener>) {
        *self.inner.listener.write() = Some(listener);
    }

    /// Removes the registered listener.
    pub fn clear_listener(&self) {
        *self.inner.listener.write() = None;
    }

    /// Whether [`dispose`](Self::dispose) has been called.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Reports that `key` was written or updated.
    ///
    /// # Errors
    ///
    /// Fails only in [`PublishMode::Immediate`] when publishing fails.
    pub async fn notify_changed(&self, key: &str, region: Option<&str>) -> Result<(), Error> {
        self.notify(BackPlateAction::Changed {
            key: key.to_owned(),
            region: region.map(str::to_owned),
        })
        .await
    }

    /// Reports that `key` was removed.
    ///
    /// # Errors
    ///
    /// Fails only in [`PublishMode::Immediate`] when publishing fails.
    pub async fn notify_removed(&self, key: &str, region: Option<&str>) -> Result<(), Error> {
        self.notify(BackPlateAction::Removed {
            key: key.to_owned(),
            region: region.map(str::to_owned),
        })
        .await
    }

    /// Reports that the whole cache was cleared.
    ///
    /// # Errors
    ///
    /// Fails only in [`PublishMode::Immediate`] when publishing fails.
    pub async fn notify_clear(&self) -> Result<(), Error> {
        self.notify(BackPlateAction::Clear).await
    }

    /// Reports that `region` was cleared.
    ///
    /// # Errors
    ///
    /// Fails only in [`PublishMode::Immediate`] when publishing fails.
    pub async fn notify_clear_region(&self, region: &str) -> Result<(), Error> {
        self.notify(BackPlateAction::ClearRegion { region: region.to_owned() }).await
    }

    async fn notify(&self, action: BackPlateAction) -> Result<(), Error> {
        if self.is_disposed() {
            tracing::debug!(channel = %self.inner.channel, "back-plate is disposed, dropping notification");
            return Ok(());
        }

        let message = BackPlateMessage::new(self.inner.identifier.clone(), action);
        match self.inner.mode {
            PublishMode::Batched(_) => {
                self.enqueue(&message);
                Ok(())
            }
            PublishMode::Immediate => self.publish(vec![message.encode()], 0).await,
        }
    }

    fn enqueue(&self, message: &BackPlateMessage) {
        let encoded = message.encode();
        let mut pending = self.inner.pending.lock();
        if message.action().is_clear() {
            // A clear supersedes everything queued so far.
            pending.skipped = pending.order.len() as u64;
            pending.discard_all();
        }
        if !pending.insert(encoded) {
            pending.skipped += 1;
            tracing::trace!(channel = %self.inner.channel, "back-plate skipped duplicate message");
        }
    }

    /// Publishes every pending message as one payload.
    ///
    /// Returns the number of messages sent. When publishing fails the messages
    /// are queued again for the next flush, unless a clear queued meanwhile
    /// supersedes them.
    ///
    /// # Errors
    ///
    /// Returns the transport error when publishing fails.
    pub async fn flush(&self) -> Result<usize, Error> {
        let (messages, skipped) = self.inner.pending.lock().take();
        if messages.is_empty() {
            return Ok(0);
        }
        let count = messages.len();
        self.publish(messages, skipped).await.map(|()| count)
    }

    async fn publish(&self, messages: Vec<String>, skipped: u64) -> Result<(), Error> {
        let payload = join_batch(&messages);
        match self.inner.transport.publish(&self.inner.channel, payload).await {
            Ok(()) => {
                tracing::debug!(
                    channel = %self.inner.channel,
                    sent = messages.len(),
                    skipped,
                    "back-plate published messages"
                );
                self.inner.counters.sent_batches.fetch_add(1, Ordering::Relaxed);
                self.inner.counters.sent_messages.fetch_add(messages.len() as u64, Ordering::Relaxed);
                Ok(())
            }
            Err(error) => {
                tracing::error!(channel = %self.inner.channel, error = %error, "back-plate failed to publish");
                self.inner.counters.failed_publishes.fetch_add(1, Ordering::Relaxed);
                if matches!(self.inner.mode, PublishMode::Batched(_)) {
                    self.requeue(messages, skipped);
                }
                Err(error)
            }
        }
    }

    fn requeue(&self, messages: Vec<String>, skipped: u64) {
        let mut pending = self.inner.pending.lock();
        if pending.seen.contains(&self.inner.clear_message) {
            pending.skipped += messages.len() as u64;
            return;
        }

        let newer = std::mem::take(&mut pending.order);
        pending.seen.clear();
        pending.skipped += skipped;
        for message in messages.into_iter().chain(newer) {
            if !pending.insert(message) {
                pending.skipped += 1;
            }
        }
    }

    /// Handles a payload received from the transport.
    ///
    /// Messages sent by this instance are dropped. The remaining ones are
    /// decoded and handed to the listener in order; malformed messages are
    /// logged and skipped.
    pub async fn receive(&self, payload: &str) {
        let messages: Vec<&str> = split_batch(payload)
            .into_iter()
            .filter(|message| !message.starts_with(&self.inner.own_prefix))
            .collect();
        if messages.is_empty() {
            return;
        }

        tracing::info!(channel = %self.inner.channel, count = messages.len(), "back-plate got notified");

        let listener = self.inner.listener.read().clone();
        let Some(listener) = listener else {
            tracing::debug!(channel = %self.inner.channel, "back-plate has no listener, dropping messages");
            return;
        };

        for raw in messages {
            match BackPlateMessage::decode(raw) {
                Ok(message) => {
                    self.inner.counters.received_messages.fetch_add(1, Ordering::Relaxed);
                    listener.on_action(message.into_action()).await;
                }
                Err(error) => tracing::warn!(channel = %self.inner.channel, error = %error, "back-plate ignored message"),
            }
        }
    }

    /// Drives the back-plate until it is disposed.
    ///
    /// Forwards subscription payloads to [`receive`](Self::receive) and, in
    /// batched mode, calls [`flush`](Self::flush) on every interval tick. Only
    /// the first call consumes the subscription.
    pub async fn run(&self) {
        let subscription = self.inner.subscription.lock().take();

        let receiving = async {
            if let Some(mut subscription) = subscription {
                while let Some(payload) = subscription.next().await {
                    self.receive(&payload).await;
                }
            }
        };

        let flushing = async {
            let PublishMode::Batched(interval) = self.inner.mode else {
                return;
            };
            let mut timer = pin!(PeriodicTimer::new(&self.inner.clock, interval));
            while timer.next().await.is_some() {
                if self.is_disposed() {
                    break;
                }
                // Failures are logged by `publish` and retried on the next tick.
                let _ = self.flush().await;
            }
        };

        futures::future::join(receiving, flushing).await;
    }

    /// Spawns [`run`](Self::run) on the current tokio runtime.
    #[cfg(feature = "tokio")]
    #[cfg_attr(docsrs, doc(cfg(feature = "tokio")))]
    #[must_use]
    pub fn spawn_tokio(&self) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.run().await })
    }

    /// Flushes what is pending, unsubscribes and stops accepting notifications.
    ///
    /// Calling this more than once has no further effect.
    ///
    /// # Errors
    ///
    /// Returns the first error from the final flush or from unsubscribing.
    pub async fn dispose(&self) -> Result<(), Error> {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let flushed = self.flush().await.map(|_| ());
        let unsubscribed = self.inner.transport.unsubscribe(&self.inner.channel).await;
        self.inner.subscription.lock().take();
        self.clear_listener();
        flushed.and(unsubscribed)
    }

    /// A snapshot of the activity counters.
    #[must_use]
    pub fn stats(&self) -> BackPlateStats {
        let (pending, skipped) = {
            let pending = self.inner.pending.lock();
            (pending.order.len(), pending.skipped)
        };
        let counters = &self.inner.counters;
        BackPlateStats {
            pending,
            skipped,
            sent_batches: counters.sent_batches.load(Ordering::Relaxed),
            sent_messages: counters.sent_messages.load(Ordering::Relaxed),
            received_messages: counters.received_messages.load(Ordering::Relaxed),
            failed_publishes: counters.failed_publishes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;

    use super::*;
    use crate::{InProcessBus, transport::BackPlateTransport};

    async fn back_plate(bus: &Arc<InProcessBus>, mode: PublishMode) -> BackPlate {
        let transport = bus.transport();
        let subscription = transport.subscribe(DEFAULT_CHANNEL_NAME).await.unwrap();
        BackPlate::from_parts(
            "self".to_owned(),
            DEFAULT_CHANNEL_NAME.to_owned(),
            mode,
            Clock::new_frozen(),
            DynBackPlateTransport::new_arc(transport),
            subscription,
        )
    }

    fn pending(plate: &BackPlate) -> Vec<String> {
        plate.inner.pending.lock().order.clone()
    }

    #[test]
    fn duplicate_notification_is_skipped() {
        block_on(async {
            let plate = back_plate(&InProcessBus::new(), PublishMode::default()).await;
            plate.notify_changed("k", None).await.unwrap();
            plate.notify_changed("k", None).await.unwrap();
            plate.notify_changed("k", Some("r")).await.unwrap();

            let stats = plate.stats();
            assert_eq!(stats.pending, 2);
            assert_eq!(stats.skipped, 1);
        });
    }

    #[test]
    fn clear_discards_pending_messages() {
        block_on(async {
            let plate = back_plate(&InProcessBus::new(), PublishMode::default()).await;
            plate.notify_changed("a", None).await.unwrap();
            plate.notify_removed("b", None).await.unwrap();
            plate.notify_clear_region("r").await.unwrap();

            plate.notify_clear().await.unwrap();

            assert_eq!(pending(&plate), vec!["self|C||".to_owned()]);
            assert_eq!(plate.stats().skipped, 3);
        });
    }

    #[test]
    fn flush_publishes_one_payload_and_resets() {
        block_on(async {
            let bus = InProcessBus::new();
            let mut observer = bus.transport().subscribe(DEFAULT_CHANNEL_NAME).await.unwrap();
            let plate = back_plate(&bus, PublishMode::default()).await;
            plate.notify_changed("a", None).await.unwrap();
            plate.notify_changed("a", None).await.unwrap();
            plate.notify_removed("b", Some("r")).await.unwrap();

            assert_eq!(plate.flush().await.unwrap(), 2);

            assert_eq!(observer.next().await.as_deref(), Some("self|c|a|,self|r|b|r"));
            let stats = plate.stats();
            assert_eq!((stats.pending, stats.skipped, stats.sent_batches, stats.sent_messages), (0, 0, 1, 2));
            assert_eq!(plate.flush().await.unwrap(), 0);
        });
    }

    #[test]
    fn failed_flush_keeps_messages() {
        block_on(async {
            let bus = InProcessBus::new();
            let plate = back_plate(&bus, PublishMode::default()).await;
            plate.notify_changed("a", None).await.unwrap();

            bus.set_offline(true);
            plate.flush().await.unwrap_err();
            plate.notify_changed("b", None).await.unwrap();

            assert_eq!(pending(&plate), vec!["self|c|a|".to_owned(), "self|c|b|".to_owned()]);
            assert_eq!(plate.stats().failed_publishes, 1);

            bus.set_offline(false);
            assert_eq!(plate.flush().await.unwrap(), 2);
        });
    }

    #[test]
    fn failed_flush_is_superseded_by_clear() {
        block_on(async {
            let bus = InProcessBus::new();
            let plate = back_plate(&bus, PublishMode::default()).await;
            plate.notify_changed("a", None).await.unwrap();
            let (messages, skipped) = plate.inner.pending.lock().take();

            plate.notify_clear().await.unwrap();
            plate.requeue(messages, skipped);

            assert_eq!(pending(&plate), vec!["self|C||".to_owned()]);
        });
    }

    #[test]
    fn immediate_mode_publishes_without_queueing() {
        block_on(async {
            let bus = InProcessBus::new();
            let mut observer = bus.transport().subscribe(DEFAULT_CHANNEL_NAME).await.unwrap();
            let plate = back_plate(&bus, PublishMode::Immediate).await;

            plate.notify_changed("a", None).await.unwrap();

            assert_eq!(observer.next().await.as_deref(), Some("self|c|a|"));
            assert_eq!(plate.stats().pending, 0);

            bus.set_offline(true);
            plate.notify_changed("b", None).await.unwrap_err();
            assert_eq!(plate.stats().pending, 0);
        });
    }

    struct Recorder(Mutex<Vec<BackPlateAction>>);

    impl BackPlateListener for Recorder {
        fn on_action(&self, action: BackPlateAction) -> BoxFuture<'_, ()> {
            self.0.lock().push(action);
            Box::pin(async {})
        }
    }

    #[test]
    fn receive_drops_own_messages() {
        block_on(async {
            let plate = back_plate(&InProcessBus::new(), PublishMode::default()).await;
            let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
            plate.set_listener(recorder.clone());

            plate.receive("self|c|mine|,other|r|theirs|,selfish|C||").await;

            assert_eq!(
                *recorder.0.lock(),
                vec![
                    BackPlateAction::Removed {
                        key: "theirs".into(),
                        region: None
                    },
                    BackPlateAction::Clear,
                ]
            );
            assert_eq!(plate.stats().received_messages, 2);
        });
    }

    #[test]
    fn receive_skips_malformed_messages() {
        block_on(async {
            let plate = back_plate(&InProcessBus::new(), PublishMode::default()).await;
            let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
            plate.set_listener(recorder.clone());

            plate.receive("other|?|k|,other|R|k|r").await;

            assert_eq!(*recorder.0.lock(), vec![BackPlateAction::ClearRegion { region: "r".into() }]);
        });
    }

    #[test]
    fn dispose_flushes_and_stops_notifications() {
        block_on(async {
            let bus = InProcessBus::new();
            let mut observer = bus.transport().subscribe(DEFAULT_CHANNEL_NAME).await.unwrap();
            let plate = back_plate(&bus, PublishMode::default()).await;
            plate.notify_changed("a", None).await.unwrap();

            plate.dispose().await.unwrap();
            plate.dispose().await.unwrap();

            assert_eq!(observer.next().await.as_deref(), Some("self|c|a|"));
            assert!(plate.is_disposed());
            assert_eq!(bus.subscriber_count(DEFAULT_CHANNEL_NAME), 1);

            plate.notify_changed("b", None).await.unwrap();
            assert_eq!(plate.stats().pending, 0);
        });
    }
}
