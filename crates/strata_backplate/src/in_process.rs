// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! An in-process transport and a registry sharing buses by connection string.
//!
//! Several caches in one process that connect with the same connection string
//! share a single [`InProcessBus`], so they see each other's notifications the
//! same way separate processes would over a real message bus.

use std::{
    collections::HashMap,
    sync::{
        Arc, LazyLock,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use futures::{StreamExt, channel::mpsc};
use parking_lot::Mutex;
use strata_tier::{Error, ErrorKind};

use crate::transport::{BackPlateTransport, MessageStream};

#[derive(Debug)]
struct Subscriber {
    transport: u64,
    sender: mpsc::UnboundedSender<String>,
}

/// A message bus living inside the current process.
///
/// Every published payload is delivered to every subscriber of the channel,
/// including subscribers created through the publishing transport.
#[derive(Debug, Default)]
pub struct InProcessBus {
    channels: Mutex<HashMap<String, Vec<Subscriber>>>,
    next_transport: AtomicU64,
    offline: AtomicBool,
}

impl InProcessBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates a transport attached to this bus.
    #[must_use]
    pub fn transport(self: &Arc<Self>) -> InProcessTransport {
        InProcessTransport {
            bus: Arc::clone(self),
            id: self.next_transport.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Simulates an outage: while offline every publish and subscribe fails.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    /// The number of live subscriptions on `channel`.
    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels.lock().get(channel).map_or(0, Vec::len)
    }

    fn ensure_online(&self) -> Result<(), Error> {
        if self.offline.load(Ordering::Relaxed) {
            return Err(Error::with_kind(ErrorKind::Transport, "in-process bus is offline"));
        }
        Ok(())
    }
}

/// A [`BackPlateTransport`] over an [`InProcessBus`].
#[derive(Debug, Clone)]
pub struct InProcessTransport {
    bus: Arc<InProcessBus>,
    id: u64,
}

impl InProcessTransport {
    /// The bus this transport is attached to.
    #[must_use]
    pub fn bus(&self) -> &Arc<InProcessBus> {
        &self.bus
    }
}

impl BackPlateTransport for InProcessTransport {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), Error> {
        self.bus.ensure_online()?;
        let mut channels = self.bus.channels.lock();
        if let Some(subscribers) = channels.get_mut(channel) {
            // Receivers that went away are dropped on the next publish.
            subscribers.retain(|subscriber| subscriber.sender.unbounded_send(payload.clone()).is_ok());
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream, Error> {
        self.bus.ensure_online()?;
        let (sender, receiver) = mpsc::unbounded();
        self.bus
            .channels
            .lock()
            .entry(channel.to_owned())
            .or_default()
            .push(Subscriber { transport: self.id, sender });
        Ok(receiver.boxed())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), Error> {
        let mut channels = self.bus.channels.lock();
        if let Some(subscribers) = channels.get_mut(channel) {
            // Dropping the sender ends the subscriber's stream.
            subscribers.retain(|subscriber| subscriber.transport != self.id);
            if subscribers.is_empty() {
                channels.remove(channel);
            }
        }
        Ok(())
    }
}

/// Shares one [`InProcessBus`] per connection string.
///
/// Looking up a connection string that is already registered returns a
/// transport on the existing bus; otherwise a new bus is created. Lookup and
/// creation happen under one lock, so concurrent callers never end up on
/// different buses for the same string.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use strata_backplate::TransportRegistry;
///
/// let registry = TransportRegistry::new();
/// let a = registry.connect("bus-1").unwrap();
/// let b = registry.connect("bus-1").unwrap();
/// assert!(Arc::ptr_eq(a.bus(), b.bus()));
/// ```
#[derive(Debug, Default)]
pub struct TransportRegistry {
    buses: Mutex<HashMap<String, Arc<InProcessBus>>>,
}

static SHARED: LazyLock<TransportRegistry> = LazyLock::new(TransportRegistry::new);

impl TransportRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    #[must_use]
    pub fn shared() -> &'static Self {
        &SHARED
    }

    /// Returns a transport on the bus registered for `connection_string`,
    /// creating the bus on first use.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorKind::InvalidArgument`] error when the connection
    /// string is blank.
    pub fn connect(&self, connection_string: &str) -> Result<InProcessTransport, Error> {
        if connection_string.trim().is_empty() {
            return Err(Error::invalid_argument("connection string must not be blank"));
        }
        let bus = Arc::clone(self.buses.lock().entry(connection_string.to_owned()).or_insert_with(InProcessBus::new));
        Ok(bus.transport())
    }

    /// Forgets the bus registered for `connection_string`.
    ///
    /// Transports already handed out keep working on the old bus; the next
    /// [`connect`](Self::connect) creates a fresh one.
    pub fn disconnect(&self, connection_string: &str) -> bool {
        self.buses.lock().remove(connection_string).is_some()
    }

    /// The number of registered buses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buses.lock().len()
    }

    /// Whether no bus is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
