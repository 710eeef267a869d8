// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Change notifications raised by the cache manager.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use parking_lot::RwLock;

/// Where a change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventOrigin {
    /// A call on this cache manager.
    Local,
    /// A back-plate message from another instance.
    Remote,
}

/// A change observed by the cache manager.
///
/// Events are raised once per logical operation, never once per handle, and
/// only when the operation had an effect: a miss raises no `Get`, a rejected
/// add raises no `Add`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CacheEvent {
    /// A lookup found the item.
    Get {
        /// The key.
        key: String,
        /// The region.
        region: Option<String>,
    },
    /// Every handle accepted an add.
    Add {
        /// The key.
        key: String,
        /// The region.
        region: Option<String>,
    },
    /// An item was written to every handle.
    Put {
        /// The key.
        key: String,
        /// The region.
        region: Option<String>,
    },
    /// An item was removed.
    Remove {
        /// The key.
        key: String,
        /// The region.
        region: Option<String>,
        /// Whether the removal happened here or on another instance.
        origin: EventOrigin,
    },
    /// An update ran, successfully or not.
    Update {
        /// The key.
        key: String,
        /// The region.
        region: Option<String>,
        /// Whether the update succeeded.
        success: bool,
        /// Attempts needed across all handles.
        tries: u32,
        /// Whether any handle saw a concurrent change.
        version_conflict: bool,
    },
    /// Everything was cleared.
    Clear {
        /// Whether the clear happened here or on another instance.
        origin: EventOrigin,
    },
    /// One region was cleared.
    ClearRegion {
        /// The region.
        region: String,
        /// Whether the clear happened here or on another instance.
        origin: EventOrigin,
    },
}

/// Identifies a registered listener so it can be removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback = Arc<dyn Fn(&CacheEvent) + Send + Sync>;

#[derive(Default)]
pub(crate) struct Listeners {
    next_id: AtomicU64,
    entries: RwLock<Vec<(ListenerId, Callback)>>,
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners").field("count", &self.entries.read().len()).finish()
    }
}

impl Listeners {
    pub(crate) fn add(&self, callback: Callback) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.write().push((id, callback));
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        entries.len() != before
    }

    /// Calls every listener with `event`, outside the registration lock.
    pub(crate) fn emit(&self, event: &CacheEvent) {
        let callbacks: Vec<Callback> = self.entries.read().iter().map(|(_, callback)| Arc::clone(callback)).collect();
        for callback in callbacks {
            callback(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    #[test]
    fn emit_reaches_every_listener() {
        let listeners = Listeners::default();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b"] {
            let seen = Arc::clone(&seen);
            listeners.add(Arc::new(move |event: &CacheEvent| seen.lock().push((tag, event.clone()))));
        }

        listeners.emit(&CacheEvent::Clear { origin: EventOrigin::Local });

        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn removed_listener_is_not_called() {
        let listeners = Listeners::default();
        let calls = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&calls);
        let id = listeners.add(Arc::new(move |_: &CacheEvent| {
            counter.fetch_add(1, Ordering::Relaxed);
        }));

        assert!(listeners.remove(id));
        assert!(!listeners.remove(id));
        listeners.emit(&CacheEvent::Clear { origin: EventOrigin::Local });

        assert_eq!(calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn listener_may_register_another_listener() {
        let listeners = Arc::new(Listeners::default());
        let inner = Arc::clone(&listeners);
        listeners.add(Arc::new(move |_: &CacheEvent| {
            inner.add(Arc::new(|_: &CacheEvent| {}));
        }));

        listeners.emit(&CacheEvent::Clear { origin: EventOrigin::Local });

        assert_eq!(listeners.entries.read().len(), 2);
    }
}
