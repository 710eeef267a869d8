// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Applies changes published by other instances.

use std::sync::Weak;

use futures::future::BoxFuture;
use strata_backplate::{BackPlateAction, BackPlateListener};
use strata_tier::Error;

use crate::{
    events::{CacheEvent, EventOrigin},
    handle::ManagedHandle,
    manager::ManagerInner,
};

/// Routes back-plate actions into a manager's eviction primitives.
///
/// Holds the manager weakly so the back-plate does not keep it alive.
pub(crate) struct RemoteListener<V> {
    inner: Weak<ManagerInner<V>>,
}

impl<V> RemoteListener<V> {
    pub(crate) fn new(inner: Weak<ManagerInner<V>>) -> Self {
        Self { inner }
    }
}

impl<V> BackPlateListener for RemoteListener<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn on_action(&self, action: BackPlateAction) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Some(inner) = self.inner.upgrade() {
                inner.apply_remote(action).await;
            }
        })
    }
}

fn not_source<V>(managed: &ManagedHandle<V>) -> bool {
    !managed.is_back_plate_source()
}

impl<V> ManagerInner<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Applies one remote action to every handle except the back-plate source.
    pub(crate) async fn apply_remote(&self, action: BackPlateAction) {
        let outcome: Result<Option<CacheEvent>, Error> = match action {
            BackPlateAction::Changed { key, region } => self
                .evict(&key, region.as_deref(), |_, managed| not_source(managed))
                .await
                .map(|()| None),
            BackPlateAction::Removed { key, region } => {
                let evicted = self.evict(&key, region.as_deref(), |_, managed| not_source(managed)).await;
                evicted.map(|()| {
                    Some(CacheEvent::Remove {
                        key,
                        region,
                        origin: EventOrigin::Remote,
                    })
                })
            }
            BackPlateAction::Clear => self.clear_handles(not_source).await.map(|()| {
                Some(CacheEvent::Clear {
                    origin: EventOrigin::Remote,
                })
            }),
            BackPlateAction::ClearRegion { region } => {
                let cleared = self.clear_region_handles(&region, not_source).await;
                cleared.map(|()| {
                    Some(CacheEvent::ClearRegion {
                        region,
                        origin: EventOrigin::Remote,
                    })
                })
            }
        };

        match outcome {
            Ok(Some(event)) => self.listeners.emit(&event),
            Ok(None) => {}
            Err(error) => tracing::warn!(cache.name = %self.name, %error, "applying a remote change failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::executor::block_on;
    use parking_lot::Mutex;
    use strata_backplate::{BackPlate, TransportRegistry};
    use strata_tier::{CacheItem, StatsCounter, testing::MockHandle};
    use tick::Clock;

    use super::*;
    use crate::{CacheManager, HandleOptions};

    struct Fixture {
        cache: CacheManager<i32>,
        local: MockHandle<i32>,
        shared: MockHandle<i32>,
        events: Arc<Mutex<Vec<CacheEvent>>>,
    }

    fn fixture() -> Fixture {
        let local = MockHandle::with_items([CacheItem::new("k", 1).unwrap(), CacheItem::in_region("k", "r", 2).unwrap()]);
        let shared = MockHandle::with_items([CacheItem::new("k", 1).unwrap(), CacheItem::in_region("k", "r", 2).unwrap()]);
        let back_plate = block_on(async {
            let registry = TransportRegistry::new();
            BackPlate::builder(Clock::new_frozen())
                .connect(|| std::future::ready(registry.connect("test")))
                .await
                .unwrap()
        });

        let cache = CacheManager::builder(Clock::new_frozen())
            .handle_with(local.clone(), HandleOptions::new("local"))
            .handle_with(shared.clone(), HandleOptions::new("shared").back_plate_source())
            .back_plate(back_plate)
            .build()
            .unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        cache.on_event(move |event| sink.lock().push(event.clone()));

        Fixture {
            cache,
            local,
            shared,
            events,
        }
    }

    #[test]
    fn changed_evicts_silently_from_non_source_handles() {
        let f = fixture();
        block_on(f.cache.inner.apply_remote(BackPlateAction::Changed {
            key: "k".into(),
            region: None,
        }));

        assert!(!f.local.contains("k", None));
        assert!(f.shared.contains("k", None));
        assert!(f.local.contains("k", Some("r")));
        assert!(f.events.lock().is_empty());
    }

    #[test]
    fn removed_evicts_and_emits_remote_remove() {
        let f = fixture();
        block_on(f.cache.inner.apply_remote(BackPlateAction::Removed {
            key: "k".into(),
            region: Some("r".into()),
        }));

        assert!(!f.local.contains("k", Some("r")));
        assert!(f.shared.contains("k", Some("r")));
        assert_eq!(
            *f.events.lock(),
            [CacheEvent::Remove {
                key: "k".into(),
                region: Some("r".into()),
                origin: EventOrigin::Remote,
            }]
        );
    }

    #[test]
    fn clear_skips_source_and_emits_once() {
        let f = fixture();
        block_on(f.cache.inner.apply_remote(BackPlateAction::Clear));

        assert_eq!(f.local.entry_count(), 0);
        assert_eq!(f.shared.entry_count(), 2);
        assert_eq!(f.cache.handles()[0].stats().get(StatsCounter::ClearCalls), 1);
        assert_eq!(f.cache.handles()[1].stats().get(StatsCounter::ClearCalls), 0);
        assert_eq!(
            *f.events.lock(),
            [CacheEvent::Clear {
                origin: EventOrigin::Remote
            }]
        );
    }

    #[test]
    fn clear_region_emits_remote_event() {
        let f = fixture();
        block_on(f.cache.inner.apply_remote(BackPlateAction::ClearRegion { region: "r".into() }));

        assert!(f.local.contains("k", None));
        assert!(!f.local.contains("k", Some("r")));
        assert_eq!(
            *f.events.lock(),
            [CacheEvent::ClearRegion {
                region: "r".into(),
                origin: EventOrigin::Remote,
            }]
        );
    }

    #[test]
    fn failures_are_swallowed() {
        let f = fixture();
        f.local.fail_when(|_| true);

        block_on(f.cache.inner.apply_remote(BackPlateAction::Clear));

        assert!(f.events.lock().is_empty());
    }

    #[test]
    fn listener_outliving_manager_does_nothing() {
        let f = fixture();
        let listener = RemoteListener::new(Arc::downgrade(&f.cache.inner));
        let local = f.local.clone();
        drop(f);

        block_on(listener.on_action(BackPlateAction::Clear));

        assert_eq!(local.entry_count(), 2);
    }
}
