// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Two cache managers sharing an authority and a back-plate channel.

use std::{
    future::poll_fn,
    pin::pin,
    sync::Arc,
    task::Poll,
};

use futures::{
    executor::block_on,
    future::{Either, select},
};
use parking_lot::Mutex;
use strata::{BackPlate, CacheEvent, CacheItem, CacheManager, EventOrigin, HandleOptions, PublishMode, TransportRegistry};
use strata_tier::testing::{HandleOp, MockHandle};
use tick::Clock;

fn item(key: &str, value: i32) -> CacheItem<i32> {
    CacheItem::new(key, value).unwrap()
}

async fn manager(registry: &TransportRegistry, mode: PublishMode, local: &MockHandle<i32>, shared: &MockHandle<i32>) -> CacheManager<i32> {
    let back_plate = BackPlate::builder(Clock::new_frozen())
        .publish_mode(mode)
        .connect(|| std::future::ready(registry.connect("strata")))
        .await
        .unwrap();
    CacheManager::builder(Clock::new_frozen())
        .handle_with(local.clone(), HandleOptions::new("local"))
        .handle_with(shared.clone(), HandleOptions::new("shared").back_plate_source())
        .back_plate(back_plate)
        .build()
        .unwrap()
}

fn record_events(cache: &CacheManager<i32>) -> Arc<Mutex<Vec<CacheEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    cache.on_event(move |event| sink.lock().push(event.clone()));
    events
}

async fn yield_now() {
    let mut yielded = false;
    poll_fn(|cx| {
        if yielded {
            Poll::Ready(())
        } else {
            yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    })
    .await;
}

/// Yields to the back-plate loop until `condition` holds or patience runs out.
async fn settle(condition: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        yield_now().await;
    }
    condition()
}

/// Runs `scenario` while `cache`'s back-plate processes incoming messages.
async fn with_running<T>(cache: &CacheManager<i32>, scenario: impl Future<Output = T>) -> T {
    let back_plate = cache.back_plate().unwrap();
    match select(pin!(back_plate.run()), pin!(scenario)).await {
        Either::Right((output, _)) => output,
        Either::Left(_) => panic!("back-plate loop ended before the scenario"),
    }
}

#[test]
fn remote_change_evicts_the_local_copy() {
    block_on(async {
        let registry = TransportRegistry::new();
        let shared = MockHandle::new();
        let (a_local, b_local) = (MockHandle::new(), MockHandle::new());
        let a = manager(&registry, PublishMode::Immediate, &a_local, &shared).await;
        let b = manager(&registry, PublishMode::Immediate, &b_local, &shared).await;
        let received = || b.back_plate().unwrap().stats().received_messages;

        with_running(&b, async {
            a.put(item("k", 1)).await.unwrap();
            assert!(settle(|| received() == 1).await);

            assert_eq!(b.get("k", None).await.unwrap(), Some(1));
            assert!(b_local.contains("k", None));

            a.put(item("k", 2)).await.unwrap();
            assert!(settle(|| !b_local.contains("k", None)).await);

            assert_eq!(b.get("k", None).await.unwrap(), Some(2));
        })
        .await;

        // The source was never touched by the remote invalidation.
        let evictions = shared.operations().iter().filter(|op| matches!(op, HandleOp::Remove { .. })).count();
        assert_eq!(evictions, 0);
    });
}

#[test]
fn remote_remove_raises_a_remote_event() {
    block_on(async {
        let registry = TransportRegistry::new();
        let shared = MockHandle::new();
        let (a_local, b_local) = (MockHandle::new(), MockHandle::with_items([item("k", 1)]));
        let a = manager(&registry, PublishMode::Immediate, &a_local, &shared).await;
        let b = manager(&registry, PublishMode::Immediate, &b_local, &shared).await;
        let events = record_events(&b);

        a.put(item("k", 1)).await.unwrap();
        with_running(&b, async {
            assert!(a.remove("k", None).await.unwrap());
            assert!(settle(|| events.lock().len() == 1).await);
        })
        .await;

        assert!(!b_local.contains("k", None));
        assert_eq!(
            *events.lock(),
            [CacheEvent::Remove {
                key: "k".into(),
                region: None,
                origin: EventOrigin::Remote,
            }]
        );
    });
}

#[test]
fn remote_clear_spares_the_source() {
    block_on(async {
        let registry = TransportRegistry::new();
        let shared = MockHandle::new();
        let (a_local, b_local) = (MockHandle::new(), MockHandle::with_items([item("k", 1), item("j", 2)]));
        let a = manager(&registry, PublishMode::Immediate, &a_local, &shared).await;
        let b = manager(&registry, PublishMode::Immediate, &b_local, &shared).await;
        let events = record_events(&b);

        with_running(&b, async {
            a.clear().await.unwrap();
            assert!(settle(|| !events.lock().is_empty()).await);
        })
        .await;

        assert_eq!(b_local.entry_count(), 0);
        let clears = shared.operations().iter().filter(|op| matches!(op, HandleOp::Clear)).count();
        assert_eq!(clears, 1, "only the local clear reaches the shared handle");
        assert_eq!(
            *events.lock(),
            [CacheEvent::Clear {
                origin: EventOrigin::Remote
            }]
        );
    });
}

#[test]
fn remote_region_clear_keeps_other_regions() {
    block_on(async {
        let registry = TransportRegistry::new();
        let shared = MockHandle::new();
        let b_local = MockHandle::with_items([CacheItem::in_region("k", "r", 1).unwrap(), item("k", 2)]);
        let a = manager(&registry, PublishMode::Immediate, &MockHandle::new(), &shared).await;
        let b = manager(&registry, PublishMode::Immediate, &b_local, &shared).await;
        let events = record_events(&b);

        with_running(&b, async {
            a.clear_region("r").await.unwrap();
            assert!(settle(|| !events.lock().is_empty()).await);
        })
        .await;

        assert!(!b_local.contains("k", Some("r")));
        assert!(b_local.contains("k", None));
        assert_eq!(
            *events.lock(),
            [CacheEvent::ClearRegion {
                region: "r".into(),
                origin: EventOrigin::Remote,
            }]
        );
    });
}

#[test]
fn own_messages_are_not_applied() {
    block_on(async {
        let registry = TransportRegistry::new();
        let (local, shared) = (MockHandle::new(), MockHandle::new());
        let cache = manager(&registry, PublishMode::Immediate, &local, &shared).await;

        with_running(&cache, async {
            cache.put(item("k", 1)).await.unwrap();
            for _ in 0..10 {
                yield_now().await;
            }
        })
        .await;

        assert!(local.contains("k", None));
        assert_eq!(cache.back_plate().unwrap().stats().received_messages, 0);
    });
}

#[test]
fn batched_notifications_collapse_until_flushed() {
    block_on(async {
        let registry = TransportRegistry::new();
        let (local, shared) = (MockHandle::new(), MockHandle::new());
        let cache = manager(&registry, PublishMode::default(), &local, &shared).await;
        let back_plate = cache.back_plate().unwrap();

        cache.put(item("k", 1)).await.unwrap();
        cache.put(item("k", 2)).await.unwrap();
        assert_eq!(back_plate.stats().pending, 1);
        assert_eq!(back_plate.stats().skipped, 1);

        // A failed update publishes nothing.
        assert_eq!(cache.update("missing", None, |v: &i32| Some(v + 1)).await.unwrap(), None);
        assert_eq!(back_plate.stats().pending, 1);

        cache.clear().await.unwrap();
        assert_eq!(back_plate.stats().pending, 1);

        assert_eq!(back_plate.flush().await.unwrap(), 1);
        assert_eq!(back_plate.stats().sent_messages, 1);
    });
}

#[test]
fn dispose_flushes_and_stops_notifying() {
    block_on(async {
        let registry = TransportRegistry::new();
        let (local, shared) = (MockHandle::new(), MockHandle::new());
        let cache = manager(&registry, PublishMode::default(), &local, &shared).await;

        cache.put(item("k", 1)).await.unwrap();
        cache.dispose().await.unwrap();
        cache.dispose().await.unwrap();

        let back_plate = cache.back_plate().unwrap();
        assert!(back_plate.is_disposed());
        assert_eq!(back_plate.stats().sent_messages, 1);

        cache.put(item("k", 2)).await.unwrap();
        assert_eq!(back_plate.stats().pending, 0);
        assert!(local.contains("k", None));
    });
}
