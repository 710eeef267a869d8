// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Two cache manager instances that keep their local tiers consistent.
//!
//! Both instances share one authority (standing in for a distributed cache)
//! and talk over an in-process back-plate bus. A write on one instance evicts
//! the stale local copy on the other.

use std::time::Duration;

use strata::{BackPlate, CacheEvent, CacheItem, CacheManager, HandleOptions, MemoryHandle, PublishMode, TransportRegistry};
use tick::Clock;

async fn instance(clock: &Clock, name: &str, shared: &MemoryHandle<String>) -> Result<CacheManager<String>, strata::Error> {
    let back_plate = BackPlate::builder(clock.clone())
        .channel_name("profiles")
        .publish_mode(PublishMode::Batched(Duration::from_millis(20)))
        .connect(|| std::future::ready(TransportRegistry::shared().connect("demo")))
        .await?;

    let cache = CacheManager::builder(clock.clone())
        .name(name)
        .handle_with(MemoryHandle::new(clock.clone()), HandleOptions::new("local"))
        .handle_with(shared.clone(), HandleOptions::new("shared").back_plate_source())
        .back_plate(back_plate)
        .build()?;

    let owner = name.to_owned();
    cache.on_event(move |event| {
        if let CacheEvent::Remove { key, origin, .. } = event {
            println!("{owner}: {key} removed ({origin:?})");
        }
    });
    Ok(cache)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), strata::Error> {
    let _ = tracing::subscriber::set_global_default(tracing_subscriber::fmt().finish());

    let clock = Clock::new_tokio();
    let shared = MemoryHandle::new(clock.clone());

    let a = instance(&clock, "instance-a", &shared).await?;
    let b = instance(&clock, "instance-b", &shared).await?;
    let loops = [a.back_plate(), b.back_plate()].into_iter().flatten().map(BackPlate::spawn_tokio).collect::<Vec<_>>();

    a.put(CacheItem::new("profile:7", "Ada".to_owned())?).await?;
    println!("b reads {:?}", b.get("profile:7", None).await?);

    // B now holds a local copy; A's write evicts it once the batch is flushed.
    a.put(CacheItem::new("profile:7", "Ada Lovelace".to_owned())?).await?;
    clock.delay(Duration::from_millis(100)).await;
    println!("b reads {:?}", b.get("profile:7", None).await?);

    a.remove("profile:7", None).await?;
    clock.delay(Duration::from_millis(100)).await;

    a.dispose().await?;
    b.dispose().await?;
    for handle in loops {
        handle.abort();
    }
    Ok(())
}
