// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Two in-memory tiers behind one cache manager.
//!
//! The edge keeps hot items for a short sliding window, the authority keeps
//! everything. A hit in the authority copies the item into the edge, an
//! update in the authority evicts the stale edge copy.

use std::time::Duration;

use strata::{CacheEvent, CacheItem, CacheManager, Expiration, MemoryHandle, StatsCounter};
use tick::Clock;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), strata::Error> {
    let _ = tracing::subscriber::set_global_default(tracing_subscriber::fmt().finish());

    let clock = Clock::new_tokio();

    let edge = MemoryHandle::<u64>::builder(clock.clone())
        .name("edge")
        .max_capacity(1_000)
        .default_expiration(Expiration::Sliding(Duration::from_secs(30)))
        .build();
    let authority = MemoryHandle::<u64>::new(clock.clone());

    let cache = CacheManager::builder(clock).name("stock").handle(edge).handle(authority).build()?;

    cache.on_event(|event| {
        if let CacheEvent::Update { key, success, tries, .. } = event {
            println!("update of {key}: success={success} tries={tries}");
        }
    });

    // Lands in both tiers.
    cache.put(CacheItem::in_region("widget", "warehouse-1", 12)?).await?;

    // Served by the edge.
    let stock = cache.get("widget", Some("warehouse-1")).await?;
    println!("widget stock: {stock:?}");

    // Runs against the authority first, then drops the edge copy.
    let sold = cache.update("widget", Some("warehouse-1"), |stock| stock.checked_sub(1)).await?;
    println!("after one sale: {sold:?}");

    // Missing everywhere, so the item is added instead.
    let config = cache.update_config();
    let restocked = cache
        .add_or_update(CacheItem::in_region("gadget", "warehouse-1", 5)?, |stock| Some(stock + 5), &config)
        .await?;
    println!("gadget stock: {restocked:?}");

    for handle in cache.handles() {
        println!(
            "{}: hits={} misses={} items={}",
            handle.name(),
            handle.stats().get(StatsCounter::Hits),
            handle.stats().get(StatsCounter::Misses),
            handle.stats().get(StatsCounter::Items),
        );
    }

    cache.clear_region("warehouse-1").await?;
    Ok(())
}
