#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use craft_cache::{server_metrics_cache, CacheError, Loader, RefreshCache, RefreshPolicy};
use craft_core::ServerKey;
use tokio::sync::{Barrier, Notify};

/// Returns how many times it has been called; fails while `fail` is set.
#[derive(Default)]
struct Counting {
    calls: AtomicUsize,
    fail: AtomicBool,
}

impl Counting {
    fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }
    fn set_fail(&self, on: bool) { self.fail.store(on, Ordering::SeqCst) }
}

#[async_trait::async_trait]
impl Loader<String, usize> for Counting {
    async fn load(&self, _key: &String) -> anyhow::Result<usize> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("metrics source unavailable");
        }
        Ok(n)
    }
}

fn counting() -> (Arc<Counting>, RefreshCache<String, usize>) {
    let loader = Arc::new(Counting::default());
    let cache = RefreshCache::<String, usize>::new("test", RefreshPolicy::server_metrics(), loader.clone());
    (loader, cache)
}

/// Let spawned refresh tasks run until the loader has seen `calls` invocations.
async fn settle(loader: &Counting, calls: usize) {
    for _ in 0..100 {
        if loader.calls() >= calls {
            break;
        }
        tokio::task::yield_now().await;
    }
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

async fn advance(secs: u64) {
    tokio::time::advance(Duration::from_secs(secs)).await;
}

#[tokio::test(start_paused = true)]
async fn young_entry_is_served_without_loading() {
    let (loader, cache) = counting();
    let key = "games/survival".to_string();
    assert_eq!(cache.get(&key).await.unwrap(), 1);
    assert_eq!(loader.calls(), 1);

    advance(10).await;
    assert_eq!(cache.get(&key).await.unwrap(), 1);
    settle(&loader, 2).await;
    assert_eq!(loader.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn stale_entry_is_served_and_refreshed_once() {
    let (loader, cache) = counting();
    let key = "games/survival".to_string();
    assert_eq!(cache.get(&key).await.unwrap(), 1);

    advance(25).await;
    let reads = (0..50).map(|_| cache.get(&key));
    let out = futures::future::join_all(reads).await;
    assert_eq!(out.len(), 50);
    for r in out {
        assert_eq!(r.unwrap(), 1, "stale reads return the cached value");
    }

    settle(&loader, 2).await;
    assert_eq!(loader.calls(), 2, "exactly one background refresh");

    // Refreshed value has a fresh write time.
    assert_eq!(cache.get(&key).await.unwrap(), 2);
    advance(15).await;
    assert_eq!(cache.get(&key).await.unwrap(), 2);
    settle(&loader, 3).await;
    assert_eq!(loader.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn expired_entry_is_loaded_inline() {
    let (loader, cache) = counting();
    let key = "games/survival".to_string();
    assert_eq!(cache.get(&key).await.unwrap(), 1);

    advance(65).await;
    assert_eq!(cache.get(&key).await.unwrap(), 2);
    assert_eq!(loader.calls(), 2);

    // Age was reset by the inline load.
    advance(10).await;
    assert_eq!(cache.get(&key).await.unwrap(), 2);
    settle(&loader, 3).await;
    assert_eq!(loader.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn refresh_starts_at_exactly_twenty_seconds() {
    let (loader, cache) = counting();
    let key = "games/survival".to_string();
    assert_eq!(cache.get(&key).await.unwrap(), 1);

    advance(19).await;
    assert_eq!(cache.get(&key).await.unwrap(), 1);
    settle(&loader, 2).await;
    assert_eq!(loader.calls(), 1, "19s old is still fresh");

    advance(1).await;
    assert_eq!(cache.get(&key).await.unwrap(), 1, "20s old is served from cache");
    settle(&loader, 2).await;
    assert_eq!(loader.calls(), 2, "20s old starts one refresh");
    assert_eq!(cache.get(&key).await.unwrap(), 2);
}

#[tokio::test(start_paused = true)]
async fn entry_is_still_served_at_fifty_nine_seconds() {
    let (loader, cache) = counting();
    let key = "games/survival".to_string();
    assert_eq!(cache.get(&key).await.unwrap(), 1);

    advance(59).await;
    assert_eq!(cache.get(&key).await.unwrap(), 1);
    assert_eq!(loader.calls(), 1, "no inline load before 60s");
    settle(&loader, 2).await;
    assert_eq!(loader.calls(), 2);
    assert_eq!(cache.get(&key).await.unwrap(), 2);
}

#[tokio::test(start_paused = true)]
async fn entry_expires_at_exactly_sixty_seconds() {
    let (loader, cache) = counting();
    let key = "games/survival".to_string();
    assert_eq!(cache.get(&key).await.unwrap(), 1);

    advance(60).await;
    assert_eq!(cache.get(&key).await.unwrap(), 2, "60s old is loaded inline");
    assert_eq!(loader.calls(), 2);
    settle(&loader, 3).await;
    assert_eq!(loader.calls(), 2, "no background refresh on top of the inline load");
}

#[tokio::test(start_paused = true)]
async fn refresh_failure_keeps_cached_value() {
    let (loader, cache) = counting();
    let key = "games/survival".to_string();
    assert_eq!(cache.get(&key).await.unwrap(), 1);

    loader.set_fail(true);
    advance(25).await;
    assert_eq!(cache.get(&key).await.unwrap(), 1);
    settle(&loader, 2).await;
    assert_eq!(loader.calls(), 2);

    assert!(cache.contains(&key));
    // The failed refresh released its slot, so this read schedules another attempt.
    assert_eq!(cache.get(&key).await.unwrap(), 1);

    loader.set_fail(false);
    settle(&loader, 3).await;
    assert_eq!(loader.calls(), 3);
    assert_eq!(cache.get(&key).await.unwrap(), 3);
}

#[tokio::test(start_paused = true)]
async fn cold_miss_failure_propagates_and_stores_nothing() {
    let (loader, cache) = counting();
    loader.set_fail(true);
    let key = "games/missing".to_string();
    let err = cache.get(&key).await.unwrap_err();
    assert!(matches!(err, CacheError::Load { ref key, .. } if key == "games/missing"));
    assert!(err.to_string().contains("metrics source unavailable"));
    assert!(!cache.contains(&key));
    assert!(cache.is_empty());
}

#[tokio::test(start_paused = true)]
async fn expired_reload_failure_leaves_no_entry() {
    let (loader, cache) = counting();
    let key = "games/survival".to_string();
    cache.get(&key).await.unwrap();
    loader.set_fail(true);
    advance(61).await;
    assert!(cache.get(&key).await.is_err());
    assert!(!cache.contains(&key));
}

/// Counts calls; every call after the first waits on `gate`.
#[derive(Default)]
struct HeldRefresh {
    calls: AtomicUsize,
    gate: Notify,
}

#[async_trait::async_trait]
impl Loader<String, usize> for HeldRefresh {
    async fn load(&self, _key: &String) -> anyhow::Result<usize> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n > 1 {
            self.gate.notified().await;
        }
        Ok(n)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stale_reads_on_many_threads_start_one_refresh() {
    let loader = Arc::new(HeldRefresh::default());
    // Every read past the first load is stale.
    let policy = RefreshPolicy { refresh_after: Duration::ZERO, ..RefreshPolicy::server_metrics() };
    let cache = RefreshCache::<String, usize>::new("threads", policy, loader.clone());
    let key = "games/survival".to_string();
    assert_eq!(cache.get(&key).await.unwrap(), 1);

    let barrier = Arc::new(Barrier::new(50));
    let readers: Vec<_> = (0..50)
        .map(|_| {
            let (cache, barrier, key) = (cache.clone(), barrier.clone(), key.clone());
            tokio::spawn(async move {
                barrier.wait().await;
                cache.get(&key).await
            })
        })
        .collect();
    for r in readers {
        assert_eq!(r.await.unwrap().unwrap(), 1);
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        while loader.calls.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("refresh reaches the loader");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(loader.calls.load(Ordering::SeqCst), 2, "one load plus one refresh");

    loader.gate.notify_one();
    tokio::time::timeout(Duration::from_secs(5), async {
        while cache.get(&key).await.unwrap() != 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("refreshed value lands");
}

static VICTIM_DROP_STARTED: AtomicBool = AtomicBool::new(false);

/// Only the copy owned by the cache is `held`; dropping the held copy of
/// server 1 is slow.
#[derive(Debug)]
struct Snapshot {
    id: u32,
    held: bool,
}

impl Clone for Snapshot {
    fn clone(&self) -> Self { Self { id: self.id, held: false } }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        if self.held && self.id == 1 {
            VICTIM_DROP_STARTED.store(true, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(400));
        }
    }
}

struct Snapshots;

#[async_trait::async_trait]
impl Loader<u32, Snapshot> for Snapshots {
    async fn load(&self, key: &u32) -> anyhow::Result<Snapshot> { Ok(Snapshot { id: *key, held: true }) }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn eviction_does_not_hold_up_other_keys() {
    let policy = RefreshPolicy { max_entries: 2, ..RefreshPolicy::server_metrics() };
    let cache = RefreshCache::<u32, Snapshot>::new("evict", policy, Arc::new(Snapshots));
    assert_eq!(cache.get(&1).await.unwrap().id, 1);
    assert_eq!(cache.get(&2).await.unwrap().id, 2);

    // Admitting 3 evicts 1, the least recently accessed.
    let evicting = tokio::spawn({
        let cache = cache.clone();
        async move { cache.get(&3).await.map(|s| s.id) }
    });
    tokio::time::timeout(Duration::from_secs(2), async {
        while !VICTIM_DROP_STARTED.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("victim is being dropped");

    let started = std::time::Instant::now();
    assert!(cache.contains(&2));
    assert_eq!(cache.get(&2).await.unwrap().id, 2);
    assert!(started.elapsed() < Duration::from_millis(100), "lookup of 2 waited {:?}", started.elapsed());

    assert_eq!(evicting.await.unwrap().unwrap(), 3);
    assert!(!cache.contains(&1));
    assert_eq!(cache.len(), 2);
}

struct Echo;

#[async_trait::async_trait]
impl Loader<u32, u32> for Echo {
    async fn load(&self, key: &u32) -> anyhow::Result<u32> { Ok(*key) }
}

#[tokio::test]
async fn size_bound_evicts_least_recently_accessed() {
    let cache = RefreshCache::<u32, u32>::new("lru", RefreshPolicy::server_metrics(), Arc::new(Echo));
    for k in 0..1000u32 {
        assert_eq!(cache.get(&k).await.unwrap(), k);
    }
    assert_eq!(cache.len(), 1000);

    // Touch 0 so that 1 becomes the least recently accessed.
    assert_eq!(cache.get(&0).await.unwrap(), 0);

    assert_eq!(cache.get(&1000).await.unwrap(), 1000);
    assert_eq!(cache.len(), 1000);
    assert!(cache.contains(&0));
    assert!(!cache.contains(&1));
    assert!(cache.contains(&2));
    assert!(cache.contains(&1000));

    for k in 1001..1100u32 {
        cache.get(&k).await.unwrap();
        assert!(cache.len() <= 1000);
    }
}

/// Blocks loads of "slow" until released.
struct Gated {
    gate: Notify,
}

#[async_trait::async_trait]
impl Loader<String, String> for Gated {
    async fn load(&self, key: &String) -> anyhow::Result<String> {
        if key == "slow" {
            self.gate.notified().await;
        }
        Ok(format!("{}-metrics", key))
    }
}

#[tokio::test]
async fn inline_load_does_not_block_other_keys() {
    let loader = Arc::new(Gated { gate: Notify::new() });
    let cache = RefreshCache::<String, String>::new("gated", RefreshPolicy::server_metrics(), loader.clone());

    let slow = tokio::spawn({
        let cache = cache.clone();
        async move { cache.get(&"slow".to_string()).await }
    });
    tokio::task::yield_now().await;

    assert_eq!(cache.get(&"fast".to_string()).await.unwrap(), "fast-metrics");
    assert!(!cache.contains(&"slow".to_string()));

    loader.gate.notify_one();
    assert_eq!(slow.await.unwrap().unwrap(), "slow-metrics");
    assert_eq!(cache.len(), 2);
}

#[tokio::test]
async fn invalidate_forces_reload() {
    let (loader, cache) = counting();
    let key = "games/survival".to_string();
    cache.get(&key).await.unwrap();
    assert!(cache.invalidate(&key));
    assert!(!cache.invalidate(&key));
    assert_eq!(cache.get(&key).await.unwrap(), 2);
    assert_eq!(loader.calls(), 2);
}

struct ByName;

#[async_trait::async_trait]
impl Loader<ServerKey, String> for ByName {
    async fn load(&self, key: &ServerKey) -> anyhow::Result<String> { Ok(key.name.clone()) }
}

#[tokio::test]
async fn server_metrics_cache_uses_fixed_policy() {
    let cache = server_metrics_cache::<String>(Arc::new(ByName));
    assert_eq!(cache.name(), "serverMetrics");
    assert_eq!(cache.policy(), RefreshPolicy::server_metrics());
    let key = ServerKey::new("games", "survival");
    assert_eq!(cache.get(&key).await.unwrap(), "survival");
    assert!(cache.contains(&key));
}
