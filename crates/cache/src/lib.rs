//! craftkube cache: refresh-ahead, size-bounded cache for per-server metrics.
//!
//! Entries younger than `refresh_after` are served as-is. Between
//! `refresh_after` and `expire_after` the cached value is served immediately
//! and a single background reload is started for that key. From
//! `expire_after` on the entry counts as absent and the caller waits for a
//! fresh load.

#![forbid(unsafe_code)]

use std::fmt::Display;
use std::hash::{BuildHasherDefault, Hash};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use craft_core::ServerKey;
use dashmap::DashMap;
use metrics::{counter, gauge, histogram};
use rustc_hash::FxHasher;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Age after which a read schedules a background reload.
pub const REFRESH_AFTER: Duration = Duration::from_secs(20);
/// Age after which an entry is no longer served.
pub const EXPIRE_AFTER: Duration = Duration::from_secs(60);
/// Live entry bound before least-recently-used eviction.
pub const MAX_ENTRIES: usize = 1000;
/// Name of the server metrics cache.
pub const SERVER_METRICS: &str = "serverMetrics";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    pub refresh_after: Duration,
    pub expire_after: Duration,
    pub max_entries: usize,
}

impl RefreshPolicy {
    pub const fn server_metrics() -> Self {
        Self { refresh_after: REFRESH_AFTER, expire_after: EXPIRE_AFTER, max_entries: MAX_ENTRIES }
    }
}

impl Default for RefreshPolicy {
    fn default() -> Self { Self::server_metrics() }
}

/// Produces the value for a key. Called inline on a miss and from a
/// background task on a refresh.
#[async_trait::async_trait]
pub trait Loader<K, V>: Send + Sync {
    async fn load(&self, key: &K) -> anyhow::Result<V>;
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("{cache}: loading {key} failed: {reason:#}")]
    Load { cache: &'static str, key: String, reason: anyhow::Error },
}

struct Entry<V> {
    value: V,
    written: Instant,
    /// Access tick for LRU ordering; bumped under the shard read guard.
    accessed: AtomicU64,
    /// Tick of the write that produced `value`; a refresh only lands on the version it was started from.
    version: u64,
    refreshing: AtomicBool,
}

/// Keys are stored behind `Arc` so eviction can name a victim without
/// cloning a `K` while a shard guard is held.
type Entries<K, V> = DashMap<Arc<K>, Entry<V>, BuildHasherDefault<FxHasher>>;

struct Inner<K, V> {
    name: &'static str,
    policy: RefreshPolicy,
    loader: Arc<dyn Loader<K, V>>,
    entries: Entries<K, V>,
    tick: AtomicU64,
    /// Serializes writers that add a key, so the bound holds. Readers never take it.
    admission: Mutex<()>,
}

enum Lookup<V> {
    Fresh(V),
    Stale { value: V, refresh: Option<u64> },
    Miss,
}

/// Handle to a shared cache; clones share storage.
pub struct RefreshCache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for RefreshCache<K, V> {
    fn clone(&self) -> Self { Self { inner: Arc::clone(&self.inner) } }
}

impl<K, V> RefreshCache<K, V>
where
    K: Eq + Hash + Clone + Display + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str, policy: RefreshPolicy, loader: Arc<dyn Loader<K, V>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                policy,
                loader,
                entries: DashMap::with_hasher(BuildHasherDefault::default()),
                tick: AtomicU64::new(0),
                admission: Mutex::new(()),
            }),
        }
    }

    pub fn name(&self) -> &'static str { self.inner.name }
    pub fn policy(&self) -> RefreshPolicy { self.inner.policy }
    pub fn len(&self) -> usize { self.inner.entries.len() }
    pub fn is_empty(&self) -> bool { self.inner.entries.is_empty() }
    pub fn contains(&self, key: &K) -> bool { self.inner.entries.contains_key(key) }

    /// Drop a key. Returns whether it was present.
    pub fn invalidate(&self, key: &K) -> bool { self.inner.entries.remove(key).is_some() }

    /// Cached value for `key`, loading it when absent or expired.
    /// Never waits on a background refresh.
    pub async fn get(&self, key: &K) -> Result<V, CacheError> {
        let name = self.inner.name;
        match self.lookup(key, Instant::now()) {
            Lookup::Fresh(v) => {
                counter!("cache_hits_total", 1, "cache" => name);
                Ok(v)
            }
            Lookup::Stale { value, refresh } => {
                counter!("cache_stale_hits_total", 1, "cache" => name);
                if let Some(version) = refresh {
                    self.spawn_refresh(key.clone(), version);
                }
                Ok(value)
            }
            Lookup::Miss => self.load(key).await,
        }
    }

    fn next_tick(&self) -> u64 { self.inner.tick.fetch_add(1, Ordering::Relaxed) + 1 }

    fn lookup(&self, key: &K, now: Instant) -> Lookup<V> {
        let policy = self.inner.policy;
        let tick = self.next_tick();
        let Some(e) = self.inner.entries.get(key) else { return Lookup::Miss };
        let age = now.saturating_duration_since(e.written);
        if age >= policy.expire_after {
            let version = e.version;
            drop(e);
            if self.inner.entries.remove_if(key, |_, e| e.version == version).is_some() {
                debug!(cache = self.inner.name, key = %key, age_ms = age.as_millis() as u64, "entry expired");
            }
            return Lookup::Miss;
        }
        e.accessed.fetch_max(tick, Ordering::Relaxed);
        if age < policy.refresh_after {
            return Lookup::Fresh(e.value.clone());
        }
        // First stale reader claims the refresh; the rest just read.
        let claimed = e.refreshing.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok();
        Lookup::Stale { value: e.value.clone(), refresh: claimed.then_some(e.version) }
    }

    async fn load(&self, key: &K) -> Result<V, CacheError> {
        let name = self.inner.name;
        let started = Instant::now();
        let res = self.inner.loader.load(key).await;
        histogram!("cache_load_ms", started.elapsed().as_secs_f64() * 1000.0, "cache" => name);
        match res {
            Ok(v) => {
                counter!("cache_loads_total", 1, "cache" => name);
                let out = v.clone();
                self.insert(key.clone(), v);
                Ok(out)
            }
            Err(reason) => {
                counter!("cache_load_errors_total", 1, "cache" => name);
                warn!(cache = name, key = %key, error = %reason, "load failed");
                Err(CacheError::Load { cache: name, key: key.to_string(), reason })
            }
        }
    }

    fn insert(&self, key: K, value: V) {
        let name = self.inner.name;
        let max = self.inner.policy.max_entries.max(1);
        let key = Arc::new(key);
        let tick = self.next_tick();
        let entry = Entry {
            value,
            written: Instant::now(),
            accessed: AtomicU64::new(tick),
            version: tick,
            refreshing: AtomicBool::new(false),
        };
        // Evicted entries are dropped after the admission guard is released.
        let mut evicted = Vec::new();
        let _replaced = {
            let _admit = self.inner.admission.lock().unwrap_or_else(|e| e.into_inner());
            if !self.inner.entries.contains_key(&*key) {
                while self.inner.entries.len() >= max {
                    match self.evict_one() {
                        Some(victim) => evicted.push(victim),
                        None => break,
                    }
                }
            }
            self.inner.entries.insert(key, entry)
        };
        for (victim, _) in &evicted {
            counter!("cache_evictions_total", 1, "cache" => name);
            debug!(cache = name, key = %victim, "evicted least recently used entry");
        }
        gauge!("cache_entries", self.inner.entries.len() as f64, "cache" => name);
    }

    /// Remove the least recently accessed entry. The scan holds one shard read
    /// guard at a time; the removal re-checks that the victim was not touched
    /// in between.
    fn evict_one(&self) -> Option<(Arc<K>, Entry<V>)> {
        loop {
            let (victim, seen) = self
                .inner
                .entries
                .iter()
                .map(|r| (Arc::clone(r.key()), r.value().accessed.load(Ordering::Relaxed)))
                .min_by_key(|(_, accessed)| *accessed)?;
            let removed = self
                .inner
                .entries
                .remove_if(&*victim, |_, e| e.accessed.load(Ordering::Relaxed) == seen);
            if removed.is_some() {
                return removed;
            }
        }
    }

    fn spawn_refresh(&self, key: K, version: u64) {
        let cache = self.clone();
        debug!(cache = self.inner.name, key = %key, "refresh scheduled");
        tokio::spawn(async move {
            let res = cache.inner.loader.load(&key).await;
            cache.finish_refresh(&key, version, res);
        });
    }

    fn finish_refresh(&self, key: &K, version: u64, res: anyhow::Result<V>) {
        let name = self.inner.name;
        let tick = self.next_tick();
        // Ok(Some(old)): value replaced, Ok(None): entry gone or rewritten since the refresh started.
        let outcome = match self.inner.entries.get_mut(key) {
            Some(mut e) if e.version == version => {
                e.refreshing.store(false, Ordering::Release);
                res.map(|v| {
                    e.written = Instant::now();
                    e.version = tick;
                    Some(std::mem::replace(&mut e.value, v))
                })
            }
            _ => res.map(|_| None),
        };
        match outcome {
            Ok(Some(_old)) => {
                counter!("cache_refresh_total", 1, "cache" => name);
                debug!(cache = name, key = %key, "refreshed");
            }
            Ok(None) => debug!(cache = name, key = %key, "refreshed entry gone or replaced; discarding"),
            Err(err) => {
                counter!("cache_refresh_errors_total", 1, "cache" => name);
                warn!(cache = name, key = %key, error = %err, "background refresh failed; keeping cached value");
            }
        }
    }
}

/// Per-server metrics cache with the fixed server metrics policy.
pub type ServerMetricsCache<V> = RefreshCache<ServerKey, V>;

pub fn server_metrics_cache<V>(loader: Arc<dyn Loader<ServerKey, V>>) -> ServerMetricsCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    RefreshCache::new(SERVER_METRICS, RefreshPolicy::server_metrics(), loader)
}
