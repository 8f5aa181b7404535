//! Layered cache store with TTL, stale-while-revalidate, and failover.
//!
//! Expiry is evaluated at read time, never by background sweep. Operations on
//! the same key are not exclusive: two concurrent callers can both miss and
//! both fetch, and the last writer wins in the cache. Both callers still
//! receive a valid result, which is the accepted tradeoff for this
//! read-mostly workload.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::durable::DurableStore;

/// Bound on the rolling latency sample window.
const LATENCY_WINDOW: usize = 100;

/// Error types for cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The authoritative fetch failed and no stale value was available.
    #[error("fetch failed: {0}")]
    Fetch(#[source] anyhow::Error),

    /// A cached value could not be encoded or decoded.
    #[error("cache codec failure: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Which layer produced a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheSource {
    Memory,
    Durable,
    Remote,
}

/// A cached value with its write time and origin tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    pub data: T,
    /// Write time, epoch milliseconds. Age is evaluated against this at read.
    pub timestamp: i64,
    pub source: CacheSource,
}

/// Per-call cache options.
#[derive(Debug, Clone, Copy)]
pub struct CacheOptions {
    pub ttl: Duration,
    /// When set, a durable hit older than `ttl/2` triggers an asynchronous
    /// re-fetch that overwrites both layers on success. The triggering call
    /// is never blocked and revalidation errors are swallowed and logged.
    pub stale_while_revalidate: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            stale_while_revalidate: false,
        }
    }
}

impl CacheOptions {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self { ttl, ..Self::default() }
    }

    pub fn revalidating(ttl: Duration) -> Self {
        Self { ttl, stale_while_revalidate: true }
    }
}

/// Cache counters and the rolling average latency.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub memory_hits: u64,
    pub durable_hits: u64,
    pub remote_hits: u64,
    pub average_latency_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
}

impl CacheMetrics {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Multi-level cache: in-process map, durable blob store, then `fetch()`.
///
/// Created once at service start and passed by reference; all state is
/// instance-scoped, nothing is global.
pub struct LayeredCache {
    memory: DashMap<String, CacheEntry<Value>>,
    durable: Arc<dyn DurableStore>,

    hits: AtomicU64,
    misses: AtomicU64,
    memory_hits: AtomicU64,
    durable_hits: AtomicU64,
    remote_hits: AtomicU64,
    latencies: Mutex<VecDeque<f64>>,
    last_update: Mutex<Option<DateTime<Utc>>>,
}

impl LayeredCache {
    pub fn new(durable: Arc<dyn DurableStore>) -> Self {
        Self {
            memory: DashMap::new(),
            durable,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            memory_hits: AtomicU64::new(0),
            durable_hits: AtomicU64::new(0),
            remote_hits: AtomicU64::new(0),
            latencies: Mutex::new(VecDeque::with_capacity(LATENCY_WINDOW)),
            last_update: Mutex::new(None),
        }
    }

    /// Get a value through the layered cascade.
    ///
    /// In order, first hit wins: fresh memory entry; fresh durable entry
    /// (promoted into memory, optionally revalidated in the background);
    /// otherwise `fetch()`, whose result is written to both layers. A failed
    /// fetch falls back to the most recent stale value from memory, then
    /// durable, before the error is surfaced. There is no retry loop beyond
    /// that failover; callers decide whether to call again.
    pub async fn get<T, F, Fut>(
        self: &Arc<Self>,
        key: &str,
        fetch: F,
        opts: CacheOptions,
    ) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let started = Instant::now();
        let now_ms = Utc::now().timestamp_millis();
        let ttl_ms = opts.ttl.as_millis() as i64;

        // Level 1: memory.
        if let Some(entry) = self.memory.get(key) {
            if now_ms - entry.timestamp < ttl_ms {
                let decoded = serde_json::from_value(entry.data.clone())?;
                drop(entry);
                self.record_hit(CacheSource::Memory, started.elapsed());
                debug!(key = key, "Cache: memory hit");
                return Ok(decoded);
            }
        }

        let fetch = Arc::new(fetch);

        // Level 2: durable. Read errors here are non-fatal; the cascade
        // continues to the fetch.
        match self.durable.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str::<CacheEntry<Value>>(&raw) {
                Ok(entry) => {
                    let age_ms = now_ms - entry.timestamp;
                    if age_ms < ttl_ms {
                        let decoded: T = serde_json::from_value(entry.data.clone())?;
                        self.memory.insert(key.to_string(), entry);
                        self.record_hit(CacheSource::Durable, started.elapsed());
                        debug!(key = key, "Cache: durable hit");

                        if opts.stale_while_revalidate && age_ms > ttl_ms / 2 {
                            debug!(key = key, "Cache: revalidating in background");
                            self.spawn_revalidation(key.to_string(), Arc::clone(&fetch));
                        }
                        return Ok(decoded);
                    }
                }
                Err(e) => warn!(key = key, error = %e, "Cache: durable entry corrupt, ignoring"),
            },
            Ok(None) => {}
            Err(e) => warn!(key = key, error = %e, "Cache: durable read failed"),
        }

        // Level 3: authoritative fetch.
        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(key = key, "Cache: fetching from source");

        match (fetch)().await {
            Ok(value) => {
                self.write_both(key, &value).await?;
                self.record_hit(CacheSource::Remote, started.elapsed());
                Ok(value)
            }
            Err(e) => {
                // Failover to stale data, memory first, then durable.
                if let Some(entry) = self.memory.get(key) {
                    warn!(key = key, error = %e, "Cache: fetch failed, serving stale memory data");
                    return Ok(serde_json::from_value(entry.data.clone())?);
                }
                if let Ok(Some(raw)) = self.durable.get(key).await {
                    if let Ok(entry) = serde_json::from_str::<CacheEntry<Value>>(&raw) {
                        warn!(key = key, error = %e, "Cache: fetch failed, serving stale durable data");
                        return Ok(serde_json::from_value(entry.data)?);
                    }
                }
                Err(CacheError::Fetch(e))
            }
        }
    }

    /// Remove a key from both layers.
    pub async fn invalidate(&self, key: &str) {
        self.memory.remove(key);
        if let Err(e) = self.durable.remove(key).await {
            warn!(key = key, error = %e, "Cache: durable invalidate failed");
        }
        debug!(key = key, "Cache: invalidated");
    }

    /// Empty both layers. Counters deliberately persist across clears.
    pub async fn clear(&self) {
        self.memory.clear();
        if let Err(e) = self.durable.clear().await {
            warn!(error = %e, "Cache: durable clear failed");
        }
        info!("Cache: cleared all layers");
    }

    /// Snapshot the process-wide counters.
    pub fn metrics(&self) -> CacheMetrics {
        let latencies = self.latencies.lock().expect("latency window poisoned");
        let average_latency_ms = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<f64>() / latencies.len() as f64
        };

        CacheMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            durable_hits: self.durable_hits.load(Ordering::Relaxed),
            remote_hits: self.remote_hits.load(Ordering::Relaxed),
            average_latency_ms,
            last_update: *self.last_update.lock().expect("last_update poisoned"),
        }
    }

    /// Write a fresh value into both layers with `timestamp = now`.
    async fn write_both<T: Serialize>(&self, key: &str, value: &T) -> Result<(), CacheError> {
        let entry = CacheEntry {
            data: serde_json::to_value(value)?,
            timestamp: Utc::now().timestamp_millis(),
            source: CacheSource::Remote,
        };

        let encoded = serde_json::to_string(&entry)?;
        self.memory.insert(key.to_string(), entry);

        // Durable write failures downgrade the entry to memory-only.
        if let Err(e) = self.durable.set(key, &encoded).await {
            warn!(key = key, error = %e, "Cache: durable write failed");
        }
        Ok(())
    }

    /// Detached background re-fetch; overwrites both layers on success,
    /// never awaited by the triggering call.
    fn spawn_revalidation<T, F, Fut>(self: &Arc<Self>, key: String, fetch: Arc<F>)
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            match (fetch)().await {
                Ok(value) => {
                    if let Err(e) = cache.write_both(&key, &value).await {
                        warn!(key = %key, error = %e, "Cache: revalidation write failed");
                    } else {
                        debug!(key = %key, "Cache: background revalidation completed");
                    }
                }
                Err(e) => warn!(key = %key, error = %e, "Cache: background revalidation failed"),
            }
        });
    }

    fn record_hit(&self, source: CacheSource, elapsed: Duration) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        match source {
            CacheSource::Memory => self.memory_hits.fetch_add(1, Ordering::Relaxed),
            CacheSource::Durable => self.durable_hits.fetch_add(1, Ordering::Relaxed),
            CacheSource::Remote => self.remote_hits.fetch_add(1, Ordering::Relaxed),
        };

        let mut latencies = self.latencies.lock().expect("latency window poisoned");
        latencies.push_back(elapsed.as_secs_f64() * 1000.0);
        while latencies.len() > LATENCY_WINDOW {
            latencies.pop_front();
        }
        *self.last_update.lock().expect("last_update poisoned") = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::durable::FileStore;
    use std::sync::atomic::AtomicUsize;

    fn new_cache(dir: &std::path::Path) -> Arc<LayeredCache> {
        Arc::new(LayeredCache::new(Arc::new(FileStore::new(dir))))
    }

    fn counting_fetch(
        value: &'static str,
        calls: Arc<AtomicUsize>,
    ) -> impl Fn() -> std::pin::Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send>>
           + Send
           + Sync
           + 'static {
        move || {
            let calls = Arc::clone(&calls);
            let value = value.to_string();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(value)
            })
        }
    }

    #[tokio::test]
    async fn fresh_entry_skips_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let cache = new_cache(dir.path());
        let calls = Arc::new(AtomicUsize::new(0));

        let opts = CacheOptions::with_ttl(Duration::from_secs(60));
        let first: String = cache
            .get("k", counting_fetch("v1", Arc::clone(&calls)), opts)
            .await
            .unwrap();
        let second: String = cache
            .get("k", counting_fetch("v1", Arc::clone(&calls)), opts)
            .await
            .unwrap();

        assert_eq!(first, "v1");
        assert_eq!(second, "v1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let metrics = cache.metrics();
        assert_eq!(metrics.misses, 1);
        assert_eq!(metrics.memory_hits, 1);
        assert_eq!(metrics.remote_hits, 1);
    }

    #[tokio::test]
    async fn durable_hit_promotes_into_memory() {
        let dir = tempfile::tempdir().unwrap();
        let opts = CacheOptions::with_ttl(Duration::from_secs(60));

        let writer = new_cache(dir.path());
        let calls = Arc::new(AtomicUsize::new(0));
        let _: String = writer
            .get("k", counting_fetch("v1", Arc::clone(&calls)), opts)
            .await
            .unwrap();

        // Fresh process: empty memory layer, same durable directory.
        let reader = new_cache(dir.path());
        let value: String = reader
            .get("k", counting_fetch("v2", Arc::clone(&calls)), opts)
            .await
            .unwrap();
        assert_eq!(value, "v1");
        assert_eq!(calls.load(Ordering::SeqCst), 1, "durable hit must not fetch");
        assert_eq!(reader.metrics().durable_hits, 1);

        // Promotion means the next read is a memory hit.
        let again: String = reader
            .get("k", counting_fetch("v2", Arc::clone(&calls)), opts)
            .await
            .unwrap();
        assert_eq!(again, "v1");
        assert_eq!(reader.metrics().memory_hits, 1);
    }

    #[tokio::test]
    async fn fetch_failure_fails_over_to_stale_memory() {
        let dir = tempfile::tempdir().unwrap();
        let cache = new_cache(dir.path());
        let calls = Arc::new(AtomicUsize::new(0));

        let short = CacheOptions::with_ttl(Duration::from_millis(20));
        let _: String = cache
            .get("k", counting_fetch("stale", Arc::clone(&calls)), short)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;

        let value: String = cache
            .get(
                "k",
                || async { Err::<String, _>(anyhow::anyhow!("ledger unreachable")) },
                short,
            )
            .await
            .unwrap();
        assert_eq!(value, "stale");
    }

    #[tokio::test]
    async fn fetch_failure_without_cached_value_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let cache = new_cache(dir.path());

        let result: Result<String, _> = cache
            .get(
                "missing",
                || async { Err::<String, _>(anyhow::anyhow!("boom")) },
                CacheOptions::default(),
            )
            .await;

        assert!(matches!(result, Err(CacheError::Fetch(_))));
    }

    #[tokio::test]
    async fn stale_while_revalidate_refreshes_in_background() {
        let dir = tempfile::tempdir().unwrap();
        let opts = CacheOptions::revalidating(Duration::from_millis(200));
        let calls = Arc::new(AtomicUsize::new(0));

        let writer = new_cache(dir.path());
        let _: String = writer
            .get("k", counting_fetch("v1", Arc::clone(&calls)), opts)
            .await
            .unwrap();

        // Let the entry age past ttl/2, then read through a fresh instance so
        // the durable layer serves it.
        tokio::time::sleep(Duration::from_millis(120)).await;
        let reader = new_cache(dir.path());
        let value: String = reader
            .get("k", counting_fetch("v2", Arc::clone(&calls)), opts)
            .await
            .unwrap();
        assert_eq!(value, "v1", "stale value served immediately");

        // Background revalidation lands without blocking the caller.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let refreshed: String = reader
            .get("k", counting_fetch("v3", Arc::clone(&calls)), opts)
            .await
            .unwrap();
        assert_eq!(refreshed, "v2");
    }

    #[tokio::test]
    async fn revalidation_works_for_struct_values() {
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        struct Record {
            token_id: String,
            delivered: u64,
        }

        let dir = tempfile::tempdir().unwrap();
        let opts = CacheOptions::revalidating(Duration::from_millis(200));

        let writer = new_cache(dir.path());
        let _: Record = writer
            .get(
                "k",
                || async {
                    Ok(Record { token_id: "1".to_string(), delivered: 100 })
                },
                opts,
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;
        let reader = new_cache(dir.path());
        let stale: Record = reader
            .get(
                "k",
                || async {
                    Ok(Record { token_id: "1".to_string(), delivered: 200 })
                },
                opts,
            )
            .await
            .unwrap();
        assert_eq!(stale.delivered, 100);

        // The detached refresh lands with the new value.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let refreshed: Record = reader
            .get(
                "k",
                || async {
                    Ok(Record { token_id: "1".to_string(), delivered: 300 })
                },
                opts,
            )
            .await
            .unwrap();
        assert_eq!(refreshed.delivered, 200);
    }

    #[tokio::test]
    async fn clear_empties_layers_but_keeps_counters() {
        let dir = tempfile::tempdir().unwrap();
        let cache = new_cache(dir.path());
        let calls = Arc::new(AtomicUsize::new(0));
        let opts = CacheOptions::default();

        let _: String = cache
            .get("k", counting_fetch("v1", Arc::clone(&calls)), opts)
            .await
            .unwrap();
        let _: String = cache
            .get("k", counting_fetch("v1", Arc::clone(&calls)), opts)
            .await
            .unwrap();

        let before = cache.metrics();
        cache.clear().await;
        let after = cache.metrics();
        assert_eq!(before.hits, after.hits);
        assert_eq!(before.misses, after.misses);

        // Layers are empty, so the next get fetches again.
        let _: String = cache
            .get("k", counting_fetch("v1", Arc::clone(&calls)), opts)
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_removes_from_both_layers() {
        let dir = tempfile::tempdir().unwrap();
        let cache = new_cache(dir.path());
        let calls = Arc::new(AtomicUsize::new(0));
        let opts = CacheOptions::default();

        let _: String = cache
            .get("k", counting_fetch("v1", Arc::clone(&calls)), opts)
            .await
            .unwrap();
        cache.invalidate("k").await;

        let fresh = new_cache(dir.path());
        let _: String = fresh
            .get("k", counting_fetch("v2", Arc::clone(&calls)), opts)
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn latency_window_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let cache = new_cache(dir.path());
        let opts = CacheOptions::default();

        for i in 0..(LATENCY_WINDOW + 20) {
            let key = format!("k{i}");
            let _: u64 = cache.get(&key, move || async move { Ok(i as u64) }, opts).await.unwrap();
        }

        let latencies = cache.latencies.lock().unwrap();
        assert!(latencies.len() <= LATENCY_WINDOW);
    }
}
