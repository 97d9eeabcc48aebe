//! Response cache for plotscout-runtime.
//!
//! Maps request fingerprints to the text a provider returned. Concurrent
//! misses on one fingerprint are coalesced: the first caller runs the
//! fetch, later callers wait for its result instead of invoking a provider
//! again. Failed fetches are not cached.
//!
//! Entries carry their own `cached_at` so the TTL still holds for entries
//! restored from disk.

use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::fingerprint::Fingerprint;
use crate::providers::TokenUsage;

/// A cached provider reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub text: String,

    /// Adapter that produced the reply
    pub provider: String,

    pub model: String,

    #[serde(default)]
    pub usage: TokenUsage,

    pub cached_at: DateTime<Utc>,
}

/// Fingerprint-keyed response cache.
pub struct ResponseCache {
    cache: Cache<Fingerprint, CachedResponse>,
    ttl: Duration,
}

impl ResponseCache {
    /// Create a new cache with the given configuration.
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Self { cache, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_fresh(&self, entry: &CachedResponse, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(entry.cached_at);
        match age.to_std() {
            Ok(age) => age < self.ttl,
            // cached_at in the future; clock skew between runs
            Err(_) => true,
        }
    }

    /// Look up a fresh entry.
    pub async fn get(&self, key: &Fingerprint) -> Option<CachedResponse> {
        let entry = self.cache.get(key).await?;
        if self.is_fresh(&entry, Utc::now()) {
            Some(entry)
        } else {
            self.cache.invalidate(key).await;
            None
        }
    }

    pub async fn insert(&self, key: Fingerprint, response: CachedResponse) {
        self.cache.insert(key, response).await;
    }

    /// Return the cached entry or run `fetch` exactly once across
    /// concurrent callers.
    ///
    /// The flag in the result is `true` only for the caller whose `fetch`
    /// ran. Errors are shared with every waiter and not cached.
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        key: &Fingerprint,
        fetch: F,
    ) -> Result<(CachedResponse, bool), Arc<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CachedResponse, E>>,
        E: Send + Sync + 'static,
    {
        if let Some(hit) = self.get(key).await {
            return Ok((hit, false));
        }

        let fetched = AtomicBool::new(false);
        let response = self
            .cache
            .try_get_with(key.clone(), async {
                fetched.store(true, Ordering::SeqCst);
                fetch().await
            })
            .await?;
        Ok((response, fetched.load(Ordering::SeqCst)))
    }

    /// Fresh entries ordered by fingerprint, for persistence.
    pub fn entries(&self) -> Vec<(Fingerprint, CachedResponse)> {
        let now = Utc::now();
        let mut entries: Vec<(Fingerprint, CachedResponse)> = self
            .cache
            .iter()
            .filter(|(_, v)| self.is_fresh(v, now))
            .map(|(k, v)| ((*k).clone(), v))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Load persisted entries, dropping those older than the TTL.
    ///
    /// Returns how many entries were kept.
    pub async fn restore(&self, entries: Vec<(Fingerprint, CachedResponse)>) -> usize {
        let now = Utc::now();
        let mut kept = 0;
        for (key, value) in entries {
            if self.is_fresh(&value, now) {
                self.cache.insert(key, value).await;
                kept += 1;
            }
        }
        kept
    }

    /// Clear the cache.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    /// Approximate entry count.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(10_000, Duration::from_secs(3600))
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("ttl", &self.ttl)
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn response(text: &str, cached_at: DateTime<Utc>) -> CachedResponse {
        CachedResponse {
            text: text.to_string(),
            provider: "scripted".to_string(),
            model: "scripted".to_string(),
            usage: TokenUsage::default(),
            cached_at,
        }
    }

    fn key(s: &str) -> Fingerprint {
        Fingerprint::compute("reasoning", &[], &serde_json::json!({ "k": s }))
    }

    #[tokio::test]
    async fn test_cache_operations() {
        let cache = ResponseCache::default();
        let k = key("a");

        assert!(cache.get(&k).await.is_none());
        cache.insert(k.clone(), response("hello", Utc::now())).await;
        assert_eq!(cache.get(&k).await.unwrap().text, "hello");
    }

    #[tokio::test]
    async fn test_concurrent_fetch_runs_once() {
        let cache = Arc::new(ResponseCache::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let k = key("shared");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            let k = k.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch(&k, || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, String>(response("once", Utc::now()))
                    })
                    .await
            }));
        }

        let mut fetched = 0;
        for handle in handles {
            let (value, ran) = handle.await.unwrap().unwrap();
            assert_eq!(value.text, "once");
            if ran {
                fetched += 1;
            }
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(fetched, 1);
    }

    #[tokio::test]
    async fn test_errors_not_cached() {
        let cache = ResponseCache::default();
        let k = key("flaky");

        let first = cache
            .get_or_fetch(&k, || async { Err::<CachedResponse, _>("down".to_string()) })
            .await;
        assert_eq!(first.unwrap_err().as_str(), "down");

        let (value, ran) = cache
            .get_or_fetch(&k, || async { Ok::<_, String>(response("up", Utc::now())) })
            .await
            .unwrap();
        assert!(ran);
        assert_eq!(value.text, "up");
    }

    #[tokio::test]
    async fn test_restore_drops_expired() {
        let cache = ResponseCache::new(100, Duration::from_secs(60));
        let old = Utc::now() - chrono::Duration::seconds(120);
        let kept = cache
            .restore(vec![
                (key("old"), response("stale", old)),
                (key("new"), response("fresh", Utc::now())),
            ])
            .await;
        assert_eq!(kept, 1);
        assert!(cache.get(&key("old")).await.is_none());
        assert!(cache.get(&key("new")).await.is_some());
    }

    #[tokio::test]
    async fn test_stale_entry_is_a_miss() {
        let cache = ResponseCache::new(100, Duration::from_secs(60));
        let old = Utc::now() - chrono::Duration::seconds(61);
        cache.insert(key("x"), response("stale", old)).await;
        assert!(cache.get(&key("x")).await.is_none());
    }

    #[tokio::test]
    async fn test_entries_sorted() {
        let cache = ResponseCache::default();
        for s in ["c", "a", "b"] {
            cache.insert(key(s), response(s, Utc::now())).await;
        }
        let entries = cache.entries();
        assert_eq!(entries.len(), 3);
        assert!(entries.windows(2).all(|w| w[0].0 < w[1].0));
    }
}
