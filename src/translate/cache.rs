//! In-memory render cache: `(fingerprint, language)` → compiled renderer.
//!
//! Two eviction pressures, both applied by one purge routine:
//! - TTL on `last_accessed` (refreshed by `get` and `put`).
//! - Capacity on insertion order (refreshed by `put` only).
//!
//! The LRU list is driven with `put`/`get_mut` on insertion and `peek_mut` on
//! reads, so its order is insertion order rather than access order. The purge
//! runs on a background thread once an insertion pushes the entry count past
//! `max_entries`; at most one purge is pending at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::template::{Renderer, TemplateEngine};
use crate::error::TemplateError;
use crate::fingerprint::fingerprint;
use crate::metrics::{metric_names, MetricsRegistry};

type CacheKey = (u32, String);

struct CacheEntry {
    renderer: Renderer,
    last_accessed: Instant,
}

struct CacheState {
    entries: LruCache<CacheKey, CacheEntry>,
    max_entries: usize,
    ttl: Duration,
}

struct Shared {
    state: Mutex<CacheState>,
    purging: AtomicBool,
}

pub struct RenderCache {
    shared: Arc<Shared>,
    engine: Arc<dyn TemplateEngine>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl RenderCache {
    pub fn new(max_entries: usize, ttl: Duration, engine: Arc<dyn TemplateEngine>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(CacheState {
                    entries: LruCache::unbounded(),
                    max_entries,
                    ttl,
                }),
                purging: AtomicBool::new(false),
            }),
            engine,
            metrics: None,
        }
    }

    /// Record purge timings into `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Set new eviction bounds. Nothing is evicted until the next purge.
    pub fn configure(&self, max_entries: usize, ttl: Duration) {
        let mut state = self.shared.state.lock();
        state.max_entries = max_entries;
        state.ttl = ttl;
        info!(max_entries, ttl_ms = ttl.as_millis() as u64, "render cache configured");
    }

    pub fn contains(&self, fingerprint: u32, lang: &str) -> bool {
        self.shared
            .state
            .lock()
            .entries
            .contains(&(fingerprint, lang.to_string()))
    }

    /// Render the cached entry for `(fingerprint, lang)` with `data`.
    /// Returns `Ok(None)` when nothing is cached.
    pub fn get(
        &self,
        fingerprint: u32,
        lang: &str,
        data: &Value,
    ) -> Result<Option<String>, TemplateError> {
        let renderer = {
            let mut state = self.shared.state.lock();
            match state.entries.peek_mut(&(fingerprint, lang.to_string())) {
                Some(entry) => {
                    entry.last_accessed = Instant::now();
                    entry.renderer.clone()
                }
                None => return Ok(None),
            }
        };
        renderer.render(data).map(Some)
    }

    /// Cache `text` for `lang`, compiling it unless an entry already exists.
    /// Either way the entry becomes the most recently inserted one.
    pub fn put(
        &self,
        text: &str,
        lang: &str,
        fingerprint_hint: Option<u32>,
    ) -> Result<Renderer, TemplateError> {
        let key = (fingerprint_hint.unwrap_or_else(|| fingerprint(text)), lang.to_string());

        if let Some(renderer) = self.touch(&key) {
            return Ok(renderer);
        }

        let compiled = self.engine.compile(text)?;

        let (renderer, over_capacity) = {
            let mut state = self.shared.state.lock();
            let now = Instant::now();
            // A concurrent put may have inserted the key while we compiled.
            let renderer = match state.entries.get_mut(&key) {
                Some(entry) => {
                    entry.last_accessed = now;
                    entry.renderer.clone()
                }
                None => {
                    state.entries.put(
                        key,
                        CacheEntry {
                            renderer: compiled.clone(),
                            last_accessed: now,
                        },
                    );
                    compiled
                }
            };
            (renderer, state.entries.len() > state.max_entries)
        };

        if over_capacity {
            self.schedule_purge();
        }
        Ok(renderer)
    }

    /// Re-insert an existing key: refresh access time and insertion position.
    fn touch(&self, key: &CacheKey) -> Option<Renderer> {
        let mut state = self.shared.state.lock();
        let entry = state.entries.get_mut(key)?;
        entry.last_accessed = Instant::now();
        Some(entry.renderer.clone())
    }

    pub fn invalidate(&self, fingerprint: u32, lang: &str) {
        let removed = self
            .shared
            .state
            .lock()
            .entries
            .pop(&(fingerprint, lang.to_string()));
        if removed.is_some() {
            debug!(fingerprint, lang, "render cache entry invalidated");
        }
    }

    pub fn clear(&self) {
        self.shared.state.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a background purge is scheduled or running.
    pub fn is_purging(&self) -> bool {
        self.shared.purging.load(Ordering::Acquire)
    }

    /// Run the eviction routine now, on the calling thread.
    pub fn purge(&self) -> usize {
        self.shared.purge(self.metrics.as_deref())
    }

    fn schedule_purge(&self) {
        if self
            .shared
            .purging
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let shared = Arc::clone(&self.shared);
        let metrics = self.metrics.clone();
        let spawned = std::thread::Builder::new()
            .name("render-cache-purge".into())
            .spawn(move || {
                shared.purge(metrics.as_deref());
            });
        if let Err(e) = spawned {
            warn!(error = %e, "render cache purge thread failed to start");
            self.shared.purging.store(false, Ordering::Release);
        }
    }
}

impl Shared {
    fn purge(&self, metrics: Option<&MetricsRegistry>) -> usize {
        let start = Instant::now();
        let mut state = self.state.lock();
        let before = state.entries.len();
        let ttl = state.ttl;
        let now = Instant::now();

        let expired: Vec<CacheKey> = state
            .entries
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.last_accessed) >= ttl)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            state.entries.pop(key);
        }

        let mut evicted = 0;
        while state.entries.len() > state.max_entries {
            if state.entries.pop_lru().is_none() {
                break;
            }
            evicted += 1;
        }

        // Cleared under the lock: an insertion that follows sees an accurate flag.
        self.purging.store(false, Ordering::Release);
        let remaining = state.entries.len();
        drop(state);

        if let Some(metrics) = metrics {
            metrics.record(metric_names::CACHE_PURGE, start.elapsed().as_micros() as f64);
        }
        let removed = before - remaining;
        if removed > 0 {
            info!(
                expired = expired.len(),
                evicted, remaining, "render cache purged"
            );
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use serde_json::json;

    use super::*;
    use crate::translate::template::TeraEngine;

    /// Tera engine that counts compilations.
    #[derive(Default)]
    struct CountingEngine {
        compiled: AtomicUsize,
    }

    impl TemplateEngine for CountingEngine {
        fn compile(&self, text: &str) -> Result<Renderer, TemplateError> {
            self.compiled.fetch_add(1, Ordering::SeqCst);
            TeraEngine.compile(text)
        }
    }

    const FOREVER: Duration = Duration::MAX;

    fn cache(max: usize, ttl: Duration) -> RenderCache {
        RenderCache::new(max, ttl, Arc::new(TeraEngine))
    }

    fn text(i: usize) -> String {
        format!("Text {i}")
    }

    fn cached(cache: &RenderCache, text: &str, lang: &str) -> bool {
        cache.contains(fingerprint(text), lang)
    }

    fn wait_for_purge(cache: &RenderCache) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while cache.is_purging() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(!cache.is_purging(), "purge did not finish");
    }

    #[test]
    fn put_then_get_compiles_once() {
        let engine = Arc::new(CountingEngine::default());
        let cache = RenderCache::new(100, FOREVER, engine.clone());
        let data = json!({ "name": "Anna" });

        let renderer = cache.put("Hi {{ name }}", "en", None).unwrap();
        let direct = TeraEngine.compile("Hi {{ name }}").unwrap().render(&data).unwrap();

        assert_eq!(renderer.render(&data).unwrap(), direct);
        let hit = cache.get(fingerprint("Hi {{ name }}"), "en", &data).unwrap();
        assert_eq!(hit.as_deref(), Some(direct.as_str()));
        assert_eq!(engine.compiled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reinsertion_reuses_handle() {
        let engine = Arc::new(CountingEngine::default());
        let cache = RenderCache::new(100, FOREVER, engine.clone());

        cache.put("Test string", "en", None).unwrap();
        cache.put("Test string", "en", Some(fingerprint("Test string"))).unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(engine.compiled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn miss_is_none() {
        let cache = cache(10, FOREVER);
        assert_eq!(cache.get(fingerprint("Test string"), "en", &Value::Null).unwrap(), None);
    }

    #[test]
    fn languages_are_separate_entries() {
        let cache = cache(10, FOREVER);
        cache.put("Hola", "es", Some(7)).unwrap();
        cache.put("Bonjour", "fr", Some(7)).unwrap();

        assert_eq!(cache.get(7, "es", &Value::Null).unwrap().as_deref(), Some("Hola"));
        assert_eq!(cache.get(7, "fr", &Value::Null).unwrap().as_deref(), Some("Bonjour"));

        cache.invalidate(7, "es");
        assert!(!cache.contains(7, "es"));
        assert!(cache.contains(7, "fr"));
        cache.invalidate(7, "es");
    }

    #[test]
    fn clear_removes_everything() {
        let cache = cache(1000, FOREVER);
        for i in 0..100 {
            cache.put(&text(i), "ca", None).unwrap();
        }
        cache.clear();
        assert!(cache.is_empty());
        assert!((0..100).all(|i| !cached(&cache, &text(i), "ca")));
    }

    #[test]
    fn zero_ttl_purge_empties_cache() {
        let cache = cache(10, Duration::ZERO);
        for i in 0..100 {
            cache.put(&text(i), "ca", None).unwrap();
            cache.put(&text(i), "en", None).unwrap();
        }
        wait_for_purge(&cache);
        cache.purge();
        assert!(cache.is_empty());
    }

    #[test]
    fn capacity_purge_keeps_most_recent_insertions() {
        let cache = cache(10, FOREVER);
        for i in 0..100 {
            cache.put(&text(i), "ca", None).unwrap();
        }
        wait_for_purge(&cache);
        cache.purge();

        assert_eq!(cache.len(), 10);
        assert!((0..90).all(|i| !cached(&cache, &text(i), "ca")));
        assert!((90..100).all(|i| cached(&cache, &text(i), "ca")));
    }

    #[test]
    fn capacity_purge_counts_every_language() {
        let cache = cache(10, FOREVER);
        for i in 0..100 {
            let hash = fingerprint(&text(i));
            cache.put(&text(i), "ca", Some(hash)).unwrap();
            cache.put(&text(i), "en", Some(hash)).unwrap();
        }
        wait_for_purge(&cache);
        cache.purge();

        assert!((0..95).all(|i| !cached(&cache, &text(i), "ca") && !cached(&cache, &text(i), "en")));
        assert!((95..100).all(|i| cached(&cache, &text(i), "ca") && cached(&cache, &text(i), "en")));
    }

    #[test]
    fn reinserted_key_survives_capacity_purge() {
        let cache = cache(10, FOREVER);
        for i in 0..20 {
            cache.put(&text(i), "ca", None).unwrap();
        }
        cache.put(&text(1), "ca", None).unwrap();
        wait_for_purge(&cache);
        cache.purge();

        assert!(cached(&cache, &text(1), "ca"));
        assert!(!cached(&cache, &text(0), "ca"));
        assert!((2..11).all(|i| !cached(&cache, &text(i), "ca")));
        assert!((11..20).all(|i| cached(&cache, &text(i), "ca")));
    }

    #[test]
    fn reads_do_not_change_insertion_order() {
        let cache = cache(2, FOREVER);
        cache.put("a", "en", None).unwrap();
        cache.put("b", "en", None).unwrap();
        cache.get(fingerprint("a"), "en", &Value::Null).unwrap();
        cache.configure(1, FOREVER);
        cache.purge();

        assert!(!cached(&cache, "a", "en"));
        assert!(cached(&cache, "b", "en"));
    }

    #[test]
    fn crossing_threshold_schedules_background_purge() {
        let cache = cache(10, Duration::ZERO);
        for i in 0..11 {
            cache.put(&text(i), "ca", None).unwrap();
        }
        wait_for_purge(&cache);
        assert!(cache.is_empty());
    }

    #[test]
    fn configure_does_not_evict_immediately() {
        let cache = cache(100, FOREVER);
        for i in 0..5 {
            cache.put(&text(i), "ca", None).unwrap();
        }
        cache.configure(2, Duration::ZERO);
        assert_eq!(cache.len(), 5);
        cache.purge();
        assert!(cache.is_empty());
    }

    #[test]
    fn purge_records_metric() {
        let metrics = Arc::new(MetricsRegistry::new());
        let cache = cache(10, FOREVER).with_metrics(metrics.clone());
        cache.purge();
        assert_eq!(metrics.count(metric_names::CACHE_PURGE), 1);
    }

    #[test]
    fn concurrent_puts_keep_one_entry_per_key() {
        let cache = Arc::new(cache(1000, FOREVER));
        std::thread::scope(|scope| {
            for _ in 0..8 {
                let cache = Arc::clone(&cache);
                scope.spawn(move || {
                    for i in 0..50 {
                        cache.put(&text(i), "ca", None).unwrap();
                    }
                });
            }
        });
        assert_eq!(cache.len(), 50);
    }
}
