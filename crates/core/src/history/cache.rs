//! LRU summary cache (§4.3), grounded on the Python original's
//! `OrderedDict`-based cache: insertion-order eviction of the least recently
//! touched entry once `max_entries` is exceeded, plus age-based expiry.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::SummaryCacheConfig;
use crate::model::SummaryCacheEntry;

struct Slot {
    entry: SummaryCacheEntry,
    inserted_at: Instant,
}

/// Thread-safe LRU cache keyed by session id. `get` promotes the touched key
/// to most-recently-used by reinserting it at the back of `order`.
pub struct SummaryCache {
    config: SummaryCacheConfig,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    slots: HashMap<String, Slot>,
    order: Vec<String>,
}

impl SummaryCache {
    pub fn new(config: SummaryCacheConfig) -> Self {
        Self { config, inner: Mutex::new(Inner::default()) }
    }

    /// Returns a fresh entry for `session_id`, evicting and returning `None`
    /// if it has aged past `max_age_seconds`.
    pub fn get(&self, session_id: &str) -> Option<SummaryCacheEntry> {
        let mut inner = self.inner.lock().expect("summary cache mutex poisoned");
        let max_age = Duration::from_secs(self.config.max_age_seconds);

        let expired = inner
            .slots
            .get(session_id)
            .map(|slot| slot.inserted_at.elapsed() > max_age)
            .unwrap_or(false);

        if expired {
            inner.slots.remove(session_id);
            inner.order.retain(|k| k != session_id);
            return None;
        }

        let entry = inner.slots.get(session_id).map(|s| s.entry.clone());
        if entry.is_some() {
            inner.order.retain(|k| k != session_id);
            inner.order.push(session_id.to_string());
        }
        entry
    }

    /// Inserts or replaces the entry for `session_id`, evicting the least
    /// recently used entry if this insertion would exceed `max_entries`.
    pub fn put(&self, session_id: &str, entry: SummaryCacheEntry) {
        let mut inner = self.inner.lock().expect("summary cache mutex poisoned");

        inner.order.retain(|k| k != session_id);
        inner.slots.insert(session_id.to_string(), Slot { entry, inserted_at: Instant::now() });
        inner.order.push(session_id.to_string());

        while inner.slots.len() > self.config.max_entries {
            if let Some(lru_key) = inner.order.first().cloned() {
                inner.order.remove(0);
                inner.slots.remove(&lru_key);
            } else {
                break;
            }
        }
    }

    /// Whether a cached summary for `session_id` is still usable given how
    /// much the history has grown since it was built (§4.3 delta thresholds).
    pub fn is_stale(&self, entry: &SummaryCacheEntry, current_count: usize, current_chars: usize) -> bool {
        current_count.saturating_sub(entry.old_history_count) >= self.config.delta_msgs
            || current_chars.saturating_sub(entry.old_history_chars) >= self.config.delta_chars
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("summary cache mutex poisoned").slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn config(max_entries: usize) -> SummaryCacheConfig {
        SummaryCacheConfig { max_entries, max_age_seconds: 3600, delta_msgs: 5, delta_chars: 4000 }
    }

    fn entry(summary: &str) -> SummaryCacheEntry {
        SummaryCacheEntry {
            summary: summary.to_string(),
            old_history_count: 10,
            old_history_chars: 1000,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn put_then_get_round_trips() {
        let cache = SummaryCache::new(config(10));
        cache.put("s1", entry("summary a"));
        let got = cache.get("s1").unwrap();
        assert_eq!(got.summary, "summary a");
    }

    #[test]
    fn eviction_drops_least_recently_used() {
        let cache = SummaryCache::new(config(2));
        cache.put("s1", entry("a"));
        cache.put("s2", entry("b"));
        cache.get("s1");
        cache.put("s3", entry("c"));

        assert!(cache.get("s1").is_some());
        assert!(cache.get("s2").is_none());
        assert!(cache.get("s3").is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn staleness_triggers_on_message_delta() {
        let cache = SummaryCache::new(config(10));
        let e = entry("a");
        assert!(!cache.is_stale(&e, 12, 1100));
        assert!(cache.is_stale(&e, 16, 1100));
        assert!(cache.is_stale(&e, 12, 6000));
    }
}
