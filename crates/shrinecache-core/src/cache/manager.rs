use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::clock::{Clock, SystemClock};

/// Default freshness for list and detail resources (5 minutes).
pub const CONTENT_TTL_SECS: u64 = 300;

/// Default freshness for aggregate statistics (1 minute).
pub const STATS_TTL_SECS: u64 = 60;

/// Longest configurable TTL (one year); larger values are clamped.
pub const MAX_TTL_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub key: String,
    pub payload: T,
    pub fetched_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.fetched_at
    }

    /// Fresh while strictly younger than `ttl`.
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.age(now) < ttl
    }

    pub fn age_display(&self, now: DateTime<Utc>) -> String {
        let minutes = self.age(now).num_minutes();
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }
}

/// TTL response cache keyed by request fingerprint.
///
/// Expiry is checked at read time only: `get` reports a miss for a stale
/// entry but never removes it. Entries leave the cache through
/// `invalidate_prefix` or `clear`. Clones share the same entries.
pub struct ResponseCache<T = Value> {
    entries: Arc<Mutex<HashMap<String, CacheEntry<T>>>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<T> Clone for ResponseCache<T> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            ttl: self.ttl,
            clock: self.clock.clone(),
        }
    }
}

impl<T: Clone> ResponseCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn from_secs(ttl_secs: u64) -> Self {
        let secs = i64::try_from(ttl_secs.min(MAX_TTL_SECS)).unwrap_or(i64::MAX);
        Self::new(Duration::seconds(secs))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl,
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<T>>> {
        // Critical sections never panic midway, so a poisoned map is still consistent
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The entry for `key` if it is still fresh.
    pub fn get(&self, key: &str) -> Option<CacheEntry<T>> {
        let now = self.clock.now();
        let entries = self.lock();
        match entries.get(key) {
            Some(entry) if entry.is_fresh(now, self.ttl) => {
                debug!(key, "Cache hit");
                Some(entry.clone())
            }
            Some(_) => {
                debug!(key, "Cache entry stale");
                None
            }
            None => {
                debug!(key, "Cache miss");
                None
            }
        }
    }

    /// The last stored entry for `key`, fresh or not.
    pub fn get_stale_or_miss(&self, key: &str) -> Option<CacheEntry<T>> {
        self.lock().get(key).cloned()
    }

    /// Store `payload` under `key`, stamped with the current time.
    pub fn set(&self, key: &str, payload: T) {
        let entry = CacheEntry {
            key: key.to_string(),
            payload,
            fetched_at: self.clock.now(),
        };
        self.lock().insert(key.to_string(), entry);
        debug!(key, "Cache entry stored");
    }

    /// Remove every entry whose key starts with `prefix`, returning how many went.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        let removed = before - entries.len();
        debug!(prefix, removed, "Cache prefix invalidated");
        removed
    }

    pub fn clear(&self) {
        self.lock().clear();
        debug!("Cache cleared");
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }
}

// ============================================================================
// Tests
// ============================================================================
