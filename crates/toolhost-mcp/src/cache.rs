// crates/toolhost-mcp/src/cache.rs
// ============================================================================
// Module: Bounded Response Cache
// Description: TTL-bounded key to tool-result store with capacity eviction.
// Purpose: Serve repeated successful calls without re-executing tools.
// Dependencies: serde_json, toolhost-core
// ============================================================================

//! ## Overview
//! Entries are keyed by tool, action, and a canonical fingerprint of the call
//! arguments. The whole store sits behind one mutex and entries are inserted
//! as complete values, so a reader sees either a full entry or a miss.
//!
//! ## Invariants
//! - A zero TTL never stores.
//! - At capacity, expired entries go first, then the oldest insertion.
//! - An expired entry is removed when read and reported as a miss.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;
use std::time::Instant;

use serde_json::Value;
use toolhost_core::Clock;
use toolhost_core::HashError;
use toolhost_core::SystemClock;
use toolhost_core::ToolResult;
use toolhost_core::canonical_json_bytes;
use toolhost_core::sha256_hex;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Argument key carrying protocol metadata.
pub const META_KEY: &str = "_meta";
/// Argument key naming the tool action.
pub const ACTION_KEY: &str = "action";
/// Action label used when the arguments carry none.
pub const NO_ACTION: &str = "-";

// ============================================================================
// SECTION: Cache Keys
// ============================================================================

/// Returns the action named in `arguments`, or [`NO_ACTION`].
#[must_use]
pub fn action_of(arguments: &Value) -> &str {
    arguments.get(ACTION_KEY).and_then(Value::as_str).unwrap_or(NO_ACTION)
}

/// Computes `tool:action:fingerprint` where the fingerprint covers the
/// canonical arguments without protocol metadata. The action field is left
/// out of the fingerprint only when the prefix already identifies it: a
/// non-string action, or a literal [`NO_ACTION`] string, stays in.
///
/// # Errors
///
/// Returns [`HashError`] when the arguments cannot be canonicalized.
pub fn cache_key(tool: &str, arguments: &Value) -> Result<String, HashError> {
    let action = action_of(arguments);
    let fingerprint = match arguments {
        Value::Object(map) => {
            let mut stripped = map.clone();
            stripped.remove(META_KEY);
            if action != NO_ACTION {
                stripped.remove(ACTION_KEY);
            }
            canonical_json_bytes(&stripped)?
        }
        other => canonical_json_bytes(other)?,
    };
    Ok(format!("{tool}:{action}:{}", sha256_hex(&fingerprint)))
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// One cached result.
#[derive(Debug)]
struct CacheEntry {
    /// Cached tool result.
    value: ToolResult,
    /// Instant the entry was written.
    inserted_at: Instant,
    /// Instant the entry stops being served.
    expires_at: Instant,
    /// Insertion sequence used for oldest-first eviction.
    sequence: u64,
}

/// Mutex-protected cache state.
#[derive(Debug, Default)]
struct CacheStore {
    /// Entries by key.
    entries: HashMap<String, CacheEntry>,
    /// Keys by insertion sequence.
    order: BTreeMap<u64, String>,
    /// Next insertion sequence.
    next_sequence: u64,
}

impl CacheStore {
    /// Removes `key` from both indexes.
    fn remove(&mut self, key: &str) {
        if let Some(entry) = self.entries.remove(key) {
            self.order.remove(&entry.sequence);
        }
    }

    /// Removes every entry expired at `now`.
    fn purge_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            self.remove(&key);
        }
    }

    /// Removes the oldest inserted entry; false when nothing is left.
    fn evict_oldest(&mut self, now: Instant) -> bool {
        let Some((_, key)) = self.order.pop_first() else {
            return false;
        };
        if let Some(entry) = self.entries.remove(&key) {
            tracing::debug!(
                key = %key,
                age_ms = now.saturating_duration_since(entry.inserted_at).as_millis(),
                "evicted oldest cache entry"
            );
        }
        true
    }
}

// ============================================================================
// SECTION: Cache
// ============================================================================

/// Bounded TTL cache of successful tool results.
pub struct ResponseCache {
    /// Maximum number of entries; zero disables the cache.
    capacity: usize,
    /// Time source.
    clock: Arc<dyn Clock>,
    /// Cache state.
    store: Mutex<CacheStore>,
}

impl ResponseCache {
    /// Builds a cache with an explicit clock.
    #[must_use]
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            capacity,
            clock,
            store: Mutex::new(CacheStore::default()),
        }
    }

    /// Builds a cache on the system clock.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(capacity, Arc::new(SystemClock))
    }

    /// Returns the live result for `key`, dropping it when expired.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<ToolResult> {
        let now = self.clock.now();
        let mut store = self.lock();
        let expired = match store.entries.get(key) {
            Some(entry) if entry.expires_at > now => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            store.remove(key);
        }
        None
    }

    /// Stores `value` under `key` for `ttl`. A zero TTL stores nothing.
    pub fn put(&self, key: &str, value: ToolResult, ttl: Duration) {
        if ttl.is_zero() || self.capacity == 0 {
            return;
        }
        let now = self.clock.now();
        let Some(expires_at) = now.checked_add(ttl) else {
            return;
        };
        let mut store = self.lock();
        store.remove(key);
        if store.entries.len() >= self.capacity {
            store.purge_expired(now);
        }
        while store.entries.len() >= self.capacity && store.evict_oldest(now) {}
        let sequence = store.next_sequence;
        store.next_sequence += 1;
        store.order.insert(sequence, key.to_string());
        store.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                inserted_at: now,
                expires_at,
                sequence,
            },
        );
    }

    /// Returns the number of stored entries, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Returns true when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Locks the store, recovering from poisoning.
    fn lock(&self) -> std::sync::MutexGuard<'_, CacheStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, reason = "Test-only assertions.")]

    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use toolhost_core::ManualClock;
    use toolhost_core::ToolResult;

    use super::ResponseCache;
    use super::cache_key;

    const MINUTE: Duration = Duration::from_secs(60);

    fn cache(capacity: usize) -> (ResponseCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (ResponseCache::new(capacity, clock.clone()), clock)
    }

    #[test]
    fn capacity_two_keeps_two_most_recent() {
        let (cache, _clock) = cache(2);
        cache.put("A", ToolResult::text("a"), MINUTE);
        cache.put("B", ToolResult::text("b"), MINUTE);
        cache.put("C", ToolResult::text("c"), MINUTE);
        assert!(cache.get("A").is_none());
        assert_eq!(cache.get("B"), Some(ToolResult::text("b")));
        assert_eq!(cache.get("C"), Some(ToolResult::text("c")));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn expired_entries_evicted_before_oldest() {
        let (cache, clock) = cache(2);
        cache.put("old", ToolResult::text("old"), Duration::from_secs(600));
        cache.put("short", ToolResult::text("short"), Duration::from_secs(1));
        clock.advance(Duration::from_secs(2));
        cache.put("new", ToolResult::text("new"), MINUTE);
        assert!(cache.get("old").is_some(), "oldest survives when an expired entry frees room");
        assert!(cache.get("new").is_some());
        assert!(cache.get("short").is_none());
    }

    #[test]
    fn zero_ttl_and_zero_capacity_store_nothing() {
        let (cache, _clock) = cache(4);
        cache.put("k", ToolResult::text("v"), Duration::ZERO);
        assert!(cache.is_empty());
        let (disabled, _clock) = self::cache(0);
        disabled.put("k", ToolResult::text("v"), MINUTE);
        assert!(disabled.get("k").is_none());
    }

    #[test]
    fn expiry_is_lazy_on_read() {
        let (cache, clock) = cache(4);
        cache.put("k", ToolResult::text("v"), Duration::from_secs(5));
        clock.advance(Duration::from_secs(5));
        assert_eq!(cache.len(), 1, "expired entry stays until read");
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn rewriting_a_key_refreshes_its_position() {
        let (cache, _clock) = cache(2);
        cache.put("A", ToolResult::text("a1"), MINUTE);
        cache.put("B", ToolResult::text("b"), MINUTE);
        cache.put("A", ToolResult::text("a2"), MINUTE);
        cache.put("C", ToolResult::text("c"), MINUTE);
        assert!(cache.get("B").is_none());
        assert_eq!(cache.get("A"), Some(ToolResult::text("a2")));
    }

    #[test]
    fn cache_key_ignores_order_meta_and_action_field() {
        let base = cache_key("sql_query", &json!({"action": "select", "q": "x", "n": 1}))
            .expect("key");
        let reordered = cache_key(
            "sql_query",
            &json!({"n": 1, "_meta": {"progressToken": 7}, "q": "x", "action": "select"}),
        )
        .expect("key");
        assert_eq!(base, reordered);
        assert!(base.starts_with("sql_query:select:"));
        let other_action = cache_key("sql_query", &json!({"action": "explain", "q": "x", "n": 1}))
            .expect("key");
        assert_ne!(base, other_action);
        let no_action = cache_key("sql_query", &json!({"q": "x"})).expect("key");
        assert!(no_action.starts_with("sql_query:-:"));
    }

    #[test]
    fn non_string_action_stays_in_the_fingerprint() {
        let bare = cache_key("sql_query", &json!({"q": "a"})).expect("key");
        let numeric = cache_key("sql_query", &json!({"action": 1, "q": "a"})).expect("key");
        let object =
            cache_key("sql_query", &json!({"action": {"drop": true}, "q": "a"})).expect("key");
        let dash = cache_key("sql_query", &json!({"action": "-", "q": "a"})).expect("key");
        assert_ne!(bare, numeric);
        assert_ne!(bare, object);
        assert_ne!(numeric, object);
        assert_ne!(bare, dash);
    }
}
