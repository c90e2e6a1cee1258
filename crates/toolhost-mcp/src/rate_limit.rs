// crates/toolhost-mcp/src/rate_limit.rs
// ============================================================================
// Module: Sliding-Window Rate Limiter
// Description: Per-key admission control over a trailing one-minute window.
// Purpose: Bound how often each tool can be invoked.
// Dependencies: dashmap, toolhost-config, toolhost-core
// ============================================================================

//! ## Overview
//! Each key owns a bucket of admission instants guarded by its own mutex. The
//! key map hands out shared bucket handles, so checking one key never waits on
//! another key's bucket.
//!
//! ## Invariants
//! - Instants older than the window are evicted before counting.
//! - A limit of zero admits unconditionally and creates no bucket.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;
use std::time::Instant;

use dashmap::DashMap;
use toolhost_config::RateLimitConfig;
use toolhost_core::Clock;
use toolhost_core::SystemClock;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Length of the trailing admission window.
pub const WINDOW: Duration = Duration::from_secs(60);

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Admission gate consulted once per call attempt.
pub trait AdmissionControl: Send + Sync {
    /// Returns true when the call for `key` is admitted.
    fn admit(&self, key: &str) -> bool;
}

/// Admission gate that accepts everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnlimitedAdmission;

impl AdmissionControl for UnlimitedAdmission {
    fn admit(&self, _key: &str) -> bool {
        true
    }
}

// ============================================================================
// SECTION: Buckets
// ============================================================================

/// Admission instants for one key.
#[derive(Debug, Default)]
struct RateBucket {
    /// Admissions in arrival order.
    admissions: VecDeque<Instant>,
}

impl RateBucket {
    /// Evicts stale instants, then records `now` if under `limit`.
    fn try_admit(&mut self, now: Instant, limit: usize) -> bool {
        while let Some(front) = self.admissions.front() {
            if now.saturating_duration_since(*front) > WINDOW {
                self.admissions.pop_front();
            } else {
                break;
            }
        }
        if self.admissions.len() >= limit {
            return false;
        }
        self.admissions.push_back(now);
        true
    }
}

// ============================================================================
// SECTION: Limiter
// ============================================================================

/// Sliding-window limiter keyed by tool name.
pub struct SlidingWindowLimiter {
    /// Per-key buckets.
    buckets: DashMap<String, Arc<Mutex<RateBucket>>>,
    /// Configured limits.
    limits: RateLimitConfig,
    /// Time source.
    clock: Arc<dyn Clock>,
}

impl SlidingWindowLimiter {
    /// Builds a limiter with an explicit clock.
    #[must_use]
    pub fn new(limits: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            buckets: DashMap::new(),
            limits,
            clock,
        }
    }

    /// Builds a limiter on the system clock.
    #[must_use]
    pub fn from_config(limits: &RateLimitConfig) -> Self {
        Self::new(limits.clone(), Arc::new(SystemClock))
    }

    /// Returns the number of keys with a bucket.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.buckets.len()
    }

    /// Returns the bucket for `key`, creating it on first use. The map shard
    /// lock is released before the caller locks the bucket.
    fn bucket(&self, key: &str) -> Arc<Mutex<RateBucket>> {
        if let Some(existing) = self.buckets.get(key) {
            return Arc::clone(existing.value());
        }
        Arc::clone(self.buckets.entry(key.to_string()).or_default().value())
    }
}

impl AdmissionControl for SlidingWindowLimiter {
    fn admit(&self, key: &str) -> bool {
        let limit = self.limits.limit_for(key);
        if limit == 0 {
            return true;
        }
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        let bucket = self.bucket(key);
        let now = self.clock.now();
        let admitted =
            bucket.lock().unwrap_or_else(PoisonError::into_inner).try_admit(now, limit);
        if !admitted {
            tracing::debug!(key, limit, "rate limit rejected call");
        }
        admitted
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use toolhost_config::RateLimitConfig;
    use toolhost_core::ManualClock;

    use super::AdmissionControl;
    use super::SlidingWindowLimiter;

    fn limiter(default: u32, per_tool: &[(&str, u32)]) -> (SlidingWindowLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let config = RateLimitConfig {
            default_per_minute: default,
            per_tool: per_tool
                .iter()
                .map(|(key, limit)| ((*key).to_string(), *limit))
                .collect::<BTreeMap<_, _>>(),
        };
        (SlidingWindowLimiter::new(config, clock.clone()), clock)
    }

    #[test]
    fn admits_up_to_limit_then_rejects_until_window_passes() {
        for limit in [1_u32, 3, 10] {
            let (limiter, clock) = limiter(limit, &[]);
            for _ in 0 .. limit {
                assert!(limiter.admit("k"));
            }
            assert!(!limiter.admit("k"), "call {} should be rejected", limit + 1);
            clock.advance(Duration::from_secs(30));
            assert!(!limiter.admit("k"));
            clock.advance(Duration::from_secs(31));
            assert!(limiter.admit("k"));
        }
    }

    #[test]
    fn keys_are_independent() {
        let (limiter, _clock) = limiter(1, &[]);
        assert!(limiter.admit("a"));
        assert!(!limiter.admit("a"));
        assert!(limiter.admit("b"));
    }

    #[test]
    fn zero_limit_is_unlimited_without_bucket() {
        let (limiter, _clock) = limiter(1, &[("free", 0)]);
        for _ in 0 .. 1000 {
            assert!(limiter.admit("free"));
        }
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[test]
    fn concurrent_callers_share_one_limit() {
        const LIMIT: u32 = 25;
        const CALLERS: usize = 8;
        const ATTEMPTS: usize = 20;
        let (limiter, _clock) = limiter(LIMIT, &[]);
        let admitted = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for _ in 0 .. CALLERS {
                scope.spawn(|| {
                    for _ in 0 .. ATTEMPTS {
                        if limiter.admit("k") {
                            admitted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                });
            }
        });
        assert_eq!(u32::try_from(admitted.load(Ordering::SeqCst)).ok(), Some(LIMIT));
    }

    #[test]
    fn rejected_calls_do_not_consume_slots() {
        let (limiter, clock) = limiter(2, &[]);
        assert!(limiter.admit("k"));
        clock.advance(Duration::from_secs(20));
        assert!(limiter.admit("k"));
        assert!(!limiter.admit("k"));
        clock.advance(Duration::from_secs(41));
        assert!(limiter.admit("k"), "first admission aged out");
        assert!(!limiter.admit("k"));
    }
}
