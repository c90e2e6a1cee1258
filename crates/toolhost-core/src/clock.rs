// crates/toolhost-core/src/clock.rs
// ============================================================================
// Module: Toolhost Clock
// Description: Monotonic time source used by the limiter and cache.
// Purpose: Allow deterministic time control in tests.
// Dependencies: std
// ============================================================================

//! ## Overview
//! Time-dependent components (sliding windows, TTL expiry) read time through
//! [`Clock`] so tests can advance a [`ManualClock`] instead of sleeping.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;
use std::time::Instant;

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Monotonic time source.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> Instant;
}

/// Clock backed by [`Instant::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

// ============================================================================
// SECTION: Manual Clock
// ============================================================================

/// Clock that only moves when advanced explicitly.
#[derive(Debug)]
pub struct ManualClock {
    /// Instant captured at construction.
    base: Instant,
    /// Accumulated offset from `base`.
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Creates a manual clock anchored at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Moves the clock forward by `step`.
    pub fn advance(&self, step: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        *offset += step;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = *self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        self.base + offset
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
