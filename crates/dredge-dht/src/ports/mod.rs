//! Trait seams between the pure domain layer and the runtime.
//!
//! The only port the domain needs is a clock: every time-dependent domain
//! structure takes explicit [`Timestamp`] arguments, and the service layer
//! reads them from a [`Clock`]. Tests drive the same code with a
//! [`FixedClock`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Milliseconds on a monotonic timeline.
///
/// Timestamps are opaque offsets from an arbitrary origin (process start in
/// production). They are never wall-clock times and never persisted as
/// absolute values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Construct from raw milliseconds.
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    /// Raw milliseconds.
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// This timestamp advanced by `ms`.
    pub const fn add_millis(self, ms: u64) -> Self {
        Self(self.0 + ms)
    }

    /// Milliseconds elapsed since `earlier` (zero if `earlier` is later).
    pub const fn millis_since(self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Source of monotonic time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current monotonic timestamp.
    fn now(&self) -> Timestamp;
}

/// Production clock: milliseconds since the clock was created, read from
/// [`Instant`].
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Create a clock anchored at the current instant.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.origin.elapsed().as_millis() as u64)
    }
}

/// Manually advanced clock for tests.
#[derive(Debug, Default)]
pub struct FixedClock {
    now_ms: AtomicU64,
}

impl FixedClock {
    /// Start at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start at `ms`.
    pub fn at(ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(ms),
        }
    }

    /// Move time forward.
    pub fn advance(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }

    /// Jump to an absolute offset.
    pub fn set(&self, ms: u64) {
        self.now_ms.store(ms, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.now_ms.load(Ordering::SeqCst))
    }
}
