//! Outbound rate control: a global token bucket plus per-endpoint burst
//! windows.

use std::collections::HashMap;
use std::net::SocketAddr;

use crate::ports::Timestamp;

/// A token bucket in millitoken units.
///
/// Guarantees that over any window `W ≥ 1 s` at most `rate · W + burst`
/// acquisitions succeed.
#[derive(Debug)]
pub struct TokenBucket {
    rate_per_sec: u32,
    burst: u32,
    /// Current fill, scaled by 1000 so refill stays in integer math
    /// (`rate_per_sec` millitokens accrue per millisecond).
    millitokens: u64,
    last_refill: Timestamp,
}

impl TokenBucket {
    /// A bucket that starts full.
    pub fn new(rate_per_sec: u32, burst: u32, now: Timestamp) -> Self {
        Self {
            rate_per_sec: rate_per_sec.max(1),
            burst: burst.max(1),
            millitokens: u64::from(burst.max(1)) * 1000,
            last_refill: now,
        }
    }

    /// Take one token if available.
    pub fn try_acquire(&mut self, now: Timestamp) -> bool {
        self.refill(now);
        if self.millitokens >= 1000 {
            self.millitokens -= 1000;
            true
        } else {
            false
        }
    }

    /// Milliseconds until a token will be available (zero if one already
    /// is).
    pub fn next_ready_ms(&mut self, now: Timestamp) -> u64 {
        self.refill(now);
        if self.millitokens >= 1000 {
            return 0;
        }
        let deficit = 1000 - self.millitokens;
        deficit.div_ceil(u64::from(self.rate_per_sec))
    }

    fn refill(&mut self, now: Timestamp) {
        let elapsed_ms = now.millis_since(self.last_refill);
        if elapsed_ms == 0 {
            return;
        }
        let cap = u64::from(self.burst) * 1000;
        self.millitokens =
            (self.millitokens + elapsed_ms * u64::from(self.rate_per_sec)).min(cap);
        self.last_refill = now;
    }
}

#[derive(Debug, Clone, Copy)]
struct Burst {
    count: u32,
    window_start: Timestamp,
}

/// Caps operations per endpoint within a rolling window.
///
/// `try_acquire` refuses once an endpoint exhausts its allowance for the
/// current window; the caller decides whether to delay or drop. Protocol
/// offenders can be `penalize`d, which burns allowance without sending
/// anything.
#[derive(Debug)]
pub struct BurstController {
    max_burst: u32,
    window_ms: u64,
    bursts: HashMap<SocketAddr, Burst>,
}

impl BurstController {
    /// Controller allowing `max_burst` operations per `window_ms`.
    pub fn new(max_burst: u32, window_ms: u64) -> Self {
        Self {
            max_burst: max_burst.max(1),
            window_ms: window_ms.max(1),
            bursts: HashMap::new(),
        }
    }

    /// Account one operation toward `endpoint`. False when the allowance
    /// for the current window is spent.
    pub fn try_acquire(&mut self, endpoint: SocketAddr, now: Timestamp) -> bool {
        let burst = self.bursts.entry(endpoint).or_insert(Burst {
            count: 0,
            window_start: now,
        });
        if now.millis_since(burst.window_start) >= self.window_ms {
            burst.count = 0;
            burst.window_start = now;
        }
        if burst.count >= self.max_burst {
            return false;
        }
        burst.count += 1;
        true
    }

    /// Burn one unit of `endpoint`'s allowance (rate penalty for protocol
    /// errors).
    pub fn penalize(&mut self, endpoint: SocketAddr, now: Timestamp) {
        let burst = self.bursts.entry(endpoint).or_insert(Burst {
            count: 0,
            window_start: now,
        });
        if now.millis_since(burst.window_start) >= self.window_ms {
            burst.count = 0;
            burst.window_start = now;
        }
        burst.count = burst.count.saturating_add(1);
    }

    /// Milliseconds until `endpoint`'s window rolls over.
    pub fn window_remaining_ms(&self, endpoint: SocketAddr, now: Timestamp) -> u64 {
        match self.bursts.get(&endpoint) {
            Some(burst) => self
                .window_ms
                .saturating_sub(now.millis_since(burst.window_start)),
            None => 0,
        }
    }

    /// Drop expired windows so the map does not grow with dead endpoints.
    pub fn sweep(&mut self, now: Timestamp) {
        self.bursts
            .retain(|_, b| now.millis_since(b.window_start) < self.window_ms);
    }

    /// Tracked endpoint count (introspection).
    pub fn tracked_endpoints(&self) -> usize {
        self.bursts.len()
    }
}
