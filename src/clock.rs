//! Monotonic millisecond time base for the control loop.
//!
//! Every timer in the device compares two readings of a free-running `u32`
//! millisecond counter. The counter wraps after ~49.7 days, so intervals are
//! always measured with [`elapsed`], which subtracts with wraparound:
//!
//! ```text
//! now = 0x0000_0010, last = 0xFFFF_FFF0  ──►  elapsed = 0x20 (32 ms)
//! ```

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

/// Milliseconds on the monotonic device clock.
pub type Millis = u32;

/// Source of monotonic time for managers and states.
pub trait Clock {
    fn now_ms(&self) -> Millis;
}

/// Milliseconds between `since` and `now`, correct across counter overflow.
pub fn elapsed(now: Millis, since: Millis) -> Millis {
    now.wrapping_sub(since)
}

/// `now - since >= interval` on the wrapping counter.
pub fn has_elapsed(now: Millis, since: Millis, interval: Millis) -> bool {
    elapsed(now, since) >= interval
}

/// Process clock backed by [`Instant`], truncated to a wrapping `u32`.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> Millis {
        // Truncation is the intended wrap.
        self.origin.elapsed().as_millis() as Millis
    }
}

/// Hand-driven clock. Clones share the same counter, so a simulation can keep
/// one handle while the device owns another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<Millis>>,
}

impl ManualClock {
    pub fn starting_at(now: Millis) -> Self {
        Self {
            now: Rc::new(Cell::new(now)),
        }
    }

    pub fn set(&self, now: Millis) {
        self.now.set(now);
    }

    pub fn advance(&self, delta: Millis) {
        self.now.set(self.now.get().wrapping_add(delta));
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Millis {
        self.now.get()
    }
}
