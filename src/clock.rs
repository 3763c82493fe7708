//! sdmmc-logger - Time keeping
//!
//! All waiting in this crate is bounded by a [`Deadline`] measured against a
//! monotonic millisecond [`Clock`]. On hardware that clock is usually a
//! [`TickCounter`] bumped by a timer interrupt. A deadline also counts its
//! polls, so a clock that never moves still ends the wait.

use core::cell::Cell;

use critical_section::Mutex;

/// A monotonic millisecond counter. It may wrap.
pub trait Clock {
    /// Milliseconds since some fixed point in the past.
    fn now_ms(&self) -> u32;
}

impl<T> Clock for &T
where
    T: Clock + ?Sized,
{
    fn now_ms(&self) -> u32 {
        (**self).now_ms()
    }
}

/// The point after which a polling loop gives up: `timeout_ms` on the
/// clock, or `max_polls` calls to [`Deadline::check`], whichever comes first.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone)]
pub struct Deadline {
    start: u32,
    timeout_ms: u32,
    polls_left: u32,
}

impl Deadline {
    /// Start counting `timeout_ms` from now, allowing at most `max_polls`
    /// checks.
    pub fn start<C: Clock>(clock: &C, timeout_ms: u32, max_polls: u32) -> Deadline {
        Deadline {
            start: clock.now_ms(),
            timeout_ms,
            polls_left: max_polls,
        }
    }

    /// Has the deadline passed? Survives the counter wrapping.
    pub fn expired<C: Clock>(&self, clock: &C) -> bool {
        self.polls_left == 0 || clock.now_ms().wrapping_sub(self.start) >= self.timeout_ms
    }

    /// Count one poll and return `err` once the deadline has passed, so a
    /// poll loop can `?` it.
    pub fn check<C: Clock, E>(&mut self, clock: &C, err: E) -> Result<(), E> {
        self.polls_left = self.polls_left.saturating_sub(1);
        if self.expired(clock) {
            Err(err)
        } else {
            Ok(())
        }
    }
}

/// A millisecond counter shared between a timer interrupt and the
/// foreground loop.
///
/// The interrupt calls [`TickCounter::tick`]. Reads happen inside a critical
/// section so a 32-bit value is never torn on 8-bit targets.
pub struct TickCounter {
    millis: Mutex<Cell<u32>>,
}

impl TickCounter {
    /// A counter starting at zero, usable in a `static`.
    pub const fn new() -> TickCounter {
        TickCounter {
            millis: Mutex::new(Cell::new(0)),
        }
    }

    /// Advance by one millisecond. Call this from the timer interrupt.
    pub fn tick(&self) {
        critical_section::with(|cs| {
            let millis = self.millis.borrow(cs);
            millis.set(millis.get().wrapping_add(1));
        });
    }
}

impl Default for TickCounter {
    fn default() -> Self {
        TickCounter::new()
    }
}

impl Clock for TickCounter {
    fn now_ms(&self) -> u32 {
        critical_section::with(|cs| self.millis.borrow(cs).get())
    }
}

/// Fires once per period, without drifting when the caller polls late.
#[derive(Debug, Clone)]
pub struct Periodic {
    period_ms: u32,
    last: u32,
}

impl Periodic {
    /// Start the first period now.
    pub fn new<C: Clock>(clock: &C, period_ms: u32) -> Periodic {
        Periodic {
            period_ms,
            last: clock.now_ms(),
        }
    }

    /// Returns true at most once per elapsed period.
    pub fn poll<C: Clock>(&mut self, clock: &C) -> bool {
        if clock.now_ms().wrapping_sub(self.last) >= self.period_ms {
            self.last = self.last.wrapping_add(self.period_ms);
            true
        } else {
            false
        }
    }
}
