//! Software liveness monitor fed by the sampling loop.

use core::cell::Cell;

use embassy_sync::blocking_mutex::{raw::CriticalSectionRawMutex, Mutex};
use embassy_time::{Duration, Instant};

use super::Watchdog;

/// Timestamp of the most recent feed, shared with a supervising task.
pub struct Heartbeat {
    last_feed: Mutex<CriticalSectionRawMutex, Cell<Option<Instant>>>,
}

impl Heartbeat {
    /// Create a heartbeat that has never been fed
    pub const fn new() -> Self {
        Self {
            last_feed: Mutex::new(Cell::new(None)),
        }
    }

    /// When the watchdog was last fed, if ever
    pub fn last_feed(&self) -> Option<Instant> {
        self.last_feed.lock(|last| last.get())
    }

    /// Whether the last feed happened within `max_age` of `now`
    pub fn is_alive_at(&self, now: Instant, max_age: Duration) -> bool {
        match self.last_feed() {
            Some(last) => now.saturating_duration_since(last) <= max_age,
            None => false,
        }
    }

    /// [`Heartbeat::is_alive_at`] evaluated now
    pub fn is_alive(&self, max_age: Duration) -> bool {
        self.is_alive_at(Instant::now(), max_age)
    }

    fn record(&self, at: Instant) {
        self.last_feed.lock(|last| last.set(Some(at)));
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

impl Watchdog for &Heartbeat {
    fn feed(&mut self) {
        self.record(Instant::now());
    }
}
