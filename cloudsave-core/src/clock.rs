//! Time sources for save stamps.
use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::record::ticks_from_datetime;

/// Source of UTC ticks.
pub trait Clock: Send + Sync {
    fn now_ticks(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ticks(&self) -> i64 {
        ticks_from_datetime(Utc::now())
    }
}

/// Settable clock for tests and scripted runs.
#[derive(Debug, Default)]
pub struct ManualClock {
    ticks: AtomicI64,
}

impl ManualClock {
    #[must_use]
    pub const fn new(ticks: i64) -> Self {
        Self {
            ticks: AtomicI64::new(ticks),
        }
    }

    pub fn set(&self, ticks: i64) {
        self.ticks.store(ticks, Ordering::SeqCst);
    }

    pub fn advance(&self, delta: i64) {
        self.ticks.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ticks(&self) -> i64 {
        self.ticks.load(Ordering::SeqCst)
    }
}

/// Hands out strictly increasing stamps even when the clock stalls or
/// steps backwards.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TickSequencer {
    last: Option<i64>,
}

impl TickSequencer {
    pub(crate) fn next(&mut self, now: i64) -> i64 {
        let stamp = match self.last {
            Some(last) if now <= last => last.saturating_add(1),
            _ => now,
        };
        self.last = Some(stamp);
        stamp
    }

    /// Raise the high-water mark to a stamp produced elsewhere.
    pub(crate) fn observe(&mut self, ticks: i64) {
        self.last = Some(self.last.map_or(ticks, |last| last.max(ticks)));
    }
}
