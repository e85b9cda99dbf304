//! Wall-clock time in Unix milliseconds.
//!
//! `Stamper` hands out timestamps that strictly increase within a session even
//! if the wall clock stalls or steps backwards, and can be pushed past an
//! observed remote timestamp.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Settable clock for tests and deterministic replays.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self(AtomicI64::new(start_ms))
    }

    pub fn set(&self, ms: i64) {
        self.0.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: i64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Stamper {
    clock: Arc<dyn Clock>,
    last: Mutex<i64>,
}

impl Stamper {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            last: Mutex::new(i64::MIN),
        }
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// max(now, last + 1, floor + 1). Pass `i64::MIN` when there is no floor.
    pub fn next(&self, floor: i64) -> i64 {
        let mut last = self.last.lock();
        let now = self.clock.now_ms();
        let ts = now
            .max(last.saturating_add(1))
            .max(floor.saturating_add(1));
        *last = ts;
        ts
    }

    /// Record a timestamp seen elsewhere so later stamps land after it.
    pub fn observe(&self, ts: i64) {
        let mut last = self.last.lock();
        if ts > *last {
            *last = ts;
        }
    }
}

impl std::fmt::Debug for Stamper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stamper").field("last", &*self.last.lock()).finish()
    }
}

pub fn to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamps_strictly_increase_on_frozen_clock() {
        let clock = Arc::new(ManualClock::new(1000));
        let s = Stamper::new(clock.clone());
        let a = s.next(i64::MIN);
        let b = s.next(i64::MIN);
        assert_eq!(a, 1000);
        assert_eq!(b, 1001);
        clock.set(500);
        assert_eq!(s.next(i64::MIN), 1002);
    }

    #[test]
    fn floor_pushes_stamp_forward() {
        let s = Stamper::new(Arc::new(ManualClock::new(100)));
        assert_eq!(s.next(250), 251);
        assert_eq!(s.next(10), 252);
    }

    #[test]
    fn observe_moves_last() {
        let s = Stamper::new(Arc::new(ManualClock::new(100)));
        s.observe(400);
        assert_eq!(s.next(i64::MIN), 401);
        s.observe(10);
        assert_eq!(s.next(i64::MIN), 402);
    }

    #[test]
    fn millis_convert_to_datetime() {
        let dt = to_datetime(1_700_000_000_123).unwrap();
        assert_eq!(dt.timestamp_millis(), 1_700_000_000_123);
    }
}
