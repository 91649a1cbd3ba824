use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use crate::util::clock::Clock;

/// A clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    nanos: AtomicI64,
}
impl ManualClock {
    pub fn new(nanos: i64) -> ManualClock {
        ManualClock {
            nanos: AtomicI64::new(nanos),
        }
    }

    pub fn set(&self, nanos: i64) {
        self.nanos.store(nanos, Ordering::SeqCst);
    }

    pub fn advance(&self, d: Duration) {
        self.nanos.fetch_add(d.as_nanos() as i64, Ordering::SeqCst);
    }
}
impl Clock for ManualClock {
    fn now_nanos(&self) -> i64 {
        self.nanos.load(Ordering::SeqCst)
    }
}

/// A wall clock that moves with tokio's (possibly paused) time, for tests running timer driven
///  loops with `start_paused`
#[derive(Debug)]
pub struct TokioClock {
    base_nanos: i64,
    start: tokio::time::Instant,
}
impl TokioClock {
    pub fn new(base_nanos: i64) -> TokioClock {
        TokioClock {
            base_nanos,
            start: tokio::time::Instant::now(),
        }
    }
}
impl Clock for TokioClock {
    fn now_nanos(&self) -> i64 {
        self.base_nanos + self.start.elapsed().as_nanos() as i64
    }
}
