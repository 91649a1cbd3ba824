use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use crate::util::clock::Clock;

/// Issues strictly increasing timestamps for this node's observations. A timestamp is the wall
///  clock in nanos, or one more than the previously issued timestamp if the wall clock did not
///  move forward (or went backwards).
#[derive(Debug)]
pub struct LamportClock {
    clock: Arc<dyn Clock>,
    last_issued: AtomicI64,
}
impl LamportClock {
    pub fn new(clock: Arc<dyn Clock>) -> LamportClock {
        LamportClock {
            clock,
            last_issued: AtomicI64::new(0),
        }
    }

    pub fn next_timestamp(&self) -> i64 {
        let now = self.clock.now_nanos();
        let prev = self.last_issued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| Some(now.max(last) + 1))
            .unwrap_or_else(|last| last);
        now.max(prev) + 1
    }

    pub fn last_issued(&self) -> i64 {
        self.last_issued.load(Ordering::Acquire)
    }
}
