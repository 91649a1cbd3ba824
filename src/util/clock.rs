use std::fmt::Debug;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
#[cfg(test)] use mockall::automock;

pub const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Wall clock abstraction. Observation timestamps and decision watermarks are nanoseconds since
///  the UNIX epoch, so they can be compared across nodes and shipped through the replicated log.
#[cfg_attr(test, automock)]
pub trait Clock: Debug + Send + Sync + 'static {
    fn now_nanos(&self) -> i64;

    fn now(&self) -> SystemTime {
        system_time_from_nanos(self.now_nanos())
    }
}

#[derive(Debug, Default)]
pub struct SystemClock {}
impl Clock for SystemClock {
    fn now_nanos(&self) -> i64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_nanos().try_into().unwrap_or(i64::MAX),
            Err(_) => 0,
        }
    }
}

pub fn system_time_from_nanos(nanos: i64) -> SystemTime {
    if nanos <= 0 {
        UNIX_EPOCH
    }
    else {
        UNIX_EPOCH + Duration::from_nanos(nanos as u64)
    }
}

/// formats a timestamp the way the administrative dumps show it, e.g. `2024-03-01 17:04:11`
pub fn format_nanos(nanos: i64) -> String {
    let secs = nanos.div_euclid(NANOS_PER_SEC);
    let sub_nanos = nanos.rem_euclid(NANOS_PER_SEC) as u32;
    match chrono::DateTime::from_timestamp(secs, sub_nanos) {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => String::new(),
    }
}

pub fn format_system_time(time: SystemTime) -> String {
    let nanos = match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_nanos().try_into().unwrap_or(i64::MAX),
        Err(_) => 0,
    };
    format_nanos(nanos)
}
