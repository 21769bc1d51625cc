use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// A source of timestamps for the queue.
///
/// Ring entries are stamped and expiry is computed through this trait, so the
/// caller can choose between wall-clock time (matches what `export` presents)
/// and an anchored monotonic clock that never steps backwards.
pub trait Clock: Send + Sync + 'static {
    /// Returns the current timestamp in nanoseconds since the UNIX epoch.
    fn now_ns(&self) -> u64;
}

/// A clock that uses `std::time::SystemTime`.
///
/// Susceptible to NTP adjustments; entries stamped by it may briefly violate
/// timestamp ordering when the clock steps.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ns(&self) -> u64 {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before UNIX epoch");
        u64::try_from(timestamp.as_nanos()).expect("system time exceeds timestamp range")
    }
}

/// A clock anchored to wall time at construction that progresses via
/// `Instant`, so successive readings never decrease.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    start_wall_ns: u64,
    start: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self {
            start_wall_ns: SystemClock.now_ns(),
            start: Instant::now(),
        }
    }
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for MonotonicClock {
    fn now_ns(&self) -> u64 {
        self.start_wall_ns + self.start.elapsed().as_nanos() as u64
    }
}
