use std::time::{Duration, Instant};

/// Monotonic clock measuring nanoseconds since its creation.
///
/// The dispatch engine keys every scheduled action to this clock, so all
/// execution times are small offsets relative to application start rather
/// than wall-clock timestamps.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Nanoseconds elapsed since the clock was created.
    #[inline(always)]
    pub fn now_nanos(&self) -> u64 {
        self.start.elapsed().as_nanos() as u64
    }

    /// Elapsed time since the clock was created.
    #[inline(always)]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}
