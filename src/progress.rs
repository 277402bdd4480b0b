//! Throttled progress reporting

use std::time::{Duration, Instant};

/// Source of monotonic time for throughput measurement
pub trait Clock: Send + Sync {
    /// The current instant
    fn now(&self) -> Instant;
}

/// The process monotonic clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A progress sample worth publishing
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProgressSample {
    /// Units received so far
    pub received: u64,
    /// Units expected in total, if known
    pub expected: Option<u64>,
    /// Throughput over the last window
    pub units_per_second: u64,
}

/// Rolling units-per-second counter that emits at most once per window
///
/// The first sample always emits. Later samples emit only once the window
/// since the last emission has elapsed; the throughput is recomputed from
/// the units received during that window.
#[derive(Debug)]
pub struct ProgressThrottle {
    window: Duration,
    last_emit: Option<(Instant, u64)>,
    units_per_second: u64,
}

impl ProgressThrottle {
    /// Create a throttle with the given window
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_emit: None,
            units_per_second: 0,
        }
    }

    /// Feed a sample taken at `now`; returns it if it should be published
    pub fn sample(&mut self, now: Instant, received: u64, expected: Option<u64>) -> Option<ProgressSample> {
        match self.last_emit {
            None => {
                self.last_emit = Some((now, received));
            }
            Some((at, received_then)) => {
                let elapsed = now.saturating_duration_since(at);
                if elapsed < self.window {
                    return None;
                }
                let delta = received.saturating_sub(received_then);
                let secs = elapsed.as_secs_f64();
                self.units_per_second = if secs > 0.0 {
                    (delta as f64 / secs) as u64
                } else {
                    0
                };
                self.last_emit = Some((now, received));
            }
        }
        Some(ProgressSample {
            received,
            expected,
            units_per_second: self.units_per_second,
        })
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_emits_then_window_suppresses() {
        let start = Instant::now();
        let mut throttle = ProgressThrottle::new(Duration::from_secs(1));

        let first = throttle.sample(start, 0, Some(1000)).unwrap();
        assert_eq!(first.units_per_second, 0);
        assert!(throttle.sample(start + Duration::from_millis(100), 100, Some(1000)).is_none());
        assert!(throttle.sample(start + Duration::from_millis(999), 400, Some(1000)).is_none());

        let rolled = throttle.sample(start + Duration::from_secs(1), 500, Some(1000)).unwrap();
        assert_eq!(rolled.received, 500);
        assert_eq!(rolled.units_per_second, 500);
    }

    #[test]
    fn throughput_uses_the_elapsed_window() {
        let start = Instant::now();
        let mut throttle = ProgressThrottle::new(Duration::from_secs(1));
        throttle.sample(start, 0, None);
        let sample = throttle.sample(start + Duration::from_secs(2), 4000, None).unwrap();
        assert_eq!(sample.units_per_second, 2000);
        assert!(throttle.sample(start + Duration::from_millis(2500), 5000, None).is_none());
    }
}
