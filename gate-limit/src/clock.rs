use std::sync::Arc;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use quanta::Clock;
use quanta::Instant;
use quanta::Mock;

/// A unix-seconds clock.
///
/// Wraps a monotonic [`quanta::Clock`] and pins it to the wall clock once at
/// construction, so every reading is `epoch + monotonic elapsed`. Strategies
/// and storage share one `TimeSource` (clones share the underlying clock),
/// which keeps refill arithmetic, window alignment and TTL expiry on the
/// same timeline.
#[derive(Debug, Clone)]
pub struct TimeSource {
    clock: Clock,
    anchor: Instant,
    epoch: f64,
}

impl TimeSource {
    /// A time source backed by the system clock.
    pub fn system() -> Self {
        Self::with_clock(Clock::new())
    }

    /// A time source over a caller-supplied `quanta` clock.
    pub fn with_clock(clock: Clock) -> Self {
        let anchor = clock.now();
        let epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        Self {
            clock,
            anchor,
            epoch,
        }
    }

    /// A controllable time source for tests, starting at unix second zero.
    ///
    /// Advance it through the returned [`Mock`]; all clones observe the
    /// advance.
    pub fn mock() -> (Self, Arc<Mock>) {
        let (clock, mock) = Clock::mock();
        let anchor = clock.now();
        (
            Self {
                clock,
                anchor,
                epoch: 0.0,
            },
            mock,
        )
    }

    /// Current unix time in fractional seconds.
    pub fn now(&self) -> f64 {
        self.epoch + self.clock.now().duration_since(self.anchor).as_secs_f64()
    }
}

impl Default for TimeSource {
    fn default() -> Self {
        Self::system()
    }
}

/// Seconds until `later`, rounded up so a positive gap never reports zero.
pub(crate) fn whole_seconds_until(later: f64, now: f64) -> u64 {
    (later - now).max(0.0).ceil() as u64
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn system_time_is_monotonic_unix_seconds() {
        let time = TimeSource::system();
        let t1 = time.now();
        let t2 = time.now();

        // A plausible unix timestamp, and never moving backwards.
        assert!(t1 > 1_000_000_000.0);
        assert!(t2 >= t1);
    }

    #[test]
    fn mock_starts_at_zero_and_advances() {
        let (time, mock) = TimeSource::mock();
        assert_eq!(time.now(), 0.0);

        mock.increment(Duration::from_secs(5));
        assert_eq!(time.now(), 5.0);

        mock.increment(Duration::from_millis(500));
        assert_eq!(time.now(), 5.5);
    }

    #[test]
    fn clones_share_the_mock() {
        let (time, mock) = TimeSource::mock();
        let clone = time.clone();

        mock.increment(Duration::from_secs(3));
        assert_eq!(time.now(), 3.0);
        assert_eq!(clone.now(), 3.0);
    }

    #[test]
    fn whole_seconds_round_up() {
        assert_eq!(whole_seconds_until(10.0, 9.1), 1);
        assert_eq!(whole_seconds_until(13.4, 10.0), 4);
        assert_eq!(whole_seconds_until(10.0, 10.0), 0);
        assert_eq!(whole_seconds_until(9.0, 10.0), 0);
    }
}
