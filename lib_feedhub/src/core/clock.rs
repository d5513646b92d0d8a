//! # Clock
//!
//! The ingestion loops never read the system time directly. They ask an
//! injected [`Clock`] for `now()` and wait on it, which lets a replay run on
//! accelerated or frozen time and lets tests drive the cadence by hand.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// Source of "now" for the ingestion cadence.
pub trait Clock: Send + Sync {
    /// Current time according to this clock.
    fn now(&self) -> DateTime<Utc>;

    /// Resolves once `now()` has reached `deadline`.
    fn wait_until(&self, deadline: DateTime<Utc>) -> impl Future<Output = ()> + Send;

    /// Waits for `duration` of this clock's time.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        let deadline = TimeDelta::from_std(duration)
            .ok()
            .and_then(|delta| self.now().checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.wait_until(deadline)
    }
}

/// Slowest accepted speed-up factor.
pub const MIN_CLOCK_FACTOR: f64 = 1e-3;
/// Fastest accepted speed-up factor.
pub const MAX_CLOCK_FACTOR: f64 = 1e6;

/// `duration` scaled by `factor`, saturating instead of panicking.
fn scale(duration: Duration, factor: f64) -> Duration {
    Duration::try_from_secs_f64(duration.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}

/// The time sources the service can be configured with.
#[derive(Debug, Clone)]
pub enum TimeSource {
    /// Wall-clock time.
    Real,
    /// Starts at `start` and runs `factor` times faster than wall-clock time.
    Accelerated {
        /// Virtual time at process start.
        start: DateTime<Utc>,
        /// Wall-clock instant matching `start`.
        origin: tokio::time::Instant,
        /// Speed-up factor, greater than zero.
        factor: f64,
    },
    /// Frozen at a fixed instant. Waits still take real time so that the
    /// loops keep their cadence.
    Static(DateTime<Utc>),
}

impl TimeSource {
    /// Accelerated time starting now at `start`.
    ///
    /// `factor` is clamped to [`MIN_CLOCK_FACTOR`]..=[`MAX_CLOCK_FACTOR`];
    /// anything that is not a positive number runs at wall-clock speed.
    pub fn accelerated(start: DateTime<Utc>, factor: f64) -> Self {
        let factor = if factor.is_finite() && factor > 0.0 {
            factor.clamp(MIN_CLOCK_FACTOR, MAX_CLOCK_FACTOR)
        } else {
            1.0
        };
        Self::Accelerated {
            start,
            origin: tokio::time::Instant::now(),
            factor,
        }
    }
}

impl Clock for TimeSource {
    fn now(&self) -> DateTime<Utc> {
        match self {
            Self::Real => Utc::now(),
            Self::Accelerated { start, origin, factor } => {
                TimeDelta::from_std(scale(origin.elapsed(), *factor))
                    .ok()
                    .and_then(|elapsed| start.checked_add_signed(elapsed))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC)
            }
            Self::Static(at) => *at,
        }
    }

    async fn wait_until(&self, deadline: DateTime<Utc>) {
        let remaining = (deadline - self.now()).to_std().unwrap_or(Duration::ZERO);
        let real = match self {
            Self::Accelerated { factor, .. } => scale(remaining, factor.recip()),
            Self::Real | Self::Static(_) => remaining,
        };
        if !real.is_zero() {
            tokio::time::sleep(real).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn accelerated_clock_runs_faster() {
        let start = Utc::now();
        let clock = TimeSource::accelerated(start, 60.0);

        tokio::time::advance(Duration::from_secs(1)).await;
        let now = clock.now();
        assert_eq!((now - start).num_seconds(), 60);
    }

    #[tokio::test(start_paused = true)]
    async fn accelerated_wait_is_scaled_down() {
        let clock = TimeSource::accelerated(Utc::now(), 10.0);
        let before = tokio::time::Instant::now();
        clock.sleep(Duration::from_secs(10)).await;
        let waited = before.elapsed();
        assert!(waited >= Duration::from_millis(990) && waited <= Duration::from_millis(1010));
    }

    #[test]
    fn accelerated_factor_is_clamped() {
        let start = Utc::now();
        for (given, expected) in [(1e300, MAX_CLOCK_FACTOR), (1e-300, MIN_CLOCK_FACTOR), (-1.0, 1.0), (f64::NAN, 1.0)] {
            match TimeSource::accelerated(start, given) {
                TimeSource::Accelerated { factor, .. } => assert_eq!(factor, expected),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn extreme_factors_saturate_instead_of_panicking() {
        let start = Utc::now();
        let huge = TimeSource::Accelerated {
            start,
            origin: tokio::time::Instant::now(),
            factor: 1e300,
        };
        let tiny = TimeSource::Accelerated {
            start,
            origin: tokio::time::Instant::now(),
            factor: 1e-300,
        };
        tokio::time::advance(Duration::from_secs(1)).await;

        assert_eq!(huge.now(), DateTime::<Utc>::MAX_UTC);
        assert_eq!(tiny.now(), start);

        // A deadline in the past returns at once whatever the factor.
        tiny.wait_until(start - TimeDelta::seconds(1)).await;
        // A far-future wait on the tiny clock is simply pending.
        let waited = tokio::time::timeout(Duration::from_secs(5), tiny.sleep(Duration::from_secs(1))).await;
        assert!(waited.is_err());
    }

    #[test]
    fn static_clock_is_frozen() {
        let at = Utc::now();
        let clock = TimeSource::Static(at);
        assert_eq!(clock.now(), at);
        assert_eq!(clock.now(), at);
    }
}
