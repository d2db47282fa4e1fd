//! Exponential backoff with a wall-clock ceiling
//!
//! Used wherever a caller on a request path must retry a remote operation
//! without blocking indefinitely. The schedule grows each interval by
//! `multiplier`, jitters it by `randomization_factor`, caps it at
//! `max_interval`, and gives up as soon as the next sleep would push the total
//! elapsed time past `max_elapsed_time`.
//!
//! Time is read from `tokio::time`, so tests running with a paused runtime
//! clock observe deterministic elapsed times.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::trace;

/// Default first retry interval
pub const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_millis(500);

/// Default jitter applied to each interval (±50%)
pub const DEFAULT_RANDOMIZATION_FACTOR: f64 = 0.5;

/// Default growth factor between intervals
pub const DEFAULT_MULTIPLIER: f64 = 1.5;

/// Default cap on a single interval
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(60);

/// Default ceiling on total elapsed time
pub const DEFAULT_MAX_ELAPSED_TIME: Duration = Duration::from_secs(15 * 60);

/// Exponential backoff policy
///
/// A policy is immutable and cheap to clone; every retry loop starts its own
/// [`Backoff`] schedule from it via [`ExponentialBackoff::start`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    /// First interval before jitter
    pub initial_interval: Duration,
    /// Jitter factor in `[0, 1]`; 0 disables jitter
    pub randomization_factor: f64,
    /// Growth factor applied after every attempt
    pub multiplier: f64,
    /// Upper bound for a single interval before jitter
    pub max_interval: Duration,
    /// Total elapsed-time ceiling; `None` retries forever
    pub max_elapsed_time: Option<Duration>,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial_interval: DEFAULT_INITIAL_INTERVAL,
            randomization_factor: DEFAULT_RANDOMIZATION_FACTOR,
            multiplier: DEFAULT_MULTIPLIER,
            max_interval: DEFAULT_MAX_INTERVAL,
            max_elapsed_time: Some(DEFAULT_MAX_ELAPSED_TIME),
        }
    }
}

impl ExponentialBackoff {
    /// Set the total elapsed-time ceiling
    pub fn with_max_elapsed_time(mut self, max_elapsed_time: Duration) -> Self {
        self.max_elapsed_time = Some(max_elapsed_time);
        self
    }

    /// Set the first interval
    pub fn with_initial_interval(mut self, initial_interval: Duration) -> Self {
        self.initial_interval = initial_interval;
        self
    }

    /// Set the jitter factor (clamped to `[0, 1]`)
    pub fn with_randomization_factor(mut self, factor: f64) -> Self {
        self.randomization_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// Start a new schedule; the elapsed-time clock starts now
    pub fn start(&self) -> Backoff {
        Backoff {
            policy: self.clone(),
            current_interval: self.initial_interval,
            started: Instant::now(),
        }
    }
}

/// A running backoff schedule
#[derive(Debug)]
pub struct Backoff {
    policy: ExponentialBackoff,
    current_interval: Duration,
    started: Instant,
}

impl Backoff {
    /// Time since the schedule was started
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Next delay to sleep, or `None` once the elapsed ceiling would be crossed
    pub fn next_backoff(&mut self) -> Option<Duration> {
        let elapsed = self.elapsed();
        let next = self.randomized_interval();
        self.increment_interval();

        if let Some(max_elapsed) = self.policy.max_elapsed_time {
            if elapsed + next > max_elapsed {
                trace!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    max_elapsed_ms = max_elapsed.as_millis() as u64,
                    "Backoff elapsed-time ceiling reached"
                );
                return None;
            }
        }

        Some(next)
    }

    fn randomized_interval(&self) -> Duration {
        let factor = self.policy.randomization_factor;
        if factor <= 0.0 {
            return self.current_interval;
        }

        let interval = self.current_interval.as_secs_f64();
        let delta = factor * interval;
        let min = (interval - delta).max(0.0);
        let max = interval + delta;

        Duration::from_secs_f64(rand::thread_rng().gen_range(min..=max))
    }

    fn increment_interval(&mut self) {
        let max = self.policy.max_interval;
        if self.current_interval.as_secs_f64() >= max.as_secs_f64() / self.policy.multiplier {
            self.current_interval = max;
        } else {
            self.current_interval = self.current_interval.mul_f64(self.policy.multiplier);
        }
    }
}

/// Retry `operation` on the given backoff policy
///
/// `notify` is invoked with the error and the upcoming delay before every
/// sleep. Returns the first success, or the last error once the policy's
/// elapsed-time ceiling is reached.
pub async fn retry_notify<T, E, Op, Fut, N>(
    policy: &ExponentialBackoff,
    mut operation: Op,
    mut notify: N,
) -> Result<T, E>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    N: FnMut(&E, Duration),
{
    let mut backoff = policy.start();

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => match backoff.next_backoff() {
                Some(delay) => {
                    notify(&err, delay);
                    tokio::time::sleep(delay).await;
                }
                None => return Err(err),
            },
        }
    }
}
