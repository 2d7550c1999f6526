//! # Backoff
//!
//! Retry schedules for message handlers. A [`BackOff`] is a stateful schedule
//! that yields the wait before each retry, or `None` once it gives up.
//! A fresh schedule is built for every message through a
//! [`BackOffConstructor`].
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

/// A stateful retry schedule.
pub trait BackOff: Send {
    /// Wait before the next retry, or `None` to stop retrying.
    fn next_backoff(&mut self) -> Option<Duration>;

    /// Restart the schedule from its first interval.
    fn reset(&mut self) {}
}

/// Factory producing a fresh schedule for each message.
pub type BackOffConstructor = Arc<dyn Fn() -> Box<dyn BackOff> + Send + Sync>;

/// Never retries: the handler gets exactly one attempt.
#[derive(Clone, Copy, Debug, Default)]
pub struct StopBackOff;

impl BackOff for StopBackOff {
    fn next_backoff(&mut self) -> Option<Duration> {
        None
    }
}

/// Retries forever with the same interval.
#[derive(Clone, Copy, Debug)]
pub struct ConstantBackOff {
    pub interval: Duration,
}

impl ConstantBackOff {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl BackOff for ConstantBackOff {
    fn next_backoff(&mut self) -> Option<Duration> {
        Some(self.interval)
    }
}

/// Geometric schedule: `initial_interval * multiplier^n`, optionally capped.
#[derive(Clone, Debug)]
pub struct ExponentialBackOff {
    /// The backoff interval for the first retry.
    pub initial_interval: Duration,
    /// Coefficient to multiply the interval with after every retry.
    pub multiplier: u32,
    /// The maximum possible backoff between retries.
    pub maximum_interval: Option<Duration>,
    /// Stop retrying once this much time has passed since the schedule started.
    pub max_elapsed_time: Option<Duration>,
    current_interval: Duration,
    started_at: Instant,
}

impl ExponentialBackOff {
    /// Initialize an `ExponentialBackOffBuilder`.
    pub fn build(multiplier: u32, initial_interval: Duration) -> ExponentialBackOffBuilder {
        ExponentialBackOffBuilder::new(multiplier, initial_interval)
    }
}

impl BackOff for ExponentialBackOff {
    fn next_backoff(&mut self) -> Option<Duration> {
        if let Some(max_elapsed) = self.max_elapsed_time {
            if self.started_at.elapsed() >= max_elapsed {
                return None;
            }
        }

        let interval = self.current_interval;
        let next = interval.saturating_mul(self.multiplier);
        self.current_interval = match self.maximum_interval {
            Some(max) => next.min(max),
            None => next,
        };
        Some(interval)
    }

    fn reset(&mut self) {
        self.current_interval = self.initial_interval;
        self.started_at = Instant::now();
    }
}

/// Builder pattern struct to provide an `ExponentialBackOff`.
pub struct ExponentialBackOffBuilder {
    pub multiplier: u32,
    pub initial_interval: Duration,
    pub maximum_interval: Option<Duration>,
    pub max_elapsed_time: Option<Duration>,
}

impl ExponentialBackOffBuilder {
    pub fn new(multiplier: u32, initial_interval: Duration) -> Self {
        Self {
            multiplier,
            initial_interval,
            maximum_interval: None,
            max_elapsed_time: None,
        }
    }

    pub fn maximum_interval(mut self, interval: Duration) -> Self {
        self.maximum_interval = Some(interval);
        self
    }

    pub fn max_elapsed_time(mut self, elapsed: Duration) -> Self {
        self.max_elapsed_time = Some(elapsed);
        self
    }

    /// Provide an `ExponentialBackOff` according to build parameters provided thus far.
    pub fn provide(&self) -> ExponentialBackOff {
        let initial_interval = match self.maximum_interval {
            Some(max) => self.initial_interval.min(max),
            None => self.initial_interval,
        };
        ExponentialBackOff {
            initial_interval,
            multiplier: self.multiplier,
            maximum_interval: self.maximum_interval,
            max_elapsed_time: self.max_elapsed_time,
            current_interval: initial_interval,
            started_at: Instant::now(),
        }
    }
}

/// Limits another schedule to `max_retries` retries (`max_retries + 1` attempts).
#[derive(Clone, Debug)]
pub struct WithMaxRetries<B> {
    inner: B,
    max_retries: u32,
    retries: u32,
}

impl<B: BackOff> WithMaxRetries<B> {
    pub fn new(inner: B, max_retries: u32) -> Self {
        Self {
            inner,
            max_retries,
            retries: 0,
        }
    }
}

impl<B: BackOff> BackOff for WithMaxRetries<B> {
    fn next_backoff(&mut self) -> Option<Duration> {
        if self.retries >= self.max_retries {
            return None;
        }
        self.retries += 1;
        self.inner.next_backoff()
    }

    fn reset(&mut self) {
        self.retries = 0;
        self.inner.reset();
    }
}

/// Schedule that never gives up: 500ms, 4s, 32s, 4m16s, 34m8s, 4h33m4s, then 5h forever.
///
/// Meant for consumers where skipping a message would break downstream ordering.
pub fn non_stop_exponential() -> ExponentialBackOff {
    ExponentialBackOff::build(8, Duration::from_millis(500))
        .maximum_interval(Duration::from_secs(5 * 60 * 60))
        .provide()
}

/// Single attempt, no retries. This is the default.
pub fn stop() -> BackOffConstructor {
    Arc::new(|| -> Box<dyn BackOff> { Box::new(StopBackOff) })
}

/// Retry forever every `interval`.
pub fn constant(interval: Duration) -> BackOffConstructor {
    Arc::new(move || -> Box<dyn BackOff> { Box::new(ConstantBackOff::new(interval)) })
}

/// Retry up to `max_retries` times, every `interval`.
pub fn max_retries(interval: Duration, max_retries: u32) -> BackOffConstructor {
    Arc::new(move || -> Box<dyn BackOff> {
        Box::new(WithMaxRetries::new(ConstantBackOff::new(interval), max_retries))
    })
}

/// Retry forever following [`non_stop_exponential`].
pub fn non_stop() -> BackOffConstructor {
    Arc::new(|| -> Box<dyn BackOff> { Box::new(non_stop_exponential()) })
}
