//! Waits between verification rounds.

use std::error::Error;
use std::fmt;
use std::time::Duration;

pub const DEFAULT_MAX_ROUNDS: usize = 20;
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_micros(1);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// A delay was shorter than the one before it.
    Decreasing { index: usize, previous: Duration, got: Duration },
    /// The delays do not sum to a representable duration.
    UnboundedTotal,
    ZeroRounds,
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decreasing { index, previous, got } => write!(
                f,
                "retry delay #{index} ({got:?}) is shorter than the previous one ({previous:?})"
            ),
            Self::UnboundedTotal => write!(f, "retry delays overflow the total wait budget"),
            Self::ZeroRounds => write!(f, "a retry schedule needs at least one round"),
        }
    }
}

impl Error for ScheduleError {}

/// Non-decreasing delays with a finite sum.
///
/// A schedule with `n` delays allows `n + 1` verification rounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySchedule {
    delays: Vec<Duration>,
    total: Duration,
}

impl RetrySchedule {
    pub fn new(delays: impl IntoIterator<Item = Duration>) -> Result<Self, ScheduleError> {
        let delays: Vec<Duration> = delays.into_iter().collect();
        let mut total = Duration::ZERO;
        for (index, pair) in delays.windows(2).enumerate() {
            if pair[1] < pair[0] {
                return Err(ScheduleError::Decreasing {
                    index: index + 1,
                    previous: pair[0],
                    got: pair[1],
                });
            }
        }
        for delay in &delays {
            total = total
                .checked_add(*delay)
                .ok_or(ScheduleError::UnboundedTotal)?;
        }
        Ok(Self { delays, total })
    }

    /// A single round, no waiting.
    pub fn once() -> Self {
        Self {
            delays: Vec::new(),
            total: Duration::ZERO,
        }
    }

    /// Doubling backoff from `initial`, each wait capped at `max_delay`,
    /// allowing `max_rounds` rounds in total.
    pub fn exponential(
        initial: Duration,
        max_delay: Duration,
        max_rounds: usize,
    ) -> Result<Self, ScheduleError> {
        if max_rounds == 0 {
            return Err(ScheduleError::ZeroRounds);
        }
        let mut delay = initial.min(max_delay);
        let delays = (1..max_rounds).map(move |_| {
            let current = delay;
            delay = delay.saturating_mul(2).min(max_delay);
            current
        });
        Self::new(delays)
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    pub fn max_rounds(&self) -> usize {
        self.delays.len() + 1
    }

    /// Sum of every wait; the longest a failing verification can sleep.
    pub fn total(&self) -> Duration {
        self.total
    }
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self::exponential(DEFAULT_INITIAL_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MAX_ROUNDS)
            .unwrap_or_else(|_| Self::once())
    }
}

/// Blocks the calling control flow between rounds.
pub trait Sleep {
    fn sleep(&mut self, duration: Duration);
}

/// [`Sleep`] backed by [`std::thread::sleep`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleep;

impl Sleep for ThreadSleep {
    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
