use core::ops::RangeInclusive;

use embedded_time::duration::Milliseconds;
use embedded_time::Instant;
use rand::{Rng, SeedableRng};

use crate::time::Clock;

/// A non-blocking timer that allows a fixed-delay or exponential-backoff
/// retry, that lives alongside some operation to retry.
///
/// It does not _contain_ the work to be done (e.g. `Box<fn()>`); the caller
/// asks the timer what to do whenever it has a chance to act.
///
/// For [`Strategy::Exponential`], the initial interval is sampled once at
/// construction from the strategy's range, and every subsequent interval is
/// double the previous one.
#[derive(Debug, Clone, Copy)]
pub struct RetryTimer<C: Clock> {
  start: Instant<C>,
  init: Milliseconds<u64>,
  strategy: Strategy,
  attempts: Attempts,
  max_attempts: Attempts,
}

/// A number of attempts
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Attempts(pub u16);

/// Result of [`RetryTimer::what_should_i_do`].
///
/// This tells you if a retry should be attempted or not.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum YouShould {
  /// Attempts have been exhausted and the final interval has fully elapsed;
  /// the work that is being retried should be considered poisoned.
  Cry,
  /// A retry should be performed
  Retry,
}

impl<C: Clock> RetryTimer<C> {
  /// Create a new retrier
  pub fn new(start: Instant<C>, strategy: Strategy, max_attempts: Attempts) -> Self {
    Self { start,
           strategy,
           init: if strategy.has_jitter() {
             let seed = Milliseconds::try_from(start.duration_since_epoch())
                          .map(|Milliseconds(ms)| ms)
                          .unwrap_or(0);
             let mut rand = rand_chacha::ChaCha8Rng::seed_from_u64(seed);
             let range = strategy.range();

             Milliseconds(rand.gen_range(*range.start()..*range.end()))
           } else {
             Milliseconds(*strategy.range().start())
           },
           max_attempts,
           attempts: Attempts(1) }
  }

  /// When the thing we keep trying fails, invoke this to tell the retrytimer
  /// "it failed again! what do I do??"
  ///
  /// Returns `nb::Error::WouldBlock` when we have not yet waited the
  /// appropriate amount of time to retry (or, once attempts are exhausted,
  /// to give up).
  pub fn what_should_i_do(&mut self,
                          now: Instant<C>)
                          -> nb::Result<YouShould, core::convert::Infallible> {
    let time_passed = Milliseconds::try_from(now - self.start).unwrap_or(Milliseconds(0));

    if !self.is_ready(time_passed, self.attempts.0) {
      return Err(nb::Error::WouldBlock);
    }

    if self.attempts >= self.max_attempts {
      Ok(YouShould::Cry)
    } else {
      self.attempts.0 += 1;
      Ok(YouShould::Retry)
    }
  }

  /// Check if the strategy says an appropriate time has passed
  pub fn is_ready(&self, Milliseconds(time_passed): Milliseconds<u64>, attempts: u16) -> bool {
    if attempts == 0 {
      return true;
    }

    match self.strategy {
      | Strategy::Delay { .. } => time_passed >= (self.init.0 * attempts as u64),
      | Strategy::Exponential { .. } => {
        time_passed >= Strategy::total_delay_exp(self.init, attempts)
      },
    }
  }
}

/// Strategy to employ when retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Strategy {
  /// Sample a random initial delay between `init_min` (inclusive) and
  /// `init_max` (exclusive), and double the delay after each failed attempt.
  Exponential {
    /// Minimum (inclusive) delay before the first retry
    init_min: Milliseconds<u64>,
    /// Maximum (exclusive) delay before the first retry
    init_max: Milliseconds<u64>,
  },
  /// Sample a random delay between `min` and `max`, and wait until this
  /// delay has passed between attempts.
  Delay {
    /// Minimum (inclusive) delay for attempts
    min: Milliseconds<u64>,
    /// Maximum (exclusive) delay for attempts
    max: Milliseconds<u64>,
  },
}

impl Strategy {
  /// Are min & max delays the same? if so, we should skip the random number
  /// generation.
  pub fn has_jitter(&self) -> bool {
    let rng = self.range();
    rng.start() != rng.end()
  }

  /// Get the min & max durations as a range
  pub fn range(&self) -> RangeInclusive<u64> {
    match self {
      | &Self::Delay { min: Milliseconds(min),
                       max: Milliseconds(max), } => (min..=max),

      | &Self::Exponential { init_min: Milliseconds(min),
                             init_max: Milliseconds(max), } => (min..=max),
    }
  }

  /// Get the amount of time this strategy will take if all attempts fail
  pub fn max_time(&self, max_attempts: Attempts) -> Milliseconds<u64> {
    Milliseconds(match self {
                   | Self::Exponential { init_max, .. } => {
                     Self::total_delay_exp(*init_max, max_attempts.0)
                   },
                   | Self::Delay { max: Milliseconds(max),
                                   .. } => max * max_attempts.0 as u64,
                 })
  }

  /// Given the initial delay and number of attempts that have been
  /// performed, yields the total time that must have passed before the next
  /// retry should be attempted.
  const fn total_delay_exp(Milliseconds(init): Milliseconds<u64>, attempt: u16) -> u64 {
    // | attempt | total delay      |
    // | 1       | init             |
    // | 2       | init * 2         |
    // | 3       | init * 4         |
    // | ...     | ...              |
    // | n       | init * 2^(n-1)   |
    init * 2u64.pow((attempt - 1) as u32)
  }
}
