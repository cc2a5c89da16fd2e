use embedded_time::clock::Error;
use embedded_time::duration::Milliseconds;
use embedded_time::Instant;

/// A duration, in milliseconds
pub type Millis = Milliseconds<u64>;

/// Supertrait of [`embedded_time::Clock`] pinning the
/// type of "ticks" to u64
pub trait Clock: embedded_time::Clock<T = u64> {}
impl<C: embedded_time::Clock<T = u64>> Clock for C {}

/// Milliseconds elapsed between two instants of the same clock.
///
/// Yields zero when `to` is not later than `from`.
pub fn elapsed<C: Clock>(from: Instant<C>, to: Instant<C>) -> Millis {
  if to <= from {
    return Milliseconds(0);
  }

  Milliseconds::try_from(to - from).unwrap_or(Milliseconds(u64::MAX))
}

/// Data associated with a timestamp
pub struct Stamped<C: Clock, T>(pub T, pub Instant<C>);

impl<C: Clock, T: core::fmt::Debug> core::fmt::Debug for Stamped<C, T> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_tuple("Stamped")
     .field(&self.0)
     .field(&self.1.duration_since_epoch())
     .finish()
  }
}

impl<C: Clock, T: PartialEq> PartialEq for Stamped<C, T> {
  fn eq(&self, other: &Self) -> bool {
    self.0 == other.0 && self.1 == other.1
  }
}

impl<C: Clock, T: Eq> Eq for Stamped<C, T> {}

impl<C: Clock, T: Default> Default for Stamped<C, T> {
  fn default() -> Self {
    Self(T::default(), Instant::new(0))
  }
}

impl<C: Clock, T: Clone> Clone for Stamped<C, T> {
  fn clone(&self) -> Self {
    Self(self.0.clone(), self.1)
  }
}

impl<C: Clock, T: Copy> Copy for Stamped<C, T> {}

impl<C: Clock, T> Stamped<C, T> {
  /// Create a Stamped from a clock's current time
  pub fn new(clock: &C, t: T) -> Result<Self, Error> {
    clock.try_now().map(|now| Self(t, now))
  }

  /// Borrow the data
  pub fn data(&self) -> &T {
    &self.0
  }

  /// The instant the data was stamped at
  pub fn time(&self) -> Instant<C> {
    self.1
  }

  /// Discard the timestamp
  pub fn discard_timestamp(self) -> T {
    self.0
  }

  /// Map the data, keeping the timestamp
  pub fn map<R>(self, f: impl FnOnce(T) -> R) -> Stamped<C, R> {
    Stamped(f(self.0), self.1)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test::ClockMock;

  #[test]
  fn elapsed_is_saturating() {
    let a = ClockMock::instant(100);
    let b = ClockMock::instant(350);

    assert_eq!(elapsed(a, b), Milliseconds(250u64));
    assert_eq!(elapsed(b, a), Milliseconds(0u64));
    assert_eq!(elapsed(a, a), Milliseconds(0u64));
  }
}
