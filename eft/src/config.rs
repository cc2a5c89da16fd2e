use embedded_time::duration::Milliseconds;

use crate::retry::{Attempts, Strategy};
use crate::time::Millis;

/// Bytes / Second
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BytesPerSecond(pub u16);

/// Configuration options related to outbound CONfirmable messages
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Con {
  /// `ACK_TIMEOUT`; lower bound of the initial retransmission interval.
  ///
  /// Defaults to 2000 milliseconds.
  ///
  /// ```
  /// use embedded_time::duration::Milliseconds;
  /// use eft::config::Con;
  ///
  /// assert_eq!(Con::default().ack_timeout, Milliseconds(2000u64));
  /// ```
  pub ack_timeout: Millis,

  /// `ACK_RANDOM_FACTOR`; the initial retransmission interval is sampled
  /// uniformly from `[ack_timeout, ack_timeout * ack_random_factor)`.
  ///
  /// Defaults to 1.5.
  pub ack_random_factor: f32,

  /// `MAX_RETRANSMIT`; number of retransmissions of an unacknowledged CON
  /// before it is abandoned.
  ///
  /// Defaults to 4.
  ///
  /// ```
  /// use eft::config::Con;
  /// use eft::retry::Attempts;
  ///
  /// assert_eq!(Con::default().max_retransmit, Attempts(4));
  /// ```
  pub max_retransmit: Attempts,
}

impl Con {
  /// The [`Strategy`] used for unacknowledged CON transmissions
  pub fn retry_strategy(&self) -> Strategy {
    Strategy::Exponential { init_min: self.ack_timeout,
                            init_max: Milliseconds((self.ack_timeout.0 as f32
                                                    * self.ack_random_factor)
                                                   as u64) }
  }
}

impl Default for Con {
  fn default() -> Self {
    Con { ack_timeout: Milliseconds(2000),
          ack_random_factor: 1.5,
          max_retransmit: Attempts(4) }
  }
}

/// Configuration options related to parsing & handling messages
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Msg {
  /// Seed used to generate message [`Token`](eft_msg::Token)s, customizable
  /// to allow for your application to generate tokens less guessably.
  ///
  /// The default value is 0, although it is best practice to set this to
  /// something else (random integer, machine identifier).
  pub token_seed: u16,

  /// `PROBING_RATE`; the transmission rate we should do our best not to
  /// exceed when sending to an endpoint that does not respond.
  ///
  /// Defaults to `BytesPerSecond(1)`.
  pub probing_rate: BytesPerSecond,

  /// See [`Con`]
  pub con: Con,

  /// `DEFAULT_LEISURE`; the maximum amount of time we should delay a
  /// response to a multicast request.
  ///
  /// Defaults to 5000 milliseconds.
  pub default_leisure: Millis,

  /// `MAX_AGE` default; how long a response may be cached when it carries no
  /// Max-Age option.
  ///
  /// Defaults to 60 seconds.
  pub max_age_default: Millis,
}

impl Default for Msg {
  fn default() -> Self {
    Msg { token_seed: 0,
          probing_rate: BytesPerSecond(1),
          con: Con::default(),
          default_leisure: Milliseconds(5000),
          max_age_default: Milliseconds(60_000) }
  }
}

/// Configuration options related to the Observe (RFC 7641) machinery
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Observe {
  /// How long an observation may go without a confirmable notification
  /// before a CON heartbeat is emitted to verify the observer is still
  /// interested.
  ///
  /// Defaults to 24 hours.
  pub heartbeat_interval: Millis,
}

impl Default for Observe {
  fn default() -> Self {
    Observe { heartbeat_interval: Milliseconds(24 * 60 * 60 * 1000) }
  }
}

/// Runtime config
///
/// ```
/// use eft::config::Config;
///
/// // the RFC 7252 §4.8.2 derivation
/// assert_eq!(Config::default().exchange_lifetime_millis(), 247_000);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
  /// See [`Msg`]
  pub msg: Msg,

  /// `NSTART`; maximum number of outstanding CONfirmable messages to a
  /// given remote endpoint.
  ///
  /// Default value is `1` (no concurrency).
  ///
  /// ```
  /// use eft::config::Config;
  ///
  /// assert_eq!(Config::default().nstart, 1);
  /// ```
  pub nstart: u8,

  /// See [`Observe`]
  pub observe: Observe,
}

impl Default for Config {
  fn default() -> Self {
    Config { msg: Msg::default(),
             nstart: 1,
             observe: Observe::default() }
  }
}

impl Config {
  /// `MAX_TRANSMIT_SPAN`; the time from the first transmission of a CON to
  /// its last retransmission.
  pub fn max_transmit_span_millis(&self) -> u64 {
    let Con { ack_timeout: Milliseconds(ack_timeout),
              ack_random_factor,
              max_retransmit: Attempts(max_retransmit), } = self.msg.con;

    (ack_timeout as f32 * (2u64.pow(max_retransmit as u32) - 1) as f32 * ack_random_factor) as u64
  }

  // TODO: adjust this on the fly based on actual timings?
  pub(crate) fn max_latency_millis(&self) -> u64 {
    100_000
  }

  /// `EXCHANGE_LIFETIME`; how long Message ID state must be retained after
  /// a CON: `MAX_TRANSMIT_SPAN + (2 × MAX_LATENCY) + PROCESSING_DELAY`.
  pub fn exchange_lifetime_millis(&self) -> u64 {
    self.max_transmit_span_millis() + (2 * self.max_latency_millis()) + self.msg.con.ack_timeout.0
  }
}
