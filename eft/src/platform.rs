use core::fmt::Debug;
use core::marker::PhantomData;

use eft_msg::to_bytes::MessageToBytesError;
use embedded_time::Instant;

use crate::config::Config;
use crate::event::TransferEvent;
use crate::net::{Addrd, Socket};
use crate::time::Clock;

/// [`eft_msg::Message`], the concrete message type used by the runtime
pub type Message = eft_msg::Message;

/// The sequence of effects accumulated by a pipeline run
pub type Effects = Vec<Effect>;

/// `eft` platform configuration: what clock keeps time and what socket moves
/// datagrams.
pub trait PlatformTypes: Sized + 'static + Debug {
  /// What should we use to keep track of time?
  type Clock: Clock + Debug;

  /// What should we use for networking?
  type Socket: Socket + Debug;
}

/// A snapshot of the system's state at a given moment
///
/// ```text
/// let Snapshot {time, recvd_dgram, ..} = snap;
/// ```
#[allow(missing_debug_implementations)]
#[non_exhaustive]
pub struct Snapshot<P: PlatformTypes> {
  /// The current system time at the start of the step pipe
  pub time: Instant<P::Clock>,

  /// A UDP datagram received from somewhere, if one was waiting
  pub recvd_dgram: Option<Addrd<Vec<u8>>>,

  /// Runtime config, includes many useful timings
  pub config: Config,
}

impl<P: PlatformTypes> Snapshot<P> {
  /// Create a snapshot
  pub fn new(time: Instant<P::Clock>, recvd_dgram: Option<Addrd<Vec<u8>>>, config: Config) -> Self {
    Self { time,
           recvd_dgram,
           config }
  }
}

impl<P: PlatformTypes> Clone for Snapshot<P> {
  fn clone(&self) -> Self {
    Self { time: self.time,
           recvd_dgram: self.recvd_dgram.clone(),
           config: self.config }
  }
}

/// Used by [`Step`](crate::step::Step)s to deterministically communicate to
/// the [`Endpoint`](crate::core::Endpoint) side-effects that they would like
/// to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
  /// Send a message through the full outbound pipeline
  /// (id/token provisioning, reliability tracking, ...).
  Send(Addrd<Message>),
  /// Send raw bytes straight to the socket, bypassing the pipeline.
  ///
  /// Used for retransmissions, bare ACKs, Resets and duplicate-response
  /// replays whose bytes are already final.
  SendDgram(Addrd<Vec<u8>>),
  /// Log at a level
  Log(log::Level, String),
  /// Publish a transfer lifecycle event to all steps
  Event(TransferEvent),
}

/// Default error type for endpoint operations
#[derive(Debug)]
pub enum Error<Step, Socket> {
  /// Serializing a message to bytes failed
  MessageToBytes(MessageToBytesError),
  /// The step pipeline failed
  Step(Step),
  /// Some socket operation failed
  Socket(Socket),
  /// Reading the system clock failed
  Clock(embedded_time::clock::Error),
}

/// Configures `eft` to use a given clock and socket, with heap-allocated
/// collections for everything else.
///
/// ```
/// use eft::platform::Alloc;
/// use eft::std::Clock;
///
/// type Platform = Alloc<Clock, std::net::UdpSocket>;
/// ```
#[derive(Copy)]
pub struct Alloc<Clk, Sock>(PhantomData<(Clk, Sock)>)
  where Clk: Clock + 'static,
        Sock: Socket + 'static;

impl<Clk: Clock + 'static, Sock: Socket + 'static> Debug for Alloc<Clk, Sock> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    write!(f, "Alloc::<_, _>(_)")
  }
}

impl<Clk: Clock + 'static, Sock: Socket + 'static> Clone for Alloc<Clk, Sock> {
  fn clone(&self) -> Self {
    Self(Default::default())
  }
}

impl<Clk, Sock> PlatformTypes for Alloc<Clk, Sock>
  where Clk: Clock + Debug + 'static,
        Sock: Socket + Debug + 'static
{
  type Clock = Clk;
  type Socket = Sock;
}

/// Configures `eft` to use `UdpSocket` for networking and
/// [`crate::std::Clock`] for timing
pub type Std = Alloc<crate::std::Clock, ::std::net::UdpSocket>;
