use core::convert::Infallible;

use eft_msg::{Id, Token};
use no_std_net::SocketAddr;

use crate::event::TransferEvent;
use crate::net::Addrd;
use crate::platform::{Effects, Message, PlatformTypes, Snapshot};

/// ACKing of inbound confirmable traffic & the piggyback window
pub mod ack;

/// request/response correlation by token (the client half)
pub mod correlate;

/// suppression of duplicate inbound messages
pub mod dedup;

/// the Observe (RFC 7641) registry
pub mod observe;

/// datagram -> message parsing
pub mod parse;

/// Message ID provisioning
pub mod provision_ids;

/// Token provisioning
pub mod provision_tokens;

/// retransmission of outbound confirmable messages
pub mod retry;

/// option & payload admissibility checks
pub mod validate;

pub use observe::{Resource, ResourceStatus};

/// ```text
///             None -> "You may run, the step may have done nothing or just performed some effects"
///         Some(Ok) -> "You may run, the step yielded a T that could be transformed or discarded"
///        Some(Err) -> "You should not run, something unrecoverable happened"
/// Some(WouldBlock) -> "You may run, but we should all wait until the resource would no longer block"
/// ```
pub type StepOutput<T, E> = Option<nb::Result<T, E>>;

/// Execute an inner step, short-circuiting on errors and (optionally)
/// on `WouldBlock`.
#[macro_export]
macro_rules! exec_inner_step {
  ($result:expr, $err:expr) => {
    exec_inner_step!(run_anyway_when_would_block = false, $result, $err)
  };
  (run_anyway_when_would_block = $run_anyway_when_would_block:expr, $result:expr, $err:expr) => {
    match $result {
      | None => None,
      | Some(Ok(t)) => Some(t),
      | Some(Err(nb::Error::WouldBlock)) if $run_anyway_when_would_block => None,
      | Some(Err(nb::Error::WouldBlock)) => return Some(Err(nb::Error::WouldBlock)),
      | Some(Err(nb::Error::Other(e))) => return Some(Err(nb::Error::Other($err(e)))),
    }
  };
}

pub use exec_inner_step;

/// An error that can be yielded by a [`Step`]
pub trait Error: core::fmt::Debug {}

impl Error for Infallible {}
impl Error for () {}

/// A discrete piece of the CoAP runtime.
///
/// Steps decorate one another; each is parameterized by the step that came
/// before it ([`Step::Inner`]), and the outermost step sees messages last on
/// the way in and first on the way out.
///
/// Steps communicate side effects they would like performed (sends, logs,
/// transfer events) by pushing [`Effect`](crate::platform::Effect)s; the
/// poll flows themselves stay deterministic.
pub trait Step<P: PlatformTypes> {
  /// Type yielded by polling for a request
  type PollReq;

  /// Type yielded by polling for a response
  type PollResp;

  /// Error type; must be able to absorb the inner step's error
  type Error: Error + From<<Self::Inner as Step<P>>::Error>;

  /// The step that came before this one
  type Inner: Step<P>;

  /// Borrow the inner step
  fn inner(&self) -> &Self::Inner;

  /// Mutably borrow the inner step
  fn inner_mut(&mut self) -> &mut Self::Inner;

  /// Poll for an inbound request
  fn poll_req(&mut self,
              snap: &Snapshot<P>,
              effects: &mut Effects)
              -> StepOutput<Self::PollReq, Self::Error>;

  /// Poll for an inbound response to the request identified by
  /// `token` + `addr`
  fn poll_resp(&mut self,
               snap: &Snapshot<P>,
               effects: &mut Effects,
               token: Token,
               addr: SocketAddr)
               -> StepOutput<Self::PollResp, Self::Error>;

  /// Invoked before an outbound message is serialized & sent;
  /// steps may modify the message.
  fn before_message_sent(&mut self,
                         snap: &Snapshot<P>,
                         effects: &mut Effects,
                         msg: &mut Addrd<Message>)
                         -> Result<(), Self::Error> {
    self.inner_mut()
        .before_message_sent(snap, effects, msg)
        .map_err(Self::Error::from)
  }

  /// Invoked after an outbound message was written to the socket
  fn on_message_sent(&mut self,
                     snap: &Snapshot<P>,
                     effects: &mut Effects,
                     msg: &Addrd<Message>)
                     -> Result<(), Self::Error> {
    self.inner_mut()
        .on_message_sent(snap, effects, msg)
        .map_err(Self::Error::from)
  }

  /// A transfer lifecycle event was published.
  ///
  /// Steps that handle an event should still delegate to their inner step so
  /// every subscriber sees it.
  fn on_transfer_event(&mut self,
                       snap: &Snapshot<P>,
                       effects: &mut Effects,
                       event: TransferEvent)
                       -> Result<(), Self::Error> {
    self.inner_mut()
        .on_transfer_event(snap, effects, event)
        .map_err(Self::Error::from)
  }

  /// The resource at `path` has a new state; observers should be notified.
  fn notify(&mut self,
            snap: &Snapshot<P>,
            effects: &mut Effects,
            path: &str)
            -> Result<(), Self::Error> {
    self.inner_mut()
        .notify(snap, effects, path)
        .map_err(Self::Error::from)
  }

  /// Install an observable resource.
  ///
  /// Yields the resource back when no step in the chain claimed it.
  fn add_observable(&mut self,
                    path: &str,
                    resource: Box<dyn observe::Resource>)
                    -> Option<Box<dyn observe::Resource>> {
    self.inner_mut().add_observable(path, resource)
  }

  /// Remove an observable resource, cancelling its observations.
  fn remove_observable(&mut self,
                       snap: &Snapshot<P>,
                       effects: &mut Effects,
                       path: &str)
                       -> Result<(), Self::Error> {
    self.inner_mut()
        .remove_observable(snap, effects, path)
        .map_err(Self::Error::from)
  }

  /// The endpoint is shutting down; notify observers and refuse further
  /// registrations.
  fn shutdown(&mut self, snap: &Snapshot<P>, effects: &mut Effects) -> Result<(), Self::Error> {
    self.inner_mut()
        .shutdown(snap, effects)
        .map_err(Self::Error::from)
  }

  /// Abandon an outbound confirmable transfer; no further retransmissions
  /// will occur.
  fn cancel(&mut self, addr: SocketAddr, id: Id) {
    self.inner_mut().cancel(addr, id)
  }

  /// Number of outbound confirmable transfers to `addr` that have not yet
  /// been resolved.
  fn in_flight(&self, addr: SocketAddr) -> usize {
    self.inner().in_flight(addr)
  }
}

/// The terminal step; does nothing, yields nothing.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Empty;

impl<P: PlatformTypes> Step<P> for Empty {
  type PollReq = ();
  type PollResp = ();
  type Error = Infallible;
  type Inner = Empty;

  fn inner(&self) -> &Empty {
    self
  }

  fn inner_mut(&mut self) -> &mut Empty {
    self
  }

  fn poll_req(&mut self, _: &Snapshot<P>, _: &mut Effects) -> StepOutput<(), Infallible> {
    None
  }

  fn poll_resp(&mut self,
               _: &Snapshot<P>,
               _: &mut Effects,
               _: Token,
               _: SocketAddr)
               -> StepOutput<(), Infallible> {
    None
  }

  fn before_message_sent(&mut self,
                         _: &Snapshot<P>,
                         _: &mut Effects,
                         _: &mut Addrd<Message>)
                         -> Result<(), Infallible> {
    Ok(())
  }

  fn on_message_sent(&mut self,
                     _: &Snapshot<P>,
                     _: &mut Effects,
                     _: &Addrd<Message>)
                     -> Result<(), Infallible> {
    Ok(())
  }

  fn on_transfer_event(&mut self,
                       _: &Snapshot<P>,
                       _: &mut Effects,
                       _: TransferEvent)
                       -> Result<(), Infallible> {
    Ok(())
  }

  fn notify(&mut self, _: &Snapshot<P>, _: &mut Effects, _: &str) -> Result<(), Infallible> {
    Ok(())
  }

  fn add_observable(&mut self,
                    _: &str,
                    resource: Box<dyn observe::Resource>)
                    -> Option<Box<dyn observe::Resource>> {
    Some(resource)
  }

  fn remove_observable(&mut self,
                       _: &Snapshot<P>,
                       _: &mut Effects,
                       _: &str)
                       -> Result<(), Infallible> {
    Ok(())
  }

  fn shutdown(&mut self, _: &Snapshot<P>, _: &mut Effects) -> Result<(), Infallible> {
    Ok(())
  }

  fn cancel(&mut self, _: SocketAddr, _: Id) {}

  fn in_flight(&self, _: SocketAddr) -> usize {
    0
  }
}
