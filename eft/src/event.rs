use eft_msg::{Id, Token};
use no_std_net::SocketAddr;

/// Lifecycle events of a message transfer, published by the reliability
/// layer and routed to every [`Step`](crate::step::Step) via
/// [`Step::on_transfer_event`](crate::step::Step::on_transfer_event).
///
/// Subscribers never hold references back into the reliability layer; they
/// see copies of the identifiers involved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEvent {
  /// A Message ID was bound to an outbound confirmable transfer.
  ///
  /// Fires before any ACK or Reset for that id can be matched.
  MessageIdAssigned {
    #[allow(missing_docs)]
    remote: SocketAddr,
    #[allow(missing_docs)]
    token: Token,
    #[allow(missing_docs)]
    id: Id,
  },
  /// The peer acknowledged a confirmable transfer with a bare ACK,
  /// announcing that the real response will arrive separately.
  EmptyAckReceived {
    #[allow(missing_docs)]
    remote: SocketAddr,
    #[allow(missing_docs)]
    token: Token,
    #[allow(missing_docs)]
    id: Id,
  },
  /// The peer rejected a transfer with a Reset message
  ResetReceived {
    #[allow(missing_docs)]
    remote: SocketAddr,
    #[allow(missing_docs)]
    token: Token,
    #[allow(missing_docs)]
    id: Id,
  },
  /// A confirmable transfer was acknowledged
  TransmissionSucceeded {
    #[allow(missing_docs)]
    remote: SocketAddr,
    #[allow(missing_docs)]
    token: Token,
    #[allow(missing_docs)]
    id: Id,
  },
  /// A confirmable transfer exhausted its retransmission schedule without
  /// being acknowledged or reset
  TransmissionTimeout {
    #[allow(missing_docs)]
    remote: SocketAddr,
    #[allow(missing_docs)]
    token: Token,
    #[allow(missing_docs)]
    id: Id,
  },
}

impl TransferEvent {
  /// The remote endpoint involved in the transfer
  pub fn remote(&self) -> SocketAddr {
    use TransferEvent::*;
    match *self {
      | MessageIdAssigned { remote, .. }
      | EmptyAckReceived { remote, .. }
      | ResetReceived { remote, .. }
      | TransmissionSucceeded { remote, .. }
      | TransmissionTimeout { remote, .. } => remote,
    }
  }

  /// The token of the transfer
  pub fn token(&self) -> Token {
    use TransferEvent::*;
    match *self {
      | MessageIdAssigned { token, .. }
      | EmptyAckReceived { token, .. }
      | ResetReceived { token, .. }
      | TransmissionSucceeded { token, .. }
      | TransmissionTimeout { token, .. } => token,
    }
  }

  /// The message id of the transfer
  pub fn id(&self) -> Id {
    use TransferEvent::*;
    match *self {
      | MessageIdAssigned { id, .. }
      | EmptyAckReceived { id, .. }
      | ResetReceived { id, .. }
      | TransmissionSucceeded { id, .. }
      | TransmissionTimeout { id, .. } => id,
    }
  }
}
