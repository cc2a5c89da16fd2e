use eft_msg::{Code, Id, Message, MessageParseError, Token, TryFromBytes, TryIntoBytes, Type};

use super::{exec_inner_step, Step, StepOutput};
use crate::logging::log;
use crate::net::Addrd;
use crate::platform::{Effect, Effects, PlatformTypes, Snapshot};
use crate::req::Req;
use crate::resp::Resp;

/// The message parsing CoAP lifecycle step
///
/// Parameterized by the step that came before it,
/// most likely this is the [`Empty`](crate::step::Empty) step.
///
/// Datagrams that fail to decode are logged and swallowed; when the raw
/// header identifies a confirmable message, a Reset is sent back so the peer
/// stops retransmitting something we will never understand.
#[derive(Default, Debug, Clone, Copy)]
pub struct Parse<S>(S);

impl<S> Parse<S> {
  /// Create a new Parse step
  pub fn new(s: S) -> Self {
    Self(s)
  }

  fn handle_invalid(dgram: &Addrd<Vec<u8>>, err: MessageParseError, effects: &mut Effects) {
    log!(Parse,
         effects,
         log::Level::Warn,
         "dropping undecodable {}b datagram from {}: {:?}",
         dgram.data().len(),
         dgram.addr(),
         err);

    let bytes = dgram.data();
    let looks_like_con =
      bytes.len() >= 4 && bytes[0] >> 6 == 1 && (bytes[0] >> 4) & 0b11 == u8::from(Type::Con);

    if looks_like_con {
      let id = Id(u16::from_be_bytes([bytes[2], bytes[3]]));
      let reset = Message::new(Type::Reset, Code::EMPTY, id, Token(Default::default()));

      if let Ok(bs) = reset.try_into_bytes() {
        effects.push(Effect::SendDgram(Addrd(bs, dgram.addr())));
      }
    }
  }

  fn parse(snap_dgram: Option<&Addrd<Vec<u8>>>, effects: &mut Effects) -> Option<Addrd<Message>> {
    let dgram = snap_dgram?;

    match Message::try_from_bytes(dgram.data()) {
      | Ok(msg) => Some(Addrd(msg, dgram.addr())),
      | Err(e) => {
        Self::handle_invalid(dgram, e, effects);
        None
      },
    }
  }
}

impl<Inner: Step<P>, P: PlatformTypes> Step<P> for Parse<Inner> {
  type PollReq = Addrd<Req>;
  type PollResp = Addrd<Resp>;
  type Error = Inner::Error;
  type Inner = Inner;

  fn inner(&self) -> &Self::Inner {
    &self.0
  }

  fn inner_mut(&mut self) -> &mut Self::Inner {
    &mut self.0
  }

  fn poll_req(&mut self,
              snap: &Snapshot<P>,
              effects: &mut Effects)
              -> StepOutput<Self::PollReq, Self::Error> {
    let _ = exec_inner_step!(self.0.poll_req(snap, effects), core::convert::identity);
    Self::parse(snap.recvd_dgram.as_ref(), effects).map(|addrd| Ok(addrd.map(Req::from)))
  }

  fn poll_resp(&mut self,
               snap: &Snapshot<P>,
               effects: &mut Effects,
               token: eft_msg::Token,
               addr: no_std_net::SocketAddr)
               -> StepOutput<Self::PollResp, Self::Error> {
    let _ = exec_inner_step!(self.0.poll_resp(snap, effects, token, addr),
                             core::convert::identity);
    Self::parse(snap.recvd_dgram.as_ref(), effects).map(|addrd| Ok(addrd.map(Resp::from)))
  }
}
