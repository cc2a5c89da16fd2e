use std::collections::BTreeMap;

use eft_msg::{CodeKind, Id, Token, TryIntoBytes, Type};
use embedded_time::duration::Milliseconds;
use embedded_time::Instant;
use no_std_net::SocketAddr;

use super::{exec_inner_step, Step, StepOutput};
use crate::logging::log;
use crate::net::Addrd;
use crate::platform::{Effect, Effects, Message, PlatformTypes, Snapshot};
use crate::req::Req;
use crate::resp::Resp;
use crate::time::elapsed;

/// An inbound confirmable request awaiting acknowledgement.
#[derive(Debug, Clone, Copy)]
struct PendingAck<C: crate::time::Clock> {
  id: Id,
  recvd_at: Instant<C>,
  acked: bool,
}

/// Step acknowledging inbound confirmable traffic.
///
/// Inbound CON requests open an acknowledgement window of half the
/// ACK_TIMEOUT: a response produced inside the window is rewritten into a
/// piggybacked ACK carrying the request's message id; once the window closes
/// a bare empty ACK goes out and the eventual response is sent as a separate
/// CON/NON with its own id.
///
/// Inbound CON responses (separate responses, notifications) are
/// acknowledged immediately.
#[derive(Debug)]
pub struct Ack<P: PlatformTypes, S> {
  pending: BTreeMap<(SocketAddr, Token), PendingAck<P::Clock>>,
  inner: S,
}

impl<P: PlatformTypes, S: Default> Default for Ack<P, S> {
  fn default() -> Self {
    Self { pending: BTreeMap::new(),
           inner: S::default() }
  }
}

impl<P: PlatformTypes, S> Ack<P, S> {
  fn window_millis(snap: &Snapshot<P>) -> u64 {
    snap.config.msg.con.ack_timeout.0 / 2
  }

  /// Emit bare ACKs for requests whose window closed and drop entries the
  /// application never answered.
  fn flush_due(&mut self, snap: &Snapshot<P>, effects: &mut Effects) {
    let window = Self::window_millis(snap);
    let lifetime = snap.config.exchange_lifetime_millis();

    for (&(addr, _), entry) in self.pending.iter_mut() {
      if !entry.acked && elapsed(entry.recvd_at, snap.time) >= Milliseconds(window) {
        log!(Ack,
             effects,
             log::Level::Debug,
             "acking {:?} from {} before the response is ready",
             entry.id,
             addr);

        let ack = Message::new(Type::Ack, eft_msg::Code::EMPTY, entry.id, Token(Default::default()));
        if let Ok(bytes) = ack.try_into_bytes() {
          effects.push(Effect::SendDgram(Addrd(bytes, addr)));
        }

        entry.acked = true;
      }
    }

    let now = snap.time;
    self.pending
        .retain(|_, entry| elapsed(entry.recvd_at, now) < Milliseconds(lifetime));
  }
}

impl<P, E, Inner> Step<P> for Ack<P, Inner>
  where P: PlatformTypes,
        E: super::Error,
        Inner: Step<P, PollReq = Addrd<Req>, PollResp = Addrd<Resp>, Error = E>
{
  type PollReq = Addrd<Req>;
  type PollResp = Addrd<Resp>;
  type Error = E;
  type Inner = Inner;

  fn inner(&self) -> &Inner {
    &self.inner
  }

  fn inner_mut(&mut self) -> &mut Inner {
    &mut self.inner
  }

  fn poll_req(&mut self,
              snap: &Snapshot<P>,
              effects: &mut Effects)
              -> StepOutput<Self::PollReq, Self::Error> {
    let req = exec_inner_step!(run_anyway_when_would_block = true,
                               self.inner.poll_req(snap, effects),
                               core::convert::identity);
    self.flush_due(snap, effects);

    match req {
      | Some(req)
        if req.data().msg().ty == Type::Con
           && req.data().msg().code.kind() == CodeKind::Request =>
      {
        self.pending.insert((req.addr(), req.data().msg().token),
                            PendingAck { id: req.data().msg().id,
                                         recvd_at: snap.time,
                                         acked: false });
        Some(Ok(req))
      },
      | Some(req) => Some(Ok(req)),
      | None => None,
    }
  }

  fn poll_resp(&mut self,
               snap: &Snapshot<P>,
               effects: &mut Effects,
               token: Token,
               addr: SocketAddr)
               -> StepOutput<Self::PollResp, Self::Error> {
    let resp = exec_inner_step!(run_anyway_when_would_block = true,
                                self.inner.poll_resp(snap, effects, token, addr),
                                core::convert::identity);
    self.flush_due(snap, effects);

    match resp {
      | Some(resp)
        if resp.data().msg().ty == Type::Con
           && resp.data().msg().code.kind() == CodeKind::Response =>
      {
        // separate responses & notifications are acked right away
        if let Ok(bytes) = resp.data().msg().ack().try_into_bytes() {
          effects.push(Effect::SendDgram(Addrd(bytes, resp.addr())));
        }
        Some(Ok(resp))
      },
      | other => other.map(Ok),
    }
  }

  fn before_message_sent(&mut self,
                         snap: &Snapshot<P>,
                         effects: &mut Effects,
                         msg: &mut Addrd<Message>)
                         -> Result<(), Self::Error> {
    self.inner.before_message_sent(snap, effects, msg)?;

    if msg.data().code.kind() != CodeKind::Response {
      return Ok(());
    }

    let key = (msg.addr(), msg.data().token);

    if let Some(entry) = self.pending.remove(&key) {
      if !entry.acked {
        // inside the window; ride the acknowledgement
        msg.data_mut().ty = Type::Ack;
        msg.data_mut().id = entry.id;
      } else if msg.data().ty == Type::Ack {
        // the bare ACK already went out; this must be a separate response
        msg.data_mut().ty = Type::Con;
        msg.data_mut().id = Id(0);
      }
    }

    Ok(())
  }
}
