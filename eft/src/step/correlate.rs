use std::collections::BTreeMap;

use eft_msg::{Action, CodeKind, Token, TryIntoBytes, Type};
use embedded_time::duration::Milliseconds;
use embedded_time::Instant;
use no_std_net::SocketAddr;

use super::{exec_inner_step, Step, StepOutput};
use crate::event::TransferEvent;
use crate::logging::log;
use crate::net::Addrd;
use crate::platform::{Effect, Effects, Message, PlatformTypes, Snapshot};
use crate::req::Req;
use crate::resp::Resp;
use crate::time::elapsed;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingState {
  Waiting,
  /// The peer rejected the request with a Reset
  Rejected,
  /// The retransmission schedule ran dry
  TimedOut,
}

/// A request we sent and have not resolved yet.
#[derive(Debug, Clone)]
struct PendingRequest<C: crate::time::Clock> {
  created_at: Instant<C>,
  /// The peer sent a bare ACK; the response arrives in its own exchange
  separate_response_expected: bool,
  /// The request registered an observation; the entry keeps correlating
  /// notifications instead of resolving on the first response
  observing: bool,
  state: PendingState,
}

/// Step correlating inbound responses to requests this endpoint sent,
/// by token scoped to the remote.
///
/// Responses that match no pending request are orphans: confirmable orphans
/// are rejected with a Reset, everything else is dropped (RFC 7252 §4.2).
///
/// A pending request resolves exactly once — with the matched response, with
/// [`Error::PeerReset`] when the peer rejected it, with
/// [`Error::TimedOut`](Error::TimedOut) when retransmissions ran dry, or
/// with [`Error::NoResponse`] when nothing arrived within the exchange
/// lifetime. Requests that registered an observation keep correlating
/// notifications until they are cancelled.
#[derive(Debug)]
pub struct Correlate<P: PlatformTypes, S> {
  pending: BTreeMap<(SocketAddr, Token), PendingRequest<P::Clock>>,
  ready: BTreeMap<(SocketAddr, Token), Addrd<Resp>>,
  inner: S,
}

impl<P: PlatformTypes, S: Default> Default for Correlate<P, S> {
  fn default() -> Self {
    Self { pending: BTreeMap::new(),
           ready: BTreeMap::new(),
           inner: S::default() }
  }
}

/// Errors yielded when a pending request fails to resolve with a response
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Error<E> {
  /// The inner step failed.
  ///
  /// This variant's Debug representation is completely
  /// replaced by the inner type E's debug representation
  Inner(E),
  /// The pending request expired without any reaction from the peer
  NoResponse,
  /// The peer rejected the request with a Reset message
  PeerReset,
  /// The request was confirmable and its retransmission schedule ran dry
  TimedOut,
}

impl<E> From<E> for Error<E> {
  fn from(e: E) -> Self {
    Error::Inner(e)
  }
}

impl<E: core::fmt::Debug> core::fmt::Debug for Error<E> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    match self {
      | Self::NoResponse => f.debug_struct("NoResponse").finish(),
      | Self::PeerReset => f.debug_struct("PeerReset").finish(),
      | Self::TimedOut => f.debug_struct("TimedOut").finish(),
      | Self::Inner(e) => e.fmt(f),
    }
  }
}

impl<E: super::Error> super::Error for Error<E> {}

impl<P: PlatformTypes, S> Correlate<P, S> {
  /// Route an inbound response: resolve the pending request it answers, or
  /// dispose of it as an orphan. Yields the response when it should keep
  /// flowing up the pipe.
  fn route(&mut self, resp: Addrd<Resp>, effects: &mut Effects) -> Option<Addrd<Resp>> {
    let key = (resp.addr(), resp.data().msg().token);

    match self.pending.get(&key) {
      | Some(entry) if entry.observing => Some(resp),
      | Some(_) => {
        self.pending.remove(&key);
        Some(resp)
      },
      | None => {
        match resp.data().msg().ty {
          | Type::Con => {
            log!(Correlate,
                 effects,
                 log::Level::Info,
                 "rejecting orphan CON response {:?} from {}",
                 resp.data().msg().token,
                 resp.addr());

            if let Ok(bytes) = resp.data().msg().reset().try_into_bytes() {
              effects.push(Effect::SendDgram(Addrd(bytes, resp.addr())));
            }
          },
          | _ => {
            log!(Correlate,
                 effects,
                 log::Level::Debug,
                 "dropping orphan response {:?} from {}",
                 resp.data().msg().token,
                 resp.addr());
          },
        }

        None
      },
    }
  }

  /// Drop pending requests that expired without ever being polled for.
  fn prune(&mut self, now: Instant<P::Clock>, lifetime_millis: u64, effects: &mut Effects) {
    let lifetime = Milliseconds(2 * lifetime_millis);

    self.pending.retain(|(addr, token), entry| {
                  let keep = entry.observing || elapsed(entry.created_at, now) < lifetime;

                  if !keep {
                    let detail = if entry.separate_response_expected {
                      "the promised separate response never arrived"
                    } else {
                      "it was never resolved"
                    };
                    effects.push(Effect::Log(log::Level::Warn,
                                             format!("Correlate: dropping pending request {:?} to {}; {}",
                                                     token, addr, detail)));
                  }

                  keep
                });
  }
}

impl<P, E, Inner> Step<P> for Correlate<P, Inner>
  where P: PlatformTypes,
        E: super::Error,
        Inner: Step<P, PollReq = Addrd<Req>, PollResp = Addrd<Resp>, Error = E>
{
  type PollReq = Addrd<Req>;
  type PollResp = Addrd<Resp>;
  type Error = Error<E>;
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
                               Error::Inner);
    self.prune(snap.time, snap.config.exchange_lifetime_millis(), effects);

    match req {
      | Some(req) if req.data().msg().code.kind() == CodeKind::Response => {
        // a response surfacing on the server flow still resolves (or
        // orphans) like any other; matched ones are buffered for the
        // client flow to pick up
        match self.route(req.map(|r| Resp::from(Message::from(r))), effects) {
          | Some(resp) => {
            self.ready.insert((resp.addr(), resp.data().msg().token), resp);
            None
          },
          | None => None,
        }
      },
      | other => other.map(Ok),
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
                                Error::Inner);
    self.prune(snap.time, snap.config.exchange_lifetime_millis(), effects);

    let polled = (addr, token);

    if let Some(resp) = resp {
      if resp.data().msg().code.kind() == CodeKind::Response {
        if let Some(routed) = self.route(resp, effects) {
          self.ready
              .insert((routed.addr(), routed.data().msg().token), routed);
        }
      }
    }

    if let Some(resp) = self.ready.remove(&polled) {
      return Some(Ok(resp));
    }

    match self.pending.get(&polled) {
      | Some(entry) if entry.state == PendingState::Rejected => {
        self.pending.remove(&polled);
        Some(Err(nb::Error::Other(Error::PeerReset)))
      },
      | Some(entry) if entry.state == PendingState::TimedOut => {
        self.pending.remove(&polled);
        Some(Err(nb::Error::Other(Error::TimedOut)))
      },
      | Some(entry)
        if !entry.observing
           && elapsed(entry.created_at, snap.time)
              >= Milliseconds(snap.config.exchange_lifetime_millis()) =>
      {
        self.pending.remove(&polled);
        Some(Err(nb::Error::Other(Error::NoResponse)))
      },
      | _ => None,
    }
  }

  fn on_message_sent(&mut self,
                     snap: &Snapshot<P>,
                     effects: &mut Effects,
                     msg: &Addrd<Message>)
                     -> Result<(), Self::Error> {
    self.inner
        .on_message_sent(snap, effects, msg)
        .map_err(Error::Inner)?;

    if msg.data().code.kind() != CodeKind::Request {
      return Ok(());
    }

    let key = (msg.addr(), msg.data().token);
    let observing = msg.data().observe_action() == Some(Action::Register);

    match self.pending.get_mut(&key) {
      | Some(entry) => {
        // re-used token (e.g. an observation being refreshed or cancelled)
        entry.created_at = snap.time;
        entry.separate_response_expected = false;
        entry.observing = observing;
        entry.state = PendingState::Waiting;
      },
      | None => {
        self.pending.insert(key,
                            PendingRequest { created_at: snap.time,
                                             separate_response_expected: false,
                                             observing,
                                             state: PendingState::Waiting });
      },
    }

    Ok(())
  }

  fn on_transfer_event(&mut self,
                       snap: &Snapshot<P>,
                       effects: &mut Effects,
                       event: TransferEvent)
                       -> Result<(), Self::Error> {
    let key = (event.remote(), event.token());

    match event {
      | TransferEvent::EmptyAckReceived { .. } => {
        if let Some(entry) = self.pending.get_mut(&key) {
          entry.separate_response_expected = true;
        }
      },
      | TransferEvent::ResetReceived { .. } => {
        if let Some(entry) = self.pending.get_mut(&key) {
          entry.state = PendingState::Rejected;
          entry.observing = false;
        }
      },
      | TransferEvent::TransmissionTimeout { .. } => {
        if let Some(entry) = self.pending.get_mut(&key) {
          entry.state = PendingState::TimedOut;
          entry.observing = false;
        }
      },
      | _ => (),
    }

    self.inner
        .on_transfer_event(snap, effects, event)
        .map_err(Error::Inner)
  }
}

#[cfg(test)]
mod test {
  use eft_msg::Id;

  use super::*;
  use crate::step::parse::Parse;
  use crate::step::Empty;
  use crate::test::{self, Platform};

  type Correlate = super::Correlate<Platform, Parse<Empty>>;

  fn send_request(step: &mut Correlate, observing: bool) -> Addrd<Message> {
    let mut req = test::msg!(CON GET x.x.x.x:1111);
    req.data_mut().token = Token::opaque(&[0xAA]);
    if observing {
      req.data_mut().set_observe(0);
    }

    let snap = test::snapshot(0, None);
    step.on_message_sent(&snap, &mut Effects::new(), &req).unwrap();
    req
  }

  #[test]
  fn matched_response_resolves_once() {
    let mut step = Correlate::default();
    let req = send_request(&mut step, false);

    let mut rep = test::msg!(ACK {2 . 05} x.x.x.x:1111);
    rep.data_mut().token = req.data().token;
    rep.data_mut().id = req.data().id;

    let snap = test::snapshot(100, Some(test::dgram(rep)));
    let mut effects = Effects::new();
    let out = step.poll_resp(&snap, &mut effects, req.data().token, req.addr());
    assert!(out.unwrap().is_ok());

    // resolved; polling again yields nothing
    let snap = test::snapshot(200, None);
    let out = step.poll_resp(&snap, &mut Effects::new(), req.data().token, req.addr());
    assert!(out.is_none());
  }

  #[test]
  fn orphan_con_response_is_reset() {
    let mut step = Correlate::default();

    let mut rep = test::msg!(CON {2 . 05} x.x.x.x:1111);
    rep.data_mut().token = Token::opaque(&[0xEE]);
    rep.data_mut().id = Id(9);

    let snap = test::snapshot(0, Some(test::dgram(rep.clone())));
    let mut effects = Effects::new();
    let out = step.poll_resp(&snap, &mut effects, Token::opaque(&[1]), rep.addr());
    assert!(out.is_none());

    let reset = rep.data().reset();
    assert!(effects.iter().any(|e| {
                             *e == Effect::SendDgram(Addrd(reset.clone()
                                                                .try_into_bytes()
                                                                .unwrap(),
                                                           rep.addr()))
                           }));
  }

  #[test]
  fn orphan_non_response_is_dropped() {
    let mut step = Correlate::default();

    let mut rep = test::msg!(NON {2 . 05} x.x.x.x:1111);
    rep.data_mut().token = Token::opaque(&[0xEE]);

    let snap = test::snapshot(0, Some(test::dgram(rep.clone())));
    let mut effects = Effects::new();
    assert!(step.poll_resp(&snap, &mut effects, Token::opaque(&[1]), rep.addr())
                .is_none());
    assert!(!effects.iter().any(|e| matches!(e, Effect::SendDgram(_))));
  }

  #[test]
  fn empty_ack_event_flips_separate_response_expected() {
    let mut step = Correlate::default();
    let req = send_request(&mut step, false);
    let key = (req.addr(), req.data().token);

    let snap = test::snapshot(100, None);
    step.on_transfer_event(&snap,
                           &mut Effects::new(),
                           TransferEvent::EmptyAckReceived { remote: req.addr(),
                                                             token: req.data().token,
                                                             id: Id(1) })
        .unwrap();

    assert!(step.pending[&key].separate_response_expected);

    // the separate response resolves the request
    let mut rep = test::msg!(CON {2 . 05} x.x.x.x:1111);
    rep.data_mut().token = req.data().token;
    rep.data_mut().id = Id(99);

    let snap = test::snapshot(3_000, Some(test::dgram(rep)));
    let out = step.poll_resp(&snap, &mut Effects::new(), req.data().token, req.addr());
    assert!(out.unwrap().is_ok());
  }

  #[test]
  fn reset_event_surfaces_peer_reset() {
    let mut step = Correlate::default();
    let req = send_request(&mut step, false);

    let snap = test::snapshot(100, None);
    step.on_transfer_event(&snap,
                           &mut Effects::new(),
                           TransferEvent::ResetReceived { remote: req.addr(),
                                                          token: req.data().token,
                                                          id: Id(1) })
        .unwrap();

    let out = step.poll_resp(&snap, &mut Effects::new(), req.data().token, req.addr());
    assert_eq!(out, Some(Err(nb::Error::Other(Error::PeerReset))));
  }

  #[test]
  fn expiry_surfaces_no_response() {
    let mut step = Correlate::default();
    let req = send_request(&mut step, false);

    let lifetime = test::snapshot(0, None).config.exchange_lifetime_millis();
    let snap = test::snapshot(lifetime, None);

    let out = step.poll_resp(&snap, &mut Effects::new(), req.data().token, req.addr());
    assert_eq!(out, Some(Err(nb::Error::Other(Error::NoResponse))));

    // resolved exactly once
    let out = step.poll_resp(&snap, &mut Effects::new(), req.data().token, req.addr());
    assert!(out.is_none());
  }

  #[test]
  fn observing_entries_survive_responses() {
    let mut step = Correlate::default();
    let req = send_request(&mut step, true);

    for (at, id) in [(100u64, 10u16), (200, 11), (300, 12)] {
      let mut rep = test::msg!(NON {2 . 05} x.x.x.x:1111);
      rep.data_mut().token = req.data().token;
      rep.data_mut().id = Id(id);

      let snap = test::snapshot(at, Some(test::dgram(rep)));
      let out = step.poll_resp(&snap, &mut Effects::new(), req.data().token, req.addr());
      assert!(out.unwrap().is_ok(), "notification {} should correlate", id);
    }
  }
}
