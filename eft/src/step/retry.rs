use std::collections::BTreeMap;

use eft_msg::{CodeKind, Id, Token, TryIntoBytes, Type};
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
use crate::retry::{Attempts, RetryTimer, YouShould};
use crate::time::elapsed;

/// Where a confirmable transfer is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransmissionState {
  /// Sent, not yet resolved; retransmissions are scheduled
  Waiting,
  /// The peer acknowledged the transfer
  Acked,
  /// The peer reset the transfer, or the application cancelled it
  Rejected,
  /// The retransmission schedule ran dry without a resolution
  Expired,
}

impl TransmissionState {
  /// Waiting is the only non-terminal state
  pub fn is_terminal(&self) -> bool {
    *self != TransmissionState::Waiting
  }
}

/// One outbound confirmable transfer awaiting resolution.
///
/// For any `(remote, message id)` pair at most one record exists in a
/// non-terminal state; terminal records are held for the deduplication
/// window before the pair may be reused.
#[derive(Debug, Clone)]
struct TransmissionRecord<C: crate::time::Clock> {
  msg: Message,
  token: Token,
  timer: RetryTimer<C>,
  state: TransmissionState,
  created_at: Instant<C>,
}

/// Step that manages the reliability of outbound confirmable messages.
///
/// Every CON written to the socket gets a [`TransmissionRecord`] keyed by
/// `(remote, message id)`. Records schedule retransmissions with the
/// configured backoff until a matching ACK or Reset arrives or the schedule
/// runs dry, and publish [`TransferEvent`]s at each lifecycle edge.
///
/// Non-confirmable messages are one-shot: no record, no retransmission.
#[derive(Debug)]
pub struct Retry<P: PlatformTypes, S> {
  records: BTreeMap<(SocketAddr, Id), TransmissionRecord<P::Clock>>,
  inner: S,
}

impl<P: PlatformTypes, S: Default> Default for Retry<P, S> {
  fn default() -> Self {
    Self { records: BTreeMap::new(),
           inner: S::default() }
  }
}

impl<P: PlatformTypes, S> Retry<P, S> {
  /// Retransmit every record whose interval elapsed and expire those whose
  /// schedule ran dry; drop terminal records older than the deduplication
  /// window.
  fn attempt_all(&mut self, snap: &Snapshot<P>, effects: &mut Effects) {
    let lifetime = snap.config.exchange_lifetime_millis();

    for (&(addr, id), record) in self.records.iter_mut() {
      if record.state != TransmissionState::Waiting {
        continue;
      }

      match record.timer.what_should_i_do(snap.time) {
        | Ok(YouShould::Retry) => {
          log!(Retry,
               effects,
               log::Level::Debug,
               "retransmitting {:?} to {}",
               id,
               addr);

          if let Ok(bytes) = record.msg.clone().try_into_bytes() {
            effects.push(Effect::SendDgram(Addrd(bytes, addr)));
          }
        },
        | Ok(YouShould::Cry) => {
          log!(Retry,
               effects,
               log::Level::Warn,
               "transmission {:?} to {} timed out",
               id,
               addr);

          record.state = TransmissionState::Expired;
          effects.push(Effect::Event(TransferEvent::TransmissionTimeout { remote: addr,
                                                                          token: record.token,
                                                                          id }));
        },
        | Err(nb::Error::WouldBlock) => (),
      }
    }

    let now = snap.time;
    self.records.retain(|_, record| {
                  !record.state.is_terminal()
                  || elapsed(record.created_at, now) < Milliseconds(lifetime)
                });
  }

  /// Resolve the record matching an inbound ACK or Reset.
  fn observe_inbound_ack_or_rst(&mut self,
                                addrd: Addrd<&Message>,
                                effects: &mut Effects) {
    let (addr, msg) = (addrd.addr(), addrd.data());
    let key = (addr, msg.id);

    match msg.ty {
      | Type::Ack => {
        if let Some(record) = self.records.get_mut(&key) {
          if record.state != TransmissionState::Waiting {
            return;
          }

          if msg.code.kind() != CodeKind::Empty && msg.token != record.token {
            log!(Retry,
                 effects,
                 log::Level::Warn,
                 "piggybacked ACK for {:?} from {} carries foreign token {:?} (expected {:?})",
                 msg.id,
                 addr,
                 msg.token,
                 record.token);
          }

          record.state = TransmissionState::Acked;
          effects.push(Effect::Event(TransferEvent::TransmissionSucceeded { remote: addr,
                                                                            token: record.token,
                                                                            id: msg.id }));

          if msg.code.kind() == CodeKind::Empty {
            effects.push(Effect::Event(TransferEvent::EmptyAckReceived { remote: addr,
                                                                         token: record.token,
                                                                         id: msg.id }));
          }
        }
      },
      | Type::Reset => {
        let token = match self.records.get_mut(&key) {
          | Some(record) if record.state == TransmissionState::Waiting => {
            record.state = TransmissionState::Rejected;
            record.token
          },
          | Some(record) => record.token,
          | None => Token(Default::default()),
        };

        effects.push(Effect::Event(TransferEvent::ResetReceived { remote: addr,
                                                                  token,
                                                                  id: msg.id }));
      },
      | _ => (),
    }
  }
}

impl<P, E, Inner> Step<P> for Retry<P, Inner>
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
    self.attempt_all(snap, effects);

    match req {
      | Some(req) => {
        self.observe_inbound_ack_or_rst(req.as_ref().map(|r| r.msg()), effects);

        match (req.data().msg().ty, req.data().msg().code.kind()) {
          // bare ACKs and Resets are consumed here; their entire meaning
          // is the record resolution above
          | (Type::Ack, CodeKind::Empty) | (Type::Reset, _) => None,
          | _ => Some(Ok(req)),
        }
      },
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
    self.attempt_all(snap, effects);

    match resp {
      | Some(resp) => {
        self.observe_inbound_ack_or_rst(resp.as_ref().map(|r| r.msg()), effects);

        match (resp.data().msg().ty, resp.data().msg().code.kind()) {
          | (Type::Ack, CodeKind::Empty) | (Type::Reset, _) => None,
          | _ => Some(Ok(resp)),
        }
      },
      | None => None,
    }
  }

  fn on_message_sent(&mut self,
                     snap: &Snapshot<P>,
                     effects: &mut Effects,
                     msg: &Addrd<Message>)
                     -> Result<(), Self::Error> {
    self.inner.on_message_sent(snap, effects, msg)?;

    if msg.data().ty != Type::Con {
      return Ok(());
    }

    let key = (msg.addr(), msg.data().id);

    if let Some(existing) = self.records.get(&key) {
      if !existing.state.is_terminal() {
        log!(Retry,
             effects,
             log::Level::Warn,
             "replacing unresolved transmission record for {:?} to {}",
             key.1,
             key.0);
      }
    }

    let max_attempts = Attempts(snap.config.msg.con.max_retransmit.0 + 1);
    self.records.insert(key,
                        TransmissionRecord { msg: msg.data().clone(),
                                             token: msg.data().token,
                                             timer:
                                               RetryTimer::new(snap.time,
                                                               snap.config
                                                                   .msg
                                                                   .con
                                                                   .retry_strategy(),
                                                               max_attempts),
                                             state: TransmissionState::Waiting,
                                             created_at: snap.time });

    effects.push(Effect::Event(TransferEvent::MessageIdAssigned { remote: msg.addr(),
                                                                  token: msg.data().token,
                                                                  id: msg.data().id }));

    Ok(())
  }

  fn cancel(&mut self, addr: SocketAddr, id: Id) {
    if let Some(record) = self.records.get_mut(&(addr, id)) {
      if record.state == TransmissionState::Waiting {
        record.state = TransmissionState::Rejected;
      }
    }

    self.inner.cancel(addr, id);
  }

  fn in_flight(&self, addr: SocketAddr) -> usize {
    self.records
        .iter()
        .filter(|((rec_addr, _), record)| {
          *rec_addr == addr && record.state == TransmissionState::Waiting
        })
        .count()
  }
}
