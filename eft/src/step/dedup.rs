use std::collections::BTreeMap;

use eft_msg::{Id, Type};
use embedded_time::duration::Milliseconds;
use embedded_time::Instant;
use no_std_net::SocketAddr;

use super::{exec_inner_step, Step, StepOutput};
use crate::logging::log;
use crate::net::Addrd;
use crate::platform::{Effect, Effects, PlatformTypes, Snapshot};
use crate::req::Req;
use crate::resp::Resp;
use crate::time::elapsed;

/// State tracked for one recently-seen inbound `(remote, message id)` pair.
#[derive(Debug, Clone)]
struct SeenEntry<C: crate::time::Clock> {
  first_seen: Instant<C>,
  /// Serialized bytes of the acknowledgement we answered with, replayed
  /// verbatim when the peer retransmits.
  response: Option<Vec<u8>>,
}

/// Step suppressing duplicate deliveries of inbound CON and NON messages.
///
/// Each inbound confirmable or non-confirmable message is remembered by its
/// `(remote, message id)` key for the exchange lifetime. Duplicate CONs are
/// answered with the byte-identical cached acknowledgement when one was
/// already produced, or a fresh bare ACK otherwise; duplicate NONs are
/// dropped silently. Either way the duplicate never reaches the steps above
/// this one.
#[derive(Debug)]
pub struct Dedup<P: PlatformTypes, S> {
  seen: BTreeMap<(SocketAddr, Id), SeenEntry<P::Clock>>,
  inner: S,
}

impl<P: PlatformTypes, S: Default> Default for Dedup<P, S> {
  fn default() -> Self {
    Self { seen: BTreeMap::new(),
           inner: S::default() }
  }
}

impl<P: PlatformTypes, S> Dedup<P, S> {
  fn prune(&mut self, now: Instant<P::Clock>, lifetime_millis: u64) {
    self.seen
        .retain(|_, entry| elapsed(entry.first_seen, now) < Milliseconds(lifetime_millis));
  }

  /// Admit or suppress the message at `key`.
  ///
  /// Lookup and insert happen in one pass; the atomicity contract holds
  /// because all table access is serialized through the owning step.
  fn admit(&mut self,
           key: (SocketAddr, Id),
           ty: Type,
           now: Instant<P::Clock>,
           effects: &mut Effects)
           -> bool {
    match self.seen.get(&key) {
      | None => {
        self.seen.insert(key,
                         SeenEntry { first_seen: now,
                                     response: None });
        true
      },
      | Some(entry) => {
        match (ty, &entry.response) {
          | (Type::Con, Some(bytes)) => {
            log!(Dedup,
                 effects,
                 log::Level::Debug,
                 "duplicate CON {:?} from {}; replaying cached response",
                 key.1,
                 key.0);
            effects.push(Effect::SendDgram(Addrd(bytes.clone(), key.0)));
          },
          | (Type::Con, None) => {
            log!(Dedup,
                 effects,
                 log::Level::Debug,
                 "duplicate CON {:?} from {}; acking",
                 key.1,
                 key.0);

            let ack = eft_msg::Message::new(Type::Ack,
                                            eft_msg::Code::EMPTY,
                                            key.1,
                                            eft_msg::Token(Default::default()));
            if let Ok(bytes) = eft_msg::TryIntoBytes::try_into_bytes(ack) {
              effects.push(Effect::SendDgram(Addrd(bytes, key.0)));
            }
          },
          | _ => {
            log!(Dedup,
                 effects,
                 log::Level::Debug,
                 "duplicate NON {:?} from {}; dropped",
                 key.1,
                 key.0);
          },
        }

        false
      },
    }
  }
}

macro_rules! dedup {
  ($self:expr, $in:expr, $snap:expr, $effects:expr) => {{
    let msg_in = $in;
    let (ty, key) = {
      let msg = msg_in.data().msg();
      (msg.ty, (msg_in.addr(), msg.id))
    };

    match ty {
      | Type::Con | Type::Non if !$self.admit(key, ty, $snap.time, $effects) => None,
      | _ => Some(Ok(msg_in)),
    }
  }};
}

impl<P, E, Inner> Step<P> for Dedup<P, Inner>
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
    let req = exec_inner_step!(self.inner.poll_req(snap, effects), core::convert::identity);
    self.prune(snap.time, snap.config.exchange_lifetime_millis());

    match req {
      | Some(req) => dedup!(self, req, snap, effects),
      | None => None,
    }
  }

  fn poll_resp(&mut self,
               snap: &Snapshot<P>,
               effects: &mut Effects,
               token: eft_msg::Token,
               addr: SocketAddr)
               -> StepOutput<Self::PollResp, Self::Error> {
    let resp = exec_inner_step!(self.inner.poll_resp(snap, effects, token, addr),
                                core::convert::identity);
    self.prune(snap.time, snap.config.exchange_lifetime_millis());

    match resp {
      | Some(resp) => dedup!(self, resp, snap, effects),
      | None => None,
    }
  }

  fn on_message_sent(&mut self,
                     snap: &Snapshot<P>,
                     effects: &mut Effects,
                     msg: &Addrd<crate::platform::Message>)
                     -> Result<(), Self::Error> {
    self.inner.on_message_sent(snap, effects, msg)?;

    // acknowledgements (bare or piggybacked) are cached for replay,
    // keyed by the id of the request they answer
    if msg.data().ty == Type::Ack {
      if let Some(entry) = self.seen.get_mut(&(msg.addr(), msg.data().id)) {
        if let Ok(bytes) = eft_msg::TryIntoBytes::try_into_bytes(msg.data().clone()) {
          entry.response = Some(bytes);
        }
      }
    }

    Ok(())
  }
}
