use std::collections::BTreeMap;

use eft_msg::Id;
use embedded_time::duration::Milliseconds;
use embedded_time::Instant;
use no_std_net::SocketAddr;
use rand::{Rng, SeedableRng};

use super::{exec_inner_step, Step, StepOutput};
use crate::net::Addrd;
use crate::platform::{Effects, Message, PlatformTypes, Snapshot};
use crate::req::Req;
use crate::resp::Resp;
use crate::time::{elapsed, Stamped};

/// Message ID state for the conversation with one remote endpoint.
#[derive(Debug, Clone)]
struct PerRemote<C: crate::time::Clock> {
  /// Next candidate id; initialized to a random value and incremented
  /// modulo 2^16.
  next: u16,
  /// Ids seen recently in either direction, alive for the exchange
  /// lifetime.
  live: Vec<Stamped<C, Id>>,
}

/// Step responsible for replacing all message ids of zero (`Id(0)`, assumed
/// to be meaningless) with a new id that is guaranteed to be unique to the
/// conversation with the message's origin/destination address.
///
/// Each remote gets its own counter, initialized to a random value and
/// incremented modulo 2^16; candidates still referenced by a live exchange
/// are skipped. Inbound ids are recorded into the same space so that we
/// never reuse a value the peer could still match against a dangling
/// exchange.
#[derive(Debug)]
pub struct ProvisionIds<P: PlatformTypes, S> {
  seen: BTreeMap<SocketAddr, PerRemote<P::Clock>>,
  inner: S,
}

impl<P: PlatformTypes, S: Default> Default for ProvisionIds<P, S> {
  fn default() -> Self {
    Self { seen: BTreeMap::new(),
           inner: S::default() }
  }
}

impl<P: PlatformTypes, S> ProvisionIds<P, S> {
  fn prune(per: &mut PerRemote<P::Clock>, now: Instant<P::Clock>, lifetime_millis: u64) {
    per.live
       .retain(|stamped| elapsed(stamped.time(), now) < Milliseconds(lifetime_millis));
  }

  fn per_remote(&mut self,
                now: Instant<P::Clock>,
                addr: SocketAddr)
                -> &mut PerRemote<P::Clock> {
    self.seen.entry(addr).or_insert_with(|| {
                           let seed =
                             Milliseconds::try_from(now.duration_since_epoch()).map(|Milliseconds(ms)| ms)
                                                                               .unwrap_or(0);
                           let mut rand = rand_chacha::ChaCha8Rng::seed_from_u64(seed);

                           PerRemote { next: rand.gen(),
                                       live: Vec::new() }
                         })
  }

  /// Generate a Message ID not currently alive in the conversation with
  /// this address.
  fn next(&mut self, snap: &Snapshot<P>, addr: SocketAddr) -> Id {
    let lifetime = snap.config.exchange_lifetime_millis();
    let per = self.per_remote(snap.time, addr);
    Self::prune(per, snap.time, lifetime);

    loop {
      let candidate = per.next;
      per.next = per.next.wrapping_add(1);

      if candidate == 0 {
        continue;
      }

      if per.live
            .iter()
            .all(|stamped| *stamped.data() != Id(candidate))
      {
        per.live.push(Stamped(Id(candidate), snap.time));
        break Id(candidate);
      }
    }
  }

  /// Mark an Id + address pair as alive right now.
  fn seen(&mut self, snap: &Snapshot<P>, addr: SocketAddr, id: Id) {
    let lifetime = snap.config.exchange_lifetime_millis();
    let per = self.per_remote(snap.time, addr);
    Self::prune(per, snap.time, lifetime);

    per.live.push(Stamped(id, snap.time));
  }
}

macro_rules! common {
  ($self:expr, $snap:expr, $req_or_resp:expr) => {{
    let r = $req_or_resp;
    let addr = r.addr();
    let id = r.data().msg().id;

    if id != Id(0) {
      $self.seen($snap, addr, id);
    }

    Some(Ok(r))
  }};
}

impl<P, E, Inner> Step<P> for ProvisionIds<P, Inner>
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

    match req {
      | Some(req) => common!(self, snap, req),
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

    match resp {
      | Some(resp) => common!(self, snap, resp),
      | None => None,
    }
  }

  fn before_message_sent(&mut self,
                         snap: &Snapshot<P>,
                         effects: &mut Effects,
                         msg: &mut Addrd<Message>)
                         -> Result<(), Self::Error> {
    self.inner.before_message_sent(snap, effects, msg)?;

    if msg.data().id == Id(0) {
      let id = self.next(snap, msg.addr());
      msg.data_mut().id = id;
    } else {
      self.seen(snap, msg.addr(), msg.data().id);
    }

    Ok(())
  }
}
