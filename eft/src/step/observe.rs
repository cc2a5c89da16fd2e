use std::collections::BTreeMap;

use eft_msg::{Action, Code, CodeKind, ContentFormat, Id, Message, Payload, Token, Type};
use embedded_time::Instant;
use no_std_net::SocketAddr;

use super::{exec_inner_step, Step, StepOutput};
use crate::event::TransferEvent;
use crate::logging::log;
use crate::net::Addrd;
use crate::platform::{Effect, Effects, PlatformTypes, Snapshot};
use crate::req::{Method, Req};
use crate::resp::Resp;
use crate::time::{elapsed, Millis};

/// The capability set an observable resource exposes to the registry.
///
/// The registry owns its resources; resources never hold a reference back.
/// A resource that cannot produce a representation in a format simply
/// returns `None` from [`Resource::serialize`], which removes any
/// observation bound to that format with a 4.00-class notification.
pub trait Resource: core::fmt::Debug {
  /// The resource's current representation in the given format, or `None`
  /// when the format is unsupported.
  fn serialize(&self, format: ContentFormat) -> Option<Vec<u8>>;

  /// Opaque tag identifying the current representation in the given format
  fn etag(&self, format: ContentFormat) -> Vec<u8>;

  /// How long the current representation may be considered fresh
  fn max_age(&self) -> Millis;

  /// May this resource be observed at all?
  fn is_observable(&self) -> bool {
    true
  }

  /// Message type policy for update notifications to a given observer.
  ///
  /// The default sends non-confirmable notifications; heartbeats are always
  /// confirmable regardless of this policy.
  fn notification_type(&self, remote: SocketAddr, token: Token) -> Type {
    let _ = (remote, token);
    Type::Non
  }
}

/// One atomically-sampled representation of a resource: payload bytes, etag
/// and freshness always belong to the same state.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceStatus {
  /// The serialized representation
  pub bytes: Vec<u8>,
  /// Tag of the representation
  pub etag: Vec<u8>,
  /// Freshness lifetime of the representation
  pub max_age: Millis,
  /// The format `bytes` is in
  pub format: ContentFormat,
}

fn sample(res: &dyn Resource, format: ContentFormat) -> Option<ResourceStatus> {
  res.serialize(format).map(|bytes| ResourceStatus { bytes,
                                                     etag: res.etag(format),
                                                     max_age: res.max_age(),
                                                     format })
}

/// Is `v2` a fresher Observe option value than `v1`?
///
/// 24-bit serial arithmetic from RFC 7641 §3.4 (the accompanying
/// 128-second wall-clock window is the receiver's concern).
pub fn fresher(v1: u32, v2: u32) -> bool {
  (v1 < v2 && v2 - v1 < (1 << 23)) || (v1 > v2 && v1 - v2 > (1 << 23))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum NotifyKind {
  Update,
  Heartbeat,
}

/// A registered observer of a resource.
#[derive(Debug, Clone)]
struct Observation<C: crate::time::Clock> {
  path: String,
  format: ContentFormat,
  /// Representations the observer told us it has stored; a notification
  /// whose etag is among these is sent as a bodyless 2.03 Valid.
  known_etags: Vec<Vec<u8>>,
  /// Next Observe option value; strictly increasing under [`fresher`]
  /// until deregistration.
  serial: u32,
  /// Message id of the most recent unacknowledged notification; a Reset
  /// matching it cancels the observation.
  last_id: Option<Id>,
  /// Start of the current heartbeat interval
  heartbeat_basis: Instant<C>,
}

/// Server-side Observe (RFC 7641) registry.
///
/// Owns the observable resources and the table of active observations,
/// keyed by `(remote, token)`.
///
/// * Admission: an inbound GET with Observe=0 aimed at an observable
///   resource registers the sender; the initial response and every later
///   notification get the Observe option stamped with the observation's
///   serial on their way out.
/// * Deregistration: GET with Observe=1, a Reset matching an outstanding
///   notification's id, a transmission timeout on a confirmable
///   notification, resource removal, shutdown, or a heartbeat that can no
///   longer be served.
/// * Updates: [`Step::notify`] queues one notification per observer of the
///   path; the queue is keyed by observer so a burst of updates coalesces
///   and every observer sees the latest state at most once per burst.
/// * Heartbeat: when an observation goes a configured interval without a
///   confirmable notification, a CON notification is emitted to verify the
///   observer still exists.
#[derive(Debug)]
pub struct Observe<P: PlatformTypes, S> {
  resources: BTreeMap<String, Box<dyn Resource>>,
  observations: BTreeMap<(SocketAddr, Token), Observation<P::Clock>>,
  queue: BTreeMap<(SocketAddr, Token), NotifyKind>,
  disposed: bool,
  inner: S,
}

impl<P: PlatformTypes, S: Default> Default for Observe<P, S> {
  fn default() -> Self {
    Self { resources: BTreeMap::new(),
           observations: BTreeMap::new(),
           queue: BTreeMap::new(),
           disposed: false,
           inner: S::default() }
  }
}

impl<P: PlatformTypes, S> Observe<P, S> {
  fn gone(path: &str, token: Token) -> Message {
    let mut msg = Message::new(Type::Non, Code::NOT_FOUND, Id(0), token);
    msg.payload = Payload(format!("{} is no longer available", path).into_bytes());
    msg.set_content_format(ContentFormat::Text);
    msg
  }

  fn handle_request(&mut self,
                    req: Addrd<Req>,
                    snap: &Snapshot<P>,
                    effects: &mut Effects)
                    -> Addrd<Req> {
    if req.data().method() != Some(Method::Get) {
      return req;
    }

    let key = (req.addr(), req.data().msg().token);

    match req.data().observe_action() {
      | Some(Action::Register) if self.disposed => {
        log!(Observe,
             effects,
             log::Level::Info,
             "refusing registration from {}; registry is shut down",
             req.addr());
      },
      | Some(Action::Register) => {
        let path = req.data().path();

        match self.resources.get(&path) {
          | Some(res) if res.is_observable() => {
            log!(Observe,
                 effects,
                 log::Level::Info,
                 "observer registered (remote: {}, token: {:?}, path: {})",
                 req.addr(),
                 key.1,
                 path);

            self.observations.insert(key,
                                     Observation { path,
                                                   format: req.data()
                                                              .accept()
                                                              .unwrap_or(ContentFormat::Text),
                                                   known_etags: req.data().etags(),
                                                   serial: 0,
                                                   last_id: None,
                                                   heartbeat_basis: snap.time });
          },
          | _ => {
            log!(Observe,
                 effects,
                 log::Level::Debug,
                 "GET with Observe=0 for non-observable {:?}; serving without registration",
                 req.data().path());
          },
        }
      },
      | Some(Action::Deregister) => {
        if self.observations.remove(&key).is_some() {
          self.queue.remove(&key);
          log!(Observe,
               effects,
               log::Level::Info,
               "observer deregistered (remote: {}, token: {:?})",
               req.addr(),
               key.1);
        }
      },
      | _ => (),
    }

    req
  }

  /// Queue heartbeats that came due, then build and emit every queued
  /// notification from the resources' current state.
  fn drain(&mut self, snap: &Snapshot<P>, effects: &mut Effects) {
    let interval = snap.config.observe.heartbeat_interval;

    for (key, obs) in self.observations.iter() {
      if elapsed(obs.heartbeat_basis, snap.time) >= interval {
        self.queue.entry(*key).or_insert(NotifyKind::Heartbeat);
      }
    }

    if self.queue.is_empty() {
      return;
    }

    let queue = core::mem::take(&mut self.queue);
    // one state sample per (path, format) per pass; observers of the same
    // representation see identical bytes
    let mut sampled: BTreeMap<(String, u16), Option<ResourceStatus>> = BTreeMap::new();

    for ((addr, token), kind) in queue {
      let obs = match self.observations.get_mut(&(addr, token)) {
        | Some(obs) => obs,
        | None => continue,
      };

      let res = match self.resources.get(&obs.path) {
        | Some(res) => res,
        | None => {
          log!(Observe,
               effects,
               log::Level::Warn,
               "resource {} vanished; dropping observation (remote: {}, token: {:?})",
               obs.path,
               addr,
               token);
          effects.push(Effect::Send(Addrd(Self::gone(&obs.path, token), addr)));
          self.observations.remove(&(addr, token));
          continue;
        },
      };

      let format = obs.format;
      let status = sampled.entry((obs.path.clone(), u16::from(format)))
                          .or_insert_with(|| sample(res.as_ref(), format))
                          .clone();

      match status {
        | None => {
          log!(Observe,
               effects,
               log::Level::Warn,
               "format {:?} not serializable for {}; removing observation (remote: {}, token: {:?})",
               obs.format,
               obs.path,
               addr,
               token);

          let ty = res.notification_type(addr, token);
          let mut msg = Message::new(ty, Code::BAD_REQUEST, Id(0), token);
          msg.payload = Payload(format!("format {} is no longer supported",
                                        u16::from(obs.format)).into_bytes());
          msg.set_content_format(ContentFormat::Text);

          effects.push(Effect::Send(Addrd(msg, addr)));
          self.observations.remove(&(addr, token));
        },
        | Some(status) => {
          let ty = match kind {
            | NotifyKind::Heartbeat => Type::Con,
            | NotifyKind::Update => res.notification_type(addr, token),
          };

          let code = if obs.known_etags.contains(&status.etag) {
            Code::VALID
          } else {
            Code::CONTENT
          };

          let mut msg = Message::new(ty, code, Id(0), token);
          msg.set_etag(&status.etag);
          msg.set_max_age((status.max_age.0 / 1000) as u32);

          if code == Code::CONTENT {
            msg.set_content_format(status.format);
            msg.payload = Payload(status.bytes);
          }

          if ty == Type::Con {
            obs.heartbeat_basis = snap.time;
          }

          effects.push(Effect::Send(Addrd(msg, addr)));
        },
      }
    }
  }
}

impl<P, E, Inner> Step<P> for Observe<P, Inner>
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
    self.drain(snap, effects);

    req.map(|req| Ok(self.handle_request(req, snap, effects)))
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
    self.drain(snap, effects);

    resp.map(Ok)
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

    match self.observations.get_mut(&key) {
      | Some(obs) if msg.data().code.class == 2 => {
        // every response to an active observer is a notification; the
        // serial keeps the receiver's freshness ordering intact
        let serial = obs.serial;
        obs.serial = (obs.serial + 1) & 0x00FF_FFFF;
        msg.data_mut().set_observe(serial);
      },
      | Some(_) => {
        log!(Observe,
             effects,
             log::Level::Info,
             "error response cancels observation (remote: {}, token: {:?})",
             key.0,
             key.1);
        self.observations.remove(&key);
        self.queue.remove(&key);
      },
      | None => (),
    }

    Ok(())
  }

  fn on_message_sent(&mut self,
                     snap: &Snapshot<P>,
                     effects: &mut Effects,
                     msg: &Addrd<Message>)
                     -> Result<(), Self::Error> {
    self.inner.on_message_sent(snap, effects, msg)?;

    if msg.data().code.kind() == CodeKind::Response {
      if let Some(obs) = self.observations.get_mut(&(msg.addr(), msg.data().token)) {
        obs.last_id = Some(msg.data().id);
      }
    }

    Ok(())
  }

  fn on_transfer_event(&mut self,
                       snap: &Snapshot<P>,
                       effects: &mut Effects,
                       event: TransferEvent)
                       -> Result<(), Self::Error> {
    match event {
      | TransferEvent::TransmissionSucceeded { remote, token, id } => {
        if let Some(obs) = self.observations.get_mut(&(remote, token)) {
          if obs.last_id == Some(id) {
            obs.heartbeat_basis = snap.time;
          }
        }
      },
      | TransferEvent::EmptyAckReceived { remote, token, id } => {
        if let Some(obs) = self.observations.get_mut(&(remote, token)) {
          if obs.last_id == Some(id) {
            // acknowledged; a later Reset reusing this id is stale
            obs.last_id = None;
          }
        }
      },
      | TransferEvent::ResetReceived { remote, token, id } => {
        let key = if !token.is_empty() {
          Some((remote, token))
        } else {
          self.observations
              .iter()
              .find(|((addr, _), obs)| *addr == remote && obs.last_id == Some(id))
              .map(|(key, _)| *key)
        };

        if let Some(key) = key {
          match self.observations.get(&key).map(|obs| obs.last_id) {
            | Some(last_id) if last_id == Some(id) => {
              log!(Observe,
                   effects,
                   log::Level::Info,
                   "observation cancelled by Reset (remote: {}, token: {:?})",
                   key.0,
                   key.1);
              self.observations.remove(&key);
              self.queue.remove(&key);
            },
            | Some(last_id) => {
              log!(Observe,
                   effects,
                   log::Level::Warn,
                   "Reset for {:?} does not match outstanding notification {:?}; ignoring",
                   id,
                   last_id);
            },
            | None => (),
          }
        }
      },
      | TransferEvent::TransmissionTimeout { remote, token, .. } => {
        if self.observations.remove(&(remote, token)).is_some() {
          self.queue.remove(&(remote, token));
          log!(Observe,
               effects,
               log::Level::Warn,
               "notification timed out; observation removed (remote: {}, token: {:?})",
               remote,
               token);
        }
      },
      | TransferEvent::MessageIdAssigned { .. } => (),
    }

    self.inner.on_transfer_event(snap, effects, event)
  }

  fn notify(&mut self,
            snap: &Snapshot<P>,
            effects: &mut Effects,
            path: &str)
            -> Result<(), Self::Error> {
    self.inner.notify(snap, effects, path)?;

    if self.disposed {
      return Ok(());
    }

    for (key, obs) in self.observations.iter() {
      if obs.path == path {
        self.queue.insert(*key, NotifyKind::Update);
      }
    }

    Ok(())
  }

  fn add_observable(&mut self,
                    path: &str,
                    resource: Box<dyn Resource>)
                    -> Option<Box<dyn Resource>> {
    self.resources.insert(path.to_string(), resource);
    None
  }

  fn remove_observable(&mut self,
                       snap: &Snapshot<P>,
                       effects: &mut Effects,
                       path: &str)
                       -> Result<(), Self::Error> {
    self.inner.remove_observable(snap, effects, path)?;

    if self.resources.remove(path).is_none() {
      return Ok(());
    }

    let cancelled: Vec<(SocketAddr, Token)> = self.observations
                                                  .iter()
                                                  .filter(|(_, obs)| obs.path == path)
                                                  .map(|(key, _)| *key)
                                                  .collect();

    for key in cancelled {
      effects.push(Effect::Send(Addrd(Self::gone(path, key.1), key.0)));
      self.observations.remove(&key);
      self.queue.remove(&key);
    }

    Ok(())
  }

  fn shutdown(&mut self, snap: &Snapshot<P>, effects: &mut Effects) -> Result<(), Self::Error> {
    self.inner.shutdown(snap, effects)?;

    self.disposed = true;

    for ((addr, token), obs) in core::mem::take(&mut self.observations) {
      log!(Observe,
           effects,
           log::Level::Warn,
           "shutdown: notifying observer (remote: {}, token: {:?})",
           addr,
           token);
      effects.push(Effect::Send(Addrd(Self::gone(&obs.path, token), addr)));
    }

    self.queue.clear();

    Ok(())
  }
}

#[cfg(test)]
mod test {
  use std::cell::RefCell;
  use std::rc::Rc;

  use embedded_time::duration::Milliseconds;

  use super::*;
  use crate::step::parse::Parse;
  use crate::step::Empty;
  use crate::test::{self, Platform};

  type Observe = super::Observe<Platform, Parse<Empty>>;

  #[derive(Debug, Clone)]
  struct TestResource {
    state: Rc<RefCell<(Vec<u8>, u8)>>,
    confirmable: bool,
  }

  impl TestResource {
    fn new(body: &str, etag: u8) -> (Self, Rc<RefCell<(Vec<u8>, u8)>>) {
      let state = Rc::new(RefCell::new((body.as_bytes().to_vec(), etag)));
      (Self { state: state.clone(),
              confirmable: false },
       state)
    }

    fn confirmable(mut self) -> Self {
      self.confirmable = true;
      self
    }
  }

  impl Resource for TestResource {
    fn serialize(&self, format: ContentFormat) -> Option<Vec<u8>> {
      match format {
        | ContentFormat::Text => Some(self.state.borrow().0.clone()),
        | _ => None,
      }
    }

    fn etag(&self, _: ContentFormat) -> Vec<u8> {
      vec![self.state.borrow().1]
    }

    fn max_age(&self) -> Millis {
      Milliseconds(60_000)
    }

    fn notification_type(&self, _: SocketAddr, _: Token) -> Type {
      if self.confirmable {
        Type::Con
      } else {
        Type::Non
      }
    }
  }

  fn register(step: &mut Observe, at: u64) -> Addrd<Message> {
    let mut req = test::msg!(CON GET x.x.x.x:1111);
    req.data_mut().set_path("sensors/temp");
    req.data_mut().set_observe(0);
    req.data_mut().token = Token::opaque(&[0xBB]);
    req.data_mut().id = Id(0x10);

    let snap = test::snapshot(at, Some(test::dgram(req.clone())));
    let out = step.poll_req(&snap, &mut Effects::new());
    assert!(out.unwrap().is_ok());
    req
  }

  /// run queued Send effects through the outbound hooks,
  /// like the endpoint would
  fn pump(step: &mut Observe, at: u64, effects: Effects) -> Vec<Addrd<Message>> {
    let snap = test::snapshot(at, None);

    effects.into_iter()
           .filter_map(|e| match e {
             | Effect::Send(mut msg) => {
               step.before_message_sent(&snap, &mut Effects::new(), &mut msg)
                   .unwrap();
               let id = Id(msg.data().id.0 + 1);
               msg.data_mut().id = id;
               step.on_message_sent(&snap, &mut Effects::new(), &msg).unwrap();
               Some(msg)
             },
             | _ => None,
           })
           .collect()
  }

  #[test]
  fn registration_stamps_initial_response() {
    let mut step = Observe::default();
    let (res, _) = TestResource::new("22C", 1);
    assert!(step.add_observable("sensors/temp", Box::new(res)).is_none());

    let req = register(&mut step, 0);

    let mut rep = test::msg!(ACK {2 . 05} x.x.x.x:1111);
    rep.data_mut().token = req.data().token;
    rep.data_mut().id = req.data().id;

    let snap = test::snapshot(0, None);
    step.before_message_sent(&snap, &mut Effects::new(), &mut rep)
        .unwrap();

    assert_eq!(rep.data().observe(), Some(0));
  }

  #[test]
  fn notifications_have_increasing_serials() {
    let mut step = Observe::default();
    let (res, state) = TestResource::new("22C", 1);
    step.add_observable("sensors/temp", Box::new(res));
    let req = register(&mut step, 0);

    // initial response consumes serial 0
    let mut rep = test::msg!(ACK {2 . 05} x.x.x.x:1111);
    rep.data_mut().token = req.data().token;
    step.before_message_sent(&test::snapshot(0, None), &mut Effects::new(), &mut rep)
        .unwrap();

    let mut serials = vec![rep.data().observe().unwrap()];

    for (n, at) in [(1u8, 1_000u64), (2, 2_000), (3, 3_000)] {
      *state.borrow_mut() = (format!("2{}C", n).into_bytes(), n + 1);

      let snap = test::snapshot(at, None);
      step.notify(&snap, &mut Effects::new(), "sensors/temp").unwrap();

      let mut effects = Effects::new();
      step.poll_req(&snap, &mut effects);

      let sent = pump(&mut step, at, effects);
      assert_eq!(sent.len(), 1);
      assert_eq!(sent[0].data().code, Code::CONTENT);
      serials.push(sent[0].data().observe().unwrap());
    }

    assert_eq!(serials, vec![0, 1, 2, 3]);
    for pair in serials.windows(2) {
      assert!(fresher(pair[0], pair[1]));
    }
  }

  #[test]
  fn serials_wrap_at_24_bits() {
    let mut step = Observe::default();
    let (res, _) = TestResource::new("22C", 1);
    step.add_observable("sensors/temp", Box::new(res));
    let req = register(&mut step, 0);

    step.observations
        .get_mut(&(req.addr(), req.data().token))
        .unwrap()
        .serial = 0x00FF_FFFF;

    let snap = test::snapshot(1_000, None);
    step.notify(&snap, &mut Effects::new(), "sensors/temp").unwrap();
    let mut effects = Effects::new();
    step.poll_req(&snap, &mut effects);
    let a = pump(&mut step, 1_000, effects)[0].data().observe().unwrap();

    let snap = test::snapshot(2_000, None);
    step.notify(&snap, &mut Effects::new(), "sensors/temp").unwrap();
    let mut effects = Effects::new();
    step.poll_req(&snap, &mut effects);
    let b = pump(&mut step, 2_000, effects)[0].data().observe().unwrap();

    assert_eq!((a, b), (0x00FF_FFFF, 0));
    assert!(fresher(a, b));
  }

  #[test]
  fn known_etag_downgrades_to_valid() {
    let mut step = Observe::default();
    let (res, _) = TestResource::new("22C", 7);
    step.add_observable("sensors/temp", Box::new(res));

    let mut req = test::msg!(CON GET x.x.x.x:1111);
    req.data_mut().set_path("sensors/temp");
    req.data_mut().set_observe(0);
    req.data_mut().token = Token::opaque(&[0xBB]);
    req.data_mut().add(eft_msg::known::ETAG, eft_msg::OptValue(vec![7]));

    let snap = test::snapshot(0, Some(test::dgram(req)));
    assert!(step.poll_req(&snap, &mut Effects::new()).is_some());

    let snap = test::snapshot(1_000, None);
    step.notify(&snap, &mut Effects::new(), "sensors/temp").unwrap();
    let mut effects = Effects::new();
    step.poll_req(&snap, &mut effects);

    let sent = pump(&mut step, 1_000, effects);
    assert_eq!(sent[0].data().code, Code::VALID);
    assert!(sent[0].data().payload.0.is_empty());
    assert_eq!(sent[0].data().etags(), vec![vec![7]]);
  }

  #[test]
  fn deregister_stops_notifications() {
    let mut step = Observe::default();
    let (res, _) = TestResource::new("22C", 1);
    step.add_observable("sensors/temp", Box::new(res));
    let req = register(&mut step, 0);

    let mut dereg = test::msg!(CON GET x.x.x.x:1111);
    dereg.data_mut().set_path("sensors/temp");
    dereg.data_mut().set_observe(1);
    dereg.data_mut().token = req.data().token;
    dereg.data_mut().id = Id(0x11);

    let snap = test::snapshot(1_000, Some(test::dgram(dereg)));
    assert!(step.poll_req(&snap, &mut Effects::new()).is_some());

    let snap = test::snapshot(2_000, None);
    step.notify(&snap, &mut Effects::new(), "sensors/temp").unwrap();
    let mut effects = Effects::new();
    step.poll_req(&snap, &mut effects);

    assert!(pump(&mut step, 2_000, effects).is_empty());
  }

  #[test]
  fn reset_matching_last_id_cancels() {
    let mut step = Observe::default();
    let (res, _) = TestResource::new("22C", 1);
    step.add_observable("sensors/temp", Box::new(res));
    let req = register(&mut step, 0);

    // a notification goes out with id 42
    let mut notification = test::msg!(CON {2 . 05} x.x.x.x:1111);
    notification.data_mut().token = req.data().token;
    notification.data_mut().id = Id(42);
    let snap = test::snapshot(500, None);
    step.on_message_sent(&snap, &mut Effects::new(), &notification)
        .unwrap();

    step.on_transfer_event(&snap,
                           &mut Effects::new(),
                           TransferEvent::ResetReceived { remote: req.addr(),
                                                          token: req.data().token,
                                                          id: Id(42) })
        .unwrap();

    assert!(step.observations.is_empty());

    // no heartbeat may fire for a cancelled observation
    let late = test::snapshot(2 * 24 * 60 * 60 * 1000, None);
    let mut effects = Effects::new();
    step.poll_req(&late, &mut effects);
    assert!(!effects.iter().any(|e| matches!(e, Effect::Send(_))));
  }

  #[test]
  fn reset_with_stale_id_is_tolerated() {
    let mut step = Observe::default();
    let (res, _) = TestResource::new("22C", 1);
    step.add_observable("sensors/temp", Box::new(res));
    let req = register(&mut step, 0);

    let mut notification = test::msg!(CON {2 . 05} x.x.x.x:1111);
    notification.data_mut().token = req.data().token;
    notification.data_mut().id = Id(42);
    let snap = test::snapshot(500, None);
    step.on_message_sent(&snap, &mut Effects::new(), &notification)
        .unwrap();

    step.on_transfer_event(&snap,
                           &mut Effects::new(),
                           TransferEvent::ResetReceived { remote: req.addr(),
                                                          token: req.data().token,
                                                          id: Id(41) })
        .unwrap();

    assert_eq!(step.observations.len(), 1);
  }

  #[test]
  fn transmission_timeout_cancels() {
    let mut step = Observe::default();
    let (res, _) = TestResource::new("22C", 1);
    step.add_observable("sensors/temp", Box::new(res));
    let req = register(&mut step, 0);

    let snap = test::snapshot(500, None);
    step.on_transfer_event(&snap,
                           &mut Effects::new(),
                           TransferEvent::TransmissionTimeout { remote: req.addr(),
                                                                token: req.data().token,
                                                                id: Id(42) })
        .unwrap();

    assert!(step.observations.is_empty());
  }

  #[test]
  fn unsupported_format_errors_and_cancels() {
    let mut step = Observe::default();
    let (res, _) = TestResource::new("22C", 1);
    step.add_observable("sensors/temp", Box::new(res));

    let mut req = test::msg!(CON GET x.x.x.x:1111);
    req.data_mut().set_path("sensors/temp");
    req.data_mut().set_observe(0);
    req.data_mut().token = Token::opaque(&[0xBB]);
    req.data_mut().set_accept(ContentFormat::Json);

    let snap = test::snapshot(0, Some(test::dgram(req)));
    assert!(step.poll_req(&snap, &mut Effects::new()).is_some());

    let snap = test::snapshot(1_000, None);
    step.notify(&snap, &mut Effects::new(), "sensors/temp").unwrap();
    let mut effects = Effects::new();
    step.poll_req(&snap, &mut effects);

    let bad = effects.iter()
                     .find_map(|e| match e {
                       | Effect::Send(msg) => Some(msg.clone()),
                       | _ => None,
                     })
                     .unwrap();
    assert_eq!(bad.data().code, Code::BAD_REQUEST);
    assert!(step.observations.is_empty());
  }

  #[test]
  fn heartbeat_fires_as_con_after_interval() {
    let mut step = Observe::default();
    let (res, _) = TestResource::new("22C", 1);
    step.add_observable("sensors/temp", Box::new(res));
    register(&mut step, 0);

    let day = 24 * 60 * 60 * 1000;

    // nothing due yet
    let snap = test::snapshot(day - 1, None);
    let mut effects = Effects::new();
    step.poll_req(&snap, &mut effects);
    assert!(!effects.iter().any(|e| matches!(e, Effect::Send(_))));

    let snap = test::snapshot(day, None);
    let mut effects = Effects::new();
    step.poll_req(&snap, &mut effects);

    let sent = pump(&mut step, day, effects);
    assert_eq!(sent.len(), 1);
    // heartbeats are confirmable even though the resource's policy is NON
    assert_eq!(sent[0].data().ty, Type::Con);

    // the heartbeat basis was pushed forward; no immediate refire
    let snap = test::snapshot(day + 1_000, None);
    let mut effects = Effects::new();
    step.poll_req(&snap, &mut effects);
    assert!(!effects.iter().any(|e| matches!(e, Effect::Send(_))));
  }

  #[test]
  fn acked_con_notification_reschedules_heartbeat() {
    let mut step = Observe::default();
    let (res, _) = TestResource::new("22C", 1);
    step.add_observable("sensors/temp", Box::new(res.confirmable()));
    let req = register(&mut step, 0);

    let day = 24 * 60 * 60 * 1000;

    // a confirmable update notification goes out at t=1000
    let snap = test::snapshot(1_000, None);
    step.notify(&snap, &mut Effects::new(), "sensors/temp").unwrap();
    let mut effects = Effects::new();
    step.poll_req(&snap, &mut effects);
    let sent = pump(&mut step, 1_000, effects);
    assert_eq!(sent[0].data().ty, Type::Con);

    // the peer acks it at t=5000
    let snap = test::snapshot(5_000, None);
    step.on_transfer_event(&snap,
                           &mut Effects::new(),
                           TransferEvent::TransmissionSucceeded { remote: req.addr(),
                                                                  token: req.data().token,
                                                                  id: sent[0].data().id })
        .unwrap();

    // heartbeat counts from the acknowledgement, not from the send
    let snap = test::snapshot(1_000 + day, None);
    let mut effects = Effects::new();
    step.poll_req(&snap, &mut effects);
    assert!(!effects.iter().any(|e| matches!(e, Effect::Send(_))));

    let snap = test::snapshot(5_000 + day, None);
    let mut effects = Effects::new();
    step.poll_req(&snap, &mut effects);
    assert!(effects.iter().any(|e| matches!(e, Effect::Send(_))));
  }

  #[test]
  fn shutdown_notifies_observers_and_refuses_registrations() {
    let mut step = Observe::default();
    let (res, _) = TestResource::new("22C", 1);
    step.add_observable("sensors/temp", Box::new(res));
    let req = register(&mut step, 0);

    let snap = test::snapshot(1_000, None);
    let mut effects = Effects::new();
    step.shutdown(&snap, &mut effects).unwrap();

    let gone = effects.iter()
                      .find_map(|e| match e {
                        | Effect::Send(msg) => Some(msg.clone()),
                        | _ => None,
                      })
                      .unwrap();
    assert_eq!(gone.data().code, Code::NOT_FOUND);
    assert_eq!(gone.data().ty, Type::Non);
    assert_eq!(gone.data().token, req.data().token);

    // registrations are refused from now on
    register_expect_none(&mut step, 2_000);
  }

  fn register_expect_none(step: &mut Observe, at: u64) {
    let mut req = test::msg!(CON GET x.x.x.x:1111);
    req.data_mut().set_path("sensors/temp");
    req.data_mut().set_observe(0);
    req.data_mut().token = Token::opaque(&[0xCC]);

    let snap = test::snapshot(at, Some(test::dgram(req)));
    assert!(step.poll_req(&snap, &mut Effects::new()).is_some());
    assert!(step.observations.is_empty());
  }

  #[test]
  fn observe_freshness_arithmetic() {
    assert!(fresher(0, 1));
    assert!(fresher(1, 2));
    assert!(!fresher(2, 1));
    assert!(!fresher(5, 5));

    // wraparound: 0 is fresher than 0xFFFFFF
    assert!(fresher(0x00FF_FFFF, 0));
    assert!(!fresher(0, 0x00FF_FFFF));

    // a jump of less than 2^23 forward is fresh
    assert!(fresher(100, 100 + (1 << 23) - 1));
    assert!(!fresher(100, 100 + (1 << 23)));
  }
}
