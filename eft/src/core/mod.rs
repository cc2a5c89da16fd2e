use eft_msg::{Id, Token, TryIntoBytes, Type};
use embedded_time::Clock;
use no_std_net::SocketAddr;

use crate::config::Config;
use crate::net::{Addrd, Socket};
use crate::platform::{self, Effect, Effects, Message, PlatformTypes, Snapshot};
use crate::req::Req;
use crate::resp::Resp;
use crate::step::ack::Ack;
use crate::step::correlate::Correlate;
use crate::step::dedup::Dedup;
use crate::step::observe::Observe;
use crate::step::parse::Parse;
use crate::step::provision_ids::ProvisionIds;
use crate::step::provision_tokens::ProvisionTokens;
use crate::step::retry::Retry;
use crate::step::validate::Validate;
use crate::step::{Empty, Resource, Step};

/// The canonical step pipeline, innermost first: parse, dedup, validate,
/// ack, id/token provisioning, reliability, correlation, observe.
pub type CoreSteps<P> =
  Observe<P,
          Correlate<P,
                    Retry<P,
                          ProvisionTokens<P,
                                          ProvisionIds<P,
                                                       Ack<P,
                                                           Validate<Dedup<P,
                                                                          Parse<Empty>>>>>>>>>;

/// Error yielded by [`Endpoint`] operations
pub type Error<P, Steps> =
  platform::Error<<Steps as Step<P>>::Error, <<P as PlatformTypes>::Socket as Socket>::Error>;

/// An [`Endpoint`] using the canonical [`CoreSteps`] pipeline
pub type CoreEndpoint<P> = Endpoint<P, CoreSteps<P>>;

/// A CoAP endpoint: the single arbiter through which all inbound and
/// outbound messages flow.
///
/// Every turn of [`Endpoint::poll_req`] / [`Endpoint::poll_resp`] snapshots
/// the system (time + at most one datagram), runs the step pipeline, and
/// executes the effects the steps queued: raw datagrams go straight to the
/// socket, full messages re-enter the outbound pipeline, transfer events
/// are fanned back out to the steps, and log lines hit the [`log`] crate.
///
/// Both CoAP roles live on the same endpoint: poll for requests to serve
/// them, send requests and poll for their responses to consume others.
#[derive(Debug)]
pub struct Endpoint<P: PlatformTypes, Steps> {
  steps: Steps,
  config: Config,
  socket: P::Socket,
  clock: P::Clock,
}

impl<P, Steps> Endpoint<P, Steps>
  where P: PlatformTypes,
        Steps: Step<P, PollReq = Addrd<Req>, PollResp = Addrd<Resp>>
{
  /// Create an endpoint from an already-bound socket and a clock
  pub fn new(socket: P::Socket, clock: P::Clock, config: Config) -> Self
    where Steps: Default
  {
    Self { steps: Steps::default(),
           config,
           socket,
           clock }
  }

  /// Bind a socket and create an endpoint on it
  pub fn try_bind(addr: SocketAddr,
                  config: Config)
                  -> Result<Self, <P::Socket as Socket>::Error>
    where Steps: Default,
          P::Clock: Default
  {
    P::Socket::bind(addr).map(|socket| Self::new(socket, P::Clock::default(), config))
  }

  /// The runtime configuration
  pub fn config(&self) -> Config {
    self.config
  }

  /// Borrow the clock (useful for mock clocks in tests)
  pub fn clock(&self) -> &P::Clock {
    &self.clock
  }

  /// Borrow the socket
  pub fn socket(&self) -> &P::Socket {
    &self.socket
  }

  fn snapshot(&mut self) -> Result<Snapshot<P>, Error<P, Steps>> {
    let time = self.clock.try_now().map_err(platform::Error::Clock)?;
    let recvd_dgram = self.socket.poll().map_err(platform::Error::Socket)?;

    Ok(Snapshot::new(time, recvd_dgram, self.config))
  }

  fn snapshot_sans_dgram(&mut self) -> Result<Snapshot<P>, Error<P, Steps>> {
    let time = self.clock.try_now().map_err(platform::Error::Clock)?;

    Ok(Snapshot::new(time, None, self.config))
  }

  /// Poll for an inbound request.
  ///
  /// Drives the whole runtime: retransmissions, deduplication, piggyback
  /// deadlines, heartbeats and queued notifications all progress on each
  /// call, whether or not a request arrives.
  pub fn poll_req(&mut self) -> nb::Result<Addrd<Req>, Error<P, Steps>> {
    let snap = self.snapshot().map_err(nb::Error::Other)?;
    let mut effects = Effects::new();

    let out = self.steps.poll_req(&snap, &mut effects);
    self.exec_many(&snap, effects).map_err(nb::Error::Other)?;

    match out {
      | Some(Ok(req)) => Ok(req),
      | Some(Err(nb::Error::Other(e))) => Err(nb::Error::Other(platform::Error::Step(e))),
      | Some(Err(nb::Error::WouldBlock)) | None => Err(nb::Error::WouldBlock),
    }
  }

  /// Poll for the response to the request identified by `token` + `addr`.
  pub fn poll_resp(&mut self,
                   token: Token,
                   addr: SocketAddr)
                   -> nb::Result<Addrd<Resp>, Error<P, Steps>> {
    let snap = self.snapshot().map_err(nb::Error::Other)?;
    let mut effects = Effects::new();

    let out = self.steps.poll_resp(&snap, &mut effects, token, addr);
    self.exec_many(&snap, effects).map_err(nb::Error::Other)?;

    match out {
      | Some(Ok(resp)) => Ok(resp),
      | Some(Err(nb::Error::Other(e))) => Err(nb::Error::Other(platform::Error::Step(e))),
      | Some(Err(nb::Error::WouldBlock)) | None => Err(nb::Error::WouldBlock),
    }
  }

  /// Send a message, running it through the outbound pipeline
  /// (token & id provisioning, piggyback conversion, reliability tracking).
  ///
  /// Yields the id and token the message went out with.
  ///
  /// Returns `WouldBlock` when the message is confirmable and NSTART
  /// outstanding exchanges with this remote already exist; poll until one
  /// resolves, then retry.
  pub fn send_msg(&mut self, msg: Addrd<Message>) -> nb::Result<(Id, Token), Error<P, Steps>> {
    let snap = self.snapshot_sans_dgram().map_err(nb::Error::Other)?;
    self.send_msg_with(&snap, msg)
  }

  /// Send a request
  pub fn send_req(&mut self,
                  req: Req,
                  addr: SocketAddr)
                  -> nb::Result<(Id, Token), Error<P, Steps>> {
    self.send_msg(Addrd(req.into(), addr))
  }

  fn send_msg_with(&mut self,
                   snap: &Snapshot<P>,
                   mut msg: Addrd<Message>)
                   -> nb::Result<(Id, Token), Error<P, Steps>> {
    if msg.data().ty == Type::Con
       && self.steps.in_flight(msg.addr()) >= self.config.nstart as usize
    {
      return Err(nb::Error::WouldBlock);
    }

    let mut effects = Effects::new();

    self.steps
        .before_message_sent(snap, &mut effects, &mut msg)
        .map_err(platform::Error::Step)
        .map_err(nb::Error::Other)?;

    let (id, token) = (msg.data().id, msg.data().token);

    let bytes = msg.data()
                   .clone()
                   .try_into_bytes()
                   .map_err(platform::Error::MessageToBytes)
                   .map_err(nb::Error::Other)?;

    nb::block!(self.socket.send(Addrd(bytes.as_slice(), msg.addr())))
      .map_err(platform::Error::Socket)
      .map_err(nb::Error::Other)?;

    self.steps
        .on_message_sent(snap, &mut effects, &msg)
        .map_err(platform::Error::Step)
        .map_err(nb::Error::Other)?;

    self.exec_many(snap, effects).map_err(nb::Error::Other)?;

    Ok((id, token))
  }

  /// Tell the runtime the resource at `path` changed; notifications for
  /// every observer are queued and go out on the next poll.
  pub fn notify(&mut self, path: &str) -> Result<(), Error<P, Steps>> {
    let snap = self.snapshot_sans_dgram()?;
    let mut effects = Effects::new();

    self.steps
        .notify(&snap, &mut effects, path)
        .map_err(platform::Error::Step)?;

    self.exec_many(&snap, effects)
  }

  /// Install an observable resource at `path`.
  ///
  /// Yields the resource back when no step in the pipeline hosts
  /// observable resources.
  pub fn add_observable(&mut self,
                        path: &str,
                        resource: Box<dyn Resource>)
                        -> Option<Box<dyn Resource>> {
    self.steps.add_observable(path, resource)
  }

  /// Remove the resource at `path`, notifying and dropping its observers.
  pub fn remove_observable(&mut self, path: &str) -> Result<(), Error<P, Steps>> {
    let snap = self.snapshot_sans_dgram()?;
    let mut effects = Effects::new();

    self.steps
        .remove_observable(&snap, &mut effects, path)
        .map_err(platform::Error::Step)?;

    self.exec_many(&snap, effects)
  }

  /// Shut the endpoint down: every observer gets a 4.04 Not Found
  /// notification and further registrations are refused.
  pub fn shutdown(&mut self) -> Result<(), Error<P, Steps>> {
    let snap = self.snapshot_sans_dgram()?;
    let mut effects = Effects::new();

    self.steps
        .shutdown(&snap, &mut effects)
        .map_err(platform::Error::Step)?;

    self.exec_many(&snap, effects)
  }

  /// Abandon an outbound confirmable transfer.
  ///
  /// Already-sent datagrams are not retracted; the transfer just stops
  /// being retransmitted and its record resolves as rejected.
  pub fn cancel(&mut self, addr: SocketAddr, id: Id) {
    self.steps.cancel(addr, id);
  }

  fn exec_many(&mut self, snap: &Snapshot<P>, effects: Effects) -> Result<(), Error<P, Steps>> {
    effects.into_iter()
           .try_for_each(|effect| self.exec_1(snap, effect))
  }

  fn exec_1(&mut self, snap: &Snapshot<P>, effect: Effect) -> Result<(), Error<P, Steps>> {
    match effect {
      | Effect::Send(msg) => match self.send_msg_with(snap, msg) {
        | Ok(_) => Ok(()),
        | Err(nb::Error::WouldBlock) => {
          log::warn!(target: "eft",
                     "Endpoint: dropping queued message; too many transfers in flight");
          Ok(())
        },
        | Err(nb::Error::Other(e)) => Err(e),
      },
      | Effect::SendDgram(bytes) => {
        nb::block!(self.socket.send(bytes.as_ref().map(|v| v.as_slice())))
          .map_err(platform::Error::Socket)
      },
      | Effect::Log(level, msg) => {
        log::log!(target: "eft", level, "{}", msg);
        Ok(())
      },
      | Effect::Event(event) => {
        let mut effects = Effects::new();
        self.steps
            .on_transfer_event(snap, &mut effects, event)
            .map_err(platform::Error::Step)?;
        self.exec_many(snap, effects)
      },
    }
  }
}

#[cfg(test)]
mod test {
  use eft_msg::{Code, ContentFormat, Message, Token, TryFromBytes, Type};

  use super::*;
  use crate::req::Req;
  use crate::resp::Resp;
  use crate::test::{self, ClockMock, Platform, SockMock};

  type Endpoint = super::CoreEndpoint<Platform>;

  fn endpoint() -> Endpoint {
    Endpoint::new(SockMock::new(), ClockMock::new(), Config::default())
  }

  fn would_block<T, E>(r: &nb::Result<T, E>) -> bool {
    matches!(r, Err(nb::Error::WouldBlock))
  }

  #[test]
  fn server_piggybacks_prompt_responses() {
    let mut ep = endpoint();
    let rx = ep.socket().rx.clone();
    let tx = ep.socket().tx.clone();

    let mut get = test::msg!(CON GET x.x.x.x:2222);
    get.data_mut().id = eft_msg::Id(0x1234);
    get.data_mut().token = Token::opaque(&[0xAA]);
    get.data_mut().set_path("hello");
    SockMock::push(&rx, get.clone().map(|m| m.try_into_bytes().unwrap()));

    let req = ep.poll_req().unwrap();
    assert_eq!(req.data().path(), "hello");

    let rep = Resp::for_request(req.data()).unwrap().with_payload("ok".as_bytes().to_vec());
    ep.send_msg(req.map(|_| rep.into())).unwrap();

    let sent = SockMock::sent_to(&tx, get.addr());
    let rep_msg = Message::try_from_bytes(sent.last().unwrap()).unwrap();
    assert_eq!(rep_msg.ty, Type::Ack);
    assert_eq!(rep_msg.id, eft_msg::Id(0x1234));
    assert_eq!(rep_msg.token, Token::opaque(&[0xAA]));
    assert_eq!(rep_msg.code, Code::CONTENT);
    assert_eq!(rep_msg.payload.0, b"ok".to_vec());
  }

  #[test]
  fn client_request_resolves_on_piggybacked_ack() {
    let mut ep = endpoint();
    let rx = ep.socket().rx.clone();
    let tx = ep.socket().tx.clone();
    let addr = test::dummy_addr();

    let (id, token) = ep.send_req(Req::get("hello"), addr).unwrap();

    let sent = SockMock::sent_to(&tx, addr);
    let req_msg = Message::try_from_bytes(sent.last().unwrap()).unwrap();
    assert_eq!(req_msg.ty, Type::Con);
    assert_eq!(req_msg.id, id);
    assert_eq!(req_msg.token, token);
    assert_ne!(id, eft_msg::Id(0));
    assert_eq!(token.len(), 4);

    // no response yet
    assert!(would_block(&ep.poll_resp(token, addr)));

    let mut ack = Message::new(Type::Ack, Code::CONTENT, id, token);
    ack.set_content_format(ContentFormat::Text);
    ack.payload = eft_msg::Payload(b"hi!".to_vec());
    SockMock::push(&rx, Addrd(ack.try_into_bytes().unwrap(), addr));

    let rep = ep.poll_resp(token, addr).unwrap();
    assert_eq!(rep.data().payload_str(), Some("hi!"));

    // resolved exactly once
    assert!(would_block(&ep.poll_resp(token, addr)));
  }

  #[test]
  fn nstart_limits_outstanding_cons() {
    let mut ep = endpoint();
    let addr = test::dummy_addr();

    ep.send_req(Req::get("a"), addr).unwrap();
    assert!(would_block(&ep.send_req(Req::get("b"), addr)));

    // a different remote is unaffected
    ep.send_req(Req::get("b"), test::dummy_addr_2()).unwrap();
  }

  #[derive(Debug)]
  struct Thermometer;

  impl Resource for Thermometer {
    fn serialize(&self, format: ContentFormat) -> Option<Vec<u8>> {
      match format {
        | ContentFormat::Text => Some(b"22C".to_vec()),
        | _ => None,
      }
    }

    fn etag(&self, _: ContentFormat) -> Vec<u8> {
      vec![1]
    }

    fn max_age(&self) -> crate::time::Millis {
      embedded_time::duration::Milliseconds(60_000)
    }
  }

  #[test]
  fn observe_register_notify_cancel() {
    let mut ep = endpoint();
    let rx = ep.socket().rx.clone();
    let tx = ep.socket().tx.clone();

    assert!(ep.add_observable("temp", Box::new(Thermometer)).is_none());

    // client registers
    let mut get = test::msg!(CON GET x.x.x.x:2222);
    get.data_mut().set_path("temp");
    get.data_mut().set_observe(0);
    get.data_mut().id = eft_msg::Id(0x20);
    get.data_mut().token = Token::opaque(&[0xBB]);
    SockMock::push(&rx, get.clone().map(|m| m.try_into_bytes().unwrap()));

    let req = ep.poll_req().unwrap();
    let rep = Resp::for_request(req.data()).unwrap()
                                           .with_payload(b"22C".to_vec())
                                           .with_content_format(ContentFormat::Text);
    ep.send_msg(req.map(|_| rep.into())).unwrap();

    let initial =
      Message::try_from_bytes(SockMock::sent_to(&tx, get.addr()).last().unwrap()).unwrap();
    assert_eq!(initial.observe(), Some(0));

    // resource update produces a notification with the next serial
    ep.notify("temp").unwrap();
    assert!(would_block(&ep.poll_req()));

    let notification =
      Message::try_from_bytes(SockMock::sent_to(&tx, get.addr()).last().unwrap()).unwrap();
    assert_eq!(notification.token, Token::opaque(&[0xBB]));
    assert_eq!(notification.observe(), Some(1));
    assert_eq!(notification.code, Code::CONTENT);

    // client cancels with a deregistering GET
    let mut dereg = get.clone();
    dereg.data_mut().set_observe(1);
    dereg.data_mut().id = eft_msg::Id(0x21);
    SockMock::push(&rx, dereg.map(|m| m.try_into_bytes().unwrap()));
    ep.poll_req().unwrap();

    let before = SockMock::sent_to(&tx, get.addr()).len();
    ep.notify("temp").unwrap();
    assert!(would_block(&ep.poll_req()));
    assert_eq!(SockMock::sent_to(&tx, get.addr()).len(), before);
  }
}
