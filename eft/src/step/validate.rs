use eft_msg::{Code, CodeKind, ContentFormat, Id, Message, OptNumber, OptionMustBeProcessed,
              Payload, Token, Type};

use super::{exec_inner_step, Step, StepOutput};
use crate::logging::log;
use crate::net::Addrd;
use crate::platform::{Effect, Effects, PlatformTypes, Snapshot};
use crate::req::Req;
use crate::resp::Resp;

/// Step enforcing option & payload admissibility
/// ([`Code::is_meaningful`] / [`Code::allows_payload`]).
///
/// Inbound requests carrying a critical option that is not meaningful for
/// their code are answered with 4.02 Bad Option and never reach the
/// application; inbound responses in the same situation are rejected with a
/// Reset. Elective violations are logged and tolerated.
///
/// Outbound messages are checked before transmission and rejected locally.
#[derive(Default, Debug, Clone, Copy)]
pub struct Validate<S>(S);

impl<S> Validate<S> {
  /// Create a new Validate step
  pub fn new(s: S) -> Self {
    Self(s)
  }

  fn first_violation(msg: &Message) -> Option<(OptNumber, OptionMustBeProcessed)> {
    msg.opts
       .keys()
       .find(|num| !msg.code.is_meaningful(**num))
       .map(|num| (*num, num.must_be_processed()))
  }
}

/// Errors yielded when an outbound message fails admissibility checks
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Error<E> {
  /// The inner step failed.
  ///
  /// This variant's Debug representation is completely
  /// replaced by the inner type E's debug representation
  Inner(E),
  /// An outbound message carried an option that is not meaningful for its
  /// code; the caller is rejected locally.
  OptionNotMeaningful(OptNumber, Code),
  /// An outbound message carried a payload although its code forbids one
  /// (GET, DELETE, 2.03 Valid).
  PayloadNotAllowed(Code),
}

impl<E> From<E> for Error<E> {
  fn from(e: E) -> Self {
    Error::Inner(e)
  }
}

impl<E: core::fmt::Debug> core::fmt::Debug for Error<E> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    match self {
      | Self::OptionNotMeaningful(num, code) => f.debug_tuple("OptionNotMeaningful")
                                                 .field(num)
                                                 .field(code)
                                                 .finish(),
      | Self::PayloadNotAllowed(code) => f.debug_tuple("PayloadNotAllowed").field(code).finish(),
      | Self::Inner(e) => e.fmt(f),
    }
  }
}

impl<E: super::Error> super::Error for Error<E> {}

impl<P, E, Inner> Step<P> for Validate<Inner>
  where P: PlatformTypes,
        E: super::Error,
        Inner: Step<P, PollReq = Addrd<Req>, PollResp = Addrd<Resp>, Error = E>
{
  type PollReq = Addrd<Req>;
  type PollResp = Addrd<Resp>;
  type Error = Error<E>;
  type Inner = Inner;

  fn inner(&self) -> &Inner {
    &self.0
  }

  fn inner_mut(&mut self) -> &mut Inner {
    &mut self.0
  }

  fn poll_req(&mut self,
              snap: &Snapshot<P>,
              effects: &mut Effects)
              -> StepOutput<Self::PollReq, Self::Error> {
    let req = exec_inner_step!(self.0.poll_req(snap, effects), Error::Inner);

    match req {
      | Some(req) if req.data().msg().code.kind() == CodeKind::Request => {
        match Self::first_violation(req.data().msg()) {
          | Some((num, OptionMustBeProcessed::Yes)) => {
            let msg = req.data().msg();
            log!(Validate,
                 effects,
                 log::Level::Info,
                 "critical option {:?} not meaningful for {}; answering 4.02",
                 num,
                 msg.code);

            let ty = match msg.ty {
              | Type::Con => Type::Ack,
              | _ => Type::Non,
            };
            let id = match ty {
              | Type::Ack => msg.id,
              | _ => Id(0),
            };

            let mut bad_option = Message::new(ty, Code::BAD_OPTION, id, msg.token);
            bad_option.payload =
              Payload(format!("option {} not meaningful for {}", num.0, msg.code).into_bytes());
            bad_option.set_content_format(ContentFormat::Text);

            effects.push(Effect::Send(Addrd(bad_option, req.addr())));
            None
          },
          | Some((num, OptionMustBeProcessed::No)) => {
            log!(Validate,
                 effects,
                 log::Level::Debug,
                 "ignoring elective option {:?} on {}",
                 num,
                 req.data().msg().code);
            Some(Ok(req))
          },
          | None => Some(Ok(req)),
        }
      },
      | other => other.map(Ok),
    }
  }

  fn poll_resp(&mut self,
               snap: &Snapshot<P>,
               effects: &mut Effects,
               token: Token,
               addr: no_std_net::SocketAddr)
               -> StepOutput<Self::PollResp, Self::Error> {
    let resp = exec_inner_step!(self.0.poll_resp(snap, effects, token, addr),
                                Error::Inner);

    match resp {
      | Some(resp) if resp.data().msg().code.kind() == CodeKind::Response => {
        match Self::first_violation(resp.data().msg()) {
          | Some((num, OptionMustBeProcessed::Yes)) => {
            log!(Validate,
                 effects,
                 log::Level::Info,
                 "critical option {:?} not meaningful for {}; rejecting",
                 num,
                 resp.data().msg().code);

            if let Ok(bytes) =
              eft_msg::TryIntoBytes::try_into_bytes(resp.data().msg().reset())
            {
              effects.push(Effect::SendDgram(Addrd(bytes, resp.addr())));
            }
            None
          },
          | _ => Some(Ok(resp)),
        }
      },
      | other => other.map(Ok),
    }
  }

  fn before_message_sent(&mut self,
                         snap: &Snapshot<P>,
                         effects: &mut Effects,
                         msg: &mut Addrd<Message>)
                         -> Result<(), Self::Error> {
    self.0
        .before_message_sent(snap, effects, msg)
        .map_err(Error::Inner)?;

    let code = msg.data().code;

    if let Some((num, _)) = Self::first_violation(msg.data()) {
      return Err(Error::OptionNotMeaningful(num, code));
    }

    if !code.allows_payload() && !msg.data().payload.0.is_empty() {
      return Err(Error::PayloadNotAllowed(code));
    }

    Ok(())
  }
}

#[cfg(test)]
mod test {
  use eft_msg::{known, OptValue};

  use super::*;
  use crate::step::parse::Parse;
  use crate::step::Empty;
  use crate::test::{self, Platform};

  type Validate = super::Validate<Parse<Empty>>;

  #[test]
  fn clean_request_passes() {
    let mut req = test::msg!(CON GET x.x.x.x:1111);
    req.data_mut().set_path("a/b");
    req.data_mut().set_accept(eft_msg::ContentFormat::Json);

    let snap = test::snapshot(0, Some(test::dgram(req)));
    let out = Validate::default().poll_req(&snap, &mut Effects::new());
    assert!(out.unwrap().is_ok());
  }

  #[test]
  fn critical_violation_is_answered_with_bad_option() {
    let mut req = test::msg!(CON GET x.x.x.x:1111);
    // If-Match (1) is critical and not meaningful on GET
    req.data_mut().set(known::IF_MATCH, OptValue(vec![1]));
    req.data_mut().id = Id(42);

    let snap = test::snapshot(0, Some(test::dgram(req.clone())));
    let mut effects = Effects::new();
    let out = Validate::default().poll_req(&snap, &mut effects);
    assert!(out.is_none());

    let sent = effects.iter()
                      .find_map(|e| match e {
                        | Effect::Send(msg) => Some(msg.clone()),
                        | _ => None,
                      })
                      .unwrap();

    assert_eq!(sent.data().code, Code::BAD_OPTION);
    // piggybacked onto the request's id
    assert_eq!(sent.data().ty, Type::Ack);
    assert_eq!(sent.data().id, Id(42));
  }

  #[test]
  fn elective_violation_is_tolerated() {
    let mut req = test::msg!(CON GET x.x.x.x:1111);
    // Max-Age (14) is elective and not meaningful on GET
    req.data_mut().set(known::MAX_AGE, OptValue(vec![60]));

    let snap = test::snapshot(0, Some(test::dgram(req)));
    let mut effects = Effects::new();
    let out = Validate::default().poll_req(&snap, &mut effects);
    assert!(out.unwrap().is_ok());
  }

  #[test]
  fn response_with_critical_violation_is_reset() {
    let mut rep = test::msg!(CON {2 . 05} x.x.x.x:1111);
    rep.data_mut().set(known::URI_HOST, OptValue::from("example.com"));
    rep.data_mut().id = Id(9);

    let token = rep.data().token;
    let addr = rep.addr();
    let snap = test::snapshot(0, Some(test::dgram(rep.clone())));

    let mut effects = Effects::new();
    let out = Validate::default().poll_resp(&snap, &mut effects, token, addr);
    assert!(out.is_none());

    let reset = rep.data().reset();
    assert!(effects.iter().any(|e| {
                             *e == Effect::SendDgram(Addrd(eft_msg::TryIntoBytes::try_into_bytes(reset.clone()).unwrap(),
                                                           addr))
                           }));
  }

  #[test]
  fn outbound_violations_are_rejected_locally() {
    let mut step = Validate::default();
    let snap = test::snapshot(0, None);

    let mut get = test::msg!(CON GET x.x.x.x:1111);
    get.data_mut().set_content_format(eft_msg::ContentFormat::Text);
    assert!(matches!(step.before_message_sent(&snap, &mut Effects::new(), &mut get),
                     Err(Error::OptionNotMeaningful(known::CONTENT_FORMAT, Code::GET))));

    let mut get = test::msg!(CON GET x.x.x.x:1111);
    get.data_mut().payload = Payload(b"nope".to_vec());
    assert!(matches!(step.before_message_sent(&snap, &mut Effects::new(), &mut get),
                     Err(Error::PayloadNotAllowed(Code::GET))));

    let mut ok = test::msg!(CON {2 . 05} x.x.x.x:1111);
    ok.data_mut().set_content_format(eft_msg::ContentFormat::Text);
    ok.data_mut().payload = Payload(b"yep".to_vec());
    assert!(step.before_message_sent(&snap, &mut Effects::new(), &mut ok)
                .is_ok());
  }
}
