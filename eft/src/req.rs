use eft_msg::{known, Action, Code, CodeKind, ContentFormat, Id, Message, OptValue, Payload, Token,
              Type};

/// Request methods (RFC 7252 §12.1.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Method {
  #[allow(missing_docs)]
  Get,
  #[allow(missing_docs)]
  Post,
  #[allow(missing_docs)]
  Put,
  #[allow(missing_docs)]
  Delete,
}

impl Method {
  /// The [`Code`] for this method
  pub fn code(&self) -> Code {
    match self {
      | Method::Get => Code::GET,
      | Method::Post => Code::POST,
      | Method::Put => Code::PUT,
      | Method::Delete => Code::DELETE,
    }
  }

  /// Try to read a request [`Code`] as a method
  pub fn from_code(code: Code) -> Option<Self> {
    match code {
      | Code::GET => Some(Method::Get),
      | Code::POST => Some(Method::Post),
      | Code::PUT => Some(Method::Put),
      | Code::DELETE => Some(Method::Delete),
      | _ => None,
    }
  }
}

/// A CoAP request
///
/// Thin wrapper over [`Message`] with request-flavored accessors. Everything
/// yielded by the request-polling flow is wrapped in `Req`, including empty
/// messages and (on combined endpoints) responses; [`Req::method`] yields
/// `None` for those.
#[derive(Debug, Clone, PartialEq)]
pub struct Req {
  pub(crate) msg: Message,
}

impl Req {
  /// Create a confirmable request
  pub fn new(method: Method, path: &str) -> Self {
    let mut msg = Message::new(Type::Con, method.code(), Id(0), Token(Default::default()));
    msg.set_path(path);

    Self { msg }
  }

  /// Create a confirmable GET request
  pub fn get(path: &str) -> Self {
    Self::new(Method::Get, path)
  }

  /// Create a confirmable POST request
  pub fn post(path: &str) -> Self {
    Self::new(Method::Post, path)
  }

  /// Create a confirmable PUT request
  pub fn put(path: &str) -> Self {
    Self::new(Method::Put, path)
  }

  /// Create a confirmable DELETE request
  pub fn delete(path: &str) -> Self {
    Self::new(Method::Delete, path)
  }

  /// Make this request non-confirmable
  pub fn non(mut self) -> Self {
    self.msg.ty = Type::Non;
    self
  }

  /// Mark this GET request as registering an observation (Observe=0)
  pub fn observing(mut self) -> Self {
    self.msg.set_observe(u32::from(Action::Register));
    self
  }

  /// Mark this GET request as cancelling an observation (Observe=1)
  pub fn not_observing(mut self) -> Self {
    self.msg.set_observe(u32::from(Action::Deregister));
    self
  }

  /// Set the Accept option
  pub fn accepting(mut self, format: ContentFormat) -> Self {
    self.msg.set_accept(format);
    self
  }

  /// Set the payload
  pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
    self.msg.payload = Payload(payload.into());
    self
  }

  /// The request method, if this message is a request
  pub fn method(&self) -> Option<Method> {
    Method::from_code(self.msg.code)
  }

  /// The Uri-Path
  pub fn path(&self) -> String {
    self.msg.path()
  }

  /// The payload bytes
  pub fn payload(&self) -> &[u8] {
    &self.msg.payload.0
  }

  /// The payload interpreted as utf8
  pub fn payload_str(&self) -> Option<&str> {
    core::str::from_utf8(self.payload()).ok()
  }

  /// The Observe option interpreted as a register/deregister [`Action`]
  pub fn observe_action(&self) -> Option<Action> {
    self.msg.observe_action()
  }

  /// The Accept option
  pub fn accept(&self) -> Option<ContentFormat> {
    self.msg.accept()
  }

  /// ETags attached to the request (representations the client has stored)
  pub fn etags(&self) -> Vec<Vec<u8>> {
    self.msg.etags()
  }

  /// Add an ETag the client has stored
  pub fn add_etag(mut self, etag: &[u8]) -> Self {
    self.msg.add(known::ETAG, OptValue(etag.to_vec()));
    self
  }

  /// Is this message a request at all?
  pub fn is_request(&self) -> bool {
    self.msg.code.kind() == CodeKind::Request
  }

  /// Borrow the underlying message
  pub fn msg(&self) -> &Message {
    &self.msg
  }

  /// Mutably borrow the underlying message
  pub fn msg_mut(&mut self) -> &mut Message {
    &mut self.msg
  }
}

impl From<Message> for Req {
  fn from(msg: Message) -> Self {
    Self { msg }
  }
}

impl From<Req> for Message {
  fn from(req: Req) -> Self {
    req.msg
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn builders() {
    let req = Req::get("sensors/temp").observing()
                                      .accepting(ContentFormat::Json);

    assert_eq!(req.method(), Some(Method::Get));
    assert_eq!(req.path(), "sensors/temp");
    assert_eq!(req.observe_action(), Some(Action::Register));
    assert_eq!(req.accept(), Some(ContentFormat::Json));
    assert_eq!(req.msg().ty, Type::Con);

    let req = Req::put("config").non().with_payload(b"x=1".to_vec());
    assert_eq!(req.msg().ty, Type::Non);
    assert_eq!(req.payload_str(), Some("x=1"));
  }

  #[test]
  fn non_requests_have_no_method() {
    let ack = Message::new(Type::Ack, Code::EMPTY, Id(3), Token(Default::default()));
    assert_eq!(Req::from(ack).method(), None);

    let rep = Message::new(Type::Non, Code::CONTENT, Id(3), Token(Default::default()));
    assert!(!Req::from(rep).is_request());
  }
}
