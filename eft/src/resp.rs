use eft_msg::{Code, CodeKind, ContentFormat, Id, Message, Payload, Token, Type};

use crate::req::Req;

/// A CoAP response
///
/// Thin wrapper over [`Message`] with response-flavored accessors.
#[derive(Debug, Clone, PartialEq)]
pub struct Resp {
  pub(crate) msg: Message,
}

impl Resp {
  /// Create a 2.05 Content response for a request.
  ///
  /// The response reuses the request's token. Its type matches the
  /// request's (confirmable requests get a confirmable response, which the
  /// runtime turns into a piggybacked ACK when it is produced inside the
  /// acknowledgement window).
  ///
  /// Yields `None` when the message is not a request.
  pub fn for_request(req: &Req) -> Option<Self> {
    if !req.is_request() {
      return None;
    }

    let ty = match req.msg().ty {
      | Type::Non => Type::Non,
      | _ => Type::Con,
    };

    Some(Self { msg: Message::new(ty, Code::CONTENT, Id(0), req.msg().token) })
  }

  /// The response code
  pub fn code(&self) -> Code {
    self.msg.code
  }

  /// Set the response code
  pub fn set_code(&mut self, code: Code) {
    self.msg.code = code;
  }

  /// Change the response code
  pub fn with_code(mut self, code: Code) -> Self {
    self.msg.code = code;
    self
  }

  /// Set the payload
  pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
    self.msg.payload = Payload(payload.into());
    self
  }

  /// Set the Content-Format option
  pub fn with_content_format(mut self, format: ContentFormat) -> Self {
    self.msg.set_content_format(format);
    self
  }

  /// The payload bytes
  pub fn payload(&self) -> &[u8] {
    &self.msg.payload.0
  }

  /// The payload interpreted as utf8
  pub fn payload_str(&self) -> Option<&str> {
    core::str::from_utf8(self.payload()).ok()
  }

  /// The token correlating this response to its request
  pub fn token(&self) -> Token {
    self.msg.token
  }

  /// The raw Observe option value, if any (notification sequence number)
  pub fn observe(&self) -> Option<u32> {
    self.msg.observe()
  }

  /// Is this message a response at all?
  pub fn is_response(&self) -> bool {
    self.msg.code.kind() == CodeKind::Response
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

impl From<Message> for Resp {
  fn from(msg: Message) -> Self {
    Self { msg }
  }
}

impl From<Resp> for Message {
  fn from(rep: Resp) -> Self {
    rep.msg
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn for_request_copies_token_and_type() {
    let mut req = Req::get("a/b");
    req.msg_mut().token = Token::opaque(&[1, 2, 3]);

    let rep = Resp::for_request(&req).unwrap();
    assert_eq!(rep.token(), Token::opaque(&[1, 2, 3]));
    assert_eq!(rep.msg().ty, Type::Con);
    assert_eq!(rep.code(), Code::CONTENT);

    let rep = Resp::for_request(&Req::get("a").non()).unwrap();
    assert_eq!(rep.msg().ty, Type::Non);
  }

  #[test]
  fn for_request_rejects_non_requests() {
    let ack = Message::new(Type::Ack, Code::EMPTY, Id(1), Token(Default::default()));
    assert_eq!(Resp::for_request(&Req::from(ack)), None);
  }
}
