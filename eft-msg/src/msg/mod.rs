/// Message Code
pub mod code;

/// Message parsing errors
pub mod parse_error;

/// Message ID
pub mod id;

/// Message Options
pub mod opt;

/// Message Type
pub mod ty;

/// Message Token
pub mod token;

/// Message Version
pub mod ver;

pub use code::*;
pub use id::*;
pub use opt::known::observe::Action;
pub use opt::known::ContentFormat;
pub use opt::*;
pub use parse_error::*;
pub use token::*;
pub use ty::*;
pub use ver::*;

use crate::from_bytes::{Cursor, TryFromBytes};

/// The payload of a message (RFC 7252 §5.5)
#[derive(Default, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Payload(pub Vec<u8>);

/// Struct representing the first byte of a message.
///
/// ```text
/// CoAP version
/// |
/// |  Message type (request, response, empty)
/// |  |
/// |  |  Length of token, in bytes. (4-bit integer)
/// |  |  |
/// vv vv vvvv
/// 01 00 0000
/// ```
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub(crate) struct Byte1 {
  pub(crate) ver: Version,
  pub(crate) ty: Type,
  pub(crate) tkl: u8,
}

impl TryFrom<u8> for Byte1 {
  type Error = MessageParseError;

  fn try_from(b: u8) -> Result<Self, Self::Error> {
    let ver = b >> 6; // bits 0 & 1
    let ty = b >> 4 & 0b11; // bits 2 & 3
    let tkl = b & 0b1111u8; // last 4 bits

    Ok(Byte1 { ver: Version(ver),
               ty: Type::try_from(ty)?,
               tkl })
  }
}

/// # `Message` struct
/// Low-level representation of a CoAP message, very close to the raw binary
/// format.
///
/// Options live in an [`OptionMap`]; ascending option-number order (which the
/// wire format's delta encoding demands) falls directly out of the map.
///
/// Messages support both serializing to bytes and parsing from bytes, by
/// using the provided [`TryFromBytes`] and
/// [`TryIntoBytes`](crate::TryIntoBytes) traits.
#[derive(Clone, PartialEq, Debug)]
pub struct Message {
  /// see [`Id`] for details
  pub id: Id,
  /// see [`Type`] for details
  pub ty: Type,
  /// see [`Version`] for details
  pub ver: Version,
  /// see [`Token`] for details
  pub token: Token,
  /// see [`Code`] for details
  pub code: Code,
  /// see [`opt`] for details
  pub opts: OptionMap,
  /// see [`Payload`]
  pub payload: Payload,
}

impl Message {
  /// Create a new message with no options and an empty payload
  pub fn new(ty: Type, code: Code, id: Id, token: Token) -> Self {
    Self { id,
           ty,
           ver: Default::default(),
           token,
           code,
           opts: Default::default(),
           payload: Payload(Default::default()) }
  }

  /// Create the empty Acknowledgement for this message.
  ///
  /// Empty ACKs reuse the acknowledged message's Id and carry no token,
  /// options or payload.
  pub fn ack(&self) -> Self {
    Self::new(Type::Ack, Code::EMPTY, self.id, Token(Default::default()))
  }

  /// Create the Reset message rejecting this message
  pub fn reset(&self) -> Self {
    Self::new(Type::Reset, Code::EMPTY, self.id, Token(Default::default()))
  }

  /// Replace all occurrences of an option with a single value
  pub fn set(&mut self, num: OptNumber, value: OptValue) {
    self.opts.insert(num, vec![value]);
  }

  /// Add an occurrence of a (repeatable) option
  pub fn add(&mut self, num: OptNumber, value: OptValue) {
    self.opts.entry(num).or_default().push(value);
  }

  /// All occurrences of an option
  pub fn get(&self, num: OptNumber) -> &[OptValue] {
    self.opts.get(&num).map(|v| v.as_slice()).unwrap_or(&[])
  }

  /// The first occurrence of an option, if any
  pub fn get_first(&self, num: OptNumber) -> Option<&OptValue> {
    self.get(num).first()
  }

  /// Remove all occurrences of an option
  pub fn remove(&mut self, num: OptNumber) -> Option<Vec<OptValue>> {
    self.opts.remove(&num)
  }

  /// The raw value of the Observe option, if present
  pub fn observe(&self) -> Option<u32> {
    self.get_first(known::OBSERVE).and_then(OptValue::as_uint)
  }

  /// The Observe option interpreted as a register/deregister [`Action`]
  pub fn observe_action(&self) -> Option<Action> {
    self.observe().and_then(Action::from_uint)
  }

  /// Set the Observe option to a raw 24-bit sequence value
  pub fn set_observe(&mut self, value: u32) {
    self.set(known::OBSERVE, OptValue::uint(value & 0x00FF_FFFF));
  }

  /// The Uri-Path segments joined with `/`
  pub fn path(&self) -> String {
    self.get(known::URI_PATH)
        .iter()
        .filter_map(OptValue::as_str)
        .collect::<Vec<_>>()
        .join("/")
  }

  /// Set the Uri-Path from a `/`-separated string
  pub fn set_path(&mut self, path: &str) {
    self.remove(known::URI_PATH);
    path.split('/')
        .filter(|seg| !seg.is_empty())
        .for_each(|seg| self.add(known::URI_PATH, OptValue::from(seg)));
  }

  /// The Content-Format option, if present
  pub fn content_format(&self) -> Option<ContentFormat> {
    self.get_first(known::CONTENT_FORMAT)
        .and_then(OptValue::as_uint)
        .map(|n| ContentFormat::from(n as u16))
  }

  /// Set the Content-Format option
  pub fn set_content_format(&mut self, format: ContentFormat) {
    self.set(known::CONTENT_FORMAT, OptValue::uint(u16::from(format) as u32));
  }

  /// The Accept option, if present
  pub fn accept(&self) -> Option<ContentFormat> {
    self.get_first(known::ACCEPT)
        .and_then(OptValue::as_uint)
        .map(|n| ContentFormat::from(n as u16))
  }

  /// Set the Accept option
  pub fn set_accept(&mut self, format: ContentFormat) {
    self.set(known::ACCEPT, OptValue::uint(u16::from(format) as u32));
  }

  /// All ETag occurrences as raw bytes
  pub fn etags(&self) -> Vec<Vec<u8>> {
    self.get(known::ETAG).iter().map(|v| v.0.clone()).collect()
  }

  /// Set a single ETag
  pub fn set_etag(&mut self, etag: &[u8]) {
    self.set(known::ETAG, OptValue(etag.to_vec()));
  }

  /// The Max-Age option in seconds, if present
  pub fn max_age(&self) -> Option<u32> {
    self.get_first(known::MAX_AGE).and_then(OptValue::as_uint)
  }

  /// Set the Max-Age option (seconds)
  pub fn set_max_age(&mut self, seconds: u32) {
    self.set(known::MAX_AGE, OptValue::uint(seconds));
  }

  /// Total size of the serialized message in bytes
  pub fn size(&self) -> usize {
    let header_size = 4;
    let token_size = self.token.len();
    let opts_size: usize = crate::to_bytes::opts_size(&self.opts);
    let payload_size = if self.payload.0.is_empty() {
      0
    } else {
      1 + self.payload.0.len()
    };

    header_size + token_size + opts_size + payload_size
  }
}

impl<Bytes: AsRef<[u8]>> TryFromBytes<Bytes> for Message {
  type Error = MessageParseError;

  fn try_from_bytes(bytes: Bytes) -> Result<Self, Self::Error> {
    let mut bytes = Cursor::new(bytes.as_ref());

    let Byte1 { tkl, ty, ver } = bytes.next()
                                      .ok_or_else(MessageParseError::eof)?
                                      .try_into()?;

    if ver.0 != 1 {
      return Err(MessageParseError::InvalidVersion(ver.0));
    }

    if tkl > 8 {
      return Err(MessageParseError::InvalidTokenLength(tkl));
    }

    let code: Code = bytes.next().ok_or_else(MessageParseError::eof)?.into();

    let id = bytes.take_exact(2)
                  .map(|bs| Id::from_be_bytes([bs[0], bs[1]]))
                  .ok_or_else(MessageParseError::eof)?;

    let token = bytes.take_exact(tkl as usize)
                     .map(Token::opaque)
                     .ok_or_else(MessageParseError::eof)?;

    // empty messages are the 4-byte header and nothing else (RFC 7252 §4.1)
    if code.kind() == CodeKind::Empty && (tkl > 0 || !bytes.is_exhausted()) {
      return Err(MessageParseError::DataOnEmptyMessage);
    }

    let opts = opt::try_consume_opts(&mut bytes).map_err(MessageParseError::OptParseError)?;

    let payload = Payload(bytes.take_until_end().to_vec());

    Ok(Message { id,
                 ty,
                 ver,
                 code,
                 token,
                 opts,
                 payload })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_msg() {
    let (expect, bytes) = crate::test_msg();
    assert_eq!(Message::try_from_bytes(&bytes).unwrap(), expect)
  }

  #[test]
  fn parse_byte1() {
    let byte = 0b_01_10_0011u8;
    let byte = Byte1::try_from(byte).unwrap();
    assert_eq!(byte,
               Byte1 { ver: Version(1),
                       ty: Type::Ack,
                       tkl: 3 })
  }

  #[test]
  fn parse_rejects_bad_token_length() {
    // tkl = 9
    let bytes = [0b0100_1001u8, 0x45, 0x00, 0x01, 1, 2, 3, 4, 5, 6, 7, 8, 9];
    assert_eq!(Message::try_from_bytes(bytes),
               Err(MessageParseError::InvalidTokenLength(9)));
  }

  #[test]
  fn parse_rejects_bad_version() {
    let bytes = [0b1000_0000u8, 0x45, 0x00, 0x01];
    assert_eq!(Message::try_from_bytes(bytes),
               Err(MessageParseError::InvalidVersion(2)));
  }

  #[test]
  fn parse_rejects_data_on_empty_message() {
    // code 0.00 with a payload
    let bytes = [0b0100_0000u8, 0x00, 0x00, 0x01, 0xFF, 1, 2];
    assert_eq!(Message::try_from_bytes(bytes),
               Err(MessageParseError::DataOnEmptyMessage));
  }

  #[test]
  fn parse_bare_ack() {
    let bytes = [0b0110_0000u8, 0x00, 0x12, 0x34];
    let msg = Message::try_from_bytes(bytes).unwrap();
    assert_eq!(msg.ty, Type::Ack);
    assert_eq!(msg.code, Code::EMPTY);
    assert_eq!(msg.id, Id(0x1234));
    assert!(msg.token.is_empty());
  }

  #[test]
  fn ack_reuses_id() {
    let mut req = Message::new(Type::Con, Code::GET, Id(77), Token::opaque(&[1, 2]));
    req.set_path("a/b");

    let ack = req.ack();
    assert_eq!(ack.id, Id(77));
    assert_eq!(ack.ty, Type::Ack);
    assert_eq!(ack.code, Code::EMPTY);
    assert!(ack.token.is_empty());
    assert!(ack.opts.is_empty());
  }

  #[test]
  fn path_roundtrip() {
    let mut msg = Message::new(Type::Con, Code::GET, Id(1), Token(Default::default()));
    msg.set_path("sensors/temperature");
    assert_eq!(msg.path(), "sensors/temperature");
    assert_eq!(msg.get(known::URI_PATH).len(), 2);

    msg.set_path("lights");
    assert_eq!(msg.path(), "lights");
  }

  #[test]
  fn observe_roundtrip() {
    let mut msg = Message::new(Type::Non, Code::CONTENT, Id(1), Token(Default::default()));
    assert_eq!(msg.observe(), None);

    msg.set_observe(0);
    assert_eq!(msg.observe(), Some(0));
    assert_eq!(msg.observe_action(), Some(Action::Register));

    msg.set_observe(0x0100_0000 | 5);
    // only the low 24 bits are kept
    assert_eq!(msg.observe(), Some(5));
  }

  #[test]
  fn content_format_accessors() {
    let mut msg = Message::new(Type::Ack, Code::CONTENT, Id(1), Token(Default::default()));
    msg.set_content_format(ContentFormat::Json);
    msg.set_max_age(60);
    msg.set_etag(&[0xde, 0xad]);

    assert_eq!(msg.content_format(), Some(ContentFormat::Json));
    assert_eq!(msg.max_age(), Some(60));
    assert_eq!(msg.etags(), vec![vec![0xde, 0xad]]);
  }
}
