use crate::parse_error::MessageParseError;

/// # Message Type
///
/// The 2-bit `T` field of the message header.
///
/// |type|meaning|
/// |---|---|
/// |[`Con`](Type::Con)|reliable; will be retransmitted until Acknowledged, Reset, or abandoned|
/// |[`Non`](Type::Non)|fire-and-forget|
/// |[`Ack`](Type::Ack)|acknowledges a Con, possibly carrying a piggybacked response|
/// |[`Reset`](Type::Reset)|the received message could not be processed|
#[derive(Hash, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Type {
  #[allow(missing_docs)]
  Con,
  #[allow(missing_docs)]
  Non,
  #[allow(missing_docs)]
  Ack,
  #[allow(missing_docs)]
  Reset,
}

impl TryFrom<u8> for Type {
  type Error = MessageParseError;

  fn try_from(b: u8) -> Result<Self, Self::Error> {
    match b {
      | 0 => Ok(Type::Con),
      | 1 => Ok(Type::Non),
      | 2 => Ok(Type::Ack),
      | 3 => Ok(Type::Reset),
      | _ => Err(MessageParseError::InvalidType(b)),
    }
  }
}

impl From<Type> for u8 {
  fn from(t: Type) -> u8 {
    use Type::*;
    match t {
      | Con => 0,
      | Non => 1,
      | Ack => 2,
      | Reset => 3,
    }
  }
}
