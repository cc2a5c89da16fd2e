/// # Message ID
///
/// 16-bit unsigned integer in network byte order, used to detect message
/// duplication and to match Acknowledgement / Reset messages to the
/// Confirmable / Non-confirmable message they belong to.
///
/// Message IDs are scoped to an endpoint pair; the same value may be in use
/// concurrently in conversations with different remotes.
#[derive(Default, Hash, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Id(pub u16);

impl Id {
  /// Parse an Id from 2 big-endian bytes
  pub fn from_be_bytes(bytes: [u8; 2]) -> Self {
    Self(u16::from_be_bytes(bytes))
  }
}

impl From<Id> for [u8; 2] {
  fn from(id: Id) -> [u8; 2] {
    id.0.to_be_bytes()
  }
}
