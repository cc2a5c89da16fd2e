/// # Version
///
/// The 2-bit `Ver` field of the message header. Always 1 for RFC 7252.
#[derive(Hash, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version(pub u8);

impl Default for Version {
  fn default() -> Self {
    Version(1)
  }
}
