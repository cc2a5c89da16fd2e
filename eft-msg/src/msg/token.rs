use tinyvec::ArrayVec;

/// # Token
///
/// 0 to 8 opaque bytes used to correlate responses (and later Observe
/// notifications) with the request that caused them, scoped to an endpoint
/// pair.
#[derive(Default, Hash, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Token(pub ArrayVec<[u8; 8]>);

impl Token {
  /// Create a Token from opaque bytes.
  ///
  /// Bytes beyond the 8-byte wire maximum are discarded.
  pub fn opaque(data: &[u8]) -> Self {
    Self(data.iter().copied().take(8).collect())
  }

  /// Number of bytes in the token
  pub fn len(&self) -> usize {
    self.0.len()
  }

  /// The zero-length token (used by empty messages)
  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}
