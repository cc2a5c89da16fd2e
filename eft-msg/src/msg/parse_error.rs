/// Errors that can occur during parsing a CoAP message from bytes
#[derive(Hash, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MessageParseError {
  /// Ran out of bytes before expected
  UnexpectedEndOfStream,
  /// The version field was not 1
  InvalidVersion(u8),
  /// The type field was out of range (unreachable for 2-bit input)
  InvalidType(u8),
  /// Token length was > 8
  InvalidTokenLength(u8),
  /// An empty message (code 0.00) carried a token, options or payload
  DataOnEmptyMessage,
  /// Error parsing the message's options
  OptParseError(OptParseError),
}

impl MessageParseError {
  /// Shorthand for [`MessageParseError::UnexpectedEndOfStream`]
  pub fn eof() -> Self {
    Self::UnexpectedEndOfStream
  }
}

/// Errors that can occur during parsing an option from bytes
#[derive(Hash, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OptParseError {
  /// Ran out of bytes before expected
  UnexpectedEndOfStream,
  /// The option delta nibble was the reserved value 15
  OptionDeltaReservedValue(u8),
  /// The value length nibble was the reserved value 15
  ValueLengthReservedValue(u8),
}

impl OptParseError {
  /// Shorthand for [`OptParseError::UnexpectedEndOfStream`]
  pub fn eof() -> Self {
    Self::UnexpectedEndOfStream
  }
}
