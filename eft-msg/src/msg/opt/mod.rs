use std::collections::BTreeMap;

use crate::from_bytes::Cursor;
use crate::parse_error::OptParseError;

/// Known option numbers, the Observe option's register/deregister actions,
/// and Content-Format values
pub mod known;

/// Map from option number to that option's occurrences, in ascending
/// number order.
///
/// Repeatable options (e.g. Uri-Path, ETag in requests) simply have more
/// than one value in their slot.
pub type OptionMap = BTreeMap<OptNumber, Vec<OptValue>>;

/// # Option Number
///
/// Identifies which option is being set (e.g. Content-Format is number 12).
///
/// On the wire, numbers are delta-encoded: each option stores the difference
/// between its number and the previous option's number.
#[derive(Default, Hash, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct OptNumber(pub u32);

/// Whether an option must be processed by the receiving endpoint
/// (RFC 7252 §5.4.1)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum OptionMustBeProcessed {
  /// A message carrying this option unrecognized will be rejected.
  ///
  /// Corresponds to the option being "critical" in strict CoAP terms
  Yes,
  /// This option may be silently ignored when unrecognized.
  ///
  /// Corresponds to the option being "elective" in strict CoAP terms
  No,
}

impl OptNumber {
  /// Whether or not this option may be ignored when unrecognized
  pub fn must_be_processed(&self) -> OptionMustBeProcessed {
    match self.0 & 0b1 {
      | 1 => OptionMustBeProcessed::Yes,
      | _ => OptionMustBeProcessed::No,
    }
  }

  /// Whether this option is unsafe to forward by a proxy that does not
  /// understand it (RFC 7252 §5.4.2)
  pub fn unsafe_to_forward(&self) -> bool {
    (self.0 & 0b10) >> 1 == 1
  }

  /// Whether this option is excluded from a proxy's cache key
  /// (RFC 7252 §5.4.2)
  pub fn no_cache_key(&self) -> bool {
    (self.0 & 0b11100) >> 2 == 0b111
  }
}

/// # Option Value
///
/// The raw bytes of an option occurrence (RFC 7252 §3.2).
#[derive(Default, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct OptValue(pub Vec<u8>);

impl OptValue {
  /// Encode an unsigned integer option value
  /// (minimal-length big-endian; zero is the empty value)
  pub fn uint(n: u32) -> Self {
    let bytes = n.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    Self(bytes[skip..].to_vec())
  }

  /// Decode this value as an unsigned integer.
  ///
  /// Values longer than 4 bytes yield `None`.
  pub fn as_uint(&self) -> Option<u32> {
    if self.0.len() > 4 {
      return None;
    }

    Some(self.0.iter().fold(0u32, |n, b| (n << 8) | *b as u32))
  }

  /// Borrow the value bytes as a utf8 string, if they are one
  pub fn as_str(&self) -> Option<&str> {
    core::str::from_utf8(&self.0).ok()
  }
}

impl<'a> From<&'a str> for OptValue {
  fn from(s: &'a str) -> Self {
    Self(s.as_bytes().to_vec())
  }
}

pub(crate) fn parse_opt_len_or_delta(head: u8,
                                     bytes: &mut Cursor,
                                     reserved_err: OptParseError)
                                     -> Result<u16, OptParseError> {
  match head {
    | 13 => {
      let n = bytes.next().ok_or_else(OptParseError::eof)?;
      Ok((n as u16) + 13)
    },
    | 14 => match bytes.take_exact(2) {
      | Some(&[a, b]) => Ok(u16::from_be_bytes([a, b]) + 269),
      | _ => Err(OptParseError::eof()),
    },
    | 15 => Err(reserved_err),
    | _ => Ok(head as u16),
  }
}

/// Parse options until the payload marker (`0xFF`) or the end of the
/// stream. The payload marker, when present, is consumed.
pub(crate) fn try_consume_opts(bytes: &mut Cursor) -> Result<OptionMap, OptParseError> {
  let mut opts = OptionMap::new();
  let mut number = 0u32;

  loop {
    if bytes.is_exhausted() {
      break Ok(opts);
    }

    let byte1 = match bytes.next() {
      | Some(0b11111111) | None => break Ok(opts),
      | Some(b) => b,
    };

    let delta = parse_opt_len_or_delta(byte1 >> 4,
                                       bytes,
                                       OptParseError::OptionDeltaReservedValue(15))?;

    let len = parse_opt_len_or_delta(byte1 & 0b00001111,
                                     bytes,
                                     OptParseError::ValueLengthReservedValue(15))?
              as usize;

    number += delta as u32;

    let value = bytes.take_exact(len).ok_or_else(OptParseError::eof)?;

    opts.entry(OptNumber(number))
        .or_default()
        .push(OptValue(value.to_vec()));
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse(bytes: &[u8]) -> OptionMap {
    try_consume_opts(&mut Cursor::new(bytes)).unwrap()
  }

  #[test]
  fn parse_opt() {
    let opts = parse(&[0b00010001, 0b00000001]);
    assert_eq!(opts[&OptNumber(1)], vec![OptValue(vec![1])]);

    let opts = parse(&[0b11010001, 0b00000001, 0b00000001]);
    assert_eq!(opts[&OptNumber(14)], vec![OptValue(vec![1])]);

    let opts = parse(&[0b11100001, 0b00000000, 0b00000001, 0b00000001]);
    assert_eq!(opts[&OptNumber(270)], vec![OptValue(vec![1])]);
  }

  #[test]
  fn parse_repeated_opt() {
    // two occurrences of option 11, then option 12
    let opts = parse(&[0b10110001, 1, 0b00000001, 2, 0b00010001, 3]);
    assert_eq!(opts[&OptNumber(11)],
               vec![OptValue(vec![1]), OptValue(vec![2])]);
    assert_eq!(opts[&OptNumber(12)], vec![OptValue(vec![3])]);
  }

  #[test]
  fn parse_stops_at_payload_marker() {
    let opts = parse(&[0b00010001, 1, 0b11111111, 9, 9, 9]);
    assert_eq!(opts.len(), 1);
  }

  #[test]
  fn parse_reserved_nibble_errors() {
    let res = try_consume_opts(&mut Cursor::new(&[0b11110001, 1]));
    assert_eq!(res, Err(OptParseError::OptionDeltaReservedValue(15)));
  }

  #[test]
  fn uint_values() {
    assert_eq!(OptValue::uint(0), OptValue(vec![]));
    assert_eq!(OptValue::uint(60), OptValue(vec![60]));
    assert_eq!(OptValue::uint(0x0203), OptValue(vec![2, 3]));
    assert_eq!(OptValue::uint(0x0203).as_uint(), Some(0x0203));
    assert_eq!(OptValue(vec![]).as_uint(), Some(0));
    assert_eq!(OptValue(vec![1, 2, 3, 4, 5]).as_uint(), None);
  }

  #[test]
  fn opt_number_qualities() {
    // critical, safe-to-fwd, cache-key
    let if_match = OptNumber(1);

    // critical, unsafe-to-fwd, cache-key
    let uri_host = OptNumber(3);

    // elective, safe-to-fwd, cache-key
    let etag = OptNumber(4);

    // elective, safe-to-fwd, no-cache-key
    let size1 = OptNumber(60);

    assert_eq!(if_match.must_be_processed(), OptionMustBeProcessed::Yes);
    assert_eq!(uri_host.must_be_processed(), OptionMustBeProcessed::Yes);
    assert_eq!(etag.must_be_processed(), OptionMustBeProcessed::No);
    assert_eq!(size1.must_be_processed(), OptionMustBeProcessed::No);

    assert!(uri_host.unsafe_to_forward());
    assert!(!etag.unsafe_to_forward());

    assert!(size1.no_cache_key());
    assert!(!etag.no_cache_key());
  }
}
