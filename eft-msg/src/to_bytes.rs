use tinyvec::ArrayVec;

use crate::*;

/// Trait allowing fallible conversion into bytes
pub trait TryIntoBytes {
  /// Error yielded when serialization fails
  type Error;

  /// Try to convert into a collection of bytes
  ///
  /// ```
  /// use eft_msg::{Code, Id, Message, Token, TryIntoBytes, Type};
  ///
  /// let msg = Message::new(Type::Con, Code::GET, Id(1), Token(Default::default()));
  /// let bytes: Vec<u8> = msg.try_into_bytes().unwrap();
  /// ```
  fn try_into_bytes(self) -> Result<Vec<u8>, Self::Error>;
}

/// Errors encounterable serializing to bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MessageToBytesError {}

impl TryIntoBytes for Message {
  type Error = MessageToBytesError;

  fn try_into_bytes(self) -> Result<Vec<u8>, Self::Error> {
    let mut bytes = Vec::with_capacity(self.size());

    let byte1: u8 = Byte1 { tkl: self.token.len() as u8,
                            ver: self.ver,
                            ty: self.ty }.into();
    let code: u8 = self.code.into();
    let id: [u8; 2] = self.id.into();

    bytes.push(byte1);
    bytes.push(code);
    bytes.extend(id);
    bytes.extend(self.token.0);

    extend_opts_bytes(&self.opts, &mut bytes);

    if !self.payload.0.is_empty() {
      bytes.push(0b11111111);
      bytes.extend(self.payload.0);
    }

    Ok(bytes)
  }
}

pub(crate) fn opt_len_or_delta(val: u16) -> (u8, Option<ArrayVec<[u8; 2]>>) {
  match val {
    | n if n >= 269 => {
      let mut bytes = ArrayVec::new();
      bytes.extend((n - 269).to_be_bytes());
      (14, Some(bytes))
    },
    | n if n >= 13 => {
      let mut bytes = ArrayVec::new();
      bytes.push((n as u8) - 13);
      (13, Some(bytes))
    },
    | n => (n as u8, None),
  }
}

/// Append the delta-encoded option bytes for an [`OptionMap`] to `bytes`
pub(crate) fn extend_opts_bytes(opts: &OptionMap, bytes: &mut Vec<u8>) {
  let mut prev = 0u32;

  for (num, values) in opts.iter() {
    for (ix, value) in values.iter().enumerate() {
      // repeated occurrences after the first have delta 0
      let delta = if ix == 0 { (num.0 - prev) as u16 } else { 0 };

      let (del, del_bytes) = opt_len_or_delta(delta);
      let (len, len_bytes) = opt_len_or_delta(value.0.len() as u16);

      bytes.push(del << 4 | len);

      if let Some(bs) = del_bytes {
        bytes.extend(bs);
      }

      if let Some(bs) = len_bytes {
        bytes.extend(bs);
      }

      bytes.extend(value.0.iter().copied());
    }

    prev = num.0;
  }
}

pub(crate) fn opts_size(opts: &OptionMap) -> usize {
  let mut prev = 0u32;
  let mut size = 0usize;

  for (num, values) in opts.iter() {
    for (ix, value) in values.iter().enumerate() {
      let delta = if ix == 0 { num.0 - prev } else { 0 };

      let ext = |n: u32| match n {
        | n if n >= 269 => 2,
        | n if n >= 13 => 1,
        | _ => 0,
      };

      size += 1 + ext(delta) + ext(value.0.len() as u32) + value.0.len();
    }

    prev = num.0;
  }

  size
}

impl From<Byte1> for u8 {
  fn from(b: Byte1) -> u8 {
    let ver = b.ver.0 << 6;
    let ty = u8::from(b.ty) << 4;
    let tkl = b.tkl;

    ver | ty | tkl
  }
}
