//! Low-level representation of CoAP messages.
//!
//! The most notable item in `eft_msg` is [`Message`];
//! a CoAP message very close to the actual byte layout.
//!
//! A [`Message`] stores its payload as a `Vec<u8>` and its options as an
//! ordered multimap from [`OptNumber`] to the option's occurrences. Ascending
//! option-number order (which the wire format's delta encoding demands) falls
//! directly out of the map.
//!
//! Messages support serializing to and parsing from the RFC 7252 §3 binary
//! format via [`TryIntoBytes`] and [`TryFromBytes`].

#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![cfg_attr(not(test), deny(unsafe_code))]

#[doc(hidden)]
pub mod from_bytes;

/// Message structs
pub mod msg;

#[doc(hidden)]
pub mod to_bytes;

#[doc(inline)]
pub use from_bytes::TryFromBytes;
#[doc(inline)]
pub use msg::*;
#[doc(inline)]
pub use to_bytes::TryIntoBytes;

#[cfg(test)]
pub(crate) fn test_msg() -> (Message, Vec<u8>) {
  let header: [u8; 4] = 0b0100_0001_0100_0101_0000_0000_0000_0001_u32.to_be_bytes();
  let token: [u8; 1] = [254u8];
  let content_format: &[u8] = b"application/json";
  let options: [&[u8]; 2] = [&[0b_1100_1101u8, 0b00000011u8], content_format];
  let payload: [&[u8]; 2] = [&[0b1111_1111_u8], b"hello, world!"];
  let bytes = [header.as_ref(),
               token.as_ref(),
               options.concat().as_ref(),
               payload.concat().as_ref()].concat();

  let mut msg = Message::new(Type::Con,
                             Code { class: 2,
                                    detail: 5 },
                             Id(1),
                             Token(tinyvec::array_vec!([u8; 8] => 254)));
  msg.add(OptNumber(12), OptValue(content_format.to_vec()));
  msg.payload = Payload(b"hello, world!".to_vec());

  (msg, bytes)
}
