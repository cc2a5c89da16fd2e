use super::OptNumber;

// RFC 7252 §12.2 Core CoAP Option Numbers, plus Observe (RFC 7641 §2)
#[allow(missing_docs)]
pub const IF_MATCH: OptNumber = OptNumber(1);
#[allow(missing_docs)]
pub const URI_HOST: OptNumber = OptNumber(3);
#[allow(missing_docs)]
pub const ETAG: OptNumber = OptNumber(4);
#[allow(missing_docs)]
pub const IF_NONE_MATCH: OptNumber = OptNumber(5);
#[allow(missing_docs)]
pub const OBSERVE: OptNumber = OptNumber(6);
#[allow(missing_docs)]
pub const URI_PORT: OptNumber = OptNumber(7);
#[allow(missing_docs)]
pub const LOCATION_PATH: OptNumber = OptNumber(8);
#[allow(missing_docs)]
pub const URI_PATH: OptNumber = OptNumber(11);
#[allow(missing_docs)]
pub const CONTENT_FORMAT: OptNumber = OptNumber(12);
#[allow(missing_docs)]
pub const MAX_AGE: OptNumber = OptNumber(14);
#[allow(missing_docs)]
pub const URI_QUERY: OptNumber = OptNumber(15);
#[allow(missing_docs)]
pub const ACCEPT: OptNumber = OptNumber(17);
#[allow(missing_docs)]
pub const LOCATION_QUERY: OptNumber = OptNumber(20);
#[allow(missing_docs)]
pub const PROXY_URI: OptNumber = OptNumber(35);
#[allow(missing_docs)]
pub const PROXY_SCHEME: OptNumber = OptNumber(39);
#[allow(missing_docs)]
pub const SIZE1: OptNumber = OptNumber(60);

/// The Observe option's register/deregister actions
pub mod observe {
  /// When included in a GET request, the Observe Option extends the GET
  /// method so it does not only retrieve a current representation of the
  /// target resource, but also requests the server to add or remove an
  /// entry in the list of observers of the resource depending on the
  /// option value. The list entry consists of the client endpoint and the
  /// token specified by the client in the request. Possible values are:
  ///
  ///    `0` (register) adds the entry to the list, if not present;
  ///
  ///    `1` (deregister) removes the entry from the list, if present
  #[derive(Hash, Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
  pub enum Action {
    /// Tells the resource owner we would like to observe updates to
    /// the resource we've issued a GET request for.
    Register,
    /// Tells the resource owner we would no longer like to observe updates
    /// to the resource we've issued a GET request for.
    Deregister,
  }

  impl Action {
    /// Try to parse from the option's uint value
    pub fn from_uint(n: u32) -> Option<Self> {
      match n {
        | 0 => Some(Action::Register),
        | 1 => Some(Action::Deregister),
        | _ => None,
      }
    }
  }

  impl From<Action> for u32 {
    fn from(a: Action) -> Self {
      match a {
        | Action::Register => 0,
        | Action::Deregister => 1,
      }
    }
  }
}

/// Content-Format (RFC 7252 §12.3)
#[non_exhaustive]
#[derive(Hash, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ContentFormat {
  /// `text/plain; charset=utf-8`
  Text,
  /// `application/link-format`
  LinkFormat,
  /// `application/xml`
  Xml,
  /// `application/octet-stream`
  OctetStream,
  /// `application/exi`
  Exi,
  /// `application/json`
  Json,
  /// Another content format
  Other(u16),
}

impl From<u16> for ContentFormat {
  fn from(n: u16) -> Self {
    use ContentFormat::*;
    match n {
      | 0 => Text,
      | 40 => LinkFormat,
      | 41 => Xml,
      | 42 => OctetStream,
      | 47 => Exi,
      | 50 => Json,
      | n => Other(n),
    }
  }
}

impl From<ContentFormat> for u16 {
  fn from(f: ContentFormat) -> Self {
    use ContentFormat::*;
    match f {
      | Text => 0,
      | LinkFormat => 40,
      | Xml => 41,
      | OctetStream => 42,
      | Exi => 47,
      | Json => 50,
      | Other(n) => n,
    }
  }
}
