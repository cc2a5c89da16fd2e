use no_std_net::SocketAddr;

/// Data that came from (or is going to) a network socket
#[derive(PartialEq, PartialOrd, Eq, Ord, Hash, Debug, Clone, Copy)]
pub struct Addrd<T>(pub T, pub SocketAddr);

impl<T> Addrd<T> {
  /// Borrow the contents of this Addressed
  pub fn as_ref(&self) -> Addrd<&T> {
    Addrd(self.data(), self.addr())
  }

  /// Discard the socket and get the data in this Addressed
  pub fn unwrap(self) -> T {
    self.0
  }

  /// Map the data contained in this Addressed
  pub fn map<R>(self, f: impl FnOnce(T) -> R) -> Addrd<R> {
    Addrd(f(self.0), self.1)
  }

  /// Map the data contained in this Addressed (with a copy of the address)
  pub fn map_with_addr<R>(self, f: impl FnOnce(T, SocketAddr) -> R) -> Addrd<R> {
    Addrd(f(self.0, self.1), self.1)
  }

  /// Borrow the contents of the addressed item
  pub fn data(&self) -> &T {
    &self.0
  }

  /// Mutably borrow the contents of the addressed item
  pub fn data_mut(&mut self) -> &mut T {
    &mut self.0
  }

  /// Copy the socket address for the data
  pub fn addr(&self) -> SocketAddr {
    self.1
  }

  /// Turn the entire structure into something else
  pub fn fold<R>(self, f: impl FnOnce(T, SocketAddr) -> R) -> R {
    f(self.0, self.1)
  }
}

impl<T> AsMut<T> for Addrd<T> {
  fn as_mut(&mut self) -> &mut T {
    &mut self.0
  }
}

/// A CoAP network socket
///
/// This mirrors the UDP socket surface of `std::net::UdpSocket`, reduced to
/// the operations the endpoint needs and expressed non-blockingly with
/// [`nb`].
pub trait Socket: Sized {
  /// The error yielded by socket operations
  type Error: core::fmt::Debug;

  /// Bind the socket to a local address.
  ///
  /// Implementors should yield a socket in a non-blocking state.
  fn bind(addr: SocketAddr) -> Result<Self, Self::Error>;

  /// Send a datagram to a remote address
  fn send(&self, msg: Addrd<&[u8]>) -> nb::Result<(), Self::Error>;

  /// Pull a buffered datagram from the socket, along with the address of the
  /// sender.
  ///
  /// It is expected that (like [`std::net::UdpSocket`]) if the message is
  /// larger than the buffer, the excess bytes are dropped and not considered
  /// an error condition.
  fn recv(&self, buffer: &mut [u8]) -> nb::Result<Addrd<usize>, Self::Error>;

  /// Poll the socket for a datagram from any remote host.
  ///
  /// The default implementation receives into a buffer sized to the CoAP
  /// default message size (1152 bytes).
  fn poll(&self) -> Result<Option<Addrd<Vec<u8>>>, Self::Error> {
    let mut buf = vec![0u8; 1152];

    match self.recv(&mut buf) {
      | Ok(Addrd(n, addr)) => {
        buf.truncate(n);
        Ok(Some(Addrd(buf, addr)))
      },
      | Err(nb::Error::WouldBlock) => Ok(None),
      | Err(nb::Error::Other(e)) => Err(e),
    }
  }
}
