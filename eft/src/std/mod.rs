#![allow(clippy::many_single_char_names)]

use ::std::io;
use ::std::net::UdpSocket;

use embedded_time::rate::Fraction;

use crate::net::{Addrd, Socket};

/// no_std-net <-> std::net address conversions
pub mod convert;

use convert::{io_to_nb, to_no_std, to_std};

/// Implement [`embedded_time::Clock`] using [`std::time`] primitives
#[derive(Debug, Clone, Copy)]
pub struct Clock(::std::time::Instant);

impl Default for Clock {
  fn default() -> Self {
    Self::new()
  }
}

impl Clock {
  /// Create a new clock
  pub fn new() -> Self {
    Self(::std::time::Instant::now())
  }
}

impl embedded_time::Clock for Clock {
  type T = u64;

  // microseconds
  const SCALING_FACTOR: Fraction = Fraction::new(1, 1_000_000);

  fn try_now(&self) -> Result<embedded_time::Instant<Self>, embedded_time::clock::Error> {
    let now = ::std::time::Instant::now();
    let elapsed = now.duration_since(self.0);
    Ok(embedded_time::Instant::new(elapsed.as_micros() as u64))
  }
}

impl Socket for UdpSocket {
  type Error = io::Error;

  fn bind(addr: no_std_net::SocketAddr) -> Result<Self, Self::Error> {
    let sock = UdpSocket::bind(to_std(addr))?;
    sock.set_nonblocking(true)?;
    Ok(sock)
  }

  fn send(&self, msg: Addrd<&[u8]>) -> nb::Result<(), Self::Error> {
    self.send_to(msg.data(), to_std(msg.addr()))
        .map(|_| ())
        .map_err(io_to_nb)
  }

  fn recv(&self, buffer: &mut [u8]) -> nb::Result<Addrd<usize>, Self::Error> {
    self.recv_from(buffer)
        .map(|(n, addr)| Addrd(n, to_no_std(addr)))
        .map_err(io_to_nb)
  }
}
