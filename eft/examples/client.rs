//! GET a resource from a CoAP server, then observe it.
//!
//! ```text
//! cargo run --example client -- coap://localhost/uptime
//! ```

use std::time::Duration;

use eft::core::CoreEndpoint;
use eft::platform::Std;
use eft::req::Req;

fn main() {
  simple_logger::init_with_level(log::Level::Info).unwrap();

  let server = "127.0.0.1:5683".parse().unwrap();
  let mut client =
    CoreEndpoint::<Std>::try_bind("0.0.0.0:0".parse().unwrap(), Default::default()).unwrap();

  let (_, token) = nb::block!(client.send_req(Req::get("uptime").observing(), server)).unwrap();

  loop {
    match client.poll_resp(token, server) {
      | Ok(rep) => {
        log::info!("{} (observe: {:?}): {}",
                   rep.data().code(),
                   rep.data().observe(),
                   rep.data().payload_str().unwrap_or("<binary>"));
      },
      | Err(nb::Error::WouldBlock) => (),
      | Err(nb::Error::Other(e)) => {
        log::error!("request failed: {:?}", e);
        break;
      },
    }

    std::thread::sleep(Duration::from_millis(10));
  }
}
