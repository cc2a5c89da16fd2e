//! A small observable server.
//!
//! Serves the current uptime at `coap://localhost/uptime` and notifies
//! observers once a second.
//!
//! ```text
//! cargo run --example server
//! ```

use std::time::{Duration, Instant};

use eft::core::CoreEndpoint;
use eft::platform::Std;
use eft::resp::Resp;
use eft::step::Resource;
use eft::time::Millis;

#[derive(Debug)]
struct Uptime {
  started: Instant,
}

impl Resource for Uptime {
  fn serialize(&self, format: eft_msg::ContentFormat) -> Option<Vec<u8>> {
    match format {
      | eft_msg::ContentFormat::Text => {
        Some(format!("{}s", self.started.elapsed().as_secs()).into_bytes())
      },
      | _ => None,
    }
  }

  fn etag(&self, _: eft_msg::ContentFormat) -> Vec<u8> {
    self.started.elapsed().as_secs().to_be_bytes().to_vec()
  }

  fn max_age(&self) -> Millis {
    embedded_time::duration::Milliseconds(1_000)
  }
}

fn main() {
  simple_logger::init_with_level(log::Level::Debug).unwrap();

  let mut server =
    CoreEndpoint::<Std>::try_bind("0.0.0.0:5683".parse().unwrap(), Default::default()).unwrap();

  assert!(server.add_observable("uptime", Box::new(Uptime { started: Instant::now() }))
                .is_none());

  log::info!("serving coap://localhost:5683/uptime");

  let mut last_notified = Instant::now();

  loop {
    match server.poll_req() {
      | Ok(req) => {
        log::info!("{:?} {} from {}",
                   req.data().method(),
                   req.data().path(),
                   req.addr());

        let rep = match (req.data().path().as_str(), Resp::for_request(req.data())) {
          | ("uptime", Some(rep)) => {
            rep.with_payload(format!("{}s", last_notified.elapsed().as_secs()))
               .with_content_format(eft_msg::ContentFormat::Text)
          },
          | (_, Some(rep)) => rep.with_code(eft_msg::Code::NOT_FOUND),
          | (_, None) => continue,
        };

        let addr = req.addr();
        if let Err(e) = server.send_msg(eft::net::Addrd(rep.into(), addr)) {
          log::error!("failed to respond: {:?}", e);
        }
      },
      | Err(nb::Error::WouldBlock) => (),
      | Err(nb::Error::Other(e)) => log::error!("poll error: {:?}", e),
    }

    if last_notified.elapsed() >= Duration::from_secs(1) {
      last_notified = Instant::now();
      server.notify("uptime").ok();
    }

    std::thread::sleep(Duration::from_millis(10));
  }
}
