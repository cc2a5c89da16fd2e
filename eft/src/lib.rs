//! `eft` is a Rust CoAP endpoint runtime that aims to be:
//! - Deterministic
//! - Extensible
//! - Approachable
//!
//! ## CoAP
//! CoAP is an application-level network protocol that copies the semantics of
//! HTTP to an environment conducive to **constrained** devices (weak hardware,
//! small battery capacity, etc.).
//!
//! CoAP customarily sits on top of UDP, which offers no delivery guarantees.
//! `eft` implements the message-exchange layer that makes conversations over
//! that substrate dependable: retransmission of Confirmable messages with
//! exponential backoff, duplicate suppression of inbound traffic, token-based
//! request/response correlation, and the Observe notification machinery of
//! RFC 7641.
//!
//! ## Architecture
//! The runtime is broken into discrete [`step`](crate::step)s that are mostly
//! deterministic and therefore highly testable.
//!
//! Steps are expressed as types that impl a [`Step`](crate::step::Step) trait
//! which defines 2 flows: "poll for a request" and "poll for a response to a
//! request I sent", plus hooks that fire around message transmission.
//!
//! Steps are parameterized by the step that came before them, so the entire
//! runtime transparently describes what happens when a message is received,
//! and layers can be swapped or added at the end without forking `eft`.
//!
//! Steps communicate IO they would like performed (sends, logs, transfer
//! lifecycle events) by pushing [`Effect`](crate::platform::Effect)s, which
//! the [`Endpoint`](crate::core::Endpoint) executes once the pipeline has run.

// style
#![allow(clippy::unused_unit)]
// deny
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![cfg_attr(not(test), deny(unsafe_code))]
// warnings
#![cfg_attr(not(test), warn(unreachable_pub))]

pub(crate) mod logging;


/// customizable retrying of fallible operations
pub mod retry;

/// responses
pub mod resp;

/// requests
pub mod req;

/// the endpoint runtime (the message router)
pub mod core;

/// message-exchange lifecycle events
pub mod event;

/// the CoAP runtime, broken into discrete steps
pub mod step;

/// platform configuration
pub mod platform;

/// network abstractions
pub mod net;

/// time abstractions
pub mod time;

/// configuring runtime behavior
pub mod config;

/// `std` implementations of the platform abstractions
pub mod std;
