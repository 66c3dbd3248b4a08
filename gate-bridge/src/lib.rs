//! HBCE Bridge
//!
//! Transports and operator surface around [`gate_core`]: the HTTP push
//! endpoint with status and audit routes, and the pointer-following poller.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]

pub mod http;
pub mod poll;
pub mod telemetry;

pub use http::router;
pub use poll::Poller;
