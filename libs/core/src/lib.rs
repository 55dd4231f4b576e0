//! Membrane core contracts and value types.
//!
//! This crate holds the normalized request and response shapes exchanged between the
//! gateway and the capability handlers, the handler traits themselves, and an HTTP
//! implementation of those traits that forwards to an application worker.
pub mod handler;
#[cfg(any(test, feature = "testkit"))]
pub mod testkit;
pub mod types;
pub mod worker;

pub use handler::*;
pub use types::*;
pub use worker::*;
