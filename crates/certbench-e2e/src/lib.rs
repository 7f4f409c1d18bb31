//! End-to-end test utilities for certbench
//!
//! Runs the certificate trust scenarios against a real `openssl s_server`.
//! Tests obtain a [`Harness`] and return early when no openssl binary can be
//! executed.

pub mod harness;
pub mod test_client;

pub use harness::{init_test, Harness, TestServer};
pub use test_client::TestClient;
