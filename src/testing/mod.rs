//! Test support
//!
//! A scripted backend that stands in for a real JVM, and an in-memory
//! protocol client that drives the adapter over the real wire format.

pub mod client;
pub mod mock;

pub use client::TestClient;
pub use mock::{MockBackend, MockDebuggee, MockFrame, MockThread, MockVariable};
