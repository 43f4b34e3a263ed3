//! JVM Debug Adapter - a Debug Adapter Protocol server for JVM programs
//!
//! This library turns a stateful debug backend into the stateless
//! request/response/event model of the Debug Adapter Protocol: it mints and
//! evicts the integer handles clients use for frames, variables and
//! exceptions, reconciles breakpoints, and forwards backend events.

pub mod adapter;
pub mod backend;
pub mod common;
pub mod dap;
pub mod testing;

// Re-export commonly used types for tests
pub use adapter::DapServer;
pub use common::{Error, Result};
