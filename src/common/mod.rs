//! Common utilities shared by the protocol, backend and adapter layers

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, HandleKind, Result};
