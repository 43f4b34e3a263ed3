//! Debug Adapter Protocol (DAP) implementation
//!
//! This module implements the adapter side of DAP: framing, the message
//! types exchanged with a client, and the outgoing message channel.

pub mod codec;
pub mod transport;
pub mod types;

pub use transport::{Outbox, OutgoingMessage};
pub use types::*;
