//! Debug adapter core
//!
//! The [`DapServer`] reads requests from a client and hands them to the
//! [`Adapter`], which owns one [`Session`] and drives a debug [`Backend`].
//!
//! [`Backend`]: crate::backend::Backend

pub mod breakpoints;
pub mod context;
pub mod converter;
pub mod executor;
pub mod handler;
pub mod output;
pub mod pool;
pub mod server;
pub mod session;
pub mod settings;

pub use handler::{Adapter, Flow};
pub use server::DapServer;
pub use session::{Session, SessionState};
