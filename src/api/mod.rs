//! Purpose: Define the public Rust API boundary for aristream.
//! Exports: Reactor, connection, request builder, and error types.
//! Role: Public, additive-only surface; hides internal core modules.
//! Invariants: This module is the only public path to connection primitives.
//! Invariants: Internal modules remain private and are not directly exposed.

mod connection;
mod request;

pub use crate::core::endpoint::Endpoint;
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::reactor::{Reactor, ReactorHandle};
pub use connection::{ConnectHandler, ConnectionState, ReceiveHandler, StreamConnection};
pub use request::{EVENTS_PATH, EventsRequest};
