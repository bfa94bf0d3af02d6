//! gracht: a lightweight local-socket RPC runtime.
//!
//! A server listens on a Unix domain stream socket, a datagram socket, or
//! both; clients send request frames naming a `(protocol, action)` pair,
//! and registered handlers reply, push unsolicited events, or broadcast to
//! every client subscribed to a protocol. See [`server`] for the runtime
//! itself, [`envelope`] for what a handler receives and writes, and
//! [`control`] for the built-in subscribe/unsubscribe protocol every
//! client uses to opt into broadcasts.

mod client;
mod envelope;
mod handle;
mod registry;
mod sender;
mod subscription;
mod worker;

pub mod control;
pub mod error;
pub mod server;

pub use envelope::{Envelope, OutgoingBuffer};
pub use error::{GrachtError, GrachtResult};
pub use handle::{Handle, MessageId};
pub use gracht_link::ParamDescriptor;
pub use server::{Broadcaster, ConnectCallback, LinkConfig, Server, ServerConfig, init_default, shutdown_default, with_default};

pub use gracht_communication as communication;
pub use gracht_link as link;
pub use gracht_utils as utils;
pub use tracing;
