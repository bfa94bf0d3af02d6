//! Transport duplex and wire framing for the gracht runtime: Unix domain
//! stream and datagram sockets, a thin `mio` reactor wrapper, and the
//! frame codec described in the crate's wire format.

pub mod datagram;
pub mod error;
pub mod frame;
pub mod reactor;
pub mod stream;

pub use datagram::{DatagramEnvelope, DatagramLink};
pub use error::{LinkError, LinkResult};
pub use frame::{DESCRIPTOR_SIZE, FrameHeader, HEADER_SIZE, ParamDescriptor, encode_frame};
pub use reactor::{Reactor, ReactorEvent, ShutdownHandle};
pub use stream::{Link, ReadOutcome, StreamListener};
