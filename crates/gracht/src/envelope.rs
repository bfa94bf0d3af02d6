use gracht_communication::ArenaSlot;
use gracht_link::{FrameHeader, ParamDescriptor, encode_frame};

use crate::{error::GrachtResult, handle::Handle};

/// Backing storage for a received frame: either a move-only [`ArenaSlot`]
/// in multi-threaded dispatch mode, or a plain owned buffer copied out of
/// the single persistent receive buffer in single-threaded mode (the
/// static buffer itself is reused immediately after the inline handler
/// returns, so the envelope can't borrow from it).
enum Body {
    Arena(ArenaSlot),
    Owned(Box<[u8]>),
}

impl Body {
    fn as_slice(&self) -> &[u8] {
        match self {
            Self::Arena(slot) => slot.as_slice(),
            Self::Owned(buf) => buf,
        }
    }
}

/// A received message plus the metadata the dispatcher and handlers need:
/// the originating client, the decoded header/descriptor table, and a
/// cursor handlers advance as they walk the payload.
///
/// Ownership of the backing bytes moves with the envelope: built by the
/// receive path, handed to exactly one consumer (an inline handler call or
/// a worker-pool entry), and dropped by that consumer — which, for the
/// arena-backed case, is the single point where the slot returns to the
/// free list (see [`ArenaSlot`]'s `Drop`).
pub struct Envelope {
    pub client: Handle,
    header: FrameHeader,
    descriptors: Vec<ParamDescriptor>,
    body: Body,
    index: usize,
}

impl Envelope {
    pub(crate) fn from_arena(client: Handle, header: FrameHeader, descriptors: Vec<ParamDescriptor>, slot: ArenaSlot) -> Self {
        let payload_start = gracht_link::HEADER_SIZE + descriptors.len() * gracht_link::DESCRIPTOR_SIZE;
        Self { client, header, descriptors, body: Body::Arena(slot), index: payload_start }
    }

    pub(crate) fn from_owned(client: Handle, header: FrameHeader, descriptors: Vec<ParamDescriptor>, bytes: Box<[u8]>) -> Self {
        let payload_start = gracht_link::HEADER_SIZE + descriptors.len() * gracht_link::DESCRIPTOR_SIZE;
        Self { client, header, descriptors, body: Body::Owned(bytes), index: payload_start }
    }

    pub const fn message_id(&self) -> u32 {
        self.header.message_id
    }

    pub const fn protocol(&self) -> u8 {
        self.header.protocol
    }

    pub const fn action(&self) -> u8 {
        self.header.action
    }

    pub fn descriptors(&self) -> &[ParamDescriptor] {
        &self.descriptors
    }

    /// The full body (descriptor table + payload), following the 12-byte
    /// header.
    pub fn body(&self) -> &[u8] {
        &self.body.as_slice()[gracht_link::HEADER_SIZE..]
    }

    /// The unread remainder of the payload, starting after the header and
    /// descriptor table plus whatever the handler has already consumed via
    /// [`Envelope::advance`].
    pub fn payload(&self) -> &[u8] {
        &self.body.as_slice()[self.index..]
    }

    /// Advances the payload cursor by `n` bytes, clamped to the frame's
    /// total length.
    pub fn advance(&mut self, n: usize) {
        self.index = (self.index + n).min(self.body.as_slice().len());
    }
}

/// Destination for a handler's response, backed by whichever buffer the
/// current dispatch mode provides: the single persistent send buffer in
/// single-threaded mode, or the calling worker's own scratchpad in
/// multi-threaded mode (kept distinct from the inbound arena slot so a
/// worker can read its request while composing the reply).
pub struct OutgoingBuffer<'a> {
    buf: &'a mut Vec<u8>,
    max_message_size: u32,
}

impl<'a> OutgoingBuffer<'a> {
    pub(crate) fn new(buf: &'a mut Vec<u8>, max_message_size: u32) -> Self {
        buf.clear();
        Self { buf, max_message_size }
    }

    /// Encodes a response frame into the provided buffer. Per the server's
    /// id convention: pass the request's `message_id` for a direct reply,
    /// or `0` for an unsolicited server-originated event.
    pub fn encode(
        &mut self,
        message_id: u32,
        protocol: u8,
        action: u8,
        descriptors: &[ParamDescriptor],
        buffers: &[&[u8]],
    ) -> GrachtResult<()> {
        let header = FrameHeader {
            message_id,
            length: 0,
            protocol,
            action,
            param_in: 0,
            param_out: descriptors.len() as u8,
        };
        encode_frame(header, descriptors, buffers, self.max_message_size, self.buf)?;
        Ok(())
    }

    pub(crate) fn encoded(&self) -> Option<&[u8]> {
        if self.buf.is_empty() { None } else { Some(self.buf) }
    }
}
