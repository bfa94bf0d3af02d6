use std::{io, path::PathBuf};

use mio::{Interest, Registry, Token, net::UnixDatagram};

use crate::{
    error::{LinkError, LinkResult},
    frame::{FrameHeader, HEADER_SIZE},
};

/// One datagram, fully received in a single `recv_from` call.
/// Framing on receive (datagram) is atomic: either a whole frame plus its
/// sender's bound path comes back, or nothing does.
pub struct DatagramEnvelope {
    pub header: FrameHeader,
    pub body: Vec<u8>,
    /// The peer's bound socket path, present only if it called `bind`
    /// before sending. `respond`/`create_client` need this to reply;
    /// a peer that never bound can send but not be replied to.
    pub sender: Option<PathBuf>,
}

/// Unix datagram endpoint wrapping one `mio::net::UnixDatagram`. Unlike the
/// stream side there is no per-client connection state here: every
/// receive carries its own sender address, and first-seen peers are
/// promoted to a client record by the caller via `create_client`.
pub struct DatagramLink {
    socket: UnixDatagram,
    token: Token,
    recv_buf: Vec<u8>,
}

impl DatagramLink {
    pub fn new(socket: UnixDatagram, token: Token, max_message_size: u32) -> Self {
        Self { socket, token, recv_buf: vec![0; max_message_size as usize] }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn register(&mut self, registry: &Registry) -> io::Result<()> {
        registry.register(&mut self.socket, self.token, Interest::READABLE)
    }

    /// Receives one datagram. Returns `NoData` (mapped from the spec's
    /// `NO_DATA`) when fewer than `HEADER_SIZE` bytes arrived, which can
    /// happen with a malformed or empty send from a peer.
    pub fn recv_packet(&mut self, max_message_size: u32) -> LinkResult<DatagramEnvelope> {
        loop {
            match self.socket.recv_from(&mut self.recv_buf) {
                Ok((n, sender)) => {
                    if n < HEADER_SIZE {
                        return Err(LinkError::NoData);
                    }
                    let header_bytes: [u8; HEADER_SIZE] = self.recv_buf[..HEADER_SIZE].try_into().unwrap();
                    let header = FrameHeader::decode(&header_bytes);
                    header.validate(max_message_size)?;
                    if header.length as usize != n {
                        return Err(LinkError::BrokenFrame("datagram length does not match header"));
                    }
                    let sender = sender.as_pathname().map(PathBuf::from);
                    let body = self.recv_buf[HEADER_SIZE..n].to_vec();
                    return Ok(DatagramEnvelope { header, body, sender });
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Err(LinkError::NoData),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(LinkError::Io(err)),
            }
        }
    }

    /// Sends a pre-encoded frame to a peer's bound path. A short write is
    /// impossible for `SOCK_DGRAM` (the kernel's own atomicity guarantee);
    /// a full send failure is surfaced as an I/O error.
    pub fn send_to(&self, frame: &[u8], target: &std::path::Path) -> LinkResult<()> {
        self.socket.send_to(frame, target)?;
        Ok(())
    }

    pub fn close(&mut self, registry: &Registry) {
        let _ = registry.deregister(&mut self.socket);
    }
}
