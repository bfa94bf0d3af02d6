use std::{
    io::{self, Read},
    path::Path,
};

use mio::{Interest, Registry, Token, net::{UnixListener, UnixStream}};
use tracing::{debug, info};

use crate::frame::{FrameHeader, HEADER_SIZE};

/// Listening endpoint for `SOCK_STREAM` clients. Binds a Unix domain socket
/// and hands back newly accepted peers as plain `mio::net::UnixStream`s —
/// the caller wraps each one in [`Link`] and a fresh [`Token`] of its own
/// choosing, since only the server core knows the next free connection
/// handle.
pub struct StreamListener {
    listener: UnixListener,
    token: Token,
}

impl StreamListener {
    /// Binds and registers a new stream listener at `path`, removing any
    /// stale socket file left behind by a previous run first (matching the
    /// teacher's `listen_at`, which treats a dead bind address as something
    /// to clean up rather than fail on).
    pub fn bind(path: &Path, registry: &Registry, token: Token) -> io::Result<Self> {
        if path.exists() {
            let _ = std::fs::remove_file(path);
        }
        let mut listener = UnixListener::bind(path)?;
        registry.register(&mut listener, token, Interest::READABLE)?;
        info!(?path, "gracht-link: stream listener bound");
        Ok(Self { listener, token })
    }

    pub fn token(&self) -> Token {
        self.token
    }

    /// Accepts one pending connection. `WouldBlock` means no client is
    /// waiting right now; the caller should stop looping and go back to
    /// `reactor.wait`.
    pub fn accept(&self) -> io::Result<Option<UnixStream>> {
        match self.listener.accept() {
            Ok((stream, _addr)) => Ok(Some(stream)),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn close(&mut self, registry: &Registry) {
        let _ = registry.deregister(&mut self.listener);
    }
}

/// Initial receive buffer size for the blob following the header
/// (descriptor table + payload). Grown on demand, never shrunk, mirroring
/// the teacher's resize-on-demand `rx_buf`.
const RX_BUF_INITIAL: usize = 4 * 1024;

pub enum ReadOutcome<'a> {
    FrameDone { header: FrameHeader, body: &'a [u8] },
    WouldBlock,
    Disconnected,
    /// A header declared a length the caller's codec rejects (E2BIG or a
    /// broken frame). The connection is torn down; the error is the
    /// caller's to log.
    Invalid(crate::error::LinkError),
}

#[derive(Clone, Copy)]
enum RxState {
    ReadingHeader { buf: [u8; HEADER_SIZE], have: usize },
    ReadingBody { header: FrameHeader, offset: usize },
}

/// Single mio-backed Unix domain stream connection.
///
/// Frames are exactly the wire format: a fixed 12-byte header followed by
/// `length - 12` bytes holding the descriptor table and payload together.
/// Receiving therefore needs only two phases, same shape as a classic
/// length-prefixed TCP stream reader.
pub struct Link {
    stream: UnixStream,
    token: Token,

    rx_state: RxState,
    rx_buf: Vec<u8>,

    max_message_size: u32,
}

impl Link {
    pub fn new(stream: UnixStream, token: Token, max_message_size: u32) -> Self {
        Self {
            stream,
            token,
            rx_state: RxState::ReadingHeader { buf: [0; HEADER_SIZE], have: 0 },
            rx_buf: vec![0; RX_BUF_INITIAL],
            max_message_size,
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    /// Reads and yields every fully-assembled frame currently available,
    /// one `read_frame` call at a time. Caller loops until `WouldBlock`.
    pub fn read_frame(&mut self) -> ReadOutcome<'_> {
        loop {
            match self.rx_state {
                RxState::ReadingHeader { mut buf, mut have } => {
                    while have < HEADER_SIZE {
                        match self.stream.read(&mut buf[have..]) {
                            Ok(0) => return ReadOutcome::Disconnected,
                            Ok(n) => {
                                have += n;
                                if have == HEADER_SIZE {
                                    let header = FrameHeader::decode(&buf);
                                    if let Err(e) = header.validate(self.max_message_size) {
                                        self.rx_state =
                                            RxState::ReadingHeader { buf: [0; HEADER_SIZE], have: 0 };
                                        return ReadOutcome::Invalid(e);
                                    }
                                    let body_len = header.length as usize - HEADER_SIZE;
                                    if body_len > self.rx_buf.len() {
                                        self.rx_buf.resize(body_len, 0);
                                    }
                                    self.rx_state = RxState::ReadingBody { header, offset: 0 };
                                }
                            }
                            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                                self.rx_state = RxState::ReadingHeader { buf, have };
                                return ReadOutcome::WouldBlock;
                            }
                            Err(err) => {
                                debug!(?err, "gracht-link: read header");
                                return ReadOutcome::Disconnected;
                            }
                        }
                    }
                }

                RxState::ReadingBody { header, mut offset } => {
                    let body_len = header.length as usize - HEADER_SIZE;
                    while offset < body_len {
                        match self.stream.read(&mut self.rx_buf[offset..body_len]) {
                            Ok(0) => return ReadOutcome::Disconnected,
                            Ok(n) => {
                                offset += n;
                                if offset == body_len {
                                    self.rx_state =
                                        RxState::ReadingHeader { buf: [0; HEADER_SIZE], have: 0 };
                                    return ReadOutcome::FrameDone { header, body: &self.rx_buf[..body_len] };
                                }
                            }
                            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                                self.rx_state = RxState::ReadingBody { header, offset };
                                return ReadOutcome::WouldBlock;
                            }
                            Err(err) => {
                                debug!(?err, "gracht-link: read body");
                                return ReadOutcome::Disconnected;
                            }
                        }
                    }
                }
            }
        }
    }

    pub fn register(&mut self, registry: &Registry) -> io::Result<()> {
        registry.register(&mut self.stream, self.token, Interest::READABLE)
    }

    pub fn close(&mut self, registry: &Registry) {
        let _ = registry.deregister(&mut self.stream);
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}
