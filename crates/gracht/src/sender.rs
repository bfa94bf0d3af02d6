use std::{
    io::{self, Write},
    os::unix::{io::AsRawFd, net::UnixDatagram},
    sync::{Arc, Mutex},
};

use crate::{client::ClientTransport, error::{GrachtError, GrachtResult}, handle::Handle, server::SharedState};

/// Thread-safe path for sending a frame to a client, used by worker
/// threads (which never touch reactor state) and by the reactor thread
/// itself for unicast replies, broadcast, and control-protocol errors.
///
/// Looks up the client's transport under the shared `sync_object` mutex,
/// clones the cheap handle (an `Arc`), and releases the lock before
/// performing the actual (possibly blocking) write — so a slow client
/// blocks only the sender, never other lookups against the client table.
pub struct ClientSender {
    state: Arc<Mutex<SharedState>>,
    dgram: Option<Arc<UnixDatagram>>,
}

impl ClientSender {
    pub(crate) fn new(state: Arc<Mutex<SharedState>>, dgram: Option<Arc<UnixDatagram>>) -> Self {
        Self { state, dgram }
    }

    pub fn send_client(&self, handle: Handle, frame: &[u8]) -> GrachtResult<()> {
        let transport = {
            let state = self.state.lock().unwrap();
            let record = state.clients.get(handle).ok_or(GrachtError::NotFound)?;
            match &record.transport {
                ClientTransport::Stream { writer } => Transport::Stream(writer.clone()),
                ClientTransport::Datagram { peer } => Transport::Datagram(peer.clone()),
            }
        };

        match transport {
            Transport::Stream(writer) => {
                let stream = writer.lock().unwrap();
                write_frame_blocking(&stream, frame)?;
                Ok(())
            }
            Transport::Datagram(peer) => {
                let socket = self.dgram.as_ref().ok_or(GrachtError::Unsupported)?;
                socket.send_to(frame, &peer)?;
                Ok(())
            }
        }
    }

    /// Sends `frame` to every client whose subscription bit for `protocol`
    /// is set. A failed send to one client never aborts delivery to the
    /// rest (spec: "Failure to send to one client does not abort the
    /// broadcast").
    pub fn broadcast(&self, protocol: u8, frame: &[u8]) {
        let targets: Vec<(Handle, Transport)> = {
            let state = self.state.lock().unwrap();
            state
                .clients
                .subscribed(protocol)
                .map(|record| {
                    let transport = match &record.transport {
                        ClientTransport::Stream { writer } => Transport::Stream(writer.clone()),
                        ClientTransport::Datagram { peer } => Transport::Datagram(peer.clone()),
                    };
                    (record.handle, transport)
                })
                .collect()
        };

        for (handle, transport) in targets {
            let result = match transport {
                Transport::Stream(writer) => write_frame_blocking(&writer.lock().unwrap(), frame).map_err(GrachtError::from),
                Transport::Datagram(peer) => match &self.dgram {
                    Some(socket) => socket.send_to(frame, &peer).map(|_| ()).map_err(GrachtError::from),
                    None => Err(GrachtError::Unsupported),
                },
            };
            if let Err(err) = result {
                tracing::debug!(?handle, ?err, "gracht: broadcast send failed for one client");
            }
        }
    }
}

enum Transport {
    Stream(Arc<Mutex<std::os::unix::net::UnixStream>>),
    Datagram(std::path::PathBuf),
}

/// Writes `frame` in full to `stream`, blocking the calling thread until
/// every byte is written.
///
/// `stream`'s file descriptor is a `dup()` of the one the reactor
/// registered with `mio` for reading — `dup` shares the underlying open
/// file description, including its `O_NONBLOCK` flag, so this descriptor
/// is non-blocking too and a plain `write_all` would surface backpressure
/// as a `WouldBlock` error instead of actually blocking. There is no way
/// to give this duplicate an independent blocking mode without also
/// making the reactor's own non-blocking reads block (same open file
/// description), so the "blocking send" semantics of §5 ("slow clients
/// can block a worker") are realized here instead: on `WouldBlock`, poll
/// the descriptor for writability and retry, so the call doesn't return
/// until the frame is fully written — blocking this thread exactly the
/// way a genuinely blocking socket would, without disturbing the
/// reactor's read side.
fn write_frame_blocking(stream: &std::os::unix::net::UnixStream, mut frame: &[u8]) -> io::Result<()> {
    while !frame.is_empty() {
        match stream.write(frame) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
            Ok(n) => frame = &frame[n..],
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => wait_writable(stream.as_raw_fd())?,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Blocks until `fd` is writable (or an error is reported on it) via a
/// plain `poll(2)` call with no timeout — the non-blocking-fd-plus-poll
/// idiom used to recover blocking semantics on a descriptor whose flags
/// can't be changed independently of its peer.
fn wait_writable(fd: std::os::unix::io::RawFd) -> io::Result<()> {
    let mut pollfd = libc::pollfd { fd, events: libc::POLLOUT, revents: 0 };
    loop {
        let rc = unsafe { libc::poll(&mut pollfd, 1, -1) };
        if rc >= 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Read, thread, time::Duration};

    use super::*;
    use crate::{client::{ClientRecord, ClientTransport}, registry::ProtocolRegistry};

    fn new_state() -> Arc<Mutex<SharedState>> {
        Arc::new(Mutex::new(SharedState {
            registry: ProtocolRegistry::new(),
            clients: crate::client::ClientTable::new(),
            dgram_peers: std::collections::HashMap::new(),
        }))
    }

    #[test]
    fn send_client_writes_to_the_right_peer() {
        let state = new_state();
        let (server_side, mut client_side) = std::os::unix::net::UnixStream::pair().unwrap();
        {
            let mut guard = state.lock().unwrap();
            guard.clients.insert(ClientRecord::new(
                Handle(1),
                ClientTransport::Stream { writer: Arc::new(Mutex::new(server_side)) },
            ));
        }

        let sender = ClientSender::new(state, None);
        sender.send_client(Handle(1), b"hello").unwrap();

        let mut buf = [0u8; 5];
        client_side.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    /// The writer fd is non-blocking (it's a `dup` of the reactor's own
    /// non-blocking stream), so a socket buffer full enough to reject a
    /// write must still be ridden out rather than surfaced as an error —
    /// this drives that via a frame large enough to fill the pair's
    /// kernel buffer, draining it from another thread only after the send
    /// has had a chance to hit `WouldBlock`.
    #[test]
    fn send_client_blocks_through_backpressure_instead_of_erroring() {
        let state = new_state();
        let (server_side, mut client_side) = std::os::unix::net::UnixStream::pair().unwrap();
        server_side.set_nonblocking(true).unwrap();
        {
            let mut guard = state.lock().unwrap();
            guard.clients.insert(ClientRecord::new(
                Handle(1),
                ClientTransport::Stream { writer: Arc::new(Mutex::new(server_side)) },
            ));
        }

        let sender = Arc::new(ClientSender::new(state, None));
        let frame = vec![0xABu8; 4 * 1024 * 1024];

        let sender2 = sender.clone();
        let frame2 = frame.clone();
        let sender_thread = thread::spawn(move || sender2.send_client(Handle(1), &frame2));

        thread::sleep(Duration::from_millis(50));

        let mut received = 0usize;
        let mut buf = vec![0u8; 64 * 1024];
        while received < frame.len() {
            let n = client_side.read(&mut buf).unwrap();
            assert!(n > 0, "sender should still be writing, not erroring out");
            received += n;
        }

        assert!(sender_thread.join().unwrap().is_ok());
        assert_eq!(received, frame.len());
    }

    #[test]
    fn send_client_unknown_handle_returns_not_found() {
        let state = new_state();
        let sender = ClientSender::new(state, None);
        assert!(matches!(sender.send_client(Handle(99), b"x"), Err(GrachtError::NotFound)));
    }

    #[test]
    fn broadcast_reaches_only_subscribed_clients() {
        let state = new_state();
        let (a_server, mut a_client) = std::os::unix::net::UnixStream::pair().unwrap();
        let (b_server, mut b_client) = std::os::unix::net::UnixStream::pair().unwrap();
        {
            let mut guard = state.lock().unwrap();
            let mut a = ClientRecord::new(Handle(1), ClientTransport::Stream { writer: Arc::new(Mutex::new(a_server)) });
            a.subscriptions.set(5);
            guard.clients.insert(a);
            guard.clients.insert(ClientRecord::new(
                Handle(2),
                ClientTransport::Stream { writer: Arc::new(Mutex::new(b_server)) },
            ));
        }

        let sender = ClientSender::new(state, None);
        sender.broadcast(5, b"evt");

        a_client.set_nonblocking(true).unwrap();
        b_client.set_nonblocking(true).unwrap();
        let mut buf = [0u8; 3];
        assert_eq!(a_client.read(&mut buf).unwrap(), 3);
        assert_eq!(b_client.read(&mut buf).unwrap_err().kind(), std::io::ErrorKind::WouldBlock);
    }
}
