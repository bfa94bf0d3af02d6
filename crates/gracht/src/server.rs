use std::{
    collections::HashMap,
    os::unix::{
        io::{AsRawFd, FromRawFd},
        net::UnixDatagram as StdUnixDatagram,
    },
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use gracht_communication::Arena;
use gracht_link::{
    DatagramEnvelope, DatagramLink, FrameHeader, Link, LinkError, ParamDescriptor, Reactor, ReactorEvent, ReadOutcome,
    ShutdownHandle, StreamListener, encode_frame,
};
use mio::{Registry, Token};
use tracing::{debug, info, warn};

use crate::{
    client::{ClientRecord, ClientTable, ClientTransport},
    control,
    envelope::{Envelope, OutgoingBuffer},
    error::{GrachtError, GrachtResult},
    handle::Handle,
    registry::ProtocolRegistry,
    sender::ClientSender,
    worker::{WorkItem, WorkerPool},
};

/// Applied to `max_message_size` to size both arena slots and the
/// single-threaded static buffer (see spec §3's arena slot layout:
/// `max_message_size + 512`, the 512 bytes nominally reserved for
/// envelope/context metadata ahead of the payload). This crate keeps that
/// metadata out-of-band in [`Envelope`] rather than packed into the slot
/// bytes, but the arithmetic is preserved so the numeric contract matches
/// the spec exactly.
const SLOT_OVERHEAD: usize = 512;
/// Slots per worker in a multi-threaded arena (spec §3: `workers * slot_size * 32`).
const SLOTS_PER_WORKER: usize = 32;
pub const DEFAULT_MAX_MESSAGE_SIZE: u32 = 16 * 1024;

const LISTEN_TOKEN: Token = Token(usize::MAX);
const DGRAM_TOKEN: Token = Token(usize::MAX - 1);

pub type ConnectCallback = Arc<dyn Fn(Handle) + Send + Sync>;
pub(crate) type DisconnectCallback = Arc<dyn Fn(Handle) + Send + Sync>;

/// Which local-socket transports a server listens on. Unix domain paths
/// only — cross-host transport is an explicit non-goal.
pub enum LinkConfig {
    Stream { path: PathBuf },
    Datagram { path: PathBuf },
    Both { stream_path: PathBuf, datagram_path: PathBuf },
}

/// Configuration accepted by [`Server::new`]. Assembled by the caller and
/// passed by value, rather than a global — the server is a value type,
/// see [`init_default`] for the opt-in singleton convenience.
pub struct ServerConfig {
    pub link: LinkConfig,
    pub on_connect: Option<ConnectCallback>,
    pub on_disconnect: Option<ConnectCallback>,
    pub max_message_size: u32,
    pub workers: usize,
    /// An externally-owned reactor. If set, `Server` registers its sockets
    /// on it but never calls `Reactor::destroy` on shutdown.
    pub reactor: Option<Reactor>,
}

impl ServerConfig {
    pub fn new(link: LinkConfig) -> Self {
        Self { link, on_connect: None, on_disconnect: None, max_message_size: DEFAULT_MAX_MESSAGE_SIZE, workers: 1, reactor: None }
    }

    pub fn with_on_connect(mut self, cb: impl Fn(Handle) + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(cb));
        self
    }

    pub fn with_on_disconnect(mut self, cb: impl Fn(Handle) + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(cb));
        self
    }

    pub fn with_max_message_size(mut self, max: u32) -> Self {
        self.max_message_size = max;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_reactor(mut self, reactor: Reactor) -> Self {
        self.reactor = Some(reactor);
        self
    }
}

/// Protocol registry and client table, guarded together by one
/// server-wide mutex (spec §5's `sync_object`: "client table and protocol
/// registry guarded by a single server-wide mutex"). `dgram_peers` indexes
/// datagram clients by their bound reply path so the receive path can find
/// an existing client without a linear scan.
pub(crate) struct SharedState {
    pub registry: ProtocolRegistry,
    pub clients: ClientTable,
    pub dgram_peers: HashMap<PathBuf, Handle>,
}

enum Dispatch {
    SingleThreaded { send_buf: Vec<u8> },
    MultiThreaded { pool: WorkerPool, arena: Arc<Arena> },
}

/// A cloneable, `Send + Sync` handle for pushing server-originated frames
/// (broadcast or targeted) independent of whether [`Server::run`] currently
/// holds `&mut Server` on another thread. See [`Server::broadcaster`].
#[derive(Clone)]
pub struct Broadcaster {
    sender: Arc<ClientSender>,
    max_message_size: u32,
}

impl Broadcaster {
    /// Sends an unsolicited event (`message_id = 0`) to every client whose
    /// subscription bit for `protocol` is set (spec P4).
    pub fn broadcast(&self, protocol: u8, action: u8, descriptors: &[ParamDescriptor], buffers: &[&[u8]]) -> GrachtResult<()> {
        let header = FrameHeader { message_id: 0, length: 0, protocol, action, param_in: 0, param_out: descriptors.len() as u8 };
        let mut buf = Vec::new();
        encode_frame(header, descriptors, buffers, self.max_message_size, &mut buf)?;
        self.sender.broadcast(protocol, &buf);
        Ok(())
    }

    /// Sends directly to one client by handle. Fails with `NotFound` if the
    /// client has disconnected (spec P2: "subsequent sends ... fail").
    pub fn send_event(&self, handle: Handle, protocol: u8, action: u8, descriptors: &[ParamDescriptor], buffers: &[&[u8]]) -> GrachtResult<()> {
        let header = FrameHeader { message_id: 0, length: 0, protocol, action, param_in: 0, param_out: descriptors.len() as u8 };
        let mut buf = Vec::new();
        encode_frame(header, descriptors, buffers, self.max_message_size, &mut buf)?;
        self.sender.send_client(handle, &buf)
    }
}

enum StreamRead {
    Frame(FrameHeader, Vec<u8>),
    WouldBlock,
    Disconnected,
    Invalid(LinkError),
}

/// The RPC server: reactor loop, dispatch, client table and broadcast.
///
/// Constructed explicitly with [`Server::new`] and torn down explicitly
/// with [`Server::shutdown`] — a value type, not a global (see
/// [`init_default`] for that convenience as an opt-in wrapper around the
/// same type).
pub struct Server {
    shared: Arc<Mutex<SharedState>>,
    reactor: Option<Reactor>,
    owns_reactor: bool,
    /// An owned, independently-usable handle to the reactor's `mio::Registry`
    /// (via `Registry::try_clone`). Keeping this separate from `reactor`
    /// means registering/deregistering sources never needs `self.reactor`
    /// borrowed, which is what lets [`Server::run`] hand the reactor's
    /// `wait` loop a closure that freely calls back into the rest of `self`.
    registry: Registry,
    stream_listener: Option<StreamListener>,
    dgram_link: Option<DatagramLink>,
    dgram_sender: Option<Arc<StdUnixDatagram>>,
    connections: HashMap<Handle, Link>,
    sender: Arc<ClientSender>,
    dispatch: Dispatch,
    max_message_size: u32,
    next_handle: u32,
    on_connect: Option<ConnectCallback>,
    on_disconnect: Option<ConnectCallback>,
}

impl Server {
    /// Builds and binds a new server. Fails fast (no partial state left
    /// behind in the caller's hands) if neither requested transport can
    /// bind, or if both are requested and either one fails.
    pub fn new(config: ServerConfig) -> GrachtResult<Self> {
        if config.max_message_size < gracht_link::HEADER_SIZE as u32 {
            return Err(GrachtError::InvalidArgument("max_message_size smaller than the frame header"));
        }

        let owns_reactor = config.reactor.is_none();
        let reactor = match config.reactor {
            Some(reactor) => reactor,
            None => Reactor::create(1024)?,
        };
        let registry = reactor.registry().try_clone()?;

        let mut stream_listener = None;
        let mut dgram_link = None;
        let mut dgram_sender = None;

        match &config.link {
            LinkConfig::Stream { path } => {
                stream_listener = Some(bind_stream(path, &registry)?);
            }
            LinkConfig::Datagram { path } => {
                let (link, sender) = bind_datagram(path, &registry, config.max_message_size)?;
                dgram_link = Some(link);
                dgram_sender = Some(sender);
            }
            LinkConfig::Both { stream_path, datagram_path } => {
                stream_listener = Some(bind_stream(stream_path, &registry)?);
                let (link, sender) = bind_datagram(datagram_path, &registry, config.max_message_size)?;
                dgram_link = Some(link);
                dgram_sender = Some(sender);
            }
        }

        if stream_listener.is_none() && dgram_link.is_none() {
            return Err(GrachtError::Unsupported);
        }

        let shared = Arc::new(Mutex::new(SharedState {
            registry: ProtocolRegistry::new(),
            clients: ClientTable::new(),
            dgram_peers: HashMap::new(),
        }));
        {
            let mut guard = shared.lock().unwrap();
            control::register(&mut guard.registry, shared.clone(), config.on_disconnect.clone());
        }

        let sender = Arc::new(ClientSender::new(shared.clone(), dgram_sender.clone()));
        let slot_size = config.max_message_size as usize + SLOT_OVERHEAD;

        let dispatch = if config.workers > 1 {
            let arena = Arena::new(slot_size, config.workers * SLOTS_PER_WORKER);
            let pool = WorkerPool::spawn(config.workers, slot_size, sender.clone(), config.max_message_size);
            Dispatch::MultiThreaded { pool, arena }
        } else {
            Dispatch::SingleThreaded { send_buf: vec![0u8; slot_size] }
        };

        Ok(Self {
            shared,
            reactor: Some(reactor),
            owns_reactor,
            registry,
            stream_listener,
            dgram_link,
            dgram_sender,
            connections: HashMap::new(),
            sender,
            dispatch,
            max_message_size: config.max_message_size,
            next_handle: 1,
            on_connect: config.on_connect,
            on_disconnect: config.on_disconnect,
        })
    }

    /// Runs the reactor loop until shutdown is requested — either via
    /// [`Server::shutdown`] (called after `run` returns, from the same
    /// thread) or via a [`ShutdownHandle`] obtained beforehand and signaled
    /// from another thread while this call is blocked.
    ///
    /// Each iteration borrows the reactor only for the `wait` call itself,
    /// collecting events into a local buffer first and dispatching them
    /// afterwards — so the dispatch path is free to mutate the rest of
    /// `self` without fighting the reactor's own borrow.
    pub fn run(&mut self) -> GrachtResult<()> {
        let mut events = Vec::new();
        loop {
            events.clear();
            let count = {
                let reactor = self.reactor.as_mut().expect("server reactor missing");
                reactor.wait(|event| events.push(event))?
            };
            if count == 0 {
                break;
            }
            for event in events.drain(..) {
                self.handle_event(event);
            }
        }
        Ok(())
    }

    /// Returns a cheap, cloneable handle that can break a blocking
    /// [`Server::run`] call from another thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.reactor.as_ref().expect("server reactor missing").shutdown_handle()
    }

    /// Returns a cheap, cloneable handle for sending broadcasts and
    /// targeted events from outside the reactor thread (a timer, another
    /// worker, a signal handler) while [`Server::run`] is blocked in its
    /// loop elsewhere. Backed by the same `Arc<ClientSender>` the server
    /// itself uses, so this never needs `&mut Server`.
    pub fn broadcaster(&self) -> Broadcaster {
        Broadcaster { sender: self.sender.clone(), max_message_size: self.max_message_size }
    }

    /// Registers a handler for `(protocol, action)`. Protocol id `0` is
    /// reserved for the control protocol and cannot be overridden.
    pub fn register_handler<F>(&self, protocol: u8, action: u8, handler: F) -> GrachtResult<()>
    where
        F: Fn(&Envelope, &mut OutgoingBuffer<'_>) -> GrachtResult<()> + Send + Sync + 'static,
    {
        if protocol == control::CONTROL_PROTOCOL {
            return Err(GrachtError::InvalidArgument("protocol 0 is reserved for the control protocol"));
        }
        self.shared.lock().unwrap().registry.register(protocol, action, Arc::new(handler));
        Ok(())
    }

    /// Sends an unsolicited, server-originated event (`message_id = 0`, the
    /// convention for anything that isn't a direct reply) to every client
    /// subscribed to `protocol`. Equivalent to `self.broadcaster().broadcast(..)`.
    pub fn broadcast(&self, protocol: u8, action: u8, descriptors: &[ParamDescriptor], buffers: &[&[u8]]) -> GrachtResult<()> {
        self.broadcaster().broadcast(protocol, action, descriptors, buffers)
    }

    /// Sends directly to one client by handle, outside the normal
    /// request/response flow (e.g. a targeted push). Fails with
    /// `NotFound` if the client has disconnected. Equivalent to
    /// `self.broadcaster().send_event(..)`.
    pub fn send_event(&self, handle: Handle, protocol: u8, action: u8, descriptors: &[ParamDescriptor], buffers: &[&[u8]]) -> GrachtResult<()> {
        self.broadcaster().send_event(handle, protocol, action, descriptors, buffers)
    }

    pub fn client_count(&self) -> usize {
        self.shared.lock().unwrap().clients.len()
    }

    pub fn is_connected(&self, handle: Handle) -> bool {
        self.shared.lock().unwrap().clients.contains(handle)
    }

    /// Enumerates and destroys all clients, stops the worker pool (if any),
    /// and destroys the link and (if owned) the reactor. Idempotent:
    /// calling this twice is a harmless no-op the second time.
    pub fn shutdown(&mut self) {
        if let Some(reactor) = &self.reactor {
            reactor.shutdown();
        }

        let handles = self.shared.lock().unwrap().clients.handles();
        for handle in handles {
            if let Some(mut link) = self.connections.remove(&handle) {
                link.close(&self.registry);
            }
        }

        {
            let mut guard = self.shared.lock().unwrap();
            for handle in guard.clients.handles() {
                guard.clients.remove(handle);
            }
            guard.dgram_peers.clear();
        }

        if let Some(mut listener) = self.stream_listener.take() {
            listener.close(&self.registry);
        }
        if let Some(mut dgram) = self.dgram_link.take() {
            dgram.close(&self.registry);
        }

        let old = std::mem::replace(&mut self.dispatch, Dispatch::SingleThreaded { send_buf: Vec::new() });
        if let Dispatch::MultiThreaded { pool, .. } = old {
            pool.shutdown();
        }

        if self.owns_reactor
            && let Some(reactor) = self.reactor.take()
        {
            reactor.destroy();
        }
    }

    fn handle_event(&mut self, event: ReactorEvent) {
        if self.stream_listener.as_ref().map(StreamListener::token) == Some(event.token) {
            self.accept_loop();
        } else if self.dgram_link.as_ref().map(DatagramLink::token) == Some(event.token) {
            self.drain_datagram();
        } else {
            let handle = Handle::from_token(event.token);
            if event.disconnected {
                self.disconnect_client(handle);
            } else {
                self.drain_stream(handle);
            }
        }
    }

    fn accept_loop(&mut self) {
        loop {
            let accepted = match &self.stream_listener {
                Some(listener) => listener.accept(),
                None => return,
            };
            match accepted {
                Ok(Some(stream)) => self.accept_stream(stream),
                Ok(None) => break,
                Err(err) => {
                    warn!(?err, "gracht: accept failed");
                    break;
                }
            }
        }
    }

    fn accept_stream(&mut self, stream: mio::net::UnixStream) {
        let handle = self.alloc_handle();
        let token = handle.as_token();

        let writer = match duplicate_for_writer(&stream) {
            Ok(writer) => writer,
            Err(err) => {
                warn!(?err, "gracht: couldn't duplicate accepted client fd");
                return;
            }
        };

        let mut link = Link::new(stream, token, self.max_message_size);
        if let Err(err) = link.register(&self.registry) {
            warn!(?err, "gracht: couldn't register accepted stream");
            return;
        }

        {
            let mut guard = self.shared.lock().unwrap();
            guard.clients.insert(ClientRecord::new(handle, ClientTransport::Stream { writer: Arc::new(Mutex::new(writer)) }));
        }
        self.connections.insert(handle, link);

        info!(?handle, "gracht: client connected");
        if let Some(cb) = &self.on_connect {
            cb(handle);
        }
    }

    fn drain_stream(&mut self, handle: Handle) {
        loop {
            let read = match self.connections.get_mut(&handle) {
                Some(link) => match link.read_frame() {
                    ReadOutcome::FrameDone { header, body } => StreamRead::Frame(header, body.to_vec()),
                    ReadOutcome::WouldBlock => StreamRead::WouldBlock,
                    ReadOutcome::Disconnected => StreamRead::Disconnected,
                    ReadOutcome::Invalid(err) => StreamRead::Invalid(err),
                },
                None => return,
            };

            match read {
                StreamRead::Frame(header, body) => self.dispatch_frame(handle, header, body),
                StreamRead::WouldBlock => break,
                StreamRead::Disconnected => {
                    self.disconnect_client(handle);
                    break;
                }
                StreamRead::Invalid(err) => {
                    // A bad length leaves the stream desynchronized — there's no
                    // safe way to know where the next frame starts, so this is
                    // treated like any other fatal read error (cf. B4's EPIPE).
                    debug!(?handle, ?err, "gracht: invalid frame, tearing down connection");
                    self.disconnect_client(handle);
                    break;
                }
            }
        }
    }

    fn disconnect_client(&mut self, handle: Handle) {
        if let Some(mut link) = self.connections.remove(&handle) {
            link.close(&self.registry);
        }

        let existed = {
            let mut guard = self.shared.lock().unwrap();
            let existed = guard.clients.remove(handle).is_some();
            guard.dgram_peers.retain(|_, h| *h != handle);
            existed
        };

        if existed {
            info!(?handle, "gracht: client disconnected");
            if let Some(cb) = &self.on_disconnect {
                cb(handle);
            }
        }
    }

    fn drain_datagram(&mut self) {
        loop {
            let result = match &mut self.dgram_link {
                Some(dgram) => dgram.recv_packet(self.max_message_size),
                None => return,
            };
            match result {
                Ok(envelope) => self.dispatch_datagram(envelope),
                Err(LinkError::NoData) => break,
                Err(err) => {
                    debug!(?err, "gracht: datagram recv error");
                    break;
                }
            }
        }
    }

    fn dispatch_datagram(&mut self, envelope: DatagramEnvelope) {
        let DatagramEnvelope { header, body, sender } = envelope;

        let existing = sender.as_ref().and_then(|path| self.shared.lock().unwrap().dgram_peers.get(path).copied());

        let handle = if let Some(handle) = existing {
            handle
        } else if header.protocol == control::CONTROL_PROTOCOL && header.action == control::ACTION_SUBSCRIBE {
            let Some(peer) = sender.clone() else {
                debug!("gracht: subscribe from an unaddressable datagram peer, dropping");
                return;
            };
            let handle = self.alloc_handle();
            {
                let mut guard = self.shared.lock().unwrap();
                guard.clients.insert(ClientRecord::new(handle, ClientTransport::Datagram { peer: peer.clone() }));
                guard.dgram_peers.insert(peer, handle);
            }
            info!(?handle, "gracht: datagram client connected");
            if let Some(cb) = &self.on_connect {
                cb(handle);
            }
            handle
        } else {
            if let Some(peer) = &sender {
                self.send_error_raw_datagram(peer, header.message_id);
            }
            return;
        };

        self.dispatch_frame(handle, header, body);
    }

    /// Common tail of both receive paths: decode the descriptor table,
    /// resolve the handler under the registry lock, and either invoke it
    /// inline or hand it to the worker pool.
    fn dispatch_frame(&mut self, handle: Handle, header: FrameHeader, body: Vec<u8>) {
        let descriptor_table_len = header.descriptor_table_len();
        if body.len() < descriptor_table_len {
            debug!(?handle, "gracht: body shorter than its declared descriptor table");
            return;
        }

        let descriptors: Vec<ParamDescriptor> = body[..descriptor_table_len]
            .chunks_exact(gracht_link::DESCRIPTOR_SIZE)
            .map(|chunk| ParamDescriptor::decode(chunk.try_into().unwrap()))
            .collect();

        let handler = self.shared.lock().unwrap().registry.lookup(header.protocol, header.action);
        let Some(handler) = handler else {
            self.send_error(handle, header.message_id, control::ERROR_CODE_ENOENT);
            return;
        };

        match &mut self.dispatch {
            Dispatch::SingleThreaded { send_buf } => {
                let frame = full_frame_bytes(&header, &body);
                let env = Envelope::from_owned(handle, header, descriptors, frame.into_boxed_slice());
                let mut out = OutgoingBuffer::new(send_buf, self.max_message_size);
                if let Err(err) = handler(&env, &mut out) {
                    debug!(?handle, ?err, "gracht: handler returned an error");
                    return;
                }
                if let Some(frame) = out.encoded()
                    && let Err(err) = self.sender.send_client(handle, frame)
                {
                    debug!(?handle, ?err, "gracht: reply send failed");
                }
            }
            Dispatch::MultiThreaded { pool, arena } => {
                let Some(mut slot) = allocate_with_backoff(arena) else {
                    warn!(?handle, "gracht: arena exhausted, dropping message");
                    return;
                };
                let total_len = gracht_link::HEADER_SIZE + body.len();
                {
                    let mut header_bytes = [0u8; gracht_link::HEADER_SIZE];
                    header.encode(&mut header_bytes);
                    let dest = slot.as_mut_slice();
                    dest[..gracht_link::HEADER_SIZE].copy_from_slice(&header_bytes);
                    dest[gracht_link::HEADER_SIZE..total_len].copy_from_slice(&body);
                }
                slot.set_len(total_len);
                let env = Envelope::from_arena(handle, header, descriptors, slot);
                pool.dispatch(WorkItem { envelope: env, handler });
            }
        }
    }

    fn send_error(&self, handle: Handle, message_id: u32, code: u64) {
        let header = FrameHeader {
            message_id,
            length: 0,
            protocol: control::CONTROL_PROTOCOL,
            action: control::ACTION_ERROR,
            param_in: 0,
            param_out: 1,
        };
        let mut buf = Vec::new();
        if let Err(err) = encode_frame(header, &[ParamDescriptor::Scalar(code)], &[], self.max_message_size, &mut buf) {
            warn!(?err, "gracht: couldn't encode error frame");
            return;
        }
        if let Err(err) = self.sender.send_client(handle, &buf) {
            debug!(?handle, ?err, "gracht: couldn't deliver error frame");
        }
    }

    fn send_error_raw_datagram(&self, peer: &Path, message_id: u32) {
        let Some(socket) = &self.dgram_sender else { return };
        let header = FrameHeader {
            message_id,
            length: 0,
            protocol: control::CONTROL_PROTOCOL,
            action: control::ACTION_ERROR,
            param_in: 0,
            param_out: 1,
        };
        let mut buf = Vec::new();
        if encode_frame(header, &[ParamDescriptor::Scalar(control::ERROR_CODE_ENOENT)], &[], self.max_message_size, &mut buf).is_ok() {
            let _ = socket.send_to(&buf, peer);
        }
    }

    fn alloc_handle(&mut self) -> Handle {
        let handle = Handle(self.next_handle);
        self.next_handle += 1;
        handle
    }
}

fn full_frame_bytes(header: &FrameHeader, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(gracht_link::HEADER_SIZE + body.len());
    let mut header_bytes = [0u8; gracht_link::HEADER_SIZE];
    header.encode(&mut header_bytes);
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(body);
    out
}

/// Tries a handful of times to get an arena slot before giving up. The
/// arena's free list only drains when a worker finishes a handler, so a
/// burst that outruns `workers * 32` slots briefly backs off rather than
/// failing immediately — matching "transient backpressure" (spec §4.5),
/// without blocking the reactor thread indefinitely on a wedged pool.
fn allocate_with_backoff(arena: &Arc<Arena>) -> Option<gracht_communication::ArenaSlot> {
    for _ in 0..64 {
        if let Some(slot) = arena.allocate() {
            return Some(slot);
        }
        std::thread::yield_now();
    }
    None
}

fn duplicate_for_writer(stream: &mio::net::UnixStream) -> std::io::Result<std::os::unix::net::UnixStream> {
    let fd = unsafe { libc::dup(stream.as_raw_fd()) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error());
    }
    // Safety: `libc::dup` returned a valid, newly-owned descriptor that
    // nothing else references yet.
    Ok(unsafe { std::os::unix::net::UnixStream::from_raw_fd(fd) })
}

fn bind_stream(path: &Path, registry: &Registry) -> GrachtResult<StreamListener> {
    StreamListener::bind(path, registry, LISTEN_TOKEN).map_err(GrachtError::from)
}

fn bind_datagram(path: &Path, registry: &Registry, max_message_size: u32) -> GrachtResult<(DatagramLink, Arc<StdUnixDatagram>)> {
    if path.exists() {
        let _ = std::fs::remove_file(path);
    }
    let socket = mio::net::UnixDatagram::bind(path)?;
    let mut link = DatagramLink::new(socket, DGRAM_TOKEN, max_message_size);
    link.register(registry)?;
    let sender = StdUnixDatagram::unbound()?;
    Ok((link, Arc::new(sender)))
}

/// Opt-in convenience wrapping a single process-wide [`Server`] behind a
/// `Mutex`. The underlying type is still the plain value type constructed
/// by [`Server::new`] — this is sugar, not the only way to use a server.
static DEFAULT_SERVER: std::sync::OnceLock<Mutex<Option<Server>>> = std::sync::OnceLock::new();

/// Initializes the process-wide default server. Returns
/// [`GrachtError::AlreadyInitialized`] if called twice without an
/// intervening [`shutdown_default`].
pub fn init_default(config: ServerConfig) -> GrachtResult<()> {
    let slot = DEFAULT_SERVER.get_or_init(|| Mutex::new(None));
    let mut guard = slot.lock().unwrap();
    if guard.is_some() {
        return Err(GrachtError::AlreadyInitialized);
    }
    *guard = Some(Server::new(config)?);
    Ok(())
}

/// Runs a closure against the default server, if initialized.
pub fn with_default<R>(f: impl FnOnce(&mut Server) -> R) -> Option<R> {
    let slot = DEFAULT_SERVER.get()?;
    let mut guard = slot.lock().unwrap();
    guard.as_mut().map(f)
}

/// Shuts down and drops the default server, if one was initialized.
/// Idempotent.
pub fn shutdown_default() {
    if let Some(slot) = DEFAULT_SERVER.get() {
        let mut guard = slot.lock().unwrap();
        if let Some(mut server) = guard.take() {
            server.shutdown();
        }
    }
}
