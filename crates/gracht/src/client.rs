use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use crate::{handle::Handle, subscription::SubscriptionBitmap};

/// Link-private transport state carried alongside a client's handle — the
/// bit of state that differs between the stream and datagram transports.
pub enum ClientTransport {
    /// A stream client. The reactor's own `mio::net::UnixStream` (held in
    /// `Server`'s connection map) handles receiving; `writer` is a `dup()`
    /// of the same file descriptor used for sending, so worker threads can
    /// reply without touching reactor state ("Reactor membership: modified
    /// only by the reactor thread"). `dup` shares the underlying open file
    /// description, so this duplicate is non-blocking exactly like the
    /// original — see `sender::write_frame_blocking` for how a write still
    /// blocks the calling thread until complete despite that. The mutex
    /// only serializes concurrent writes from workers racing on the same
    /// connection — it is never held across I/O beyond the write itself.
    Stream { writer: Arc<Mutex<std::os::unix::net::UnixStream>> },
    /// A datagram peer's bound reply address, learned the first time it's
    /// seen (a subscribe control message).
    Datagram { peer: PathBuf },
}

/// One entry in the client table: handle, subscription bitmap, transport
/// state. See invariant I2 — the table is keyed uniquely by handle.
pub struct ClientRecord {
    pub handle: Handle,
    pub subscriptions: SubscriptionBitmap,
    pub transport: ClientTransport,
}

impl ClientRecord {
    pub fn new(handle: Handle, transport: ClientTransport) -> Self {
        Self { handle, subscriptions: SubscriptionBitmap::new(), transport }
    }
}

/// Table of connected clients, keyed by [`Handle`]. Expected to be guarded
/// by the server's single `sync_object` mutex alongside the protocol
/// registry, matching the spec's concurrency model (§5).
#[derive(Default)]
pub struct ClientTable {
    clients: HashMap<Handle, ClientRecord>,
}

impl ClientTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new client record. Returns `false` without inserting if
    /// the handle is already present (invariant I2: no duplicate entries).
    pub fn insert(&mut self, record: ClientRecord) -> bool {
        if self.clients.contains_key(&record.handle) {
            return false;
        }
        self.clients.insert(record.handle, record);
        true
    }

    pub fn remove(&mut self, handle: Handle) -> Option<ClientRecord> {
        self.clients.remove(&handle)
    }

    pub fn get(&self, handle: Handle) -> Option<&ClientRecord> {
        self.clients.get(&handle)
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut ClientRecord> {
        self.clients.get_mut(&handle)
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.clients.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Iterates every client subscribed to `protocol`, in table iteration
    /// order — used by broadcast. Order across broadcasts and unicast
    /// sends is not otherwise guaranteed (see §5).
    pub fn subscribed(&self, protocol: u8) -> impl Iterator<Item = &ClientRecord> {
        self.clients.values().filter(move |record| record.subscriptions.test(protocol))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientRecord> {
        self.clients.values()
    }

    pub fn handles(&self) -> Vec<Handle> {
        self.clients.keys().copied().collect()
    }
}
