use std::{collections::HashMap, sync::Arc};

use crate::envelope::{Envelope, OutgoingBuffer};

/// A registered protocol/action handler. Invoked with the received
/// envelope and a writer for the response; returning `Err` tears down
/// nothing by itself — dispatch errors on one message never affect the
/// loop or other clients (see the error propagation policy).
pub type Handler = Arc<dyn Fn(&Envelope, &mut OutgoingBuffer<'_>) -> crate::error::GrachtResult<()> + Send + Sync>;

/// One registered protocol: its id and the action-id -> handler map.
struct ProtocolRecord {
    actions: HashMap<u8, Handler>,
}

/// Maps `(protocol, action)` to a handler. Protocol id `0` is reserved for
/// the built-in control protocol and is always registered.
///
/// Lookups and mutations are expected to be called with the server's
/// `sync_object` mutex held (invariant I5: "handler lookup is serialized
/// with respect to protocol registration/removal") — this type itself
/// holds no lock, it's the payload the caller's mutex protects.
#[derive(Default)]
pub struct ProtocolRegistry {
    protocols: HashMap<u8, ProtocolRecord>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `(protocol, action)`, replacing any handler
    /// previously registered for that pair.
    pub fn register(&mut self, protocol: u8, action: u8, handler: Handler) {
        self.protocols.entry(protocol).or_insert_with(|| ProtocolRecord { actions: HashMap::new() }).actions.insert(action, handler);
    }

    /// Removes the protocol and every action registered under it.
    pub fn unregister_protocol(&mut self, protocol: u8) {
        self.protocols.remove(&protocol);
    }

    pub fn lookup(&self, protocol: u8, action: u8) -> Option<Handler> {
        self.protocols.get(&protocol)?.actions.get(&action).cloned()
    }

    pub fn action_count(&self, protocol: u8) -> usize {
        self.protocols.get(&protocol).map_or(0, |record| record.actions.len())
    }
}
