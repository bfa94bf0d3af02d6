use std::sync::{Arc, Mutex, Weak};

use gracht_link::ParamDescriptor;

use crate::{
    envelope::{Envelope, OutgoingBuffer},
    error::GrachtResult,
    handle::Handle,
    registry::ProtocolRegistry,
    server::{DisconnectCallback, SharedState},
};

/// Reserved protocol id hosting the built-in subscribe/unsubscribe
/// actions. Always registered; this is the only protocol id a caller
/// cannot register a handler against.
pub const CONTROL_PROTOCOL: u8 = 0;
pub const ACTION_SUBSCRIBE: u8 = 0;
pub const ACTION_UNSUBSCRIBE: u8 = 1;
/// Server-originated error event: `message_id` echoes the request that
/// couldn't be serviced, with a single `Scalar` parameter carrying the
/// error code below.
pub const ACTION_ERROR: u8 = 2;

/// "All protocols" sentinel for subscribe/unsubscribe (invariant I4).
pub const ALL_PROTOCOLS: u8 = 0xFF;

/// Error code delivered via [`ACTION_ERROR`] when a request names a
/// `(protocol, action)` pair with no registered handler.
pub const ERROR_CODE_ENOENT: u64 = 1;

/// Reads the target protocol id out of the single inline `Scalar`
/// parameter a subscribe/unsubscribe request carries. Absent or
/// malformed params default to the "all" sentinel, which is the safest
/// failure mode for unsubscribe (drop the client) and a no-op-ish
/// broad subscribe that callers will notice quickly.
fn target_protocol(env: &Envelope) -> u8 {
    match env.descriptors().first() {
        Some(ParamDescriptor::Scalar(value)) => *value as u8,
        _ => ALL_PROTOCOLS,
    }
}

/// Registers the control protocol's two actions against `registry`.
///
/// By the time either handler runs, server core has already guaranteed
/// `env.client` names an existing row in the client table — for a stream
/// client that happened at `accept`, for a datagram peer's first contact
/// it happens in the datagram drain loop right before dispatch (see
/// `Server`'s receive path), which is why these handlers only ever
/// mutate an existing record rather than synthesizing one themselves.
///
/// The closures capture `Weak`, not `Arc`: `registry` is stored *inside*
/// `SharedState`, so an `Arc` capture here would be a strong cycle
/// (`shared -> registry -> these closures -> shared`) that never drops.
/// `upgrade()` only fails once the owning `Server` itself is gone, in
/// which case there's nothing left to dispatch to.
pub(crate) fn register(registry: &mut ProtocolRegistry, state: Arc<Mutex<SharedState>>, on_disconnect: Option<DisconnectCallback>) {
    let subscribe_state = Arc::downgrade(&state);
    registry.register(
        CONTROL_PROTOCOL,
        ACTION_SUBSCRIBE,
        Arc::new(move |env: &Envelope, _out: &mut OutgoingBuffer<'_>| -> GrachtResult<()> {
            let Some(state) = subscribe_state.upgrade() else { return Ok(()) };
            let protocol = target_protocol(env);
            let mut guard = state.lock().unwrap();
            if let Some(record) = guard.clients.get_mut(env.client) {
                record.subscriptions.set(protocol);
            }
            Ok(())
        }),
    );

    let unsubscribe_state = Arc::downgrade(&state);
    registry.register(
        CONTROL_PROTOCOL,
        ACTION_UNSUBSCRIBE,
        Arc::new(move |env: &Envelope, _out: &mut OutgoingBuffer<'_>| -> GrachtResult<()> {
            let protocol = target_protocol(env);
            let destroyed = unsubscribe_one(&unsubscribe_state, env.client, protocol);
            if destroyed
                && let Some(cb) = &on_disconnect
            {
                cb(env.client);
            }
            Ok(())
        }),
    );
}

/// Clears `protocol` on `handle`'s subscription bitmap; if `protocol` is
/// the "all" sentinel, also removes the client record (and, for a stream
/// client, shuts down its socket so the reactor observes a natural
/// disconnect on its next read). Returns whether the client was
/// destroyed, so the caller can fire `onDisconnect` outside the lock.
/// Returns `false` without doing anything if `state` has already been
/// torn down (the owning `Server` is gone).
fn unsubscribe_one(state: &Weak<Mutex<SharedState>>, handle: Handle, protocol: u8) -> bool {
    let Some(state) = state.upgrade() else { return false };
    let mut guard = state.lock().unwrap();
    if let Some(record) = guard.clients.get_mut(handle) {
        record.subscriptions.clear(protocol);
    }
    if protocol != ALL_PROTOCOLS {
        return false;
    }
    let Some(record) = guard.clients.remove(handle) else { return false };
    guard.dgram_peers.retain(|_, h| *h != handle);
    drop(guard);

    if let crate::client::ClientTransport::Stream { writer } = &record.transport {
        let _ = writer.lock().unwrap().shutdown(std::net::Shutdown::Both);
    }
    true
}
