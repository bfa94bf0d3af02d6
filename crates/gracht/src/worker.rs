use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};

use gracht_communication::WorkQueue;
use gracht_utils::thread_boot;
use tracing::{debug, warn};

use crate::{envelope::{Envelope, OutgoingBuffer}, registry::Handler, sender::ClientSender};

/// One unit of work handed from the receive path to the pool: a received
/// envelope (arena-backed) and the already-resolved handler for it,
/// resolved under the registry lock on the reactor thread before enqueue
/// so workers never need to touch the protocol registry themselves.
pub struct WorkItem {
    pub envelope: Envelope,
    pub handler: Handler,
}

/// Fixed pool of `N` worker threads draining a shared [`WorkQueue`].
///
/// Each worker owns a scratchpad buffer (`slot_size` bytes) used as the
/// outgoing response buffer — distinct from the arena slot backing the
/// inbound envelope, so a worker can read its request while composing the
/// reply. On completion the envelope (and with it, any arena slot it
/// owns) is dropped, which is the single point where the slot returns to
/// the arena free list.
pub struct WorkerPool {
    queue: Arc<WorkQueue<WorkItem>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `workers` threads, each looping on `queue.pop()` until the
    /// queue is closed. `sender` is how a worker replies to the
    /// originating client without performing any reactor I/O itself.
    pub fn spawn(workers: usize, slot_size: usize, sender: Arc<ClientSender>, max_message_size: u32) -> Self {
        let queue = Arc::new(WorkQueue::new());
        let mut handles = Vec::with_capacity(workers);

        for id in 0..workers {
            let queue = queue.clone();
            let sender = sender.clone();
            let handle = thread::Builder::new()
                .name(format!("gracht-worker-{id}"))
                .spawn(move || worker_loop(id, &queue, &sender, slot_size, max_message_size))
                .expect("failed to spawn gracht worker thread");
            handles.push(handle);
        }

        Self { queue, workers: handles }
    }

    pub fn dispatch(&self, item: WorkItem) {
        self.queue.push(item);
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Signals every worker to exit once the queue drains, then joins
    /// them. Items still queued at shutdown are dropped (and with them,
    /// any arena slots they hold) without invoking their handler.
    pub fn shutdown(self) {
        self.queue.close();
        for worker in self.workers {
            if let Err(err) = worker.join() {
                warn!(?err, "gracht worker thread panicked");
            }
        }
    }
}

fn worker_loop(id: usize, queue: &WorkQueue<WorkItem>, sender: &ClientSender, slot_size: usize, max_message_size: u32) {
    thread_boot(None, gracht_utils::ThreadPriority::OSDefault);
    let mut scratch = vec![0u8; slot_size];

    while let Some(WorkItem { envelope, handler }) = queue.pop() {
        let client = envelope.client;
        let mut out = OutgoingBuffer::new(&mut scratch, max_message_size);

        if let Err(err) = handler(&envelope, &mut out) {
            debug!(worker = id, ?err, "gracht worker: handler returned an error");
            continue;
        }

        if let Some(frame) = out.encoded() {
            if let Err(err) = sender.send_client(client, frame) {
                debug!(worker = id, ?client, ?err, "gracht worker: send failed");
            }
        }
    }
}
