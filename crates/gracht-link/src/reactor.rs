use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use mio::{Events, Interest, Token, event::Source};

/// One readiness event reported by [`Reactor::wait`].
#[derive(Debug, Clone, Copy)]
pub struct ReactorEvent {
    pub token: Token,
    pub readable: bool,
    pub disconnected: bool,
}

/// A cheap, cloneable handle that can request a reactor's `wait` loop to
/// stop from any thread, without needing a reference to the `Reactor`
/// itself — obtained up front via [`Reactor::shutdown_handle`] and handed
/// off to whatever thread should be able to break a blocking `run` loop.
#[derive(Clone)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn signal(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Thin wrapper over `mio::Poll`. Level-triggered: a handle with data still
/// pending keeps showing up on every `wait` call until it is drained, which
/// is all the spec requires ("edge-triggered semantics are not assumed").
pub struct Reactor {
    poll: mio::Poll,
    events: Events,
    running: Arc<AtomicBool>,
}

/// Poll once per `wait` call with this timeout, so a cleared `running` flag
/// is noticed promptly instead of blocking forever on a quiet socket.
const POLL_TIMEOUT: Duration = Duration::from_millis(250);

impl Reactor {
    pub fn create(event_capacity: usize) -> io::Result<Self> {
        Ok(Self {
            poll: mio::Poll::new()?,
            events: Events::with_capacity(event_capacity),
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Clones out a handle that can request shutdown from any thread,
    /// independent of this `Reactor`'s own lifetime or borrow state —
    /// obtain this before handing the reactor off to a blocking `wait`
    /// loop on another thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.running.clone())
    }

    pub fn add(&self, source: &mut dyn Source, token: Token) -> io::Result<()> {
        self.poll.registry().register(source, token, Interest::READABLE)
    }

    pub fn remove(&self, source: &mut dyn Source) -> io::Result<()> {
        self.poll.registry().deregister(source)
    }

    /// Exposes the underlying `mio::Registry` for callers (e.g. [`crate::Link`]
    /// and [`crate::DatagramLink`]) that need to re-register a source with a
    /// different interest set, such as arming `WRITABLE` on backpressure.
    pub fn registry(&self) -> &mio::Registry {
        self.poll.registry()
    }

    /// Blocks until at least one event is ready or the reactor is shutting
    /// down, calling `handler` once per readiness event observed.
    pub fn wait<F: FnMut(ReactorEvent)>(&mut self, mut handler: F) -> io::Result<usize> {
        while self.running.load(Ordering::Acquire) {
            match self.poll.poll(&mut self.events, Some(POLL_TIMEOUT)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
            if self.events.is_empty() {
                continue;
            }
            let mut count = 0;
            for event in self.events.iter() {
                handler(ReactorEvent {
                    token: event.token(),
                    readable: event.is_readable(),
                    disconnected: event.is_read_closed() || event.is_error(),
                });
                count += 1;
            }
            return Ok(count);
        }
        Ok(0)
    }

    /// Clears the running flag so a blocked or future `wait` returns
    /// promptly with zero events, per spec: "wait blocks ... until the
    /// server is shutting down".
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn destroy(self) {}
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixStream;

    use super::*;

    #[test]
    fn wait_reports_readable_event() {
        let mut reactor = Reactor::create(16).unwrap();
        let (a, mut b) = UnixStream::pair().unwrap();
        let mut a = mio::net::UnixStream::from_std(a);
        reactor.add(&mut a, Token(1)).unwrap();

        use std::io::Write;
        b.write_all(b"hi").unwrap();

        let mut seen = Vec::new();
        reactor.wait(|ev| seen.push(ev)).unwrap();

        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].token, Token(1));
        assert!(seen[0].readable);
    }

    #[test]
    fn shutdown_unblocks_wait_with_zero_events() {
        let mut reactor = Reactor::create(16).unwrap();
        reactor.shutdown();
        let count = reactor.wait(|_| panic!("no events expected")).unwrap();
        assert_eq!(count, 0);
    }
}
