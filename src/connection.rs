use std::fmt;
use std::sync::{Arc, Condvar, Mutex, Weak};

use crate::endpoint::{self, Endpoint, State};
use crate::packet::{Identity, LinkAddress, Packet};
use crate::post_office::Shared;
use crate::Result;

/// A connection shared between its socket handle, the registries and the service threads.
pub struct Connection {
    identity: Identity,
    endpoint: Mutex<Endpoint>,
    // Signaled whenever a blocked connect() should look at the state again
    state_changed: Condvar,
    host: Weak<Shared>,
}

struct EndpointContext {
    host: Option<Arc<Shared>>,
    woken: bool,
    finished: bool,
}

impl EndpointContext {
    fn new(host: &Weak<Shared>) -> Self {
        Self {
            host: host.upgrade(),
            woken: false,
            finished: false,
        }
    }
}

impl endpoint::HostContext for EndpointContext {
    fn send_packet(&mut self, packet: Packet) {
        if let Some(host) = &self.host {
            host.enqueue(packet);
        }
    }

    fn wake(&mut self) {
        self.woken = true;
    }

    fn finish(&mut self) {
        self.finished = true;
    }
}

impl Connection {
    pub(crate) fn new(
        identity: Identity,
        local_addr: LinkAddress,
        payload_size_max: usize,
        host: Weak<Shared>,
    ) -> Self {
        Self {
            identity,
            endpoint: Mutex::new(Endpoint::new(identity, local_addr, payload_size_max)),
            state_changed: Condvar::new(),
            host,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn state(&self) -> State {
        self.endpoint.lock().unwrap().state()
    }

    // Runs one transition under the endpoint lock. Deregistration waits until the lock is
    // released.
    fn transition<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Endpoint, &mut EndpointContext) -> R,
    {
        let ref mut ctx = EndpointContext::new(&self.host);

        let result = {
            let ref mut endpoint = *self.endpoint.lock().unwrap();

            let result = f(endpoint, ctx);

            if ctx.woken {
                self.state_changed.notify_all();
            }

            result
        };

        if ctx.finished {
            if let Some(host) = &ctx.host {
                host.deregister(self);
            }
        }

        result
    }

    /// Runs `register`, then starts an active open and blocks until the handshake completes or
    /// fails. Returns the state the handshake settled in.
    ///
    /// The endpoint stays locked from registration until the SYN is out, so a packet dispatched
    /// to this connection in between always finds it in SYN_SENT.
    pub(crate) fn connect<F>(&self, register: F) -> Result<State>
    where
        F: FnOnce() -> Result<()>,
    {
        let ref mut ctx = EndpointContext::new(&self.host);

        let mut endpoint = self.endpoint.lock().unwrap();

        register()?;

        endpoint.connect(ctx);

        while endpoint.state() == State::SynSent {
            endpoint = self.state_changed.wait(endpoint).unwrap();
        }

        Ok(endpoint.state())
    }

    pub(crate) fn accept(&self) -> bool {
        self.transition(|endpoint, ctx| endpoint.accept(ctx))
    }

    pub(crate) fn close(&self) {
        self.transition(|endpoint, ctx| endpoint.close(ctx));
    }

    pub(crate) fn send(&self, bytes: &[u8]) -> Result<usize> {
        self.transition(|endpoint, ctx| endpoint.send(bytes, ctx))
    }

    pub(crate) fn receive(&self, max_bytes: usize) -> Option<Vec<u8>> {
        self.transition(|endpoint, ctx| endpoint.receive(max_bytes, ctx))
    }

    pub(crate) fn handle_packet(&self, packet: &Packet) {
        self.transition(|endpoint, ctx| endpoint.handle_packet(packet, ctx));
    }

    pub(crate) fn handle_timer(&self) {
        self.transition(|endpoint, ctx| endpoint.handle_timer(ctx));
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("identity", &self.identity)
            .finish()
    }
}

/// Application handle to an established connection.
///
/// Dropping a socket closes it.
pub struct Socket {
    connection: Arc<Connection>,
    closed: bool,
}

impl Socket {
    pub(crate) fn new(connection: Arc<Connection>) -> Self {
        Self {
            connection,
            closed: false,
        }
    }

    pub fn identity(&self) -> Identity {
        *self.connection.identity()
    }

    /// Returns the current protocol state of the underlying connection.
    pub fn state(&self) -> State {
        self.connection.state()
    }

    /// Queues `bytes` for reliable, in-order delivery. As many segments as the send window allows
    /// are transmitted immediately; the rest go out as acknowledgements arrive.
    ///
    /// Fails with [`Error::NotConnected`](crate::Error::NotConnected) once either side has begun
    /// closing the connection.
    pub fn send(&mut self, bytes: &[u8]) -> Result<usize> {
        self.connection.send(bytes)
    }

    /// Reads up to `max_bytes` of in-order data without blocking.
    ///
    /// Returns `Some` with an empty vector if nothing has arrived yet, and `None` once the peer
    /// has closed the connection and all of its data has been read.
    pub fn receive(&mut self, max_bytes: usize) -> Option<Vec<u8>> {
        self.connection.receive(max_bytes)
    }

    /// Closes the connection gracefully. Data already passed to [`Socket::send`] is still
    /// delivered unless the peer has stopped accepting it.
    pub fn close(mut self) {
        self.closed = true;
        self.connection.close();
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        if !self.closed {
            self.connection.close();
        }
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("identity", self.connection.identity())
            .finish()
    }
}
