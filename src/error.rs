use thiserror::Error;

use crate::packet::Port;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced to socket callers.
///
/// Per-packet problems (malformed packets, out-of-window segments) never show up here; they are
/// dropped by the receiving connection and recovered through retransmission.
#[derive(Error, Debug)]
pub enum Error {
    /// Link construction or service thread failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Both peers opened toward each other at the same time, on every attempt.
    #[error("handshake collided with a simultaneous connect from the peer")]
    HandshakeCollision,

    /// No local port was free for the requested destination.
    #[error("no free local port for the requested destination")]
    PortsExhausted,

    /// The requested local port is already bound to the same destination.
    #[error("local port {0} is already in use for that destination")]
    PortInUse(Port),

    /// The connection is not established, or has started tearing down.
    #[error("connection is not established")]
    NotConnected,

    /// The post office is shutting down and refuses new connections.
    #[error("post office is shutting down")]
    Shutdown,
}
