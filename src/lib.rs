/*

seqlink is a connection-oriented, reliable byte stream carried over an unreliable datagram link
with small packets.

# Packets

Every packet carries a 9 byte header followed by at most (link maximum - 9) bytes of payload:

  dst addr (1) | src addr (1) | dst port (1) | src port (1) | flags (1) | seq (4, big endian)

Flags select the packet kind. DATA is 0, and the rest combine ACK (0x01), SYN (0x02), FIN (0x04)
and STP (0x08) into SYN, SYN+ACK, ACK, FIN, FIN+ACK and STP. Other combinations are malformed and
dropped on arrival. Sequence numbers are only meaningful for DATA, ACK and STP.

A connection is identified by (local port, remote address, remote port). A host never holds two
connections with the same identity.

# Handshake

The initiator sends SYN until it receives SYN+ACK. The receiving host creates a connection in
SYN_RCVD and stays silent until the application accepts it, at which point SYN+ACK is sent. A
repeated SYN at an established connection means the SYN+ACK was lost, and is answered again.

If both hosts send SYN toward each other on the same identity, both connections enter DEADLOCK and
the open fails on both sides. connect() retries from another local port.

# Windows

Both directions use a fixed window of 16 sequence numbers. The sender admits a segment only while
fewer than 16 are unacknowledged; the receiver buffers segments within 16 of the next one it will
deliver and drops the rest. Each DATA is acknowledged individually by an ACK carrying its sequence
number, so acknowledgements are selective:

  base        next        base+16
  v           v           v
  #__#_##_____------------> sequence numbers

  #: in flight, unacknowledged
  _: acknowledged out of order (left of next) or admissible (right of next)

The base advances over any run of acknowledged segments. Every timer tick, each unacknowledged
segment is sent again. DATA below the receiver's base has already been delivered; it is
acknowledged again, since the sender evidently missed the first ACK.

# Closing

A host with nothing queued or in flight closes with FIN and waits for FIN+ACK (or the peer's own
FIN), resending FIN every tick.

A host with data still outstanding first sends STP, carrying the sequence number one past the
last segment it will ever send. The peer accepts nothing at or beyond that number, and stops
sending its own data, since the closing side will not read it. Once every segment below the stop
sequence has been acknowledged, the closing host proceeds with FIN.

  A: ESTABLISHED --close--> STP_SENT --last ACK--> CLOSING --FIN+ACK--> CLOSED
  B: ESTABLISHED --STP----> STP_RCVD --FIN-----> (FIN+ACK) CLOSED

A closed connection keeps whatever it received until the application has read it all, or closes
its own end, after which it is forgotten. A FIN arriving for a forgotten connection is answered
with FIN+ACK without creating any state.

# Threads

A PostOffice owns the link and runs three threads: dispatch (link -> connections), send (outbound
queue -> link), and timer (retransmission). Application calls lock only the connection they act
on.

*/

mod buffer;
mod connection;
mod endpoint;
mod error;
pub mod link;
pub mod packet;
mod post_office;
mod timer;

pub use buffer::WINDOW_SIZE;
pub use connection::Socket;
pub use endpoint::State;
pub use error::{Error, Result};
pub use link::Link;
pub use post_office::{Config, PostOffice};
