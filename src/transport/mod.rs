//! Transport Layer
//!
//! Seam between the connection service and whatever actually carries bytes:
//!
//! - [`traits`]: the adapter contract (listening channels, client sockets,
//!   split socket halves)
//! - [`frame`]: terminator-delimited message framing over raw byte streams
//! - [`in_memory`]: loopback transport over duplex pipes for embedded use
//!   and tests
//!
//! The concrete platform adapter lives outside this crate; the service only
//! ever sees the [`Transport`] trait.

pub mod frame;
pub mod in_memory;
pub mod traits;

// Re-exports for convenience
pub use frame::{encode, FrameDecoder, FrameError, MAX_MESSAGE_SIZE, MESSAGE_TERMINATOR};
pub use in_memory::{InMemoryTransport, Medium};
pub use traits::{
    ListeningChannel, PeerSocket, SocketReader, SocketWriter, Transport, TransportError,
};
