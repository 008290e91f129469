//! Transport Adapter Contract
//!
//! The connection service never touches a concrete radio or socket API.
//! Everything it needs from the platform is expressed here: open a listening
//! channel, accept one peer socket from it, open a client socket to a remote
//! peer, and read/write/close established sockets. Production code plugs in a
//! real adapter; tests and embedded use plug in
//! [`in_memory`](super::in_memory).
//!
//! Sockets are handed over pre-split into a reading half and a writing half
//! so the per-peer reader and writer tasks can own their side outright.
//! Dropping a half closes it.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::channels::ChannelId;
use crate::registry::PeerId;

/// Errors raised by a transport adapter.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// A client connect attempt was refused or timed out. Retried per the
    /// service's bounded-retry policy.
    #[error("connect attempt failed")]
    ConnectFailed,

    /// The listening channel closed before a peer arrived.
    #[error("listening channel closed")]
    Stopped,

    /// Channel-level resource failure (e.g. the platform ran out of
    /// sockets). Reported once to the listener and never retried.
    #[error("transport fault: {0}")]
    Fault(String),

    /// I/O error on an established socket.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Reading half of a peer socket.
#[async_trait]
pub trait SocketReader: Send {
    /// Read into `buf`, returning the number of bytes read.
    ///
    /// `Ok(0)` means the peer closed the stream.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;
}

/// Writing half of a peer socket.
#[async_trait]
pub trait SocketWriter: Send {
    /// Write the entire buffer to the peer.
    async fn write_all(&mut self, buf: &[u8]) -> Result<(), TransportError>;
}

#[async_trait]
impl<T> SocketReader for T
where
    T: AsyncRead + Unpin + Send,
{
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        Ok(AsyncReadExt::read(self, buf).await?)
    }
}

#[async_trait]
impl<T> SocketWriter for T
where
    T: AsyncWrite + Unpin + Send,
{
    async fn write_all(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        AsyncWriteExt::write_all(self, buf).await?;
        Ok(())
    }
}

/// A connected stream socket, split for concurrent reading and writing.
///
/// The service gives the reading half to the peer's reader task and the
/// writing half to its writer task; the two halves never meet again.
pub struct PeerSocket {
    /// Reading half, consumed by the peer's reader task.
    pub reader: Box<dyn SocketReader>,
    /// Writing half, consumed by the peer's writer task.
    pub writer: Box<dyn SocketWriter>,
}

impl std::fmt::Debug for PeerSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSocket").finish_non_exhaustive()
    }
}

impl PeerSocket {
    /// Split any async byte stream into a boxed socket pair.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }
}

/// One listening slot on a channel. Yields at most one peer socket.
#[async_trait]
pub trait ListeningChannel: Send {
    /// Block until a peer connects, the channel closes, or the transport
    /// faults. Dropping the handle closes the channel.
    async fn accept_once(&mut self) -> Result<(PeerId, PeerSocket), TransportError>;
}

/// Stream transport consumed by the connection service.
///
/// Implementations are expected to be unstable in exactly the ways the
/// service is built to survive: sockets may drop without notice, channel
/// opens may transiently fail, and only a limited number of concurrent
/// channels exist.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The local device address.
    fn local_id(&self) -> PeerId;

    /// Advertise `service_name` on `channel` and return a one-shot
    /// listening handle.
    async fn open_listening_channel(
        &self,
        service_name: &str,
        channel: ChannelId,
    ) -> Result<Box<dyn ListeningChannel>, TransportError>;

    /// Open a client socket to `peer` on `channel`.
    async fn open_client_socket(
        &self,
        peer: &PeerId,
        channel: ChannelId,
    ) -> Result<PeerSocket, TransportError>;
}
