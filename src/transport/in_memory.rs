//! In-Memory Transport
//!
//! Loopback implementation of the transport contract for embedded use and
//! tests. A shared [`Medium`] stands in for the radio: endpoints register
//! listening channels on it and client connects are matched to a registered
//! listener, producing a pair of duplex pipe sockets.
//!
//! The medium reproduces the failure modes the service must survive:
//! connecting to a channel nobody listens on fails, dropped endpoints break
//! the peer's pipe, and [`Medium::inject_listen_faults`] simulates
//! channel-level resource exhaustion.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::channels::ChannelId;
use crate::registry::PeerId;

use super::traits::{ListeningChannel, PeerSocket, Transport, TransportError};

/// Buffer size of each simulated stream pipe.
const PIPE_CAPACITY: usize = 64 * 1024;

/// A connect attempt queued at a listening endpoint.
struct ConnectOffer {
    caller: PeerId,
    socket: PeerSocket,
}

#[derive(Default)]
struct MediumState {
    /// Listening endpoints keyed by (device address, channel).
    listeners: HashMap<(PeerId, ChannelId), mpsc::UnboundedSender<ConnectOffer>>,
    /// Remaining channel opens that should fail with a fault.
    listen_faults: u32,
}

/// Shared loopback medium connecting in-process endpoints.
#[derive(Default)]
pub struct Medium {
    state: Mutex<MediumState>,
}

impl Medium {
    /// Create an empty medium.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create an endpoint with the given device address.
    #[must_use]
    pub fn endpoint(self: &Arc<Self>, address: impl Into<String>) -> InMemoryTransport {
        InMemoryTransport {
            medium: Arc::clone(self),
            local: PeerId::new(address),
        }
    }

    /// Make the next `n` listening-channel opens fail with a transport
    /// fault, simulating platform resource exhaustion.
    pub fn inject_listen_faults(&self, n: u32) {
        self.state.lock().listen_faults = n;
    }

    fn register_listener(
        &self,
        key: (PeerId, ChannelId),
    ) -> Result<mpsc::UnboundedReceiver<ConnectOffer>, TransportError> {
        let mut state = self.state.lock();
        if state.listen_faults > 0 {
            state.listen_faults -= 1;
            return Err(TransportError::Fault(
                "simulated channel exhaustion".to_string(),
            ));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.listeners.insert(key, tx);
        Ok(rx)
    }

    fn unregister_listener(&self, key: &(PeerId, ChannelId)) {
        self.state.lock().listeners.remove(key);
    }

    fn offer(
        &self,
        key: &(PeerId, ChannelId),
        offer: ConnectOffer,
    ) -> Result<(), TransportError> {
        let state = self.state.lock();
        match state.listeners.get(key) {
            Some(tx) => tx.send(offer).map_err(|_| TransportError::ConnectFailed),
            None => Err(TransportError::ConnectFailed),
        }
    }
}

/// One device's endpoint onto a shared [`Medium`].
pub struct InMemoryTransport {
    medium: Arc<Medium>,
    local: PeerId,
}

struct InMemoryListener {
    key: (PeerId, ChannelId),
    offers: mpsc::UnboundedReceiver<ConnectOffer>,
    medium: Arc<Medium>,
}

impl Drop for InMemoryListener {
    fn drop(&mut self) {
        self.medium.unregister_listener(&self.key);
    }
}

#[async_trait]
impl ListeningChannel for InMemoryListener {
    async fn accept_once(&mut self) -> Result<(PeerId, PeerSocket), TransportError> {
        match self.offers.recv().await {
            Some(offer) => Ok((offer.caller, offer.socket)),
            None => Err(TransportError::Stopped),
        }
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    fn local_id(&self) -> PeerId {
        self.local.clone()
    }

    async fn open_listening_channel(
        &self,
        service_name: &str,
        channel: ChannelId,
    ) -> Result<Box<dyn ListeningChannel>, TransportError> {
        let key = (self.local.clone(), channel);
        let offers = self.medium.register_listener(key.clone())?;
        tracing::debug!(service = service_name, channel = %channel, "listening channel open");
        Ok(Box::new(InMemoryListener {
            key,
            offers,
            medium: Arc::clone(&self.medium),
        }))
    }

    async fn open_client_socket(
        &self,
        peer: &PeerId,
        channel: ChannelId,
    ) -> Result<PeerSocket, TransportError> {
        let (near, far) = tokio::io::duplex(PIPE_CAPACITY);
        let offer = ConnectOffer {
            caller: self.local.clone(),
            socket: PeerSocket::from_stream(far),
        };
        self.medium.offer(&(peer.clone(), channel), offer)?;
        Ok(PeerSocket::from_stream(near))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ChannelAllocator;
    use crate::transport::{SocketReader, SocketWriter};

    fn first_channel() -> ChannelId {
        ChannelAllocator::new().channels()[0]
    }

    #[tokio::test]
    async fn connect_reaches_a_listening_endpoint() {
        let medium = Medium::new();
        let server = medium.endpoint("server");
        let client = medium.endpoint("client");

        let mut listening = server
            .open_listening_channel("test-svc", first_channel())
            .await
            .unwrap();

        let mut client_sock = client
            .open_client_socket(&PeerId::new("server"), first_channel())
            .await
            .unwrap();

        let (caller, mut server_sock) = listening.accept_once().await.unwrap();
        assert_eq!(caller, PeerId::new("client"));

        client_sock.writer.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 8];
        let n = server_sock.reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[tokio::test]
    async fn connect_without_listener_fails() {
        let medium = Medium::new();
        let client = medium.endpoint("client");

        let result = client
            .open_client_socket(&PeerId::new("nobody"), first_channel())
            .await;
        assert!(matches!(result, Err(TransportError::ConnectFailed)));
    }

    #[tokio::test]
    async fn dropping_the_listener_frees_the_channel() {
        let medium = Medium::new();
        let server = medium.endpoint("server");
        let client = medium.endpoint("client");

        let listening = server
            .open_listening_channel("test-svc", first_channel())
            .await
            .unwrap();
        drop(listening);

        let result = client
            .open_client_socket(&PeerId::new("server"), first_channel())
            .await;
        assert!(matches!(result, Err(TransportError::ConnectFailed)));
    }

    #[tokio::test]
    async fn injected_fault_surfaces_on_listen() {
        let medium = Medium::new();
        let server = medium.endpoint("server");
        medium.inject_listen_faults(1);

        let result = server
            .open_listening_channel("test-svc", first_channel())
            .await;
        assert!(matches!(result, Err(TransportError::Fault(_))));

        // The injected fault is consumed; the next open succeeds.
        assert!(server
            .open_listening_channel("test-svc", first_channel())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn accept_stays_pending_until_a_peer_connects() {
        let medium = Medium::new();
        let server = medium.endpoint("server");
        let client = medium.endpoint("client");

        let mut listening = server
            .open_listening_channel("test-svc", first_channel())
            .await
            .unwrap();

        let mut accept = tokio_test::task::spawn(listening.accept_once());
        tokio_test::assert_pending!(accept.poll());

        client
            .open_client_socket(&PeerId::new("server"), first_channel())
            .await
            .unwrap();

        let (caller, _socket) = tokio_test::assert_ready_ok!(accept.poll());
        assert_eq!(caller, PeerId::new("client"));
    }
}
