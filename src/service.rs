//! Connection Service Façade
//!
//! Composes the channel pool, accept and connect loops, socket registry,
//! message framing, and event dispatch behind one handle. A caller claims
//! the service in the server or client role, exchanges framed text messages
//! with connected peers, and tears everything down with `shutdown`.
//!
//! # Task model
//!
//! One long-lived task runs the accept loop (server role); the connect loop
//! runs inline in `connect`. Every registered peer gets exactly one reader
//! task (decode loop feeding the listener) and one writer task (draining the
//! peer's outbound frame queue). The registry stores only queue senders and
//! abort handles, so no lock is ever held across socket I/O: a slow write to
//! one peer cannot stall sends to another.
//!
//! # Fault containment
//!
//! Per-peer faults (disconnection, I/O error, garbage frames) tear down that
//! peer alone and surface as `on_connection_lost`. Only channel-level
//! transport faults stop the accept or connect loop, and those surface once
//! as `on_transport_fault`.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::acceptor;
use crate::channels::{ChannelAllocator, MAX_CHANNELS};
use crate::config::ServiceConfig;
use crate::events::{ConnectionListener, EventDispatcher};
use crate::initiator;
use crate::registry::{PeerConnection, PeerId, RegistryError, SocketRegistry};
use crate::session::{Session, SessionRole};
use crate::transport::frame::{self, FrameDecoder, FrameError};
use crate::transport::{PeerSocket, SocketReader, SocketWriter, Transport};

/// Errors surfaced by façade operations.
///
/// Variants stay coarse on purpose: per-peer failures are contained to that
/// peer and reported through `on_connection_lost`, richer transport detail
/// only ever surfaces through `on_transport_fault`.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// A session is already active; at most one caller owns the service.
    #[error("a session is already active")]
    SessionActive,

    /// `start_server` asked for more peers than the channel pool holds.
    #[error("requested {requested} connections but only {} channels exist", MAX_CHANNELS)]
    TooManyConnections {
        /// The rejected connection count.
        requested: usize,
    },

    /// The peer is not registered.
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),

    /// The peer's outbound queue is gone; its link is tearing down.
    #[error("send to {0} failed")]
    SendFailed(PeerId),

    /// Broadcast with no registered peers.
    #[error("no peers connected")]
    NoPeers,

    /// Every channel and retry combination was exhausted.
    #[error("could not connect to {0}")]
    ConnectFailed(PeerId),

    /// The session stopped while the operation was in flight.
    #[error("service is stopping")]
    Stopped,

    /// The message cannot be framed.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// The registry rejected a registration.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Shared state behind a [`ConnectionService`] handle.
pub(crate) struct ServiceInner {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) config: ServiceConfig,
    pub(crate) channels: ChannelAllocator,
    pub(crate) registry: SocketRegistry,
    pub(crate) dispatcher: EventDispatcher,
    session: Mutex<Option<Session>>,
}

impl ServiceInner {
    /// Register `peer` and spawn its reader and writer tasks.
    ///
    /// The reader waits on a go-signal that is only sent once registration
    /// holds, so no event can fire for a peer that lost the registration
    /// race; the losing socket is closed by aborting its tasks.
    pub(crate) fn attach_peer(
        self: &Arc<Self>,
        peer: PeerId,
        socket: PeerSocket,
    ) -> Result<(), ServiceError> {
        let PeerSocket { reader, writer } = socket;
        let (frame_tx, frame_rx) = mpsc::channel(self.config.send_queue_depth);
        let (ready_tx, ready_rx) = oneshot::channel();

        let read_task = tokio::spawn(read_loop(
            Arc::clone(self),
            peer.clone(),
            reader,
            ready_rx,
        ));
        let write_task = tokio::spawn(write_loop(
            Arc::clone(self),
            peer.clone(),
            writer,
            frame_rx,
        ));

        let conn = PeerConnection::new(
            peer,
            frame_tx,
            read_task.abort_handle(),
            write_task.abort_handle(),
        );
        if let Err(error) = self.registry.put(conn) {
            read_task.abort();
            write_task.abort();
            return Err(error.into());
        }

        let _ = ready_tx.send(());
        Ok(())
    }

    /// Remove `peer` exactly once and report the loss.
    ///
    /// Callable from the reader task, the writer task, or the façade; only
    /// the caller that actually removed the entry dispatches the event, so a
    /// read failure racing an explicit shutdown cannot double-report.
    pub(crate) fn teardown_peer(&self, peer: &PeerId) {
        if let Some(conn) = self.registry.remove(peer) {
            debug!(peer = %peer, uptime_secs = conn.uptime_secs(), "tearing down peer");
            conn.shutdown();
            self.dispatcher.connection_lost(peer);
        }
    }
}

/// Per-peer decode loop: read, accumulate, dispatch complete messages.
async fn read_loop(
    inner: Arc<ServiceInner>,
    peer: PeerId,
    mut reader: Box<dyn SocketReader>,
    ready: oneshot::Receiver<()>,
) {
    // Abandon silently if registration lost the race.
    if ready.await.is_err() {
        return;
    }

    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; inner.config.read_buffer_bytes];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                debug!(peer = %peer, "peer closed the stream");
                break;
            }
            Ok(n) => {
                decoder.push(&buf[..n]);
                loop {
                    match decoder.next_message() {
                        Ok(Some(message)) => {
                            inner.dispatcher.message_received(&peer, &message);
                        }
                        Ok(None) => break,
                        Err(error) => {
                            warn!(peer = %peer, %error, "frame decode failed");
                            inner.teardown_peer(&peer);
                            return;
                        }
                    }
                }
            }
            Err(error) => {
                debug!(peer = %peer, %error, "read failed");
                break;
            }
        }
    }

    inner.teardown_peer(&peer);
}

/// Per-peer write loop: drain the outbound frame queue onto the socket.
async fn write_loop(
    inner: Arc<ServiceInner>,
    peer: PeerId,
    mut writer: Box<dyn SocketWriter>,
    mut frames: mpsc::Receiver<Vec<u8>>,
) {
    while let Some(frame) = frames.recv().await {
        if let Err(error) = writer.write_all(&frame).await {
            warn!(peer = %peer, %error, "write failed");
            inner.teardown_peer(&peer);
            return;
        }
    }
    // Queue closed by teardown or shutdown; nothing left to flush.
}

/// The connection service.
///
/// Cheap to clone; clones share one service. See the [module
/// docs](self) for the task and fault model.
#[derive(Clone)]
pub struct ConnectionService {
    inner: Arc<ServiceInner>,
}

impl ConnectionService {
    /// Build a service over `transport` with `config`.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, config: ServiceConfig) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                transport,
                config,
                channels: ChannelAllocator::new(),
                registry: SocketRegistry::new(),
                dispatcher: EventDispatcher::new(),
                session: Mutex::new(None),
            }),
        }
    }

    /// Install the single event listener and fire `on_service_ready`.
    ///
    /// The listener slot may only be swapped between sessions.
    ///
    /// # Errors
    ///
    /// [`ServiceError::SessionActive`] while a session is claimed.
    pub fn register_listener(
        &self,
        listener: Arc<dyn ConnectionListener>,
    ) -> Result<(), ServiceError> {
        if self.inner.session.lock().is_some() {
            return Err(ServiceError::SessionActive);
        }
        self.inner.dispatcher.set_listener(listener);
        self.inner.dispatcher.service_ready();
        Ok(())
    }

    /// Empty the listener slot. Only permitted between sessions.
    ///
    /// # Errors
    ///
    /// [`ServiceError::SessionActive`] while a session is claimed.
    pub fn unregister_listener(&self) -> Result<(), ServiceError> {
        if self.inner.session.lock().is_some() {
            return Err(ServiceError::SessionActive);
        }
        self.inner.dispatcher.clear_listener();
        Ok(())
    }

    /// Claim the session for `owner` and start admitting up to
    /// `max_connections` peers.
    ///
    /// The accept loop runs in the background; progress is reported through
    /// the listener (`on_incoming_connection` per peer, then
    /// `on_max_connections_reached`).
    ///
    /// # Errors
    ///
    /// [`ServiceError::TooManyConnections`] if `max_connections` exceeds the
    /// channel pool — rejected before any channel is opened — and
    /// [`ServiceError::SessionActive`] if a session is already claimed.
    pub fn start_server(
        &self,
        owner: impl Into<String>,
        max_connections: usize,
    ) -> Result<(), ServiceError> {
        if max_connections > MAX_CHANNELS {
            return Err(ServiceError::TooManyConnections {
                requested: max_connections,
            });
        }

        let stop = {
            let mut session = self.inner.session.lock();
            if session.is_some() {
                return Err(ServiceError::SessionActive);
            }
            let claimed = Session::new(owner, SessionRole::Server);
            let stop = claimed.stop_flag();
            info!(owner = claimed.owner(), max_connections, "server session claimed");
            *session = Some(claimed);
            stop
        };

        self.inner.registry.reopen();
        let handle = tokio::spawn(acceptor::run_acceptor(
            Arc::clone(&self.inner),
            max_connections,
            stop,
        ));
        if let Some(session) = self.inner.session.lock().as_mut() {
            session.set_acceptor(handle);
        }
        Ok(())
    }

    /// Stop admitting new peers.
    ///
    /// Peers already accepted stay connected and the session stays claimed;
    /// use [`shutdown`](Self::shutdown) to release everything.
    pub fn stop_server(&self) {
        if let Some(session) = self.inner.session.lock().as_ref() {
            if session.role() == SessionRole::Server {
                info!("server stop requested");
                session.request_stop();
            }
        }
    }

    /// Claim the session for `owner` and connect to `peer`, probing every
    /// channel with bounded retries.
    ///
    /// On success the peer is registered and its reader task is running. On
    /// failure the session claim is rolled back so the caller may retry.
    ///
    /// # Errors
    ///
    /// [`ServiceError::SessionActive`] if a session is already claimed,
    /// [`ServiceError::ConnectFailed`] when every channel and retry
    /// combination is exhausted.
    pub async fn connect(
        &self,
        owner: impl Into<String>,
        peer: PeerId,
    ) -> Result<(), ServiceError> {
        let stop = {
            let mut session = self.inner.session.lock();
            if session.is_some() {
                return Err(ServiceError::SessionActive);
            }
            let claimed = Session::new(owner, SessionRole::Client);
            let stop = claimed.stop_flag();
            info!(owner = claimed.owner(), peer = %peer, "client session claimed");
            *session = Some(claimed);
            stop
        };
        self.inner.registry.reopen();

        let connected = initiator::connect_with_retries(
            self.inner.transport.as_ref(),
            &self.inner.channels,
            &self.inner.dispatcher,
            &peer,
            self.inner.config.connect_attempts,
            self.inner.config.connect_retry_delay(),
            &stop,
        )
        .await;

        let socket = match connected {
            Ok(socket) => socket,
            Err(error) => {
                self.release_session();
                return Err(error);
            }
        };

        match self.inner.attach_peer(peer.clone(), socket) {
            Ok(()) => {
                info!(peer = %peer, "connected");
                Ok(())
            }
            Err(error) => {
                self.release_session();
                Err(error)
            }
        }
    }

    /// Send one framed message to `peer`.
    ///
    /// Success means the bytes were handed to the peer's writer, not that
    /// the peer acknowledged them. Not retried.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Frame`] for unencodable messages,
    /// [`ServiceError::UnknownPeer`] if `peer` is not registered,
    /// [`ServiceError::SendFailed`] if the peer's link is tearing down.
    pub async fn send_message(&self, peer: &PeerId, message: &str) -> Result<(), ServiceError> {
        let frame = frame::encode(message)?;
        let Some(tx) = self.inner.registry.sender(peer) else {
            return Err(ServiceError::UnknownPeer(peer.clone()));
        };
        tx.send(frame)
            .await
            .map_err(|_| ServiceError::SendFailed(peer.clone()))
    }

    /// Best-effort broadcast to every registered peer, in the order they
    /// connected.
    ///
    /// A dead or closing peer never aborts delivery to the rest; its loss
    /// surfaces through `on_connection_lost`, not through this result.
    ///
    /// # Errors
    ///
    /// [`ServiceError::NoPeers`] when the registry is empty and
    /// [`ServiceError::Frame`] for unencodable messages.
    pub async fn broadcast_message(&self, message: &str) -> Result<(), ServiceError> {
        let frame = frame::encode(message)?;
        let peers = self.inner.registry.senders();
        if peers.is_empty() {
            return Err(ServiceError::NoPeers);
        }
        for (peer, tx) in peers {
            if tx.send(frame.clone()).await.is_err() {
                debug!(peer = %peer, "broadcast skipped a closing peer");
            }
        }
        Ok(())
    }

    /// Registered peers in the order they connected.
    #[must_use]
    pub fn list_connections(&self) -> Vec<PeerId> {
        self.inner.registry.peer_ids()
    }

    /// Disconnect one peer explicitly.
    ///
    /// Idempotent; fires `on_connection_lost` only if the peer was still
    /// registered.
    pub fn disconnect_peer(&self, peer: &PeerId) {
        self.inner.teardown_peer(peer);
    }

    /// The local device address.
    #[must_use]
    pub fn local_address(&self) -> PeerId {
        self.inner.transport.local_id()
    }

    /// Whether a session is currently claimed.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.session.lock().is_some()
    }

    /// Role of the active session, if any.
    #[must_use]
    pub fn session_role(&self) -> Option<SessionRole> {
        self.inner.session.lock().as_ref().map(Session::role)
    }

    /// Stop all loops, close every registered socket, and clear the
    /// session.
    ///
    /// Idempotent: a second call observes no session and does nothing.
    /// Peers torn down here produce no `on_connection_lost` events — their
    /// entries are removed before their sockets die.
    pub fn shutdown(&self) {
        let session = self.inner.session.lock().take();
        let Some(mut session) = session else {
            debug!("shutdown with no active session");
            return;
        };

        session.request_stop();
        session.abort_acceptor();
        let closed = self.inner.registry.close_all();
        info!(owner = session.owner(), closed, "service shut down");
    }

    /// Roll back a failed session claim.
    fn release_session(&self) {
        *self.inner.session.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Medium;

    fn quick_config() -> ServiceConfig {
        ServiceConfig {
            connect_retry_delay_ms: 1,
            accept_poll_ms: 5,
            ..ServiceConfig::default()
        }
    }

    fn service(name: &str) -> ConnectionService {
        let medium = Medium::new();
        ConnectionService::new(Arc::new(medium.endpoint(name)), quick_config())
    }

    #[tokio::test]
    async fn start_server_rejects_oversized_capacity() {
        let service = service("srv");
        let err = service.start_server("app", MAX_CHANNELS + 1).unwrap_err();
        assert!(matches!(
            err,
            ServiceError::TooManyConnections { requested } if requested == MAX_CHANNELS + 1
        ));
        assert!(!service.is_active());
    }

    #[tokio::test]
    async fn second_session_claim_is_rejected() {
        let service = service("srv");
        service.start_server("first", 1).unwrap();

        assert!(matches!(
            service.start_server("second", 1),
            Err(ServiceError::SessionActive)
        ));
        assert!(matches!(
            service.connect("second", PeerId::new("remote")).await,
            Err(ServiceError::SessionActive)
        ));
        assert_eq!(service.session_role(), Some(SessionRole::Server));

        service.shutdown();
    }

    #[tokio::test]
    async fn listener_swap_is_refused_mid_session() {
        let service = service("srv");
        service.start_server("app", 1).unwrap();

        let (listener, _rx) = crate::events::ChannelListener::new_pair();
        assert!(matches!(
            service.register_listener(listener),
            Err(ServiceError::SessionActive)
        ));
        assert!(matches!(
            service.unregister_listener(),
            Err(ServiceError::SessionActive)
        ));

        service.shutdown();
        assert!(service.unregister_listener().is_ok());
    }

    #[tokio::test]
    async fn send_to_unknown_peer_fails() {
        let service = service("srv");
        let err = service
            .send_message(&PeerId::new("stranger"), "hello")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::UnknownPeer(_)));
    }

    #[tokio::test]
    async fn broadcast_with_no_peers_fails() {
        let service = service("srv");
        assert!(matches!(
            service.broadcast_message("anyone?").await,
            Err(ServiceError::NoPeers)
        ));
    }

    #[tokio::test]
    async fn unencodable_message_is_rejected_locally() {
        let service = service("srv");
        let err = service
            .send_message(&PeerId::new("x"), "bad\0payload")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Frame(FrameError::EmbeddedTerminator)
        ));
    }

    #[tokio::test]
    async fn shutdown_without_session_is_a_noop() {
        let service = service("srv");
        service.shutdown();
        service.shutdown();
        assert!(!service.is_active());
        assert!(service.list_connections().is_empty());
    }
}
