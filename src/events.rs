//! Connection Events
//!
//! Lifecycle and message events pushed from the service to its caller.
//!
//! The service has exactly one subscriber: a [`ConnectionListener`] held in a
//! single mutable slot on the [`EventDispatcher`], swapped only while no
//! session is active. Callbacks fire from whichever task detects the event —
//! the accept loop, a reader task, or a writer task — so implementations must
//! be `Send + Sync` and should return quickly.
//!
//! [`ChannelListener`] adapts the callbacks into a plain event stream for
//! callers that would rather consume an mpsc channel.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::registry::PeerId;

/// Callbacks pushed to the single registered listener.
///
/// All methods default to no-ops so implementations only override what they
/// care about.
pub trait ConnectionListener: Send + Sync {
    /// The service is constructed and ready to claim a session.
    fn on_service_ready(&self) {}

    /// A peer connected to the local server.
    fn on_incoming_connection(&self, _peer: &PeerId) {}

    /// The server admitted its configured number of peers and stopped
    /// listening.
    fn on_max_connections_reached(&self) {}

    /// One complete message arrived from `peer`. Messages from a single peer
    /// arrive in the order that peer wrote them.
    fn on_message_received(&self, _peer: &PeerId, _message: &str) {}

    /// The link to `peer` ended: the peer disconnected, its socket failed,
    /// or its stream produced garbage.
    fn on_connection_lost(&self, _peer: &PeerId) {}

    /// The transport failed at channel level; the accept or connect loop has
    /// stopped and will not be retried by the service.
    fn on_transport_fault(&self) {}
}

/// Lifecycle and message events as plain data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionEvent {
    /// The service is ready to claim a session.
    ServiceReady,
    /// A peer connected to the local server.
    IncomingConnection {
        /// Address of the new peer.
        peer: PeerId,
    },
    /// The server admitted its configured number of peers.
    MaxConnectionsReached,
    /// One complete message arrived.
    MessageReceived {
        /// Address of the sending peer.
        peer: PeerId,
        /// Decoded message text.
        message: String,
    },
    /// The link to a peer ended.
    ConnectionLost {
        /// Address of the lost peer.
        peer: PeerId,
    },
    /// The transport failed at channel level.
    TransportFault,
}

/// Listener that forwards every callback into an unbounded channel.
#[derive(Debug)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<ConnectionEvent>,
}

impl ChannelListener {
    /// Create the listener and the receiving end of its event stream.
    #[must_use]
    pub fn new_pair() -> (Arc<Self>, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }

    fn forward(&self, event: ConnectionEvent) {
        // A dropped receiver just means nobody is watching anymore.
        let _ = self.tx.send(event);
    }
}

impl ConnectionListener for ChannelListener {
    fn on_service_ready(&self) {
        self.forward(ConnectionEvent::ServiceReady);
    }

    fn on_incoming_connection(&self, peer: &PeerId) {
        self.forward(ConnectionEvent::IncomingConnection { peer: peer.clone() });
    }

    fn on_max_connections_reached(&self) {
        self.forward(ConnectionEvent::MaxConnectionsReached);
    }

    fn on_message_received(&self, peer: &PeerId, message: &str) {
        self.forward(ConnectionEvent::MessageReceived {
            peer: peer.clone(),
            message: message.to_string(),
        });
    }

    fn on_connection_lost(&self, peer: &PeerId) {
        self.forward(ConnectionEvent::ConnectionLost { peer: peer.clone() });
    }

    fn on_transport_fault(&self) {
        self.forward(ConnectionEvent::TransportFault);
    }
}

/// Single-subscriber event fan-out.
///
/// Holds the one listener slot. Events fired while no listener is installed
/// are logged and dropped.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    listener: Arc<RwLock<Option<Arc<dyn ConnectionListener>>>>,
}

impl EventDispatcher {
    /// Create a dispatcher with an empty listener slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `listener`, replacing any previous one.
    pub fn set_listener(&self, listener: Arc<dyn ConnectionListener>) {
        *self.listener.write() = Some(listener);
    }

    /// Empty the listener slot.
    pub fn clear_listener(&self) {
        *self.listener.write() = None;
    }

    /// Clone the current listener out of the slot so callbacks run without
    /// holding the lock.
    fn current(&self) -> Option<Arc<dyn ConnectionListener>> {
        self.listener.read().clone()
    }

    pub(crate) fn service_ready(&self) {
        tracing::debug!("service ready");
        if let Some(listener) = self.current() {
            listener.on_service_ready();
        }
    }

    pub(crate) fn incoming_connection(&self, peer: &PeerId) {
        tracing::info!(peer = %peer, "incoming connection");
        if let Some(listener) = self.current() {
            listener.on_incoming_connection(peer);
        }
    }

    pub(crate) fn max_connections_reached(&self) {
        tracing::info!("max connections reached");
        if let Some(listener) = self.current() {
            listener.on_max_connections_reached();
        }
    }

    pub(crate) fn message_received(&self, peer: &PeerId, message: &str) {
        tracing::debug!(peer = %peer, bytes = message.len(), "message received");
        if let Some(listener) = self.current() {
            listener.on_message_received(peer, message);
        }
    }

    pub(crate) fn connection_lost(&self, peer: &PeerId) {
        tracing::info!(peer = %peer, "connection lost");
        if let Some(listener) = self.current() {
            listener.on_connection_lost(peer);
        }
    }

    pub(crate) fn transport_fault(&self) {
        tracing::warn!("transport fault");
        if let Some(listener) = self.current() {
            listener.on_transport_fault();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_listener_forwards_events_in_order() {
        let (listener, mut rx) = ChannelListener::new_pair();
        let dispatcher = EventDispatcher::new();
        dispatcher.set_listener(listener);

        let peer = PeerId::new("aa:bb");
        dispatcher.service_ready();
        dispatcher.incoming_connection(&peer);
        dispatcher.message_received(&peer, "hi");
        dispatcher.connection_lost(&peer);

        assert_eq!(rx.try_recv().unwrap(), ConnectionEvent::ServiceReady);
        assert_eq!(
            rx.try_recv().unwrap(),
            ConnectionEvent::IncomingConnection { peer: peer.clone() }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            ConnectionEvent::MessageReceived {
                peer: peer.clone(),
                message: "hi".to_string(),
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            ConnectionEvent::ConnectionLost { peer }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn events_without_listener_are_dropped() {
        let dispatcher = EventDispatcher::new();
        // Must not panic or block.
        dispatcher.service_ready();
        dispatcher.transport_fault();
    }

    #[test]
    fn swapping_the_listener_redirects_events() {
        let dispatcher = EventDispatcher::new();

        let (first, mut first_rx) = ChannelListener::new_pair();
        dispatcher.set_listener(first);
        dispatcher.max_connections_reached();

        let (second, mut second_rx) = ChannelListener::new_pair();
        dispatcher.set_listener(second);
        dispatcher.transport_fault();

        assert_eq!(
            first_rx.try_recv().unwrap(),
            ConnectionEvent::MaxConnectionsReached
        );
        assert!(first_rx.try_recv().is_err());
        assert_eq!(
            second_rx.try_recv().unwrap(),
            ConnectionEvent::TransportFault
        );
    }

    #[test]
    fn cleared_listener_stops_receiving() {
        let dispatcher = EventDispatcher::new();
        let (listener, mut rx) = ChannelListener::new_pair();
        dispatcher.set_listener(listener);
        dispatcher.clear_listener();

        dispatcher.service_ready();
        assert!(rx.try_recv().is_err());
    }
}
