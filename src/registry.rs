//! Socket Registry
//!
//! Owns the mapping of peer address to live connection. The registry is the
//! only structure touched by several tasks at once — the accept loop and the
//! façade insert, reader and writer tasks remove on disconnect, send paths
//! look up — so every operation takes the lock briefly and none performs
//! socket I/O while holding it. What is stored per peer is the sender of its
//! outbound frame queue plus abort handles for its I/O tasks; the sockets
//! themselves live inside those tasks.
//!
//! # Invariants
//!
//! - Membership implies a running (or terminating) reader task; absence
//!   implies no references to the socket remain.
//! - `put` never overwrites: a stale entry must be removed first.
//! - `remove` is idempotent, which is what makes concurrent teardown (reader
//!   failure racing an explicit shutdown) resolve to exactly one winner.
//! - Enumeration preserves insertion order, giving broadcasts a
//!   deterministic delivery order.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

/// Opaque address of a remote peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    /// Wrap an opaque device address.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// The address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(address: &str) -> Self {
        Self(address.to_string())
    }
}

impl From<String> for PeerId {
    fn from(address: String) -> Self {
        Self(address)
    }
}

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// `put` for a peer that is already registered.
    #[error("peer {0} is already registered")]
    DuplicatePeer(PeerId),

    /// `put` after `close_all`; the session is over.
    #[error("registry is closed")]
    Closed,
}

/// One live peer link: the outbound frame queue and its I/O task handles.
#[derive(Debug)]
pub struct PeerConnection {
    peer: PeerId,
    frames: mpsc::Sender<Vec<u8>>,
    reader: AbortHandle,
    writer: AbortHandle,
    connected_at: Instant,
}

impl PeerConnection {
    /// Bundle a peer's outbound queue and I/O task handles.
    #[must_use]
    pub fn new(
        peer: PeerId,
        frames: mpsc::Sender<Vec<u8>>,
        reader: AbortHandle,
        writer: AbortHandle,
    ) -> Self {
        Self {
            peer,
            frames,
            reader,
            writer,
            connected_at: Instant::now(),
        }
    }

    /// The peer this connection belongs to.
    #[must_use]
    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    /// Sender of the peer's outbound frame queue.
    #[must_use]
    pub fn frames(&self) -> &mpsc::Sender<Vec<u8>> {
        &self.frames
    }

    /// Seconds since the link was registered.
    #[must_use]
    pub fn uptime_secs(&self) -> u64 {
        self.connected_at.elapsed().as_secs()
    }

    /// Abort both I/O tasks and drop the outbound queue, closing the socket
    /// halves they own.
    pub fn shutdown(self) {
        self.reader.abort();
        self.writer.abort();
    }
}

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<PeerId, PeerConnection>,
    /// Insertion order of the keys in `connections`.
    order: Vec<PeerId>,
    /// Set by `close_all`; refuses late registrations until `reopen`.
    closed: bool,
}

/// Thread-safe mapping of peer address to live connection.
///
/// Clones share the same underlying map.
#[derive(Clone, Default)]
pub struct SocketRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl SocketRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection under its peer address.
    ///
    /// # Errors
    ///
    /// [`RegistryError::DuplicatePeer`] if the peer is already registered —
    /// the existing entry is left untouched — and [`RegistryError::Closed`]
    /// after `close_all`.
    pub fn put(&self, conn: PeerConnection) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(RegistryError::Closed);
        }
        let peer = conn.peer().clone();
        if inner.connections.contains_key(&peer) {
            return Err(RegistryError::DuplicatePeer(peer));
        }
        inner.order.push(peer.clone());
        inner.connections.insert(peer.clone(), conn);
        tracing::info!(peer = %peer, total = inner.connections.len(), "peer registered");
        Ok(())
    }

    /// Sender of `peer`'s outbound frame queue, if registered.
    #[must_use]
    pub fn sender(&self, peer: &PeerId) -> Option<mpsc::Sender<Vec<u8>>> {
        self.inner
            .read()
            .connections
            .get(peer)
            .map(|conn| conn.frames().clone())
    }

    /// Remove `peer` and return its connection.
    ///
    /// Idempotent: removing an absent peer is a no-op returning `None`.
    pub fn remove(&self, peer: &PeerId) -> Option<PeerConnection> {
        let mut inner = self.inner.write();
        let conn = inner.connections.remove(peer);
        if conn.is_some() {
            inner.order.retain(|p| p != peer);
            tracing::info!(peer = %peer, remaining = inner.connections.len(), "peer removed");
        }
        conn
    }

    /// Whether `peer` is registered.
    #[must_use]
    pub fn contains(&self, peer: &PeerId) -> bool {
        self.inner.read().connections.contains_key(peer)
    }

    /// Registered peers in insertion order.
    #[must_use]
    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.inner.read().order.clone()
    }

    /// Snapshot of `(peer, outbound queue)` pairs in insertion order.
    ///
    /// Taken so callers write frames without holding the registry lock.
    #[must_use]
    pub fn senders(&self) -> Vec<(PeerId, mpsc::Sender<Vec<u8>>)> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|peer| {
                inner
                    .connections
                    .get(peer)
                    .map(|conn| (peer.clone(), conn.frames().clone()))
            })
            .collect()
    }

    /// Number of registered peers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().connections.len()
    }

    /// Whether no peers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().connections.is_empty()
    }

    /// Tear down every connection and refuse registrations until
    /// [`reopen`](Self::reopen). Returns the number of connections closed.
    ///
    /// The closed flag and the drain happen under one lock acquisition, so a
    /// racing `put` either lands before the drain (and is torn down with the
    /// rest) or observes the closed registry and fails.
    pub fn close_all(&self) -> usize {
        let connections: Vec<PeerConnection> = {
            let mut inner = self.inner.write();
            inner.closed = true;
            inner.order.clear();
            inner.connections.drain().map(|(_, conn)| conn).collect()
        };

        let count = connections.len();
        for conn in connections {
            conn.shutdown();
        }
        if count > 0 {
            tracing::info!(closed = count, "registry cleared");
        }
        count
    }

    /// Re-arm the registry for a new session.
    pub fn reopen(&self) {
        self.inner.write().closed = false;
    }
}

impl fmt::Debug for SocketRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("SocketRegistry")
            .field("peers", &inner.order)
            .field("closed", &inner.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn test_connection(peer: &str) -> (PeerConnection, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(8);
        let reader = tokio::spawn(async {}).abort_handle();
        let writer = tokio::spawn(async {}).abort_handle();
        (PeerConnection::new(PeerId::new(peer), tx, reader, writer), rx)
    }

    #[tokio::test]
    async fn put_then_lookup_then_remove() {
        let registry = SocketRegistry::new();
        let (conn, _rx) = test_connection("aa:bb");
        let peer = conn.peer().clone();

        registry.put(conn).unwrap();
        assert!(registry.contains(&peer));
        assert!(registry.sender(&peer).is_some());
        assert_eq!(registry.len(), 1);

        let removed = registry.remove(&peer);
        assert!(removed.is_some());
        assert!(registry.is_empty());
        assert!(registry.sender(&peer).is_none());
    }

    #[tokio::test]
    async fn put_rejects_duplicate_peer() {
        let registry = SocketRegistry::new();
        let (first, _rx1) = test_connection("aa:bb");
        let (second, _rx2) = test_connection("aa:bb");

        registry.put(first).unwrap();
        let err = registry.put(second).unwrap_err();
        assert_eq!(err, RegistryError::DuplicatePeer(PeerId::new("aa:bb")));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let registry = SocketRegistry::new();
        let (conn, _rx) = test_connection("aa:bb");
        let peer = conn.peer().clone();
        registry.put(conn).unwrap();

        assert!(registry.remove(&peer).is_some());
        assert!(registry.remove(&peer).is_none());
        assert!(registry.remove(&PeerId::new("never-seen")).is_none());
    }

    #[tokio::test]
    async fn enumeration_preserves_insertion_order() {
        let registry = SocketRegistry::new();
        let mut receivers = Vec::new();
        for peer in ["cc", "aa", "bb"] {
            let (conn, rx) = test_connection(peer);
            registry.put(conn).unwrap();
            receivers.push(rx);
        }

        assert_eq!(
            registry.peer_ids(),
            vec![PeerId::new("cc"), PeerId::new("aa"), PeerId::new("bb")]
        );

        registry.remove(&PeerId::new("aa"));
        assert_eq!(
            registry.peer_ids(),
            vec![PeerId::new("cc"), PeerId::new("bb")]
        );

        let sender_order: Vec<PeerId> =
            registry.senders().into_iter().map(|(peer, _)| peer).collect();
        assert_eq!(sender_order, registry.peer_ids());
    }

    #[tokio::test]
    async fn close_all_clears_and_refuses_late_puts() {
        let registry = SocketRegistry::new();
        let (conn, _rx) = test_connection("aa:bb");
        registry.put(conn).unwrap();

        assert_eq!(registry.close_all(), 1);
        assert!(registry.is_empty());

        let (late, _rx2) = test_connection("cc:dd");
        assert_eq!(registry.put(late), Err(RegistryError::Closed));

        // A second close_all is harmless.
        assert_eq!(registry.close_all(), 0);
    }

    #[tokio::test]
    async fn reopen_arms_a_fresh_session() {
        let registry = SocketRegistry::new();
        registry.close_all();
        registry.reopen();

        let (conn, _rx) = test_connection("aa:bb");
        registry.put(conn).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn clones_share_state() {
        let registry = SocketRegistry::new();
        let clone = registry.clone();

        let (conn, _rx) = test_connection("aa:bb");
        registry.put(conn).unwrap();
        assert!(clone.contains(&PeerId::new("aa:bb")));
    }
}
