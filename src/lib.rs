//! Peerlink — Bounded Peer Connection Service
//!
//! One device claims the service as a **server** and admits up to a bounded
//! number of peers; other devices claim it as **clients** and connect to
//! that server. Both sides then exchange terminator-delimited text messages
//! over point-to-point stream sockets that are allowed to be unstable:
//! connections drop without notice, opening a channel can transiently fail,
//! and only a limited number of concurrent channels exist.
//!
//! # Architecture
//!
//! ```text
//!                       ConnectionService
//!  ┌────────────────────────────────────────────────────────────┐
//!  │  Session (one owner, Server | Client)                      │
//!  │                                                            │
//!  │  acceptor ──► ChannelAllocator ──► Transport.listen        │
//!  │  initiator ─► channels × retries ─► Transport.connect      │
//!  │                      │                                     │
//!  │                      ▼ accepted / connected socket         │
//!  │  SocketRegistry: peer ─► frame queue + reader/writer task  │
//!  │                      │                                     │
//!  │                      ▼ FrameDecoder                        │
//!  │  EventDispatcher ──► ConnectionListener callbacks          │
//!  └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each registered peer owns exactly one reader task and one writer task;
//! the registry stores only the peer's outbound queue and abort handles, so
//! no lock is held during socket I/O.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use peerlink::{ChannelListener, ConnectionService, Medium, PeerId, ServiceConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let medium = Medium::new();
//!
//!     // Server side: admit up to two peers.
//!     let server = ConnectionService::new(Arc::new(medium.endpoint("host")), ServiceConfig::default());
//!     let (listener, mut events) = ChannelListener::new_pair();
//!     server.register_listener(listener).unwrap();
//!     server.start_server("my-game", 2).unwrap();
//!
//!     // Client side: find the server and say hello.
//!     let client = ConnectionService::new(Arc::new(medium.endpoint("guest")), ServiceConfig::default());
//!     client.connect("my-game", PeerId::new("host")).await.unwrap();
//!     client.send_message(&PeerId::new("host"), "hello").await.unwrap();
//!
//!     // Server observes IncomingConnection then MessageReceived.
//!     while let Some(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`service`]: the [`ConnectionService`] façade
//! - [`channels`]: the fixed pool of service channel identities
//! - [`registry`]: the peer-to-connection registry
//! - [`events`]: listener callbacks and event plumbing
//! - [`session`]: single-owner session state
//! - [`config`]: policy knobs, env and TOML loading
//! - [`transport`]: the adapter contract, message framing, and the
//!   in-memory loopback transport

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod acceptor;
pub mod channels;
pub mod config;
pub mod events;
mod initiator;
pub mod registry;
pub mod service;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use channels::{ChannelAllocator, ChannelId, MAX_CHANNELS};
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ServiceConfig,
};
pub use events::{ChannelListener, ConnectionEvent, ConnectionListener, EventDispatcher};
pub use registry::{PeerConnection, PeerId, RegistryError, SocketRegistry};
pub use service::{ConnectionService, ServiceError};
pub use session::{Session, SessionRole};
pub use transport::{
    FrameDecoder, FrameError, InMemoryTransport, ListeningChannel, Medium, PeerSocket,
    SocketReader, SocketWriter, Transport, TransportError, MAX_MESSAGE_SIZE, MESSAGE_TERMINATOR,
};
