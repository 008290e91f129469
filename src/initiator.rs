//! Client Connect Loop
//!
//! Races discovery against the remote server's channel rotation: the server
//! listens on one channel at a time and advances after each accepted peer,
//! so the client probes every channel in pool order with a few short
//! retries each. Bounded tries and a fixed delay approximate a best-effort
//! rendezvous without unbounded blocking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

use crate::channels::ChannelAllocator;
use crate::events::EventDispatcher;
use crate::registry::PeerId;
use crate::service::ServiceError;
use crate::transport::{PeerSocket, Transport, TransportError};

pub(crate) async fn connect_with_retries(
    transport: &dyn Transport,
    channels: &ChannelAllocator,
    dispatcher: &EventDispatcher,
    peer: &PeerId,
    attempts: u32,
    retry_delay: Duration,
    stop: &AtomicBool,
) -> Result<PeerSocket, ServiceError> {
    for channel in channels.channels() {
        for attempt in 1..=attempts {
            if stop.load(Ordering::SeqCst) {
                return Err(ServiceError::Stopped);
            }

            match transport.open_client_socket(peer, *channel).await {
                Ok(socket) => {
                    debug!(peer = %peer, channel = %channel, attempt, "connected");
                    return Ok(socket);
                }
                Err(TransportError::Fault(reason)) => {
                    // Resource-level failure, not a closed channel: report it
                    // once and give up rather than hammering a broken stack.
                    warn!(peer = %peer, channel = %channel, %reason, "transport fault while connecting");
                    dispatcher.transport_fault();
                    return Err(ServiceError::ConnectFailed(peer.clone()));
                }
                Err(error) => {
                    debug!(peer = %peer, channel = %channel, attempt, %error, "connect attempt failed");
                }
            }

            tokio::time::sleep(retry_delay).await;
        }
    }

    Err(ServiceError::ConnectFailed(peer.clone()))
}
