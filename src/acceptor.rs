//! Server Accept Loop
//!
//! Opens listening channels strictly in pool order, one at a time, and
//! admits incoming peers until the configured capacity is filled, the
//! session is stopped, or the transport faults.
//!
//! Cancellation is cooperative: the blocking accept is polled in short
//! timeout slices and the session's stop flag is checked between slices as
//! well as immediately before and after the accept, so a stop request never
//! waits on a peer that may never arrive.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::channels::ChannelId;
use crate::service::ServiceInner;
use crate::transport::TransportError;

pub(crate) async fn run_acceptor(
    inner: Arc<ServiceInner>,
    max_connections: usize,
    stop: Arc<AtomicBool>,
) {
    let service_name = inner.config.service_name.clone();
    let poll = inner.config.accept_poll();
    let mut remaining = max_connections;
    let mut tried: HashSet<ChannelId> = HashSet::new();

    while remaining > 0 {
        if stop.load(Ordering::SeqCst) {
            info!("stop requested, leaving accept loop");
            return;
        }

        let Some(channel) = inner.channels.acquire_next(&tried) else {
            // Capacity is validated against the pool size up front, but
            // duplicate-peer slots can burn channels without filling
            // capacity.
            warn!("channel pool exhausted before capacity was filled");
            break;
        };
        tried.insert(channel);

        let mut listening = match inner
            .transport
            .open_listening_channel(&service_name, channel)
            .await
        {
            Ok(listening) => listening,
            Err(TransportError::Stopped) => return,
            Err(error) => {
                warn!(channel = %channel, %error, "failed to open listening channel");
                inner.dispatcher.transport_fault();
                return;
            }
        };
        debug!(channel = %channel, remaining, "listening");

        let accepted = loop {
            if stop.load(Ordering::SeqCst) {
                info!("stop requested, abandoning accept");
                return;
            }
            match timeout(poll, listening.accept_once()).await {
                Ok(result) => break result,
                Err(_) => {} // slice elapsed, re-check the stop flag
            }
        };
        if stop.load(Ordering::SeqCst) {
            return;
        }

        match accepted {
            Ok((peer, socket)) => {
                // One socket per channel: close the listener before moving on.
                drop(listening);
                match inner.attach_peer(peer.clone(), socket) {
                    Ok(()) => {
                        remaining -= 1;
                        info!(peer = %peer, remaining, "peer accepted");
                        inner.dispatcher.incoming_connection(&peer);
                    }
                    Err(error) => {
                        warn!(peer = %peer, %error, "dropping accepted socket");
                    }
                }
            }
            Err(TransportError::Stopped) => {
                debug!(channel = %channel, "listening channel closed");
                return;
            }
            Err(error) => {
                warn!(channel = %channel, %error, "accept failed");
                inner.dispatcher.transport_fault();
                return;
            }
        }
    }

    inner.dispatcher.max_connections_reached();
}
