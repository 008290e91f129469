//! Session State
//!
//! The single active server-or-client engagement. Exactly one caller owns
//! the service at a time: a session records who claimed it and in which
//! role, and carries the cooperative stop flag its loops poll.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

/// Which side of the link the session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionRole {
    /// Admits incoming peers up to a configured count.
    Server,
    /// Connects out to a single remote server.
    Client,
}

/// One claimed engagement of the connection service.
#[derive(Debug)]
pub struct Session {
    owner: String,
    role: SessionRole,
    stop: Arc<AtomicBool>,
    acceptor: Option<JoinHandle<()>>,
}

impl Session {
    /// Claim a session for `owner` in `role`.
    pub(crate) fn new(owner: impl Into<String>, role: SessionRole) -> Self {
        Self {
            owner: owner.into(),
            role,
            stop: Arc::new(AtomicBool::new(false)),
            acceptor: None,
        }
    }

    /// Owner token recorded when the session was claimed.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Role the session was claimed in.
    #[must_use]
    pub fn role(&self) -> SessionRole {
        self.role
    }

    /// Shared stop flag polled by this session's loops.
    pub(crate) fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Request cooperative stop of the session's loops.
    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Record the accept-loop task so shutdown can abort it.
    pub(crate) fn set_acceptor(&mut self, handle: JoinHandle<()>) {
        self.acceptor = Some(handle);
    }

    /// Abort the accept-loop task, if one was started.
    pub(crate) fn abort_acceptor(&mut self) {
        if let Some(handle) = self.acceptor.take() {
            handle.abort();
        }
    }
}
