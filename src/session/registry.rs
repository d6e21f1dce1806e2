use super::progress::ProgressEvent;
use crate::error::DownloadError;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

pub type ConnectionId = uuid::Uuid;

/// Where progress for a session goes: the outbound queue of one open connection.
///
/// Only a weak handle is kept. The connection task owns the queue, so once it
/// ends nothing can be delivered here even if the entry is still registered.
#[derive(Debug, Clone)]
pub struct DeliveryTarget {
    connection_id: ConnectionId,
    sender: mpsc::WeakUnboundedSender<ProgressEvent>,
}

impl DeliveryTarget {
    pub fn new(connection_id: ConnectionId, sender: &mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self {
            connection_id,
            sender: sender.downgrade(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// No live target for the session. Not an error: progress is best-effort.
    Dropped,
}

/// Tracks which connection receives progress for each session id, and which
/// session ids currently have a download running.
#[derive(Default)]
pub struct SessionRegistry {
    targets: RwLock<HashMap<String, DeliveryTarget>>,
    active: Mutex<HashSet<String>>,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `target` for `session_id`, replacing any previous target.
    pub fn join(&self, session_id: &str, target: DeliveryTarget) {
        let connection_id = target.connection_id;
        let previous = self.targets.write().insert(session_id.to_string(), target);
        match previous {
            Some(prev) if prev.connection_id != connection_id => debug!(
                session_id,
                %connection_id,
                previous = %prev.connection_id,
                "Session target replaced"
            ),
            _ => debug!(session_id, %connection_id, "Session joined"),
        }
    }

    /// Forget the target of `session_id` if `connection_id` registered it.
    ///
    /// Returns whether an entry was removed. A connection cannot unregister a
    /// session another connection has joined.
    pub fn leave(&self, session_id: &str, connection_id: ConnectionId) -> bool {
        let mut targets = self.targets.write();
        match targets.get(session_id) {
            Some(target) if target.connection_id == connection_id => {
                targets.remove(session_id);
                debug!(session_id, %connection_id, "Session left");
                true
            }
            Some(target) => {
                debug!(
                    session_id,
                    %connection_id,
                    owner = %target.connection_id,
                    "Ignoring leave from a connection that does not own the session"
                );
                false
            }
            None => false,
        }
    }

    /// Drop every session still pointing at `connection_id`.
    ///
    /// Sessions another connection has re-joined since are left alone.
    pub fn leave_connection(&self, connection_id: ConnectionId) -> usize {
        let mut targets = self.targets.write();
        let before = targets.len();
        targets.retain(|_, target| target.connection_id != connection_id);
        let removed = before - targets.len();
        if removed > 0 {
            debug!(%connection_id, removed, "Connection closed, sessions released");
        }
        removed
    }

    #[cfg(test)]
    pub fn is_joined(&self, session_id: &str) -> bool {
        self.targets.read().contains_key(session_id)
    }

    /// Hand `event` to the current target of its session without waiting.
    pub fn publish(&self, event: ProgressEvent) -> Delivery {
        // Holding the read lock while sending keeps `leave` from racing a delivery.
        let targets = self.targets.read();
        let Some(sender) = targets
            .get(&event.session_id)
            .and_then(|target| target.sender.upgrade())
        else {
            trace!(session_id = %event.session_id, "No live target, progress dropped");
            return Delivery::Dropped;
        };

        match sender.send(event) {
            Ok(()) => Delivery::Delivered,
            Err(_) => Delivery::Dropped,
        }
    }

    /// Mark `session_id` as having a download in flight.
    ///
    /// A second claim for the same id is rejected until the first is dropped.
    pub fn claim(self: &Arc<Self>, session_id: &str) -> Result<SessionClaim, DownloadError> {
        if !self.active.lock().insert(session_id.to_string()) {
            return Err(DownloadError::SessionBusy(session_id.to_string()));
        }
        Ok(SessionClaim {
            registry: Arc::clone(self),
            session_id: session_id.to_string(),
        })
    }

    #[cfg(test)]
    pub fn is_active(&self, session_id: &str) -> bool {
        self.active.lock().contains(session_id)
    }
}

/// Exclusive right to run a download for one session id.
pub struct SessionClaim {
    registry: Arc<SessionRegistry>,
    session_id: String,
}

impl SessionClaim {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for SessionClaim {
    fn drop(&mut self) {
        self.registry.active.lock().remove(&self.session_id);
    }
}
