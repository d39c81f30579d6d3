//! The roster of open connections and fan-out over it.
//!
//! Owned by the dispatcher task, so it needs no locking.

use std::collections::HashMap;
use std::sync::Arc;

use ember_core::protocol::Outbound;
use ember_core::ConnectionId;
use tracing::{debug, warn};

use super::connection::ClientConnection;

/// Outcome of one fan-out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Recipients that were closed or had a full queue.
    pub skipped: usize,
}

#[derive(Default)]
pub struct Roster {
    connections: HashMap<ConnectionId, Arc<ClientConnection>>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Returns the previous entry with the same id.
    pub fn add(&mut self, connection: Arc<ClientConnection>) -> Option<Arc<ClientConnection>> {
        self.connections.insert(connection.id.clone(), connection)
    }

    pub fn remove(&mut self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.connections.remove(id)
    }

    pub fn get(&self, id: &ConnectionId) -> Option<&Arc<ClientConnection>> {
        self.connections.get(id)
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Point-in-time copy of the current members.
    pub fn snapshot(&self) -> Vec<Arc<ClientConnection>> {
        self.connections.values().cloned().collect()
    }

    /// Serialize `message` and queue it for a single connection.
    pub fn send_to(&self, id: &ConnectionId, message: &Outbound) -> bool {
        let Some(conn) = self.connections.get(id) else {
            debug!(connection_id = %id, kind = message.kind(), "send to unknown connection");
            return false;
        };
        let json = match message.to_json() {
            Ok(j) => j,
            Err(e) => {
                warn!(kind = message.kind(), error = %e, "failed to serialize message");
                return false;
            }
        };
        let sent = conn.send(Arc::new(json));
        if !sent {
            warn!(connection_id = %id, kind = message.kind(), "failed to queue message");
        }
        sent
    }

    /// Queue `message` for every connection except `exclude`.
    ///
    /// Iterates a snapshot; closed connections are skipped rather than
    /// failing the broadcast.
    pub fn broadcast_except(&self, exclude: &ConnectionId, message: &Outbound) -> BroadcastReport {
        let json = match message.to_json() {
            Ok(j) => Arc::new(j),
            Err(e) => {
                warn!(kind = message.kind(), error = %e, "failed to serialize broadcast");
                return BroadcastReport::default();
            }
        };

        let mut report = BroadcastReport::default();
        for conn in self.snapshot() {
            if &conn.id == exclude {
                continue;
            }
            if conn.send(Arc::clone(&json)) {
                report.delivered += 1;
            } else {
                report.skipped += 1;
                debug!(connection_id = %conn.id, "skipping closed or saturated peer");
            }
        }
        debug!(
            kind = message.kind(),
            delivered = report.delivered,
            skipped = report.skipped,
            "broadcast to peers"
        );
        report
    }
}
