//! Channel registry.
//!
//! # Responsibilities
//! - Keep the server-wide set of named channels and their members
//! - Map connection ids to each session's outbound queue
//! - Fan a message out to every member of a channel
//!
//! # Design Decisions
//! - Members are opaque `ConnectionId`s, never the connection itself
//! - Sends go through the session's queue; the registry never writes to a socket
//! - Sharded maps, so sessions on any worker thread can join and broadcast

use std::collections::HashSet;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::net::ConnectionId;
use crate::observability::metrics;

/// Outbound queue of one session.
pub type Outbox = mpsc::UnboundedSender<Message>;

/// Named broadcast groups of live WebSocket sessions.
#[derive(Debug, Default)]
pub struct Channels {
    channels: DashMap<String, HashSet<ConnectionId>>,
    connections: DashMap<ConnectionId, Outbox>,
}

impl Channels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty channel if it does not exist yet.
    pub fn create(&self, name: &str) {
        self.channels.entry(name.to_string()).or_default();
    }

    pub fn contains(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    /// Channel names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Number of members in a channel; 0 for unknown channels.
    pub fn size(&self, name: &str) -> usize {
        self.channels.get(name).map(|m| m.len()).unwrap_or(0)
    }

    /// Members of a channel.
    pub fn members(&self, name: &str) -> Vec<ConnectionId> {
        self.channels
            .get(name)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Make a session reachable by id.
    pub(crate) fn register(&self, id: ConnectionId, outbox: Outbox) {
        self.connections.insert(id, outbox);
    }

    /// Forget a session. Sends to it are dropped from now on.
    pub(crate) fn unregister(&self, id: ConnectionId) {
        self.connections.remove(&id);
    }

    /// Add a session to a channel, creating the channel on first join.
    pub fn join(&self, name: &str, id: ConnectionId) {
        self.channels.entry(name.to_string()).or_default().insert(id);
    }

    /// Remove a session from a channel. The channel itself stays.
    pub fn leave(&self, name: &str, id: ConnectionId) {
        if let Some(mut members) = self.channels.get_mut(name) {
            members.remove(&id);
        }
    }

    /// Queue a message on one session. Returns `false` when the session is
    /// gone or its writer has stopped.
    pub fn send(&self, id: ConnectionId, message: Message) -> bool {
        match self.connections.get(&id) {
            Some(outbox) => outbox.send(message).is_ok(),
            None => false,
        }
    }

    /// Queue a message on every member of a channel.
    ///
    /// Returns the number of sends issued. A member whose writer already
    /// failed is skipped without affecting the others.
    pub fn broadcast(&self, name: &str, message: Message) -> usize {
        // Snapshot first so no shard lock is held while sending.
        let members = self.members(name);
        for id in &members {
            if !self.send(*id, message.clone()) {
                tracing::trace!(connection_id = %id, channel = name, "Broadcast skipped closed session");
            }
        }
        metrics::record_broadcast(members.len());
        members.len()
    }
}
