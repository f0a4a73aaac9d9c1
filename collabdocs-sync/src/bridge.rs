//! Replication bridge between the replica and the transport.
//!
//! ```text
//!   editor edit ──► Replica ──(Local change)──► Frame::Binary ──► transport
//!                      ▲
//!   transport ──► Delta / Snapshot ──(apply, Origin::Remote)
//! ```
//!
//! Remote changes still come back through the subscription (so the caller
//! learns the document changed) but are never turned into outbound frames.

use tokio::sync::mpsc;

use crate::error::ReplicaError;
use crate::protocol::{Frame, Message};
use crate::replica::{Edit, Origin, Replica, ReplicaChange};

pub struct ReplicationBridge<R: Replica> {
    replica: R,
    changes: Option<mpsc::UnboundedReceiver<ReplicaChange>>,
}

impl<R: Replica> ReplicationBridge<R> {
    /// Take ownership of the replica and subscribe to its changes.
    pub fn attach(mut replica: R) -> Self {
        let changes = replica.subscribe();
        Self {
            replica,
            changes: Some(changes),
        }
    }

    pub fn replica(&self) -> &R {
        &self.replica
    }

    pub fn is_attached(&self) -> bool {
        self.changes.is_some()
    }

    /// Local edit from the editor surface.
    pub fn edit(&mut self, edit: &Edit) -> bool {
        self.replica.apply_edit(edit)
    }

    /// Next change notification. Pends forever once detached.
    pub async fn next_change(&mut self) -> ReplicaChange {
        match self.changes.as_mut() {
            Some(rx) => match rx.recv().await {
                Some(change) => change,
                None => std::future::pending().await,
            },
            None => std::future::pending().await,
        }
    }

    /// Outbound frame for a change; `None` for anything that arrived remotely.
    pub fn outbound(change: &ReplicaChange) -> Option<Frame> {
        match change.origin {
            Origin::Local => Some(Frame::Binary(change.update.clone())),
            Origin::Remote => None,
        }
    }

    /// Merge an inbound delta.
    pub fn apply_delta(&mut self, update: &[u8]) -> Result<(), ReplicaError> {
        self.replica.apply_update(update, Origin::Remote)
    }

    /// Merge an inbound full-state snapshot.
    pub fn apply_snapshot(&mut self, state: &[u8]) -> Result<(), ReplicaError> {
        self.replica.apply_update(state, Origin::Remote)
    }

    /// Full-state snapshot message, if there is anything to share.
    pub fn snapshot(&self) -> Option<Message> {
        if !self.replica.has_state() {
            return None;
        }
        Some(Message::Snapshot(self.replica.encode_state()))
    }

    pub fn text(&self) -> String {
        self.replica.text()
    }

    /// Stop listening to the replica. Idempotent.
    pub fn detach(&mut self) {
        self.changes = None;
        self.replica.unsubscribe_all();
    }
}
