//! Document replica port and its yrs implementation.
//!
//! The CRDT itself is a black box. The replica only has to apply local
//! edits and remote updates, encode its full state, and tell subscribers
//! about every change together with where it came from. The [`Origin`] tag
//! is what keeps remote updates from being echoed back to the server.

use tokio::sync::mpsc;
use yrs::updates::decoder::Decode;
use yrs::{Doc, GetString, ReadTxn, StateVector, Text, TextRef, Transact, Update, WriteTxn};

use crate::error::ReplicaError;

/// Name of the shared root text.
///
/// This is a plain `Text` root, not the `XmlFragment` named `"default"` that
/// TipTap/ProseMirror browser editors bind to. Updates exchanged with such
/// peers land in a different root and are not visible on either side.
pub const ROOT_TEXT: &str = "content";

/// Where a change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Produced by this participant's editor
    Local,
    /// Received from the network
    Remote,
}

/// A change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaChange {
    pub origin: Origin,
    /// Encoded update (delta) describing the change
    pub update: Vec<u8>,
}

/// Local edit in character offsets. Out-of-range offsets are clamped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    Insert { index: u32, text: String },
    Delete { index: u32, len: u32 },
}

impl Edit {
    pub fn insert(index: u32, text: impl Into<String>) -> Self {
        Edit::Insert {
            index,
            text: text.into(),
        }
    }

    pub fn delete(index: u32, len: u32) -> Self {
        Edit::Delete { index, len }
    }

    /// Append at the end of the document.
    pub fn append(text: impl Into<String>) -> Self {
        Edit::Insert {
            index: u32::MAX,
            text: text.into(),
        }
    }
}

/// The replicated document as the sync client sees it.
pub trait Replica: Send + 'static {
    /// Apply a local edit. Returns `false` if nothing changed.
    fn apply_edit(&mut self, edit: &Edit) -> bool;

    /// Merge an encoded update. Idempotent and order independent.
    fn apply_update(&mut self, update: &[u8], origin: Origin) -> Result<(), ReplicaError>;

    /// Full state, enough to rebuild the document from nothing.
    fn encode_state(&self) -> Vec<u8>;

    /// Whether any change has ever been integrated.
    fn has_state(&self) -> bool;

    /// Current text content.
    fn text(&self) -> String;

    /// Receive every subsequent change.
    fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ReplicaChange>;

    /// Drop all subscribers.
    fn unsubscribe_all(&mut self);
}

/// yrs-backed replica over a single root text.
pub struct YrsReplica {
    doc: Doc,
    text: TextRef,
    subscribers: Vec<mpsc::UnboundedSender<ReplicaChange>>,
}

impl YrsReplica {
    pub fn new() -> Self {
        Self::from_doc(Doc::new())
    }

    /// Fixed client id, for reproducible encodings.
    pub fn with_client_id(client_id: u64) -> Self {
        Self::from_doc(Doc::with_client_id(client_id))
    }

    fn from_doc(doc: Doc) -> Self {
        let text = {
            let mut txn = doc.transact_mut();
            txn.get_or_insert_text(ROOT_TEXT)
        };
        Self {
            doc,
            text,
            subscribers: Vec::new(),
        }
    }

    fn notify(&mut self, origin: Origin, update: Vec<u8>) {
        self.subscribers.retain(|tx| {
            tx.send(ReplicaChange {
                origin,
                update: update.clone(),
            })
            .is_ok()
        });
    }

    fn state_vector(&self) -> StateVector {
        self.doc.transact().state_vector()
    }
}

impl Default for YrsReplica {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for YrsReplica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YrsReplica")
            .field("text", &self.text())
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

/// Byte offset of the `chars`-th character, clamped to the end.
fn byte_offset(s: &str, chars: u32) -> usize {
    s.char_indices()
        .nth(chars as usize)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

impl Replica for YrsReplica {
    fn apply_edit(&mut self, edit: &Edit) -> bool {
        let update = {
            let mut txn = self.doc.transact_mut();
            let current = self.text.get_string(&txn);
            match edit {
                Edit::Insert { index, text } => {
                    if text.is_empty() {
                        return false;
                    }
                    let at = byte_offset(&current, *index) as u32;
                    self.text.insert(&mut txn, at, text);
                }
                Edit::Delete { index, len } => {
                    let start = byte_offset(&current, *index);
                    let end = byte_offset(&current, index.saturating_add(*len));
                    if end <= start {
                        return false;
                    }
                    self.text
                        .remove_range(&mut txn, start as u32, (end - start) as u32);
                }
            }
            txn.encode_update_v1()
        };
        self.notify(Origin::Local, update);
        true
    }

    fn apply_update(&mut self, update: &[u8], origin: Origin) -> Result<(), ReplicaError> {
        let decoded =
            Update::decode_v1(update).map_err(|e| ReplicaError::Decode(e.to_string()))?;
        let before = self.doc.transact().snapshot();
        self.doc
            .transact_mut()
            .apply_update(decoded)
            .map_err(|e| ReplicaError::Apply(e.to_string()))?;
        // Deletions only show up in the delete set, so compare whole snapshots.
        if self.doc.transact().snapshot() != before {
            self.notify(origin, update.to_vec());
        }
        Ok(())
    }

    fn encode_state(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    fn has_state(&self) -> bool {
        !self.state_vector().is_empty()
    }

    fn text(&self) -> String {
        let txn = self.doc.transact();
        self.text.get_string(&txn)
    }

    fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ReplicaChange> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    fn unsubscribe_all(&mut self) {
        self.subscribers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edit_and_capture(replica: &mut YrsReplica, edit: Edit) -> Vec<u8> {
        let mut rx = replica.subscribe();
        assert!(replica.apply_edit(&edit));
        let change = rx.try_recv().unwrap();
        assert_eq!(change.origin, Origin::Local);
        change.update
    }

    #[test]
    fn test_local_edits() {
        let mut replica = YrsReplica::with_client_id(1);
        assert!(!replica.has_state());
        replica.apply_edit(&Edit::insert(0, "hello"));
        replica.apply_edit(&Edit::append(" world"));
        replica.apply_edit(&Edit::delete(0, 1));
        assert_eq!(replica.text(), "ello world");
        assert!(replica.has_state());
    }

    #[test]
    fn test_offsets_are_characters_and_clamped() {
        let mut replica = YrsReplica::with_client_id(1);
        replica.apply_edit(&Edit::insert(0, "héllo"));
        replica.apply_edit(&Edit::insert(2, "X"));
        assert_eq!(replica.text(), "héXllo");
        replica.apply_edit(&Edit::delete(4, 100));
        assert_eq!(replica.text(), "héXl");
        assert!(!replica.apply_edit(&Edit::delete(50, 3)));
        assert!(!replica.apply_edit(&Edit::insert(0, "")));
    }

    #[test]
    fn test_remote_update_tagged_remote() {
        let mut a = YrsReplica::with_client_id(1);
        let mut b = YrsReplica::with_client_id(2);
        let delta = edit_and_capture(&mut a, Edit::insert(0, "shared"));

        let mut rx = b.subscribe();
        b.apply_update(&delta, Origin::Remote).unwrap();
        assert_eq!(b.text(), "shared");
        assert_eq!(rx.try_recv().unwrap().origin, Origin::Remote);
    }

    #[test]
    fn test_duplicate_update_not_announced() {
        let mut a = YrsReplica::with_client_id(1);
        let mut b = YrsReplica::with_client_id(2);
        let delta = edit_and_capture(&mut a, Edit::insert(0, "once"));

        let mut rx = b.subscribe();
        b.apply_update(&delta, Origin::Remote).unwrap();
        b.apply_update(&delta, Origin::Remote).unwrap();
        assert_eq!(b.text(), "once");
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_remote_delete_announced() {
        let mut a = YrsReplica::with_client_id(1);
        let mut b = YrsReplica::with_client_id(2);
        let insert = edit_and_capture(&mut a, Edit::insert(0, "hello"));
        b.apply_update(&insert, Origin::Remote).unwrap();

        let mut rx = b.subscribe();
        let delete = edit_and_capture(&mut a, Edit::delete(0, 2));
        b.apply_update(&delete, Origin::Remote).unwrap();
        assert_eq!(b.text(), "llo");
        let change = rx.try_recv().unwrap();
        assert_eq!(change.origin, Origin::Remote);
        assert_eq!(change.update, delete);

        b.apply_update(&delete, Origin::Remote).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_garbage_update_rejected() {
        let mut replica = YrsReplica::new();
        assert!(replica.apply_update(&[0xff, 0xff, 0xff], Origin::Remote).is_err());
        assert_eq!(replica.text(), "");
    }

    #[test]
    fn test_unintegrable_update_is_an_error() {
        let mut a = YrsReplica::with_client_id(1);
        let mut b = YrsReplica::with_client_id(2);
        let delta = edit_and_capture(&mut a, Edit::insert(0, "x"));
        b.apply_update(&delta, Origin::Remote).unwrap();

        // One client-3 string item whose parent is the text item (1, 0),
        // which is not a shared type.
        let bad = [1, 1, 3, 0, 4, 0, 1, 0, 1, b'y', 0];
        let mut rx = b.subscribe();
        let err = b.apply_update(&bad, Origin::Remote).unwrap_err();
        assert!(matches!(err, ReplicaError::Apply(_)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_any_order_any_duplication_converges() {
        let mut a = YrsReplica::with_client_id(1);
        let mut b = YrsReplica::with_client_id(2);
        let mut deltas = Vec::new();
        deltas.push(edit_and_capture(&mut a, Edit::insert(0, "alpha ")));
        deltas.push(edit_and_capture(&mut a, Edit::append("beta ")));
        deltas.push(edit_and_capture(&mut b, Edit::insert(0, "gamma ")));
        deltas.push(edit_and_capture(&mut a, Edit::delete(0, 2)));
        let snapshot_a = a.encode_state();

        let mut in_order = YrsReplica::with_client_id(10);
        for d in &deltas {
            in_order.apply_update(d, Origin::Remote).unwrap();
        }

        let mut shuffled = YrsReplica::with_client_id(11);
        for i in [3, 1, 3, 0, 2, 1, 0] {
            shuffled.apply_update(&deltas[i], Origin::Remote).unwrap();
        }
        shuffled.apply_update(&snapshot_a, Origin::Remote).unwrap();

        let mut snapshot_first = YrsReplica::with_client_id(12);
        snapshot_first
            .apply_update(&snapshot_a, Origin::Remote)
            .unwrap();
        for d in deltas.iter().rev() {
            snapshot_first.apply_update(d, Origin::Remote).unwrap();
        }

        assert_eq!(in_order.text(), shuffled.text());
        assert_eq!(in_order.text(), snapshot_first.text());
        assert!(in_order.text().contains("gamma"));
    }

    #[test]
    fn test_snapshot_rebuilds_document() {
        let mut source = YrsReplica::with_client_id(1);
        source.apply_edit(&Edit::insert(0, "from scratch"));
        let mut fresh = YrsReplica::with_client_id(2);
        fresh.apply_update(&source.encode_state(), Origin::Remote).unwrap();
        assert_eq!(fresh.text(), "from scratch");
    }

    #[test]
    fn test_unsubscribe_all() {
        let mut replica = YrsReplica::new();
        let mut rx = replica.subscribe();
        replica.unsubscribe_all();
        replica.apply_edit(&Edit::insert(0, "quiet"));
        assert!(rx.try_recv().is_err());
    }
}
