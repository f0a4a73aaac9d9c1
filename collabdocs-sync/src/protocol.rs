//! Wire codec for the collaboration socket.
//!
//! Two physical frame kinds cross the wire:
//! ```text
//! Binary ── raw CRDT delta, no header
//! Text   ── JSON envelope, discriminated by "type":
//!            presence        { name, color, typing, cursor? }
//!            comment:add     { comment }
//!            comment:update  { comment }
//!            snapshot        { dataB64 }
//! ```
//!
//! A snapshot travels as base64 text rather than a binary frame so that it
//! can never be mistaken for an incremental delta.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::comments::Comment;
use crate::error::CodecError;

/// Physical frame as carried by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Binary(Vec<u8>),
    Text(String),
}

impl Frame {
    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        match self {
            Frame::Binary(bytes) => bytes.len(),
            Frame::Text(text) => text.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Selection range in the document's linear text coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CursorRange {
    pub from: u32,
    pub to: u32,
}

impl CursorRange {
    pub fn new(from: u32, to: u32) -> Self {
        Self { from, to }
    }

    /// Caret only, nothing selected.
    pub fn caret(at: u32) -> Self {
        Self { from: at, to: at }
    }

    pub fn is_collapsed(&self) -> bool {
        self.from == self.to
    }
}

/// Presence broadcast by each participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresencePayload {
    pub name: String,
    pub color: String,
    pub typing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<CursorRange>,
}

/// JSON text envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
enum Envelope {
    #[serde(rename = "presence")]
    Presence(PresencePayload),
    #[serde(rename = "comment:add")]
    CommentAdd { comment: Comment },
    #[serde(rename = "comment:update")]
    CommentUpdate { comment: Comment },
    #[serde(rename = "snapshot")]
    Snapshot {
        #[serde(rename = "dataB64")]
        data_b64: String,
    },
}

/// Logical message kinds multiplexed over one connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Incremental CRDT update
    Delta(Vec<u8>),
    /// Cursor / typing presence
    Presence(PresencePayload),
    /// A comment was created
    CommentAdd(Comment),
    /// A comment was edited or resolved
    CommentUpdate(Comment),
    /// Full encoded document state
    Snapshot(Vec<u8>),
}

/// Message discriminator, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Delta,
    Presence,
    CommentAdd,
    CommentUpdate,
    Snapshot,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Delta(_) => MessageKind::Delta,
            Message::Presence(_) => MessageKind::Presence,
            Message::CommentAdd(_) => MessageKind::CommentAdd,
            Message::CommentUpdate(_) => MessageKind::CommentUpdate,
            Message::Snapshot(_) => MessageKind::Snapshot,
        }
    }

    /// Serialize into a wire frame.
    pub fn encode(&self) -> Result<Frame, CodecError> {
        let envelope = match self {
            Message::Delta(update) => return Ok(Frame::Binary(update.clone())),
            Message::Presence(presence) => Envelope::Presence(presence.clone()),
            Message::CommentAdd(comment) => Envelope::CommentAdd {
                comment: comment.clone(),
            },
            Message::CommentUpdate(comment) => Envelope::CommentUpdate {
                comment: comment.clone(),
            },
            Message::Snapshot(state) => Envelope::Snapshot {
                data_b64: STANDARD.encode(state),
            },
        };
        Ok(Frame::Text(serde_json::to_string(&envelope)?))
    }

    /// Parse a wire frame.
    ///
    /// Binary frames are always deltas. Text frames with malformed JSON,
    /// an unknown `type`, or an empty/invalid snapshot payload are errors
    /// the caller is expected to drop.
    pub fn decode(frame: Frame) -> Result<Message, CodecError> {
        let text = match frame {
            Frame::Binary(update) => return Ok(Message::Delta(update)),
            Frame::Text(text) => text,
        };
        let message = match serde_json::from_str::<Envelope>(&text)? {
            Envelope::Presence(presence) => Message::Presence(presence),
            Envelope::CommentAdd { comment } => Message::CommentAdd(comment),
            Envelope::CommentUpdate { comment } => Message::CommentUpdate(comment),
            Envelope::Snapshot { data_b64 } => {
                if data_b64.is_empty() {
                    return Err(CodecError::EmptySnapshot);
                }
                Message::Snapshot(STANDARD.decode(data_b64.as_bytes())?)
            }
        };
        Ok(message)
    }
}
