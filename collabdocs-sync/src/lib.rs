//! # collabdocs-sync: Real-time sync client for collaborative documents
//!
//! Keeps a local replica of one shared document converged with every other
//! participant over a relay WebSocket, shows who else is present, and keeps
//! a comment list in sync.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐  Command   ┌────────────────────────────────┐
//! │ SessionHandle │ ─────────► │ Session (one task per document)│
//! └───────────────┘ ◄───────── │                                │
//!        │         SessionEvent│  ReplicationBridge ─► Replica  │
//!        │ REST                │  PresenceAggregator            │
//!        ▼                     │  CommentCache                  │
//! ┌───────────────┐            │  TransportChannel ─► Queue     │
//! │ HttpApi       │            └───────────────┬────────────────┘
//! └───────────────┘                            │ Frame
//!                                              ▼
//!                                      ┌───────────────┐  WebSocket
//!                                      │ Connector     │ ◄─────────► relay
//!                                      └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Wire frames and the message codec
//! - [`queue`]: Ordered outbound buffer for offline periods
//! - [`transport`]: Connection state machine, backoff, connectors
//! - [`timers`]: Named deadlines driven by the session loop
//! - [`replica`]: Replica port and the yrs-backed implementation
//! - [`bridge`]: Replica ↔ wire translation with origin tagging
//! - [`presence`]: Participant records with liveness and typing decay
//! - [`comments`]: Comment types, REST port, local cache
//! - [`api`]: HTTP client for documents and comments
//! - [`prefs`]: Display name, owned and recent documents
//! - [`session`]: The actor tying it all together

pub mod api;
pub mod bridge;
pub mod comments;
pub mod config;
pub mod error;
pub mod prefs;
pub mod presence;
pub mod protocol;
pub mod queue;
pub mod replica;
pub mod session;
pub mod timers;
pub mod transport;

// Re-exports for convenience
pub use api::{Document, DocumentApi, HttpApi};
pub use bridge::ReplicationBridge;
pub use comments::{Comment, CommentApi, CommentCache, CommentPatch, NewComment};
pub use config::{Backoff, SessionConfig};
pub use error::{
    ApiError, CodecError, ConfigError, PrefsError, ReplicaError, SessionError, TransportError,
};
pub use prefs::{FileStore, KeyValueStore, MemoryStore, Preferences, RecentDoc};
pub use presence::{color_for_name, Collaborator, PresenceAggregator};
pub use protocol::{CursorRange, Frame, Message, MessageKind, PresencePayload};
pub use queue::OutboundQueue;
pub use replica::{Edit, Origin, Replica, ReplicaChange, YrsReplica};
pub use session::{Session, SessionEvent, SessionHandle, SessionStatus};
pub use timers::{TimerKind, Timers};
pub use transport::{
    Address, Connection, ConnectionState, Connector, LinkEvent, MemoryConnector, MemoryLink,
    TransportChannel, WsConnector,
};
