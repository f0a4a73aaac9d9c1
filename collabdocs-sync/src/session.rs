//! The sync session: one actor task per open document.
//!
//! ## Architecture
//!
//! ```text
//!  SessionHandle ──Command──┐
//!                           ▼
//!  Replica changes ──► ┌──────────┐ ──► TransportChannel ──► Connector link
//!  Link events ──────► │ Session  │ ──► SessionEvent stream
//!  Connect result ───► │  (loop)  │
//!  Timers ───────────► └──────────┘
//! ```
//!
//! Everything that touches session state runs inside the single
//! `select!` loop, so the presence map, comment cache and transport state
//! need no locks. Comment writes are the one exception: the REST call runs
//! in the caller's task and only its result is handed to the loop.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use uuid::Uuid;

use crate::api::HttpApi;
use crate::bridge::ReplicationBridge;
use crate::comments::{Comment, CommentApi, CommentCache, CommentPatch, NewComment};
use crate::config::SessionConfig;
use crate::error::{SessionError, TransportError};
use crate::presence::{Collaborator, PresenceAggregator};
use crate::protocol::{CursorRange, Frame, Message};
use crate::replica::{Edit, Origin, Replica, ReplicaChange};
use crate::timers::{TimerKind, Timers};
use crate::transport::{
    Address, Connection, ConnectionState, Connector, LinkEvent, TransportChannel,
};

/// Notifications for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Connected,
    Disconnected,
    /// The outage has lasted long enough to tell the user
    Reconnecting,
    DocumentChanged { origin: Origin },
    PresenceChanged,
    CommentsChanged,
}

/// Point-in-time view of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: ConnectionState,
    pub attempt: u32,
    pub queued: usize,
    pub identity: Option<String>,
}

enum Command {
    Edit(Edit),
    Select(CursorRange),
    SetIdentity(String),
    CommentCreated(Comment),
    CommentUpdated(Comment),
    CommentsLoaded(Vec<Comment>),
    Text(oneshot::Sender<String>),
    Collaborators(oneshot::Sender<Vec<Collaborator>>),
    TypingCollaborators(oneshot::Sender<Vec<Collaborator>>),
    Comments(oneshot::Sender<Vec<Comment>>),
    Status(oneshot::Sender<SessionStatus>),
    Teardown(oneshot::Sender<()>),
}

/// Session state, owned by the actor task.
pub struct Session<R: Replica> {
    config: SessionConfig,
    doc_id: Uuid,
    connector: Arc<dyn Connector>,
    channel: TransportChannel,
    bridge: ReplicationBridge<R>,
    presence: PresenceAggregator,
    comments: CommentCache,
    timers: Timers,
    pending_connect: Option<BoxFuture<'static, Result<Connection, TransportError>>>,
    link_events: Option<mpsc::UnboundedReceiver<LinkEvent>>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl<R: Replica> Session<R> {
    /// Start a session, writing comments through the REST API at
    /// `config.api_url`.
    pub fn spawn(
        config: SessionConfig,
        identity: Option<String>,
        doc_id: Uuid,
        connector: Arc<dyn Connector>,
        replica: R,
    ) -> (SessionHandle, mpsc::UnboundedReceiver<SessionEvent>) {
        let api = Arc::new(HttpApi::new(config.api_url.clone()));
        Self::spawn_with_api(config, identity, doc_id, connector, replica, api)
    }

    /// Start a session with an explicit comment API.
    pub fn spawn_with_api(
        config: SessionConfig,
        identity: Option<String>,
        doc_id: Uuid,
        connector: Arc<dyn Connector>,
        replica: R,
        api: Arc<dyn CommentApi>,
    ) -> (SessionHandle, mpsc::UnboundedReceiver<SessionEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let mut session = Session {
            channel: TransportChannel::new(config.server_url.clone(), config.backoff()),
            presence: PresenceAggregator::from_config(&config),
            bridge: ReplicationBridge::attach(replica),
            comments: CommentCache::new(),
            timers: Timers::new(),
            pending_connect: None,
            link_events: None,
            commands: command_rx,
            events: event_tx,
            config,
            doc_id,
            connector,
        };
        if let Some(address) = identity.and_then(|name| Address::new(doc_id, &name)) {
            session.presence.set_identity(address.name(), Instant::now());
            session.channel.set_address(address);
        }

        tokio::spawn(session.run());

        let handle = SessionHandle {
            commands: command_tx,
            api,
            doc_id,
        };
        (handle, event_rx)
    }

    async fn run(mut self) {
        self.connect();
        loop {
            tokio::select! {
                biased;
                change = self.bridge.next_change() => self.on_replica_change(change),
                event = next_link_event(&mut self.link_events) => self.on_link_event(event),
                result = pending_connect(&mut self.pending_connect) => {
                    self.pending_connect = None;
                    self.on_connect_result(result);
                }
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if !self.on_command(command) {
                            break;
                        }
                    }
                    // Every handle is gone.
                    None => break,
                },
                kind = self.timers.fired() => self.on_timer(kind),
            }
        }
        self.teardown();
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn connect(&mut self) {
        let Some(url) = self.channel.begin_connect() else {
            return;
        };
        log::debug!("Connecting to {url}");
        self.pending_connect = Some(self.connector.connect(&url));
    }

    fn on_connect_result(&mut self, result: Result<Connection, TransportError>) {
        match result {
            Ok(connection) => {
                let flushed = self.channel.on_open(connection.outbound);
                self.link_events = Some(connection.events);
                self.timers.cancel(TimerKind::Reconnect);
                self.timers.cancel(TimerKind::SoftFailure);
                self.timers.arm(TimerKind::Snapshot, self.config.snapshot_interval);
                log::info!("Connected to document {}", self.doc_id);
                if flushed > 0 {
                    log::info!("Replayed {flushed} queued frames");
                }
                self.emit(SessionEvent::Connected);
            }
            Err(e) => {
                log::debug!("Connect failed: {e}");
                self.on_disconnect(Vec::new());
            }
        }
    }

    fn on_disconnect(&mut self, unsent: Vec<Frame>) {
        let was_open = self.channel.is_open();
        self.link_events = None;
        self.timers.cancel(TimerKind::Snapshot);

        let outcome = self.channel.on_close(unsent, Instant::now());
        if outcome.outage_started {
            self.timers
                .arm(TimerKind::SoftFailure, self.config.soft_failure_after);
        }
        if let Some(delay) = outcome.retry_in {
            log::debug!(
                "Reconnecting in {}ms (attempt {})",
                delay.as_millis(),
                self.channel.attempt()
            );
            self.timers.arm(TimerKind::Reconnect, delay);
        }
        if was_open {
            log::info!("Disconnected from document {}", self.doc_id);
            self.emit(SessionEvent::Disconnected);
        }
    }

    fn on_link_event(&mut self, event: Option<LinkEvent>) {
        match event {
            Some(LinkEvent::Frame(frame)) => self.on_frame(frame),
            Some(LinkEvent::Closed { unsent }) => self.on_disconnect(unsent),
            None => self.on_disconnect(Vec::new()),
        }
    }

    fn on_frame(&mut self, frame: Frame) {
        let message = match Message::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                log::debug!("Dropping malformed frame: {e}");
                return;
            }
        };

        match message {
            Message::Delta(update) => {
                if let Err(e) = self.bridge.apply_delta(&update) {
                    log::debug!("Dropping delta: {e}");
                }
            }
            Message::Snapshot(state) => {
                if let Err(e) = self.bridge.apply_snapshot(&state) {
                    log::debug!("Dropping snapshot: {e}");
                }
            }
            Message::Presence(presence) => {
                self.presence.receive(&presence, Instant::now());
                self.emit(SessionEvent::PresenceChanged);
            }
            Message::CommentAdd(comment) => {
                if self.comments.merge_added(comment) {
                    self.emit(SessionEvent::CommentsChanged);
                }
            }
            Message::CommentUpdate(comment) => {
                if self.comments.merge_updated(comment) {
                    self.emit(SessionEvent::CommentsChanged);
                }
            }
        }
    }

    fn on_replica_change(&mut self, change: ReplicaChange) {
        if let Some(frame) = ReplicationBridge::<R>::outbound(&change) {
            self.channel.send(frame);
        }
        self.emit(SessionEvent::DocumentChanged {
            origin: change.origin,
        });
    }

    fn send(&mut self, message: Message) {
        match message.encode() {
            Ok(frame) => {
                self.channel.send(frame);
            }
            Err(e) => log::warn!("Failed to encode {:?}: {e}", message.kind()),
        }
    }

    fn local_presence(&mut self, cursor: CursorRange) {
        if let Some(payload) = self.presence.local_change(cursor, Instant::now()) {
            self.send(Message::Presence(payload));
            self.timers.arm(TimerKind::TypingIdle, self.config.typing_idle);
            self.emit(SessionEvent::PresenceChanged);
        }
    }

    fn set_identity(&mut self, name: String) {
        let Some(address) = Address::new(self.doc_id, &name) else {
            return;
        };
        if self.channel.address() == Some(&address) {
            return;
        }
        self.presence.set_identity(address.name(), Instant::now());
        let had_address = self.channel.address().is_some();
        self.channel.set_address(address);

        if had_address {
            // New name, new connection target.
            self.pending_connect = None;
            self.link_events = None;
            self.timers.cancel(TimerKind::Reconnect);
            self.timers.cancel(TimerKind::Snapshot);
            self.channel.reset();
        }
        self.connect();
        self.emit(SessionEvent::PresenceChanged);
    }

    /// Returns `false` once the loop should stop.
    fn on_command(&mut self, command: Command) -> bool {
        match command {
            Command::Edit(edit) => {
                if self.bridge.edit(&edit) {
                    let cursor = cursor_after(&edit, &self.bridge.text());
                    self.local_presence(cursor);
                }
            }
            Command::Select(range) => self.local_presence(range),
            Command::SetIdentity(name) => self.set_identity(name),
            Command::CommentCreated(comment) => {
                if self.comments.merge_added(comment.clone()) {
                    self.emit(SessionEvent::CommentsChanged);
                }
                self.send(Message::CommentAdd(comment));
            }
            Command::CommentUpdated(comment) => {
                if self.comments.merge_updated(comment.clone()) {
                    self.emit(SessionEvent::CommentsChanged);
                }
                self.send(Message::CommentUpdate(comment));
            }
            Command::CommentsLoaded(comments) => {
                self.comments.replace_all(comments);
                self.emit(SessionEvent::CommentsChanged);
            }
            Command::Text(reply) => {
                let _ = reply.send(self.bridge.text());
            }
            Command::Collaborators(reply) => {
                let _ = reply.send(self.presence.visible(Instant::now()));
            }
            Command::TypingCollaborators(reply) => {
                let _ = reply.send(self.presence.typing_collaborators(Instant::now()));
            }
            Command::Comments(reply) => {
                let _ = reply.send(self.comments.to_vec());
            }
            Command::Status(reply) => {
                let _ = reply.send(SessionStatus {
                    state: self.channel.state(),
                    attempt: self.channel.attempt(),
                    queued: self.channel.queued(),
                    identity: self.presence.local_name().map(str::to_string),
                });
            }
            Command::Teardown(reply) => {
                self.teardown();
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn on_timer(&mut self, kind: TimerKind) {
        log::debug!("Timer fired: {kind:?}");
        match kind {
            TimerKind::Reconnect => self.connect(),
            TimerKind::SoftFailure => {
                if !self.channel.is_open() {
                    log::warn!(
                        "Connection lost, reconnecting (attempt {})",
                        self.channel.attempt()
                    );
                    self.emit(SessionEvent::Reconnecting);
                }
            }
            TimerKind::TypingIdle => {
                if let Some(payload) = self.presence.typing_idle(Instant::now()) {
                    self.send(Message::Presence(payload));
                    self.emit(SessionEvent::PresenceChanged);
                }
            }
            TimerKind::Snapshot => {
                if self.channel.is_open() {
                    if let Some(snapshot) = self.bridge.snapshot() {
                        self.send(snapshot);
                    }
                    self.presence.prune(Instant::now());
                    self.timers
                        .arm(TimerKind::Snapshot, self.config.snapshot_interval);
                }
            }
        }
    }

    fn teardown(&mut self) {
        if !self.channel.teardown() {
            return;
        }
        self.timers.cancel_all();
        self.bridge.detach();
        self.pending_connect = None;
        self.link_events = None;
        log::info!("Session for document {} closed", self.doc_id);
    }
}

/// Caret position after a local edit, clamped to the document.
fn cursor_after(edit: &Edit, text: &str) -> CursorRange {
    let len = text.chars().count() as u32;
    let at = match edit {
        Edit::Insert { index, text } => index.saturating_add(text.chars().count() as u32),
        Edit::Delete { index, .. } => *index,
    };
    CursorRange::caret(at.min(len))
}

async fn next_link_event(
    events: &mut Option<mpsc::UnboundedReceiver<LinkEvent>>,
) -> Option<LinkEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn pending_connect(
    pending: &mut Option<BoxFuture<'static, Result<Connection, TransportError>>>,
) -> Result<Connection, TransportError> {
    match pending {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

/// Caller side of a session. Cheap to clone; the session is torn down
/// when the last clone is dropped.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    api: Arc<dyn CommentApi>,
    doc_id: Uuid,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("doc_id", &self.doc_id)
            .field("closed", &self.commands.is_closed())
            .finish()
    }
}

impl SessionHandle {
    pub fn doc_id(&self) -> Uuid {
        self.doc_id
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    fn tell(&self, command: Command) -> Result<(), SessionError> {
        self.commands.send(command).map_err(|_| SessionError::Closed)
    }

    async fn ask<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.tell(command(tx))?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Local edit from the editor surface.
    pub fn edit(&self, edit: Edit) -> Result<(), SessionError> {
        self.tell(Command::Edit(edit))
    }

    /// Local selection change.
    pub fn select(&self, range: CursorRange) -> Result<(), SessionError> {
        self.tell(Command::Select(range))
    }

    /// Set the display name; connects once both name and document are known.
    pub fn set_identity(&self, name: &str) -> Result<(), SessionError> {
        if name.trim().is_empty() {
            return Err(SessionError::MissingIdentity);
        }
        self.tell(Command::SetIdentity(name.trim().to_string()))
    }

    /// Create a comment on `selection`, then relay it to peers.
    pub async fn add_comment(
        &self,
        selection: CursorRange,
        text: &str,
    ) -> Result<Comment, SessionError> {
        let author = self
            .status()
            .await?
            .identity
            .ok_or(SessionError::MissingIdentity)?;
        if selection.is_collapsed() {
            return Err(SessionError::EmptySelection);
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyComment);
        }

        let comment = self
            .api
            .add_comment(self.doc_id, NewComment::new(author, selection, text))
            .await
            .map_err(SessionError::AddComment)?;
        self.tell(Command::CommentCreated(comment.clone()))?;
        Ok(comment)
    }

    /// Mark a comment resolved, then relay the update.
    pub async fn resolve_comment(&self, comment_id: &str) -> Result<Comment, SessionError> {
        let comment = self
            .api
            .update_comment(self.doc_id, comment_id.to_string(), CommentPatch::resolve())
            .await
            .map_err(SessionError::ResolveComment)?;
        self.tell(Command::CommentUpdated(comment.clone()))?;
        Ok(comment)
    }

    /// Refresh the comment cache from the server.
    pub async fn load_comments(&self) -> Result<Vec<Comment>, SessionError> {
        let comments = self
            .api
            .list_comments(self.doc_id)
            .await
            .map_err(SessionError::LoadComments)?;
        self.tell(Command::CommentsLoaded(comments.clone()))?;
        Ok(comments)
    }

    pub async fn text(&self) -> Result<String, SessionError> {
        self.ask(Command::Text).await
    }

    /// Visible collaborators, sorted by name.
    pub async fn collaborators(&self) -> Result<Vec<Collaborator>, SessionError> {
        self.ask(Command::Collaborators).await
    }

    /// Other participants currently typing.
    pub async fn typing_collaborators(&self) -> Result<Vec<Collaborator>, SessionError> {
        self.ask(Command::TypingCollaborators).await
    }

    pub async fn comments(&self) -> Result<Vec<Comment>, SessionError> {
        self.ask(Command::Comments).await
    }

    pub async fn status(&self) -> Result<SessionStatus, SessionError> {
        self.ask(Command::Status).await
    }

    pub async fn state(&self) -> Result<ConnectionState, SessionError> {
        Ok(self.status().await?.state)
    }

    /// Close the session. Safe to call any number of times.
    pub async fn teardown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Teardown(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}
