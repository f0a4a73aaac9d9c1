//! Transport channel: one connection at a time, reconnect with backoff.
//!
//! ```text
//!            begin_connect           on_open
//!   Idle ───────────────► Connecting ───────► Open
//!    ▲                        │                 │
//!    │ teardown               │ failed          │ on_close
//!    │                        ▼                 ▼
//!    └──────────────────── Closed ◄─────────────┘
//!                            │  backoff timer
//!                            └──► begin_connect
//! ```
//!
//! [`TransportChannel`] is a plain state machine; the session drives it
//! from its event loop and owns the timers. A [`Connector`] produces
//! [`Connection`]s: a frame sender plus a stream of [`LinkEvent`]s that
//! always ends with `Closed`. Transport errors never surface directly,
//! only through that close.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::{FutureExt, SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use url::Url;
use uuid::Uuid;

use crate::config::Backoff;
use crate::error::TransportError;
use crate::protocol::Frame;
use crate::queue::OutboundQueue;

/// Who we are and which document we are editing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    doc_id: Uuid,
    name: String,
}

impl Address {
    /// Both parts are required; a blank name yields `None`.
    pub fn new(doc_id: Uuid, name: &str) -> Option<Self> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        Some(Self {
            doc_id,
            name: name.to_string(),
        })
    }

    pub fn doc_id(&self) -> Uuid {
        self.doc_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Endpoint with `docId` and `name` query parameters appended.
    pub fn url(&self, base: &Url) -> Url {
        let mut url = base.clone();
        url.query_pairs_mut()
            .append_pair("docId", &self.doc_id.to_string())
            .append_pair("name", &self.name);
        url
    }
}

/// Channel lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    /// Dropped; a reconnect is scheduled
    Closed,
}

/// What the link reports back to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Frame(Frame),
    /// Terminal. `unsent` holds frames accepted but never written.
    Closed { unsent: Vec<Frame> },
}

/// A live connection.
#[derive(Debug)]
pub struct Connection {
    pub outbound: mpsc::UnboundedSender<Frame>,
    pub events: mpsc::UnboundedReceiver<LinkEvent>,
}

/// Opens connections. Object safe so sessions can hold `Arc<dyn Connector>`.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: &Url) -> BoxFuture<'static, Result<Connection, TransportError>>;
}

// ───────────────────────────────────────────────────────────────────
// WebSocket connector
// ───────────────────────────────────────────────────────────────────

/// tokio-tungstenite backed connector.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(&self, url: &Url) -> BoxFuture<'static, Result<Connection, TransportError>> {
        let url = url.to_string();
        async move {
            let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
                .await
                .map_err(|e| TransportError::Connect(e.to_string()))?;

            let (out_tx, out_rx) = mpsc::unbounded_channel();
            let (event_tx, event_rx) = mpsc::unbounded_channel();
            tokio::spawn(pump_socket(ws_stream, out_rx, event_tx));

            Ok(Connection {
                outbound: out_tx,
                events: event_rx,
            })
        }
        .boxed()
    }
}

fn to_ws(frame: &Frame) -> WsMessage {
    match frame {
        Frame::Binary(bytes) => WsMessage::Binary(bytes.clone().into()),
        Frame::Text(text) => WsMessage::Text(text.clone().into()),
    }
}

/// One task per socket: forward reads as events, write outbound frames.
async fn pump_socket<S>(
    ws_stream: WebSocketStream<S>,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    events: mpsc::UnboundedSender<LinkEvent>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut writer, mut reader) = ws_stream.split();
    let mut unsent = Vec::new();

    loop {
        tokio::select! {
            incoming = reader.next() => match incoming {
                Some(Ok(WsMessage::Binary(data))) => {
                    let _ = events.send(LinkEvent::Frame(Frame::Binary(data.into())));
                }
                Some(Ok(WsMessage::Text(text))) => {
                    let _ = events.send(LinkEvent::Frame(Frame::Text(text.as_str().to_owned())));
                }
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Err(e)) => {
                    log::debug!("Socket read error: {e}");
                    break;
                }
                Some(Ok(_)) => {}
            },
            outgoing = outbound.recv() => match outgoing {
                Some(frame) => {
                    if let Err(e) = writer.send(to_ws(&frame)).await {
                        log::debug!("Socket write error: {e}");
                        unsent.push(frame);
                        break;
                    }
                }
                None => {
                    // Session side went away: close politely, nobody is listening.
                    let _ = writer.close().await;
                    return;
                }
            },
        }
    }

    outbound.close();
    while let Ok(frame) = outbound.try_recv() {
        unsent.push(frame);
    }
    let _ = events.send(LinkEvent::Closed { unsent });
}

// ───────────────────────────────────────────────────────────────────
// In-memory connector
// ───────────────────────────────────────────────────────────────────

/// In-process connector. Every successful `connect` hands the far end of
/// the link to whoever holds the accept receiver.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    accept: mpsc::UnboundedSender<MemoryLink>,
    refusing: Arc<AtomicBool>,
    attempts: Arc<AtomicUsize>,
}

impl MemoryConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryLink>) {
        let (accept, accepted) = mpsc::unbounded_channel();
        let connector = Self {
            accept,
            refusing: Arc::new(AtomicBool::new(false)),
            attempts: Arc::new(AtomicUsize::new(0)),
        };
        (connector, accepted)
    }

    /// Make subsequent connects fail (server down) or succeed again.
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Connect calls seen so far, successful or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, url: &Url) -> BoxFuture<'static, Result<Connection, TransportError>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refusing.load(Ordering::SeqCst) {
            return futures_util::future::ready(Err(TransportError::Refused)).boxed();
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let link = MemoryLink {
            url: url.clone(),
            from_client: out_rx,
            to_client: Some(event_tx),
        };
        // If nobody accepts, the link drops and the client sees a close.
        let _ = self.accept.send(link);

        futures_util::future::ready(Ok(Connection {
            outbound: out_tx,
            events: event_rx,
        }))
        .boxed()
    }
}

/// Server side of an in-memory connection.
///
/// Dropping it closes the connection; frames the client sent that were
/// never received here are reported back as unsent.
#[derive(Debug)]
pub struct MemoryLink {
    url: Url,
    from_client: mpsc::UnboundedReceiver<Frame>,
    to_client: Option<mpsc::UnboundedSender<LinkEvent>>,
}

impl MemoryLink {
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Next frame from the client; `None` once the client hung up.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.from_client.recv().await
    }

    /// Frame already sitting in the link, if any.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.from_client.try_recv().ok()
    }

    /// Deliver a frame to the client. `false` if the client is gone.
    pub fn send(&self, frame: Frame) -> bool {
        self.to_client
            .as_ref()
            .map(|tx| tx.send(LinkEvent::Frame(frame)).is_ok())
            .unwrap_or(false)
    }

    /// Drop the connection from the server side.
    pub fn close(self) {}
}

impl Drop for MemoryLink {
    fn drop(&mut self) {
        if let Some(tx) = self.to_client.take() {
            self.from_client.close();
            let mut unsent = Vec::new();
            while let Ok(frame) = self.from_client.try_recv() {
                unsent.push(frame);
            }
            let _ = tx.send(LinkEvent::Closed { unsent });
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Channel state machine
// ───────────────────────────────────────────────────────────────────

/// Result of a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Queued,
}

/// Result of a close or failed connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseOutcome {
    /// Delay before the next attempt; `None` after teardown
    pub retry_in: Option<std::time::Duration>,
    /// This close began a new outage (the channel had been open, or never failed before)
    pub outage_started: bool,
}

/// Connection state, attempt counter and the outbound queue.
#[derive(Debug)]
pub struct TransportChannel {
    base_url: Url,
    address: Option<Address>,
    state: ConnectionState,
    attempt: u32,
    disconnected_since: Option<Instant>,
    link: Option<mpsc::UnboundedSender<Frame>>,
    queue: OutboundQueue,
    reconnect: bool,
    backoff: Backoff,
}

impl TransportChannel {
    pub fn new(base_url: Url, backoff: Backoff) -> Self {
        Self {
            base_url,
            address: None,
            state: ConnectionState::Idle,
            attempt: 0,
            disconnected_since: None,
            link: None,
            queue: OutboundQueue::new(),
            reconnect: true,
            backoff,
        }
    }

    pub fn set_address(&mut self, address: Address) {
        self.address = Some(address);
    }

    pub fn address(&self) -> Option<&Address> {
        self.address.as_ref()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Consecutive failed attempts since the last open.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Start of the current outage.
    pub fn disconnected_since(&self) -> Option<Instant> {
        self.disconnected_since
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn is_torn_down(&self) -> bool {
        !self.reconnect
    }

    /// Move to `Connecting` and return the target.
    ///
    /// `None` (no-op) without an address, after teardown, or while a
    /// connection is already open or being opened.
    pub fn begin_connect(&mut self) -> Option<Url> {
        if !self.reconnect {
            return None;
        }
        let url = self.address.as_ref()?.url(&self.base_url);
        if matches!(self.state, ConnectionState::Connecting | ConnectionState::Open) {
            return None;
        }
        self.state = ConnectionState::Connecting;
        Some(url)
    }

    /// Connection established: reset backoff and flush the queue.
    ///
    /// Returns how many queued frames went out.
    pub fn on_open(&mut self, outbound: mpsc::UnboundedSender<Frame>) -> usize {
        self.state = ConnectionState::Open;
        self.attempt = 0;
        self.disconnected_since = None;
        let flushed = self.queue.flush(|frame| outbound.send(frame).map_err(|e| e.0));
        self.link = Some(outbound);
        flushed
    }

    /// Connection lost. Unwritten frames go back to the head of the queue.
    pub fn on_close(&mut self, unsent: Vec<Frame>, now: Instant) -> CloseOutcome {
        self.link = None;
        self.queue.requeue_front(unsent);
        let outage_started = self.disconnected_since.is_none();
        if outage_started {
            self.disconnected_since = Some(now);
        }

        if !self.reconnect {
            self.state = ConnectionState::Idle;
            return CloseOutcome {
                retry_in: None,
                outage_started,
            };
        }

        self.state = ConnectionState::Closed;
        self.attempt = self.attempt.saturating_add(1);
        CloseOutcome {
            retry_in: Some(self.backoff.delay(self.attempt)),
            outage_started,
        }
    }

    /// Connect attempt failed before opening; same policy as a close.
    pub fn on_connect_failed(&mut self, now: Instant) -> CloseOutcome {
        self.on_close(Vec::new(), now)
    }

    /// Transmit now if open and nothing is waiting ahead of us, else queue.
    pub fn send(&mut self, frame: Frame) -> Delivery {
        let frame = match (&self.link, self.state) {
            (Some(link), ConnectionState::Open) if self.queue.is_empty() => {
                match link.send(frame) {
                    Ok(()) => return Delivery::Sent,
                    Err(e) => e.0,
                }
            }
            _ => frame,
        };
        self.queue.enqueue(frame);
        Delivery::Queued
    }

    /// Drop the current link and go back to `Idle` without disabling
    /// reconnects. Used when the address changes under an open session.
    pub fn reset(&mut self) {
        if !self.reconnect {
            return;
        }
        self.link = None;
        self.attempt = 0;
        self.state = ConnectionState::Idle;
    }

    /// Disable reconnects and drop the link. Idempotent.
    ///
    /// Returns `true` only for the call that actually tore down.
    pub fn teardown(&mut self) -> bool {
        let first = self.reconnect;
        self.reconnect = false;
        self.link = None;
        self.state = ConnectionState::Idle;
        first
    }
}
