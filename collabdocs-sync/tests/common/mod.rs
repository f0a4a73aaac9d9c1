//! Shared fixtures: a minimal fan-out relay over real WebSockets.
//!
//! The relay forwards every text/binary message to every other connected
//! peer and keeps a log of what it received. It holds no document state.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use collabdocs_sync::{Session, SessionConfig, SessionEvent, SessionHandle, WsConnector, YrsReplica};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use url::Url;
use uuid::Uuid;

struct Peer {
    id: usize,
    tx: mpsc::UnboundedSender<WsMessage>,
    task: JoinHandle<()>,
}

#[derive(Clone)]
pub struct Relay {
    pub addr: SocketAddr,
    peers: Arc<RwLock<Vec<Peer>>>,
    received: Arc<RwLock<Vec<WsMessage>>>,
    next_id: Arc<AtomicUsize>,
}

impl Relay {
    pub async fn start() -> Relay {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let relay = Relay {
            addr: listener.local_addr().unwrap(),
            peers: Arc::new(RwLock::new(Vec::new())),
            received: Arc::new(RwLock::new(Vec::new())),
            next_id: Arc::new(AtomicUsize::new(0)),
        };

        let accept = relay.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                accept.add_peer(stream).await;
            }
        });
        relay
    }

    pub fn url(&self) -> Url {
        Url::parse(&format!("ws://{}/ws", self.addr)).unwrap()
    }

    async fn add_peer(&self, stream: TcpStream) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        let relay = self.clone();
        let task = tokio::spawn(async move {
            if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                relay.serve(id, ws, rx).await;
            }
            relay.peers.write().await.retain(|p| p.id != id);
        });
        self.peers.write().await.push(Peer { id, tx, task });
    }

    async fn serve(
        &self,
        id: usize,
        mut ws: tokio_tungstenite::WebSocketStream<TcpStream>,
        mut rx: mpsc::UnboundedReceiver<WsMessage>,
    ) {
        loop {
            tokio::select! {
                incoming = ws.next() => match incoming {
                    Some(Ok(msg)) if msg.is_text() || msg.is_binary() => {
                        self.received.write().await.push(msg.clone());
                        for peer in self.peers.read().await.iter().filter(|p| p.id != id) {
                            let _ = peer.tx.send(msg.clone());
                        }
                    }
                    Some(Ok(_)) => {}
                    _ => break,
                },
                outgoing = rx.recv() => match outgoing {
                    Some(msg) => {
                        if ws.send(msg).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    }

    /// Cut every connection without a close handshake.
    pub async fn drop_all(&self) {
        for peer in self.peers.write().await.drain(..) {
            peer.task.abort();
        }
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Binary payloads the relay has seen, in arrival order.
    pub async fn binary_received(&self) -> Vec<Vec<u8>> {
        self.received
            .read()
            .await
            .iter()
            .filter_map(|m| match m {
                WsMessage::Binary(data) => Some(data.to_vec()),
                _ => None,
            })
            .collect()
    }
}

/// Timings shrunk so real-time tests stay fast.
pub fn fast_config(relay: &Relay) -> SessionConfig {
    SessionConfig {
        backoff_base: Duration::from_millis(25),
        backoff_cap: Duration::from_millis(200),
        soft_failure_after: Duration::from_millis(300),
        snapshot_interval: Duration::from_millis(250),
        ..SessionConfig::default()
    }
    .with_server_url(relay.url())
}

pub fn join(
    relay: &Relay,
    doc_id: Uuid,
    name: &str,
) -> (SessionHandle, mpsc::UnboundedReceiver<SessionEvent>) {
    Session::spawn(
        fast_config(relay),
        Some(name.to_string()),
        doc_id,
        Arc::new(WsConnector),
        YrsReplica::new(),
    )
}

pub async fn wait_for(events: &mut mpsc::UnboundedReceiver<SessionEvent>, want: SessionEvent) {
    let found = timeout(Duration::from_secs(5), async {
        while let Some(event) = events.recv().await {
            if event == want {
                return true;
            }
        }
        false
    })
    .await;
    assert_eq!(found, Ok(true), "never saw {want:?}");
}

/// Poll `check` until it holds or five seconds pass.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..250 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached within 5s");
}
