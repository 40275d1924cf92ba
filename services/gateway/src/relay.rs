//! Websocket fan-out relay
//!
//! ```text
//!  broker ──► one subscription per subject ──► SubjectFanout
//!                                                 │ try_send (never blocks)
//!                          ┌──────────────────────┼──────────────────────┐
//!                          ▼                      ▼                      ▼
//!                  queue (bounded)        queue (bounded)        queue (bounded)
//!                          │                      │                      │
//!                    sender task            sender task            sender task
//! ```
//!
//! Broker subscriptions are reference counted by the connections that want
//! them: the first subscriber opens one, the last one to leave releases it.
//! A full connection queue drops the newest frame for that connection only.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use event_bus::{
    BusError, BusMessage, DispatchSummary, EventBus, MessageHandler, SubscribeOptions, spawn_dispatch,
};

pub use types::ids::ConnectionId;

use crate::config::RelayConfig;
use crate::stats::GatewayStats;

/// Serialized text frame shared by every connection it is delivered to
pub type Frame = Arc<str>;

type Routes = DashMap<String, DashMap<ConnectionId, mpsc::Sender<Frame>>>;

struct Feed {
    cancel: CancellationToken,
    handle: JoinHandle<DispatchSummary>,
}

impl Feed {
    /// False once the broker ended the subscription
    fn is_live(&self) -> bool {
        !self.handle.is_finished()
    }
}

struct Connection {
    tx: mpsc::Sender<Frame>,
    subjects: HashSet<String>,
}

/// Handle given to the websocket task that owns a connection
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    /// Cancelled when the relay shuts down
    pub closing: CancellationToken,
}

struct RelayInner {
    bus: EventBus,
    config: RelayConfig,
    stats: Arc<GatewayStats>,
    routes: Arc<Routes>,
    connections: DashMap<ConnectionId, Connection>,
    /// Serialises opening and releasing broker subscriptions
    feeds: Mutex<HashMap<String, Feed>>,
    closing: CancellationToken,
}

#[derive(Clone)]
pub struct Relay {
    inner: Arc<RelayInner>,
}

impl Relay {
    pub fn new(bus: EventBus, config: RelayConfig, stats: Arc<GatewayStats>, cancel: &CancellationToken) -> Self {
        Self {
            inner: Arc::new(RelayInner {
                bus,
                config,
                stats,
                routes: Arc::new(DashMap::new()),
                connections: DashMap::new(),
                feeds: Mutex::new(HashMap::new()),
                closing: cancel.child_token(),
            }),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.inner.config
    }

    /// Register a connection and hand back its outbound queue.
    pub fn connect(&self) -> (ConnectionHandle, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(self.inner.config.queue_capacity);
        let id = ConnectionId::new();
        self.inner.connections.insert(
            id,
            Connection {
                tx,
                subjects: HashSet::new(),
            },
        );
        self.inner.stats.connection_opened();
        debug!(connection = %id, "Connection registered");
        (
            ConnectionHandle {
                id,
                closing: self.inner.closing.child_token(),
            },
            rx,
        )
    }

    /// Add `subject` to a connection. `Ok(false)` if it already had it.
    ///
    /// A broker subscription whose dispatch loop has ended is replaced, so a
    /// client resubscribing to a dead subject gets a working feed back even
    /// while other connections still hold it.
    pub async fn subscribe(&self, id: ConnectionId, subject: &str) -> Result<bool, BusError> {
        let (tx, held) = match self.inner.connections.get(&id) {
            Some(conn) => (conn.tx.clone(), conn.subjects.contains(subject)),
            None => return Err(BusError::Closed),
        };

        {
            let mut feeds = self.inner.feeds.lock().await;
            let live = feeds.get(subject).is_some_and(Feed::is_live);
            if held && live {
                return Ok(false);
            }
            if !live {
                if let Some(ended) = feeds.remove(subject) {
                    ended.cancel.cancel();
                    info!(subject, holders = self.subscriber_count(subject), "Replacing ended broker subscription");
                }
                let sub = self.inner.bus.subscribe(subject, SubscribeOptions::ephemeral()).await?;
                let fanout = Arc::new(SubjectFanout {
                    subject: subject.to_string(),
                    routes: self.inner.routes.clone(),
                    stats: self.inner.stats.clone(),
                });
                let cancel = self.inner.closing.child_token();
                let handle = spawn_dispatch(sub, fanout, cancel.clone());
                feeds.insert(subject.to_string(), Feed { cancel, handle });
                info!(subject, "Opened broker subscription");
            }
            self.inner
                .routes
                .entry(subject.to_string())
                .or_default()
                .insert(id, tx);
        }

        match self.inner.connections.get_mut(&id) {
            Some(mut conn) => {
                conn.subjects.insert(subject.to_string());
                Ok(true)
            }
            None => {
                // disconnected while subscribing
                self.release(id, subject).await;
                Err(BusError::Closed)
            }
        }
    }

    /// Remove `subject` from a connection. `false` if it did not have it.
    pub async fn unsubscribe(&self, id: ConnectionId, subject: &str) -> bool {
        let held = self
            .inner
            .connections
            .get_mut(&id)
            .map(|mut conn| conn.subjects.remove(subject))
            .unwrap_or(false);
        if held {
            self.release(id, subject).await;
        }
        held
    }

    /// Drop a connection and every subject reference it held.
    pub async fn disconnect(&self, id: ConnectionId) {
        let Some((_, conn)) = self.inner.connections.remove(&id) else {
            return;
        };
        for subject in &conn.subjects {
            self.release(id, subject).await;
        }
        self.inner.stats.connection_closed();
        debug!(connection = %id, subjects = conn.subjects.len(), "Connection released");
    }

    async fn release(&self, id: ConnectionId, subject: &str) {
        let mut feeds = self.inner.feeds.lock().await;
        let now_empty = match self.inner.routes.get(subject) {
            Some(conns) => {
                conns.remove(&id);
                conns.is_empty()
            }
            None => false,
        };
        if !now_empty {
            return;
        }
        self.inner.routes.remove_if(subject, |_, conns| conns.is_empty());
        if let Some(feed) = feeds.remove(subject) {
            stop_feed(subject, feed).await;
        }
    }

    /// Queue a frame for one connection, waiting for room.
    pub async fn send(&self, id: ConnectionId, frame: Frame) -> bool {
        let Some(tx) = self.inner.connections.get(&id).map(|c| c.tx.clone()) else {
            return false;
        };
        tx.send(frame).await.is_ok()
    }

    /// Number of connections currently routed for `subject`
    pub fn subscriber_count(&self, subject: &str) -> usize {
        self.inner.routes.get(subject).map(|c| c.len()).unwrap_or(0)
    }

    /// Number of broker subscriptions still delivering
    pub async fn feed_count(&self) -> usize {
        self.inner.feeds.lock().await.values().filter(|f| f.is_live()).count()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.len()
    }

    pub fn subjects_of(&self, id: ConnectionId) -> Vec<String> {
        let mut subjects: Vec<String> = self
            .inner
            .connections
            .get(&id)
            .map(|c| c.subjects.iter().cloned().collect())
            .unwrap_or_default();
        subjects.sort();
        subjects
    }

    /// Tell every connection to close, wait for them to go, then release
    /// whatever broker subscriptions remain.
    pub async fn shutdown(&self) {
        let open = self.connection_count();
        info!(connections = open, "Closing client connections");
        self.inner.closing.cancel();

        let grace = self.inner.config.shutdown_grace;
        let waited = tokio::time::timeout(grace, async {
            while self.connection_count() > 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        if waited.is_err() {
            warn!(remaining = self.connection_count(), "Connections still open after grace period");
            let ids: Vec<ConnectionId> = self.inner.connections.iter().map(|c| *c.key()).collect();
            for id in ids {
                self.disconnect(id).await;
            }
        }

        let feeds: Vec<(String, Feed)> = self.inner.feeds.lock().await.drain().collect();
        for (subject, feed) in feeds {
            stop_feed(&subject, feed).await;
        }
        self.inner.routes.clear();
        info!("Relay stopped");
    }
}

async fn stop_feed(subject: &str, feed: Feed) {
    feed.cancel.cancel();
    match feed.handle.await {
        Ok(summary) => info!(subject, forwarded = summary.handled, "Released broker subscription"),
        Err(e) => warn!(subject, error = %e, "Fan-out task ended abnormally"),
    }
}

/// Render a broker message as the client frame `{subject, data}`.
pub fn render_frame(subject: &str, payload: &[u8]) -> Frame {
    let data = serde_json::from_slice::<Value>(payload)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(payload).into_owned()));
    Arc::from(json!({ "subject": subject, "data": data }).to_string())
}

/// Delivers one subject's broker messages to its connections
struct SubjectFanout {
    subject: String,
    routes: Arc<Routes>,
    stats: Arc<GatewayStats>,
}

#[async_trait]
impl MessageHandler for SubjectFanout {
    async fn handle(&self, message: &BusMessage) -> anyhow::Result<()> {
        let Some(conns) = self.routes.get(&self.subject) else {
            return Ok(());
        };
        let frame = render_frame(&message.subject, &message.payload);
        for entry in conns.iter() {
            match entry.value().try_send(frame.clone()) {
                Ok(()) => self.stats.record_forwarded(),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.stats.record_dropped();
                    warn!(subject = %message.subject, connection = %entry.key(), "Client queue full, dropping message");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(connection = %entry.key(), "Client queue closed");
                }
            }
        }
        Ok(())
    }
}
