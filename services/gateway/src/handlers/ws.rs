use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        State,
        ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::models::{ControlAck, ControlAction, ControlMessage};
use crate::relay::{ConnectionId, Frame, Relay};
use crate::state::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.relay))
}

/// Time since the client was last heard from
struct Heartbeat {
    epoch: Instant,
    last_ms: AtomicU64,
}

impl Heartbeat {
    fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    fn beat(&self) {
        self.last_ms
            .store(self.epoch.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    fn silent_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_ms.load(Ordering::Relaxed));
        self.epoch.elapsed().saturating_sub(last)
    }
}

async fn handle_socket(socket: WebSocket, relay: Relay) {
    let config = relay.config().clone();
    let (handle, queue) = relay.connect();
    let id = handle.id;
    let done = handle.closing.child_token();
    let heartbeat = Arc::new(Heartbeat::new());
    info!(connection = %id, "Client connected");

    let (sink, mut stream) = socket.split();
    let sender = tokio::spawn(run_sender(sink, queue, config, done.clone(), heartbeat.clone()));

    loop {
        let next = tokio::select! {
            _ = done.cancelled() => break,
            next = stream.next() => next,
        };
        match next {
            Some(Ok(Message::Text(text))) => {
                heartbeat.beat();
                if let Some(ack) = apply_control(&relay, id, text.as_str()).await {
                    relay.send(id, ack).await;
                }
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => heartbeat.beat(),
            Some(Err(e)) => {
                debug!(connection = %id, error = %e, "Read failed");
                break;
            }
        }
    }

    done.cancel();
    relay.disconnect(id).await;
    let _ = sender.await;
    info!(connection = %id, "Client disconnected");
}

/// Drain the connection's queue onto the socket. Any write failure or
/// timeout, or a client that stopped answering pings, ends the connection.
async fn run_sender(
    mut sink: SplitSink<WebSocket, Message>,
    mut queue: mpsc::Receiver<Frame>,
    config: RelayConfig,
    done: CancellationToken,
    heartbeat: Arc<Heartbeat>,
) {
    let mut ping = tokio::time::interval_at(Instant::now() + config.ping_interval, config.ping_interval);

    loop {
        let outgoing = tokio::select! {
            _ = done.cancelled() => {
                let _ = timeout(config.write_timeout, sink.send(Message::Close(None))).await;
                break;
            }
            frame = queue.recv() => match frame {
                Some(frame) => Message::Text(Utf8Bytes::from(&*frame)),
                None => break,
            },
            _ = ping.tick() => {
                let silent = heartbeat.silent_for();
                if silent > config.pong_timeout {
                    warn!(silent_secs = silent.as_secs(), "Client stopped responding, closing");
                    break;
                }
                Message::Ping(Bytes::new())
            }
        };

        match timeout(config.write_timeout, sink.send(outgoing)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(error = %e, "Write failed, closing");
                break;
            }
            Err(_) => {
                warn!(timeout_ms = config.write_timeout.as_millis() as u64, "Write timed out, closing");
                break;
            }
        }
    }
    done.cancel();
}

/// Apply one control frame and return the acknowledgement to send back.
///
/// Malformed frames, unknown types and broker failures are logged and
/// produce no reply.
pub async fn apply_control(relay: &Relay, id: ConnectionId, text: &str) -> Option<Frame> {
    let msg: ControlMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            debug!(connection = %id, error = %e, "Ignoring unreadable control frame");
            return None;
        }
    };
    let (Some(action), Some(subject)) = (msg.action(), msg.subject()) else {
        debug!(connection = %id, action = %msg.action, "Ignoring control frame without a usable subject");
        return None;
    };

    let ack = match action {
        ControlAction::Subscribe => match relay.subscribe(id, &subject).await {
            Ok(true) => ControlAck::subscribed(&subject),
            Ok(false) => return None,
            Err(e) => {
                warn!(connection = %id, subject = %subject, error = %e, "Subscribe failed");
                return None;
            }
        },
        ControlAction::Unsubscribe => {
            if !relay.unsubscribe(id, &subject).await {
                return None;
            }
            ControlAck::unsubscribed(&subject)
        }
    };
    serde_json::to_string(&ack).ok().map(Frame::from)
}
