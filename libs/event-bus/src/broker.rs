//! Broker seam
//!
//! `Broker` is the narrow boundary between the bus client and a concrete
//! transport. Delivery is message-passing: a backend pumps inbound messages
//! into the channel behind a `Subscription`, and the owner consumes them at
//! its own pace. Dropping the `Subscription` releases the binding.

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use crate::error::BusError;
use crate::streams::StreamDescriptor;

/// Channel depth between a backend pump and its subscription owner
pub const SUBSCRIPTION_BUFFER: usize = 1024;

/// Acknowledgment mode of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// Every message must be acknowledged; unacked messages are redelivered
    Explicit,
    /// Fire-and-forget delivery, nothing is retained for this subscriber
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeOptions {
    pub ack_mode: AckMode,
    /// Stable consumer name; survives reconnects and resumes from the last ack
    pub durable: Option<String>,
}

impl SubscribeOptions {
    /// Core (non-persistent) subscription
    pub fn ephemeral() -> Self {
        Self {
            ack_mode: AckMode::None,
            durable: None,
        }
    }

    /// Persistent subscription with explicit acks but no stable name
    pub fn explicit() -> Self {
        Self {
            ack_mode: AckMode::Explicit,
            durable: None,
        }
    }

    /// Durable consumer with explicit acks
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            ack_mode: AckMode::Explicit,
            durable: Some(name.into()),
        }
    }
}

/// Result of provisioning one stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Created,
    Updated,
}

/// Broker acknowledgment of a persisted publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub stream: String,
    pub sequence: u64,
}

/// Backend-specific acknowledgment handle
#[async_trait]
pub trait Acker: Send + Sync {
    async fn ack(self: Box<Self>) -> Result<(), BusError>;
}

/// One inbound message
pub struct BusMessage {
    pub subject: String,
    pub payload: Bytes,
    acker: Option<Box<dyn Acker>>,
}

impl BusMessage {
    pub fn new(subject: impl Into<String>, payload: Bytes, acker: Option<Box<dyn Acker>>) -> Self {
        Self {
            subject: subject.into(),
            payload,
            acker,
        }
    }

    /// Whether this message still awaits an acknowledgment
    pub fn needs_ack(&self) -> bool {
        self.acker.is_some()
    }

    /// Acknowledge the message. Idempotent; a no-op for unacked modes.
    pub async fn ack(&mut self) -> Result<(), BusError> {
        match self.acker.take() {
            Some(acker) => acker.ack().await,
            None => Ok(()),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

impl std::fmt::Debug for BusMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusMessage")
            .field("subject", &self.subject)
            .field("len", &self.payload.len())
            .field("needs_ack", &self.needs_ack())
            .finish()
    }
}

/// Owned handle on a live subject binding
#[derive(Debug)]
pub struct Subscription {
    subject: String,
    rx: mpsc::Receiver<BusMessage>,
}

impl Subscription {
    pub fn new(subject: impl Into<String>, rx: mpsc::Receiver<BusMessage>) -> Self {
        Self {
            subject: subject.into(),
            rx,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Next message, or `None` once the backend has closed the binding.
    pub async fn next(&mut self) -> Option<BusMessage> {
        self.rx.recv().await
    }

    /// Next message if one is already buffered
    pub fn try_next(&mut self) -> Option<BusMessage> {
        self.rx.try_recv().ok()
    }
}

/// Transport backend
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Create the stream, or update it if it already exists.
    async fn ensure_stream(&self, descriptor: &StreamDescriptor) -> Result<StreamOutcome, BusError>;

    /// Publish into whichever stream captures `subject`.
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<PublishReceipt, BusError>;

    async fn subscribe(
        &self,
        subject: &str,
        options: SubscribeOptions,
    ) -> Result<Subscription, BusError>;

    fn is_connected(&self) -> bool;

    /// Flush pending publishes and end every open subscription.
    async fn close(&self) -> Result<(), BusError>;
}
