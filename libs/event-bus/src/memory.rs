//! In-process broker
//!
//! Implements the same stream and subscription semantics as the NATS
//! backend closely enough for tests and for `memory://` single-process
//! deployments: subjects must be captured by a provisioned stream,
//! work-queue streams hand each message to exactly one subscriber, and
//! explicit-ack subscriptions receive acknowledgment handles.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;

use crate::broker::{
    AckMode, Acker, Broker, BusMessage, PublishReceipt, StreamOutcome, SubscribeOptions,
    Subscription, SUBSCRIPTION_BUFFER,
};
use crate::error::BusError;
use crate::streams::StreamDescriptor;
use crate::subjects::subject_matches;

#[derive(Debug, Clone)]
struct StreamRecord {
    descriptor: StreamDescriptor,
    creates: u32,
    updates: u32,
    last_sequence: u64,
}

struct MemorySubscriber {
    pattern: String,
    ack_mode: AckMode,
    tx: mpsc::Sender<BusMessage>,
}

#[derive(Default)]
struct Inner {
    streams: BTreeMap<String, StreamRecord>,
    subscribers: Vec<MemorySubscriber>,
    published: Vec<(String, Bytes)>,
    ensure_failures: BTreeMap<String, u32>,
    subscribe_failures: BTreeMap<String, u32>,
    fail_publishes: bool,
}

struct MemoryAcker {
    acks: Arc<AtomicU64>,
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(self: Box<Self>) -> Result<(), BusError> {
        self.acks.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Broker living entirely in this process
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Mutex<Inner>>,
    acks: Arc<AtomicU64>,
    connected: Arc<AtomicBool>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            acks: Arc::new(AtomicU64::new(0)),
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // a poisoned lock only means a test panicked mid-publish
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make the next `n` provisioning attempts for `stream` fail.
    pub fn fail_next_ensures(&self, stream: &str, n: u32) {
        self.lock().ensure_failures.insert(stream.to_string(), n);
    }

    /// Make the next `n` subscribe attempts on `subject` fail.
    pub fn fail_next_subscribes(&self, subject: &str, n: u32) {
        self.lock().subscribe_failures.insert(subject.to_string(), n);
    }

    pub fn set_fail_publishes(&self, fail: bool) {
        self.lock().fail_publishes = fail;
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    /// (creates, updates) applied to a stream so far
    pub fn stream_applications(&self, stream: &str) -> Option<(u32, u32)> {
        self.lock().streams.get(stream).map(|r| (r.creates, r.updates))
    }

    pub fn stream_descriptor(&self, stream: &str) -> Option<StreamDescriptor> {
        self.lock().streams.get(stream).map(|r| r.descriptor.clone())
    }

    pub fn stream_count(&self) -> usize {
        self.lock().streams.len()
    }

    /// Copy of every message published so far, in order
    pub fn published(&self) -> Vec<(String, Bytes)> {
        self.lock().published.clone()
    }

    /// Messages published on subjects matching `pattern`
    pub fn published_on(&self, pattern: &str) -> Vec<(String, Bytes)> {
        self.lock()
            .published
            .iter()
            .filter(|(s, _)| subject_matches(pattern, s))
            .cloned()
            .collect()
    }

    pub fn ack_count(&self) -> u64 {
        self.acks.load(Ordering::Relaxed)
    }

    /// Number of live subscriptions bound to exactly `subject`
    pub fn active_subscriptions(&self, subject: &str) -> usize {
        self.lock()
            .subscribers
            .iter()
            .filter(|s| s.pattern == subject && !s.tx.is_closed())
            .count()
    }

    /// Total live subscriptions
    pub fn subscription_count(&self) -> usize {
        self.lock().subscribers.iter().filter(|s| !s.tx.is_closed()).count()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn ensure_stream(&self, descriptor: &StreamDescriptor) -> Result<StreamOutcome, BusError> {
        let mut inner = self.lock();

        if let Some(remaining) = inner.ensure_failures.get_mut(&descriptor.name) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(BusError::StreamSetup {
                    stream: descriptor.name.clone(),
                    attempts: 1,
                    message: "injected failure".to_string(),
                });
            }
        }

        match inner.streams.get_mut(&descriptor.name) {
            Some(record) => {
                record.descriptor = descriptor.clone();
                record.updates += 1;
                Ok(StreamOutcome::Updated)
            }
            None => {
                inner.streams.insert(
                    descriptor.name.clone(),
                    StreamRecord {
                        descriptor: descriptor.clone(),
                        creates: 1,
                        updates: 0,
                        last_sequence: 0,
                    },
                );
                Ok(StreamOutcome::Created)
            }
        }
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<PublishReceipt, BusError> {
        if !self.is_connected() {
            return Err(BusError::Publish {
                subject: subject.to_string(),
                message: "not connected".to_string(),
            });
        }

        let (receipt, targets) = {
            let mut inner = self.lock();
            if inner.fail_publishes {
                return Err(BusError::Publish {
                    subject: subject.to_string(),
                    message: "injected failure".to_string(),
                });
            }

            let record = inner
                .streams
                .values_mut()
                .find(|r| r.descriptor.accepts(subject))
                .ok_or_else(|| BusError::NoStream(subject.to_string()))?;
            record.last_sequence += 1;
            let receipt = PublishReceipt {
                stream: record.descriptor.name.clone(),
                sequence: record.last_sequence,
            };
            let work_queue = record.descriptor.is_work_queue();

            inner.subscribers.retain(|s| !s.tx.is_closed());
            let mut targets: Vec<(mpsc::Sender<BusMessage>, AckMode)> = inner
                .subscribers
                .iter()
                .filter(|s| subject_matches(&s.pattern, subject))
                .map(|s| (s.tx.clone(), s.ack_mode))
                .collect();
            if work_queue {
                targets.truncate(1);
            }

            inner.published.push((subject.to_string(), payload.clone()));
            (receipt, targets)
        };

        for (tx, ack_mode) in targets {
            let acker: Option<Box<dyn Acker>> = match ack_mode {
                AckMode::Explicit => Some(Box::new(MemoryAcker {
                    acks: self.acks.clone(),
                })),
                AckMode::None => None,
            };
            // receiver may have gone away between collection and send
            let _ = tx.send(BusMessage::new(subject, payload.clone(), acker)).await;
        }

        debug!(subject, stream = %receipt.stream, seq = receipt.sequence, "Published");
        Ok(receipt)
    }

    async fn subscribe(
        &self,
        subject: &str,
        options: SubscribeOptions,
    ) -> Result<Subscription, BusError> {
        if !self.is_connected() {
            return Err(BusError::Subscribe {
                subject: subject.to_string(),
                message: "not connected".to_string(),
            });
        }

        let mut inner = self.lock();
        if let Some(remaining) = inner.subscribe_failures.get_mut(subject) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(BusError::Subscribe {
                    subject: subject.to_string(),
                    message: "injected failure".to_string(),
                });
            }
        }
        if options.ack_mode == AckMode::Explicit
            && !inner.streams.values().any(|r| {
                r.descriptor
                    .subjects
                    .iter()
                    .any(|p| subject_matches(p, subject) || p == subject)
            })
        {
            return Err(BusError::NoStream(subject.to_string()));
        }

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        inner.subscribers.push(MemorySubscriber {
            pattern: subject.to_string(),
            ack_mode: options.ack_mode,
            tx,
        });
        Ok(Subscription::new(subject, rx))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn close(&self) -> Result<(), BusError> {
        self.set_connected(false);
        // dropping the senders ends every subscription
        self.lock().subscribers.clear();
        Ok(())
    }
}
