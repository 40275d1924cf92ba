//! Per-subscription dispatch loop
//!
//! Decouples "message arrived" from "handler ran": each subscription is
//! drained by one loop that invokes the handler, acknowledges on success
//! and leaves the message unacknowledged on error or panic so the broker
//! redelivers it. Handler failures never reach the bus client.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::broker::{BusMessage, Subscription};

/// Consumer of inbound bus messages
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// `Ok` acknowledges the message, `Err` leaves it for redelivery.
    async fn handle(&self, message: &BusMessage) -> anyhow::Result<()>;
}

/// Adapter turning an async closure over `(subject, payload)` into a handler
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(String, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, message: &BusMessage) -> anyhow::Result<()> {
        (self.0)(message.subject.clone(), message.payload.clone()).await
    }
}

/// Outcome counts of one dispatch loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub handled: u64,
    pub failed: u64,
    pub panicked: u64,
}

/// Drain `subscription` until it closes or `cancel` fires.
pub async fn run_dispatch<H>(
    mut subscription: Subscription,
    handler: Arc<H>,
    cancel: CancellationToken,
) -> DispatchSummary
where
    H: MessageHandler + ?Sized,
{
    let mut summary = DispatchSummary::default();
    let subject = subscription.subject().to_string();

    loop {
        let mut message = tokio::select! {
            _ = cancel.cancelled() => break,
            next = subscription.next() => match next {
                Some(m) => m,
                None => break,
            },
        };

        let outcome = AssertUnwindSafe(handler.handle(&message)).catch_unwind().await;
        match outcome {
            Ok(Ok(())) => {
                summary.handled += 1;
                if let Err(e) = message.ack().await {
                    warn!(subject = %message.subject, error = %e, "Ack failed");
                }
            }
            Ok(Err(e)) => {
                summary.failed += 1;
                warn!(subject = %message.subject, error = %e, "Handler failed, leaving unacked");
            }
            Err(_) => {
                summary.panicked += 1;
                error!(subject = %message.subject, "Handler panicked, leaving unacked");
            }
        }
    }

    debug!(subject = %subject, ?summary, "Dispatch loop finished");
    summary
}

pub fn spawn_dispatch<H>(
    subscription: Subscription,
    handler: Arc<H>,
    cancel: CancellationToken,
) -> JoinHandle<DispatchSummary>
where
    H: MessageHandler + ?Sized,
{
    tokio::spawn(run_dispatch(subscription, handler, cancel))
}

/// Bounded window of recently seen keys, used to make redelivered
/// messages idempotent.
#[derive(Debug)]
pub struct Deduplicator {
    window: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl Deduplicator {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            order: VecDeque::with_capacity(window.max(1)),
            seen: HashSet::with_capacity(window.max(1)),
        }
    }

    /// Record `(subject, stamp)`. Returns `false` if it was already seen.
    pub fn first_seen(&mut self, subject: &str, stamp: &str) -> bool {
        let key = format!("{subject}|{stamp}");
        if self.seen.contains(&key) {
            return false;
        }
        if self.order.len() >= self.window {
            if let Some(old) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
        self.seen.insert(key.clone());
        self.order.push_back(key);
        true
    }

    /// Forget a key, e.g. after processing failed and a retry should run.
    pub fn forget(&mut self, subject: &str, stamp: &str) {
        let key = format!("{subject}|{stamp}");
        if self.seen.remove(&key) {
            self.order.retain(|k| k != &key);
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_window_evicts_oldest() {
        let mut d = Deduplicator::new(2);
        assert!(d.first_seen("live.SPY", "1"));
        assert!(!d.first_seen("live.SPY", "1"));
        assert!(d.first_seen("live.SPY", "2"));
        assert!(d.first_seen("live.SPY", "3"));
        assert_eq!(d.len(), 2);
        // "1" fell out of the window
        assert!(d.first_seen("live.SPY", "1"));
    }

    #[test]
    fn test_dedup_keys_by_subject() {
        let mut d = Deduplicator::new(8);
        assert!(d.first_seen("live.SPY", "1"));
        assert!(d.first_seen("live.QQQ", "1"));
        d.forget("live.SPY", "1");
        assert!(d.first_seen("live.SPY", "1"));
    }
}
