//! Stream subscriptions
//!
//! One durable consumer per stream family. A family whose subscription
//! fails (at start, or later when its dispatch loop ends) is marked failed
//! and re-opened by the retry loop.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use event_bus::subjects::{DAILY_ALL, HISTORICAL_DATA_ALL, LIVE_ALL, RECOMMENDATIONS_ALL, SIGNALS_ALL};
use event_bus::{spawn_dispatch, DispatchSummary, EventBus, SubscribeOptions};

use crate::error::HubError;
use crate::observer::EventObserver;
use crate::stats::HubStats;

/// Durable consumer names are `<prefix>-<family>`
pub const CONSUMER_PREFIX: &str = "event-hub";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFamily {
    pub name: &'static str,
    pub subject: &'static str,
}

impl StreamFamily {
    pub fn consumer(&self) -> String {
        format!("{CONSUMER_PREFIX}-{}", self.name)
    }

    pub fn find(name: &str) -> Option<&'static StreamFamily> {
        STREAM_FAMILIES.iter().find(|f| f.name == name)
    }
}

pub static STREAM_FAMILIES: [StreamFamily; 5] = [
    StreamFamily { name: "live", subject: LIVE_ALL },
    StreamFamily { name: "daily", subject: DAILY_ALL },
    StreamFamily { name: "historical", subject: HISTORICAL_DATA_ALL },
    StreamFamily { name: "signals", subject: SIGNALS_ALL },
    StreamFamily { name: "recommendations", subject: RECOMMENDATIONS_ALL },
];

/// Per-family subscription status, as reported by the health endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamStatus {
    pub subject: String,
    pub active: bool,
    pub failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_retry: Option<DateTime<Utc>>,
}

struct StreamSlot {
    family: &'static StreamFamily,
    handle: Option<JoinHandle<DispatchSummary>>,
    failures: u32,
    last_error: Option<String>,
    last_retry: Option<DateTime<Utc>>,
}

impl StreamSlot {
    fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

pub struct EventHub {
    bus: EventBus,
    stats: Arc<HubStats>,
    observer: Arc<EventObserver>,
    slots: Mutex<BTreeMap<&'static str, StreamSlot>>,
    cancel: CancellationToken,
}

impl EventHub {
    pub fn new(bus: EventBus, stats: Arc<HubStats>, cancel: CancellationToken) -> Self {
        let slots = STREAM_FAMILIES
            .iter()
            .map(|family| {
                (
                    family.name,
                    StreamSlot {
                        family,
                        handle: None,
                        failures: 0,
                        last_error: None,
                        last_retry: None,
                    },
                )
            })
            .collect();
        Self {
            bus,
            observer: Arc::new(EventObserver::new(stats.clone())),
            stats,
            slots: Mutex::new(slots),
            cancel,
        }
    }

    pub fn stats(&self) -> &Arc<HubStats> {
        &self.stats
    }

    pub fn observer(&self) -> &Arc<EventObserver> {
        &self.observer
    }

    /// Subscribe every family. Returns the number that failed; those are
    /// left for the retry loop.
    pub async fn start(&self) -> usize {
        let mut failed = 0;
        for family in &STREAM_FAMILIES {
            if let Err(e) = self.open(family.name).await {
                warn!(family = family.name, error = %e, "Failed to subscribe, will retry");
                failed += 1;
            }
        }
        info!(
            subscribed = STREAM_FAMILIES.len() - failed,
            failed, "Event hub subscriptions started"
        );
        failed
    }

    /// Open the durable subscription for one family.
    pub async fn open(&self, name: &str) -> Result<(), HubError> {
        let family = StreamFamily::find(name).ok_or_else(|| HubError::UnknownFamily(name.to_string()))?;
        if self.lock_slots().get(family.name).is_some_and(StreamSlot::is_active) {
            return Ok(());
        }
        let result = self
            .bus
            .subscribe(family.subject, SubscribeOptions::durable(family.consumer()))
            .await;

        let mut slots = self.lock_slots();
        let Some(slot) = slots.get_mut(family.name) else {
            return Err(HubError::UnknownFamily(name.to_string()));
        };
        match result {
            Ok(subscription) => {
                let handle = spawn_dispatch(subscription, self.observer.clone(), self.cancel.child_token());
                slot.handle = Some(handle);
                slot.last_error = None;
                info!(family = family.name, subject = family.subject, "Subscribed");
                Ok(())
            }
            Err(e) => {
                slot.failures += 1;
                slot.last_error = Some(e.to_string());
                slot.last_retry = Some(Utc::now());
                Err(e.into())
            }
        }
    }

    /// Families without a running dispatch loop
    pub fn failed_families(&self) -> Vec<&'static str> {
        self.lock_slots()
            .values()
            .filter(|slot| !slot.is_active())
            .map(|slot| slot.family.name)
            .collect()
    }

    /// Re-open every failed family. Returns how many reconnected.
    pub async fn retry_failed(&self) -> usize {
        let failed = self.failed_families();
        if failed.is_empty() {
            return 0;
        }

        info!(count = failed.len(), "Attempting to reconnect failed streams");
        let mut reconnected = 0;
        for name in failed {
            match self.open(name).await {
                Ok(()) => {
                    info!(family = name, "Reconnected stream");
                    reconnected += 1;
                }
                Err(e) => warn!(family = name, error = %e, "Failed to reconnect stream"),
            }
        }
        reconnected
    }

    /// Retry failed families every `interval` until cancelled.
    pub async fn run_retry(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.retry_failed().await;
        }
    }

    pub fn stream_status(&self) -> BTreeMap<String, StreamStatus> {
        self.lock_slots()
            .values()
            .map(|slot| {
                (
                    slot.family.name.to_string(),
                    StreamStatus {
                        subject: slot.family.subject.to_string(),
                        active: slot.is_active(),
                        failures: slot.failures,
                        last_error: slot.last_error.clone(),
                        last_retry: slot.last_retry,
                    },
                )
            })
            .collect()
    }

    pub fn is_connected(&self) -> bool {
        self.bus.is_connected()
    }

    /// Stop every dispatch loop and wait for them to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles: Vec<(&'static str, JoinHandle<DispatchSummary>)> = self
            .lock_slots()
            .values_mut()
            .filter_map(|slot| slot.handle.take().map(|h| (slot.family.name, h)))
            .collect();
        for (name, handle) in handles {
            match handle.await {
                Ok(summary) => info!(family = name, handled = summary.handled, "Stream stopped"),
                Err(e) => warn!(family = name, error = %e, "Dispatch task failed"),
            }
        }
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, BTreeMap<&'static str, StreamSlot>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
