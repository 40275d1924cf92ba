//! Bus message observer
//!
//! Decodes every observed message by subject family, updates the stats and
//! follows historical responses chunk by chunk. Observation never fails a
//! message: undecodable payloads are counted as errors and acknowledged.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use event_bus::{subjects, BusMessage, MessageHandler};
use types::chunk::{ChunkAssembler, HistoricalChunk};
use types::errors::ChunkError;
use types::signal::BusPayload;

use crate::stats::{EventKind, HubStats};

/// Upper bound on historical responses followed at once
pub const MAX_PENDING_SERIES: usize = 64;

type SeriesKey = (String, String, u32);

struct PendingSeries {
    assembler: ChunkAssembler,
    started: DateTime<Utc>,
}

pub struct EventObserver {
    stats: Arc<HubStats>,
    pending: Mutex<HashMap<SeriesKey, PendingSeries>>,
}

impl EventObserver {
    pub fn new(stats: Arc<HubStats>) -> Self {
        Self {
            stats,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Record one message received on `subject` at `at`.
    pub fn observe(&self, subject: &str, payload: &[u8], at: DateTime<Utc>) {
        let Some(payload_kind) = subjects::payload_kind(subject) else {
            debug!(subject, "Ignoring message outside the observed families");
            return;
        };
        let Some(event) = EventKind::from_payload(payload_kind) else {
            debug!(subject, "Ignoring message outside the observed families");
            return;
        };

        let decoded = match BusPayload::decode(payload_kind, payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(subject, error = %e, "Undecodable payload");
                self.stats.record_error();
                return;
            }
        };

        self.stats.record_event(event, decoded.ticker(), at);
        match decoded {
            BusPayload::Chunk(chunk) => self.follow_chunk(chunk, at),
            BusPayload::Signal(signal) => {
                info!(ticker = %signal.ticker, signal_type = %signal.signal_type, "Processed signal");
            }
            BusPayload::Recommendation(rec) => {
                info!(
                    ticker = %rec.ticker,
                    option_type = %rec.option_type,
                    strike = %rec.strike,
                    "Processed recommendation"
                );
            }
            BusPayload::Sample(sample) => {
                debug!(ticker = %sample.ticker, data_type = sample.data_type.as_str(), "Processed sample");
            }
            BusPayload::Request(_) => {}
        }
    }

    fn follow_chunk(&self, chunk: HistoricalChunk, at: DateTime<Utc>) {
        let key = chunk.series_key();
        let index = chunk.metadata.chunk;
        let total = chunk.metadata.total_chunks;
        info!(
            ticker = %key.0,
            timeframe = %key.1,
            days = key.2,
            chunk = %format!("{index}/{total}"),
            "Processed historical data"
        );

        let Ok(mut pending) = self.pending.lock() else {
            return;
        };
        // A first chunk starts a new response for these coordinates
        if index == 1 {
            pending.remove(&key);
        }
        if !pending.contains_key(&key) && pending.len() >= MAX_PENDING_SERIES {
            evict_oldest(&mut pending);
        }

        let series = pending.entry(key.clone()).or_insert_with(|| PendingSeries {
            assembler: ChunkAssembler::new(),
            started: at,
        });
        match series.assembler.accept(chunk) {
            Ok(false) => {}
            Ok(true) => {
                let Some(series) = pending.remove(&key) else {
                    return;
                };
                match series.assembler.finish() {
                    Ok(samples) => info!(
                        ticker = %key.0,
                        timeframe = %key.1,
                        days = key.2,
                        chunks = total,
                        samples = samples.len(),
                        "Historical response complete"
                    ),
                    Err(e) => warn!(ticker = %key.0, error = %e, "Historical response unreadable"),
                }
            }
            Err(ChunkError::Duplicate { index }) => {
                debug!(ticker = %key.0, index, "Duplicate chunk ignored");
            }
            Err(e) => {
                warn!(ticker = %key.0, error = %e, "Dropping inconsistent historical response");
                pending.remove(&key);
                self.stats.record_error();
            }
        }
    }

    /// Historical responses with chunks still outstanding
    pub fn pending_series(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or_default()
    }
}

fn evict_oldest(pending: &mut HashMap<SeriesKey, PendingSeries>) {
    let oldest = pending
        .iter()
        .min_by_key(|(_, s)| s.started)
        .map(|(k, _)| k.clone());
    if let Some(key) = oldest {
        warn!(
            ticker = %key.0,
            missing = ?pending.get(&key).map(|s| s.assembler.missing()),
            "Abandoning incomplete historical response"
        );
        pending.remove(&key);
    }
}

#[async_trait]
impl MessageHandler for EventObserver {
    async fn handle(&self, message: &BusMessage) -> anyhow::Result<()> {
        self.observe(&message.subject, &message.payload, Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 14, 0, 0).unwrap()
    }

    fn chunk_body(ticker: &str, index: u32, total: u32) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "data": [],
            "metadata": {
                "ticker": ticker,
                "timeframe": "1day",
                "days": 30,
                "chunk": index,
                "total_chunks": total,
                "data_type": "historical"
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_undecodable_payload_counts_error() {
        let stats = Arc::new(HubStats::new(&[]));
        let observer = EventObserver::new(stats.clone());
        observer.observe("live.SPY", b"not json", now());
        observer.observe("unknown.SPY", b"{}", now());

        let snap = stats.snapshot();
        assert_eq!(snap.error_count, 1);
        assert_eq!(snap.total_events, 0);
    }

    #[test]
    fn test_chunks_are_followed_to_completion() {
        let stats = Arc::new(HubStats::new(&[]));
        let observer = EventObserver::new(stats.clone());
        let subject = "historical.data.SPY.1day.30";

        observer.observe(subject, &chunk_body("SPY", 1, 3), now());
        observer.observe(subject, &chunk_body("SPY", 2, 3), now());
        observer.observe(subject, &chunk_body("SPY", 2, 3), now());
        assert_eq!(observer.pending_series(), 1);

        observer.observe(subject, &chunk_body("SPY", 3, 3), now());
        assert_eq!(observer.pending_series(), 0);

        let snap = stats.snapshot();
        assert_eq!(snap.historical_events, 4);
        assert_eq!(snap.ticker_stats["SPY"].historical_events, 4);
        assert_eq!(snap.error_count, 0);
    }

    #[test]
    fn test_inconsistent_series_is_dropped() {
        let stats = Arc::new(HubStats::new(&[]));
        let observer = EventObserver::new(stats.clone());
        let subject = "historical.data.SPY.1day.30";

        observer.observe(subject, &chunk_body("SPY", 1, 3), now());
        observer.observe(subject, &chunk_body("SPY", 2, 5), now());
        assert_eq!(observer.pending_series(), 0);
        assert_eq!(stats.snapshot().error_count, 1);
    }

    #[test]
    fn test_pending_series_are_bounded() {
        let observer = EventObserver::new(Arc::new(HubStats::new(&[])));
        for i in 0..(MAX_PENDING_SERIES + 5) {
            let ticker = format!("T{i}");
            let subject = format!("historical.data.{ticker}.1day.30");
            observer.observe(&subject, &chunk_body(&ticker, 1, 2), now());
        }
        assert_eq!(observer.pending_series(), MAX_PENDING_SERIES);
    }
}
