//! Counters for the market data service
//!
//! Tracks publishes per stream, historical request handling, fallback tier
//! usage and resolution latency. Exported as a flat map for the health
//! endpoint and the periodic report.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::fallback::Tier;

pub struct ServiceMetrics {
    // Publishes
    pub live_published: AtomicU64,
    pub recent_published: AtomicU64,
    pub daily_published: AtomicU64,
    pub publish_failures: AtomicU64,
    pub daily_failures: AtomicU64,

    // Historical
    pub historical_requests: AtomicU64,
    pub historical_duplicates: AtomicU64,
    pub historical_failures: AtomicU64,
    pub chunks_published: AtomicU64,

    // Fallback tiers, indexed by `Tier::ALL` order
    tier_usage: [AtomicU64; 5],
    pub resolve_latency_ms: Mutex<LatencyTracker>,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            live_published: AtomicU64::new(0),
            recent_published: AtomicU64::new(0),
            daily_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            daily_failures: AtomicU64::new(0),
            historical_requests: AtomicU64::new(0),
            historical_duplicates: AtomicU64::new(0),
            historical_failures: AtomicU64::new(0),
            chunks_published: AtomicU64::new(0),
            tier_usage: Default::default(),
            resolve_latency_ms: Mutex::new(LatencyTracker::new(500)),
        }
    }

    fn tier_index(tier: Tier) -> usize {
        Tier::ALL.iter().position(|t| *t == tier).unwrap_or_default()
    }

    /// Record which tier answered a resolution and how long it took.
    pub fn record_resolution(&self, tier: Tier, latency_ms: u64) {
        self.tier_usage[Self::tier_index(tier)].fetch_add(1, Ordering::Relaxed);
        if let Ok(mut tracker) = self.resolve_latency_ms.lock() {
            tracker.record(latency_ms);
        }
    }

    pub fn tier_count(&self, tier: Tier) -> u64 {
        self.tier_usage[Self::tier_index(tier)].load(Ordering::Relaxed)
    }

    pub fn record_live(&self) {
        self.live_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_recent(&self) {
        self.recent_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_daily(&self) {
        self.daily_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_daily_failure(&self) {
        self.daily_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_historical_request(&self) {
        self.historical_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_historical_duplicate(&self) {
        self.historical_duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_historical_failure(&self) {
        self.historical_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_chunk(&self) {
        self.chunks_published.fetch_add(1, Ordering::Relaxed);
    }

    /// Stream counters
    pub fn export(&self) -> BTreeMap<String, u64> {
        let mut m = BTreeMap::new();
        m.insert("live_events".to_string(), self.live_published.load(Ordering::Relaxed));
        m.insert("recent_events".to_string(), self.recent_published.load(Ordering::Relaxed));
        m.insert("daily_events".to_string(), self.daily_published.load(Ordering::Relaxed));
        m.insert("publish_failures".to_string(), self.publish_failures.load(Ordering::Relaxed));
        m.insert("daily_failures".to_string(), self.daily_failures.load(Ordering::Relaxed));
        m.insert("historical_requests".to_string(), self.historical_requests.load(Ordering::Relaxed));
        m.insert("historical_duplicates".to_string(), self.historical_duplicates.load(Ordering::Relaxed));
        m.insert("historical_failures".to_string(), self.historical_failures.load(Ordering::Relaxed));
        m.insert("chunks_published".to_string(), self.chunks_published.load(Ordering::Relaxed));
        if let Ok(tracker) = self.resolve_latency_ms.lock() {
            if let Some(p99) = tracker.percentile(99) {
                m.insert("resolve_p99_ms".to_string(), p99);
            }
        }
        m
    }

    /// Fallback tier counters
    pub fn export_tiers(&self) -> BTreeMap<String, u64> {
        Tier::ALL
            .iter()
            .map(|t| (t.as_str().to_string(), self.tier_count(*t)))
            .collect()
    }

    /// Check alert thresholds.
    pub fn check_thresholds(&self, thresholds: &AlertThresholds) -> Vec<Alert> {
        let mut alerts = Vec::new();

        let failures = self.publish_failures.load(Ordering::Relaxed);
        if failures > thresholds.max_publish_failures {
            alerts.push(Alert {
                level: AlertLevel::Critical,
                metric: "publish_failures".to_string(),
                message: format!(
                    "Publish failures: {} > threshold {}",
                    failures, thresholds.max_publish_failures
                ),
            });
        }

        let synthetic = self.tier_count(Tier::Synthetic);
        if synthetic > thresholds.max_synthetic_samples {
            alerts.push(Alert {
                level: AlertLevel::Warning,
                metric: "synthetic_samples".to_string(),
                message: format!(
                    "Synthetic samples: {} > threshold {}",
                    synthetic, thresholds.max_synthetic_samples
                ),
            });
        }

        if let Ok(tracker) = self.resolve_latency_ms.lock() {
            if let Some(p99) = tracker.percentile(99) {
                if p99 > thresholds.max_resolve_p99_ms {
                    alerts.push(Alert {
                        level: AlertLevel::Warning,
                        metric: "resolve_p99".to_string(),
                        message: format!(
                            "Resolution p99: {}ms > threshold {}ms",
                            p99, thresholds.max_resolve_p99_ms
                        ),
                    });
                }
            }
        }

        alerts
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Sliding window of latency samples for percentile calculation.
pub struct LatencyTracker {
    samples: VecDeque<u64>,
    max_samples: usize,
}

impl LatencyTracker {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples,
        }
    }

    pub fn record(&mut self, value: u64) {
        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    /// Get a percentile value (0-100).
    pub fn percentile(&self, p: usize) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (p as f64 / 100.0 * (sorted.len() - 1) as f64) as usize;
        Some(sorted[idx.min(sorted.len() - 1)])
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertLevel {
    Warning,
    Critical,
}

#[derive(Debug, Clone)]
pub struct Alert {
    pub level: AlertLevel,
    pub metric: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct AlertThresholds {
    pub max_publish_failures: u64,
    pub max_synthetic_samples: u64,
    pub max_resolve_p99_ms: u64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            max_publish_failures: 10,
            max_synthetic_samples: 0,
            max_resolve_p99_ms: 5_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_counters() {
        let metrics = ServiceMetrics::new();
        metrics.record_resolution(Tier::MinuteBar, 12);
        metrics.record_resolution(Tier::MinuteBar, 15);
        metrics.record_resolution(Tier::Cached, 3);

        let tiers = metrics.export_tiers();
        assert_eq!(tiers["minute_bar"], 2);
        assert_eq!(tiers["cached"], 1);
        assert_eq!(tiers["synthetic"], 0);
    }

    #[test]
    fn test_export() {
        let metrics = ServiceMetrics::new();
        metrics.record_live();
        metrics.record_chunk();
        metrics.record_chunk();

        let exported = metrics.export();
        assert_eq!(exported["live_events"], 1);
        assert_eq!(exported["chunks_published"], 2);
        assert!(!exported.contains_key("resolve_p99_ms"));
    }

    #[test]
    fn test_synthetic_alert() {
        let metrics = ServiceMetrics::new();
        assert!(metrics.check_thresholds(&AlertThresholds::default()).is_empty());

        metrics.record_resolution(Tier::Synthetic, 1);
        let alerts = metrics.check_thresholds(&AlertThresholds::default());
        assert!(alerts.iter().any(|a| a.metric == "synthetic_samples"));
    }

    #[test]
    fn test_latency_window_eviction() {
        let mut tracker = LatencyTracker::new(3);
        for v in [10, 20, 30, 40] {
            tracker.record(v);
        }
        assert_eq!(tracker.count(), 3);
        assert_eq!(tracker.percentile(0), Some(20));
        assert_eq!(tracker.percentile(100), Some(40));
    }
}
