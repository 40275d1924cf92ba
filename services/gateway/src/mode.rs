//! Global service mode derived from consecutive RPC failures
//!
//! ```text
//! failures > readonly_after  -> readonly
//! failures > degraded_after  -> degraded
//! any success                -> normal
//! ```
//!
//! The counter is kept per endpoint and the mode is re-evaluated after every
//! attempt from the counter of the endpoint just attempted. Counts between
//! the thresholds leave the mode where it is.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceMode {
    #[default]
    Normal,
    Degraded,
    Readonly,
}

impl ServiceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceMode::Normal => "normal",
            ServiceMode::Degraded => "degraded",
            ServiceMode::Readonly => "readonly",
        }
    }
}

impl fmt::Display for ServiceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Copy of the tracker state handed to the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ModeSnapshot {
    pub mode: ServiceMode,
    pub since: DateTime<Utc>,
    pub transitions: u64,
    pub failures: BTreeMap<String, u32>,
    pub degraded_after: u32,
    pub readonly_after: u32,
}

struct TrackerState {
    mode: ServiceMode,
    since: DateTime<Utc>,
    transitions: u64,
    failures: BTreeMap<String, u32>,
}

pub struct FailureTracker {
    degraded_after: u32,
    readonly_after: u32,
    state: Mutex<TrackerState>,
}

impl FailureTracker {
    pub fn new(degraded_after: u32, readonly_after: u32) -> Self {
        Self {
            degraded_after,
            readonly_after,
            state: Mutex::new(TrackerState {
                mode: ServiceMode::Normal,
                since: Utc::now(),
                transitions: 0,
                failures: BTreeMap::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn mode(&self) -> ServiceMode {
        self.lock().mode
    }

    pub fn record_success(&self, endpoint: &str) -> ServiceMode {
        let mut state = self.lock();
        state.failures.insert(endpoint.to_string(), 0);
        transition(&mut state, ServiceMode::Normal, endpoint, 0);
        state.mode
    }

    pub fn record_failure(&self, endpoint: &str) -> ServiceMode {
        let mut state = self.lock();
        let count = state.failures.entry(endpoint.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        let count = *count;

        if count > self.readonly_after {
            transition(&mut state, ServiceMode::Readonly, endpoint, count);
        } else if count > self.degraded_after && state.mode == ServiceMode::Normal {
            transition(&mut state, ServiceMode::Degraded, endpoint, count);
        }
        state.mode
    }

    pub fn failures(&self, endpoint: &str) -> u32 {
        self.lock().failures.get(endpoint).copied().unwrap_or_default()
    }

    pub fn snapshot(&self) -> ModeSnapshot {
        let state = self.lock();
        ModeSnapshot {
            mode: state.mode,
            since: state.since,
            transitions: state.transitions,
            failures: state.failures.clone(),
            degraded_after: self.degraded_after,
            readonly_after: self.readonly_after,
        }
    }
}

fn transition(state: &mut TrackerState, to: ServiceMode, endpoint: &str, failures: u32) {
    if state.mode == to {
        return;
    }
    let from = state.mode;
    state.mode = to;
    state.since = Utc::now();
    state.transitions += 1;
    match to {
        ServiceMode::Normal => info!(%from, %to, endpoint, "Service mode recovered"),
        _ => warn!(%from, %to, endpoint, failures, "Service mode changed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds_are_exclusive() {
        let t = FailureTracker::new(3, 10);
        for _ in 0..3 {
            assert_eq!(t.record_failure("signals"), ServiceMode::Normal);
        }
        assert_eq!(t.record_failure("signals"), ServiceMode::Degraded);
        for _ in 4..10 {
            assert_eq!(t.record_failure("signals"), ServiceMode::Degraded);
        }
        assert_eq!(t.failures("signals"), 10);
        assert_eq!(t.record_failure("signals"), ServiceMode::Readonly);
    }

    #[test]
    fn test_one_success_restores_normal() {
        let t = FailureTracker::new(3, 10);
        for _ in 0..11 {
            t.record_failure("backtest");
        }
        assert_eq!(t.mode(), ServiceMode::Readonly);
        assert_eq!(t.record_success("backtest"), ServiceMode::Normal);
        assert_eq!(t.failures("backtest"), 0);

        let snap = t.snapshot();
        assert_eq!(snap.transitions, 3);
        assert_eq!(snap.failures["backtest"], 0);
    }

    #[test]
    fn test_readonly_is_not_demoted_by_lower_counts() {
        let t = FailureTracker::new(3, 10);
        for _ in 0..11 {
            t.record_failure("signals");
        }
        // a different endpoint crossing only the lower threshold
        for _ in 0..5 {
            t.record_failure("historical");
        }
        assert_eq!(t.mode(), ServiceMode::Readonly);
    }

    #[test]
    fn test_mode_serializes_lowercase() {
        let json = serde_json::to_string(&ServiceMode::Readonly).unwrap();
        assert_eq!(json, "\"readonly\"");
    }
}
