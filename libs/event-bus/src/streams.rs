//! Stream topology
//!
//! The six logical streams are declared once, here, and re-applied
//! idempotently (create-or-update) every time a bus client starts. The
//! running process never deletes a stream.

use std::time::Duration;

use serde::Serialize;

use crate::subjects::subject_matches;

pub const MARKET_LIVE: &str = "MARKET_LIVE";
pub const MARKET_DAILY: &str = "MARKET_DAILY";
pub const MARKET_HISTORICAL: &str = "MARKET_HISTORICAL";
pub const SIGNALS: &str = "SIGNALS";
pub const RECOMMENDATIONS: &str = "RECOMMENDATIONS";
pub const REQUESTS: &str = "REQUESTS";

const HOUR: Duration = Duration::from_secs(3600);
const DAY: Duration = Duration::from_secs(24 * 3600);

/// Durability class of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageClass {
    Memory,
    File,
}

/// What happens to a message once it has been consumed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Kept until age/size limits evict it
    Limits,
    /// Removed once one consumer acknowledges it
    WorkQueue,
}

/// Which messages are evicted when a limit is hit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscardPolicy {
    Old,
    New,
}

/// Declaration of one retained stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamDescriptor {
    pub name: String,
    pub subjects: Vec<String>,
    pub max_age: Duration,
    pub storage: StorageClass,
    pub replicas: usize,
    pub discard: DiscardPolicy,
    pub retention: RetentionPolicy,
}

impl StreamDescriptor {
    fn limits(name: &str, subject: &str, max_age: Duration, storage: StorageClass) -> Self {
        Self {
            name: name.to_string(),
            subjects: vec![subject.to_string()],
            max_age,
            storage,
            replicas: 1,
            discard: DiscardPolicy::Old,
            retention: RetentionPolicy::Limits,
        }
    }

    /// Whether a concrete subject is captured by this stream
    pub fn accepts(&self, subject: &str) -> bool {
        self.subjects.iter().any(|p| subject_matches(p, subject))
    }

    pub fn is_work_queue(&self) -> bool {
        self.retention == RetentionPolicy::WorkQueue
    }
}

/// The fixed stream table.
pub fn stream_table() -> Vec<StreamDescriptor> {
    vec![
        StreamDescriptor::limits(MARKET_LIVE, "live.*", DAY, StorageClass::Memory),
        StreamDescriptor::limits(MARKET_DAILY, "daily.*", 30 * DAY, StorageClass::File),
        StreamDescriptor::limits(
            MARKET_HISTORICAL,
            "historical.data.>",
            30 * DAY,
            StorageClass::File,
        ),
        StreamDescriptor::limits(SIGNALS, "signals.*", 90 * DAY, StorageClass::File),
        StreamDescriptor::limits(
            RECOMMENDATIONS,
            "recommendations.*",
            30 * DAY,
            StorageClass::File,
        ),
        StreamDescriptor {
            retention: RetentionPolicy::WorkQueue,
            ..StreamDescriptor::limits(REQUESTS, "historical.request.>", HOUR, StorageClass::Memory)
        },
    ]
}

/// Find the stream that captures `subject`.
pub fn stream_for_subject<'a>(
    table: &'a [StreamDescriptor],
    subject: &str,
) -> Option<&'a StreamDescriptor> {
    table.iter().find(|d| d.accepts(subject))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_shape() {
        let table = stream_table();
        assert_eq!(table.len(), 6);

        let requests = table.iter().find(|d| d.name == REQUESTS).unwrap();
        assert!(requests.is_work_queue());
        assert_eq!(requests.storage, StorageClass::Memory);
        assert_eq!(requests.max_age, HOUR);

        let signals = table.iter().find(|d| d.name == SIGNALS).unwrap();
        assert_eq!(signals.max_age, 90 * DAY);
        assert!(table.iter().all(|d| d.replicas == 1 && d.discard == DiscardPolicy::Old));
    }

    #[test]
    fn test_subject_routing() {
        let table = stream_table();
        let route = |s: &str| stream_for_subject(&table, s).map(|d| d.name.as_str());

        assert_eq!(route("live.SPY"), Some(MARKET_LIVE));
        assert_eq!(route("daily.AAPL"), Some(MARKET_DAILY));
        assert_eq!(route("historical.data.SPY.1day.30"), Some(MARKET_HISTORICAL));
        assert_eq!(route("historical.request.SPY.1day.30"), Some(REQUESTS));
        assert_eq!(route("signals.MSFT"), Some(SIGNALS));
        assert_eq!(route("recommendations.MSFT"), Some(RECOMMENDATIONS));
        assert_eq!(route("orders.SPY"), None);
        // live.* captures a single token only
        assert_eq!(route("live.SPY.extra"), None);
    }

    #[test]
    fn test_streams_do_not_overlap() {
        let table = stream_table();
        for subject in [
            "live.X",
            "daily.X",
            "historical.data.X.1min.5",
            "historical.request.X.1min.5",
            "signals.X",
            "recommendations.X",
        ] {
            assert_eq!(table.iter().filter(|d| d.accepts(subject)).count(), 1, "{subject}");
        }
    }
}
