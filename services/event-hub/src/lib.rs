//! Event Hub
//!
//! Observes every stream on the durable bus and keeps aggregate counters:
//! - one durable consumer per family (`live`, `daily`, `historical`,
//!   `signals`, `recommendations`), re-opened when it fails
//! - totals and per-ticker counters with the time of the last event
//! - a periodic log report and a `/health` endpoint
//!
//! ```text
//!   Event Bus ──► dispatch (per family) ──► EventObserver ──► HubStats
//!                                                                │
//!                                        /health, report  ◄──────┘
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod hub;
pub mod observer;
pub mod report;
pub mod stats;

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
