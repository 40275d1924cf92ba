//! Event bus
//!
//! Client library for the durable market-data bus:
//! - `streams`: the fixed stream topology and its create-or-update provisioning
//! - `subjects`: subject templates and wildcard matching
//! - `broker`: transport seam, with `nats` (JetStream) and `memory` backends
//! - `client`: typed publish/subscribe façade (`EventBus`)
//! - `dispatch`: per-subscription handler loop with ack semantics and de-duplication
//!
//! ```text
//!  publisher ──► EventBus ──► Broker ──► stream (retained)
//!                                 │
//!                           Subscription (mpsc)
//!                                 │
//!                          dispatch loop ──► MessageHandler
//! ```

pub mod broker;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod memory;
pub mod nats;
pub mod streams;
pub mod subjects;

pub use broker::{AckMode, Broker, BusMessage, PublishReceipt, StreamOutcome, SubscribeOptions, Subscription};
pub use client::EventBus;
pub use config::BusConfig;
pub use dispatch::{spawn_dispatch, Deduplicator, DispatchSummary, FnHandler, MessageHandler};
pub use error::BusError;
pub use memory::MemoryBroker;
