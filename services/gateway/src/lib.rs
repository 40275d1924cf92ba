//! Gateway relay
//!
//! Two surfaces over the same process:
//!
//! - REST endpoints proxied to the strategy engine with retry, a last-good
//!   response cache and a global service mode (`normal`, `degraded`,
//!   `readonly`) surfaced through response headers
//! - a websocket endpoint multiplexing client subject subscriptions onto
//!   shared, reference-counted broker subscriptions

pub mod cache;
pub mod config;
pub mod error;
pub mod handlers;
pub mod mode;
pub mod models;
pub mod proxy;
pub mod relay;
pub mod router;
pub mod rpc;
pub mod state;
pub mod stats;
