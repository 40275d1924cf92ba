//! Market Data Service
//!
//! Polls an upstream provider for every watched ticker and publishes onto
//! the durable bus:
//! - `live.<T>`: a sample per polling tick, `live` while the market is open
//!   and `recent` while it is closed
//! - `daily.<T>`: one end-of-day summary per ticker at the local close time
//! - `historical.data.<T>.<F>.<D>`: chunked answers to historical requests
//!
//! # Architecture
//!
//! ```text
//!   Provider (Alpaca REST)
//!        │
//!   ┌────▼─────┐      fallback tiers:
//!   │ Resolver │  ←   quote → minute bar → daily bar → cache → synthetic
//!   └────┬─────┘
//!        │
//!   ┌────┴───────────┬─────────────────┐
//!   │                │                 │
//! ┌─▼────────┐  ┌────▼──────┐   ┌──────▼─────┐
//! │ Ticker   │  │ Daily     │   │ Historical │ ◄── historical.request.>
//! │ tasks    │  │ timer     │   │ service    │
//! └─┬────────┘  └────┬──────┘   └──────┬─────┘
//!   │                │                 │
//! ┌─▼────────────────▼─────────────────▼──┐
//! │            Event Bus                  │
//! └───────────────────────────────────────┘
//! ```

pub mod alpaca;
pub mod api;
pub mod config;
pub mod error;
pub mod fallback;
pub mod historical;
pub mod metrics;
pub mod provider;
pub mod scheduler;
pub mod status;
pub mod synthetic;

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
