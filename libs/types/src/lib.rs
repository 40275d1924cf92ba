//! Types library for the market data bus
//!
//! This library provides the payload definitions exchanged over the event bus
//! and served by the gateway, so every service reads and writes the same
//! shapes.
//!
//! # Modules
//! - `ids`: Unique identifiers (RequestId, ConnectionId)
//! - `sample`: OHLCV market samples and their data-type tags
//! - `timeframe`: Bar interval normalisation
//! - `chunk`: Chunk envelopes for bulk historical responses
//! - `signal`: Signal, recommendation and request payloads
//! - `errors`: Error taxonomy

// Public modules
pub mod ids;
pub mod sample;
pub mod timeframe;
pub mod chunk;
pub mod signal;
pub mod errors;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::ids::*;
    pub use crate::sample::*;
    pub use crate::timeframe::*;
    pub use crate::chunk::*;
    pub use crate::signal::*;
    pub use crate::errors::*;
}
