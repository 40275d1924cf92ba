//! Error types for the event hub

use event_bus::BusError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown stream family: {0}")]
    UnknownFamily(String),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
}
