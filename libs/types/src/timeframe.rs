//! Bar interval normalisation
//!
//! Clients and bus requests name intervals loosely ("15m", "15min",
//! "15minute"); every service normalises them through `Timeframe` before
//! talking to the provider.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::PayloadError;

/// Supported bar timeframes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    /// 1 minute
    M1,
    /// 5 minutes
    M5,
    /// 15 minutes
    M15,
    /// 30 minutes
    M30,
    /// 1 hour
    H1,
    /// 1 day
    D1,
}

impl Timeframe {
    /// Parse a loosely formatted interval.
    pub fn parse(interval: &str) -> Result<Self, PayloadError> {
        match interval.trim().to_ascii_lowercase().as_str() {
            "1m" | "1min" | "1minute" => Ok(Timeframe::M1),
            "5m" | "5min" | "5minute" => Ok(Timeframe::M5),
            "15m" | "15min" | "15minute" => Ok(Timeframe::M15),
            "30m" | "30min" | "30minute" => Ok(Timeframe::M30),
            "1h" | "1hour" | "60min" => Ok(Timeframe::H1),
            "1d" | "1day" | "daily" => Ok(Timeframe::D1),
            _ => Err(PayloadError::UnsupportedInterval(interval.to_string())),
        }
    }

    /// Provider wire code (Alpaca bar timeframe).
    pub fn provider_code(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1Min",
            Timeframe::M5 => "5Min",
            Timeframe::M15 => "15Min",
            Timeframe::M30 => "30Min",
            Timeframe::H1 => "1Hour",
            Timeframe::D1 => "1Day",
        }
    }

    /// Canonical label used in sample `interval` fields.
    pub fn label(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1min",
            Timeframe::M5 => "5min",
            Timeframe::M15 => "15min",
            Timeframe::M30 => "30min",
            Timeframe::H1 => "1hour",
            Timeframe::D1 => "1day",
        }
    }

    /// Duration of one bar.
    pub fn duration(&self) -> Duration {
        match self {
            Timeframe::M1 => Duration::from_secs(60),
            Timeframe::M5 => Duration::from_secs(5 * 60),
            Timeframe::M15 => Duration::from_secs(15 * 60),
            Timeframe::M30 => Duration::from_secs(30 * 60),
            Timeframe::H1 => Duration::from_secs(3600),
            Timeframe::D1 => Duration::from_secs(86400),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases() {
        assert_eq!(Timeframe::parse("1m").unwrap(), Timeframe::M1);
        assert_eq!(Timeframe::parse("15MIN").unwrap(), Timeframe::M15);
        assert_eq!(Timeframe::parse("60min").unwrap(), Timeframe::H1);
        assert_eq!(Timeframe::parse("daily").unwrap(), Timeframe::D1);
    }

    #[test]
    fn test_unsupported_interval() {
        let err = Timeframe::parse("2h").unwrap_err();
        assert_eq!(err, PayloadError::UnsupportedInterval("2h".to_string()));
    }

    #[test]
    fn test_provider_code() {
        assert_eq!(Timeframe::M5.provider_code(), "5Min");
        assert_eq!(Timeframe::D1.provider_code(), "1Day");
        assert_eq!(Timeframe::D1.duration().as_secs(), 86400);
    }
}
