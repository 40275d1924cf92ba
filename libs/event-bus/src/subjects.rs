//! Subject templates
//!
//! Simple topics are keyed by ticker (`live.<T>`). Historical requests and
//! their responses share the coordinates ticker, timeframe and day count
//! (`historical.request.<T>.<F>.<D>` / `historical.data.<T>.<F>.<D>`) so a
//! response is addressable without a correlation id.

use types::signal::PayloadKind;

pub const LIVE_ALL: &str = "live.*";
pub const DAILY_ALL: &str = "daily.*";
pub const HISTORICAL_DATA_ALL: &str = "historical.data.>";
pub const HISTORICAL_REQUEST_ALL: &str = "historical.request.>";
pub const SIGNALS_ALL: &str = "signals.*";
pub const RECOMMENDATIONS_ALL: &str = "recommendations.*";

pub fn live(ticker: &str) -> String {
    format!("live.{ticker}")
}

pub fn daily(ticker: &str) -> String {
    format!("daily.{ticker}")
}

pub fn signals(ticker: &str) -> String {
    format!("signals.{ticker}")
}

pub fn recommendations(ticker: &str) -> String {
    format!("recommendations.{ticker}")
}

pub fn historical_request(ticker: &str, timeframe: &str, days: u32) -> String {
    format!("historical.request.{ticker}.{timeframe}.{days}")
}

pub fn historical_data(ticker: &str, timeframe: &str, days: u32) -> String {
    format!("historical.data.{ticker}.{timeframe}.{days}")
}

/// Coordinates embedded in a historical subject
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HistoricalCoordinates {
    pub ticker: String,
    pub timeframe: String,
    pub days: u32,
}

fn parse_historical(subject: &str, kind: &str) -> Option<HistoricalCoordinates> {
    let mut parts = subject.split('.');
    if parts.next()? != "historical" || parts.next()? != kind {
        return None;
    }
    let ticker = parts.next()?;
    let timeframe = parts.next()?;
    let days = parts.next()?.parse().ok()?;
    if parts.next().is_some() || ticker.is_empty() || timeframe.is_empty() {
        return None;
    }
    Some(HistoricalCoordinates {
        ticker: ticker.to_string(),
        timeframe: timeframe.to_string(),
        days,
    })
}

/// Parse `historical.request.<T>.<F>.<D>`.
pub fn parse_historical_request(subject: &str) -> Option<HistoricalCoordinates> {
    parse_historical(subject, "request")
}

/// Parse `historical.data.<T>.<F>.<D>`.
pub fn parse_historical_data(subject: &str) -> Option<HistoricalCoordinates> {
    parse_historical(subject, "data")
}

/// Payload family carried by a concrete subject
pub fn payload_kind(subject: &str) -> Option<PayloadKind> {
    let mut parts = subject.split('.');
    match (parts.next()?, parts.next()?) {
        ("live", _) => Some(PayloadKind::Live),
        ("daily", _) => Some(PayloadKind::Daily),
        ("signals", _) => Some(PayloadKind::Signal),
        ("recommendations", _) => Some(PayloadKind::Recommendation),
        ("historical", "data") => Some(PayloadKind::HistoricalData),
        ("historical", "request") => Some(PayloadKind::HistoricalRequest),
        _ => None,
    }
}

/// Ticker token of a concrete subject
pub fn ticker_of(subject: &str) -> Option<&str> {
    let tokens: Vec<&str> = subject.split('.').collect();
    match tokens.as_slice() {
        ["historical", _, ticker, ..] => Some(*ticker),
        [_, ticker] => Some(*ticker),
        _ => None,
    }
}

/// Canonical subject for a client-facing stream type and ticker.
///
/// Accepts `market`/`live`, `daily`, `signals`/`signal` and
/// `recommendations`/`recommendation`.
pub fn for_type(kind: &str, ticker: &str) -> Option<String> {
    match kind.to_ascii_lowercase().as_str() {
        "market" | "live" => Some(live(ticker)),
        "daily" => Some(daily(ticker)),
        "signals" | "signal" => Some(signals(ticker)),
        "recommendations" | "recommendation" => Some(recommendations(ticker)),
        _ => None,
    }
}

/// Whether `subject` is a well-formed subject or pattern.
pub fn is_valid(subject: &str) -> bool {
    if subject.is_empty() || subject.len() > 256 {
        return false;
    }
    let tokens: Vec<&str> = subject.split('.').collect();
    tokens.iter().enumerate().all(|(i, t)| {
        !t.is_empty()
            && !t.chars().any(|c| c.is_whitespace())
            && (*t == "*" || *t == ">" || !t.contains(['*', '>']))
            && (*t != ">" || i == tokens.len() - 1)
    })
}

/// Match a subject against a pattern with `*` (one token) and `>` (one or
/// more trailing tokens) wildcards.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pat = pattern.split('.');
    let mut sub = subject.split('.');
    loop {
        match (pat.next(), sub.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => continue,
            (Some(p), Some(s)) if p == s => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
