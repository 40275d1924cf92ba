//! Request and control-message shapes

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use event_bus::subjects;
use types::ids::Ticker;
use types::signal::validate_days;
use types::timeframe::Timeframe;

use crate::error::AppError;
use crate::rpc::RpcMethod;

pub const DEFAULT_DAYS: i64 = 30;
pub const DEFAULT_INTERVAL: &str = "15min";
pub const DEFAULT_STRATEGY: &str = "RedCandle";
pub const DEFAULT_PROFIT_TARGETS: &[f64] = &[5.0, 10.0, 15.0];

/// Query string of the market endpoints, kept as raw strings so parse
/// failures surface as JSON client errors
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MarketQuery {
    pub ticker: Option<String>,
    pub days: Option<String>,
    pub interval: Option<String>,
    pub strategy: Option<String>,
    pub profit_targets: Option<String>,
    pub risk_reward_ratios: Option<String>,
    pub profit_targets_dollar: Option<String>,
}

/// Validated parameters shared by every engine call
#[derive(Debug, Clone, PartialEq)]
pub struct MarketParams {
    pub ticker: String,
    pub days: u32,
    pub interval: String,
    pub strategy: String,
}

impl MarketParams {
    pub fn from_query(q: &MarketQuery) -> Result<Self, AppError> {
        let ticker = q
            .ticker
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| AppError::BadRequest("ticker parameter is required".to_string()))?;
        let ticker = Ticker::parse(ticker)?.as_str().to_string();

        let days = match q.days.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
            Some(raw) => raw
                .parse::<i64>()
                .map_err(|_| AppError::BadRequest(format!("invalid days parameter: {raw}")))?,
            None => DEFAULT_DAYS,
        };
        let days = validate_days(days)?;

        let interval = q.interval.as_deref().filter(|i| !i.trim().is_empty()).unwrap_or(DEFAULT_INTERVAL);
        let interval = Timeframe::parse(interval)?.label().to_string();

        let strategy = q
            .strategy
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_STRATEGY)
            .to_string();

        Ok(Self {
            ticker,
            days,
            interval,
            strategy,
        })
    }

    pub fn to_json(&self) -> Value {
        json!({
            "ticker": self.ticker,
            "days": self.days,
            "interval": self.interval,
            "strategy": self.strategy,
        })
    }
}

/// Backtest parameters: the shared ones plus target lists
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestParams {
    pub market: MarketParams,
    pub profit_targets: Vec<f64>,
    pub risk_reward_ratios: Vec<f64>,
    pub profit_targets_dollar: Vec<f64>,
}

impl BacktestParams {
    pub fn from_query(q: &MarketQuery) -> Result<Self, AppError> {
        Ok(Self {
            market: MarketParams::from_query(q)?,
            profit_targets: parse_list("profit_targets", q.profit_targets.as_deref())?
                .unwrap_or_else(|| DEFAULT_PROFIT_TARGETS.to_vec()),
            risk_reward_ratios: parse_list("risk_reward_ratios", q.risk_reward_ratios.as_deref())?
                .unwrap_or_default(),
            profit_targets_dollar: parse_list(
                "profit_targets_dollar",
                q.profit_targets_dollar.as_deref(),
            )?
            .unwrap_or_default(),
        })
    }

    pub fn to_json(&self) -> Value {
        let mut body = self.market.to_json();
        body["profit_targets"] = json!(self.profit_targets);
        body["risk_reward_ratios"] = json!(self.risk_reward_ratios);
        body["profit_targets_dollar"] = json!(self.profit_targets_dollar);
        body
    }

    fn lists_key(&self) -> String {
        let join = |v: &[f64]| v.iter().map(|x| x.to_string()).collect::<Vec<_>>().join(",");
        format!(
            "{}|{}|{}",
            join(&self.profit_targets),
            join(&self.risk_reward_ratios),
            join(&self.profit_targets_dollar)
        )
    }
}

/// Comma-separated numbers. `None` when the parameter is absent or blank.
fn parse_list(name: &str, raw: Option<&str>) -> Result<Option<Vec<f64>>, AppError> {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(None);
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| AppError::BadRequest(format!("invalid {name} value: {s}")))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

/// Normalised cache key of a proxied request
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestSignature {
    pub method: RpcMethod,
    pub ticker: String,
    pub days: u32,
    pub interval: String,
    pub strategy: String,
    /// Backtest target lists, empty for other calls
    pub extra: String,
}

impl RequestSignature {
    pub fn new(method: RpcMethod, params: &MarketParams) -> Self {
        Self {
            method,
            ticker: params.ticker.clone(),
            days: params.days,
            interval: params.interval.clone(),
            strategy: params.strategy.clone(),
            extra: String::new(),
        }
    }

    pub fn backtest(params: &BacktestParams) -> Self {
        Self {
            extra: params.lists_key(),
            ..Self::new(RpcMethod::Backtest, &params.market)
        }
    }
}

/// Client control frame: `{action, type?, ticker?, subject?}`
#[derive(Debug, Clone, Deserialize)]
pub struct ControlMessage {
    pub action: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub ticker: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Subscribe,
    Unsubscribe,
}

impl ControlMessage {
    pub fn action(&self) -> Option<ControlAction> {
        match self.action.trim().to_ascii_lowercase().as_str() {
            "subscribe" => Some(ControlAction::Subscribe),
            "unsubscribe" => Some(ControlAction::Unsubscribe),
            _ => None,
        }
    }

    /// Explicit subject if given, otherwise the canonical one for
    /// `type` + `ticker`.
    pub fn subject(&self) -> Option<String> {
        if let Some(subject) = self.subject.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            return subjects::is_valid(subject).then(|| subject.to_string());
        }
        let ticker = Ticker::parse(self.ticker.as_deref()?).ok()?;
        subjects::for_type(self.kind.as_deref()?, ticker.as_str())
    }
}

/// `{event: "subscribed"|"unsubscribed", subject}`
#[derive(Debug, Clone, Serialize)]
pub struct ControlAck<'a> {
    pub event: &'static str,
    pub subject: &'a str,
}

impl<'a> ControlAck<'a> {
    pub fn subscribed(subject: &'a str) -> Self {
        Self {
            event: "subscribed",
            subject,
        }
    }

    pub fn unsubscribed(subject: &'a str) -> Self {
        Self {
            event: "unsubscribed",
            subject,
        }
    }
}
