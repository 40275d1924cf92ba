//! Synthetic placeholder samples
//!
//! Last tier of the fallback chain. Values are a pure function of the
//! ticker symbol: a SHA-256 digest of the symbol seeds a ChaCha RNG, so two
//! processes fabricate identical placeholders for the same ticker.

use chrono::{DateTime, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};

use types::sample::{DataType, MarketSample, SOURCE_SYNTHETIC};

/// Base prices for well-known symbols, in cents
const BASE_PRICES: &[(&str, i64)] = &[
    ("SPY", 42069),
    ("AAPL", 17515),
    ("MSFT", 40265),
    ("GOOGL", 14023),
    ("AMZN", 17590),
];

#[derive(Debug, Clone, Default)]
pub struct SyntheticGenerator;

impl SyntheticGenerator {
    pub fn new() -> Self {
        Self
    }

    fn seed(ticker: &str) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(ticker.as_bytes());
        hasher.finalize().into()
    }

    /// Base price for a ticker
    pub fn base_price(&self, ticker: &str) -> Decimal {
        if let Some((_, cents)) = BASE_PRICES.iter().find(|(t, _)| *t == ticker) {
            return Decimal::new(*cents, 2);
        }
        // 20.00 .. 500.00 derived from the digest
        let mut rng = ChaCha8Rng::from_seed(Self::seed(ticker));
        Decimal::new(rng.gen_range(2_000..50_000), 2)
    }

    /// Placeholder sample stamped at `now`, tagged `generated`
    pub fn generate(&self, ticker: &str, now: DateTime<Utc>) -> MarketSample {
        let base = self.base_price(ticker);
        let mut rng = ChaCha8Rng::from_seed(Self::seed(ticker));
        let volume = 500_000 + rng.gen_range(0..1_000_000);

        MarketSample {
            ticker: ticker.to_string(),
            timestamp: now,
            price: base,
            open: (base * Decimal::new(99, 2)).round_dp(2),
            high: (base * Decimal::new(101, 2)).round_dp(2),
            low: (base * Decimal::new(98, 2)).round_dp(2),
            close: base,
            volume,
            vwap: None,
            trade_count: None,
            interval: "1min".to_string(),
            source: SOURCE_SYNTHETIC.to_string(),
            data_type: DataType::Generated,
        }
    }
}
