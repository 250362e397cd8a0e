use anyhow::ensure;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod keys {
    pub const RETURN_ON_EQUITY: &str = "returnOnEquity";
    pub const GROSS_MARGINS: &str = "grossMargins";
    pub const DIVIDEND_YIELD: &str = "dividendYield";
    pub const INSTITUTIONAL_HOLDING_PCT: &str = "institutionalHoldingPct";
    pub const BETA: &str = "beta";
    pub const TRAILING_PE: &str = "trailingPE";

    pub const RSI: &str = "rsi";
    pub const MACD: &str = "macd";
    pub const MACD_SIGNAL: &str = "macdSignal";
    pub const PREV_MACD: &str = "prevMacd";
    pub const PREV_MACD_SIGNAL: &str = "prevMacdSignal";
    pub const SMA_50: &str = "sma50";
    pub const SMA_200: &str = "sma200";
    pub const EMA_20: &str = "ema20";
}

/// Market values for one ticker at one point in time.
///
/// Indicators are optional; a missing key never fails scoring, it just
/// cannot trigger a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub ticker: String,
    #[serde(default)]
    pub name: Option<String>,
    pub price: f64,
    #[serde(default)]
    pub indicators: BTreeMap<String, f64>,
    /// Number of history samples the indicators were derived from (0 for quote snapshots).
    #[serde(default)]
    pub sample_count: usize,
}

impl MarketSnapshot {
    pub fn new(ticker: impl Into<String>, price: f64) -> Self {
        Self {
            ticker: ticker.into(),
            name: None,
            price,
            indicators: BTreeMap::new(),
            sample_count: 0,
        }
    }

    pub fn with_indicator(mut self, key: &str, value: f64) -> Self {
        self.indicators.insert(key.to_string(), value);
        self
    }

    pub fn with_sample_count(mut self, n: usize) -> Self {
        self.sample_count = n;
        self
    }

    pub fn indicator(&self, key: &str) -> Option<f64> {
        self.indicators.get(key).copied()
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.ticker)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(!self.ticker.trim().is_empty(), "ticker must be non-empty");
        ensure!(
            self.price.is_finite() && self.price > 0.0,
            "price must be positive (got {} for {})",
            self.price,
            self.ticker
        );
        for (key, value) in &self.indicators {
            ensure!(
                value.is_finite(),
                "indicator {key} must be finite for {} (got {value})",
                self.ticker
            );
        }
        Ok(())
    }
}

/// One OHLCV sample of a price history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_indicators_deserialize_as_empty() {
        let v = json!({"ticker": "TCS.NS", "price": 3500.5});
        let snap: MarketSnapshot = serde_json::from_value(v).unwrap();
        assert!(snap.indicators.is_empty());
        assert_eq!(snap.indicator(keys::BETA), None);
        assert_eq!(snap.display_name(), "TCS.NS");
        snap.validate().unwrap();
    }

    #[test]
    fn rejects_non_positive_price() {
        assert!(MarketSnapshot::new("X", 0.0).validate().is_err());
        assert!(MarketSnapshot::new("X", -1.0).validate().is_err());
        assert!(MarketSnapshot::new("X", f64::NAN).validate().is_err());
    }

    #[test]
    fn rejects_non_finite_indicator() {
        let snap = MarketSnapshot::new("X", 10.0).with_indicator(keys::RSI, f64::INFINITY);
        assert!(snap.validate().is_err());
    }
}
