use crate::domain::snapshot::{Bar, MarketSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `GET /v1/quote?ticker=` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteResponse {
    pub ticker: String,
    #[serde(default)]
    pub name: Option<String>,
    pub price: f64,
    #[serde(default)]
    pub indicators: BTreeMap<String, f64>,
}

impl QuoteResponse {
    pub fn into_snapshot(self) -> MarketSnapshot {
        MarketSnapshot {
            ticker: self.ticker,
            name: self.name,
            price: self.price,
            indicators: self.indicators,
            sample_count: 0,
        }
    }
}

/// `GET /v1/history?ticker=&period=` response body, oldest bar first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub ticker: String,
    pub bars: Vec<Bar>,
}
