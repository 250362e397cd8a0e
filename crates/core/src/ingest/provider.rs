use crate::config::Settings;
use crate::domain::snapshot::{Bar, MarketSnapshot};
use crate::ingest::types::{HistoryResponse, QuoteResponse};
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 3;
const DEFAULT_RETRIES: u32 = 3;
const BACKOFF_BASE_MS: u64 = 250;
const QUOTE_PATH: &str = "/v1/quote";
const HISTORY_PATH: &str = "/v1/history";

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("ticker not found: {0}")]
    NotFound(String),
    #[error("market data request timed out after {0:?}")]
    Timeout(Duration),
    #[error("market data provider failed: {0:#}")]
    Upstream(#[from] anyhow::Error),
}

#[async_trait::async_trait]
pub trait MarketDataProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    /// Longest a single fetch can take including its own retries, if the
    /// provider bounds it. Outer deadlines should not be shorter.
    fn fetch_budget(&self) -> Option<Duration> {
        None
    }

    async fn fetch_snapshot(&self, ticker: &str) -> Result<MarketSnapshot, ProviderError>;

    /// Bars ordered oldest first.
    async fn fetch_history(&self, ticker: &str, period: &str) -> Result<Vec<Bar>, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct HttpJsonMarketData {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
    retries: u32,
}

impl HttpJsonMarketData {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let base_url = settings.require_data_provider_base_url()?.to_string();
        let api_key = settings.data_provider_api_key.clone();

        let timeout_secs = std::env::var("DATA_PROVIDER_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let retries = std::env::var("DATA_PROVIDER_RETRIES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_RETRIES)
            .max(1);

        let timeout = Duration::from_secs(timeout_secs);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build market data http client")?;

        Ok(Self {
            http,
            base_url,
            api_key,
            timeout,
            retries,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn headers(&self) -> anyhow::Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &self.api_key {
            headers.insert("x-api-key", HeaderValue::from_str(api_key)?);
        }
        Ok(headers)
    }

    async fn get_once<T: DeserializeOwned>(
        &self,
        path: &str,
        ticker: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ProviderError> {
        let res = self
            .http
            .get(self.url(path))
            .headers(self.headers()?)
            .query(query)
            .send()
            .await
            .context("market data request failed")?;

        let status = res.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound(ticker.to_string()));
        }

        let text = res
            .text()
            .await
            .context("failed to read market data response")?;
        if !status.is_success() {
            return Err(anyhow::anyhow!("market data HTTP {status}: {text}").into());
        }

        let parsed = serde_json::from_str::<T>(&text)
            .with_context(|| format!("market data response has unexpected shape: {text}"))?;
        Ok(parsed)
    }

    async fn get_with_retries<T: DeserializeOwned>(
        &self,
        path: &str,
        ticker: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ProviderError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.get_once(path, ticker, query).await {
                Ok(v) => return Ok(v),
                Err(err @ ProviderError::NotFound(_)) => return Err(err),
                Err(err) => {
                    if attempt >= self.retries {
                        return Err(err);
                    }
                    let backoff = backoff_after(attempt);
                    tracing::warn!(attempt, %ticker, ?backoff, error = %err, "market data fetch failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

/// Sleep before the retry that follows `attempt` (1-based).
fn backoff_after(attempt: u32) -> Duration {
    Duration::from_millis(BACKOFF_BASE_MS << (attempt - 1).min(16))
}

/// Every attempt timing out, plus the backoff between attempts.
pub fn retry_budget(timeout: Duration, retries: u32) -> Duration {
    let retries = retries.max(1);
    let backoffs: Duration = (1..retries).map(backoff_after).sum();
    timeout * retries + backoffs
}

#[async_trait::async_trait]
impl MarketDataProvider for HttpJsonMarketData {
    fn provider_name(&self) -> &'static str {
        "external_http_json"
    }

    fn fetch_budget(&self) -> Option<Duration> {
        Some(retry_budget(self.timeout, self.retries))
    }

    async fn fetch_snapshot(&self, ticker: &str) -> Result<MarketSnapshot, ProviderError> {
        let quote: QuoteResponse = self
            .get_with_retries(QUOTE_PATH, ticker, &[("ticker", ticker)])
            .await?;
        let snapshot = quote.into_snapshot();
        validate_snapshot(&snapshot, ticker)?;
        Ok(snapshot)
    }

    async fn fetch_history(&self, ticker: &str, period: &str) -> Result<Vec<Bar>, ProviderError> {
        let history: HistoryResponse = self
            .get_with_retries(HISTORY_PATH, ticker, &[("ticker", ticker), ("period", period)])
            .await?;
        if history.bars.is_empty() {
            return Err(ProviderError::NotFound(ticker.to_string()));
        }
        validate_history(&history, ticker)?;
        Ok(history.bars)
    }
}

fn validate_snapshot(snapshot: &MarketSnapshot, expected: &str) -> anyhow::Result<()> {
    anyhow::ensure!(
        snapshot.ticker.eq_ignore_ascii_case(expected),
        "provider ticker mismatch: expected {expected}, got {}",
        snapshot.ticker
    );
    snapshot.validate()
}

fn validate_history(history: &HistoryResponse, expected: &str) -> anyhow::Result<()> {
    anyhow::ensure!(
        history.ticker.eq_ignore_ascii_case(expected),
        "provider ticker mismatch: expected {expected}, got {}",
        history.ticker
    );
    for pair in history.bars.windows(2) {
        anyhow::ensure!(
            pair[0].date < pair[1].date,
            "history for {expected} is not in ascending date order at {}",
            pair[1].date
        );
    }
    for bar in &history.bars {
        anyhow::ensure!(
            bar.close.is_finite() && bar.close > 0.0,
            "non-positive close for {expected} on {}",
            bar.date
        );
    }
    Ok(())
}
