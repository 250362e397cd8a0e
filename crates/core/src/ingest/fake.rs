use crate::domain::snapshot::{Bar, MarketSnapshot};
use crate::ingest::provider::{MarketDataProvider, ProviderError};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// In-process provider serving fixed snapshots and histories. Used when no
/// data provider is configured, for dry runs, and in tests.
#[derive(Debug, Default)]
pub struct StaticMarketData {
    snapshots: HashMap<String, MarketSnapshot>,
    histories: HashMap<String, Vec<Bar>>,
    failing: HashSet<String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl StaticMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(mut self, snapshot: MarketSnapshot) -> Self {
        self.snapshots.insert(snapshot.ticker.clone(), snapshot);
        self
    }

    pub fn with_history(mut self, ticker: &str, bars: Vec<Bar>) -> Self {
        self.histories.insert(ticker.to_string(), bars);
        self
    }

    /// Every fetch for `ticker` fails as an upstream error.
    pub fn with_failure(mut self, ticker: &str) -> Self {
        self.failing.insert(ticker.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of fetches served so far, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn enter(&self, ticker: &str) -> Result<(), ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.contains(ticker) {
            return Err(anyhow::anyhow!("upstream unavailable for {ticker}").into());
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl MarketDataProvider for StaticMarketData {
    fn provider_name(&self) -> &'static str {
        "static"
    }

    async fn fetch_snapshot(&self, ticker: &str) -> Result<MarketSnapshot, ProviderError> {
        self.enter(ticker).await?;
        if let Some(snap) = self.snapshots.get(ticker) {
            return Ok(snap.clone());
        }
        // Quote from the last bar of a known history.
        match self.histories.get(ticker).and_then(|bars| bars.last()) {
            Some(bar) => Ok(MarketSnapshot::new(ticker, bar.close)),
            None => Err(ProviderError::NotFound(ticker.to_string())),
        }
    }

    async fn fetch_history(&self, ticker: &str, _period: &str) -> Result<Vec<Bar>, ProviderError> {
        self.enter(ticker).await?;
        self.histories
            .get(ticker)
            .filter(|bars| !bars.is_empty())
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(ticker.to_string()))
    }
}
