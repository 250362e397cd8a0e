use crate::domain::snapshot::{Bar, MarketSnapshot};
use crate::ingest::provider::{MarketDataProvider, ProviderError};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 5;
const DEFAULT_CACHE_TTL_SECS: u64 = 180;

type HistoryKey = (String, String);

/// Wraps a provider with a per-fetch deadline and short-lived memoization,
/// so a dashboard redraw does not refetch the same ticker.
pub struct CachedMarketData {
    inner: Arc<dyn MarketDataProvider>,
    fetch_timeout: Duration,
    ttl: Duration,
    snapshots: Mutex<HashMap<String, (Instant, MarketSnapshot)>>,
    histories: Mutex<HashMap<HistoryKey, (Instant, Vec<Bar>)>>,
}

impl CachedMarketData {
    pub fn new(inner: Arc<dyn MarketDataProvider>, fetch_timeout: Duration, ttl: Duration) -> Self {
        Self {
            inner,
            fetch_timeout,
            ttl,
            snapshots: Mutex::new(HashMap::new()),
            histories: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_env(inner: Arc<dyn MarketDataProvider>) -> Self {
        let configured = std::env::var("FETCH_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs);
        let budget = inner.fetch_budget();
        if let (Some(deadline), Some(budget)) = (configured, budget) {
            if deadline < budget {
                tracing::warn!(
                    ?deadline,
                    ?budget,
                    provider = inner.provider_name(),
                    "FETCH_TIMEOUT_SECS is shorter than the provider retry budget; slow retries will be cut off"
                );
            }
        }
        let fetch_timeout = fetch_deadline(configured, budget);
        let ttl = std::env::var("SNAPSHOT_CACHE_TTL_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_CACHE_TTL_SECS);
        Self::new(inner, fetch_timeout, Duration::from_secs(ttl))
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, ProviderError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        match tokio::time::timeout(self.fetch_timeout, fut).await {
            Ok(res) => res,
            Err(_) => Err(ProviderError::Timeout(self.fetch_timeout)),
        }
    }

    fn fresh(&self, fetched_at: Instant) -> bool {
        fetched_at.elapsed() < self.ttl
    }

    pub async fn clear(&self) {
        self.snapshots.lock().await.clear();
        self.histories.lock().await.clear();
    }
}

/// An explicit deadline wins. Otherwise the provider's own retry budget,
/// so the outer timeout never cancels a retry loop that would still finish.
fn fetch_deadline(configured: Option<Duration>, budget: Option<Duration>) -> Duration {
    configured
        .or(budget)
        .unwrap_or(Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS))
}

#[async_trait::async_trait]
impl MarketDataProvider for CachedMarketData {
    fn provider_name(&self) -> &'static str {
        self.inner.provider_name()
    }

    fn fetch_budget(&self) -> Option<Duration> {
        Some(self.fetch_timeout)
    }

    async fn fetch_snapshot(&self, ticker: &str) -> Result<MarketSnapshot, ProviderError> {
        {
            let cache = self.snapshots.lock().await;
            if let Some((at, snap)) = cache.get(ticker) {
                if self.fresh(*at) {
                    return Ok(snap.clone());
                }
            }
        }

        let snap = self.bounded(self.inner.fetch_snapshot(ticker)).await?;
        self.snapshots
            .lock()
            .await
            .insert(ticker.to_string(), (Instant::now(), snap.clone()));
        Ok(snap)
    }

    async fn fetch_history(&self, ticker: &str, period: &str) -> Result<Vec<Bar>, ProviderError> {
        let key = (ticker.to_string(), period.to_string());
        {
            let cache = self.histories.lock().await;
            if let Some((at, bars)) = cache.get(&key) {
                if self.fresh(*at) {
                    return Ok(bars.clone());
                }
            }
        }

        let bars = self.bounded(self.inner.fetch_history(ticker, period)).await?;
        self.histories
            .lock()
            .await
            .insert(key, (Instant::now(), bars.clone()));
        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::fake::StaticMarketData;

    fn provider() -> Arc<StaticMarketData> {
        Arc::new(StaticMarketData::new().with_snapshot(MarketSnapshot::new("TCS.NS", 3500.0)))
    }

    #[tokio::test]
    async fn serves_repeat_fetches_from_cache() {
        let inner = provider();
        let cached = CachedMarketData::new(inner.clone(), Duration::from_secs(5), Duration::from_secs(60));

        let a = cached.fetch_snapshot("TCS.NS").await.unwrap();
        let b = cached.fetch_snapshot("TCS.NS").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(inner.calls(), 1);

        cached.clear().await;
        cached.fetch_snapshot("TCS.NS").await.unwrap();
        assert_eq!(inner.calls(), 2);
    }

    #[tokio::test]
    async fn zero_ttl_always_refetches() {
        let inner = provider();
        let cached = CachedMarketData::new(inner.clone(), Duration::from_secs(5), Duration::ZERO);
        cached.fetch_snapshot("TCS.NS").await.unwrap();
        cached.fetch_snapshot("TCS.NS").await.unwrap();
        assert_eq!(inner.calls(), 2);
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let inner = provider();
        let cached = CachedMarketData::new(inner.clone(), Duration::from_secs(5), Duration::from_secs(60));
        assert!(matches!(
            cached.fetch_snapshot("NOPE.NS").await,
            Err(ProviderError::NotFound(_))
        ));
        assert!(cached.fetch_snapshot("NOPE.NS").await.is_err());
        assert_eq!(inner.calls(), 2);
    }

    #[test]
    fn deadline_defaults_to_provider_retry_budget() {
        let budget = crate::ingest::provider::retry_budget(Duration::from_secs(3), 3);
        assert_eq!(fetch_deadline(None, Some(budget)), budget);
        assert!(fetch_deadline(None, Some(budget)) > Duration::from_secs(3));
        assert_eq!(
            fetch_deadline(Some(Duration::from_secs(2)), Some(budget)),
            Duration::from_secs(2)
        );
        assert_eq!(
            fetch_deadline(None, None),
            Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS)
        );
    }

    #[tokio::test]
    async fn slow_fetch_times_out() {
        let inner = Arc::new(
            StaticMarketData::new()
                .with_snapshot(MarketSnapshot::new("SLOW.NS", 10.0))
                .with_delay(Duration::from_secs(5)),
        );
        let cached = CachedMarketData::new(inner, Duration::from_millis(20), Duration::from_secs(60));
        let err = cached.fetch_snapshot("SLOW.NS").await.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(_)));
    }
}
