//! The paper-trading desk: scoring, trading and watchlists for one user at a
//! time, on top of a market-data provider and an account store.
//!
//! Trades fetch their price before taking the account lock, then run
//! load, ledger operation and save inside it. A failed save surfaces as an
//! error and leaves the stored account untouched.

use crate::domain::score::{ScoreResult, StrategyKind};
use crate::domain::scan::rank_results;
use crate::entitlement::EntitlementGate;
use crate::ingest::provider::{MarketDataProvider, ProviderError};
use crate::ingest::ticker::normalize_ticker;
use crate::ledger::{price_from_f64, Account, LedgerError, PortfolioReport, Side, TradeReceipt};
use crate::scoring;
use crate::scoring::indicators::technical_snapshot;
use crate::storage::lock::AccountLocks;
use crate::storage::{AccountStore, StoreError};
use anyhow::Context;
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

const DEFAULT_STARTING_BALANCE: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);
const DEFAULT_TICKER_SUFFIX: &str = ".NS";
const DEFAULT_HISTORY_PERIOD: &str = "1y";
const DEFAULT_STARTING_WATCHLIST: &[&str] = &["RELIANCE.NS", "TCS.NS"];
const SCAN_CONCURRENCY: usize = 8;

/// Who is asking. Every account-scoped operation carries one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub user_id: String,
}

impl RequestContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeskOptions {
    /// Cash a brand-new account opens with.
    pub starting_balance: Decimal,
    /// Exchange suffix appended to bare symbols, e.g. `.NS`.
    pub ticker_suffix: Option<String>,
    /// History window requested for technical strategies.
    pub history_period: String,
    /// Tickers placed on the watchlist when an account is opened.
    pub starting_watchlist: Vec<String>,
}

impl Default for DeskOptions {
    fn default() -> Self {
        Self {
            starting_balance: DEFAULT_STARTING_BALANCE,
            ticker_suffix: Some(DEFAULT_TICKER_SUFFIX.to_string()),
            history_period: DEFAULT_HISTORY_PERIOD.to_string(),
            starting_watchlist: DEFAULT_STARTING_WATCHLIST.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl DeskOptions {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut out = Self::default();

        if let Ok(s) = std::env::var("STARTING_BALANCE") {
            let balance = Decimal::from_str(s.trim())
                .with_context(|| format!("STARTING_BALANCE is not a number: {s:?}"))?;
            anyhow::ensure!(
                balance >= Decimal::ZERO,
                "STARTING_BALANCE must be non-negative (got {balance})"
            );
            out.starting_balance = balance;
        }

        if let Ok(s) = std::env::var("TICKER_SUFFIX") {
            let s = s.trim();
            out.ticker_suffix = (!s.is_empty()).then(|| s.to_string());
        }

        if let Ok(s) = std::env::var("HISTORY_PERIOD") {
            if !s.trim().is_empty() {
                out.history_period = s.trim().to_string();
            }
        }

        // Set but empty means "start with no watchlist".
        if let Ok(s) = std::env::var("STARTING_WATCHLIST") {
            out.starting_watchlist = s
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
        }

        Ok(out)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeskError {
    #[error("invalid ticker: {0:?}")]
    InvalidTicker(String),
    #[error("user {0} is not entitled to trade")]
    NotEntitled(String),
    #[error("entitlement check failed: {0:#}")]
    Gate(anyhow::Error),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct TradingDesk {
    provider: Arc<dyn MarketDataProvider>,
    store: Arc<dyn AccountStore>,
    gate: Arc<dyn EntitlementGate>,
    locks: AccountLocks,
    options: DeskOptions,
}

impl TradingDesk {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        store: Arc<dyn AccountStore>,
        gate: Arc<dyn EntitlementGate>,
        options: DeskOptions,
    ) -> Self {
        Self {
            provider,
            store,
            gate,
            locks: AccountLocks::new(),
            options,
        }
    }

    pub fn options(&self) -> &DeskOptions {
        &self.options
    }

    pub fn normalize(&self, raw: &str) -> Result<String, DeskError> {
        normalize_ticker(raw, self.options.ticker_suffix.as_deref())
            .ok_or_else(|| DeskError::InvalidTicker(raw.to_string()))
    }

    pub async fn authorize(&self, ctx: &RequestContext) -> Result<(), DeskError> {
        let entitled = self
            .gate
            .is_entitled(&ctx.user_id)
            .await
            .map_err(DeskError::Gate)?;
        if !entitled {
            return Err(DeskError::NotEntitled(ctx.user_id.clone()));
        }
        Ok(())
    }

    /// The caller's account, opened with the starting balance on first use.
    pub async fn account(&self, ctx: &RequestContext) -> Result<Account, DeskError> {
        self.authorize(ctx).await?;
        let _guard = self.locks.acquire(&ctx.user_id).await;
        self.load_or_open(&ctx.user_id).await
    }

    // Caller holds the account lock.
    async fn load_or_open(&self, user_id: &str) -> Result<Account, DeskError> {
        if let Some(account) = self.store.load(user_id).await? {
            return Ok(account);
        }
        // Watchlist first: adds are idempotent, so a failed save below
        // reseeds harmlessly on the next attempt.
        for raw in &self.options.starting_watchlist {
            match self.normalize(raw) {
                Ok(ticker) => {
                    self.store.add_to_watchlist(user_id, &ticker).await?;
                }
                Err(_) => tracing::warn!(ticker = %raw, "skipping invalid starting watchlist ticker"),
            }
        }
        let account = Account::open(self.options.starting_balance);
        self.store.save(user_id, &account).await?;
        tracing::info!(
            %user_id,
            starting_balance = %account.cash_balance,
            watchlist = self.options.starting_watchlist.len(),
            backend = self.store.backend_name(),
            "opened account"
        );
        Ok(account)
    }

    /// Scores one ticker. A provider failure yields a `NotFound` result.
    pub async fn analyze(&self, raw_ticker: &str, strategy: StrategyKind) -> Result<ScoreResult, DeskError> {
        let ticker = self.normalize(raw_ticker)?;
        Ok(score_ticker(
            self.provider.as_ref(),
            &ticker,
            strategy,
            &self.options.history_period,
        )
        .await)
    }

    pub async fn buy(&self, ctx: &RequestContext, raw_ticker: &str, quantity: u64) -> Result<TradeReceipt, DeskError> {
        self.trade(ctx, raw_ticker, quantity, Side::Buy).await
    }

    pub async fn sell(&self, ctx: &RequestContext, raw_ticker: &str, quantity: u64) -> Result<TradeReceipt, DeskError> {
        self.trade(ctx, raw_ticker, quantity, Side::Sell).await
    }

    async fn trade(
        &self,
        ctx: &RequestContext,
        raw_ticker: &str,
        quantity: u64,
        side: Side,
    ) -> Result<TradeReceipt, DeskError> {
        self.authorize(ctx).await?;
        let ticker = self.normalize(raw_ticker)?;
        if quantity == 0 {
            return Err(LedgerError::InvalidQuantity.into());
        }

        // Price first; no lock is held across the provider call.
        let price = self.current_price(&ticker).await?;

        let _guard = self.locks.acquire(&ctx.user_id).await;
        let mut account = self.load_or_open(&ctx.user_id).await?;
        let receipt = match side {
            Side::Buy => account.buy(&ticker, quantity, price),
            Side::Sell => account.sell(&ticker, quantity, price),
        };
        let receipt = match receipt {
            Ok(r) => r,
            Err(err) => {
                tracing::info!(user_id = %ctx.user_id, %ticker, quantity, error = %err, "trade rejected");
                return Err(err.into());
            }
        };
        self.store.save(&ctx.user_id, &account).await?;

        tracing::info!(
            user_id = %ctx.user_id,
            %ticker,
            side = ?receipt.side,
            quantity,
            price = %receipt.price,
            cash_balance = %receipt.cash_balance,
            "trade filled"
        );
        Ok(receipt)
    }

    async fn current_price(&self, ticker: &str) -> Result<Decimal, DeskError> {
        let snapshot = self.provider.fetch_snapshot(ticker).await?;
        let price = price_from_f64(snapshot.price)
            .filter(|p| *p > Decimal::ZERO)
            .ok_or_else(|| {
                ProviderError::Upstream(anyhow::anyhow!(
                    "quote for {ticker} has unusable price {}",
                    snapshot.price
                ))
            })?;
        Ok(price)
    }

    /// Unrealized P&L at current prices. Quotes are fetched in parallel and
    /// a failed quote leaves that holding unpriced.
    pub async fn portfolio(&self, ctx: &RequestContext) -> Result<PortfolioReport, DeskError> {
        let account = self.account(ctx).await?;

        let mut set = JoinSet::new();
        for ticker in account.positions.keys().cloned() {
            let provider = self.provider.clone();
            set.spawn(async move {
                let res = provider.fetch_snapshot(&ticker).await;
                (ticker, res)
            });
        }

        let mut prices = HashMap::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((ticker, Ok(snap))) => match price_from_f64(snap.price) {
                    Some(p) => {
                        prices.insert(ticker, p);
                    }
                    None => tracing::warn!(%ticker, price = snap.price, "unusable quote price"),
                },
                Ok((ticker, Err(err))) => {
                    tracing::warn!(%ticker, error = %err, "quote unavailable for portfolio valuation");
                }
                Err(err) => tracing::error!(error = %err, "quote task failed"),
            }
        }

        Ok(account.report(&prices))
    }

    pub async fn watchlist(&self, ctx: &RequestContext) -> Result<Vec<String>, DeskError> {
        self.authorize(ctx).await?;
        let _guard = self.locks.acquire(&ctx.user_id).await;
        self.load_or_open(&ctx.user_id).await?;
        Ok(self.store.watchlist(&ctx.user_id).await?)
    }

    /// Adds a ticker; returns the normalized symbol and whether it was new.
    pub async fn watch(&self, ctx: &RequestContext, raw_ticker: &str) -> Result<(String, bool), DeskError> {
        self.authorize(ctx).await?;
        let ticker = self.normalize(raw_ticker)?;
        let _guard = self.locks.acquire(&ctx.user_id).await;
        self.load_or_open(&ctx.user_id).await?;
        let added = self.store.add_to_watchlist(&ctx.user_id, &ticker).await?;
        Ok((ticker, added))
    }

    pub async fn unwatch(&self, ctx: &RequestContext, raw_ticker: &str) -> Result<(String, bool), DeskError> {
        self.authorize(ctx).await?;
        let ticker = self.normalize(raw_ticker)?;
        let _guard = self.locks.acquire(&ctx.user_id).await;
        self.load_or_open(&ctx.user_id).await?;
        let removed = self.store.remove_from_watchlist(&ctx.user_id, &ticker).await?;
        Ok((ticker, removed))
    }

    /// Scores every ticker concurrently and returns them ranked, unavailable
    /// tickers last. Invalid and duplicate symbols are dropped.
    pub async fn scan(&self, raw_tickers: &[String], strategy: StrategyKind) -> Vec<ScoreResult> {
        let mut tickers = BTreeSet::new();
        for raw in raw_tickers {
            match self.normalize(raw) {
                Ok(t) => {
                    tickers.insert(t);
                }
                Err(_) => tracing::warn!(ticker = %raw, "skipping invalid ticker in scan"),
            }
        }

        let permits = Arc::new(Semaphore::new(SCAN_CONCURRENCY));
        let mut set = JoinSet::new();
        for ticker in tickers {
            let provider = self.provider.clone();
            let permits = permits.clone();
            let period = self.options.history_period.clone();
            set.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                score_ticker(provider.as_ref(), &ticker, strategy, &period).await
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(r) => results.push(r),
                Err(err) => tracing::error!(error = %err, "scan task failed"),
            }
        }

        rank_results(&mut results);
        tracing::info!(
            %strategy,
            scored = results.len(),
            unavailable = results.iter().filter(|r| !r.is_available()).count(),
            "scan finished"
        );
        results
    }
}

async fn score_ticker(
    provider: &dyn MarketDataProvider,
    ticker: &str,
    strategy: StrategyKind,
    history_period: &str,
) -> ScoreResult {
    let snapshot = if strategy.needs_history() {
        provider
            .fetch_history(ticker, history_period)
            .await
            .and_then(|bars| {
                technical_snapshot(ticker, &bars).ok_or_else(|| ProviderError::NotFound(ticker.to_string()))
            })
    } else {
        provider.fetch_snapshot(ticker).await
    };

    match snapshot {
        Ok(snap) => scoring::evaluate(strategy, &snap),
        Err(err) => {
            tracing::warn!(
                %ticker,
                %strategy,
                provider = provider.provider_name(),
                error = %err,
                "market data unavailable; reporting not found"
            );
            ScoreResult::not_found(ticker, strategy)
        }
    }
}
