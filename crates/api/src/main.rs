use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use papertrade_core::desk::{DeskError, DeskOptions, RequestContext, TradingDesk};
use papertrade_core::domain::scan::ScanRun;
use papertrade_core::domain::score::{ScoreResult, StrategyKind};
use papertrade_core::entitlement::{AllowList, EntitlementGate, OpenAccess};
use papertrade_core::ingest::cache::CachedMarketData;
use papertrade_core::ingest::fake::StaticMarketData;
use papertrade_core::ingest::provider::{HttpJsonMarketData, MarketDataProvider, ProviderError};
use papertrade_core::ledger::{Account, PortfolioReport, TradeReceipt};
use papertrade_core::storage::{AccountStore, InMemoryAccountStore, PgAccountStore, StoreError};

const USER_HEADER: &str = "x-user-id";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = papertrade_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let pool: Option<PgPool> = match settings.require_database_url() {
        Ok(db_url) => match sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
        {
            Ok(pool) => match papertrade_core::storage::migrate(&pool).await {
                Ok(()) => Some(pool),
                Err(e) => {
                    sentry_anyhow::capture_anyhow(&e);
                    tracing::error!(error = %e, "db migrations failed; starting API in degraded mode");
                    None
                }
            },
            Err(e) => {
                let err = anyhow::Error::new(e);
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %err, "db connect failed; starting API in degraded mode");
                None
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "DATABASE_URL missing; accounts are kept in memory");
            None
        }
    };

    let store: Arc<dyn AccountStore> = match &pool {
        Some(pool) => Arc::new(PgAccountStore::new(pool.clone())),
        None => Arc::new(InMemoryAccountStore::new()),
    };

    let upstream: Arc<dyn MarketDataProvider> = match HttpJsonMarketData::from_settings(&settings) {
        Ok(http) => Arc::new(http),
        Err(e) => {
            tracing::warn!(error = %e, "market data provider not configured; every lookup will be not found");
            Arc::new(StaticMarketData::new())
        }
    };
    let provider = Arc::new(CachedMarketData::from_env(upstream));

    let gate: Arc<dyn EntitlementGate> = match settings.allowed_users() {
        Some(users) => {
            tracing::info!(users = users.len(), "entitlement restricted to ALLOWED_USERS");
            Arc::new(AllowList::new(users))
        }
        None => Arc::new(OpenAccess),
    };

    let desk = TradingDesk::new(provider, store.clone(), gate, DeskOptions::from_env()?);
    tracing::info!(
        store = store.backend_name(),
        starting_balance = %desk.options().starting_balance,
        "trading desk ready"
    );

    let state = AppState {
        desk: Arc::new(desk),
        pool,
    };

    let app = router(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/analysis/:ticker", get(get_analysis))
        .route("/account", get(get_account))
        .route("/account/buy", post(post_buy))
        .route("/account/sell", post(post_sell))
        .route("/portfolio", get(get_portfolio))
        .route("/watchlist", get(get_watchlist).post(post_watchlist))
        .route("/watchlist/:ticker", delete(delete_watchlist))
        .route("/scans/latest", get(get_latest_scan))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    desk: Arc<TradingDesk>,
    pool: Option<PgPool>,
}

/// Caller identity from the `x-user-id` header.
struct CurrentUser(RequestContext);

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(ApiError::Unauthenticated)?;
        Ok(CurrentUser(RequestContext::new(user_id)))
    }
}

#[derive(Debug)]
enum ApiError {
    Unauthenticated,
    BadRequest(String),
    NotFound(&'static str),
    Unavailable(&'static str),
    Desk(DeskError),
    Internal(anyhow::Error),
}

impl From<DeskError> for ApiError {
    fn from(err: DeskError) -> Self {
        ApiError::Desk(err)
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Unauthenticated => (StatusCode::UNAUTHORIZED, "missing_user"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
            ApiError::Desk(err) => match err {
                DeskError::InvalidTicker(_) => (StatusCode::BAD_REQUEST, "invalid_ticker"),
                DeskError::NotEntitled(_) => (StatusCode::FORBIDDEN, "not_entitled"),
                DeskError::Gate(_) => (StatusCode::SERVICE_UNAVAILABLE, "entitlement_unavailable"),
                DeskError::Ledger(e) => (StatusCode::UNPROCESSABLE_ENTITY, e.kind()),
                DeskError::Provider(ProviderError::NotFound(_)) => {
                    (StatusCode::BAD_GATEWAY, "ticker_not_found")
                }
                DeskError::Provider(ProviderError::Timeout(_)) => {
                    (StatusCode::BAD_GATEWAY, "provider_timeout")
                }
                DeskError::Provider(ProviderError::Upstream(_)) => {
                    (StatusCode::BAD_GATEWAY, "provider_unavailable")
                }
                DeskError::Store(StoreError::Corrupt { .. }) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "account_unreadable")
                }
                DeskError::Store(StoreError::Backend(_)) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable")
                }
            },
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Unauthenticated => format!("{USER_HEADER} header is required"),
            ApiError::BadRequest(m) => m.clone(),
            ApiError::NotFound(what) => format!("{what} not found"),
            ApiError::Unavailable(what) => format!("{what} is unavailable"),
            ApiError::Internal(_) => "internal error".to_string(),
            ApiError::Desk(err) => err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.parts();
        if status.is_server_error() {
            match &self {
                ApiError::Internal(err) => {
                    sentry_anyhow::capture_anyhow(err);
                    tracing::error!(error = %err, code, "request failed");
                }
                ApiError::Desk(DeskError::Store(StoreError::Corrupt { user_id, detail })) => {
                    tracing::error!(%user_id, %detail, "stored account failed validation");
                }
                other => tracing::warn!(error = ?other, code, "request failed"),
            }
        }
        let body = ErrorBody {
            error: code,
            message: self.message(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct AnalysisQuery {
    strategy: Option<String>,
}

#[derive(Debug, Serialize)]
struct AnalysisView {
    label: &'static str,
    score: Option<u8>,
    #[serde(flatten)]
    result: ScoreResult,
}

fn parse_strategy(raw: Option<&str>) -> Result<Option<StrategyKind>, ApiError> {
    raw.filter(|s| !s.trim().is_empty())
        .map(|s| {
            s.parse::<StrategyKind>()
                .map_err(|e| ApiError::BadRequest(e.to_string()))
        })
        .transpose()
}

async fn get_analysis(
    State(state): State<AppState>,
    CurrentUser(ctx): CurrentUser,
    Path(ticker): Path<String>,
    Query(q): Query<AnalysisQuery>,
) -> Result<Json<AnalysisView>, ApiError> {
    let strategy = parse_strategy(q.strategy.as_deref())?.unwrap_or(StrategyKind::Fundamentals);
    state.desk.authorize(&ctx).await?;
    let result = state.desk.analyze(&ticker, strategy).await?;
    Ok(Json(AnalysisView {
        label: result.label(),
        score: result.score(),
        result,
    }))
}

async fn get_account(
    State(state): State<AppState>,
    CurrentUser(ctx): CurrentUser,
) -> Result<Json<Account>, ApiError> {
    Ok(Json(state.desk.account(&ctx).await?))
}

#[derive(Debug, Deserialize)]
struct TradeRequest {
    ticker: String,
    quantity: u64,
}

async fn post_buy(
    State(state): State<AppState>,
    CurrentUser(ctx): CurrentUser,
    Json(req): Json<TradeRequest>,
) -> Result<Json<TradeReceipt>, ApiError> {
    Ok(Json(state.desk.buy(&ctx, &req.ticker, req.quantity).await?))
}

async fn post_sell(
    State(state): State<AppState>,
    CurrentUser(ctx): CurrentUser,
    Json(req): Json<TradeRequest>,
) -> Result<Json<TradeReceipt>, ApiError> {
    Ok(Json(state.desk.sell(&ctx, &req.ticker, req.quantity).await?))
}

async fn get_portfolio(
    State(state): State<AppState>,
    CurrentUser(ctx): CurrentUser,
) -> Result<Json<PortfolioReport>, ApiError> {
    Ok(Json(state.desk.portfolio(&ctx).await?))
}

#[derive(Debug, Serialize)]
struct WatchlistView {
    tickers: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct WatchRequest {
    ticker: String,
}

#[derive(Debug, Serialize)]
struct WatchChange {
    ticker: String,
    changed: bool,
}

async fn get_watchlist(
    State(state): State<AppState>,
    CurrentUser(ctx): CurrentUser,
) -> Result<Json<WatchlistView>, ApiError> {
    let tickers = state.desk.watchlist(&ctx).await?;
    Ok(Json(WatchlistView { tickers }))
}

async fn post_watchlist(
    State(state): State<AppState>,
    CurrentUser(ctx): CurrentUser,
    Json(req): Json<WatchRequest>,
) -> Result<Json<WatchChange>, ApiError> {
    let (ticker, changed) = state.desk.watch(&ctx, &req.ticker).await?;
    Ok(Json(WatchChange { ticker, changed }))
}

async fn delete_watchlist(
    State(state): State<AppState>,
    CurrentUser(ctx): CurrentUser,
    Path(ticker): Path<String>,
) -> Result<Json<WatchChange>, ApiError> {
    let (ticker, changed) = state.desk.unwatch(&ctx, &ticker).await?;
    Ok(Json(WatchChange { ticker, changed }))
}

#[derive(Debug, Deserialize)]
struct ScanQuery {
    strategy: Option<String>,
}

#[derive(Debug, Serialize)]
struct ApiScan {
    scan_id: Uuid,
    scan: ScanRun,
}

async fn get_latest_scan(
    State(state): State<AppState>,
    Query(q): Query<ScanQuery>,
) -> Result<Json<ApiScan>, ApiError> {
    let strategy = parse_strategy(q.strategy.as_deref())?;
    let Some(pool) = &state.pool else {
        return Err(ApiError::Unavailable("scan history"));
    };

    let (scan_id, scan) = papertrade_core::storage::scans::fetch_latest(pool, strategy)
        .await
        .map_err(ApiError::Internal)?
        .ok_or(ApiError::NotFound("scan run"))?;

    Ok(Json(ApiScan { scan_id, scan }))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &papertrade_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
