use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use papertrade_core::desk::{DeskOptions, TradingDesk};
use papertrade_core::domain::scan::ScanRun;
use papertrade_core::domain::score::{ScoreResult, StrategyKind};
use papertrade_core::entitlement::OpenAccess;
use papertrade_core::ingest::cache::CachedMarketData;
use papertrade_core::ingest::provider::HttpJsonMarketData;
use papertrade_core::storage::{AccountStore, InMemoryAccountStore, PgAccountStore};

mod universe;

#[derive(Debug, Parser)]
#[command(name = "papertrade_worker")]
struct Args {
    /// Comma-separated tickers to scan. Overrides the watchlist and the default universe.
    #[arg(long, value_delimiter = ',')]
    tickers: Vec<String>,

    /// Scan this user's watchlist when no tickers are given.
    #[arg(long)]
    user_id: Option<String>,

    /// fundamentals | technical | technical_short | rsi
    #[arg(long, default_value = "fundamentals")]
    strategy: String,

    /// Number of ranked items to keep. Defaults to SCAN_TOP or 20.
    #[arg(long)]
    top: Option<usize>,

    /// Market as-of date (YYYY-MM-DD). Defaults to the last completed NSE session.
    #[arg(long)]
    as_of_date: Option<String>,

    /// Score and log, without writing to the database.
    #[arg(long)]
    dry_run: bool,
}

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

    let args = Args::parse();

    let strategy: StrategyKind = args.strategy.parse()?;
    let as_of_date =
        papertrade_core::time::resolve_as_of_date(args.as_of_date.as_deref(), chrono::Utc::now())?;

    let mut opts = universe::UniverseOptions::from_env();
    if let Some(top) = args.top {
        opts.top = top;
    }
    anyhow::ensure!(opts.top >= 1, "--top must be at least 1");

    let pool = if args.dry_run && settings.database_url.is_none() {
        None
    } else {
        let db_url = settings.require_database_url()?;
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
            .context("connect DATABASE_URL failed")?;
        papertrade_core::storage::migrate(&pool).await?;
        Some(pool)
    };

    let store: Arc<dyn AccountStore> = match &pool {
        Some(pool) => Arc::new(PgAccountStore::new(pool.clone())),
        None => Arc::new(InMemoryAccountStore::new()),
    };

    let watchlist = match (&args.user_id, args.tickers.is_empty()) {
        (Some(user_id), true) => store
            .watchlist(user_id)
            .await
            .with_context(|| format!("failed to load watchlist for {user_id}"))?,
        _ => Vec::new(),
    };
    let (source, tickers) = universe::choose_universe(&args.tickers, watchlist, &opts)?;

    let provider = HttpJsonMarketData::from_settings(&settings)?;
    let desk = TradingDesk::new(
        Arc::new(CachedMarketData::from_env(Arc::new(provider))),
        store,
        Arc::new(OpenAccess),
        DeskOptions::from_env()?,
    );

    tracing::info!(
        %as_of_date,
        %strategy,
        source = source.as_str(),
        universe_len = tickers.len(),
        top = opts.top,
        dry_run = args.dry_run,
        "scan starting"
    );

    let lock = match (&pool, args.dry_run) {
        (Some(pool), false) => {
            match papertrade_core::storage::lock::try_acquire_scan_lock(pool, as_of_date, strategy).await? {
                Some(lock) => Some(lock),
                None => {
                    tracing::warn!(%as_of_date, %strategy, "scan lock not acquired; another run in progress");
                    return Ok(());
                }
            }
        }
        _ => None,
    };

    let generated_at = chrono::Utc::now();
    let results = desk.scan(&tickers, strategy).await;
    let outcome = build_run(as_of_date, generated_at, strategy, results, opts.top);

    if args.dry_run {
        match &outcome {
            Ok(run) => log_run(run),
            Err(err) => tracing::error!(%as_of_date, error = %format!("{err:#}"), "scan failed (dry-run)"),
        }
        return outcome.map(|_| ());
    }

    let Some(pool) = &pool else {
        anyhow::bail!("DATABASE_URL is required unless --dry-run is set");
    };

    match outcome {
        Ok(run) => {
            log_run(&run);
            let scan_id = papertrade_core::storage::scans::persist_success(pool, &run).await?;
            tracing::info!(%as_of_date, %scan_id, items = run.items.len(), "persisted scan run");
        }
        Err(err) => {
            sentry_anyhow::capture_anyhow(&err);
            let scan_id = papertrade_core::storage::scans::persist_failure(
                pool,
                as_of_date,
                generated_at,
                strategy,
                &format!("{err:#}"),
            )
            .await?;
            tracing::error!(%as_of_date, %scan_id, error = %err, "scan run failed");
        }
    }

    if let Some(lock) = lock {
        if let Err(err) = lock.release().await {
            tracing::warn!(error = %err, "failed to release scan lock");
        }
    }
    Ok(())
}

/// Ranks the results into a run of at most `top` items. Fails when no
/// ticker in the universe could be scored at all.
fn build_run(
    as_of_date: chrono::NaiveDate,
    generated_at: chrono::DateTime<chrono::Utc>,
    strategy: StrategyKind,
    results: Vec<ScoreResult>,
    top: usize,
) -> anyhow::Result<ScanRun> {
    anyhow::ensure!(
        results.iter().any(ScoreResult::is_available),
        "market data unavailable for every ticker in the universe ({} tried)",
        results.len()
    );

    let mut run = ScanRun::from_results(as_of_date, generated_at, strategy, results);
    run.items.truncate(top);
    run.validate()?;
    Ok(run)
}

fn log_run(run: &ScanRun) {
    for item in &run.items {
        tracing::info!(
            rank = item.rank,
            ticker = %item.ticker,
            label = %item.label,
            score = ?item.score,
            reasons = %item.reasons.join("; "),
            "scan item"
        );
    }
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

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use papertrade_core::domain::score::{Band, Outcome, Verdict};

    fn scored(ticker: &str, score: u8) -> ScoreResult {
        ScoreResult {
            ticker: ticker.to_string(),
            strategy: StrategyKind::Fundamentals,
            outcome: Outcome::Score {
                score,
                band: Band::from_score(score),
            },
            reasons: vec![],
        }
    }

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 4).unwrap()
    }

    #[test]
    fn run_keeps_top_items_in_rank_order() {
        let now = Utc.with_ymd_and_hms(2026, 3, 4, 11, 0, 0).unwrap();
        let results = vec![
            scored("B.NS", 40),
            ScoreResult::not_found("Z.NS", StrategyKind::Fundamentals),
            scored("A.NS", 90),
            scored("C.NS", 65),
        ];
        let run = build_run(as_of(), now, StrategyKind::Fundamentals, results, 2).unwrap();
        let tickers: Vec<&str> = run.items.iter().map(|i| i.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["A.NS", "C.NS"]);
        assert_eq!(run.items[1].rank, 2);
    }

    #[test]
    fn run_fails_when_nothing_could_be_scored() {
        let now = Utc.with_ymd_and_hms(2026, 3, 4, 11, 0, 0).unwrap();
        let results = vec![
            ScoreResult::not_found("A.NS", StrategyKind::Rsi),
            ScoreResult::not_found("B.NS", StrategyKind::Rsi),
        ];
        assert!(build_run(as_of(), now, StrategyKind::Rsi, results, 10).is_err());
    }

    #[test]
    fn verdict_runs_carry_verdicts() {
        let now = Utc.with_ymd_and_hms(2026, 3, 4, 11, 0, 0).unwrap();
        let results = vec![ScoreResult {
            ticker: "A.NS".to_string(),
            strategy: StrategyKind::Rsi,
            outcome: Outcome::Verdict {
                verdict: Verdict::Buy,
            },
            reasons: vec!["RSI oversold".to_string()],
        }];
        let run = build_run(as_of(), now, StrategyKind::Rsi, results, 10).unwrap();
        assert_eq!(run.items[0].verdict, Some(Verdict::Buy));
        assert_eq!(run.items[0].score, None);
        assert_eq!(run.items[0].label, "BUY");
    }

    #[test]
    fn cli_accepts_comma_separated_tickers() {
        let args = Args::try_parse_from([
            "papertrade_worker",
            "--tickers",
            "TCS.NS,INFY.NS",
            "--strategy",
            "technical",
            "--dry-run",
        ])
        .unwrap();
        assert_eq!(args.tickers, vec!["TCS.NS", "INFY.NS"]);
        assert!(args.dry_run);
        assert_eq!(args.strategy.parse::<StrategyKind>().unwrap(), StrategyKind::Technical);
    }
}
