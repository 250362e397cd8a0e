use crate::domain::scan::{ScanItem, ScanRun};
use crate::domain::score::{StrategyKind, Verdict};
use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};

pub async fn persist_success(pool: &sqlx::PgPool, run: &ScanRun) -> anyhow::Result<uuid::Uuid> {
    run.validate().context("refusing to persist invalid scan run")?;

    let mut tx = pool.begin().await.context("begin transaction failed")?;

    let scan_id: uuid::Uuid = sqlx::query_scalar(
        "INSERT INTO scan_runs (as_of_date, generated_at, strategy, status, error) \
         VALUES ($1, $2, $3, 'success', NULL) \
         RETURNING id",
    )
    .bind(run.as_of_date)
    .bind(run.generated_at)
    .bind(run.strategy.as_str())
    .fetch_one(&mut *tx)
    .await
    .context("insert scan_runs failed")?;

    for item in &run.items {
        insert_item(&mut tx, scan_id, item).await?;
    }

    tx.commit().await.context("commit transaction failed")?;
    Ok(scan_id)
}

pub async fn persist_failure(
    pool: &sqlx::PgPool,
    as_of_date: NaiveDate,
    generated_at: DateTime<Utc>,
    strategy: StrategyKind,
    error: &str,
) -> anyhow::Result<uuid::Uuid> {
    let scan_id: uuid::Uuid = sqlx::query_scalar(
        "INSERT INTO scan_runs (as_of_date, generated_at, strategy, status, error) \
         VALUES ($1, $2, $3, 'error', $4) \
         RETURNING id",
    )
    .bind(as_of_date)
    .bind(generated_at)
    .bind(strategy.as_str())
    .bind(error)
    .fetch_one(pool)
    .await
    .context("insert error scan_runs failed")?;

    Ok(scan_id)
}

async fn insert_item(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    scan_id: uuid::Uuid,
    item: &ScanItem,
) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO scan_items (scan_id, rank, ticker, label, score, verdict, reasons) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(scan_id)
    .bind(item.rank)
    .bind(&item.ticker)
    .bind(&item.label)
    .bind(item.score)
    .bind(item.verdict.map(Verdict::label))
    .bind(&item.reasons)
    .execute(&mut **tx)
    .await
    .with_context(|| format!("insert scan_items failed (ticker={})", item.ticker))?;

    Ok(())
}

type ItemRow = (i32, String, String, Option<i16>, Option<String>, Vec<String>);

/// Most recent successful run, optionally for one strategy.
pub async fn fetch_latest(
    pool: &sqlx::PgPool,
    strategy: Option<StrategyKind>,
) -> anyhow::Result<Option<(uuid::Uuid, ScanRun)>> {
    let header: Option<(uuid::Uuid, NaiveDate, DateTime<Utc>, String)> = sqlx::query_as(
        "SELECT id, as_of_date, generated_at, strategy \
         FROM scan_runs \
         WHERE status = 'success' AND ($1::text IS NULL OR strategy = $1) \
         ORDER BY as_of_date DESC, generated_at DESC \
         LIMIT 1",
    )
    .persistent(false)
    .bind(strategy.map(StrategyKind::as_str))
    .fetch_optional(pool)
    .await
    .context("select latest scan_runs failed")?;

    let Some((scan_id, as_of_date, generated_at, strategy)) = header else {
        return Ok(None);
    };

    let rows: Vec<ItemRow> = sqlx::query_as(
        "SELECT rank, ticker, label, score, verdict, reasons \
         FROM scan_items \
         WHERE scan_id = $1 \
         ORDER BY rank ASC",
    )
    .persistent(false)
    .bind(scan_id)
    .fetch_all(pool)
    .await
    .with_context(|| format!("select scan_items failed (scan_id={scan_id})"))?;

    let items = rows
        .into_iter()
        .map(|(rank, ticker, label, score, verdict, reasons)| ScanItem {
            rank,
            ticker,
            label,
            score,
            verdict: verdict.as_deref().and_then(Verdict::from_label),
            reasons,
        })
        .collect();

    let run = ScanRun {
        as_of_date,
        generated_at,
        strategy: strategy
            .parse()
            .with_context(|| format!("scan run {scan_id} has unknown strategy"))?,
        items,
    };
    Ok(Some((scan_id, run)))
}
