use anyhow::Context;
use chrono::{Datelike, NaiveDate};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::score::StrategyKind;

/// One async mutex per user. Holding the guard serializes the
/// load/mutate/save sequence of that user's account within this process.
#[derive(Debug, Default)]
pub struct AccountLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

// Idle entries are dropped once the map grows past this.
const PRUNE_ABOVE: usize = 1024;

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, user_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            if map.len() > PRUNE_ABOVE {
                // Only the map holds an idle lock.
                map.retain(|_, l| Arc::strong_count(l) > 1);
            }
            map.entry(user_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    async fn tracked(&self) -> usize {
        self.inner.lock().await.len()
    }
}

// Advisory locks are scoped to the Postgres session, so the guard pins the
// connection it was taken on.
const LOCK_NAMESPACE: i64 = 0x5041_5045_5254; // "PAPERT"

fn scan_lock_key(as_of_date: NaiveDate, strategy: StrategyKind) -> i64 {
    let strategy_tag = match strategy {
        StrategyKind::Fundamentals => 1,
        StrategyKind::Technical => 2,
        StrategyKind::TechnicalShort => 3,
        StrategyKind::Rsi => 4,
    };
    ((LOCK_NAMESPACE << 8) | strategy_tag) ^ ((as_of_date.num_days_from_ce() as i64) << 16)
}

/// Held while a scan run for one (as-of date, strategy) is in progress.
pub struct ScanRunLock {
    conn: sqlx::pool::PoolConnection<sqlx::Postgres>,
    key: i64,
}

pub async fn try_acquire_scan_lock(
    pool: &sqlx::PgPool,
    as_of_date: NaiveDate,
    strategy: StrategyKind,
) -> anyhow::Result<Option<ScanRunLock>> {
    let key = scan_lock_key(as_of_date, strategy);
    let mut conn = pool
        .acquire()
        .await
        .context("failed to acquire connection for advisory lock")?;
    let acquired: (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
        .persistent(false)
        .bind(key)
        .fetch_one(&mut *conn)
        .await
        .with_context(|| format!("failed to acquire advisory lock (key={key})"))?;
    Ok(acquired.0.then_some(ScanRunLock { conn, key }))
}

impl ScanRunLock {
    pub async fn release(mut self) -> anyhow::Result<()> {
        let key = self.key;
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .persistent(false)
            .bind(key)
            .execute(&mut *self.conn)
            .await
            .with_context(|| format!("failed to release advisory lock (key={key})"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn scan_keys_differ_by_date_and_strategy() {
        let d1 = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2026, 3, 3).unwrap();
        let a = scan_lock_key(d1, StrategyKind::Fundamentals);
        assert_ne!(a, scan_lock_key(d2, StrategyKind::Fundamentals));
        assert_ne!(a, scan_lock_key(d1, StrategyKind::Technical));
        assert_eq!(a, scan_lock_key(d1, StrategyKind::Fundamentals));
    }

    #[tokio::test]
    async fn same_user_is_serialized() {
        let locks = Arc::new(AccountLocks::new());
        let guard = locks.acquire("u1").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.acquire("u1").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn different_users_do_not_block() {
        let locks = AccountLocks::new();
        let _a = locks.acquire("u1").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire("u2")).await;
        assert!(b.is_ok());
        assert_eq!(locks.tracked().await, 2);
    }
}
