use crate::ledger::Account;
use crate::storage::{decode_account, AccountStore, StoreError};
use anyhow::Context;

/// Accounts as `jsonb` rows in Postgres, one row per user.
#[derive(Debug, Clone)]
pub struct PgAccountStore {
    pool: sqlx::PgPool,
}

impl PgAccountStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AccountStore for PgAccountStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn load(&self, user_id: &str) -> Result<Option<Account>, StoreError> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT state FROM accounts WHERE user_id = $1")
                .persistent(false)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .with_context(|| format!("select account failed (user_id={user_id})"))?;

        row.map(|(state,)| decode_account(user_id, state))
            .transpose()
    }

    async fn save(&self, user_id: &str, account: &Account) -> Result<(), StoreError> {
        let state = serde_json::to_value(account).context("account serialize failed")?;

        sqlx::query(
            "INSERT INTO accounts (user_id, state, updated_at) \
             VALUES ($1, $2, now()) \
             ON CONFLICT (user_id) DO UPDATE \
               SET state = EXCLUDED.state, updated_at = EXCLUDED.updated_at",
        )
        .persistent(false)
        .bind(user_id)
        .bind(state)
        .execute(&self.pool)
        .await
        .with_context(|| format!("upsert account failed (user_id={user_id})"))?;

        tracing::debug!(%user_id, positions = account.positions.len(), "account saved");
        Ok(())
    }

    async fn watchlist(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT ticker FROM watchlist_items \
             WHERE user_id = $1 \
             ORDER BY added_at ASC, ticker ASC",
        )
        .persistent(false)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("select watchlist failed (user_id={user_id})"))?;

        Ok(rows.into_iter().map(|(t,)| t).collect())
    }

    async fn add_to_watchlist(&self, user_id: &str, ticker: &str) -> Result<bool, StoreError> {
        let res = sqlx::query(
            "INSERT INTO watchlist_items (user_id, ticker) VALUES ($1, $2) \
             ON CONFLICT (user_id, ticker) DO NOTHING",
        )
        .persistent(false)
        .bind(user_id)
        .bind(ticker)
        .execute(&self.pool)
        .await
        .context("insert watchlist_items failed")?;
        Ok(res.rows_affected() == 1)
    }

    async fn remove_from_watchlist(&self, user_id: &str, ticker: &str) -> Result<bool, StoreError> {
        let res = sqlx::query("DELETE FROM watchlist_items WHERE user_id = $1 AND ticker = $2")
            .persistent(false)
            .bind(user_id)
            .bind(ticker)
            .execute(&self.pool)
            .await
            .context("delete watchlist_items failed")?;
        Ok(res.rows_affected() == 1)
    }
}
