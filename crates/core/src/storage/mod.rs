pub mod accounts;
pub mod lock;
pub mod memory;
pub mod scans;

use crate::ledger::Account;
use anyhow::Context;

pub use accounts::PgAccountStore;
pub use memory::InMemoryAccountStore;

pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("stored account for {user_id} is unreadable: {detail}")]
    Corrupt { user_id: String, detail: String },
    #[error("account store failed: {0:#}")]
    Backend(#[from] anyhow::Error),
}

/// Durable home of each user's account and watchlist.
#[async_trait::async_trait]
pub trait AccountStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    async fn load(&self, user_id: &str) -> Result<Option<Account>, StoreError>;

    async fn save(&self, user_id: &str, account: &Account) -> Result<(), StoreError>;

    /// Tickers in the order they were added.
    async fn watchlist(&self, user_id: &str) -> Result<Vec<String>, StoreError>;

    /// Returns false if the ticker was already watched.
    async fn add_to_watchlist(&self, user_id: &str, ticker: &str) -> Result<bool, StoreError>;

    /// Returns false if the ticker was not watched.
    async fn remove_from_watchlist(&self, user_id: &str, ticker: &str) -> Result<bool, StoreError>;
}

/// Decodes a persisted account and checks its invariants.
pub fn decode_account(user_id: &str, state: serde_json::Value) -> Result<Account, StoreError> {
    let corrupt = |detail: String| StoreError::Corrupt {
        user_id: user_id.to_string(),
        detail,
    };
    let account: Account = serde_json::from_value(state).map_err(|e| corrupt(e.to_string()))?;
    account.validate().map_err(|e| corrupt(format!("{e:#}")))?;
    Ok(account)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_rejects_negative_cash() {
        let err = decode_account("u1", json!({"cashBalance": -5.0, "positions": {}})).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn decode_rejects_wrong_shape() {
        let err = decode_account("u1", json!({"Balance": 5.0})).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn decode_accepts_empty_positions() {
        let acct = decode_account("u1", json!({"cashBalance": 100.0})).unwrap();
        assert!(acct.positions.is_empty());
    }
}
