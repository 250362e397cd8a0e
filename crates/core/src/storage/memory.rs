use crate::ledger::Account;
use crate::storage::{decode_account, AccountStore, StoreError};
use anyhow::Context;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

/// Process-local store. Accounts go through the same JSON encoding as the
/// Postgres store so a round trip here exercises the persisted shape.
#[derive(Debug, Default)]
pub struct InMemoryAccountStore {
    accounts: Mutex<HashMap<String, serde_json::Value>>,
    watchlists: Mutex<HashMap<String, Vec<String>>>,
    fail_saves: AtomicBool,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `save` fail until switched off again.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl AccountStore for InMemoryAccountStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn load(&self, user_id: &str) -> Result<Option<Account>, StoreError> {
        let state = self.accounts.lock().await.get(user_id).cloned();
        state.map(|s| decode_account(user_id, s)).transpose()
    }

    async fn save(&self, user_id: &str, account: &Account) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("in-memory store is refusing writes").into());
        }
        let state = serde_json::to_value(account).context("account serialize failed")?;
        self.accounts.lock().await.insert(user_id.to_string(), state);
        Ok(())
    }

    async fn watchlist(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .watchlists
            .lock()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn add_to_watchlist(&self, user_id: &str, ticker: &str) -> Result<bool, StoreError> {
        let mut lists = self.watchlists.lock().await;
        let list = lists.entry(user_id.to_string()).or_default();
        if list.iter().any(|t| t == ticker) {
            return Ok(false);
        }
        list.push(ticker.to_string());
        Ok(true)
    }

    async fn remove_from_watchlist(&self, user_id: &str, ticker: &str) -> Result<bool, StoreError> {
        let mut lists = self.watchlists.lock().await;
        let Some(list) = lists.get_mut(user_id) else {
            return Ok(false);
        };
        let before = list.len();
        list.retain(|t| t != ticker);
        Ok(list.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn save_then_load_is_deep_equal() {
        let store = InMemoryAccountStore::new();
        let mut acct = Account::open(dec!(1000000));
        acct.buy("RELIANCE.NS", 10, dec!(2456.35)).unwrap();
        acct.buy("TCS.NS", 3, dec!(3512.4)).unwrap();
        acct.buy("TCS.NS", 2, dec!(3600)).unwrap();

        store.save("u1", &acct).await.unwrap();
        let loaded = store.load("u1").await.unwrap().unwrap();
        assert_eq!(loaded, acct);
        assert!(store.load("u2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_save_keeps_previous_state() {
        let store = InMemoryAccountStore::new();
        let acct = Account::open(dec!(500));
        store.save("u1", &acct).await.unwrap();

        store.set_fail_saves(true);
        let mut changed = acct.clone();
        changed.buy("X", 1, dec!(100)).unwrap();
        assert!(matches!(
            store.save("u1", &changed).await,
            Err(StoreError::Backend(_))
        ));
        assert_eq!(store.load("u1").await.unwrap().unwrap(), acct);
    }

    #[tokio::test]
    async fn watchlist_keeps_insertion_order_without_duplicates() {
        let store = InMemoryAccountStore::new();
        assert!(store.add_to_watchlist("u1", "TCS.NS").await.unwrap());
        assert!(store.add_to_watchlist("u1", "INFY.NS").await.unwrap());
        assert!(!store.add_to_watchlist("u1", "TCS.NS").await.unwrap());
        assert_eq!(store.watchlist("u1").await.unwrap(), vec!["TCS.NS", "INFY.NS"]);

        assert!(store.remove_from_watchlist("u1", "TCS.NS").await.unwrap());
        assert!(!store.remove_from_watchlist("u1", "TCS.NS").await.unwrap());
        assert!(!store.remove_from_watchlist("nobody", "TCS.NS").await.unwrap());
        assert_eq!(store.watchlist("u1").await.unwrap(), vec!["INFY.NS"]);
    }
}
