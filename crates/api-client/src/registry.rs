use std::collections::HashMap;
use std::sync::Arc;

use configuration::BinanceConfig;
use core_types::Account;
use tokio::sync::RwLock;

use crate::{ApiError, BinanceClient};

/// A shared map from account id to its gateway client.
///
/// Built at startup from the account store and refreshed when the dashboard
/// mutates accounts. The executor and the tracker resolve clients through
/// this registry so neither holds credentials of its own.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    inner: RwLock<HashMap<i64, Arc<BinanceClient>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, account_id: i64) -> Option<Arc<BinanceClient>> {
        self.inner.read().await.get(&account_id).cloned()
    }

    /// Builds and stores a client for the account, replacing any previous
    /// client for the same id.
    pub async fn insert(
        &self,
        account: &Account,
        overrides: &BinanceConfig,
    ) -> Result<Arc<BinanceClient>, ApiError> {
        let client = Arc::new(BinanceClient::new(account, overrides)?);
        self.inner
            .write()
            .await
            .insert(account.id, Arc::clone(&client));
        Ok(client)
    }

    pub async fn remove(&self, account_id: i64) {
        self.inner.write().await.remove(&account_id);
    }

    /// Replaces the whole registry from the current set of active accounts.
    /// Accounts whose credentials fail to build are skipped with a log line
    /// so one bad row cannot take down the rest.
    pub async fn rebuild(&self, accounts: &[Account], overrides: &BinanceConfig) {
        let mut next = HashMap::with_capacity(accounts.len());
        for account in accounts {
            match BinanceClient::new(account, overrides) {
                Ok(client) => {
                    next.insert(account.id, Arc::new(client));
                }
                Err(e) => {
                    tracing::error!(account_id = account.id, error = %e,
                        "Skipping account with unusable credentials.");
                }
            }
        }
        *self.inner.write().await = next;
    }
}
