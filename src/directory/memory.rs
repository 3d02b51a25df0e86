//! Directory kept in process memory.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Directory, DirectoryError, Result};
use crate::account::Account;

/// In-memory [`Directory`]. Entries are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    entries: RwLock<BTreeMap<String, Account>>,
}

impl MemoryDirectory {
    /// Create a new [`MemoryDirectory`] holding `accounts`.
    pub fn with_accounts(accounts: impl IntoIterator<Item = Account>) -> Self {
        let entries = accounts
            .into_iter()
            .map(|account| (account.uid.clone(), account))
            .collect();

        Self {
            entries: RwLock::new(entries),
        }
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn list_all(&self) -> Result<Vec<Account>> {
        Ok(self.entries.read().await.values().cloned().collect())
    }

    async fn find_by_uid(&self, uid: &str) -> Result<Account> {
        self.entries
            .read()
            .await
            .get(uid)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(uid.to_owned()))
    }

    async fn add(&self, account: &Account) -> Result<()> {
        match self.entries.write().await.entry(account.uid.clone()) {
            Entry::Occupied(_) => {
                Err(DirectoryError::AlreadyExists(account.uid.clone()))
            },
            Entry::Vacant(entry) => {
                entry.insert(account.clone());
                Ok(())
            },
        }
    }
}
