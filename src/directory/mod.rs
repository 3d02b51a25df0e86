//! Interface for the account directory.

mod ldap;
mod memory;

pub use ldap::*;
pub use memory::*;

use async_trait::async_trait;
use ldap3::LdapError;

use crate::account::Account;

pub type Result<T> = std::result::Result<T, DirectoryError>;

/// Errors raised by a [`Directory`].
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("no entry with uid {0}")]
    NotFound(String),
    #[error("an entry with uid {0} already exists")]
    AlreadyExists(String),

    #[error("entry {dn} has no valid `{attribute}`")]
    InvalidEntry { dn: String, attribute: &'static str },
    #[error("bind DN is set without a password")]
    MissingPassword,
    #[error("no answer within {0:?}")]
    Timeout(std::time::Duration),
    #[error(transparent)]
    Ldap(#[from] LdapError),
}

/// Store of [`Account`] records, keyed by `uid`.
///
/// `add` must reject an existing `uid` atomically: callers rely on it, not on
/// a previous lookup, to detect duplicates.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Every entry, possibly none.
    async fn list_all(&self) -> Result<Vec<Account>>;

    /// Find an entry by `uid`, [`DirectoryError::NotFound`] otherwise.
    async fn find_by_uid(&self, uid: &str) -> Result<Account>;

    /// Persist a new entry.
    async fn add(&self, account: &Account) -> Result<()>;

    /// Release held connections.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
