//! Account provisioning.
//!
//! A request walks through [`Stage`]s in order and stops at the first
//! failure. Once the entry is persisted it is never rolled back: key failures
//! surface as [`ProvisionError::KeyFetch`] or [`ProvisionError::KeyInstall`]
//! carrying the created account, and [`AccountProvisioner::install_keys`]
//! can be re-run on it.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{Account, UidAllocator};
use crate::config::Accounts;
use crate::directory::{Directory, DirectoryError};
use crate::keys::{FetchError, InstallError, KeyFetcher, KeyInstaller};

pub type Result<T> = std::result::Result<T, ProvisionError>;

/// Steps of a provisioning request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Lookups outside of account creation.
    Reading,
    CheckingDuplicate,
    Allocating,
    Persisting,
    FetchingKeys,
    InstallingKeys,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Reading => "reading",
            Stage::CheckingDuplicate => "checking_duplicate",
            Stage::Allocating => "allocating",
            Stage::Persisting => "persisting",
            Stage::FetchingKeys => "fetching_keys",
            Stage::InstallingKeys => "installing_keys",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by [`AccountProvisioner`].
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("user {0} already exists")]
    Duplicate(String),
    #[error("user {0} not found")]
    NotFound(String),
    #[error("no uid number left above {floor}")]
    Exhausted { floor: u32 },
    #[error("directory request failed while {stage}: {source}")]
    Directory {
        stage: Stage,
        source: DirectoryError,
    },

    #[error("keys of {uid} were not fetched: {source}", uid = .account.uid)]
    KeyFetch {
        account: Box<Account>,
        source: FetchError,
    },
    #[error("keys of {uid} were not installed: {source}", uid = .account.uid)]
    KeyInstall {
        account: Box<Account>,
        source: InstallError,
    },
}

impl ProvisionError {
    /// Account left in the directory without keys, if any.
    pub fn partial_account(&self) -> Option<&Account> {
        match self {
            ProvisionError::KeyFetch { account, .. }
            | ProvisionError::KeyInstall { account, .. } => Some(account),
            _ => None,
        }
    }

    /// Stage the request failed in.
    pub fn stage(&self) -> Stage {
        match self {
            ProvisionError::Duplicate(_) => Stage::CheckingDuplicate,
            ProvisionError::NotFound(_) => Stage::Reading,
            ProvisionError::Exhausted { .. } => Stage::Allocating,
            ProvisionError::Directory { stage, .. } => *stage,
            ProvisionError::KeyFetch { .. } => Stage::FetchingKeys,
            ProvisionError::KeyInstall { .. } => Stage::InstallingKeys,
        }
    }

    fn outcome(&self) -> &'static str {
        match self {
            ProvisionError::Duplicate(_) => "duplicate",
            ProvisionError::KeyFetch { .. } => "created_without_keys",
            ProvisionError::KeyInstall { .. } => "created_without_keys",
            _ => "failed",
        }
    }

    /// Map a directory failure raised during `stage`.
    fn directory(stage: Stage) -> impl Fn(DirectoryError) -> Self {
        move |err| match err {
            DirectoryError::NotFound(uid) => ProvisionError::NotFound(uid),
            DirectoryError::AlreadyExists(uid) => ProvisionError::Duplicate(uid),
            source => ProvisionError::Directory { stage, source },
        }
    }
}

impl From<DirectoryError> for ProvisionError {
    fn from(err: DirectoryError) -> Self {
        ProvisionError::directory(Stage::Reading)(err)
    }
}

/// Creates accounts on a [`Directory`] and installs their SSH keys.
#[derive(Clone)]
pub struct AccountProvisioner {
    directory: Arc<dyn Directory>,
    fetcher: Arc<dyn KeyFetcher>,
    installer: Arc<dyn KeyInstaller>,
    allocator: UidAllocator,
    accounts: Arc<Accounts>,
    directory_timeout: Duration,
}

impl AccountProvisioner {
    /// Create a new [`AccountProvisioner`].
    pub fn new(
        directory: Arc<dyn Directory>,
        fetcher: Arc<dyn KeyFetcher>,
        installer: Arc<dyn KeyInstaller>,
        accounts: Accounts,
    ) -> Self {
        Self {
            directory,
            fetcher,
            installer,
            allocator: UidAllocator::new(accounts.uid_floor),
            accounts: Arc::new(accounts),
            directory_timeout: Duration::from_secs(10),
        }
    }

    /// Bound every directory call.
    pub fn directory_timeout(mut self, timeout: Duration) -> Self {
        self.directory_timeout = timeout;
        self
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = std::result::Result<T, DirectoryError>>,
    ) -> std::result::Result<T, DirectoryError> {
        tokio::time::timeout(self.directory_timeout, call)
            .await
            .map_err(|_| DirectoryError::Timeout(self.directory_timeout))?
    }

    /// Create the directory entry of `uid` then install its keys.
    #[tracing::instrument(skip(self, given_name, sn, key_spec))]
    pub async fn create(
        &self,
        uid: &str,
        given_name: &str,
        sn: &str,
        key_spec: &str,
    ) -> Result<Account> {
        let result = self.try_create(uid, given_name, sn, key_spec).await;

        let outcome = match &result {
            Ok(_) => "created",
            Err(err) => err.outcome(),
        };
        metrics::counter!("accounts_provisioned_total", "outcome" => outcome)
            .increment(1);

        result
    }

    async fn try_create(
        &self,
        uid: &str,
        given_name: &str,
        sn: &str,
        key_spec: &str,
    ) -> Result<Account> {
        // The pre-check only spares a uid number, `add` stays authoritative.
        debug!(stage = %Stage::CheckingDuplicate);
        match self.bounded(self.directory.find_by_uid(uid)).await {
            Ok(_) => return Err(ProvisionError::Duplicate(uid.to_owned())),
            Err(DirectoryError::NotFound(_)) => (),
            Err(err) => return Err(ProvisionError::directory(Stage::CheckingDuplicate)(err)),
        }

        debug!(stage = %Stage::Allocating);
        let existing = self
            .bounded(self.directory.list_all())
            .await
            .map_err(ProvisionError::directory(Stage::Allocating))?;
        let uid_number = self.allocator.next_uid_number(&existing).ok_or(
            ProvisionError::Exhausted {
                floor: self.allocator.floor(),
            },
        )?;

        debug!(stage = %Stage::Persisting, uid_number);
        let account = Account {
            uid: uid.to_owned(),
            given_name: given_name.to_owned(),
            sn: sn.to_owned(),
            uid_number,
            gid_number: self.accounts.gid_number,
            home_directory: self.accounts.home_directory(uid),
            login_shell: self.accounts.login_shell.clone(),
        };
        self.bounded(self.directory.add(&account))
            .await
            .map_err(ProvisionError::directory(Stage::Persisting))?;
        info!(uid_number, "account created");

        self.provision_keys(account, key_spec).await
    }

    /// Fetch and install keys of an existing account.
    #[tracing::instrument(skip(self, key_spec))]
    pub async fn install_keys(&self, uid: &str, key_spec: &str) -> Result<Account> {
        let account = self.bounded(self.directory.find_by_uid(uid)).await?;
        self.provision_keys(account, key_spec).await
    }

    async fn provision_keys(&self, account: Account, key_spec: &str) -> Result<Account> {
        debug!(stage = %Stage::FetchingKeys);
        let keys = match self.fetcher.resolve(key_spec).await {
            Ok(keys) => keys,
            Err(source) => {
                warn!(error = %source, "account left without keys");
                return Err(ProvisionError::KeyFetch {
                    account: Box::new(account),
                    source,
                });
            },
        };

        if keys.is_empty() {
            debug!(stage = %Stage::Done, "no key to install");
            return Ok(account);
        }

        debug!(stage = %Stage::InstallingKeys, keys = keys.len());
        if let Err(source) = self.installer.install(&account, &keys).await {
            warn!(error = %source, "account left without keys");
            return Err(ProvisionError::KeyInstall {
                account: Box::new(account),
                source,
            });
        }

        debug!(stage = %Stage::Done);
        Ok(account)
    }

    /// Find an account using its `uid`.
    pub async fn get(&self, uid: &str) -> Result<Account> {
        Ok(self.bounded(self.directory.find_by_uid(uid)).await?)
    }

    /// Every account of the directory, in no particular order.
    pub async fn list_all(&self) -> Result<Vec<Account>> {
        Ok(self.bounded(self.directory.list_all()).await?)
    }

    /// Release the directory connection.
    pub async fn shutdown(&self) -> std::result::Result<(), DirectoryError> {
        self.directory.close().await
    }
}
