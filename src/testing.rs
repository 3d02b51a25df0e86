//! Test doubles for provisioning collaborators.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::account::{Account, AccountProvisioner};
use crate::config::{Accounts, Configuration};
use crate::directory::{self, Directory, DirectoryError, MemoryDirectory};
use crate::keys::{
    FetchError, HttpKeyFetcher, InstallError, KeyFetcher, KeyInstaller, authorized_keys,
    remote_url, split_keys,
};
use crate::AppState;

/// Serves known remote key lists, and literal keys as is.
pub struct FakeFetcher {
    remote: HashMap<String, Vec<String>>,
    delay: Duration,
}

impl FakeFetcher {
    /// Answer after `delay`.
    pub fn delayed(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }
}

impl Default for FakeFetcher {
    fn default() -> Self {
        let keys = vec![
            "ssh-rsa AAAAB3NzaC1yc2 matt@home".to_owned(),
            "ssh-ed25519 AAAAC3NzaC1lZD matt@home".to_owned(),
        ];

        Self {
            remote: HashMap::from([("https://github.com/milliams.keys".to_owned(), keys)]),
            delay: Duration::ZERO,
        }
    }
}

#[async_trait]
impl KeyFetcher for FakeFetcher {
    async fn resolve(&self, spec: &str) -> Result<Vec<String>, FetchError> {
        tokio::time::sleep(self.delay).await;
        match remote_url(spec) {
            Some(url) => self
                .remote
                .get(url.as_str())
                .cloned()
                .ok_or(FetchError::Status { url, status: 404 }),
            None => Ok(split_keys(spec)),
        }
    }
}

/// Records the input every install was given.
#[derive(Default)]
pub struct RecordingInstaller {
    calls: Mutex<Vec<(String, Vec<u8>)>>,
    fail: bool,
    delay: Duration,
}

impl RecordingInstaller {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// Answer after `delay`.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// `(uid, stdin)` of each call.
    pub fn calls(&self) -> Vec<(String, Vec<u8>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl KeyInstaller for RecordingInstaller {
    async fn install(&self, account: &Account, keys: &[String]) -> Result<(), InstallError> {
        self.calls
            .lock()
            .unwrap()
            .push((account.uid.clone(), authorized_keys(keys)));
        tokio::time::sleep(self.delay).await;

        if self.fail {
            return Err(InstallError::Failed {
                code: Some(1),
                stderr: "permission denied".into(),
            });
        }
        Ok(())
    }
}

/// In-memory directory answering every call after `delay`.
#[derive(Default)]
pub struct SlowDirectory {
    inner: MemoryDirectory,
    delay: Duration,
}

impl SlowDirectory {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryDirectory::default(),
            delay,
        }
    }
}

#[async_trait]
impl Directory for SlowDirectory {
    async fn list_all(&self) -> directory::Result<Vec<Account>> {
        tokio::time::sleep(self.delay).await;
        self.inner.list_all().await
    }

    async fn find_by_uid(&self, uid: &str) -> directory::Result<Account> {
        tokio::time::sleep(self.delay).await;
        self.inner.find_by_uid(uid).await
    }

    async fn add(&self, account: &Account) -> directory::Result<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.add(account).await
    }
}

/// Directory losing the race on `add`: lookups see nothing, insertion finds
/// the entry already there.
pub struct RacyDirectory;

#[async_trait]
impl Directory for RacyDirectory {
    async fn list_all(&self) -> directory::Result<Vec<Account>> {
        Ok(Vec::new())
    }

    async fn find_by_uid(&self, uid: &str) -> directory::Result<Account> {
        Err(DirectoryError::NotFound(uid.to_owned()))
    }

    async fn add(&self, account: &Account) -> directory::Result<()> {
        Err(DirectoryError::AlreadyExists(account.uid.clone()))
    }
}

/// Provisioner over an empty in-memory directory.
pub fn fake_provisioner() -> (AccountProvisioner, Arc<RecordingInstaller>) {
    let installer = Arc::new(RecordingInstaller::default());
    let provisioner = AccountProvisioner::new(
        Arc::new(MemoryDirectory::default()),
        Arc::new(FakeFetcher::default()),
        installer.clone(),
        Accounts::default(),
    );
    (provisioner, installer)
}

/// Application state over an empty in-memory directory.
///
/// Literal keys go through the real [`HttpKeyFetcher`].
pub fn state() -> (AppState, Arc<RecordingInstaller>) {
    let config = Configuration::default();
    let installer = Arc::new(RecordingInstaller::default());
    let fetcher = HttpKeyFetcher::new(config.keys.fetch_timeout(), config.keys.max_keys).unwrap();

    let provisioner = AccountProvisioner::new(
        Arc::new(MemoryDirectory::default()),
        Arc::new(fetcher),
        installer.clone(),
        config.accounts.clone(),
    );

    let state = AppState {
        config: Arc::new(config),
        provisioner,
        metrics: None,
    };
    (state, installer)
}
