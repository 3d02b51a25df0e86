//! Configuration manager for mgmt.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::account::DEFAULT_UID_FLOOR;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_DIRECTORY_TIMEOUT: u64 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Instance name.
    pub name: String,
    /// Listening socket address.
    pub address: String,
    #[serde(skip_deserializing)]
    pub version: String,
    #[serde(skip)]
    path: PathBuf,
    /// Related to LDAP3 configuration.
    /// Accounts are kept in memory when missing.
    #[serde(skip_serializing)]
    pub ldap: Option<Ldap>,
    /// Attributes given to new accounts.
    pub accounts: Accounts,
    /// Related to SSH keys retrieval and installation.
    pub keys: Keys,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_owned(),
            address: "0.0.0.0:8080".to_owned(),
            version: VERSION.to_owned(),
            path: PathBuf::default(),
            ldap: None,
            accounts: Accounts::default(),
            keys: Keys::default(),
        }
    }
}

/// LDAP configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ldap {
    /// `ldap://` or `ldaps://` URL, scheme defaults to `ldap`.
    pub address: String,
    /// Admin DN credential to connect.
    pub user: Option<String>,
    /// Password credential to connect.
    pub password: Option<String>,
    /// Subtree searched for existing accounts, `users_dn` when missing.
    pub base_dn: Option<String>,
    /// Organization unit (OU) holding accounts.
    pub users_dn: String,
    /// Connection and request timeout, in seconds.
    pub timeout: Option<u64>,
}

impl Ldap {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.unwrap_or(DEFAULT_DIRECTORY_TIMEOUT))
    }
}

/// Account attributes configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Accounts {
    /// First `uidNumber` handed out is `uid_floor + 1`.
    pub uid_floor: u32,
    pub gid_number: u32,
    /// Home directories are `{home_root}/{uid}`.
    pub home_root: String,
    pub login_shell: String,
}

impl Default for Accounts {
    fn default() -> Self {
        Self {
            uid_floor: DEFAULT_UID_FLOOR,
            gid_number: 100,
            home_root: "/mnt/shared/home".to_owned(),
            login_shell: "/bin/bash".to_owned(),
        }
    }
}

impl Accounts {
    pub fn home_directory(&self, uid: &str) -> String {
        format!("{}/{uid}", self.home_root.trim_end_matches('/'))
    }
}

/// SSH keys configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Keys {
    /// Installer argv, the account `uid` is appended.
    #[serde(skip_serializing)]
    pub installer: Vec<String>,
    /// Remote key list download timeout, in seconds.
    pub fetch_timeout: u64,
    /// Installer run timeout, in seconds.
    pub install_timeout: u64,
    /// Maximum keys per account.
    pub max_keys: usize,
}

impl Default for Keys {
    fn default() -> Self {
        Self {
            installer: Vec::new(),
            fetch_timeout: 10,
            install_timeout: 30,
            max_keys: 100,
        }
    }
}

impl Keys {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout)
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout)
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Time a single directory call may take.
    pub fn directory_timeout(&self) -> Duration {
        self.ldap
            .as_ref()
            .map(Ldap::timeout)
            .unwrap_or(Duration::from_secs(DEFAULT_DIRECTORY_TIMEOUT))
    }

    /// Time a whole HTTP request may take.
    ///
    /// Account creation makes up to three directory calls before keys are
    /// fetched and installed, the request must outlive all of them.
    pub fn request_timeout(&self) -> Duration {
        self.directory_timeout() * 3
            + self.keys.fetch_timeout()
            + self.keys.install_timeout()
            + Duration::from_secs(5)
    }

    /// Normalizes an LDAP URL by ensuring it starts with a valid scheme
    /// (`ldap` or `ldaps`).
    fn normalize_ldap_url(&self, url: &str) -> Result<String, url::ParseError> {
        let url_with_scheme =
            if url.starts_with("ldap://") || url.starts_with("ldaps://") {
                url.to_string()
            } else {
                format!("ldap://{url}")
            };

        let parsed_url = Url::parse(&url_with_scheme)?;
        Ok(parsed_url.to_string())
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location.
    pub fn read(self) -> Result<Arc<Self>, url::ParseError> {
        let default_path = PathBuf::from(DEFAULT_CONFIG_PATH);
        let file_path = if self.path.is_file() {
            &self.path
        } else {
            &default_path
        };

        match File::open(file_path) {
            Ok(file) => match serde_yaml::from_reader(file) {
                Ok(config) => self.normalize(config).map(Arc::new),
                Err(err) => Ok(Arc::new(self.error(err))),
            },
            Err(err) => Ok(Arc::new(self.error(err))),
        }
    }

    /// Parse configuration from YAML text.
    pub fn read_str(self, yaml: &str) -> Result<Arc<Self>, url::ParseError> {
        match serde_yaml::from_str(yaml) {
            Ok(config) => self.normalize(config).map(Arc::new),
            Err(err) => Ok(Arc::new(self.error(err))),
        }
    }

    fn normalize(&self, mut config: Configuration) -> Result<Self, url::ParseError> {
        // set app version.
        config.version = VERSION.to_owned();
        config.path = self.path.clone();

        if let Some(ldap) = config.ldap.as_mut() {
            ldap.address = self.normalize_ldap_url(&ldap.address)?;
        }

        Ok(config)
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, "`config.yaml` cannot be loaded, using defaults");
        Self {
            path: self.path.clone(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Configuration::default();
        assert_eq!(config.accounts.uid_floor, 10_000);
        assert_eq!(config.accounts.home_directory("matt"), "/mnt/shared/home/matt");
        assert!(config.ldap.is_none());
        assert_eq!(config.directory_timeout(), Duration::from_secs(10));
        assert_eq!(config.request_timeout(), Duration::from_secs(75));
    }

    #[test]
    fn test_read_str() {
        let yaml = r#"
name: citc
address: 127.0.0.1:3000
ldap:
  address: mgmt.citc.local
  user: cn=Directory Manager
  password: secret
  base_dn: dc=citc,dc=local
  users_dn: ou=People,dc=citc,dc=local
  timeout: 4
accounts:
  uid_floor: 20000
  home_root: /home/
keys:
  installer: ["sudo", "/usr/local/sbin/install-keys"]
  fetch_timeout: 3
"#;
        let config = Configuration::default().read_str(yaml).unwrap();

        assert_eq!(config.name, "citc");
        assert_eq!(config.version, VERSION);
        assert_eq!(config.accounts.uid_floor, 20000);
        assert_eq!(config.accounts.gid_number, 100);
        assert_eq!(config.accounts.home_directory("matt"), "/home/matt");
        assert_eq!(config.keys.installer.len(), 2);
        assert_eq!(config.keys.fetch_timeout(), Duration::from_secs(3));
        assert_eq!(config.keys.install_timeout, 30);

        let ldap = config.ldap.as_ref().unwrap();
        assert_eq!(ldap.address, "ldap://mgmt.citc.local");
        assert_eq!(ldap.base_dn.as_deref(), Some("dc=citc,dc=local"));
        assert_eq!(ldap.timeout(), Duration::from_secs(4));
    }

    #[test]
    fn test_request_outlives_directory_calls() {
        let yaml = "ldap:\n  address: localhost\n  users_dn: ou=People\n  timeout: 20\nkeys:\n  fetch_timeout: 1\n  install_timeout: 0\n";
        let config = Configuration::default().read_str(yaml).unwrap();

        assert_eq!(config.directory_timeout(), Duration::from_secs(20));
        assert_eq!(config.request_timeout(), Duration::from_secs(66));
        assert!(
            config.request_timeout()
                > config.directory_timeout() * 3
                    + config.keys.fetch_timeout()
                    + config.keys.install_timeout()
        );
    }

    #[test]
    fn test_invalid_yaml_falls_back() {
        let config = Configuration::default().read_str("keys: [").unwrap();
        assert_eq!(config.address, "0.0.0.0:8080");
    }

    #[test]
    fn test_invalid_ldap_address() {
        let yaml = "ldap:\n  address: 'ldap://[::1'\n  users_dn: ou=People\n";
        assert!(Configuration::default().read_str(yaml).is_err());
    }
}
