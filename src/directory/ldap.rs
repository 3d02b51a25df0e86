//! LDAP support.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use ldap3::{
    Ldap as Ldap3, LdapConnAsync, LdapConnSettings, Scope, SearchEntry,
    dn_escape, ldap_escape,
};

use super::{Directory, DirectoryError, Result};
use crate::account::Account;

/// `entryAlreadyExists` result code.
const ENTRY_ALREADY_EXISTS: u32 = 68;
const OBJECT_CLASSES: [&str; 5] = [
    "top",
    "person",
    "organizationalPerson",
    "inetOrgPerson",
    "posixAccount",
];
const ATTRIBUTES: [&str; 7] = [
    "uid",
    "givenName",
    "sn",
    "uidNumber",
    "gidNumber",
    "homeDirectory",
    "loginShell",
];

#[derive(Debug, Clone)]
pub struct LdapConfig {
    pub addr: String,
    /// Entries live right under this DN, as `uid={uid},{users_dn}`.
    pub users_dn: String,
    /// Searches cover this whole subtree when set.
    pub base_dn: Option<String>,
    pub timeout: Duration,
}

impl LdapConfig {
    /// Create a new [`LdapConfig`].
    pub fn new(
        addr: impl Into<String>,
        users_dn: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            addr: addr.into(),
            users_dn: users_dn.into(),
            base_dn: None,
            timeout,
        }
    }

    /// Search accounts in the whole `base_dn` subtree.
    pub fn base_dn(mut self, base_dn: Option<impl Into<String>>) -> Self {
        self.base_dn = base_dn.map(Into::into);
        self
    }

    /// Base and scope of account searches.
    pub fn search_base(&self) -> (&str, Scope) {
        match &self.base_dn {
            Some(base_dn) => (base_dn.as_str(), Scope::Subtree),
            None => (self.users_dn.as_str(), Scope::OneLevel),
        }
    }

    /// Configure LDAP `dn` for user identifier.
    pub fn user_dn(&self, uid: &str) -> String {
        format!("uid={},{}", dn_escape(uid), self.users_dn)
    }
}

/// [`Directory`] backed by an LDAP server.
///
/// A single bound connection is shared, each call works on a clone of the
/// handle.
#[derive(Clone, Debug)]
pub struct LdapDirectory {
    conn: Ldap3,
    config: LdapConfig,
}

impl LdapDirectory {
    /// Create a new [`Ldap3`] connection.
    pub async fn connect(
        config: LdapConfig,
        bind_dn: Option<&str>,
        bind_password: Option<&str>,
    ) -> Result<Self> {
        let settings = LdapConnSettings::new().set_conn_timeout(config.timeout);
        let (handle, mut conn) =
            LdapConnAsync::with_settings(settings, &config.addr).await?;
        ldap3::drive!(handle);

        if let Some(dn) = bind_dn {
            let password = bind_password.ok_or(DirectoryError::MissingPassword)?;
            conn.simple_bind(dn, password).await?.success()?;
        }

        tracing::info!(address = %config.addr, users_dn = %config.users_dn, "ldap connected");

        Ok(Self { conn, config })
    }

    async fn search(&self, filter: &str) -> Result<Vec<Account>> {
        let (base, scope) = self.config.search_base();
        let mut conn = self.conn.clone();
        let (entries, _) = conn
            .with_timeout(self.config.timeout)
            .search(base, scope, filter, ATTRIBUTES.to_vec())
            .await?
            .success()?;

        entries
            .into_iter()
            .map(|entry| account_from_entry(SearchEntry::construct(entry)))
            .collect()
    }
}

#[async_trait]
impl Directory for LdapDirectory {
    async fn list_all(&self) -> Result<Vec<Account>> {
        self.search("(objectClass=posixAccount)").await
    }

    async fn find_by_uid(&self, uid: &str) -> Result<Account> {
        let filter = format!("(&(objectClass=posixAccount)(uid={}))", ldap_escape(uid));

        self.search(&filter)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DirectoryError::NotFound(uid.to_owned()))
    }

    async fn add(&self, account: &Account) -> Result<()> {
        let dn = self.config.user_dn(&account.uid);
        let cn = account.common_name();
        let uid_number = account.uid_number.to_string();
        let gid_number = account.gid_number.to_string();
        // `sn` is mandatory for `person` and cannot be empty.
        let sn = match account.sn.as_str() {
            "" => account.uid.as_str(),
            sn => sn,
        };

        let attrs: Vec<(&str, HashSet<&str>)> = [
            ("objectClass", HashSet::from(OBJECT_CLASSES)),
            ("uid", HashSet::from([account.uid.as_str()])),
            ("cn", HashSet::from([cn.as_str()])),
            ("sn", HashSet::from([sn])),
            ("givenName", HashSet::from([account.given_name.as_str()])),
            ("uidNumber", HashSet::from([uid_number.as_str()])),
            ("gidNumber", HashSet::from([gid_number.as_str()])),
            ("homeDirectory", HashSet::from([account.home_directory.as_str()])),
            ("loginShell", HashSet::from([account.login_shell.as_str()])),
        ]
        .into_iter()
        .filter(|(_, values)| !values.contains(""))
        .collect();

        let mut conn = self.conn.clone();
        let result = conn.with_timeout(self.config.timeout).add(&dn, attrs).await?;
        if result.rc == ENTRY_ALREADY_EXISTS {
            return Err(DirectoryError::AlreadyExists(account.uid.clone()));
        }
        result.success()?;

        tracing::debug!(%dn, "ldap entry added");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.unbind().await?;
        Ok(())
    }
}

fn account_from_entry(entry: SearchEntry) -> Result<Account> {
    let first = |attribute: &str| {
        entry
            .attrs
            .get(attribute)
            .and_then(|values| values.first())
            .cloned()
    };
    let number = |attribute: &'static str| {
        first(attribute)
            .and_then(|value| value.parse::<u32>().ok())
            .ok_or_else(|| DirectoryError::InvalidEntry {
                dn: entry.dn.clone(),
                attribute,
            })
    };

    Ok(Account {
        uid: first("uid").ok_or_else(|| DirectoryError::InvalidEntry {
            dn: entry.dn.clone(),
            attribute: "uid",
        })?,
        given_name: first("givenName").unwrap_or_default(),
        sn: first("sn").unwrap_or_default(),
        uid_number: number("uidNumber")?,
        gid_number: number("gidNumber")?,
        home_directory: first("homeDirectory").unwrap_or_default(),
        login_shell: first("loginShell").unwrap_or_default(),
    })
}
