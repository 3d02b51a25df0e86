//! Accounts as stored in the directory.
mod allocator;
mod provisioner;

pub use allocator::*;
pub use provisioner::*;

use serde::{Deserialize, Serialize};

/// Directory entry of a user.
///
/// SSH keys are not part of the entry: they only flow through the
/// [`KeyInstaller`](crate::keys::KeyInstaller) at provisioning time.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub uid: String,
    pub given_name: String,
    pub sn: String,
    pub uid_number: u32,
    pub gid_number: u32,
    pub home_directory: String,
    pub login_shell: String,
}

impl Account {
    /// Full name used as `cn`, falling back to `uid` when no name is known.
    pub fn common_name(&self) -> String {
        let name = format!("{} {}", self.given_name, self.sn);
        match name.trim() {
            "" => self.uid.clone(),
            name => name.to_owned(),
        }
    }
}
