//! Materialize keys through an external command.

use std::io;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::authorized_keys;
use crate::account::Account;

/// Errors raised while installing keys.
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("no installer command configured")]
    NoCommand,
    #[error("cannot run `{program}`: {source}")]
    Spawn { program: String, source: io::Error },
    #[error("installer i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("installer did not finish within {timeout:?}")]
    Timeout { timeout: Duration },
    #[error("installer exited with {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },
}

/// Installs public keys for an account.
#[async_trait]
pub trait KeyInstaller: Send + Sync {
    async fn install(&self, account: &Account, keys: &[String]) -> Result<(), InstallError>;
}

/// [`KeyInstaller`] running `<command> <uid>` with the keys on stdin.
///
/// Zero exit status means success. The child is killed when the timeout
/// expires.
#[derive(Debug, Clone)]
pub struct CommandInstaller {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandInstaller {
    /// Create a new [`CommandInstaller`] from an argv.
    pub fn new(command: &[String], timeout: Duration) -> Result<Self, InstallError> {
        let (program, args) = command.split_first().ok_or(InstallError::NoCommand)?;

        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout,
        })
    }
}

#[async_trait]
impl KeyInstaller for CommandInstaller {
    async fn install(&self, account: &Account, keys: &[String]) -> Result<(), InstallError> {
        let input = authorized_keys(keys);

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(&account.uid)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| InstallError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let run = async move {
            if let Some(mut stdin) = child.stdin.take() {
                // A command may exit without reading its input.
                match stdin.write_all(&input).await {
                    Err(err) if err.kind() != io::ErrorKind::BrokenPipe => return Err(err),
                    _ => (),
                }
            }
            child.wait_with_output().await
        };

        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| InstallError::Timeout {
                timeout: self.timeout,
            })??;

        if !output.status.success() {
            return Err(InstallError::Failed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }

        tracing::info!(uid = %account.uid, keys = keys.len(), "keys installed");
        Ok(())
    }
}
