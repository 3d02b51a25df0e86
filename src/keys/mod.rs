//! SSH public keys: where they come from and how they are installed.
//!
//! A key spec is either an `http(s)` URL of a remote key list, such as
//! `https://github.com/<user>.keys`, or literal `authorized_keys` lines.

mod fetcher;
mod installer;

pub use fetcher::*;
pub use installer::*;

use std::sync::LazyLock;

use async_trait::async_trait;
use regex_lite::Regex;
use url::Url;

static PUBLIC_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(ssh-rsa|ssh-dss|ssh-ed25519|ecdsa-sha2-nistp(256|384|521)|sk-ssh-ed25519@openssh\.com|sk-ecdsa-sha2-nistp256@openssh\.com)\s+[A-Za-z0-9+/]+={0,3}(\s+.*)?$",
    )
    .expect("public key pattern is valid")
});

/// Resolves a key spec into public key lines.
#[async_trait]
pub trait KeyFetcher: Send + Sync {
    async fn resolve(&self, spec: &str) -> Result<Vec<String>, FetchError>;
}

/// Returns the URL of a remote key list, if `spec` is one.
pub fn remote_url(spec: &str) -> Option<Url> {
    let spec = spec.trim();
    if spec.contains(char::is_whitespace) {
        return None;
    }

    Url::parse(spec)
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https"))
}

/// Split key material into lines, dropping blank ones.
///
/// Lines are kept as is: installers are sensitive to the exact encoding.
pub fn split_keys(material: &str) -> Vec<String> {
    material
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::to_owned)
        .collect()
}

/// Whether `line` looks like `<algorithm> <base64> [comment]`.
pub fn is_public_key(line: &str) -> bool {
    PUBLIC_KEY.is_match(line)
}

/// Raw `authorized_keys` content handed to installers.
pub fn authorized_keys(keys: &[String]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(keys.iter().map(|k| k.len() + 1).sum());
    for key in keys {
        bytes.extend_from_slice(key.as_bytes());
        bytes.push(b'\n');
    }
    bytes
}
