//! Remote key lists over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use super::{KeyFetcher, is_public_key, remote_url, split_keys};

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Errors raised while resolving a key spec.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("cannot fetch {url}: {source}")]
    Request { url: Url, source: reqwest::Error },
    #[error("{url} answered with status {status}")]
    Status { url: Url, status: u16 },
    #[error("line {line} of {origin} is not a public key")]
    Malformed { origin: String, line: usize },
    #[error("{count} keys found, at most {max} are accepted")]
    TooMany { count: usize, max: usize },
    #[error("cannot build http client: {0}")]
    Client(#[source] reqwest::Error),
}

/// [`KeyFetcher`] downloading remote key lists with [`reqwest`].
#[derive(Debug, Clone)]
pub struct HttpKeyFetcher {
    client: reqwest::Client,
    max_keys: usize,
}

impl HttpKeyFetcher {
    /// Create a new [`HttpKeyFetcher`].
    pub fn new(timeout: Duration, max_keys: usize) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(FetchError::Client)?;

        Ok(Self { client, max_keys })
    }

    async fn download(&self, url: Url) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|source| FetchError::Request {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| FetchError::Request {
                url: url.clone(),
                source,
            })?;

        // Keys are installed byte for byte, never decoded lossily.
        String::from_utf8(body.to_vec()).map_err(|err| {
            let valid = &err.as_bytes()[..err.utf8_error().valid_up_to()];
            FetchError::Malformed {
                origin: url.to_string(),
                line: valid.iter().filter(|&&byte| byte == b'\n').count() + 1,
            }
        })
    }
}

#[async_trait]
impl KeyFetcher for HttpKeyFetcher {
    async fn resolve(&self, spec: &str) -> Result<Vec<String>, FetchError> {
        let (origin, keys) = match remote_url(spec) {
            Some(url) => {
                tracing::debug!(%url, "fetching remote keys");
                (url.to_string(), split_keys(&self.download(url).await?))
            },
            None => ("submitted keys".to_owned(), split_keys(spec)),
        };

        if let Some(line) = keys.iter().position(|key| !is_public_key(key)) {
            return Err(FetchError::Malformed {
                origin,
                line: line + 1,
            });
        }

        if keys.len() > self.max_keys {
            return Err(FetchError::TooMany {
                count: keys.len(),
                max: self.max_keys,
            });
        }

        Ok(keys)
    }
}
