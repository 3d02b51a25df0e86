//! HTTP surface.
pub mod status;
pub mod users;

use std::sync::LazyLock;

use axum::extract::{FromRequest, Request};
use axum::http::header;
use axum::{Form, Json};
use regex_lite::Regex;
use serde::de::DeserializeOwned;
use validator::{Validate, ValidationError};

use crate::ServerError;
use crate::keys::{is_public_key, remote_url, split_keys};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

static POSIX_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z_][a-z0-9_.-]*$").expect("posix name pattern is valid")
});

/// Validated body, read as a form or as JSON depending on `Content-Type`.
pub struct Valid<T>(pub T);

impl<S, T> FromRequest<S> for Valid<T>
where
    T: DeserializeOwned + Validate + Send,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_form = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with(FORM_CONTENT_TYPE));

        let value = if is_form {
            Form::<T>::from_request(req, state).await?.0
        } else {
            Json::<T>::from_request(req, state).await?.0
        };

        value.validate()?;
        Ok(Self(value))
    }
}

/// `uid` must be a lowercase POSIX user name.
pub fn validate_uid(uid: &str) -> Result<(), ValidationError> {
    if POSIX_NAME.is_match(uid) {
        Ok(())
    } else {
        Err(ValidationError::new("uid"))
    }
}

/// Keys are a remote key list URL, or one or more public key lines.
pub fn validate_keys(keys: &str) -> Result<(), ValidationError> {
    if remote_url(keys).is_some() {
        return Ok(());
    }

    let lines = split_keys(keys);
    if !lines.is_empty() && lines.iter().all(|line| is_public_key(line)) {
        Ok(())
    } else {
        Err(ValidationError::new("keys"))
    }
}
