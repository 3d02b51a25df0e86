//! Error handler for mgmt.

use axum::extract::rejection::{FormRejection, JsonRejection};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::{ValidationError, ValidationErrors};

use crate::account::ProvisionError;

pub type Result<T> = std::result::Result<T, ServerError>;

/// Message shown under the `uid` field when it is taken.
pub const USER_ALREADY_EXISTS: &str = "User already exists";

/// Enum representing server-side errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("validation error occurred")]
    Validation(#[from] ValidationErrors),

    #[error(transparent)]
    Json(#[from] JsonRejection),

    #[error(transparent)]
    Form(#[from] FormRejection),

    #[error(transparent)]
    Provision(#[from] ProvisionError),
}

/// Structure for detailed error responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct ResponseError {
    pub r#type: Option<String>,
    pub title: String,
    pub status: u16,
    pub detail: String,
    pub instance: Option<String>,
    pub errors: Option<Vec<FieldError>>,
}

impl ResponseError {
    /// Update error status code.
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code.as_u16();
        self
    }

    /// Update `title` field.
    pub fn title(mut self, title: &str) -> Self {
        self.title = title.into();
        self
    }

    /// Add detailed error.
    pub fn details(mut self, description: &str) -> Self {
        self.detail = description.into();
        self
    }

    /// Point at the resource the error is about.
    pub fn instance(mut self, path: String) -> Self {
        self.instance = Some(path);
        self
    }

    /// Automatically add errors field.
    pub fn errors(mut self, errors: &ValidationErrors) -> Self {
        self.errors = Some(parse_validation_errors(errors));
        self
    }

    /// Transform [`ResponseError`] into axum [`Response`].
    pub fn into_response(self) -> std::result::Result<Response, axum::http::Error> {
        if let Ok(body) = serde_json::to_string(&self) {
            Response::builder()
                .status(self.status)
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.into())
        } else {
            Ok(internal_server_error())
        }
    }
}

impl Default for ResponseError {
    fn default() -> Self {
        Self {
            r#type: None,
            title: "Internal server error.".to_owned(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            detail: String::default(),
            instance: None,
            errors: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

fn parse_validation_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    errors
        .field_errors()
        .iter()
        .flat_map(|(field, issues)| {
            issues.iter().map(move |issue| FieldError {
                field: field.to_string(),
                message: issue.to_string(),
            })
        })
        .collect()
}

/// Validation error rendered when the `uid` is taken.
pub fn already_exists() -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    errors.add(
        "uid",
        ValidationError::new("uid").with_message(USER_ALREADY_EXISTS.into()),
    );
    errors
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let response = ResponseError::default()
            .title("There were validation errors with your request.")
            .details(&self.to_string())
            .status(StatusCode::BAD_REQUEST);

        let response = match &self {
            ServerError::Validation(validation_errors) => response.errors(validation_errors),

            ServerError::Json(err) => response
                .title("Server error during data parsing.")
                .status(err.status()),

            ServerError::Form(err) => response
                .title("Server error during data parsing.")
                .status(err.status()),

            ServerError::Provision(ProvisionError::Duplicate(_)) => response
                .errors(&already_exists())
                .status(StatusCode::CONFLICT),

            ServerError::Provision(ProvisionError::NotFound(_)) => response
                .title("No such user.")
                .status(StatusCode::NOT_FOUND),

            ServerError::Provision(
                err @ (ProvisionError::KeyFetch { .. } | ProvisionError::KeyInstall { .. }),
            ) => {
                let uid = err
                    .partial_account()
                    .map(|account| account.uid.as_str())
                    .unwrap_or_default();
                tracing::warn!(%uid, error = %err, "user has no keys installed");

                response
                    .title("User created without SSH keys.")
                    .instance(format!("/users/{uid}"))
                    .status(StatusCode::BAD_GATEWAY)
            },

            ServerError::Provision(err) => {
                tracing::error!(error = %err, stage = %err.stage(), "provisioning failed");

                ResponseError::default()
            },
        };

        response
            .into_response()
            .unwrap_or_else(|_| internal_server_error())
    }
}

fn internal_server_error() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/json")
        .body(
            serde_json::json!({
                "type": null,
                "title": "Internal server error.",
                "status": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                "detail": null,
                "instance": null,
                "errors": null,
            })
            .to_string()
            .into(),
        )
        .unwrap_or_else(|_| Response::new("Internal server error".into()))
}
