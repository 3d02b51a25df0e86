//! Users-related HTTP API.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::account::Account;
use crate::error::Result;
use crate::router::Valid;

/// Account creation form.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct Body {
    #[validate(
        length(min = 1, max = 32, message = "User name must be 1 to 32 characters."),
        custom(
            function = "crate::router::validate_uid",
            message = "User name must be lowercase letters, digits, `_`, `.` or `-`."
        )
    )]
    pub uid: String,
    #[serde(default)]
    #[validate(length(max = 64))]
    pub given_name: String,
    #[serde(default)]
    #[validate(length(max = 64))]
    pub sn: String,
    #[validate(custom(
        function = "crate::router::validate_keys",
        message = "Keys must be a URL or public keys, one per line."
    ))]
    pub keys: String,
}

/// Key re-installation form.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct KeysBody {
    #[validate(custom(
        function = "crate::router::validate_keys",
        message = "Keys must be a URL or public keys, one per line."
    ))]
    pub keys: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        // `GET /users` goes to `list`, `POST /users` goes to `create`.
        .route("/", get(list).post(create))
        // `GET /users/{uid}` goes to `find`.
        .route("/{uid}", get(find))
        // `PUT /users/{uid}/keys` goes to `install_keys`.
        .route("/{uid}/keys", put(install_keys))
}

/// Handler to list users, ordered by `uidNumber`.
async fn list(State(state): State<AppState>) -> Result<Json<Vec<Account>>> {
    let mut accounts = state.provisioner.list_all().await?;
    accounts.sort_by_key(|account| account.uid_number);
    Ok(Json(accounts))
}

/// Handler to get one user.
async fn find(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<Json<Account>> {
    Ok(Json(state.provisioner.get(&uid).await?))
}

/// Handler to create user.
async fn create(
    State(state): State<AppState>,
    Valid(body): Valid<Body>,
) -> Result<(StatusCode, Json<Account>)> {
    let account = state
        .provisioner
        .create(&body.uid, &body.given_name, &body.sn, &body.keys)
        .await?;

    Ok((StatusCode::CREATED, Json(account)))
}

/// Handler to install keys again, after a partial creation.
async fn install_keys(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Valid(body): Valid<KeysBody>,
) -> Result<StatusCode> {
    state.provisioner.install_keys(&uid, &body.keys).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::json;

    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::account::AccountProvisioner;
    use crate::config::Configuration;
    use crate::error::{ResponseError, USER_ALREADY_EXISTS};
    use crate::testing::{FakeFetcher, RecordingInstaller, SlowDirectory, state};
    use crate::*;

    const JSON: &str = "application/json";
    const FORM: &str = "application/x-www-form-urlencoded";

    async fn body<T: serde::de::DeserializeOwned>(
        response: axum::http::Response<axum::body::Body>,
    ) -> T {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_list_empty() {
        let (state, _) = state();
        let response =
            make_request(app(state), Method::GET, "/users", JSON, String::default()).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(body::<Vec<Account>>(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_create_handler() {
        let (state, installer) = state();
        let req_body = json!({
            "uid": "matt",
            "given_name": "Matt",
            "sn": "Williams",
            "keys": "ssh-ed25519 AAAAC3NzaC1lZD matt@home",
        });

        let response =
            make_request(app(state.clone()), Method::POST, "/users", JSON, req_body.to_string())
                .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let account: Account = body(response).await;
        assert_eq!(account.sn, "Williams");
        assert_eq!(account.uid_number, 10001);
        assert_eq!(installer.calls().len(), 1);

        let response =
            make_request(app(state), Method::GET, "/users/matt", JSON, String::default()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body::<Account>(response).await, account);
    }

    #[tokio::test]
    async fn test_form_create_user() {
        let (state, installer) = state();
        let form = "uid=foo&given_name=foo&sn=foo&keys=ssh-rsa+AAAAB3NzaC1yc2+matt%40home%0Assh-ed25519+AAAAC3NzaC1lZD+matt%40home";

        let response =
            make_request(app(state), Method::POST, "/users", FORM, form.to_owned()).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(body::<Account>(response).await.uid, "foo");

        let calls = installer.calls();
        assert_eq!(
            calls[0].1,
            b"ssh-rsa AAAAB3NzaC1yc2 matt@home\nssh-ed25519 AAAAC3NzaC1lZD matt@home\n"
        );
    }

    #[tokio::test]
    async fn test_form_duplicate_user() {
        let (state, _) = state();
        state.provisioner.create("foo", "", "", "").await.unwrap();

        let form = "uid=foo&given_name=foo&sn=foo&keys=http%3A%2F%2Ffoo";
        let response =
            make_request(app(state.clone()), Method::POST, "/users", FORM, form.to_owned())
                .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let error: ResponseError = body(response).await;
        let errors = error.errors.unwrap();
        assert_eq!(errors[0].field, "uid");
        assert_eq!(errors[0].message, USER_ALREADY_EXISTS);

        assert_eq!(state.provisioner.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_form() {
        let (state, installer) = state();
        let req_body = json!({ "uid": "", "keys": "not a key" });

        let response =
            make_request(app(state.clone()), Method::POST, "/users", JSON, req_body.to_string())
                .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let error: ResponseError = body(response).await;
        let fields: Vec<String> = error.errors.unwrap().into_iter().map(|e| e.field).collect();
        assert!(fields.contains(&"uid".to_owned()));
        assert!(fields.contains(&"keys".to_owned()));

        assert!(installer.calls().is_empty());
        assert!(state.provisioner.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_missing_user() {
        let (state, _) = state();
        let response =
            make_request(app(state), Method::GET, "/users/matt", JSON, String::default()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_ordered_by_uid_number() {
        let (state, _) = state();
        for uid in ["zoe", "adam", "matt"] {
            state.provisioner.create(uid, "", "", "").await.unwrap();
        }

        let response =
            make_request(app(state), Method::GET, "/users", JSON, String::default()).await;
        let accounts: Vec<Account> = body(response).await;
        let uids: Vec<&str> = accounts.iter().map(|a| a.uid.as_str()).collect();
        assert_eq!(uids, vec!["zoe", "adam", "matt"]);
    }

    #[tokio::test]
    async fn test_install_keys() {
        let (state, installer) = state();
        state.provisioner.create("matt", "", "", "").await.unwrap();

        let req_body = json!({ "keys": "ssh-ed25519 AAAAC3NzaC1lZD matt@home" });
        let response = make_request(
            app(state.clone()),
            Method::PUT,
            "/users/matt/keys",
            JSON,
            req_body.to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(installer.calls().len(), 1);

        let response = make_request(
            app(state),
            Method::PUT,
            "/users/ghost/keys",
            JSON,
            req_body.to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_creation_still_reports_missing_keys() {
        let config = Configuration::default();
        let installer = Arc::new(RecordingInstaller::failing().delayed(Duration::from_secs(29)));
        let provisioner = AccountProvisioner::new(
            Arc::new(SlowDirectory::new(Duration::from_secs(9))),
            Arc::new(FakeFetcher::delayed(Duration::from_secs(9))),
            installer.clone(),
            config.accounts.clone(),
        )
        .directory_timeout(config.directory_timeout());
        let state = AppState {
            config: Arc::new(config),
            provisioner,
            metrics: None,
        };

        let req_body = json!({
            "uid": "matt",
            "keys": "ssh-ed25519 AAAAC3NzaC1lZD matt@home",
        });
        let response =
            make_request(app(state.clone()), Method::POST, "/users", JSON, req_body.to_string())
                .await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let error: ResponseError = body(response).await;
        assert_eq!(error.instance.as_deref(), Some("/users/matt"));
        assert_eq!(installer.calls().len(), 1);
        assert_eq!(state.provisioner.get("matt").await.unwrap().uid_number, 10001);
    }
}
