//! Public server status.

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::AppState;

/// Structured configuration.
#[derive(Debug, Serialize, Deserialize)]
pub struct Status {
    pub version: String,
    pub name: String,
    pub directory: String,
}

/// Public server status (configuration).
pub async fn status(State(state): State<AppState>) -> Json<Status> {
    Json(Status {
        version: state.config.version.clone(),
        name: state.config.name.clone(),
        directory: if state.config.ldap.is_some() {
            "ldap".to_owned()
        } else {
            "memory".to_owned()
        },
    })
}
