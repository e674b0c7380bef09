use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info_span, Instrument};
use utoipa::ToSchema;

use crate::{lexauth::AppState, GIT_COMMIT_HASH};

const X_APP: HeaderName = HeaderName::from_static("x-app");

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreStatus {
    Ok,
    Error,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    database: StoreStatus,
}

/// `name:version:short-commit`, the value of the `X-App` header.
fn app_header(health: &Health) -> Option<HeaderValue> {
    let short_commit = health.commit.get(..7).unwrap_or_default();
    match HeaderValue::from_str(&format!("{}:{}:{short_commit}", health.name, health.version)) {
        Ok(value) => Some(value),
        Err(err) => {
            error!("Failed to build X-App header: {err}");
            None
        }
    }
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Store is reachable", body = Health),
        (status = 503, description = "Store is unreachable", body = Health)
    ),
    tag = "health"
)]
pub async fn health(method: Method, Extension(state): Extension<Arc<AppState>>) -> Response {
    let database = match state
        .service()
        .store()
        .ping()
        .instrument(info_span!("db.ping", db.operation = "PING"))
        .await
    {
        Ok(()) => StoreStatus::Ok,
        Err(err) => {
            error!("Store ping failed: {err:#}");
            StoreStatus::Error
        }
    };

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database,
    };
    let status = match database {
        StoreStatus::Ok => StatusCode::OK,
        StoreStatus::Error => StatusCode::SERVICE_UNAVAILABLE,
    };

    let header = app_header(&health);
    let mut response = if method == Method::GET {
        (status, Json(health)).into_response()
    } else {
        (status, Body::empty()).into_response()
    };
    if let Some(value) = header {
        debug!(x_app = ?value, "Health checked");
        response.headers_mut().insert(X_APP, value);
    }
    response
}
