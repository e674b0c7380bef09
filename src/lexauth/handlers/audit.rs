use axum::{
    extract::{Extension, Query},
    Json,
};
use std::sync::Arc;

use super::{
    guard::{Authorized, CanViewAuditLog},
    types::{AuditLogView, AuditQuery},
};
use crate::lexauth::{
    error::{ApiError, ErrorBody},
    AppState,
};

/// Audit trail of the caller's organization, newest first.
#[utoipa::path(
    get,
    path = "/v1/audit-logs",
    params(AuditQuery),
    responses(
        (status = 200, description = "Audit entries", body = [AuditLogView]),
        (status = 403, description = "Forbidden", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "audit"
)]
pub async fn list(
    auth: Authorized<CanViewAuditLog>,
    Query(query): Query<AuditQuery>,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Vec<AuditLogView>>, ApiError> {
    let entries = state.service().list_audit(&auth, query.limit).await?;
    Ok(Json(entries.into_iter().map(Into::into).collect()))
}
