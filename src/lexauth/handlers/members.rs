//! Members of the caller's organization.

use axum::{
    extract::{ConnectInfo, Extension, Path},
    http::{HeaderMap, StatusCode},
    Json,
};
use std::{net::SocketAddr, sync::Arc};
use uuid::Uuid;

use super::{
    client_meta,
    guard::{Authorized, CanManageUsers, CanViewUsers},
    payload,
    types::{ChangeRoleRequest, UserView},
};
use crate::lexauth::{
    error::{ApiError, ErrorBody},
    AppState,
};

#[utoipa::path(
    get,
    path = "/v1/users",
    responses(
        (status = 200, description = "Organization members", body = [UserView]),
        (status = 403, description = "Forbidden", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn list(
    auth: Authorized<CanViewUsers>,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Vec<UserView>>, ApiError> {
    let members = state.service().list_members(&auth).await?;
    Ok(Json(members.into_iter().map(Into::into).collect()))
}

/// Change a member's role. The member's sessions are revoked.
#[utoipa::path(
    patch,
    path = "/v1/users/{id}/role",
    params(("id" = Uuid, Path, description = "User id")),
    request_body = ChangeRoleRequest,
    responses(
        (status = 200, description = "Role changed", body = UserView),
        (status = 403, description = "Forbidden", body = ErrorBody),
        (status = 404, description = "Not found", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn change_role(
    auth: Authorized<CanManageUsers>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Extension(state): Extension<Arc<AppState>>,
    request: Option<Json<ChangeRoleRequest>>,
) -> Result<Json<UserView>, ApiError> {
    let client = client_meta(state.trusted_proxies(), &headers, connect_info.as_ref());
    let request = payload(request)?;
    let user = state
        .service()
        .change_member_role(&auth, id, request.role, &client)
        .await?;
    Ok(Json(user.into()))
}

#[utoipa::path(
    delete,
    path = "/v1/users/{id}",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 204, description = "Member removed"),
        (status = 403, description = "Forbidden", body = ErrorBody),
        (status = 404, description = "Not found", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn remove(
    auth: Authorized<CanManageUsers>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<StatusCode, ApiError> {
    let client = client_meta(state.trusted_proxies(), &headers, connect_info.as_ref());
    state.service().remove_member(&auth, id, &client).await?;
    Ok(StatusCode::NO_CONTENT)
}
