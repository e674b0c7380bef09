//! The caller's organization.

use axum::{
    extract::{ConnectInfo, Extension},
    http::{HeaderMap, StatusCode},
    Json,
};
use std::{net::SocketAddr, sync::Arc};

use super::{
    client_meta,
    guard::{Authorized, CanDeleteOrganization, CanUpdateOrganization, CanViewBilling, CanViewOrganization},
    payload,
    types::{BillingView, OrganizationView, UpdateOrganizationRequest},
};
use crate::lexauth::{
    error::{ApiError, ErrorBody},
    AppState,
};

#[utoipa::path(
    get,
    path = "/v1/organizations/current",
    responses(
        (status = 200, description = "Current organization", body = OrganizationView),
        (status = 401, description = "Not authenticated", body = ErrorBody),
        (status = 403, description = "Forbidden", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "organizations"
)]
pub async fn current(
    auth: Authorized<CanViewOrganization>,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<OrganizationView>, ApiError> {
    let organization = state.service().current_organization(&auth).await?;
    Ok(Json(organization.into()))
}

#[utoipa::path(
    patch,
    path = "/v1/organizations/current",
    request_body = UpdateOrganizationRequest,
    responses(
        (status = 200, description = "Organization updated", body = OrganizationView),
        (status = 400, description = "Invalid input", body = ErrorBody),
        (status = 403, description = "Forbidden", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "organizations"
)]
pub async fn update(
    auth: Authorized<CanUpdateOrganization>,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Extension(state): Extension<Arc<AppState>>,
    request: Option<Json<UpdateOrganizationRequest>>,
) -> Result<Json<OrganizationView>, ApiError> {
    let client = client_meta(state.trusted_proxies(), &headers, connect_info.as_ref());
    let request = payload(request)?;
    let organization = state
        .service()
        .update_organization(
            &auth,
            request.name.as_deref(),
            request.legal.as_ref(),
            &client,
        )
        .await?;
    Ok(Json(organization.into()))
}

/// Soft-delete the organization. Every member is logged out.
#[utoipa::path(
    delete,
    path = "/v1/organizations/current",
    responses(
        (status = 204, description = "Organization deleted"),
        (status = 403, description = "Forbidden", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "organizations"
)]
pub async fn delete(
    auth: Authorized<CanDeleteOrganization>,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<StatusCode, ApiError> {
    let client = client_meta(state.trusted_proxies(), &headers, connect_info.as_ref());
    state.service().delete_organization(&auth, &client).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/v1/organizations/current/billing",
    responses(
        (status = 200, description = "Plan and seat usage", body = BillingView),
        (status = 403, description = "Forbidden", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "organizations"
)]
pub async fn billing(
    auth: Authorized<CanViewBilling>,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<BillingView>, ApiError> {
    let billing = state.service().billing(&auth).await?;
    Ok(Json(billing.into()))
}
