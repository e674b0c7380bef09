//! Team invitations. Accepting is public and rate limited, the rest needs `manage_users`.

use axum::{
    extract::{ConnectInfo, Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use std::{net::SocketAddr, sync::Arc};
use uuid::Uuid;

use super::{
    client_meta, enforce_ip, payload,
    guard::{Authorized, CanManageUsers},
    types::{AcceptInvitationRequest, AuthResponse, CreateInvitationRequest, InvitationView},
};
use crate::lexauth::{
    error::{ApiError, ErrorBody},
    invitations::Acceptance,
    rate_limit::RateLimitAction,
    AppState,
};

/// Invite someone by email. The link is mailed, the token is never returned.
#[utoipa::path(
    post,
    path = "/v1/invitations",
    request_body = CreateInvitationRequest,
    responses(
        (status = 201, description = "Invitation sent", body = InvitationView),
        (status = 403, description = "Role may not be granted by the caller", body = ErrorBody),
        (status = 409, description = "Already a member, already invited or out of seats", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "invitations"
)]
pub async fn create(
    auth: Authorized<CanManageUsers>,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Extension(state): Extension<Arc<AppState>>,
    request: Option<Json<CreateInvitationRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let client = client_meta(state.trusted_proxies(), &headers, connect_info.as_ref());
    let request = payload(request)?;
    let invitation = state
        .service()
        .create_invitation(&auth, &request.email, request.role, &client)
        .await?;
    Ok((StatusCode::CREATED, Json(InvitationView::from(invitation))))
}

#[utoipa::path(
    get,
    path = "/v1/invitations",
    responses(
        (status = 200, description = "Invitations of the organization", body = [InvitationView]),
        (status = 403, description = "Forbidden", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "invitations"
)]
pub async fn list(
    auth: Authorized<CanManageUsers>,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Vec<InvitationView>>, ApiError> {
    let invitations = state.service().list_invitations(&auth).await?;
    Ok(Json(invitations.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    delete,
    path = "/v1/invitations/{id}",
    params(("id" = Uuid, Path, description = "Invitation id")),
    responses(
        (status = 204, description = "Invitation revoked"),
        (status = 404, description = "No pending invitation with that id", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "invitations"
)]
pub async fn revoke(
    auth: Authorized<CanManageUsers>,
    Path(id): Path<Uuid>,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<StatusCode, ApiError> {
    state.service().revoke_invitation(&auth, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Redeem an invitation: creates the account and signs it in.
#[utoipa::path(
    post,
    path = "/v1/invitations/accept",
    request_body = AcceptInvitationRequest,
    responses(
        (status = 201, description = "Account created", body = AuthResponse),
        (status = 400, description = "Invalid or expired invitation", body = ErrorBody),
        (status = 429, description = "Rate limited", body = ErrorBody)
    ),
    tag = "invitations"
)]
pub async fn accept(
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Extension(state): Extension<Arc<AppState>>,
    request: Option<Json<AcceptInvitationRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let client = client_meta(state.trusted_proxies(), &headers, connect_info.as_ref());
    enforce_ip(&state, &client, RateLimitAction::AcceptInvitation)?;
    let request = payload(request)?;
    let session = state
        .service()
        .accept_invitation(
            Acceptance {
                token: request.token,
                password: request.password,
                first_name: request.first_name,
                last_name: request.last_name,
            },
            &client,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(AuthResponse::from(session))))
}
