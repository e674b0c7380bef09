//! Authentication endpoints: sign-up, login, token refresh, logout and account recovery.
//!
//! Public endpoints run the per-IP rate limit before touching the payload and the
//! per-email limit right after it is parsed.

use axum::{
    extract::{ConnectInfo, Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use std::{net::SocketAddr, sync::Arc};
use uuid::Uuid;

use super::{
    client_meta, enforce_email, enforce_ip, payload,
    types::{
        AuthResponse, ChangePasswordRequest, EmailRequest, LoginRequest, LogoutRequest,
        MeResponse, OrganizationRegisterRequest, RefreshRequest, RegisterRequest,
        ResetPasswordRequest, SessionView, TokenResponse, UserView, VerifyEmailRequest,
    },
};
use crate::lexauth::{
    error::{ApiError, ErrorBody},
    rate_limit::RateLimitAction,
    rbac,
    service::{AuthContext, Registration},
    AppState,
};

/// Create an account together with a new organization in `provisioning`.
#[utoipa::path(
    post,
    path = "/v1/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = AuthResponse),
        (status = 400, description = "Invalid input", body = ErrorBody),
        (status = 409, description = "Email already registered", body = ErrorBody),
        (status = 429, description = "Rate limited", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn register(
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Extension(state): Extension<Arc<AppState>>,
    request: Option<Json<RegisterRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let client = client_meta(state.trusted_proxies(), &headers, connect_info.as_ref());
    enforce_ip(&state, &client, RateLimitAction::Register)?;
    let request = payload(request)?;
    enforce_email(&state, &request.email, RateLimitAction::Register)?;

    let session = state
        .service()
        .register(
            Registration {
                email: request.email,
                password: request.password,
                first_name: request.first_name,
                last_name: request.last_name,
                organization_name: request.organization_name,
                ..Registration::default()
            },
            &client,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(AuthResponse::from(session))))
}

/// Sign up an organization with its legal details and subscription plan.
#[utoipa::path(
    post,
    path = "/v1/organizations/register",
    request_body = OrganizationRegisterRequest,
    responses(
        (status = 201, description = "Organization created", body = AuthResponse),
        (status = 400, description = "Invalid input", body = ErrorBody),
        (status = 409, description = "Email already registered", body = ErrorBody),
        (status = 429, description = "Rate limited", body = ErrorBody)
    ),
    tag = "organizations"
)]
pub async fn register_organization(
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Extension(state): Extension<Arc<AppState>>,
    request: Option<Json<OrganizationRegisterRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let client = client_meta(state.trusted_proxies(), &headers, connect_info.as_ref());
    enforce_ip(&state, &client, RateLimitAction::Register)?;
    let request = payload(request)?;
    enforce_email(&state, &request.email, RateLimitAction::Register)?;

    let session = state
        .service()
        .register_organization(
            Registration {
                email: request.email,
                password: request.password,
                first_name: request.first_name,
                last_name: request.last_name,
                organization_name: Some(request.organization_name),
                legal: request.legal.unwrap_or_default(),
                subscription_plan: request.subscription_plan,
            },
            &client,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(AuthResponse::from(session))))
}

/// Exchange credentials for an access token and a refresh token.
#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = AuthResponse),
        (status = 400, description = "Invalid input", body = ErrorBody),
        (status = 401, description = "Invalid credentials", body = ErrorBody),
        (status = 429, description = "Rate limited", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Extension(state): Extension<Arc<AppState>>,
    request: Option<Json<LoginRequest>>,
) -> Result<Json<AuthResponse>, ApiError> {
    let client = client_meta(state.trusted_proxies(), &headers, connect_info.as_ref());
    enforce_ip(&state, &client, RateLimitAction::Login)?;
    let request = payload(request)?;
    enforce_email(&state, &request.email, RateLimitAction::Login)?;

    let session = state
        .service()
        .login(&request.email, request.password, &client)
        .await?;
    Ok(Json(session.into()))
}

/// Rotate a refresh token. The presented token is revoked.
#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New token pair", body = TokenResponse),
        (status = 401, description = "Invalid refresh token", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn refresh(
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Extension(state): Extension<Arc<AppState>>,
    request: Option<Json<RefreshRequest>>,
) -> Result<Json<TokenResponse>, ApiError> {
    let client = client_meta(state.trusted_proxies(), &headers, connect_info.as_ref());
    let request = payload(request)?;
    let tokens = state
        .service()
        .refresh(&request.refresh_token, &client)
        .await?;
    Ok(Json(tokens.into()))
}

/// Revoke one refresh token of the caller.
#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    request_body = LogoutRequest,
    responses(
        (status = 204, description = "Logged out"),
        (status = 401, description = "Not authenticated", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn logout(
    ctx: AuthContext,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Extension(state): Extension<Arc<AppState>>,
    request: Option<Json<LogoutRequest>>,
) -> Result<StatusCode, ApiError> {
    let client = client_meta(state.trusted_proxies(), &headers, connect_info.as_ref());
    let request = payload(request)?;
    state
        .service()
        .logout(&ctx, &request.refresh_token, &client)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Revoke every refresh token of the caller.
#[utoipa::path(
    post,
    path = "/v1/auth/logout-all",
    responses(
        (status = 204, description = "All sessions revoked"),
        (status = 401, description = "Not authenticated", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn logout_all(
    ctx: AuthContext,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<StatusCode, ApiError> {
    let client = client_meta(state.trusted_proxies(), &headers, connect_info.as_ref());
    state.service().logout_all(&ctx, &client).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Request a password reset link (always returns 204 to avoid user enumeration).
#[utoipa::path(
    post,
    path = "/v1/auth/forgot-password",
    request_body = EmailRequest,
    responses(
        (status = 204, description = "Reset accepted"),
        (status = 400, description = "Invalid input", body = ErrorBody),
        (status = 429, description = "Rate limited", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn forgot_password(
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Extension(state): Extension<Arc<AppState>>,
    request: Option<Json<EmailRequest>>,
) -> Result<StatusCode, ApiError> {
    let client = client_meta(state.trusted_proxies(), &headers, connect_info.as_ref());
    enforce_ip(&state, &client, RateLimitAction::ForgotPassword)?;
    let request = payload(request)?;
    enforce_email(&state, &request.email, RateLimitAction::ForgotPassword)?;

    state.service().forgot_password(&request.email).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Set a new password with a reset token. Every session of the account is revoked.
#[utoipa::path(
    post,
    path = "/v1/auth/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 204, description = "Password updated"),
        (status = 400, description = "Invalid or expired token", body = ErrorBody),
        (status = 429, description = "Rate limited", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn reset_password(
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Extension(state): Extension<Arc<AppState>>,
    request: Option<Json<ResetPasswordRequest>>,
) -> Result<StatusCode, ApiError> {
    let client = client_meta(state.trusted_proxies(), &headers, connect_info.as_ref());
    enforce_ip(&state, &client, RateLimitAction::ResetPassword)?;
    let request = payload(request)?;
    state
        .service()
        .reset_password(&request.token, request.new_password, &client)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Verify the email link by consuming the hashed token.
#[utoipa::path(
    post,
    path = "/v1/auth/verify-email",
    request_body = VerifyEmailRequest,
    responses(
        (status = 204, description = "Email verified"),
        (status = 400, description = "Invalid or expired token", body = ErrorBody),
        (status = 429, description = "Rate limited", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn verify_email(
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Extension(state): Extension<Arc<AppState>>,
    request: Option<Json<VerifyEmailRequest>>,
) -> Result<StatusCode, ApiError> {
    let client = client_meta(state.trusted_proxies(), &headers, connect_info.as_ref());
    enforce_ip(&state, &client, RateLimitAction::VerifyEmail)?;
    let request = payload(request)?;
    state.service().verify_email(&request.token).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Resend a verification email (always returns 204 to avoid user enumeration).
#[utoipa::path(
    post,
    path = "/v1/auth/resend-verification",
    request_body = EmailRequest,
    responses(
        (status = 204, description = "Resend accepted"),
        (status = 400, description = "Invalid input", body = ErrorBody),
        (status = 429, description = "Rate limited", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn resend_verification(
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Extension(state): Extension<Arc<AppState>>,
    request: Option<Json<EmailRequest>>,
) -> Result<StatusCode, ApiError> {
    let client = client_meta(state.trusted_proxies(), &headers, connect_info.as_ref());
    enforce_ip(&state, &client, RateLimitAction::ResendVerification)?;
    let request = payload(request)?;
    enforce_email(&state, &request.email, RateLimitAction::ResendVerification)?;

    state.service().resend_verification(&request.email).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/v1/auth/change-password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 204, description = "Password changed, other sessions revoked"),
        (status = 400, description = "Invalid input", body = ErrorBody),
        (status = 401, description = "Wrong current password", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn change_password(
    ctx: AuthContext,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Extension(state): Extension<Arc<AppState>>,
    request: Option<Json<ChangePasswordRequest>>,
) -> Result<StatusCode, ApiError> {
    let client = client_meta(state.trusted_proxies(), &headers, connect_info.as_ref());
    let request = payload(request)?;
    state
        .service()
        .change_password(&ctx, request.current_password, request.new_password, &client)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// The caller, their organization and the permissions their role grants.
#[utoipa::path(
    get,
    path = "/v1/auth/me",
    responses(
        (status = 200, description = "Current identity", body = MeResponse),
        (status = 401, description = "Not authenticated", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn me(
    ctx: AuthContext,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<MeResponse>, ApiError> {
    let (user, organization) = state.service().me(&ctx).await?;
    Ok(Json(MeResponse {
        permissions: rbac::permissions(user.role).to_vec(),
        user: UserView::from(user),
        organization: organization.into(),
    }))
}

#[utoipa::path(
    get,
    path = "/v1/auth/sessions",
    responses(
        (status = 200, description = "Active sessions", body = [SessionView]),
        (status = 401, description = "Not authenticated", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn list_sessions(
    ctx: AuthContext,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Vec<SessionView>>, ApiError> {
    let sessions = state.service().list_sessions(&ctx).await?;
    Ok(Json(sessions.into_iter().map(Into::into).collect()))
}

/// Log out a single device.
#[utoipa::path(
    delete,
    path = "/v1/auth/sessions/{id}",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 204, description = "Session revoked"),
        (status = 401, description = "Not authenticated", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn revoke_session(
    ctx: AuthContext,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<StatusCode, ApiError> {
    let client = client_meta(state.trusted_proxies(), &headers, connect_info.as_ref());
    state.service().revoke_session(&ctx, id, &client).await?;
    Ok(StatusCode::NO_CONTENT)
}
