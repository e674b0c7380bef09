//! Onboarding checklist of the caller.

use axum::{
    extract::{ConnectInfo, Extension, Path},
    http::HeaderMap,
    Json,
};
use std::{net::SocketAddr, sync::Arc};

use super::{
    client_meta, payload,
    types::{OnboardingStepView, OnboardingView, UpdateOnboardingRequest},
};
use crate::lexauth::{
    error::{ApiError, ErrorBody},
    models::OnboardingStep,
    service::AuthContext,
    AppState,
};

#[utoipa::path(
    get,
    path = "/v1/onboarding",
    responses(
        (status = 200, description = "Checklist with overall progress", body = OnboardingView),
        (status = 401, description = "Not authenticated", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "onboarding"
)]
pub async fn overview(
    ctx: AuthContext,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<OnboardingView>, ApiError> {
    let overview = state.service().onboarding(&ctx).await?;
    Ok(Json(overview.into()))
}

#[utoipa::path(
    put,
    path = "/v1/onboarding/{step}",
    params(("step" = OnboardingStep, Path, description = "Checklist step")),
    request_body = UpdateOnboardingRequest,
    responses(
        (status = 200, description = "Step updated", body = OnboardingStepView),
        (status = 400, description = "Invalid input", body = ErrorBody),
        (status = 403, description = "Step needs update_organization", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "onboarding"
)]
pub async fn update_step(
    ctx: AuthContext,
    Path(step): Path<String>,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Extension(state): Extension<Arc<AppState>>,
    request: Option<Json<UpdateOnboardingRequest>>,
) -> Result<Json<OnboardingStepView>, ApiError> {
    let step: OnboardingStep = step
        .parse()
        .map_err(|_| ApiError::field("step", "unknown onboarding step"))?;
    let client = client_meta(state.trusted_proxies(), &headers, connect_info.as_ref());
    let request = payload(request)?;
    let progress = state
        .service()
        .update_onboarding_step(
            &ctx,
            step,
            request.completed,
            request.percentage,
            request.data,
            &client,
        )
        .await?;
    Ok(Json(progress.into()))
}
