//! Legal cases of the caller's organization.

use axum::{
    extract::{ConnectInfo, Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use std::{net::SocketAddr, sync::Arc};
use uuid::Uuid;

use super::{
    client_meta,
    guard::{Authorized, CanCreateCase, CanViewCases},
    payload,
    types::{CaseView, CreateCaseRequest},
};
use crate::lexauth::{
    error::{ApiError, ErrorBody},
    AppState,
};

#[utoipa::path(
    post,
    path = "/v1/cases",
    request_body = CreateCaseRequest,
    responses(
        (status = 201, description = "Case created", body = CaseView),
        (status = 400, description = "Invalid input", body = ErrorBody),
        (status = 403, description = "Forbidden", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "cases"
)]
pub async fn create(
    auth: Authorized<CanCreateCase>,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Extension(state): Extension<Arc<AppState>>,
    request: Option<Json<CreateCaseRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let client = client_meta(state.trusted_proxies(), &headers, connect_info.as_ref());
    let request = payload(request)?;
    let case = state
        .service()
        .create_case(&auth, &request.title, request.description.as_deref(), &client)
        .await?;
    Ok((StatusCode::CREATED, Json(CaseView::from(case))))
}

#[utoipa::path(
    get,
    path = "/v1/cases",
    responses(
        (status = 200, description = "Cases of the organization", body = [CaseView]),
        (status = 403, description = "Forbidden", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "cases"
)]
pub async fn list(
    auth: Authorized<CanViewCases>,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Vec<CaseView>>, ApiError> {
    let cases = state.service().list_cases(&auth).await?;
    Ok(Json(cases.into_iter().map(Into::into).collect()))
}

/// Cases of other organizations read as not found.
#[utoipa::path(
    get,
    path = "/v1/cases/{id}",
    params(("id" = Uuid, Path, description = "Case id")),
    responses(
        (status = 200, description = "Case", body = CaseView),
        (status = 404, description = "Not found", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "cases"
)]
pub async fn show(
    auth: Authorized<CanViewCases>,
    Path(id): Path<Uuid>,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<CaseView>, ApiError> {
    let case = state.service().get_case(&auth, id).await?;
    Ok(Json(case.into()))
}
