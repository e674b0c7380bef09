//! Request guard: bearer authentication and permission checks as axum extractors.
//!
//! ```ignore
//! async fn handler(auth: Authorized<CanCreateCase>) -> impl IntoResponse { .. }
//! ```
//!
//! A missing or invalid token rejects with 401, a valid token lacking the
//! permission rejects with 403. The handler body never runs in either case.

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use std::{marker::PhantomData, ops::Deref, sync::Arc};
use tracing::debug;

use crate::lexauth::{
    error::ApiError,
    rbac::{self, Permission},
    service::AuthContext,
    AppState,
};

/// Type-level permission used by [`Authorized`].
pub trait RequiredPermission {
    const PERMISSION: Permission;
}

macro_rules! permission_markers {
    ($($marker:ident => $permission:ident),+ $(,)?) => {
        $(
            #[derive(Debug)]
            pub struct $marker;

            impl RequiredPermission for $marker {
                const PERMISSION: Permission = Permission::$permission;
            }
        )+
    };
}

permission_markers! {
    CanViewOrganization => ViewOrganization,
    CanUpdateOrganization => UpdateOrganization,
    CanDeleteOrganization => DeleteOrganization,
    CanViewUsers => ViewUsers,
    CanManageUsers => ManageUsers,
    CanViewBilling => ViewBilling,
    CanViewAuditLog => ViewAuditLog,
    CanCreateCase => CreateCase,
    CanViewCases => ViewCases,
}

/// Bearer token from the `Authorization` header, scheme matched case-insensitively.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

fn app_state(parts: &Parts) -> Result<Arc<AppState>, ApiError> {
    parts
        .extensions
        .get::<Arc<AppState>>()
        .cloned()
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("application state is not installed")))
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let state = app_state(parts)?;
        let Some(token) = bearer_token(&parts.headers) else {
            debug!("Request without bearer token");
            return Err(ApiError::Unauthorized);
        };
        state.service().authenticate(token).await
    }
}

/// An authenticated identity whose role holds `P::PERMISSION`.
#[derive(Debug)]
pub struct Authorized<P> {
    ctx: AuthContext,
    permission: PhantomData<fn() -> P>,
}

impl<P> Authorized<P> {
    #[must_use]
    pub fn context(&self) -> &AuthContext {
        &self.ctx
    }
}

impl<P> Deref for Authorized<P> {
    type Target = AuthContext;

    fn deref(&self) -> &Self::Target {
        &self.ctx
    }
}

#[async_trait]
impl<S, P> FromRequestParts<S> for Authorized<P>
where
    S: Send + Sync,
    P: RequiredPermission,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let ctx = AuthContext::from_request_parts(parts, state).await?;
        if let Err(err) = rbac::require(ctx.role, P::PERMISSION) {
            debug!(
                user_id = %ctx.user_id,
                role = %ctx.role,
                permission = ?P::PERMISSION,
                "Permission denied"
            );
            return Err(err);
        }
        Ok(Self {
            ctx,
            permission: PhantomData,
        })
    }
}
