//! HTTP handlers. Each file owns one resource; shared extraction helpers live here.

use axum::{extract::ConnectInfo, http::HeaderMap, Json};
use std::net::{IpAddr, SocketAddr};

use super::{
    error::ApiError,
    models::ClientMeta,
    rate_limit::{RateLimitAction, RateLimitDecision},
    utils::{client_ip, extract_user_agent, normalize_email},
    AppState,
};

pub mod audit;
pub mod auth;
pub mod cases;
pub mod guard;
pub mod health;
pub mod invitations;
pub mod members;
pub mod onboarding;
pub mod organizations;
pub mod types;

/// Client address and user agent. Forwarding headers count only behind a trusted proxy.
pub(crate) fn client_meta(
    trusted_proxies: &[IpAddr],
    headers: &HeaderMap,
    connect_info: Option<&ConnectInfo<SocketAddr>>,
) -> ClientMeta {
    let peer = connect_info.map(|ConnectInfo(addr)| addr.ip());
    ClientMeta {
        ip: client_ip(headers, peer, trusted_proxies).map(|ip| ip.to_string()),
        user_agent: extract_user_agent(headers),
    }
}

pub(crate) fn payload<T>(payload: Option<Json<T>>) -> Result<T, ApiError> {
    payload
        .map(|Json(payload)| payload)
        .ok_or_else(|| ApiError::BadRequest("missing or malformed payload".to_string()))
}

/// Per-IP check, run before any other work on the request.
pub(crate) fn enforce_ip(
    state: &AppState,
    client: &ClientMeta,
    action: RateLimitAction,
) -> Result<(), ApiError> {
    match state.rate_limiter().check_ip(client.ip.as_deref(), action) {
        RateLimitDecision::Allowed => Ok(()),
        RateLimitDecision::Limited => Err(ApiError::RateLimited),
    }
}

/// Per-email check, keyed on the normalized address.
pub(crate) fn enforce_email(
    state: &AppState,
    email: &str,
    action: RateLimitAction,
) -> Result<(), ApiError> {
    let email = normalize_email(email);
    if email.is_empty() {
        return Ok(());
    }
    match state.rate_limiter().check_email(&email, action) {
        RateLimitDecision::Allowed => Ok(()),
        RateLimitDecision::Limited => Err(ApiError::RateLimited),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn client_meta_reads_forwarded_header_from_trusted_proxy() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        headers.insert("user-agent", HeaderValue::from_static("lexauth-test"));
        let proxy = SocketAddr::from(([10, 0, 0, 1], 4000));

        let client = client_meta(&[proxy.ip()], &headers, Some(&ConnectInfo(proxy)));
        assert_eq!(client.ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(client.user_agent.as_deref(), Some("lexauth-test"));
    }

    #[test]
    fn client_meta_uses_peer_when_not_proxied() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7"));
        let peer = ConnectInfo(SocketAddr::from(([192, 0, 2, 1], 4000)));

        assert_eq!(client_meta(&[], &headers, Some(&peer)).ip.as_deref(), Some("192.0.2.1"));
        assert_eq!(client_meta(&[], &HeaderMap::new(), None).ip, None);
    }

    #[test]
    fn missing_payload_is_bad_request() {
        let result: Result<String, ApiError> = payload(None);
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }
}
