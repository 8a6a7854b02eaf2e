//! Caller identity
//!
//! The identity provider is an outside collaborator. The chat loop only needs
//! to know whether there is a session and, if so, its access token.

use async_trait::async_trait;
use axum::http::HeaderMap;
use axum::http::header::{AUTHORIZATION, COOKIE};

/// The authenticated caller
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    /// Token forwarded to hubs that authenticate per user
    pub access_token: Option<String>,
}

impl Session {
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            access_token: Some(token.into()),
        }
    }
}

/// Resolves the session of an inbound request
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn current_session(&self, headers: &HeaderMap) -> Option<Session>;
}

/// Accepts `Authorization: Bearer <token>` or an `access_token` cookie
///
/// Token validation belongs to the identity provider fronting this service.
#[derive(Debug, Clone, Default)]
pub struct BearerIdentity;

const ACCESS_TOKEN_COOKIE: &str = "access_token";

impl BearerIdentity {
    pub fn new() -> Self {
        Self
    }

    fn bearer(headers: &HeaderMap) -> Option<String> {
        let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
        let (scheme, token) = value.split_once(' ')?;
        let token = token.trim();
        (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_string())
    }

    fn cookie(headers: &HeaderMap) -> Option<String> {
        headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, value)| *name == ACCESS_TOKEN_COOKIE && !value.is_empty())
            .map(|(_, value)| value.to_string())
    }
}

#[async_trait]
impl IdentityProvider for BearerIdentity {
    async fn current_session(&self, headers: &HeaderMap) -> Option<Session> {
        Self::bearer(headers)
            .or_else(|| Self::cookie(headers))
            .map(Session::with_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[tokio::test]
    async fn test_bearer_header() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
        let session = BearerIdentity::new().current_session(&headers).await.unwrap();
        assert_eq!(session.access_token.as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn test_cookie_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("theme=dark; access_token=tok; other=1"));
        let session = BearerIdentity::new().current_session(&headers).await.unwrap();
        assert_eq!(session.access_token.as_deref(), Some("tok"));
    }

    #[tokio::test]
    async fn test_header_wins_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("bearer fromheader"));
        headers.insert(COOKIE, HeaderValue::from_static("access_token=fromcookie"));
        let session = BearerIdentity::new().current_session(&headers).await.unwrap();
        assert_eq!(session.access_token.as_deref(), Some("fromheader"));
    }

    #[tokio::test]
    async fn test_other_cookie_names_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("session=abc; my_access_token=def"));
        assert!(BearerIdentity::new().current_session(&headers).await.is_none());
    }

    #[tokio::test]
    async fn test_no_session() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcg=="));
        headers.insert(COOKIE, HeaderValue::from_static("access_token="));
        assert!(BearerIdentity::new().current_session(&headers).await.is_none());
    }
}
