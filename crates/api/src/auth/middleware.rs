//! Authentication middleware
//!
//! Validates bearer tokens on REST routes and attaches the resolved identity
//! as an [`AuthUser`] request extension. WebSocket upgrades authenticate in
//! the chat handler instead (browsers cannot set headers on upgrade requests).

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use reclaim_shared::UserId;

use crate::{auth::JwtManager, error::ApiError};

/// Shared state for authentication middleware
#[derive(Clone)]
pub struct AuthState {
    pub jwt_manager: JwtManager,
}

impl AuthState {
    pub fn new(jwt_manager: JwtManager) -> Self {
        Self { jwt_manager }
    }
}

/// The authenticated identity attached to a request.
///
/// Created once per request at the middleware boundary; handlers never see a
/// raw credential, only the resolved identity.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: UserId,
}

/// Require a valid bearer token; rejects the request otherwise.
pub async fn require_auth(
    State(auth_state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer_token(&request).ok_or(ApiError::Unauthenticated)?;

    let claims = auth_state
        .jwt_manager
        .validate_access_token(&token)
        .map_err(|e| {
            tracing::warn!(error = ?e, "Request auth failed: invalid token");
            ApiError::InvalidToken
        })?;

    request.extensions_mut().insert(AuthUser {
        user_id: claims.user_id(),
    });

    Ok(next.run(request).await)
}

fn extract_bearer_token(request: &Request) -> Option<String> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;

    fn request_with_auth(value: &str) -> Request {
        HttpRequest::builder()
            .header(AUTHORIZATION, value)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_extract_bearer_token() {
        let req = request_with_auth("Bearer abc123");
        assert_eq!(extract_bearer_token(&req), Some("abc123".to_string()));
    }

    #[test]
    fn test_extract_rejects_missing_scheme() {
        let req = request_with_auth("abc123");
        assert_eq!(extract_bearer_token(&req), None);
    }

    #[test]
    fn test_extract_rejects_empty_token() {
        let req = request_with_auth("Bearer ");
        assert_eq!(extract_bearer_token(&req), None);
    }
}
