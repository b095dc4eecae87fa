//! Request authentication middleware

use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, Request},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::auth::jwt::JwtManager;
use crate::error::ApiError;

/// State handed to the auth middleware layer
#[derive(Clone)]
pub struct AuthState {
    jwt: JwtManager,
}

impl AuthState {
    pub fn new(jwt: JwtManager) -> Self {
        Self { jwt }
    }
}

/// Authenticated caller, inserted as a request extension by [`require_auth`]
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: String,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

/// Reject platform-admin operations for non-admin callers.
/// Admin routes share the normal auth layer; the role check happens here,
/// inside each handler.
pub fn ensure_admin(user: &AuthUser) -> Result<(), ApiError> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

/// Middleware that requires a valid bearer token and attaches the caller
/// as an [`AuthUser`] extension
pub async fn require_auth(
    State(auth): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    let claims = auth.jwt.validate_token(token).map_err(|e| {
        tracing::debug!(error = %e, "Token validation failed");
        ApiError::InvalidToken
    })?;

    request.extensions_mut().insert(AuthUser {
        user_id: claims.sub,
        role: claims.role,
    });

    Ok(next.run(request).await)
}
