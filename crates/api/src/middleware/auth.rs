use crate::handlers::ErrorResponse;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
    Json,
};
use std::sync::Arc;
use strawberry_auth::{AuthError, Claims};
use strawberry_models::{Role, UserId};

/// Authenticated user context
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: UserId,
    pub role: Role,
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.uid,
            role: claims.rol,
        }
    }
}

fn unauthorized(code: &str, message: &str) -> (StatusCode, Json<ErrorResponse>) {
    (StatusCode::UNAUTHORIZED, Json(ErrorResponse::new(code, message)))
}

/// Extract the token from a `Bearer` Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<String, (StatusCode, Json<ErrorResponse>)> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| unauthorized("MISSING_AUTH_HEADER", "Authorization header is required"))?
        .to_str()
        .map_err(|_| unauthorized("INVALID_AUTH_HEADER", "Invalid Authorization header format"))?;

    match auth_header.trim().split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() => {
            Ok(token.trim().to_string())
        }
        _ => Err(unauthorized(
            "INVALID_AUTH_SCHEME",
            "Authorization header must use Bearer scheme",
        )),
    }
}

/// Middleware to require a valid access token
pub async fn require_auth(
    State(state): State<Arc<crate::AppState>>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let token = extract_bearer_token(&headers)?;

    let claims = state
        .auth_service
        .verify_access_token(&token)
        .await
        .map_err(|e| {
            tracing::debug!(error = %e, "Access token rejected");
            match e {
                AuthError::TokenExpired => unauthorized("TOKEN_EXPIRED", "Token expired"),
                _ => unauthorized("INVALID_TOKEN", "Invalid token"),
            }
        })?;

    request.extensions_mut().insert(AuthUser::from(claims));

    Ok(next.run(request).await)
}
