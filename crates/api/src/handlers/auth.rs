use crate::middleware::AuthUser;
use crate::AppState;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap, StatusCode},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strawberry_auth::{AuthError, ErrorKind, TokenPair};
use strawberry_models::{Credentials, RefreshSession, Role, UserId};
use validator::Validate;

pub type ApiError = (StatusCode, Json<ErrorResponse>);

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

impl ErrorResponse {
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            code: code.to_string(),
            message: message.to_string(),
            details: Vec::new(),
        }
    }

    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = details;
        self
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DataResponse<T> {
    pub data: T,
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
        ErrorKind::DuplicateError | ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::NotFound
        | ErrorKind::Expired
        | ErrorKind::InvalidToken
        | ErrorKind::SecurityViolation => StatusCode::UNAUTHORIZED,
        ErrorKind::DatabaseError | ErrorKind::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Map a service error to a response, logging causes that stay server-side.
pub fn auth_error(err: AuthError) -> ApiError {
    let status = status_for(err.kind());
    if status.is_server_error() {
        tracing::error!(error = %err, "Request failed");
    } else {
        tracing::debug!(error = %err, "Request rejected");
    }

    (
        status,
        Json(
            ErrorResponse::new(err.code(), &err.client_message())
                .with_details(err.details().to_vec()),
        ),
    )
}

fn bad_request(message: &str, details: Vec<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse::new("BAD_REQUEST", message).with_details(details)),
    )
}

/// Unwrap a JSON body and run its `validator` rules.
fn validated<T: Validate>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    let Json(request) = payload.map_err(|e| bad_request("Malformed request body", vec![e.body_text()]))?;

    request.validate().map_err(|e| {
        let mut details: Vec<String> = e
            .field_errors()
            .keys()
            .map(|field| format!("{} is required", field))
            .collect();
        details.sort();
        bad_request("Invalid request", details)
    })?;

    Ok(request)
}

#[derive(Debug, Deserialize, Validate)]
pub struct ApiRegisterRequest {
    #[validate(length(min = 1, max = 255))]
    pub username: String,
    #[validate(length(min = 1, max = 255))]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ApiLoginRequest {
    #[validate(length(min = 1))]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

/// Register a new customer account
pub async fn register(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ApiRegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<DataResponse<TokenPair>>), ApiError> {
    let request = validated(payload)?;

    let tokens = state
        .auth_service
        .register(strawberry_auth::RegisterRequest {
            name: request.username,
            email: request.email,
            password: request.password,
        })
        .await
        .map_err(auth_error)?;

    Ok((StatusCode::CREATED, Json(DataResponse { data: tokens })))
}

/// Login with email and password
pub async fn login(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ApiLoginRequest>, JsonRejection>,
) -> Result<Json<DataResponse<TokenPair>>, ApiError> {
    let request = validated(payload)?;

    let tokens = state
        .auth_service
        .login(Credentials {
            email: request.email,
            password: request.password,
        })
        .await
        .map_err(auth_error)?;

    Ok(Json(DataResponse { data: tokens }))
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Client address as reported by the nearest proxy.
fn client_ip(headers: &HeaderMap) -> Option<String> {
    header_value(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next().map(|ip| ip.trim().to_string()))
        .filter(|ip| !ip.is_empty())
        .or_else(|| header_value(headers, "x-real-ip"))
}

/// Rotate a refresh token.
///
/// The token comes from the `Refresh-Token` header, or from a JSON body when
/// the header is absent.
pub async fn refresh_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Option<Json<RefreshTokenRequest>>,
) -> Result<Json<DataResponse<TokenPair>>, ApiError> {
    let token = header_value(&headers, "refresh-token")
        .or_else(|| body.map(|Json(b)| b.refresh_token))
        .filter(|t| !t.is_empty())
        .ok_or_else(|| bad_request("Refresh token is required", vec!["refresh_token is required".to_string()]))?;

    let request = RefreshSession {
        token,
        user_agent: header_value(&headers, header::USER_AGENT.as_str()),
        device: header_value(&headers, "x-device"),
        ip_address: client_ip(&headers),
        location: header_value(&headers, "x-location"),
    };

    let tokens = state
        .auth_service
        .refresh(request)
        .await
        .map_err(auth_error)?;

    Ok(Json(DataResponse { data: tokens }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MeResponse {
    pub user_id: UserId,
    pub role: Role,
}

/// Identity carried by the caller's access token
pub async fn me(Extension(user): Extension<AuthUser>) -> Json<MeResponse> {
    Json(MeResponse {
        user_id: user.user_id,
        role: user.role,
    })
}
