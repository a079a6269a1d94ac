use strawberry_database::DatabaseError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AuthError>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Bad request: {message}")]
    BadRequest {
        message: String,
        details: Vec<String>,
    },

    #[error("Email is already registered")]
    DuplicateEmail,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Security violation: {0}")]
    SecurityViolation(String),

    #[error("Session is being refreshed by another request")]
    SessionBusy,
}

/// Coarse classification used by the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    DuplicateError,
    NotFound,
    DatabaseError,
    InternalError,
    Expired,
    InvalidToken,
    SecurityViolation,
    Conflict,
}

impl AuthError {
    pub fn bad_request(message: impl Into<String>, details: Vec<String>) -> Self {
        AuthError::BadRequest {
            message: message.into(),
            details,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::BadRequest { .. } => ErrorKind::BadRequest,
            AuthError::DuplicateEmail => ErrorKind::DuplicateError,
            AuthError::InvalidCredentials => ErrorKind::NotFound,
            AuthError::Database(_) => ErrorKind::DatabaseError,
            AuthError::Internal(_) => ErrorKind::InternalError,
            AuthError::TokenExpired => ErrorKind::Expired,
            AuthError::InvalidToken(_) => ErrorKind::InvalidToken,
            AuthError::SecurityViolation(_) => ErrorKind::SecurityViolation,
            AuthError::SessionBusy => ErrorKind::Conflict,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::BadRequest { .. } => "BAD_REQUEST",
            AuthError::DuplicateEmail => "EMAIL_TAKEN",
            AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthError::Database(_) => "DATABASE_ERROR",
            AuthError::Internal(_) => "INTERNAL_ERROR",
            AuthError::TokenExpired => "TOKEN_EXPIRED",
            AuthError::InvalidToken(_) => "INVALID_TOKEN",
            AuthError::SecurityViolation(_) => "TOKEN_REUSED",
            AuthError::SessionBusy => "SESSION_BUSY",
        }
    }

    /// Message that is safe to hand to a client.
    ///
    /// Storage and internal failures collapse to a generic sentence; token
    /// failures never say which check rejected the token.
    pub fn client_message(&self) -> String {
        match self {
            AuthError::BadRequest { message, .. } => message.clone(),
            AuthError::DuplicateEmail => "Email is already registered".to_string(),
            AuthError::InvalidCredentials => "Invalid email or password".to_string(),
            AuthError::Database(_) | AuthError::Internal(_) => {
                "An internal error occurred".to_string()
            }
            AuthError::TokenExpired => "Token expired".to_string(),
            AuthError::InvalidToken(_) | AuthError::SecurityViolation(_) => {
                "Invalid token".to_string()
            }
            AuthError::SessionBusy => {
                "Session is being refreshed, retry shortly".to_string()
            }
        }
    }

    pub fn details(&self) -> &[String] {
        match self {
            AuthError::BadRequest { details, .. } => details,
            _ => &[],
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::InvalidToken(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(AuthError::InvalidCredentials.kind(), ErrorKind::NotFound);
        assert_eq!(AuthError::SessionBusy.kind(), ErrorKind::Conflict);
        assert_eq!(
            AuthError::from(DatabaseError::Other("boom".to_string())).kind(),
            ErrorKind::DatabaseError
        );
    }

    #[test]
    fn test_client_message_hides_internals() {
        let err = AuthError::Internal("signing key unreadable at /etc/keys".to_string());
        assert!(!err.client_message().contains("/etc/keys"));

        let err = AuthError::SecurityViolation("token reused for user 7".to_string());
        assert_eq!(err.client_message(), "Invalid token");
    }

    #[test]
    fn test_expired_signature_maps_to_token_expired() {
        let err = jsonwebtoken::errors::Error::from(
            jsonwebtoken::errors::ErrorKind::ExpiredSignature,
        );
        assert!(matches!(AuthError::from(err), AuthError::TokenExpired));

        let err = jsonwebtoken::errors::Error::from(jsonwebtoken::errors::ErrorKind::InvalidSignature);
        assert!(matches!(AuthError::from(err), AuthError::InvalidToken(_)));
    }
}
