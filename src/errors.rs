use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::token::TokenError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("authentication required")]
    AuthenticationRequired,

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("access token expired")]
    AccessTokenExpired,

    #[error("invalid refresh token")]
    InvalidRefreshToken,

    #[error("refresh token expired")]
    RefreshTokenExpired,

    #[error("session not active")]
    SessionNotActive,

    #[error("account not found")]
    AccountNotFound,

    #[error("session not found")]
    SessionNotFound,

    #[error("rate limit exceeded")]
    RateLimitExceeded { retry_after_secs: u64 },

    #[error("idempotency key required")]
    MissingIdempotencyKey,

    #[error("validation failed")]
    Validation(Vec<String>),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            AppError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "invalid_credentials",
                "the provided credentials are invalid".to_string(),
            ),
            AppError::AuthenticationRequired => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "authentication_required",
                "a bearer token is required".to_string(),
            ),
            AppError::Token(e) => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                match e {
                    TokenError::InvalidFormat => "invalid_token_format",
                    TokenError::InvalidSignature => "invalid_token_signature",
                    TokenError::InvalidPayload => "invalid_token_payload",
                },
                e.to_string(),
            ),
            AppError::AccessTokenExpired => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "access_token_expired",
                "access token has expired".to_string(),
            ),
            AppError::InvalidRefreshToken => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "invalid_refresh_token",
                "refresh token is not recognized".to_string(),
            ),
            AppError::RefreshTokenExpired => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "refresh_token_expired",
                "refresh token has expired, please login again".to_string(),
            ),
            AppError::SessionNotActive => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "session_not_active",
                "session is no longer active".to_string(),
            ),
            AppError::AccountNotFound => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "account_not_found",
                "user account could not be located".to_string(),
            ),
            AppError::SessionNotFound => (
                StatusCode::NOT_FOUND,
                "not_found_error",
                "session_not_found",
                "session could not be found for the user".to_string(),
            ),
            AppError::RateLimitExceeded { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limit_error",
                "rate_limit_exceeded",
                "too many requests, please try again later".to_string(),
            ),
            AppError::MissingIdempotencyKey => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "idempotency_key_required",
                "Idempotency-Key header is required for this endpoint".to_string(),
            ),
            AppError::Validation(errors) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "validation_failed",
                format!("request validation failed with {} error(s)", errors.len()),
            ),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let mut body = json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        });

        if let AppError::Validation(errors) = &self {
            body["error"]["details"] = json!(errors);
        }

        let mut response = (status, Json(body)).into_response();

        // Tell the client how long to back off before retrying.
        if let AppError::RateLimitExceeded { retry_after_secs } = self {
            if let Ok(val) = axum::http::HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert("retry-after", val);
            }
        }

        response
    }
}
