//! HTTP handlers for the authentication endpoints.
//!
//! Bodies are parsed by hand from `serde_json::Value` so validation failures
//! aggregate into one 400 with a `details` array rather than surfacing as
//! axum's generic deserialization rejection.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde_json::{json, Value};

use crate::auth::{AuthenticatedUser, ClientInfo, LoginRequest};
use crate::errors::AppError;
use crate::middleware::trace::TraceId;
use crate::AppState;

use super::validation::{is_email, optional_string, required_string, Violations};

const MIN_PASSWORD_LEN: usize = 6;
const MAX_DEVICE_NAME_LEN: usize = 120;
const MIN_REFRESH_TOKEN_LEN: usize = 10;

fn parse_login(body: &Value) -> Result<LoginRequest, AppError> {
    let mut violations = Violations::new();

    let email = required_string(body, "email", &mut violations);
    if let Some(email) = email {
        if !is_email(email) {
            violations.push("email must be a valid email address");
        }
    }

    let password = required_string(body, "password", &mut violations);
    if let Some(password) = password {
        if password.len() < MIN_PASSWORD_LEN {
            violations.push(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            ));
        }
    }

    let device_id = optional_string(body, "deviceId", &mut violations).map(String::from);
    let device_name = optional_string(body, "deviceName", &mut violations).map(String::from);
    if let Some(name) = &device_name {
        if name.chars().count() > MAX_DEVICE_NAME_LEN {
            violations.push(format!(
                "deviceName must be at most {MAX_DEVICE_NAME_LEN} characters"
            ));
        }
    }

    violations.into_result().map_err(AppError::Validation)?;
    Ok(LoginRequest {
        email: email.unwrap_or_default().to_string(),
        password: password.unwrap_or_default().to_string(),
        device_id,
        device_name,
    })
}

fn parse_refresh(body: &Value) -> Result<String, AppError> {
    let mut violations = Violations::new();

    let token = required_string(body, "refreshToken", &mut violations);
    if let Some(token) = token {
        if token.len() < MIN_REFRESH_TOKEN_LEN {
            violations.push(format!(
                "refreshToken must be at least {MIN_REFRESH_TOKEN_LEN} characters"
            ));
        }
    }

    violations.into_result().map_err(AppError::Validation)?;
    Ok(token.unwrap_or_default().to_string())
}

fn client_info(headers: &HeaderMap) -> ClientInfo {
    ClientInfo {
        ip_address: headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()),
        user_agent: headers
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .map(String::from),
    }
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Extension(trace): Extension<TraceId>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let request = parse_login(&body)?;
    let tokens = state
        .auth
        .login(request, Some(&trace.0), client_info(&headers))
        .await?;
    Ok(Json(tokens))
}

pub async fn refresh(
    State(state): State<Arc<AppState>>,
    Extension(trace): Extension<TraceId>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let refresh_token = parse_refresh(&body)?;
    let tokens = state.auth.refresh(&refresh_token, Some(&trace.0)).await?;
    Ok(Json(tokens))
}

pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, AppError> {
    let sessions = state.auth.list_sessions(&user.id).await?;
    Ok(Json(json!({ "sessions": sessions })))
}

pub async fn revoke_session(
    State(state): State<Arc<AppState>>,
    Extension(trace): Extension<TraceId>,
    user: AuthenticatedUser,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state
        .auth
        .revoke_session(&user.id, &session_id, Some(&trace.0))
        .await?;
    Ok(Json(json!({ "status": "revoked", "sessionId": session_id })))
}

pub async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_parse_collects_every_violation() {
        let err = parse_login(&json!({
            "email": "not-an-email",
            "password": "pw",
            "deviceName": "x".repeat(121),
        }))
        .unwrap_err();

        let AppError::Validation(details) = err else {
            panic!("expected validation error");
        };
        assert_eq!(details.len(), 3);
        assert!(details[0].contains("email"));
        assert!(details[1].contains("password"));
        assert!(details[2].contains("deviceName"));
    }

    #[test]
    fn login_parse_accepts_minimal_and_full_bodies() {
        let minimal = parse_login(&json!({
            "email": "learner@example.com",
            "password": "Learner#123",
        }))
        .unwrap();
        assert!(minimal.device_id.is_none());

        let full = parse_login(&json!({
            "email": "learner@example.com",
            "password": "Learner#123",
            "deviceId": "ios-uuid",
            "deviceName": "iPhone 15 Pro",
        }))
        .unwrap();
        assert_eq!(full.device_id.as_deref(), Some("ios-uuid"));
        assert_eq!(full.device_name.as_deref(), Some("iPhone 15 Pro"));
    }

    #[test]
    fn refresh_parse_enforces_minimum_length() {
        assert!(parse_refresh(&json!({ "refreshToken": "short" })).is_err());
        assert!(parse_refresh(&json!({})).is_err());
        assert!(parse_refresh(&json!({ "refreshToken": "long-enough-token" })).is_ok());
    }

    #[test]
    fn client_info_reads_the_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "10.0.0.9, 172.16.0.1".parse().unwrap());
        headers.insert("user-agent", "test-agent/1.0".parse().unwrap());

        let info = client_info(&headers);
        assert_eq!(info.ip_address.as_deref(), Some("10.0.0.9"));
        assert_eq!(info.user_agent.as_deref(), Some("test-agent/1.0"));

        let empty = client_info(&HeaderMap::new());
        assert!(empty.ip_address.is_none());
    }
}
