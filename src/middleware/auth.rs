//! Bearer-token authentication middleware.
//!
//! Verifies the `Authorization: Bearer <token>` header, resolves the caller
//! through the orchestrator, and attaches an [`AuthenticatedUser`] extension
//! that handlers pull out via its `FromRequestParts` impl.

use std::sync::Arc;

use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;

use crate::auth::AuthenticatedUser;
use crate::errors::AppError;
use crate::AppState;

pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::AuthenticationRequired)?;

    let token = match header.split_once(' ') {
        Some(("Bearer", token)) if !token.is_empty() => token,
        _ => return Err(AppError::AuthenticationRequired),
    };

    let user = state.auth.verify_access_token(token).await?;
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or(AppError::AuthenticationRequired)
    }
}
