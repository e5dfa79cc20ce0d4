//! Router assembly.
//!
//! Guard ordering per route, outermost first: trace propagation, rate
//! limiting, authentication (where required), idempotency, handler. With
//! `route_layer` the last layer added runs first, so layers are added in
//! the reverse of that order.

pub mod auth_handlers;
pub mod validation;

use std::sync::Arc;

use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, post};
use axum::{middleware, Router};
use tower_http::trace::TraceLayer;

use crate::middleware::idempotency::{self, RouteIdempotency};
use crate::middleware::rate_limit::{self, RatePolicy, RouteRatePolicy};
use crate::middleware::{auth, trace};
use crate::AppState;

const LOGIN_POLICY: RatePolicy = RatePolicy::new(5, 60_000);
const REFRESH_POLICY: RatePolicy = RatePolicy::new(10, 60_000);
const REVOKE_POLICY: RatePolicy = RatePolicy::new(30, 60_000);

fn rate(state: &Arc<AppState>, policy: RatePolicy) -> RouteRatePolicy {
    RouteRatePolicy {
        state: state.clone(),
        policy,
    }
}

fn idem(state: &Arc<AppState>, required: bool) -> RouteIdempotency {
    RouteIdempotency {
        state: state.clone(),
        required,
    }
}

pub fn app_router(state: Arc<AppState>) -> Router {
    let default_policy = RatePolicy::new(
        state.config.default_rate_limit,
        state.config.default_rate_limit_window_ms,
    );

    let login = Router::new()
        .route("/auth/login", post(auth_handlers::login))
        .route_layer(from_fn_with_state(
            idem(&state, true),
            idempotency::replay_or_execute,
        ))
        .route_layer(from_fn_with_state(
            rate(&state, LOGIN_POLICY),
            rate_limit::enforce,
        ));

    let refresh = Router::new()
        .route("/auth/refresh", post(auth_handlers::refresh))
        .route_layer(from_fn_with_state(
            idem(&state, true),
            idempotency::replay_or_execute,
        ))
        .route_layer(from_fn_with_state(
            rate(&state, REFRESH_POLICY),
            rate_limit::enforce,
        ));

    let sessions = Router::new()
        .route("/auth/sessions", get(auth_handlers::list_sessions))
        .route_layer(from_fn_with_state(state.clone(), auth::require_auth))
        .route_layer(from_fn_with_state(
            rate(&state, default_policy),
            rate_limit::enforce,
        ));

    let revoke = Router::new()
        .route("/auth/sessions/:session_id", delete(auth_handlers::revoke_session))
        .route_layer(from_fn_with_state(
            idem(&state, true),
            idempotency::replay_or_execute,
        ))
        .route_layer(from_fn_with_state(state.clone(), auth::require_auth))
        .route_layer(from_fn_with_state(
            rate(&state, REVOKE_POLICY),
            rate_limit::enforce,
        ));

    Router::new()
        .nest(
            "/api/v1",
            Router::new()
                .merge(login)
                .merge(refresh)
                .merge(sessions)
                .merge(revoke),
        )
        .route("/healthz", get(auth_handlers::healthz))
        .layer(middleware::from_fn(trace::propagate))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
