use crate::{
    AppState, handlers,
    rate_limit::{RateLimiter, limit_credential_requests},
};
use axum::{Router, middleware, routing::post};
use std::sync::Arc;

/// Credential Router Module
///
/// Register and login, mounted under `/api`. Both are wrapped in the strict
/// limiter (5 requests per window by default) on top of the API-wide limiter.
/// `GET /auth/me` needs a token and lives in the authenticated module.
pub fn auth_routes(limiter: Arc<RateLimiter>) -> Router<AppState> {
    Router::new()
        // POST /auth/register
        // Creates a `user`-role account. Duplicate emails are a 400.
        .route("/auth/register", post(handlers::register))
        // POST /auth/login
        // Issues a bearer token. Unknown email and wrong password are indistinguishable.
        .route("/auth/login", post(handlers::login))
        .route_layer(middleware::from_fn_with_state(
            limiter,
            limit_credential_requests,
        ))
}
