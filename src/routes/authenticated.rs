use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Authenticated Router Module
///
/// Routes that require a valid bearer token, mounted under `/api`.
///
/// Access Control Strategy:
/// The whole router is wrapped in the `auth_middleware` layer, which resolves the
/// `AuthUser` before any handler runs, so an anonymous request is refused with 401
/// before its body is read. Role and ownership checks are per-route
/// `AccessPolicy` evaluations inside the post handlers, after the target post
/// has been loaded.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // GET /auth/me
        // The identity behind the presented token.
        .route("/auth/me", get(handlers::me))
        // POST /posts
        // Creates a post. Accepts JSON or multipart with an optional `image` file.
        .route("/posts", post(handlers::create_post))
        // PUT/DELETE /posts/{id}
        // Update or remove a post. Guarded by the configured modify policy
        // (author only, or admin author only).
        .route(
            "/posts/{id}",
            put(handlers::update_post).delete(handlers::delete_post),
        )
}
