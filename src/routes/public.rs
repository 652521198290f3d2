use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// Service Routes
///
/// Unauthenticated, outside `/api` and therefore outside the API rate limiter.
pub fn service_routes() -> Router<AppState> {
    Router::new()
        // GET /
        // Welcome document pointing at the API roots.
        .route("/", get(handlers::root))
        // GET /health
        // Liveness probe for load balancers. Returns "ok" without touching the store.
        .route("/health", get(|| async { "ok" }))
}

/// Public API Routes
///
/// Read-only post endpoints, mounted under `/api`. Anyone may call them; the
/// handlers still evaluate the configured read policy.
pub fn public_api_routes() -> Router<AppState> {
    Router::new()
        // GET /posts?category=&published=&limit=
        // Newest first. Omitting `published` returns drafts too.
        .route("/posts", get(handlers::list_posts))
        // GET /posts/latest
        // The three most recent published posts. Static segment wins over `{id}`.
        .route("/posts/latest", get(handlers::latest_posts))
        // GET /posts/{id}
        // 400 for a malformed id, 404 for an unknown one.
        .route("/posts/{id}", get(handlers::get_post))
}
