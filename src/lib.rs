use axum::{
    Router,
    extract::{DefaultBodyLimit, FromRef, Request},
    http::{HeaderName, HeaderValue, Method, header},
    middleware::{self, Next},
    response::Response,
};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Core application services and components.
pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod password;
pub mod policy;
pub mod rate_limit;
pub mod repository;
pub mod storage;
pub mod upload;

// Module for routing segregation (Public, Auth, Authenticated).
pub mod routes;
use auth::AuthUser;
use routes::{auth as auth_routes, authenticated, public};

// --- Public Re-exports ---

pub use config::AppConfig;
pub use error::ApiError;
pub use policy::PostPolicies;
pub use rate_limit::RateLimiters;
pub use repository::{PostgresRepository, RepositoryState};
pub use storage::{ImageStoreState, MockImageStore, S3ImageStore};

/// Headroom on top of the image ceiling for multipart boundaries and text fields.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// ApiDoc
///
/// Auto-generates the OpenAPI document for every `/api` route and payload.
/// Served at `/api-docs/openapi.json` and rendered by Swagger UI at `/swagger-ui`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::register, handlers::login, handlers::me,
        handlers::list_posts, handlers::latest_posts, handlers::get_post,
        handlers::create_post, handlers::update_post, handlers::delete_post
    ),
    components(
        schemas(
            models::Role, models::User, models::RegisterRequest, models::LoginRequest,
            models::UserResponse, models::LoginResponse, models::AuthorSummary, models::Post,
            models::PostSummary, models::PostInput, models::PostListResponse,
            models::LatestPostsResponse, models::PostResponse, models::PostMutationResponse,
            models::EmptyData, models::DeletedResponse, error::ErrorBody,
        )
    ),
    modifiers(&BearerSecurity),
    tags(
        (name = "blog-cms", description = "Blog CMS API")
    )
)]
pub struct ApiDoc;

/// Registers the `bearer` scheme referenced by the protected routes.
struct BearerSecurity;

impl Modify for BearerSecurity {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

/// AppState
///
/// Implements the **Unified State Pattern**. The single, cloneable container
/// holding every service and the configuration shared across requests.
#[derive(Clone)]
pub struct AppState {
    /// Repository Layer: users and posts.
    pub repo: RepositoryState,
    /// Storage Layer: the external image store.
    pub images: ImageStoreState,
    /// Configuration: the loaded, immutable environment configuration.
    pub config: AppConfig,
    /// Access policies for post routes, fixed at startup from `POST_WRITE_POLICY`.
    pub policies: PostPolicies,
    /// The API-wide and credential rate limiters.
    pub limiters: RateLimiters,
}

impl AppState {
    /// Derives the policies and limiters from `config`.
    pub fn new(repo: RepositoryState, images: ImageStoreState, config: AppConfig) -> Self {
        Self {
            repo,
            images,
            policies: PostPolicies::for_write_policy(config.post_write_policy),
            limiters: RateLimiters::from_config(&config),
            config,
        }
    }
}

// --- Axum FromRef Extractor Implementations ---

// Lets extractors such as `AuthUser` pull single components out of `AppState`.

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for ImageStoreState {
    fn from_ref(app_state: &AppState) -> ImageStoreState {
        app_state.images.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// auth_middleware
///
/// Enforces authentication for the `authenticated_routes`.
///
/// *Mechanism*: extracting `AuthUser` verifies the token and re-reads the user; a
/// failure rejects the request with 401 before the handler (and its body parsing)
/// runs. On success the identity is stored in the request extensions, where the
/// handler's own `AuthUser` extractor picks it up.
async fn auth_middleware(user: AuthUser, mut request: Request, next: Next) -> Response {
    request.extensions_mut().insert(user);
    next.run(request).await
}

/// cors_layer
///
/// `origins` empty means any origin. Credentials are only allowed with an
/// explicit origin list, since browsers refuse them alongside a wildcard.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new().allow_methods([
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
    ]);

    if origins.is_empty() {
        return base.allow_origin(Any).allow_headers(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    base.allow_origin(allowed)
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

/// create_router
///
/// Assembles the routing structure, applies global and scoped middleware, and
/// registers the application state.
///
/// Layer order, outermost first: API rate limiter → CORS → request id / tracing →
/// body limit → routes. The credential limiter and the auth middleware are
/// route layers on their own modules.
pub fn create_router(state: AppState) -> Router {
    // 1. CORS Configuration
    let cors = cors_layer(&state.config.cors_origins);

    // Header name constant for Request Correlation.
    let x_request_id = HeaderName::from_static("x-request-id");

    let body_limit = state
        .config
        .max_upload_bytes
        .saturating_add(MULTIPART_OVERHEAD_BYTES);
    let api_limiter = state.limiters.api.clone();

    // 2. API Router Assembly (mounted at /api)
    let api_router = Router::new()
        // Credential routes: strict limiter, no authentication.
        .merge(auth_routes::auth_routes(state.limiters.auth.clone()))
        // Public reads: no middleware.
        .merge(public::public_api_routes())
        // Authenticated routes: identity resolved before the handler runs.
        .merge(
            authenticated::authenticated_routes().route_layer(middleware::from_fn_with_state(
                state.clone(),
                auth_middleware,
            )),
        );

    let base_router = Router::new()
        // Documentation: Serve the auto-generated Swagger UI.
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public::service_routes())
        .nest("/api", api_router)
        .fallback(handlers::route_not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        // Apply the Unified State to all routes.
        .with_state(state);

    // 3. Observability and Correlation Layers
    base_router
        .layer(
            ServiceBuilder::new()
                // 3a. Request ID Generation: a UUID for every incoming request.
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                // 3b. Request Tracing: one span per request, carrying the request id.
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                // 3c. Request ID Propagation: echo x-request-id on the response.
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        // 4. CORS Layer
        .layer(cors)
        // 5. API Rate Limiter (outermost): counts every /api request, preflights included.
        .layer(middleware::from_fn_with_state(
            api_limiter,
            rate_limit::limit_api_traffic,
        ))
}

/// trace_span_logger
///
/// Used by `TraceLayer` to build the request span. Includes the `x-request-id`
/// header so every log line of one request can be correlated.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
