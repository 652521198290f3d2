use crate::{
    AppState,
    auth::{self, AuthUser, unix_now},
    error::{ApiError, ErrorBody},
    models::{
        DeletedResponse, EmptyData, LATEST_POSTS_LIMIT, LatestPostsResponse, LoginRequest,
        LoginResponse, Post, PostInput, PostListResponse, PostMutationResponse, PostQuery,
        PostResponse, PostSummary, RegisterRequest, User, UserResponse,
    },
    policy::authorize,
    storage::discard_image,
    upload::PostForm,
};
use axum::{
    Json,
    extract::{Path, Query, Request, State, rejection::JsonRejection},
    http::{Method, StatusCode, Uri},
};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

// --- Filter Structs ---

/// PostFilter
///
/// Query parameters accepted by `GET /api/posts`. Values are taken as raw strings
/// so that the handler decides how each one is interpreted.
#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
pub struct PostFilter {
    /// Exact category match.
    pub category: Option<String>,
    /// `"true"` for published posts only; any other value for drafts only.
    pub published: Option<String>,
    /// Maximum number of posts returned.
    pub limit: Option<String>,
}

impl PostFilter {
    fn into_query(self) -> Result<PostQuery, ApiError> {
        let limit = match self.limit.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => match raw.parse::<i64>() {
                Ok(n) if n > 0 => Some(n),
                _ => return Err(ApiError::validation("limit must be a positive integer")),
            },
        };

        Ok(PostQuery {
            category: self.category.filter(|c| !c.is_empty()),
            published: self.published.map(|p| p == "true"),
            limit,
        })
    }
}

/// Parses a post id path segment. Anything that is not a UUID is a client error.
fn parse_post_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::validation("Invalid ID format"))
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::validation(rejection.body_text()))
}

// --- Service Handlers ---

/// root
///
/// [Public Route] Welcome document listing the API roots.
pub async fn root() -> Json<Value> {
    Json(json!({
        "success": true,
        "message": "Welcome to Blog CMS API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "auth": "/api/auth",
            "posts": "/api/posts",
        },
        "documentation": "/swagger-ui",
    }))
}

/// route_not_found
///
/// Router fallback. Answers every unmatched route with a JSON 404.
pub async fn route_not_found(method: Method, uri: Uri) -> ApiError {
    ApiError::not_found(format!("Route not found: {} {}", method, uri))
}

// --- Auth Handlers ---

/// register
///
/// [Public Route] Creates a `user`-role account. Rate limited with the strict
/// credential limiter.
#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Registered", body = UserResponse),
        (status = 400, description = "Validation failed or email taken", body = ErrorBody),
        (status = 429, description = "Too many attempts", body = ErrorBody)
    )
)]
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    let request = json_body(payload)?;
    let user = auth::register(state.repo.as_ref(), request).await?;

    Ok((
        StatusCode::CREATED,
        Json(UserResponse {
            success: true,
            user,
        }),
    ))
}

/// login
///
/// [Public Route] Exchanges email and password for a bearer token.
#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Token issued", body = LoginResponse),
        (status = 400, description = "Missing email or password", body = ErrorBody),
        (status = 401, description = "Invalid credentials", body = ErrorBody),
        (status = 429, description = "Too many attempts", body = ErrorBody)
    )
)]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, ApiError> {
    let request = json_body(payload)?;
    let email = request.email.unwrap_or_default();
    let password = request.password.unwrap_or_default();

    if email.trim().is_empty() || password.is_empty() {
        return Err(ApiError::validation("Please provide email and password"));
    }

    let (token, user) =
        auth::login(state.repo.as_ref(), &state.config, &email, &password, unix_now()).await?;
    tracing::info!(user_id = %user.id, "User logged in");

    Ok(Json(LoginResponse {
        success: true,
        token,
        user,
    }))
}

/// me
///
/// [Authenticated Route] Returns the identity resolved from the bearer token.
#[utoipa::path(
    get,
    path = "/api/auth/me",
    responses(
        (status = 200, description = "Current user", body = UserResponse),
        (status = 401, description = "Not authenticated", body = ErrorBody)
    ),
    security(("bearer" = []))
)]
pub async fn me(user: AuthUser) -> Json<UserResponse> {
    Json(UserResponse {
        success: true,
        user: User {
            id: user.id,
            name: user.name,
            email: user.email,
            role: user.role,
        },
    })
}

// --- Post Read Handlers ---

/// list_posts
///
/// [Public Route] Lists posts newest first, filtered by category and published
/// state. Omitting `published` returns drafts and published posts alike.
#[utoipa::path(
    get,
    path = "/api/posts",
    params(PostFilter),
    responses(
        (status = 200, description = "Filtered posts", body = PostListResponse),
        (status = 400, description = "Invalid limit", body = ErrorBody)
    )
)]
pub async fn list_posts(
    State(state): State<AppState>,
    Query(filter): Query<PostFilter>,
) -> Result<Json<PostListResponse>, ApiError> {
    let query = filter.into_query()?;
    let posts: Vec<PostSummary> = state
        .repo
        .list_posts(query)
        .await?
        .into_iter()
        .map(PostSummary::from)
        .collect();

    Ok(Json(PostListResponse {
        success: true,
        count: posts.len(),
        posts,
    }))
}

/// latest_posts
///
/// [Public Route] The three most recent published posts.
#[utoipa::path(
    get,
    path = "/api/posts/latest",
    responses((status = 200, description = "Latest published posts", body = LatestPostsResponse))
)]
pub async fn latest_posts(
    State(state): State<AppState>,
) -> Result<Json<LatestPostsResponse>, ApiError> {
    let query = PostQuery {
        category: None,
        published: Some(true),
        limit: Some(LATEST_POSTS_LIMIT),
    };
    let data = state
        .repo
        .list_posts(query)
        .await?
        .into_iter()
        .map(PostSummary::from)
        .collect();

    Ok(Json(LatestPostsResponse {
        success: true,
        data,
    }))
}

/// get_post
///
/// [Public Route] A single post with its author expanded.
#[utoipa::path(
    get,
    path = "/api/posts/{id}",
    params(("id" = Uuid, Path, description = "Post ID")),
    responses(
        (status = 200, description = "Found", body = PostResponse),
        (status = 400, description = "Malformed id", body = ErrorBody),
        (status = 404, description = "Not Found", body = ErrorBody)
    )
)]
pub async fn get_post(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PostResponse>, ApiError> {
    let id = parse_post_id(&id)?;
    let post = state
        .repo
        .get_post(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Post not found"))?;

    Ok(Json(PostResponse {
        success: true,
        post,
    }))
}

// --- Post Mutation Handlers ---

/// create_post
///
/// [Authenticated Route] Creates a post owned by the caller.
///
/// *Pipeline*: authorize → parse body → validate → upload image → store write.
/// The body is not read until the caller is authorized.
#[utoipa::path(
    post,
    path = "/api/posts",
    request_body(content = PostInput, description = "JSON or multipart form with optional `image` file"),
    responses(
        (status = 201, description = "Created", body = PostMutationResponse),
        (status = 400, description = "Validation failed", body = ErrorBody),
        (status = 401, description = "Not authenticated", body = ErrorBody),
        (status = 403, description = "Forbidden", body = ErrorBody),
        (status = 500, description = "Image upload failed", body = ErrorBody)
    ),
    security(("bearer" = []))
)]
pub async fn create_post(
    user: AuthUser,
    State(state): State<AppState>,
    request: Request,
) -> Result<(StatusCode, Json<PostMutationResponse>), ApiError> {
    authorize(Some(&user), state.policies.create, None)?;

    let form = PostForm::parse(request, state.config.max_upload_bytes).await?;
    let (mut new_post, image) = form.validate_create(user.id)?;

    if let Some(image) = image {
        let stored = state.images.upload(&image).await?;
        new_post.image = stored.url;
        new_post.image_id = stored.reference_id;
    }

    let uploaded_id = new_post.image_id.clone();
    let post = match state.repo.create_post(new_post).await {
        Ok(post) => post,
        Err(e) => {
            discard_image(state.images.as_ref(), &uploaded_id).await;
            return Err(e.into());
        }
    };

    tracing::info!(post_id = %post.id, slug = %post.slug, author = %user.id, "Post created");

    Ok((
        StatusCode::CREATED,
        Json(PostMutationResponse {
            success: true,
            data: post,
            message: "Post created successfully".to_string(),
        }),
    ))
}

/// update_post
///
/// [Authenticated Route] Partially updates a post.
///
/// *Authorization*: the post is loaded first (404 if missing) so the ownership
/// policy can compare its author with the caller. A new image replaces the old
/// one; the old remote object is deleted best-effort after the store write.
#[utoipa::path(
    put,
    path = "/api/posts/{id}",
    params(("id" = Uuid, Path, description = "Post ID")),
    request_body(content = PostInput, description = "JSON or multipart form; at least one field"),
    responses(
        (status = 200, description = "Updated", body = PostMutationResponse),
        (status = 400, description = "Validation failed", body = ErrorBody),
        (status = 401, description = "Not authenticated", body = ErrorBody),
        (status = 403, description = "Not the author", body = ErrorBody),
        (status = 404, description = "Not Found", body = ErrorBody)
    ),
    security(("bearer" = []))
)]
pub async fn update_post(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    request: Request,
) -> Result<Json<PostMutationResponse>, ApiError> {
    let id = parse_post_id(&id)?;
    let existing = load_post(&state, id).await?;
    authorize(Some(&user), state.policies.modify, Some(existing.author.id))?;

    let form = PostForm::parse(request, state.config.max_upload_bytes).await?;
    let (mut changes, image) = form.validate_update()?;

    let mut uploaded_id = None;
    if let Some(image) = image {
        let stored = state.images.upload(&image).await?;
        changes.image = Some(stored.url);
        changes.image_id = Some(stored.reference_id.clone());
        uploaded_id = Some(stored.reference_id);
    }

    let post = match state.repo.update_post(id, changes).await {
        Ok(Some(post)) => post,
        result => {
            if let Some(uploaded_id) = &uploaded_id {
                discard_image(state.images.as_ref(), uploaded_id).await;
            }
            return Err(match result {
                Err(e) => e.into(),
                _ => ApiError::not_found("Post not found"),
            });
        }
    };

    // The old object is only released once the post no longer points at it.
    if uploaded_id.is_some() {
        discard_image(state.images.as_ref(), &existing.image_id).await;
    }

    tracing::info!(post_id = %post.id, slug = %post.slug, author = %user.id, "Post updated");

    Ok(Json(PostMutationResponse {
        success: true,
        data: post,
        message: "Post updated successfully".to_string(),
    }))
}

/// delete_post
///
/// [Authenticated Route] Deletes a post and then, best-effort, its remote image.
/// A failed store delete leaves the image in place.
#[utoipa::path(
    delete,
    path = "/api/posts/{id}",
    params(("id" = Uuid, Path, description = "Post ID")),
    responses(
        (status = 200, description = "Deleted", body = DeletedResponse),
        (status = 401, description = "Not authenticated", body = ErrorBody),
        (status = 403, description = "Not the author", body = ErrorBody),
        (status = 404, description = "Not Found", body = ErrorBody)
    ),
    security(("bearer" = []))
)]
pub async fn delete_post(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeletedResponse>, ApiError> {
    let id = parse_post_id(&id)?;
    let existing = load_post(&state, id).await?;
    authorize(Some(&user), state.policies.modify, Some(existing.author.id))?;

    if !state.repo.delete_post(id).await? {
        return Err(ApiError::not_found("Post not found"));
    }

    discard_image(state.images.as_ref(), &existing.image_id).await;

    tracing::info!(post_id = %id, slug = %existing.slug, author = %user.id, "Post deleted");

    Ok(Json(DeletedResponse {
        success: true,
        data: EmptyData {},
        message: "Post deleted successfully".to_string(),
    }))
}

async fn load_post(state: &AppState, id: Uuid) -> Result<Post, ApiError> {
    state
        .repo
        .get_post(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Post not found"))
}
