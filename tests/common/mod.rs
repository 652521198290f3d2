#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    extract::ConnectInfo,
    http::{Request, Response, header},
};
use blog_cms::{
    AppConfig, AppState, MockImageStore, create_router,
    models::{
        AuthorSummary, NewPost, NewUser, Post, PostChanges, PostQuery, Role, TITLE_MAX_CHARS,
        User, UserCredentials,
    },
    repository::{RepoError, Repository},
    storage::ImageStoreState,
};
use chrono::Utc;
use serde_json::Value;
use std::{
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};
use tower::ServiceExt;
use uuid::Uuid;

// --- IN-MEMORY REPOSITORY ---

struct StoredPost {
    post: NewPost,
    id: Uuid,
    created_at: chrono::DateTime<Utc>,
    updated_at: chrono::DateTime<Utc>,
}

/// InMemoryRepository
///
/// Behaves like the Postgres repository for everything the handlers observe:
/// unique emails and slugs, author expansion, newest-first ordering.
#[derive(Default)]
pub struct InMemoryRepository {
    users: Mutex<Vec<UserCredentials>>,
    // Insertion order; newest last.
    posts: Mutex<Vec<StoredPost>>,
    fail_post_writes: AtomicBool,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_role(&self, email: &str, role: Role) {
        let mut users = self.users.lock().unwrap();
        if let Some(creds) = users.iter_mut().find(|c| c.user.email == email) {
            creds.user.role = role;
        }
    }

    pub fn remove_user(&self, id: Uuid) {
        self.users.lock().unwrap().retain(|c| c.user.id != id);
    }

    /// Makes every later post update and delete fail with a database error.
    pub fn fail_post_writes(&self) {
        self.fail_post_writes.store(true, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), RepoError> {
        if self.fail_post_writes.load(Ordering::SeqCst) {
            return Err(RepoError::Database("connection reset".to_string()));
        }
        Ok(())
    }

    pub fn post_count(&self) -> usize {
        self.posts.lock().unwrap().len()
    }

    fn expand(&self, stored: &StoredPost) -> Post {
        let users = self.users.lock().unwrap();
        let author = users
            .iter()
            .find(|c| c.user.id == stored.post.author_id)
            .map(|c| AuthorSummary {
                id: c.user.id,
                name: c.user.name.clone(),
                email: c.user.email.clone(),
            })
            .unwrap_or(AuthorSummary {
                id: stored.post.author_id,
                name: String::new(),
                email: String::new(),
            });

        Post {
            id: stored.id,
            title: stored.post.title.clone(),
            content: stored.post.content.clone(),
            category: stored.post.category.clone(),
            tags: vec![stored.post.category.clone()],
            image: stored.post.image.clone(),
            image_id: stored.post.image_id.clone(),
            author,
            slug: stored.post.slug.clone(),
            published: stored.post.published,
            created_at: stored.created_at,
            updated_at: stored.updated_at,
        }
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn find_credentials_by_email(
        &self,
        email: &str,
    ) -> Result<Option<UserCredentials>, RepoError> {
        let users = self.users.lock().unwrap();
        Ok(users.iter().find(|c| c.user.email == email).cloned())
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, RepoError> {
        let users = self.users.lock().unwrap();
        Ok(users.iter().find(|c| c.user.id == id).map(|c| c.user.clone()))
    }

    async fn create_user(&self, user: NewUser) -> Result<User, RepoError> {
        let mut users = self.users.lock().unwrap();
        if users.iter().any(|c| c.user.email == user.email) {
            return Err(RepoError::Duplicate {
                field: "email".to_string(),
            });
        }
        let created = User {
            id: Uuid::new_v4(),
            name: user.name,
            email: user.email,
            role: user.role,
        };
        users.push(UserCredentials {
            user: created.clone(),
            password_hash: user.password_hash,
        });
        Ok(created)
    }

    async fn list_posts(&self, query: PostQuery) -> Result<Vec<Post>, RepoError> {
        let posts = self.posts.lock().unwrap();
        let limit = query.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        Ok(posts
            .iter()
            .rev()
            .filter(|p| query.category.as_ref().is_none_or(|c| &p.post.category == c))
            .filter(|p| query.published.is_none_or(|flag| p.post.published == flag))
            .take(limit)
            .map(|p| self.expand(p))
            .collect())
    }

    async fn get_post(&self, id: Uuid) -> Result<Option<Post>, RepoError> {
        let posts = self.posts.lock().unwrap();
        Ok(posts.iter().find(|p| p.id == id).map(|p| self.expand(p)))
    }

    async fn create_post(&self, post: NewPost) -> Result<Post, RepoError> {
        if post.title.chars().count() > TITLE_MAX_CHARS {
            return Err(RepoError::Invalid(
                "Title cannot exceed 200 characters".to_string(),
            ));
        }
        let mut posts = self.posts.lock().unwrap();
        if posts.iter().any(|p| p.post.slug == post.slug) {
            return Err(RepoError::Duplicate {
                field: "slug".to_string(),
            });
        }
        let now = Utc::now();
        let stored = StoredPost {
            post,
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
        };
        let expanded = self.expand(&stored);
        posts.push(stored);
        Ok(expanded)
    }

    async fn update_post(&self, id: Uuid, changes: PostChanges) -> Result<Option<Post>, RepoError> {
        self.check_writable()?;
        let mut posts = self.posts.lock().unwrap();
        if let Some(slug) = &changes.slug {
            if posts.iter().any(|p| p.id != id && &p.post.slug == slug) {
                return Err(RepoError::Duplicate {
                    field: "slug".to_string(),
                });
            }
        }
        let Some(stored) = posts.iter_mut().find(|p| p.id == id) else {
            return Ok(None);
        };
        if let Some(title) = changes.title {
            stored.post.title = title;
        }
        if let Some(slug) = changes.slug {
            stored.post.slug = slug;
        }
        if let Some(content) = changes.content {
            stored.post.content = content;
        }
        if let Some(category) = changes.category {
            stored.post.category = category;
        }
        if let Some(published) = changes.published {
            stored.post.published = published;
        }
        if let Some(image) = changes.image {
            stored.post.image = image;
        }
        if let Some(image_id) = changes.image_id {
            stored.post.image_id = image_id;
        }
        stored.updated_at = Utc::now();
        Ok(Some(self.expand(stored)))
    }

    async fn delete_post(&self, id: Uuid) -> Result<bool, RepoError> {
        self.check_writable()?;
        let mut posts = self.posts.lock().unwrap();
        let before = posts.len();
        posts.retain(|p| p.id != id);
        Ok(posts.len() < before)
    }
}

// --- TEST APPLICATION ---

/// Config with quotas high enough that ordinary tests never hit them.
pub fn test_config() -> AppConfig {
    AppConfig {
        auth_rate_limit_max: 1_000,
        api_rate_limit_max: 1_000,
        ..AppConfig::default()
    }
}

pub struct TestApp {
    pub router: Router,
    pub repo: Arc<InMemoryRepository>,
    pub images: Arc<MockImageStore>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with(test_config(), MockImageStore::new())
    }

    pub fn with_config(config: AppConfig) -> Self {
        Self::with(config, MockImageStore::new())
    }

    pub fn with(config: AppConfig, images: MockImageStore) -> Self {
        let repo = Arc::new(InMemoryRepository::new());
        let images = Arc::new(images);
        let state = AppState::new(
            repo.clone(),
            images.clone() as ImageStoreState,
            config,
        );
        Self {
            router: create_router(state),
            repo,
            images,
        }
    }

    /// Sends one request through the full middleware stack.
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Sends a request and returns its status and parsed JSON body.
    pub async fn call(&self, request: Request<Body>) -> (u16, Value) {
        let response = self.send(request).await;
        let status = response.status().as_u16();
        (status, body_json(response).await)
    }

    /// Registers a user and returns their bearer token.
    pub async fn sign_up(&self, name: &str, email: &str) -> String {
        let (status, _) = self
            .call(json_request(
                "POST",
                "/api/auth/register",
                None,
                serde_json::json!({ "name": name, "email": email, "password": "secret123" }),
            ))
            .await;
        assert_eq!(status, 201, "registration of {} failed", email);

        let (status, body) = self
            .call(json_request(
                "POST",
                "/api/auth/login",
                None,
                serde_json::json!({ "email": email, "password": "secret123" }),
            ))
            .await;
        assert_eq!(status, 200, "login of {} failed", email);
        body["token"].as_str().unwrap().to_string()
    }

    /// Creates a post through the API and returns its JSON representation.
    pub async fn create_post(&self, token: &str, body: Value) -> Value {
        let (status, response) = self
            .call(json_request("POST", "/api/posts", Some(token), body))
            .await;
        assert_eq!(status, 201, "post creation failed: {}", response);
        response["data"].clone()
    }
}

// --- REQUEST BUILDERS ---

pub fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn authed(method: &str, uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

/// Attaches a peer address the way `into_make_service_with_connect_info` does.
pub fn from_peer(mut request: Request<Body>, peer: &str) -> Request<Body> {
    let addr: SocketAddr = peer.parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

pub const BOUNDARY: &str = "X-BLOG-CMS-BOUNDARY";

/// One part of a `multipart/form-data` body.
#[derive(Clone, Copy)]
pub enum Part<'a> {
    Text(&'a str, &'a str),
    File {
        name: &'a str,
        filename: &'a str,
        content_type: &'a str,
        bytes: &'a [u8],
    },
}

pub fn text<'a>(name: &'a str, value: &'a str) -> Part<'a> {
    Part::Text(name, value)
}

pub fn file<'a>(name: &'a str, filename: &'a str, content_type: &'a str, bytes: &'a [u8]) -> Part<'a> {
    Part::File {
        name,
        filename,
        content_type,
        bytes,
    }
}

pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match *part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name)
                        .as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File {
                name,
                filename,
                content_type,
                bytes,
            } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                        name, filename, content_type
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub fn multipart_request(method: &str, uri: &str, token: &str, parts: &[Part<'_>]) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}

pub fn form_request(method: &str, uri: &str, token: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).unwrap_or(Value::String(String::from_utf8_lossy(&bytes).into_owned()))
}
