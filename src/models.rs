use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

/// Maximum number of characters a post title may carry.
pub const TITLE_MAX_CHARS: usize = 200;
/// Number of content characters kept in a list-view excerpt.
pub const EXCERPT_CHARS: usize = 150;
/// Fixed cap applied by the "latest posts" listing.
pub const LATEST_POSTS_LIMIT: i64 = 3;

// --- Identity ---

/// Role
///
/// The RBAC field of a user. Every registration starts as `User`; `Admin` is only
/// granted by the seed command or directly in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    /// Capitalised name used in user-facing messages.
    pub fn display_name(self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Admin => "Admin",
        }
    }

    /// Unknown stored values degrade to the least privileged role.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "admin" => Role::Admin,
            _ => Role::User,
        }
    }
}

/// User
///
/// A user's public identity. The password hash never leaves the repository in
/// this shape; see `UserCredentials` for the login path.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, PartialEq)]
#[ts(export)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
}

/// UserCredentials
///
/// Internal row used only by login: identity plus the stored Argon2 PHC hash.
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user: User,
    pub password_hash: String,
}

/// NewUser
///
/// Insert payload for the credential store. The password is already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
}

/// Raw `users` row as read by sqlx.
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: String,
}

impl UserRow {
    pub fn into_credentials(self) -> UserCredentials {
        UserCredentials {
            user: User {
                id: self.id,
                name: self.name,
                email: self.email,
                role: Role::parse(&self.role),
            },
            password_hash: self.password,
        }
    }
}

// --- Auth payloads ---

/// RegisterRequest
///
/// Input for `POST /api/auth/register`. Fields are optional at the wire level so that
/// absent values are reported as validation errors instead of a deserialization failure.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct RegisterRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

/// LoginRequest
///
/// Input for `POST /api/auth/login`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UserResponse {
    pub success: bool,
    pub user: User,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginResponse {
    pub success: bool,
    pub token: String,
    pub user: User,
}

// --- Posts ---

/// AuthorSummary
///
/// The author reference expanded to its non-secret fields.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, PartialEq)]
#[ts(export)]
pub struct AuthorSummary {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

/// Post
///
/// A post as returned to clients, with its author expanded. `tags` always holds
/// the category as a singleton list.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Post {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub category: String,
    pub tags: Vec<String>,
    pub image: String,
    pub image_id: String,
    pub author: AuthorSummary,
    pub slug: String,
    pub published: bool,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

/// PostSummary
///
/// List-view shape: the full post plus a newline-free excerpt of its content.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, PartialEq)]
#[ts(export)]
pub struct PostSummary {
    #[serde(flatten)]
    pub post: Post,
    pub excerpt: String,
}

impl From<Post> for PostSummary {
    fn from(post: Post) -> Self {
        let excerpt = excerpt(&post.content, EXCERPT_CHARS);
        Self { post, excerpt }
    }
}

/// PostRow
///
/// Raw row produced by the post queries: the `posts` columns joined with the
/// author's name and email. The join is a LEFT JOIN, so author fields may be null.
#[derive(Debug, Clone, FromRow)]
pub struct PostRow {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub category: String,
    pub image: String,
    pub image_id: String,
    pub author_id: Uuid,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    pub slug: String,
    pub published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<PostRow> for Post {
    fn from(row: PostRow) -> Self {
        Post {
            id: row.id,
            tags: vec![row.category.clone()],
            title: row.title,
            content: row.content,
            category: row.category,
            image: row.image,
            image_id: row.image_id,
            author: AuthorSummary {
                id: row.author_id,
                name: row.author_name.unwrap_or_default(),
                email: row.author_email.unwrap_or_default(),
            },
            slug: row.slug,
            published: row.published,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// NewPost
///
/// Validated insert payload. The slug is derived from the title by the caller.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub title: String,
    pub slug: String,
    pub content: String,
    pub category: String,
    pub image: String,
    pub image_id: String,
    pub published: bool,
    pub author_id: Uuid,
}

/// PostChanges
///
/// Partial update. `None` leaves the column untouched. `slug` is always set
/// together with `title`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostChanges {
    pub title: Option<String>,
    pub slug: Option<String>,
    pub content: Option<String>,
    pub category: Option<String>,
    pub published: Option<bool>,
    pub image: Option<String>,
    pub image_id: Option<String>,
}

impl PostChanges {
    pub fn is_empty(&self) -> bool {
        *self == PostChanges::default()
    }
}

/// PostQuery
///
/// Store-level listing filter. Ordering is always `created_at` descending.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostQuery {
    pub category: Option<String>,
    pub published: Option<bool>,
    pub limit: Option<i64>,
}

/// PostInput
///
/// Body of `POST /api/posts` and `PUT /api/posts/{id}`, sent either as JSON or as
/// multipart form fields. In multipart form, `image` is a file part. Documentation
/// only; bodies are parsed by `upload::PostForm`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct PostInput {
    pub title: Option<String>,
    pub content: Option<String>,
    pub category: Option<String>,
    /// `true` or `"true"` publishes; anything else is a draft.
    pub published: Option<bool>,
    pub image: Option<String>,
}

// --- Post envelopes ---

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct PostListResponse {
    pub success: bool,
    pub count: usize,
    pub posts: Vec<PostSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LatestPostsResponse {
    pub success: bool,
    pub data: Vec<PostSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct PostResponse {
    pub success: bool,
    pub post: Post,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct PostMutationResponse {
    pub success: bool,
    pub data: Post,
    pub message: String,
}

/// Serializes as `{}`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[ts(export)]
pub struct EmptyData {}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct DeletedResponse {
    pub success: bool,
    pub data: EmptyData,
    pub message: String,
}

// --- Derived fields ---

/// slugify
///
/// Lowercases the title, strips every character that is not an ASCII word
/// character or a space, then collapses runs of spaces into a single hyphen.
/// `"Hello World!"` becomes `"hello-world"`.
pub fn slugify(title: &str) -> String {
    let kept: String = title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == ' ')
        .collect();

    let mut slug = String::with_capacity(kept.len());
    let mut in_spaces = false;
    for c in kept.chars() {
        if c == ' ' {
            if !in_spaces {
                slug.push('-');
            }
            in_spaces = true;
        } else {
            slug.push(c);
            in_spaces = false;
        }
    }
    slug
}

/// excerpt
///
/// Collapses each run of line breaks into one space and keeps the first
/// `max_chars` characters, appending `...` when the content was longer.
pub fn excerpt(content: &str, max_chars: usize) -> String {
    let mut flat = String::with_capacity(content.len());
    let mut in_break = false;
    for c in content.chars() {
        if c == '\n' || c == '\r' {
            if !in_break {
                flat.push(' ');
            }
            in_break = true;
        } else {
            flat.push(c);
            in_break = false;
        }
    }

    if flat.chars().count() > max_chars {
        let mut truncated: String = flat.chars().take(max_chars).collect();
        truncated.push_str("...");
        truncated
    } else {
        flat
    }
}
