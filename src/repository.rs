use crate::models::{
    NewPost, NewUser, Post, PostChanges, PostQuery, PostRow, User, UserCredentials, UserRow,
};
use async_trait::async_trait;
use sqlx::{PgPool, query_builder::QueryBuilder};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// RepoError
///
/// Store failures the pipeline needs to tell apart: uniqueness violations and
/// schema-level rejections are client errors; everything else is internal.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("duplicate value for unique field `{field}`")]
    Duplicate { field: String },
    #[error("value rejected by the store: {0}")]
    Invalid(String),
    #[error("database error: {0}")]
    Database(String),
}

/// Repository Trait
///
/// The abstract contract for all persistence operations, covering both the
/// credential store (users) and the content store (posts). Handlers depend on
/// `Arc<dyn Repository>` only, so tests swap in an in-memory implementation.
///
/// Post reads always return the author expanded to name and email.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Credential store ---
    async fn find_credentials_by_email(&self, email: &str) -> Result<Option<UserCredentials>, RepoError>;
    // Identity without the password hash.
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, RepoError>;
    async fn create_user(&self, user: NewUser) -> Result<User, RepoError>;

    // --- Content store ---
    // Filtered listing, newest first.
    async fn list_posts(&self, query: PostQuery) -> Result<Vec<Post>, RepoError>;
    async fn get_post(&self, id: Uuid) -> Result<Option<Post>, RepoError>;
    async fn create_post(&self, post: NewPost) -> Result<Post, RepoError>;
    // Partial update; `None` when the post does not exist.
    async fn update_post(&self, id: Uuid, changes: PostChanges) -> Result<Option<Post>, RepoError>;
    // True if a row was removed.
    async fn delete_post(&self, id: Uuid) -> Result<bool, RepoError>;
}

/// RepositoryState
///
/// The concrete type used to share persistence access across the application state.
pub type RepositoryState = Arc<dyn Repository>;

/// PostgresRepository
///
/// The concrete implementation of `Repository`, backed by PostgreSQL.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// Columns selected from a `p` (posts) alias joined with `u` (users).
const POST_COLUMNS: &str = r#"
    p.id, p.title, p.content, p.category, p.image, p.image_id, p.author_id,
    u.name AS author_name, u.email AS author_email,
    p.slug, p.published, p.created_at, p.updated_at
"#;

/// map_db_error
///
/// Translates driver errors into `RepoError`. Unique violations are resolved to
/// the offending field through the constraint name.
fn map_db_error(err: sqlx::Error) -> RepoError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            let field = match db_err.constraint() {
                Some(c) if c.contains("email") => "email",
                Some(c) if c.contains("slug") => "slug",
                Some(c) => c,
                None => "value",
            };
            return RepoError::Duplicate {
                field: field.to_string(),
            };
        }
        if db_err.is_check_violation() {
            return RepoError::Invalid(db_err.message().to_string());
        }
        // 22001: string_data_right_truncation (e.g. title longer than VARCHAR(200)).
        if db_err.code().as_deref() == Some("22001") {
            return RepoError::Invalid("Title cannot exceed 200 characters".to_string());
        }
    }
    tracing::error!("repository error: {:?}", err);
    RepoError::Database(err.to_string())
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn find_credentials_by_email(&self, email: &str) -> Result<Option<UserCredentials>, RepoError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, name, email, password, role FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;

        Ok(row.map(UserRow::into_credentials))
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, RepoError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, name, email, password, role FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;

        Ok(row.map(|r| r.into_credentials().user))
    }

    async fn create_user(&self, user: NewUser) -> Result<User, RepoError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"INSERT INTO users (id, name, email, password, role, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, NOW(), NOW())
               RETURNING id, name, email, password, role"#,
        )
        .bind(Uuid::new_v4())
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_error)?;

        Ok(row.into_credentials().user)
    }

    /// list_posts
    ///
    /// Builds the filter with QueryBuilder so every value is bound, never interpolated.
    async fn list_posts(&self, query: PostQuery) -> Result<Vec<Post>, RepoError> {
        let mut builder: QueryBuilder<sqlx::Postgres> = QueryBuilder::new("SELECT ");
        builder.push(POST_COLUMNS);
        builder.push(" FROM posts p LEFT JOIN users u ON u.id = p.author_id WHERE TRUE");

        if let Some(category) = query.category {
            builder.push(" AND p.category = ");
            builder.push_bind(category);
        }

        if let Some(published) = query.published {
            builder.push(" AND p.published = ");
            builder.push_bind(published);
        }

        builder.push(" ORDER BY p.created_at DESC");

        if let Some(limit) = query.limit {
            builder.push(" LIMIT ");
            builder.push_bind(limit);
        }

        let rows = builder
            .build_query_as::<PostRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_error)?;

        Ok(rows.into_iter().map(Post::from).collect())
    }

    async fn get_post(&self, id: Uuid) -> Result<Option<Post>, RepoError> {
        let sql = format!(
            "SELECT {} FROM posts p LEFT JOIN users u ON u.id = p.author_id WHERE p.id = $1",
            POST_COLUMNS
        );
        let row = sqlx::query_as::<_, PostRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?;

        Ok(row.map(Post::from))
    }

    /// create_post
    ///
    /// Inserts and re-reads with the author joined in a single statement (CTE).
    /// A slug collision surfaces as `RepoError::Duplicate { field: "slug" }`.
    async fn create_post(&self, post: NewPost) -> Result<Post, RepoError> {
        let sql = format!(
            r#"
            WITH p AS (
                INSERT INTO posts (id, title, content, category, image, image_id, author_id, slug, published, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW(), NOW())
                RETURNING *
            )
            SELECT {} FROM p LEFT JOIN users u ON u.id = p.author_id
            "#,
            POST_COLUMNS
        );

        let row = sqlx::query_as::<_, PostRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(&post.title)
            .bind(&post.content)
            .bind(&post.category)
            .bind(&post.image)
            .bind(&post.image_id)
            .bind(post.author_id)
            .bind(&post.slug)
            .bind(post.published)
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_error)?;

        Ok(Post::from(row))
    }

    /// update_post
    ///
    /// Uses `COALESCE` so only the provided fields change. The author column is
    /// never part of the update.
    async fn update_post(&self, id: Uuid, changes: PostChanges) -> Result<Option<Post>, RepoError> {
        let sql = format!(
            r#"
            WITH p AS (
                UPDATE posts
                SET title = COALESCE($2, title),
                    slug = COALESCE($3, slug),
                    content = COALESCE($4, content),
                    category = COALESCE($5, category),
                    published = COALESCE($6, published),
                    image = COALESCE($7, image),
                    image_id = COALESCE($8, image_id),
                    updated_at = NOW()
                WHERE id = $1
                RETURNING *
            )
            SELECT {} FROM p LEFT JOIN users u ON u.id = p.author_id
            "#,
            POST_COLUMNS
        );

        let row = sqlx::query_as::<_, PostRow>(&sql)
            .bind(id)
            .bind(changes.title)
            .bind(changes.slug)
            .bind(changes.content)
            .bind(changes.category)
            .bind(changes.published)
            .bind(changes.image)
            .bind(changes.image_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?;

        Ok(row.map(Post::from))
    }

    async fn delete_post(&self, id: Uuid) -> Result<bool, RepoError> {
        let result = sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_db_error)?;

        Ok(result.rows_affected() > 0)
    }
}
